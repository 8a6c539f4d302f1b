//! Server configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::{Result, ServerError};

/// Default max message size for WebSocket (1 MB).
pub const DEFAULT_MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

/// Default max body size for REST requests (10 MB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Idle timeout for WebSocket connections (5 minutes).
pub const DEFAULT_WS_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default capacity of each connection's outbound queue.
pub const DEFAULT_WS_QUEUE_CAPACITY: usize = 1024;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to.
    pub bind_address: SocketAddr,

    /// Authentication token. `None` means auth is disabled (localhost mode).
    pub auth_token: Option<String>,

    /// Enable request tracing.
    pub request_logging: bool,

    /// CORS allowed origins (empty = no CORS).
    pub cors_origins: Vec<String>,

    /// Maximum WebSocket message size in bytes.
    pub max_ws_message_size: usize,

    /// Maximum REST request body size in bytes.
    pub max_body_size: usize,

    /// WebSocket connections that send nothing for this long are closed.
    pub ws_idle_timeout: Duration,

    /// Capacity of each WebSocket connection's outbound queue. A connection
    /// whose queue fills loses its subscriptions.
    pub ws_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8000),
            auth_token: None,
            request_logging: true,
            cors_origins: Vec::new(),
            max_ws_message_size: DEFAULT_MAX_WS_MESSAGE_SIZE,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            ws_idle_timeout: DEFAULT_WS_IDLE_TIMEOUT,
            ws_queue_capacity: DEFAULT_WS_QUEUE_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Create a new server config with an optional auth token.
    /// Pass `None` to disable authentication (localhost mode).
    pub fn new(auth_token: Option<String>) -> Self {
        Self {
            auth_token,
            ..Default::default()
        }
    }

    /// Build from the `[server]` and `[orchestrator]` config sections.
    pub fn from_settings(
        server: &superagent_config::ServerConfig,
        orchestrator: &superagent_config::OrchestratorConfig,
    ) -> Result<Self> {
        let ip: IpAddr = server
            .bind
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid bind address '{}': {e}", server.bind)))?;

        Ok(Self {
            bind_address: SocketAddr::new(ip, server.port),
            auth_token: server.auth_token.clone().filter(|t| !t.is_empty()),
            request_logging: server.request_logging,
            cors_origins: server.cors_origins.clone(),
            ws_queue_capacity: orchestrator.channel_capacity.max(1),
            ..Default::default()
        })
    }

    /// Set the bind address.
    pub fn with_bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = addr;
        self
    }

    /// Enable or disable request logging.
    pub fn with_request_logging(mut self, enabled: bool) -> Self {
        self.request_logging = enabled;
        self
    }

    /// Set CORS allowed origins.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }

    /// Set the maximum WebSocket message size.
    pub fn with_max_ws_message_size(mut self, size: usize) -> Self {
        self.max_ws_message_size = size;
        self
    }

    /// Set the maximum REST request body size.
    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    pub fn with_ws_idle_timeout(mut self, timeout: Duration) -> Self {
        self.ws_idle_timeout = timeout;
        self
    }

    pub fn with_ws_queue_capacity(mut self, capacity: usize) -> Self {
        self.ws_queue_capacity = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings() {
        let server = superagent_config::ServerConfig {
            port: 9100,
            bind: "0.0.0.0".into(),
            cors_origins: vec!["http://localhost:3000".into()],
            auth_token: Some(String::new()),
            request_logging: false,
        };
        let config = ServerConfig::from_settings(&server, &Default::default()).unwrap();
        assert_eq!(config.bind_address.to_string(), "0.0.0.0:9100");
        // Empty token means auth disabled.
        assert!(config.auth_token.is_none());
        assert!(!config.request_logging);
    }

    #[test]
    fn test_invalid_bind_rejected() {
        let server = superagent_config::ServerConfig {
            bind: "not-an-ip".into(),
            ..Default::default()
        };
        assert!(matches!(
            ServerConfig::from_settings(&server, &Default::default()),
            Err(ServerError::Config(_))
        ));
    }

    #[test]
    fn test_builder() {
        let config = ServerConfig::new(Some("my-token".to_string()))
            .with_bind_address("0.0.0.0:9000".parse().unwrap())
            .with_ws_queue_capacity(0)
            .with_request_logging(true);

        assert_eq!(config.auth_token, Some("my-token".to_string()));
        assert_eq!(config.bind_address.port(), 9000);
        assert_eq!(config.ws_queue_capacity, 1);
    }
}
