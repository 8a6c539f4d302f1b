//! HTTP API and WebSocket server for Superagent.
//!
//! This crate is the network surface of the orchestrator: a small REST API
//! to start, cancel and inspect runs, and a WebSocket adapter that turns each
//! connection into observer channels for the conversations it subscribes to.
//!
//! # Example
//!
//! ```ignore
//! use superagent_server::{Server, ServerConfig};
//!
//! let config = ServerConfig::new(Some("secret-token".to_string()))
//!     .with_bind_address("127.0.0.1:8080".parse()?);
//!
//! let server = Server::new(orchestrator, config);
//! server.run_until(tokio::signal::ctrl_c().map(|_| ())).await?;
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use auth::{AuthError, auth_middleware, verify_token};
pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use routes::{ClientMessage, ServerMessage, StartRunRequest};
pub use state::AppState;

use std::future::Future;
use std::net::SocketAddr;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use axum::{Router, middleware};
use superagent_agent::Orchestrator;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// The Superagent HTTP/WebSocket server.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server around an orchestrator.
    pub fn new(orchestrator: Orchestrator, config: ServerConfig) -> Self {
        Self {
            state: AppState::new(orchestrator, config),
        }
    }

    /// Create a server from a pre-built application state.
    pub fn from_state(state: AppState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the router with all routes and middleware.
    pub fn router(&self) -> Router {
        use axum::routing::get;

        let mut router = Router::new()
            // Health routes (no auth required)
            .merge(routes::health_routes())
            // WebSocket (auth happens via message, not HTTP header)
            .route("/ws", get(routes::ws_handler))
            .nest("/api/v1", self.api_routes())
            .layer(DefaultBodyLimit::max(self.state.config.max_body_size));

        if let Some(cors) = self.cors_layer() {
            router = router.layer(cors);
        }
        if self.state.config.request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router.with_state(self.state.clone())
    }

    /// API routes (v1), behind the auth middleware.
    fn api_routes(&self) -> Router<AppState> {
        use axum::routing::{get, post};

        Router::new()
            .route(
                "/conversations/{id}/runs",
                post(routes::start_run_handler),
            )
            .route("/conversations/{id}/cancel", post(routes::cancel_handler))
            .route("/conversations/{id}", get(routes::conversation_handler))
            .route("/runs", get(routes::active_runs_handler))
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                auth::auth_middleware,
            ))
    }

    fn cors_layer(&self) -> Option<CorsLayer> {
        let origins = &self.state.config.cors_origins;
        if origins.is_empty() {
            return None;
        }

        let layer = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

        if origins.iter().any(|o| o == "*") {
            return Some(layer.allow_origin(Any));
        }

        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        Some(layer.allow_origin(parsed))
    }

    /// Run the server until the process is killed.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server until `shutdown` resolves, then cancel active runs
    /// and stop accepting connections.
    pub async fn run_until(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let addr = self.state.config.bind_address;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Internal(format!("Failed to bind {addr}: {e}")))?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already-bound listener (useful for testing).
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let local_addr: Option<SocketAddr> = listener.local_addr().ok();
        info!(addr = ?local_addr, "Starting server");

        let orchestrator = self.state.orchestrator.clone();
        let router = self.router();
        let signal = async move {
            shutdown.await;
            info!("Shutdown requested, cancelling active runs");
            if !orchestrator.shutdown().await {
                tracing::warn!("Some runs did not finish within the shutdown grace period");
            }
        };

        axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| ServerError::Internal(format!("Server error: {e}")))?;

        info!("Server stopped");
        Ok(())
    }

    /// Get the configured bind address.
    pub fn bind_address(&self) -> SocketAddr {
        self.state.config.bind_address
    }
}
