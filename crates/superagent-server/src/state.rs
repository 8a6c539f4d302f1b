//! Application state shared across handlers.

use std::sync::Arc;

use superagent_agent::Orchestrator;

use crate::config::ServerConfig;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The run registry and broadcaster.
    pub orchestrator: Orchestrator,

    /// Server configuration.
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, config: ServerConfig) -> Self {
        Self {
            orchestrator,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }
}
