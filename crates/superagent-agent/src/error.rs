//! Error types for the agent crate.

use superagent_llm::LlmError;
use superagent_types::{AgentRole, ConversationId};
use thiserror::Error;

/// Result type alias using the agent error type.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Error type for tool and engine operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Model call failed.
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Tool execution error.
    #[error("Tool error: {0}")]
    Tool(String),

    /// Invalid tool parameters.
    #[error("Invalid tool parameters: {0}")]
    InvalidToolParams(String),

    /// The reasoning engine could not continue.
    #[error("Engine error: {0}")]
    Engine(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Task was cancelled.
    #[error("Task cancelled")]
    Cancelled,
}

impl AgentError {
    pub fn tool(msg: impl Into<String>) -> Self {
        Self::Tool(msg.into())
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::InvalidToolParams(msg.into())
    }

    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Synchronous failures of orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A run is already active for this conversation.
    #[error("conversation '{0}' already has an active run")]
    AlreadyRunning(ConversationId),

    /// A role's model binding could not be resolved.
    #[error("cannot resolve model for role '{role}': {source}")]
    Model {
        role: AgentRole,
        #[source]
        source: LlmError,
    },

    /// The orchestrator is shutting down and accepts no new runs.
    #[error("orchestrator is shutting down")]
    ShuttingDown,
}

impl OrchestratorError {
    /// Stable machine-readable code, used by transports.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyRunning(_) => "already_running",
            Self::Model { .. } => "model_unavailable",
            Self::ShuttingDown => "shutting_down",
        }
    }
}
