//! WebSocket protocol types for client-server communication.

use serde::{Deserialize, Serialize};
use superagent_types::{Event, RunId};

use crate::routes::runs::StartRunRequest;

/// Messages from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate the connection.
    Auth {
        /// Bearer token for authentication.
        token: String,
    },
    /// Receive events for a conversation from now on.
    Subscribe { conversation_id: String },
    /// Stop receiving events for a conversation.
    Unsubscribe { conversation_id: String },
    /// Start a run. The connection is subscribed to the conversation first.
    Start {
        conversation_id: String,
        #[serde(flatten)]
        request: StartRunRequest,
    },
    /// Cancel the conversation's active run.
    Cancel { conversation_id: String },
    /// Ping to keep connection alive.
    Ping,
}

/// Messages from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication result.
    AuthResult {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        error: Option<String>,
    },
    /// Subscription acknowledgment. Events that follow are the suffix of the
    /// conversation's stream from this point.
    Subscribed { conversation_id: String },
    Unsubscribed {
        conversation_id: String,
        /// Whether the connection held a live subscription.
        removed: bool,
    },
    /// A run was registered. May arrive after the run's first events.
    RunStarted {
        conversation_id: String,
        run_id: RunId,
    },
    CancelRequested {
        conversation_id: String,
        /// `false` when the conversation had no active run.
        cancelled: bool,
    },
    /// One broadcast event.
    Event { event: Event },
    /// Error occurred.
    Error { code: String, message: String },
    /// Pong response to ping.
    Pong,
}

impl ServerMessage {
    /// Create an error message.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn auth_success() -> Self {
        Self::AuthResult {
            success: true,
            error: None,
        }
    }

    pub fn auth_failure(error: impl Into<String>) -> Self {
        Self::AuthResult {
            success: false,
            error: Some(error.into()),
        }
    }
}
