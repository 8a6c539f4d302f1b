//! Shared types for the Superagent orchestration system.
//!
//! Everything that crosses a crate boundary lives here: conversation and run
//! identifiers, the broadcast [`Event`] record, agent roles and statuses,
//! conversation history, and the uniform [`ToolResult`] envelope.

pub mod error;
pub mod event;
pub mod id;
pub mod message;
pub mod tool;

pub use error::{Error, Result};
pub use event::{AgentRole, AgentStatus, Event, EventKind, RunState};
pub use id::{ConversationId, RunId, SubscriptionId};
pub use message::{HistoryMessage, Role};
pub use tool::{ToolDiagnostics, ToolErrorKind, ToolFailure, ToolInvocation, ToolOutcome, ToolResult};

/// Timestamp type used across the system.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Current UTC time.
pub fn now() -> Timestamp {
    chrono::Utc::now()
}
