//! The broadcast event record and the vocabulary it carries.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::id::{ConversationId, RunId};
use crate::tool::ToolResult;
use crate::{Timestamp, now};

// ─────────────────────────────────────────────────────────────────────────────
// Roles and statuses
// ─────────────────────────────────────────────────────────────────────────────

/// Role an agent plays inside a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Assistant,
    Planner,
    Executor,
    Critic,
}

impl AgentRole {
    pub const ALL: [AgentRole; 4] = [
        AgentRole::Assistant,
        AgentRole::Planner,
        AgentRole::Executor,
        AgentRole::Critic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assistant => "assistant",
            Self::Planner => "planner",
            Self::Executor => "executor",
            Self::Critic => "critic",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "assistant" => Ok(Self::Assistant),
            "planner" => Ok(Self::Planner),
            "executor" => Ok(Self::Executor),
            "critic" => Ok(Self::Critic),
            other => Err(Error::UnknownRole(other.to_string())),
        }
    }
}

/// What an agent is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Thinking,
    Executing,
    Waiting,
    Error,
    Done,
}

/// Lifecycle state of an agent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Payload of an [`Event`]. The set of kinds is closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Progress notice from one of the agents.
    Status {
        role: AgentRole,
        status: AgentStatus,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task: Option<String>,
    },
    /// Message text. A non-partial message ends the run successfully.
    Message {
        role: AgentRole,
        content: String,
        #[serde(default)]
        partial: bool,
    },
    /// Outcome of one tool invocation, success or failure.
    ToolResult {
        invocation_id: String,
        tool: String,
        result: ToolResult,
    },
    /// The run failed.
    Error { message: String },
    /// The run was cancelled.
    Cancelled { reason: String },
}

impl EventKind {
    pub fn status(role: AgentRole, status: AgentStatus, message: impl Into<String>) -> Self {
        Self::Status {
            role,
            status,
            message: message.into(),
            task: None,
        }
    }

    pub fn partial(role: AgentRole, content: impl Into<String>) -> Self {
        Self::Message {
            role,
            content: content.into(),
            partial: true,
        }
    }

    pub fn final_message(role: AgentRole, content: impl Into<String>) -> Self {
        Self::Message {
            role,
            content: content.into(),
            partial: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// The run state this kind moves a run into, if it is terminal.
    pub fn terminal_state(&self) -> Option<RunState> {
        match self {
            Self::Message { partial: false, .. } => Some(RunState::Completed),
            Self::Error { .. } => Some(RunState::Failed),
            Self::Cancelled { .. } => Some(RunState::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal_state().is_some()
    }

    /// Short name of the kind, matching its serialized tag.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Message { .. } => "message",
            Self::ToolResult { .. } => "tool_result",
            Self::Error { .. } => "error",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}

/// Immutable record broadcast to every observer of a conversation.
///
/// `seq` starts at 1 for each run and increases by exactly one per event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub conversation_id: ConversationId,
    pub run_id: RunId,
    pub timestamp: Timestamp,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn new(conversation_id: ConversationId, run_id: RunId, seq: u64, kind: EventKind) -> Self {
        Self {
            seq,
            conversation_id,
            run_id,
            timestamp: now(),
            kind,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind) -> Event {
        Event::new(ConversationId::parse("c1").unwrap(), RunId::new(), 1, kind)
    }

    #[test]
    fn test_terminal_kinds() {
        assert_eq!(
            EventKind::final_message(AgentRole::Assistant, "done").terminal_state(),
            Some(RunState::Completed)
        );
        assert_eq!(
            EventKind::error("boom").terminal_state(),
            Some(RunState::Failed)
        );
        assert_eq!(
            EventKind::cancelled("user").terminal_state(),
            Some(RunState::Cancelled)
        );
        assert!(!EventKind::partial(AgentRole::Assistant, "wip").is_terminal());
        assert!(
            !EventKind::status(AgentRole::Planner, AgentStatus::Thinking, "Planning").is_terminal()
        );
    }

    #[test]
    fn test_event_serializes_flat_with_type_tag() {
        let json = serde_json::to_value(event(EventKind::status(
            AgentRole::Assistant,
            AgentStatus::Thinking,
            "Understanding your request",
        )))
        .unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["seq"], 1);
        assert_eq!(json["conversation_id"], "c1");
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["status"], "thinking");
        assert!(json.get("task").is_none());
    }

    #[test]
    fn test_event_deserializes() {
        let original = event(EventKind::final_message(AgentRole::Critic, "looks good"));
        let json = serde_json::to_string(&original).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, original);
        assert!(parsed.is_terminal());
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("Planner".parse::<AgentRole>().unwrap(), AgentRole::Planner);
        assert!("writer".parse::<AgentRole>().is_err());
    }

    #[test]
    fn test_kind_name_matches_tag() {
        let kind = EventKind::cancelled("stop");
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], kind.name());
    }
}
