//! Tool invocation requests and the uniform result envelope.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request to run a named tool with JSON arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            arguments,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// Classification of a failed tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    Timeout,
    Cancelled,
    NotFound,
    InvalidArguments,
    Execution,
    Internal,
}

impl fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::NotFound => "not_found",
            Self::InvalidArguments => "invalid_arguments",
            Self::Execution => "execution",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Structured error carried by a failed [`ToolResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub kind: ToolErrorKind,
    pub message: String,
}

/// Either the data a tool produced or the reason it failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    Data(Value),
    Error(ToolFailure),
}

/// Side information about how an invocation ran.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolDiagnostics {
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

/// Uniform response envelope for every tool invocation.
///
/// Serializes as `{"data": ..., "diagnostics": {...}}` or
/// `{"error": {"kind": ..., "message": ...}, "diagnostics": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    #[serde(flatten)]
    pub outcome: ToolOutcome,
    #[serde(default)]
    pub diagnostics: ToolDiagnostics,
}

impl ToolResult {
    pub fn data(value: Value) -> Self {
        Self {
            outcome: ToolOutcome::Data(value),
            diagnostics: ToolDiagnostics::default(),
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::data(Value::String(content.into()))
    }

    pub fn error(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            outcome: ToolOutcome::Error(ToolFailure {
                kind,
                message: message.into(),
            }),
            diagnostics: ToolDiagnostics::default(),
        }
    }

    pub fn timeout(deadline: Duration) -> Self {
        Self::error(
            ToolErrorKind::Timeout,
            format!("deadline of {}ms exceeded", deadline.as_millis()),
        )
    }

    pub fn cancelled() -> Self {
        Self::error(ToolErrorKind::Cancelled, "invocation was cancelled")
    }

    pub fn not_found(name: &str) -> Self {
        Self::error(ToolErrorKind::NotFound, format!("unknown tool: {name}"))
    }

    pub fn with_diagnostics(mut self, diagnostics: ToolDiagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.diagnostics.duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Data(_))
    }

    pub fn is_error(&self) -> bool {
        !self.is_ok()
    }

    pub fn error_kind(&self) -> Option<ToolErrorKind> {
        match &self.outcome {
            ToolOutcome::Error(failure) => Some(failure.kind),
            ToolOutcome::Data(_) => None,
        }
    }

    pub fn data_value(&self) -> Option<&Value> {
        match &self.outcome {
            ToolOutcome::Data(value) => Some(value),
            ToolOutcome::Error(_) => None,
        }
    }

    /// Render the result as plain text for feeding back into a model.
    pub fn to_observation(&self) -> String {
        match &self.outcome {
            ToolOutcome::Data(Value::String(s)) => s.clone(),
            ToolOutcome::Data(value) => value.to_string(),
            ToolOutcome::Error(failure) => {
                let mut text = format!("Error ({}): {}", failure.kind, failure.message);
                if let Some(stderr) = self.diagnostics.stderr.as_deref().filter(|s| !s.is_empty()) {
                    text.push_str("\n--- stderr ---\n");
                    text.push_str(stderr);
                }
                text
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_envelope_shape() {
        let result = ToolResult::data(json!({"answer": 42}));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["data"]["answer"], 42);
        assert!(json.get("error").is_none());
        assert_eq!(json["diagnostics"]["duration_ms"], 0);
    }

    #[test]
    fn test_error_envelope_shape() {
        let result = ToolResult::timeout(Duration::from_millis(250));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["error"]["kind"], "timeout");
        assert!(json["error"]["message"].as_str().unwrap().contains("250ms"));
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_envelope_deserializes() {
        let parsed: ToolResult = serde_json::from_str(
            r#"{"error":{"kind":"cancelled","message":"stop"},"diagnostics":{"duration_ms":5,"stderr":"x"}}"#,
        )
        .unwrap();
        assert_eq!(parsed.error_kind(), Some(ToolErrorKind::Cancelled));
        assert_eq!(parsed.diagnostics.duration_ms, 5);
        assert_eq!(parsed.diagnostics.stderr.as_deref(), Some("x"));
    }

    #[test]
    fn test_observation_includes_stderr() {
        let result = ToolResult::error(ToolErrorKind::Execution, "exit status 1").with_diagnostics(
            ToolDiagnostics {
                stderr: Some("NameError".into()),
                ..Default::default()
            },
        );
        let obs = result.to_observation();
        assert!(obs.starts_with("Error (execution): exit status 1"));
        assert!(obs.contains("NameError"));
    }

    #[test]
    fn test_text_observation_is_raw() {
        assert_eq!(ToolResult::text("hello").to_observation(), "hello");
    }
}
