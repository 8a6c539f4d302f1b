//! Error types for sandbox operations.

use std::time::Duration;

use superagent_types::{ToolErrorKind, ToolResult};
use thiserror::Error;

/// Errors that prevent an operation from running at all.
///
/// Once a process is running, every outcome (including timeout and
/// cancellation) is reported through a [`ToolResult`] instead.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The program could not be located.
    #[error("Program not found: {0}")]
    ProgramNotFound(String),

    /// The process could not be spawned.
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// The scratch directory could not be prepared.
    #[error("Failed to prepare scratch directory: {0}")]
    Workspace(std::io::Error),

    /// The operation or its deadline is malformed.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    pub fn kind(&self) -> ToolErrorKind {
        match self {
            SandboxError::InvalidOperation(_) => ToolErrorKind::InvalidArguments,
            SandboxError::ProgramNotFound(_) | SandboxError::Spawn { .. } => {
                ToolErrorKind::Execution
            }
            SandboxError::Workspace(_) | SandboxError::Io(_) => ToolErrorKind::Internal,
        }
    }

    pub fn into_tool_result(self) -> ToolResult {
        ToolResult::error(self.kind(), self.to_string())
    }
}

/// Why a bounded operation stopped before producing its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupted {
    #[error("deadline of {}ms exceeded", .0.as_millis())]
    Timeout(Duration),

    #[error("operation was cancelled")]
    Cancelled,
}

impl Interrupted {
    pub fn into_tool_result(self) -> ToolResult {
        match self {
            Interrupted::Timeout(deadline) => ToolResult::timeout(deadline),
            Interrupted::Cancelled => ToolResult::cancelled(),
        }
    }
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;
