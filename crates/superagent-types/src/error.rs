//! Error types for shared data model validation.

use thiserror::Error;

/// Result type alias using the shared error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Validation errors raised while constructing shared types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid conversation id: {0}")]
    InvalidConversationId(String),

    #[error("Invalid run id: {0}")]
    InvalidRunId(String),

    #[error("Unknown agent role: {0}")]
    UnknownRole(String),
}
