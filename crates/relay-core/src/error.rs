//! Error types for the relay core.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors raised by the user registry. Write failures are reported to the caller;
/// the canonical document is never left partially written.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("registry serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("user not found: {0}")]
    NotFound(String),

    #[error("{field} '{value}' is already registered to {owner}")]
    Conflict {
        field: &'static str,
        value: String,
        owner: String,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("registry lock poisoned")]
    Lock,
}

/// Failures at a collaborator boundary (NLU, language model, reply transport).
/// These never escape the router: every variant is recovered by the next tier or a heuristic.
#[derive(Error, Debug)]
pub enum CollaboratorError {
    #[error("collaborator not configured")]
    NotConfigured,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("collaborator returned HTTP {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("collaborator timed out after {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CollaboratorError::Malformed(err.to_string())
        } else {
            CollaboratorError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for CollaboratorError {
    fn from(err: serde_json::Error) -> Self {
        CollaboratorError::Malformed(err.to_string())
    }
}
