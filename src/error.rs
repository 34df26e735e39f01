//! Error types for the subscription coordinator.

use thiserror::Error;

/// Main error type for coordinator operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Invalid query: {0}")]
    Configuration(String),

    #[error("Transport error on {collection}: {message}")]
    Transport { collection: String, message: String },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    /// True for errors caused by the caller's input rather than the remote store.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SyncError::UnknownCollection(_) | SyncError::Configuration(_)
        )
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Config(e.to_string())
    }
}

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, SyncError>;
