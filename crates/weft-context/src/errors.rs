//! Error types for the context manager.

use thiserror::Error;

/// Errors that can occur during context manager operations.
#[derive(Debug, Error)]
pub enum ContextError {
    /// Durable-store failure.
    #[error("store error: {0}")]
    Store(#[from] weft_store::StoreError),

    /// JSON serialization/deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// The cold-tier writer task is gone (shutdown).
    #[error("cold writer unavailable")]
    WriterUnavailable,

    /// A blocking read task failed to complete.
    #[error("blocking task failed: {0}")]
    TaskFailed(String),

    /// Requested context reference does not exist in either tier.
    #[error("context not found: {0}")]
    NotFound(String),
}

/// Convenience type alias for context manager results.
pub type Result<T> = std::result::Result<T, ContextError>;
