//! Error types for the observation manager.

use thiserror::Error;

/// Errors that can occur during observation operations.
#[derive(Debug, Error)]
pub enum ObserveError {
    /// An actor tried to observe its own observation traffic.
    #[error("actor '{0}' cannot observe its own observation traffic")]
    SelfObservation(String),

    /// An event pattern failed to parse.
    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] weft_core::pattern::PatternError),

    /// A content rule failed to compile.
    #[error("invalid content rule: {0}")]
    ContentRule(#[from] weft_router::ConditionError),

    /// The sampling rate must lie in `0.0..=1.0`.
    #[error("invalid sampling rate: {0}")]
    SamplingRate(f64),

    /// No such subscription.
    #[error("subscription not found: {0}")]
    NotFound(String),

    /// Context manager (history/replay) failure.
    #[error("context error: {0}")]
    Context(#[from] weft_context::ContextError),

    /// JSON serialization/deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Convenience type alias for observation results.
pub type Result<T> = std::result::Result<T, ObserveError>;
