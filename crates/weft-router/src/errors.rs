//! Error types for the router.

use thiserror::Error;

/// A handler-reported failure.
///
/// Handlers return this instead of panicking; the router wraps it into a
/// `system:error` emission and the caller's outcome.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{class}: {message}")]
pub struct HandlerError {
    /// Short error class name (e.g. `ValidationError`).
    pub class: String,
    /// Human-readable message.
    pub message: String,
}

impl HandlerError {
    /// Create a handler error.
    #[must_use]
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
        }
    }
}

/// Errors compiling or applying a mapping template.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    /// The mapping root must be a JSON object.
    #[error("mapping must be a JSON object")]
    NotAnObject,

    /// A `{{` was never closed.
    #[error("unclosed template expression in: {0}")]
    Unclosed(String),

    /// An expression addressed an empty field path.
    #[error("empty field path in template expression: {0}")]
    EmptyPath(String),

    /// A `$name(...)` call used a function outside the whitelist.
    #[error("unknown template function: {0}")]
    UnknownFunction(String),

    /// A `$name(...)` call was malformed.
    #[error("malformed template call: {0}")]
    BadCall(String),
}

/// Errors compiling a condition expression.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConditionError {
    /// The condition JSON did not match any recognized shape.
    #[error("unrecognized condition shape: {0}")]
    InvalidShape(String),

    /// The comparison operator is not in the closed set.
    #[error("unknown condition operator: {0}")]
    UnknownOp(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
