//! Error types for the rule service.

use thiserror::Error;

/// Errors that can occur during rule service operations.
///
/// Validation variants are returned synchronously to the caller and never
/// broadcast on the error channel.
#[derive(Debug, Error)]
pub enum RuleError {
    /// A rule with this ID already exists — no silent overwrite.
    #[error("duplicate rule: {0}")]
    DuplicateRule(String),

    /// The rule does not exist.
    #[error("rule not found: {0}")]
    NotFound(String),

    /// The source pattern or target event is malformed.
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    /// The rule's source pattern matches its own target event verbatim.
    #[error("rule '{0}' would transform its own output")]
    SelfCycle(String),

    /// TTL must be a positive number of seconds.
    #[error("invalid ttl: {0}")]
    TtlInvalid(String),

    /// The actor lacks the required capability.
    #[error("actor '{actor}' lacks capability '{capability}'")]
    PermissionDenied {
        /// Actor that attempted the mutation.
        actor: String,
        /// Capability that was required.
        capability: String,
    },

    /// The condition expression failed to compile.
    #[error("invalid condition: {0}")]
    Condition(#[from] weft_router::ConditionError),

    /// The mapping template failed to compile.
    #[error("invalid mapping: {0}")]
    Template(#[from] weft_router::TemplateError),

    /// Durable-store failure.
    #[error("store error: {0}")]
    Store(#[from] weft_store::StoreError),

    /// JSON serialization/deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A blocking store task failed to complete.
    #[error("blocking task failed: {0}")]
    TaskFailed(String),
}

impl RuleError {
    /// Wire error-type tag used in gateway refusal payloads.
    #[must_use]
    pub fn wire_type(&self) -> &'static str {
        match self {
            Self::DuplicateRule(_) => "duplicate_rule",
            Self::NotFound(_) => "not_found",
            Self::InvalidPattern(_) | Self::SelfCycle(_) | Self::Condition(_) | Self::Template(_) => {
                "invalid_pattern"
            }
            Self::TtlInvalid(_) => "ttl_invalid",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::Store(_) | Self::Serde(_) | Self::TaskFailed(_) => "internal",
        }
    }

    /// Whether this is a validation error (synchronous-only propagation).
    #[must_use]
    pub fn is_validation(&self) -> bool {
        self.wire_type() != "internal"
    }
}

/// Convenience type alias for rule service results.
pub type Result<T> = std::result::Result<T, RuleError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
