//! Normalized error-event payloads.
//!
//! Runtime dispatch failures are wrapped into this shape and re-emitted on
//! `system:error`, so the error channel carries one predictable schema no
//! matter which component failed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error taxonomy shared across the core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Exception inside a matched handler.
    HandlerFailure,
    /// Exception applying a transformer mapping or condition.
    TransformerFailure,
    /// Capability check failed for a routing mutation.
    PermissionDenied,
    /// Rule/subscription/context reference missing.
    NotFound,
    /// TTL validation failed at rule creation.
    TtlInvalid,
    /// Rule ID already exists.
    DuplicateRule,
    /// Async transform or observer delivery exceeded its deadline.
    Timeout,
    /// Delivery skipped because the observer's breaker is open.
    CircuitOpen,
    /// Transformer chain exceeded the configured maximum depth.
    MaxDepthExceeded,
}

impl ErrorKind {
    /// Wire string for this kind (`snake_case`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HandlerFailure => "handler_failure",
            Self::TransformerFailure => "transformer_failure",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found",
            Self::TtlInvalid => "ttl_invalid",
            Self::DuplicateRule => "duplicate_rule",
            Self::Timeout => "timeout",
            Self::CircuitOpen => "circuit_open",
            Self::MaxDepthExceeded => "max_depth_exceeded",
        }
    }

    /// Whether this kind is a synchronous validation error (returned to the
    /// caller, never broadcast on `system:error`).
    #[must_use]
    pub const fn is_validation(self) -> bool {
        matches!(
            self,
            Self::PermissionDenied | Self::NotFound | Self::TtlInvalid | Self::DuplicateRule
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The payload shape carried by every `system:error` event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEventPayload {
    /// Taxonomy bucket, e.g. `handler_failure`.
    pub error_type: ErrorKind,
    /// Concrete error type name (Rust error variant or handler-supplied class).
    pub error_class: String,
    /// Human-readable message.
    pub error_message: String,
    /// Name of the failing destination (handler name, rule id, observer id).
    pub source: String,
    /// Context reference of the event being dispatched when the failure hit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_ref: Option<String>,
}

impl ErrorEventPayload {
    /// Build a payload for a dispatch failure.
    #[must_use]
    pub fn new(
        error_type: ErrorKind,
        error_class: impl Into<String>,
        error_message: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            error_type,
            error_class: error_class.into(),
            error_message: error_message.into(),
            source: source.into(),
            context_ref: None,
        }
    }

    /// Attach the originating context reference.
    #[must_use]
    pub fn with_context_ref(mut self, context_ref: impl Into<String>) -> Self {
        self.context_ref = Some(context_ref.into());
        self
    }

    /// Serialize to a JSON payload for emission.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Null)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_wire_strings() {
        assert_eq!(ErrorKind::HandlerFailure.as_str(), "handler_failure");
        assert_eq!(ErrorKind::MaxDepthExceeded.as_str(), "max_depth_exceeded");
        assert_eq!(ErrorKind::CircuitOpen.as_str(), "circuit_open");
    }

    #[test]
    fn kind_serde_matches_as_str() {
        for kind in [
            ErrorKind::HandlerFailure,
            ErrorKind::TransformerFailure,
            ErrorKind::PermissionDenied,
            ErrorKind::NotFound,
            ErrorKind::TtlInvalid,
            ErrorKind::DuplicateRule,
            ErrorKind::Timeout,
            ErrorKind::CircuitOpen,
            ErrorKind::MaxDepthExceeded,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn validation_kinds() {
        assert!(ErrorKind::DuplicateRule.is_validation());
        assert!(ErrorKind::PermissionDenied.is_validation());
        assert!(!ErrorKind::HandlerFailure.is_validation());
        assert!(!ErrorKind::Timeout.is_validation());
    }

    #[test]
    fn payload_to_value() {
        let payload = ErrorEventPayload::new(
            ErrorKind::HandlerFailure,
            "HandlerError",
            "boom",
            "orders-handler",
        )
        .with_context_ref("ctx_agent_1");

        let value = payload.to_value();
        assert_eq!(value["errorType"], "handler_failure");
        assert_eq!(value["errorClass"], "HandlerError");
        assert_eq!(value["errorMessage"], "boom");
        assert_eq!(value["source"], "orders-handler");
        assert_eq!(value["contextRef"], "ctx_agent_1");
    }

    #[test]
    fn payload_omits_missing_context_ref() {
        let payload =
            ErrorEventPayload::new(ErrorKind::Timeout, "Elapsed", "deadline passed", "rule-7");
        let value = payload.to_value();
        assert!(value.get("contextRef").is_none());
    }
}
