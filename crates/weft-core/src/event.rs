//! The ephemeral event record.
//!
//! An [`Event`] is a named, timestamped payload emitted into the router. It is
//! never persisted as a first-class record; consumers that need history (the
//! observation recorder) log it themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named event flowing through the router.
///
/// The `context_ref` is an opaque reference issued by the context manager;
/// it stands in for the full lineage record so payloads stay small.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Namespaced event name, e.g. `order:created`.
    pub name: String,
    /// Event payload — shape varies by event name.
    pub payload: Value,
    /// Opaque context reference (absent for context-free emissions).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_ref: Option<String>,
    /// Emission timestamp.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create an event stamped with the current time and no context.
    #[must_use]
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
            context_ref: None,
            timestamp: Utc::now(),
        }
    }

    /// Create an event carrying a context reference.
    #[must_use]
    pub fn with_context_ref(
        name: impl Into<String>,
        payload: Value,
        context_ref: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            payload,
            context_ref: Some(context_ref.into()),
            timestamp: Utc::now(),
        }
    }

    /// The namespace portion of the event name (text before the first `:`),
    /// or the whole name if it has no namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.name.split(':').next().unwrap_or(&self.name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
