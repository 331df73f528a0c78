//! Compiled transformers.
//!
//! A [`CompiledTransformer`] is the live registration produced from a routing
//! rule: pattern, optional condition tree, mapping template, and (for async
//! rules) the completion spec. The rule service owns rule records; the router
//! owns these registrations and evaluates them on every emission.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use weft_core::RuleId;
use weft_core::pattern::EventPattern;

use crate::condition::Condition;
use crate::template::MappingTemplate;

/// Completion spec for an asynchronous transformer.
///
/// The mapped payload gets a generated correlation token; the eventual
/// response event echoing that token is routed to `completion_event`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncTransformSpec {
    /// Event name the response is routed to.
    pub completion_event: String,
    /// Deadline for the response, in milliseconds. `None` uses the router's
    /// configured default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// A live transformer registration.
#[derive(Clone, Debug)]
pub struct CompiledTransformer {
    /// Rule this registration was compiled from.
    pub rule_id: RuleId,
    /// Source pattern matched against emitted event names.
    pub source: EventPattern,
    /// Event name emitted for each match.
    pub target_event: String,
    /// Optional gate evaluated against payload and context.
    pub condition: Option<Condition>,
    /// Payload mapping applied per match.
    pub mapping: MappingTemplate,
    /// Evaluation/audit ordering (descending). Never exclusivity: every
    /// matching transformer fires.
    pub priority: i64,
    /// Expiry instant for TTL rules; expired registrations are skipped even
    /// before the sweep removes them.
    pub expires_at: Option<DateTime<Utc>>,
    /// Present when the rule is asynchronous.
    pub async_spec: Option<AsyncTransformSpec>,
}

impl CompiledTransformer {
    /// Whether this registration has passed its expiry instant.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| now >= expires)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
