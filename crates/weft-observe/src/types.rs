//! Subscription and notification types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use weft_core::pattern::EventPattern;
use weft_core::{AgentId, SubscriptionId};

/// Rate limit: at most `max` notifications per rolling `window_secs`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSpec {
    /// Maximum notifications per window.
    pub max: u32,
    /// Rolling window in seconds.
    pub window_secs: u64,
}

/// Optional shaping applied to a subscription's notifications.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscriptionFilter {
    /// Condition over the event payload (compiled at subscribe time).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_rules: Option<Value>,
    /// Only observe events whose namespace is in this list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_allow: Option<Vec<String>>,
    /// Never observe events whose namespace is in this list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_block: Option<Vec<String>>,
    /// Probability in `0.0..=1.0` that a matched event is observed
    /// (applied before rate limiting). `None` observes everything.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling_rate: Option<f64>,
    /// Token-bucket rate limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitSpec>,
}

/// An observer's registration against a target's event traffic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Unique subscription ID.
    pub subscription_id: SubscriptionId,
    /// Actor receiving notifications.
    pub observer: AgentId,
    /// Actor whose traffic is observed.
    pub target: AgentId,
    /// Event name patterns that make an event eligible.
    pub event_patterns: Vec<EventPattern>,
    /// Shaping filters.
    pub filter: SubscriptionFilter,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Kind of observation notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// Delivered before the observed event's handlers run.
    Begin,
    /// Delivered after the observed event's handlers complete.
    End,
    /// The subscription's target terminated.
    TargetTerminated,
    /// A recorded event re-delivered during replay.
    Replay,
}

/// One notification delivered to an observer.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationNotice {
    /// Notification kind.
    pub kind: NoticeKind,
    /// Receiving observer.
    pub observer: AgentId,
    /// Observed target.
    pub target: AgentId,
    /// Name of the observed event.
    pub event_name: String,
    /// Payload of the observed event.
    pub payload: Value,
    /// Context reference of the observed event, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_ref: Option<String>,
    /// Subscription that produced this notice, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<SubscriptionId>,
    /// First handler result (on `end`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// First handler error (on `end`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Handler execution duration (on `end`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Notice creation time.
    pub timestamp: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
