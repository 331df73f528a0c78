//! Row structs mapping directly onto the durable schema.
//!
//! Repositories return these as-is; higher layers convert them into domain
//! types. Timestamps are stored as RFC 3339 strings and JSON columns as raw
//! serialized text so re-reads stay byte-identical.

use serde::{Deserialize, Serialize};

/// A cold-tier context record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextRow {
    /// Opaque context reference (`ctx_<category>_<suffix>`).
    pub reference: String,
    /// Event the context was created for.
    pub event_id: String,
    /// Chain correlation ID.
    pub correlation_id: String,
    /// Direct causal parent, if any.
    pub parent_event_id: Option<String>,
    /// Chain root event ID.
    pub root_event_id: String,
    /// Causal hops from the chain root.
    pub depth: i64,
    /// Emitting agent, if any.
    pub agent_id: Option<String>,
    /// Owning session, if any.
    pub session_id: Option<String>,
    /// Originating client, if any.
    pub client_id: Option<String>,
    /// Context creation time (RFC 3339).
    pub timestamp: String,
    /// Full serialized context fields, returned verbatim on resolution.
    pub fields: String,
}

/// A recorded event-log entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLogRow {
    /// Log entry ID.
    pub id: String,
    /// Event name.
    pub name: String,
    /// Source actor, if the event carried one.
    pub agent_id: Option<String>,
    /// Emission time (RFC 3339).
    pub timestamp: String,
    /// Serialized payload.
    pub payload: String,
    /// Context reference carried by the event, if any.
    pub context_ref: Option<String>,
}

/// A durable routing-rule mirror record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleRow {
    /// Globally unique rule ID.
    pub rule_id: String,
    /// Source pattern string.
    pub source_pattern: String,
    /// Target event name.
    pub target_event: String,
    /// Serialized condition expression, if any.
    pub condition: Option<String>,
    /// Serialized mapping template.
    pub mapping: String,
    /// Evaluation/audit ordering priority.
    pub priority: i64,
    /// Requested TTL in seconds, if any.
    pub ttl_secs: Option<i64>,
    /// Materialized expiry instant (RFC 3339), present iff `ttl_secs` is.
    pub expires_at: Option<String>,
    /// Serialized async transform spec, if the rule is asynchronous.
    pub async_spec: Option<String>,
    /// Creation time (RFC 3339).
    pub created_at: String,
    /// Actor that created the rule.
    pub created_by: String,
}

/// An immutable audit entry for a rule mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRow {
    /// Monotonic entry ID.
    pub id: i64,
    /// Operation name (`add`, `update`, `delete`, `ttl_expired`, `restore`).
    pub operation: String,
    /// Rule the operation touched.
    pub rule_id: String,
    /// Actor that performed the operation.
    pub actor: String,
    /// Operation time (RFC 3339).
    pub timestamp: String,
    /// Serialized rule state before the operation, if it existed.
    pub before_state: Option<String>,
    /// Serialized rule state after the operation, if it still exists.
    pub after_state: Option<String>,
}
