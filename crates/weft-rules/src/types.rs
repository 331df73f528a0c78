//! Rule record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use weft_core::RuleId;
use weft_core::pattern::EventPattern;
use weft_router::AsyncTransformSpec;
use weft_store::row_types::RuleRow;

use crate::errors::{Result, RuleError};

/// A routing rule record.
///
/// Invariants: `rule_id` is globally unique; `expires_at` is materialized iff
/// `ttl_secs` is set. The compiled transformer registration lives in the
/// router and is added/removed atomically with this record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRule {
    /// Globally unique rule ID.
    pub rule_id: RuleId,
    /// Pattern matched against emitted event names.
    pub source_pattern: EventPattern,
    /// Event name emitted per match.
    pub target_event: String,
    /// Optional boolean condition over payload/context (JSON form; compiled
    /// at registration).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,
    /// Mapping template (JSON form; compiled at registration).
    pub mapping: Value,
    /// Evaluation/audit ordering, descending. Never exclusivity.
    pub priority: i64,
    /// Requested TTL in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
    /// Materialized expiry instant (present iff `ttl_secs` is).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Present when the rule is asynchronous.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub async_spec: Option<AsyncTransformSpec>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Actor that created the rule.
    pub created_by: String,
}

impl RoutingRule {
    /// Whether the rule has passed its expiry instant.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| now >= expires)
    }

    /// Convert to the durable mirror row.
    pub fn to_row(&self) -> Result<RuleRow> {
        Ok(RuleRow {
            rule_id: self.rule_id.as_str().to_string(),
            source_pattern: self.source_pattern.to_string(),
            target_event: self.target_event.clone(),
            condition: self
                .condition
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            mapping: serde_json::to_string(&self.mapping)?,
            priority: self.priority,
            ttl_secs: self.ttl_secs.map(|t| i64::try_from(t).unwrap_or(i64::MAX)),
            expires_at: self.expires_at.map(|t| t.to_rfc3339()),
            async_spec: self
                .async_spec
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            created_at: self.created_at.to_rfc3339(),
            created_by: self.created_by.clone(),
        })
    }

    /// Reconstruct from a durable mirror row.
    pub fn from_row(row: &RuleRow) -> Result<Self> {
        let source_pattern = EventPattern::parse(&row.source_pattern)
            .map_err(|e| RuleError::InvalidPattern(e.to_string()))?;
        Ok(Self {
            rule_id: RuleId::from(row.rule_id.as_str()),
            source_pattern,
            target_event: row.target_event.clone(),
            condition: row
                .condition
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            mapping: serde_json::from_str(&row.mapping)?,
            priority: row.priority,
            ttl_secs: row.ttl_secs.map(|t| u64::try_from(t).unwrap_or(0)),
            expires_at: row
                .expires_at
                .as_deref()
                .map(|raw| {
                    raw.parse::<DateTime<Utc>>()
                        .map_err(|e| RuleError::TtlInvalid(e.to_string()))
                })
                .transpose()?,
            async_spec: row
                .async_spec
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            created_at: row
                .created_at
                .parse::<DateTime<Utc>>()
                .unwrap_or_else(|_| Utc::now()),
            created_by: row.created_by.clone(),
        })
    }
}

/// Parameters for creating a rule.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSpec {
    /// Globally unique rule ID.
    pub rule_id: String,
    /// Source pattern string (`name` or `namespace:*`).
    pub source_pattern: String,
    /// Target event name.
    pub target_event: String,
    /// Optional condition (JSON form).
    #[serde(default)]
    pub condition: Option<Value>,
    /// Mapping template (JSON object).
    pub mapping: Value,
    /// Evaluation/audit ordering. Defaults to 0.
    #[serde(default)]
    pub priority: i64,
    /// Optional TTL in seconds (must be positive).
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    /// Present to make the rule asynchronous.
    #[serde(default)]
    pub async_spec: Option<AsyncTransformSpec>,
}

/// Partial update for an existing rule. `None` fields are left unchanged;
/// a condition of `Value::Null` clears the condition.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleUpdate {
    /// New source pattern.
    #[serde(default)]
    pub source_pattern: Option<String>,
    /// New target event.
    #[serde(default)]
    pub target_event: Option<String>,
    /// New condition (`Value::Null` clears it).
    #[serde(default)]
    pub condition: Option<Value>,
    /// New mapping template.
    #[serde(default)]
    pub mapping: Option<Value>,
    /// New priority.
    #[serde(default)]
    pub priority: Option<i64>,
    /// New TTL in seconds, measured from the update.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    /// New async spec (`Some` replaces, `None` leaves unchanged).
    #[serde(default)]
    pub async_spec: Option<AsyncTransformSpec>,
}

/// Filters for querying rules.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleFilter {
    /// Match this source pattern string exactly.
    #[serde(default)]
    pub source_pattern: Option<String>,
    /// Match rules created by this actor.
    #[serde(default)]
    pub created_by: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
