//! External gateway for the observation manager.
//!
//! Serves the `observation:*` boundary events: `observation:subscribe`,
//! `observation:unsubscribe`, `observation:list`,
//! `observation:query_history`, and `observation:replay`.
//!
//! Validation failures come back as `{"ok": false, "error": ...}` payloads —
//! synchronous, never broadcast.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use weft_core::pattern::EventPattern;
use weft_core::{Event, EventContext};
use weft_router::{EventHandler, HandlerError};

use crate::errors::ObserveError;
use crate::manager::{HistoryFilter, ObservationManager};
use crate::types::SubscriptionFilter;

/// Router handler exposing the observation manager at the event boundary.
pub struct ObservationGateway {
    manager: Arc<ObservationManager>,
}

fn refusal(kind: &str, message: impl Into<String>) -> Value {
    json!({"ok": false, "error": {"type": kind, "message": message.into()}})
}

fn refuse(error: &ObserveError) -> Value {
    let kind = match error {
        ObserveError::NotFound(_) => "not_found",
        ObserveError::SelfObservation(_)
        | ObserveError::InvalidPattern(_)
        | ObserveError::ContentRule(_)
        | ObserveError::SamplingRate(_) => "invalid_subscription",
        ObserveError::Context(_) | ObserveError::Serde(_) => "internal",
    };
    refusal(kind, error.to_string())
}

impl ObservationGateway {
    /// Create a gateway over the given manager.
    #[must_use]
    pub fn new(manager: Arc<ObservationManager>) -> Self {
        Self { manager }
    }

    fn subscribe(&self, payload: &Value) -> Value {
        let (Some(observer), Some(target)) = (
            payload.get("observer").and_then(Value::as_str),
            payload.get("target").and_then(Value::as_str),
        ) else {
            return refusal("invalid_subscription", "missing 'observer' or 'target'");
        };
        let patterns: Vec<String> = payload
            .get("eventPatterns")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        let filter: SubscriptionFilter = match payload.get("filter") {
            None => SubscriptionFilter::default(),
            Some(raw) => match serde_json::from_value(raw.clone()) {
                Ok(filter) => filter,
                Err(error) => {
                    return refusal("invalid_subscription", format!("malformed filter: {error}"));
                }
            },
        };

        match self.manager.subscribe(observer, target, &patterns, filter) {
            Ok(id) => json!({"ok": true, "subscriptionId": id}),
            Err(error) => refuse(&error),
        }
    }

    fn unsubscribe(&self, payload: &Value) -> Value {
        let (Some(observer), Some(target)) = (
            payload.get("observer").and_then(Value::as_str),
            payload.get("target").and_then(Value::as_str),
        ) else {
            return refusal("invalid_subscription", "missing 'observer' or 'target'");
        };
        let removed = self.manager.unsubscribe(observer, target);
        json!({"ok": true, "removed": removed})
    }

    fn list(&self, payload: &Value) -> Value {
        let observer = payload.get("observer").and_then(Value::as_str);
        let target = payload.get("target").and_then(Value::as_str);
        let subscriptions = self.manager.list_subscriptions(observer, target);
        json!({
            "ok": true,
            "count": subscriptions.len(),
            "subscriptions": subscriptions,
        })
    }

    async fn query_history(&self, payload: &Value) -> Result<Value, HandlerError> {
        let filter = match parse_history_filter(payload) {
            Ok(filter) => filter,
            Err(message) => return Ok(refusal("invalid_filter", message)),
        };
        match self.manager.query_history(&filter).await {
            Ok(rows) => Ok(json!({"ok": true, "count": rows.len(), "events": rows})),
            Err(ObserveError::Context(error)) => {
                Err(HandlerError::new("Internal", error.to_string()))
            }
            Err(error) => Ok(refuse(&error)),
        }
    }

    async fn replay(&self, payload: &Value) -> Result<Value, HandlerError> {
        let Some(observer) = payload.get("observer").and_then(Value::as_str) else {
            return Ok(refusal("invalid_filter", "missing 'observer'"));
        };
        let filter = match parse_history_filter(payload) {
            Ok(filter) => filter,
            Err(message) => return Ok(refusal("invalid_filter", message)),
        };
        let speed = payload.get("speed").and_then(Value::as_f64);

        match self.manager.replay(observer, &filter, speed).await {
            Ok(replayed) => Ok(json!({"ok": true, "replayed": replayed})),
            Err(ObserveError::Context(error)) => {
                Err(HandlerError::new("Internal", error.to_string()))
            }
            Err(error) => Ok(refuse(&error)),
        }
    }
}

#[async_trait]
impl EventHandler for ObservationGateway {
    fn name(&self) -> &str {
        "observation-gateway"
    }

    fn pattern(&self) -> EventPattern {
        EventPattern::Namespace("observation:".to_string())
    }

    async fn handle(
        &self,
        event: &Event,
        _ctx: &EventContext,
    ) -> std::result::Result<Value, HandlerError> {
        match event.name.as_str() {
            "observation:subscribe" => Ok(self.subscribe(&event.payload)),
            "observation:unsubscribe" => Ok(self.unsubscribe(&event.payload)),
            "observation:list" => Ok(self.list(&event.payload)),
            "observation:query_history" => self.query_history(&event.payload).await,
            "observation:replay" => self.replay(&event.payload).await,
            other => Ok(refusal(
                "not_found",
                format!("unsupported observation operation: {other}"),
            )),
        }
    }
}

fn parse_history_filter(payload: &Value) -> Result<HistoryFilter, String> {
    let since = parse_timestamp(payload, "since")?;
    let until = parse_timestamp(payload, "until")?;
    Ok(HistoryFilter {
        agent_id: payload
            .get("agentId")
            .and_then(Value::as_str)
            .map(String::from),
        pattern: payload
            .get("pattern")
            .and_then(Value::as_str)
            .map(String::from),
        since,
        until,
        limit: payload.get("limit").and_then(Value::as_i64),
    })
}

fn parse_timestamp(payload: &Value, key: &str) -> Result<Option<DateTime<Utc>>, String> {
    match payload.get(key).and_then(Value::as_str) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<DateTime<Utc>>()
            .map(Some)
            .map_err(|e| format!("invalid '{key}': {e}")),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
