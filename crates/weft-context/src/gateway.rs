//! External gateway for the context manager.
//!
//! Serves the `context:*` boundary events through a router handler:
//! `context:resolve`, `context:resolve_batch`, `context:query`,
//! `context:history`, `context:stats`, and `context:health`.
//!
//! Validation failures (`not_found`, bad requests) are returned synchronously
//! as `{"ok": false, "error": ...}` payloads and never reach the broadcast
//! error channel; only unexpected internal faults surface as handler errors.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use weft_core::pattern::EventPattern;
use weft_core::{Event, EventContext};
use weft_router::{EventHandler, HandlerError};
use weft_store::repositories::EventLogQuery;

use crate::manager::{ContextManager, ContextQueryParams};

/// Router handler exposing the context manager at the event boundary.
pub struct ContextGateway {
    manager: Arc<ContextManager>,
}

/// Build a synchronous validation-error payload (never broadcast).
fn refusal(kind: &str, message: impl Into<String>) -> Value {
    json!({"ok": false, "error": {"type": kind, "message": message.into()}})
}

impl ContextGateway {
    /// Create a gateway over the given manager.
    #[must_use]
    pub fn new(manager: Arc<ContextManager>) -> Self {
        Self { manager }
    }

    async fn resolve(&self, payload: &Value) -> Result<Value, HandlerError> {
        let Some(reference) = payload.get("ref").and_then(Value::as_str) else {
            return Ok(refusal("not_found", "missing 'ref'"));
        };
        match self.manager.get_context(reference).await.map_err(internal)? {
            Some(ctx) => Ok(json!({"ok": true, "ref": reference, "context": ctx})),
            None => Ok(refusal("not_found", format!("no context for {reference}"))),
        }
    }

    async fn resolve_batch(&self, payload: &Value) -> Result<Value, HandlerError> {
        let Some(refs) = payload.get("refs").and_then(Value::as_array) else {
            return Ok(refusal("not_found", "missing 'refs' array"));
        };
        let references: Vec<String> = refs
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect();
        let resolved = self
            .manager
            .get_contexts(&references)
            .await
            .map_err(internal)?;
        Ok(json!({
            "ok": true,
            "contexts": resolved,
            "requested": references.len(),
        }))
    }

    async fn query(&self, payload: &Value) -> Result<Value, HandlerError> {
        let since = match opt_timestamp(payload, "since") {
            Ok(v) => v,
            Err(message) => return Ok(refusal("not_found", message)),
        };
        let until = match opt_timestamp(payload, "until") {
            Ok(v) => v,
            Err(message) => return Ok(refusal("not_found", message)),
        };
        let params = ContextQueryParams {
            correlation_id: opt_string(payload, "correlationId"),
            agent_id: opt_string(payload, "agentId"),
            session_id: opt_string(payload, "sessionId"),
            event_id: opt_string(payload, "eventId"),
            since,
            until,
            limit: payload
                .get("limit")
                .and_then(Value::as_u64)
                .map(|l| usize::try_from(l).unwrap_or(usize::MAX)),
        };
        let results = self.manager.query_contexts(&params).await.map_err(internal)?;
        let items: Vec<Value> = results
            .into_iter()
            .map(|r| json!({"ref": r.reference, "context": r.context}))
            .collect();
        Ok(json!({"ok": true, "count": items.len(), "contexts": items}))
    }

    async fn query_history(&self, payload: &Value) -> Result<Value, HandlerError> {
        let query = EventLogQuery {
            agent_id: opt_string(payload, "agentId"),
            name_exact: opt_string(payload, "name"),
            name_prefix: opt_string(payload, "namePrefix"),
            since: opt_string(payload, "since"),
            until: opt_string(payload, "until"),
            limit: payload.get("limit").and_then(Value::as_i64),
        };
        let rows = self.manager.query_events(query).await.map_err(internal)?;
        Ok(json!({"ok": true, "count": rows.len(), "events": rows}))
    }

    async fn stats(&self) -> Result<Value, HandlerError> {
        let stats = self.manager.stats().await.map_err(internal)?;
        let mut value = serde_json::to_value(stats)
            .map_err(|e| HandlerError::new("Internal", e.to_string()))?;
        if let Some(map) = value.as_object_mut() {
            let _ = map.insert("ok".to_string(), Value::Bool(true));
        }
        Ok(value)
    }

    async fn health(&self) -> Result<Value, HandlerError> {
        // A cold-tier round trip is the health probe: if the store is
        // reachable, the manager is serviceable.
        match self.manager.stats().await {
            Ok(stats) => Ok(json!({"status": "ok", "hotCount": stats.hot_count})),
            Err(error) => Ok(json!({"status": "degraded", "error": error.to_string()})),
        }
    }
}

#[async_trait]
impl EventHandler for ContextGateway {
    fn name(&self) -> &str {
        "context-gateway"
    }

    fn pattern(&self) -> EventPattern {
        EventPattern::Namespace("context:".to_string())
    }

    async fn handle(&self, event: &Event, _ctx: &EventContext) -> Result<Value, HandlerError> {
        match event.name.as_str() {
            "context:resolve" => self.resolve(&event.payload).await,
            "context:resolve_batch" => self.resolve_batch(&event.payload).await,
            "context:query" => self.query(&event.payload).await,
            "context:history" => self.query_history(&event.payload).await,
            "context:stats" => self.stats().await,
            "context:health" => self.health().await,
            other => Ok(refusal(
                "not_found",
                format!("unsupported context operation: {other}"),
            )),
        }
    }
}

fn opt_string(payload: &Value, key: &str) -> Option<String> {
    payload.get(key).and_then(Value::as_str).map(String::from)
}

fn opt_timestamp(payload: &Value, key: &str) -> Result<Option<DateTime<Utc>>, String> {
    match payload.get(key).and_then(Value::as_str) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<DateTime<Utc>>()
            .map(Some)
            .map_err(|e| format!("invalid '{key}': {e}")),
    }
}

fn internal(error: crate::errors::ContextError) -> HandlerError {
    HandlerError::new("Internal", error.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
