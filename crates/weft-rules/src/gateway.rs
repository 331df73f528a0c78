//! External gateway for the rule service.
//!
//! Serves the `routing:*` boundary events: `routing:add_rule`,
//! `routing:update_rule`, `routing:delete_rule`, `routing:query_rules`, and
//! `routing:get_audit_log`.
//!
//! The acting identity comes from the payload's `actor` field, falling back
//! to the emitting context's agent. Validation errors come back as
//! `{"ok": false, "error": ...}` payloads — synchronous, never broadcast;
//! only internal faults surface as handler errors.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use weft_core::pattern::EventPattern;
use weft_core::{Event, EventContext};
use weft_router::{EventHandler, HandlerError};
use weft_store::repositories::AuditQuery;

use crate::errors::RuleError;
use crate::service::RuleService;
use crate::types::{RuleFilter, RuleSpec, RuleUpdate};

/// Router handler exposing the rule service at the event boundary.
pub struct RoutingGateway {
    service: Arc<RuleService>,
}

impl RoutingGateway {
    /// Create a gateway over the given service.
    #[must_use]
    pub fn new(service: Arc<RuleService>) -> Self {
        Self { service }
    }

    async fn add_rule(&self, actor: &str, payload: &Value) -> Result<Value, HandlerError> {
        let spec: RuleSpec = match payload.get("rule") {
            Some(rule) => match serde_json::from_value(rule.clone()) {
                Ok(spec) => spec,
                Err(error) => {
                    return Ok(refusal(
                        "invalid_pattern",
                        format!("malformed rule: {error}"),
                    ));
                }
            },
            None => return Ok(refusal("invalid_pattern", "missing 'rule'")),
        };
        match self.service.add_rule(actor, spec).await {
            Ok(rule) => Ok(json!({"ok": true, "rule": rule})),
            Err(error) => refuse_or_fail(error),
        }
    }

    async fn update_rule(&self, actor: &str, payload: &Value) -> Result<Value, HandlerError> {
        let Some(rule_id) = payload.get("ruleId").and_then(Value::as_str) else {
            return Ok(refusal("not_found", "missing 'ruleId'"));
        };
        let update: RuleUpdate = match payload.get("update") {
            Some(update) => match serde_json::from_value(update.clone()) {
                Ok(update) => update,
                Err(error) => {
                    return Ok(refusal(
                        "invalid_pattern",
                        format!("malformed update: {error}"),
                    ));
                }
            },
            None => RuleUpdate::default(),
        };
        match self.service.update_rule(actor, rule_id, update).await {
            Ok(rule) => Ok(json!({"ok": true, "rule": rule})),
            Err(error) => refuse_or_fail(error),
        }
    }

    async fn delete_rule(&self, actor: &str, payload: &Value) -> Result<Value, HandlerError> {
        let Some(rule_id) = payload.get("ruleId").and_then(Value::as_str) else {
            return Ok(refusal("not_found", "missing 'ruleId'"));
        };
        match self.service.delete_rule(actor, rule_id).await {
            Ok(()) => Ok(json!({"ok": true, "ruleId": rule_id, "removed": true})),
            Err(error) => refuse_or_fail(error),
        }
    }

    fn query_rules(&self, payload: &Value) -> Result<Value, HandlerError> {
        let filter: RuleFilter = payload
            .get("filter")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .unwrap_or_default()
            .unwrap_or_default();
        let rules = self.service.query_rules(&filter);
        Ok(json!({"ok": true, "count": rules.len(), "rules": rules}))
    }

    async fn get_audit_log(&self, payload: &Value) -> Result<Value, HandlerError> {
        let query = AuditQuery {
            rule_id: payload
                .get("ruleId")
                .and_then(Value::as_str)
                .map(String::from),
            operation: payload
                .get("operation")
                .and_then(Value::as_str)
                .map(String::from),
            limit: payload.get("limit").and_then(Value::as_i64),
        };
        match self.service.get_audit_log(query).await {
            Ok(entries) => Ok(json!({"ok": true, "count": entries.len(), "entries": entries})),
            Err(error) => refuse_or_fail(error),
        }
    }
}

#[async_trait]
impl EventHandler for RoutingGateway {
    fn name(&self) -> &str {
        "routing-gateway"
    }

    fn pattern(&self) -> EventPattern {
        EventPattern::Namespace("routing:".to_string())
    }

    async fn handle(&self, event: &Event, ctx: &EventContext) -> Result<Value, HandlerError> {
        let actor = resolve_actor(&event.payload, ctx);
        match event.name.as_str() {
            "routing:add_rule" => self.add_rule(&actor, &event.payload).await,
            "routing:update_rule" => self.update_rule(&actor, &event.payload).await,
            "routing:delete_rule" => self.delete_rule(&actor, &event.payload).await,
            "routing:query_rules" => self.query_rules(&event.payload),
            "routing:get_audit_log" => self.get_audit_log(&event.payload).await,
            other => Ok(refusal(
                "not_found",
                format!("unsupported routing operation: {other}"),
            )),
        }
    }
}

/// Payload `actor`, else the emitting context's agent, else anonymous (which
/// holds no capabilities).
fn resolve_actor(payload: &Value, ctx: &EventContext) -> String {
    payload
        .get("actor")
        .and_then(Value::as_str)
        .map(String::from)
        .or_else(|| ctx.agent_id.as_ref().map(|id| id.as_str().to_string()))
        .unwrap_or_else(|| "anonymous".to_string())
}

fn refusal(kind: &str, message: impl Into<String>) -> Value {
    json!({"ok": false, "error": {"type": kind, "message": message.into()}})
}

/// Validation errors become synchronous refusal payloads; internal faults
/// propagate as handler errors (and hence onto the error channel).
fn refuse_or_fail(error: RuleError) -> Result<Value, HandlerError> {
    if error.is_validation() {
        Ok(refusal(error.wire_type(), error.to_string()))
    } else {
        Err(HandlerError::new("Internal", error.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CapabilityChecker, StaticCapabilities};
    use crate::service::RuleServiceConfig;
    use weft_router::{EventRouter, MemoryContextTracker, RouterConfig};
    use weft_store::connection::{self, ConnectionConfig};
    use weft_store::migrations::run_migrations;

    struct Fixture {
        router: Arc<EventRouter>,
        capabilities: Arc<StaticCapabilities>,
    }

    fn setup() -> Fixture {
        let pool = connection::new_in_memory(&ConnectionConfig::default()).unwrap();
        {
            let conn = pool.get().unwrap();
            let _ = run_migrations(&conn).unwrap();
        }
        let router = EventRouter::new(
            RouterConfig::default(),
            Arc::new(MemoryContextTracker::new()),
        );
        let capabilities = Arc::new(StaticCapabilities::new());
        let service = RuleService::new(
            Arc::clone(&router),
            pool,
            Arc::clone(&capabilities) as Arc<dyn CapabilityChecker>,
            RuleServiceConfig::default(),
        );
        router.register_handler(Arc::new(RoutingGateway::new(service)));
        Fixture {
            router,
            capabilities,
        }
    }

    fn rule_payload(rule_id: &str) -> Value {
        json!({
            "actor": "system",
            "rule": {
                "ruleId": rule_id,
                "sourcePattern": "order:*",
                "targetEvent": "audit:log",
                "mapping": {"id": "{{order_id}}", "ts": "{{$now()}}"}
            }
        })
    }

    #[tokio::test]
    async fn add_rule_via_events_then_rule_fires() {
        let fixture = setup();
        let outcome = fixture
            .router
            .emit("routing:add_rule", rule_payload("r1"))
            .await;
        let result = outcome.first_result().unwrap();
        assert_eq!(result["ok"], true);
        assert_eq!(result["rule"]["ruleId"], "r1");

        // The freshly added rule routes order events immediately.
        let emit = fixture
            .router
            .emit("order:created", json!({"order_id": "o1"}))
            .await;
        assert_eq!(emit.transforms_fired, 1);
    }

    #[tokio::test]
    async fn duplicate_rule_refused_synchronously() {
        let fixture = setup();
        let _ = fixture
            .router
            .emit("routing:add_rule", rule_payload("r1"))
            .await;
        let outcome = fixture
            .router
            .emit("routing:add_rule", rule_payload("r1"))
            .await;
        let result = outcome.first_result().unwrap();
        assert_eq!(result["ok"], false);
        assert_eq!(result["error"]["type"], "duplicate_rule");
    }

    #[tokio::test]
    async fn anonymous_caller_denied() {
        let fixture = setup();
        let mut payload = rule_payload("r1");
        let _ = payload.as_object_mut().unwrap().remove("actor");

        let outcome = fixture.router.emit("routing:add_rule", payload).await;
        let result = outcome.first_result().unwrap();
        assert_eq!(result["ok"], false);
        assert_eq!(result["error"]["type"], "permission_denied");
    }

    #[tokio::test]
    async fn actor_from_context_agent() {
        let fixture = setup();
        fixture.capabilities.grant("agent-1", "routing_control");
        let mut payload = rule_payload("r1");
        let _ = payload.as_object_mut().unwrap().remove("actor");

        let ctx = EventContext::root().with_agent("agent-1");
        let outcome = fixture
            .router
            .emit_with_context("routing:add_rule", payload, ctx)
            .await;
        let result = outcome.first_result().unwrap();
        assert_eq!(result["ok"], true);
        assert_eq!(result["rule"]["createdBy"], "agent-1");
    }

    #[tokio::test]
    async fn update_and_delete_via_events() {
        let fixture = setup();
        let _ = fixture
            .router
            .emit("routing:add_rule", rule_payload("r1"))
            .await;

        let outcome = fixture
            .router
            .emit(
                "routing:update_rule",
                json!({"actor": "system", "ruleId": "r1", "update": {"priority": 10}}),
            )
            .await;
        assert_eq!(outcome.first_result().unwrap()["rule"]["priority"], 10);

        let outcome = fixture
            .router
            .emit(
                "routing:delete_rule",
                json!({"actor": "system", "ruleId": "r1"}),
            )
            .await;
        assert_eq!(outcome.first_result().unwrap()["removed"], true);

        let outcome = fixture
            .router
            .emit(
                "routing:delete_rule",
                json!({"actor": "system", "ruleId": "r1"}),
            )
            .await;
        assert_eq!(
            outcome.first_result().unwrap()["error"]["type"],
            "not_found"
        );
    }

    #[tokio::test]
    async fn query_rules_and_audit_via_events() {
        let fixture = setup();
        let _ = fixture
            .router
            .emit("routing:add_rule", rule_payload("r1"))
            .await;

        let outcome = fixture.router.emit("routing:query_rules", json!({})).await;
        let result = outcome.first_result().unwrap();
        assert_eq!(result["count"], 1);

        let outcome = fixture
            .router
            .emit("routing:get_audit_log", json!({"ruleId": "r1"}))
            .await;
        let result = outcome.first_result().unwrap();
        assert_eq!(result["count"], 1);
        assert_eq!(result["entries"][0]["operation"], "add");
    }

    #[tokio::test]
    async fn self_cycle_rule_refused() {
        let fixture = setup();
        let outcome = fixture
            .router
            .emit(
                "routing:add_rule",
                json!({
                    "actor": "system",
                    "rule": {
                        "ruleId": "r1",
                        "sourcePattern": "audit:*",
                        "targetEvent": "audit:log",
                        "mapping": {}
                    }
                }),
            )
            .await;
        let result = outcome.first_result().unwrap();
        assert_eq!(result["ok"], false);
        assert_eq!(result["error"]["type"], "invalid_pattern");
    }
}
