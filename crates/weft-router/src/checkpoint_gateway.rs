//! Checkpoint boundary handler.
//!
//! An external orchestrator drives checkpointing through `checkpoint:collect`
//! and `checkpoint:restore`. This handler composes the registered
//! [`CheckpointHook`]s: collect returns every hook's named sub-blob in one
//! composite object; restore hands each hook its own sub-blob back.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use weft_core::checkpoint::{CheckpointHook, collect_all, restore_all};
use weft_core::pattern::EventPattern;
use weft_core::{Event, EventContext};

use crate::errors::HandlerError;
use crate::handler::EventHandler;

/// Router handler exposing composed checkpoint hooks at the event boundary.
pub struct CheckpointGateway {
    hooks: Vec<Arc<dyn CheckpointHook>>,
}

impl CheckpointGateway {
    /// Create a gateway over the given hooks.
    #[must_use]
    pub fn new(hooks: Vec<Arc<dyn CheckpointHook>>) -> Self {
        Self { hooks }
    }

    fn hook_refs(&self) -> Vec<&dyn CheckpointHook> {
        self.hooks.iter().map(AsRef::as_ref).collect()
    }
}

#[async_trait]
impl EventHandler for CheckpointGateway {
    fn name(&self) -> &str {
        "checkpoint-gateway"
    }

    fn pattern(&self) -> EventPattern {
        EventPattern::Namespace("checkpoint:".to_string())
    }

    async fn handle(
        &self,
        event: &Event,
        _ctx: &EventContext,
    ) -> std::result::Result<Value, HandlerError> {
        match event.name.as_str() {
            "checkpoint:collect" => {
                let blob = collect_all(&self.hook_refs())
                    .await
                    .map_err(|e| HandlerError::new("CheckpointFailed", e.to_string()))?;
                Ok(json!({"ok": true, "checkpoint": blob}))
            }
            "checkpoint:restore" => {
                let Some(blob) = event.payload.get("checkpoint") else {
                    return Ok(json!({
                        "ok": false,
                        "error": {"type": "not_found", "message": "missing 'checkpoint'"},
                    }));
                };
                restore_all(&self.hook_refs(), blob)
                    .await
                    .map_err(|e| HandlerError::new("RestoreFailed", e.to_string()))?;
                Ok(json!({"ok": true, "restored": self.hooks.len()}))
            }
            other => Ok(json!({
                "ok": false,
                "error": {
                    "type": "not_found",
                    "message": format!("unsupported checkpoint operation: {other}"),
                },
            })),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_tracker::MemoryContextTracker;
    use crate::router::{EventRouter, RouterConfig};
    use parking_lot::Mutex;
    use weft_core::checkpoint::CheckpointError;

    struct MemoryHook {
        name: &'static str,
        state: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CheckpointHook for MemoryHook {
        fn blob_name(&self) -> &'static str {
            self.name
        }
        async fn collect(&self) -> std::result::Result<Value, CheckpointError> {
            Ok(serde_json::to_value(self.state.lock().clone())?)
        }
        async fn restore(&self, blob: Value) -> std::result::Result<(), CheckpointError> {
            *self.state.lock() =
                serde_json::from_value(blob).map_err(|e| CheckpointError::Malformed {
                    component: self.name.to_string(),
                    message: e.to_string(),
                })?;
            Ok(())
        }
    }

    fn wired() -> (std::sync::Arc<EventRouter>, Arc<MemoryHook>, Arc<MemoryHook>) {
        let router = EventRouter::new(
            RouterConfig::default(),
            Arc::new(MemoryContextTracker::new()),
        );
        let contexts = Arc::new(MemoryHook {
            name: "contexts",
            state: Mutex::new(vec!["c1".into()]),
        });
        let rules = Arc::new(MemoryHook {
            name: "rules",
            state: Mutex::new(vec!["r1".into(), "r2".into()]),
        });
        router.register_handler(Arc::new(CheckpointGateway::new(vec![
            Arc::clone(&contexts) as Arc<dyn CheckpointHook>,
            Arc::clone(&rules) as Arc<dyn CheckpointHook>,
        ])));
        (router, contexts, rules)
    }

    #[tokio::test]
    async fn collect_composes_named_sub_blobs() {
        let (router, _, _) = wired();
        let outcome = router.emit("checkpoint:collect", json!({})).await;
        let result = outcome.first_result().unwrap();
        assert_eq!(result["ok"], true);
        assert_eq!(result["checkpoint"]["contexts"], json!(["c1"]));
        assert_eq!(result["checkpoint"]["rules"], json!(["r1", "r2"]));
    }

    #[tokio::test]
    async fn restore_hands_blobs_back() {
        let (router, contexts, rules) = wired();
        let outcome = router.emit("checkpoint:collect", json!({})).await;
        let blob = outcome.first_result().unwrap()["checkpoint"].clone();

        *contexts.state.lock() = Vec::new();
        *rules.state.lock() = Vec::new();

        let outcome = router
            .emit("checkpoint:restore", json!({"checkpoint": blob}))
            .await;
        assert_eq!(outcome.first_result().unwrap()["ok"], true);
        assert_eq!(*contexts.state.lock(), vec!["c1".to_string()]);
        assert_eq!(rules.state.lock().len(), 2);
    }

    #[tokio::test]
    async fn restore_without_blob_refused() {
        let (router, _, _) = wired();
        let outcome = router.emit("checkpoint:restore", json!({})).await;
        let result = outcome.first_result().unwrap();
        assert_eq!(result["ok"], false);
    }
}
