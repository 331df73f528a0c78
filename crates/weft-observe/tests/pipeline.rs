//! End-to-end pipeline tests: store → context manager → router → rule
//! service → observation manager, wired the way a deployment composes them.

use std::sync::Arc;

use serde_json::json;

use weft_context::{ContextConfig, ContextManager, ContextQueryParams};
use weft_core::checkpoint::{CheckpointHook, collect_all, restore_all};
use weft_core::{AgentId, EventContext};
use weft_observe::{
    ChannelSink, LifecycleHandler, ObservationGateway, ObservationManager, ObserveConfig,
    ObserverSink,
};
use weft_router::{ContextTracker, DispatchObserver, EventRouter, RouterConfig};
use weft_rules::{CapabilityChecker, RoutingGateway, RuleService, RuleServiceConfig, StaticCapabilities};
use weft_store::ConnectionPool;
use weft_store::connection::{self, ConnectionConfig};
use weft_store::migrations::run_migrations;

struct Deployment {
    router: Arc<EventRouter>,
    context: Arc<ContextManager>,
    rules: Arc<RuleService>,
    observation: Arc<ObservationManager>,
    sink: Arc<ChannelSink>,
    capabilities: Arc<StaticCapabilities>,
}

fn migrated_pool() -> ConnectionPool {
    let pool = connection::new_in_memory(&ConnectionConfig::default()).unwrap();
    {
        let conn = pool.get().unwrap();
        let _ = run_migrations(&conn).unwrap();
    }
    pool
}

/// Wire every component the way the daemon does at startup (clean slate:
/// no restore blob).
fn deploy() -> Deployment {
    let pool = migrated_pool();
    let context = ContextManager::new(pool.clone(), ContextConfig::default());
    let router = EventRouter::new(
        RouterConfig::default(),
        Arc::clone(&context) as Arc<dyn ContextTracker>,
    );
    let capabilities = Arc::new(StaticCapabilities::new());
    let rules = RuleService::new(
        Arc::clone(&router),
        pool,
        Arc::clone(&capabilities) as Arc<dyn CapabilityChecker>,
        RuleServiceConfig::default(),
    );
    let sink = Arc::new(ChannelSink::new());
    let observation = ObservationManager::new(
        Arc::clone(&context),
        Arc::clone(&sink) as Arc<dyn ObserverSink>,
        ObserveConfig::default(),
    );

    router.set_observer(Arc::clone(&observation) as Arc<dyn DispatchObserver>);
    router.register_handler(Arc::new(weft_context::ContextGateway::new(Arc::clone(
        &context,
    ))));
    router.register_handler(Arc::new(RoutingGateway::new(Arc::clone(&rules))));
    router.register_handler(Arc::new(ObservationGateway::new(Arc::clone(&observation))));
    router.register_handler(Arc::new(LifecycleHandler::new(Arc::clone(&observation))));

    Deployment {
        router,
        context,
        rules,
        observation,
        sink,
        capabilities,
    }
}

#[tokio::test]
async fn rule_transforms_and_observer_sees_traffic() {
    let deployment = deploy();
    let mut inbox = deployment.sink.register(&AgentId::from("watcher"), 64);

    // Dynamic rule added at runtime through the event boundary.
    let outcome = deployment
        .router
        .emit(
            "routing:add_rule",
            json!({
                "actor": "system",
                "rule": {
                    "ruleId": "order-audit",
                    "sourcePattern": "order:*",
                    "targetEvent": "audit:log",
                    "mapping": {"id": "{{order_id}}", "ts": "{{$now()}}"}
                }
            }),
        )
        .await;
    assert_eq!(outcome.first_result().unwrap()["ok"], true);

    // Observer subscribes to the emitting agent's order traffic.
    let _ = deployment
        .observation
        .subscribe("watcher", "agent-1", &["order:*".to_string()], Default::default())
        .unwrap();

    // Emit from inside agent-1's scope.
    let outcome = deployment
        .router
        .emit_with_context(
            "order:created",
            json!({"order_id": "o1"}),
            EventContext::root().with_agent("agent-1"),
        )
        .await;

    // The transformer fired exactly once with the mapped payload.
    assert_eq!(outcome.transforms_fired, 1);

    // The observer got begin then end for the order event.
    let first = inbox.try_recv().unwrap();
    let second = inbox.try_recv().unwrap();
    assert_eq!(first.event_name, "order:created");
    assert_eq!(second.event_name, "order:created");
    assert_eq!(serde_json::to_value(first.kind).unwrap(), "begin");
    assert_eq!(serde_json::to_value(second.kind).unwrap(), "end");
}

#[tokio::test]
async fn same_pattern_rules_fire_independently() {
    let deployment = deploy();
    deployment.capabilities.grant("ops", "routing_control");

    for (id, target) in [("r-audit", "audit:log"), ("r-metrics", "metrics:order")] {
        let outcome = deployment
            .router
            .emit(
                "routing:add_rule",
                json!({
                    "actor": "ops",
                    "rule": {
                        "ruleId": id,
                        "sourcePattern": "order:*",
                        "targetEvent": target,
                        "mapping": {"id": "{{order_id}}"}
                    }
                }),
            )
            .await;
        assert_eq!(outcome.first_result().unwrap()["ok"], true);
    }

    let outcome = deployment
        .router
        .emit("order:created", json!({"order_id": "o1"}))
        .await;
    assert_eq!(outcome.transforms_fired, 2, "not first-match-wins");
}

#[tokio::test]
async fn lineage_spans_transformer_hops() {
    let deployment = deploy();
    let _ = deployment
        .rules
        .add_rule(
            "system",
            serde_json::from_value(json!({
                "ruleId": "hop",
                "sourcePattern": "order:*",
                "targetEvent": "audit:log",
                "mapping": {"id": "{{order_id}}"}
            }))
            .unwrap(),
        )
        .await
        .unwrap();

    let root = EventContext::root().with_agent("agent-1");
    let correlation = root.correlation_id.clone();
    let _ = deployment
        .router
        .emit_with_context("order:created", json!({"order_id": "o1"}), root)
        .await;

    // Both the source and the derived emission share the correlation; depth
    // increases by exactly one across the hop.
    let chain = deployment
        .context
        .query_contexts(&ContextQueryParams {
            correlation_id: Some(correlation.as_str().to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(chain.len(), 2);
    let mut depths: Vec<u32> = chain.iter().map(|c| c.context.depth).collect();
    depths.sort_unstable();
    assert_eq!(depths, vec![0, 1]);

    let roots: Vec<_> = chain
        .iter()
        .map(|c| c.context.root_event_id.clone())
        .collect();
    assert_eq!(roots[0], roots[1], "root event id is invariant");
}

#[tokio::test]
async fn termination_event_cleans_subscriptions_end_to_end() {
    let deployment = deploy();
    // m observes x; y observes m.
    let _ = deployment
        .observation
        .subscribe("m", "x", &["task:*".to_string()], Default::default())
        .unwrap();
    let _ = deployment
        .observation
        .subscribe("y", "m", &["task:*".to_string()], Default::default())
        .unwrap();
    let mut y_inbox = deployment.sink.register(&AgentId::from("y"), 16);

    let outcome = deployment
        .router
        .emit("agent:terminated", json!({"agentId": "m"}))
        .await;
    let result = outcome.first_result().unwrap();
    assert_eq!(result["removedAsTarget"], 1);
    assert_eq!(result["removedAsObserver"], 1);

    let notice = y_inbox.try_recv().unwrap();
    assert_eq!(serde_json::to_value(notice.kind).unwrap(), "target_terminated");
    assert!(deployment.observation.list_subscriptions(None, None).is_empty());
}

#[tokio::test]
async fn checkpoint_hooks_compose_and_restore() {
    let deployment = deploy();
    let _ = deployment
        .rules
        .add_rule(
            "system",
            serde_json::from_value(json!({
                "ruleId": "persisted",
                "sourcePattern": "order:*",
                "targetEvent": "audit:log",
                "mapping": {"id": "{{order_id}}"}
            }))
            .unwrap(),
        )
        .await
        .unwrap();
    let reference = deployment
        .context
        .create(&EventContext::root().with_agent("agent-1"));

    // Each component contributes an independent named sub-blob.
    let hooks: Vec<&dyn CheckpointHook> =
        vec![deployment.context.as_ref(), deployment.rules.as_ref()];
    let blob = collect_all(&hooks).await.unwrap();
    assert!(blob.get("contexts").is_some());
    assert!(blob.get("rules").is_some());

    // Ordinary restart: nothing comes back on its own.
    let fresh = deploy();
    assert!(fresh.context.get_context(&reference).await.unwrap().is_none());
    assert_eq!(fresh.router.transformer_count(), 0);

    // Explicit restore reconstructs the hot tier and the live rule
    // registrations.
    let fresh_hooks: Vec<&dyn CheckpointHook> =
        vec![fresh.context.as_ref(), fresh.rules.as_ref()];
    restore_all(&fresh_hooks, &blob).await.unwrap();

    assert!(fresh.context.get_context(&reference).await.unwrap().is_some());
    assert_eq!(fresh.rules.count(), 1);
    assert_eq!(fresh.router.transformer_count(), 1);

    let outcome = fresh
        .router
        .emit("order:created", json!({"order_id": "o2"}))
        .await;
    assert_eq!(outcome.transforms_fired, 1, "restored rule routes again");
}

#[tokio::test]
async fn context_gateway_serves_resolution_in_pipeline() {
    let deployment = deploy();
    let outcome = deployment
        .router
        .emit_with_context(
            "task:done",
            json!({}),
            EventContext::root().with_agent("agent-1"),
        )
        .await;
    let reference = outcome.event.context_ref.clone().unwrap();

    let resolved = deployment
        .router
        .emit("context:resolve", json!({"ref": reference}))
        .await;
    let result = resolved.first_result().unwrap();
    assert_eq!(result["ok"], true);
    assert_eq!(result["context"]["agentId"], "agent-1");
}
