//! The observation manager.
//!
//! Installs on the router's dispatch-observer seam. For every emission with
//! a source actor it records the event into the cold log, computes the
//! eligible subscriptions (pattern, content, source namespace, sampling,
//! rate limit), and wraps handler execution with `begin`/`end` notifications
//! delivered per subscription through the sink, gated by each observer's
//! circuit breaker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, info, warn};

use weft_context::ContextManager;
use weft_core::pattern::EventPattern;
use weft_core::{AgentId, Event, EventContext, EventId, SubscriptionId};
use weft_router::{Condition, DispatchObserver, DispatchSummary, EventHandler, HandlerError};
use weft_store::repositories::EventLogQuery;
use weft_store::row_types::EventLogRow;

use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::errors::{ObserveError, Result};
use crate::rate_limit::TokenBucket;
use crate::sink::ObserverSink;
use crate::types::{NoticeKind, ObservationNotice, Subscription, SubscriptionFilter};

/// Observation manager tunables.
#[derive(Clone, Debug)]
pub struct ObserveConfig {
    /// Per-notification delivery timeout.
    pub delivery_timeout: Duration,
    /// Per-observer circuit breaker settings.
    pub breaker: BreakerConfig,
}

impl Default for ObserveConfig {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(5),
            breaker: BreakerConfig::default(),
        }
    }
}

impl From<&weft_settings::ObserveSettings> for ObserveConfig {
    fn from(settings: &weft_settings::ObserveSettings) -> Self {
        Self {
            delivery_timeout: Duration::from_millis(settings.delivery_timeout_ms),
            breaker: BreakerConfig {
                failure_threshold: settings.breaker_failure_threshold,
                window: Duration::from_secs(settings.breaker_window_secs),
                cooldown: Duration::from_secs(settings.breaker_cooldown_secs),
            },
        }
    }
}

/// Filters for history queries and replay.
#[derive(Clone, Debug, Default)]
pub struct HistoryFilter {
    /// Source actor whose traffic to read.
    pub agent_id: Option<String>,
    /// Event pattern (`name`, `namespace:*`, or `*`).
    pub pattern: Option<String>,
    /// Only events at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Only events before this instant.
    pub until: Option<DateTime<Utc>>,
    /// Maximum records.
    pub limit: Option<i64>,
}

/// A subscription with its compiled filters and private limiter.
struct SubscriptionState {
    sub: Subscription,
    content: Option<Condition>,
    limiter: Option<Mutex<TokenBucket>>,
}

/// Subscription bookkeeping plus interception state.
pub struct ObservationManager {
    subs: RwLock<HashMap<SubscriptionId, Arc<SubscriptionState>>>,
    context: Arc<ContextManager>,
    sink: Arc<dyn ObserverSink>,
    breakers: RwLock<HashMap<AgentId, Arc<Mutex<CircuitBreaker>>>>,
    /// Per-dispatch eligible subscriptions, decided at `begin` and consumed
    /// at `end` so both notices cover the same observers.
    eligible: DashMap<EventId, Vec<SubscriptionId>>,
    config: ObserveConfig,
}

impl ObservationManager {
    /// Create a manager delivering through the given sink and serving
    /// history from the given context manager.
    #[must_use]
    pub fn new(
        context: Arc<ContextManager>,
        sink: Arc<dyn ObserverSink>,
        config: ObserveConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            subs: RwLock::new(HashMap::new()),
            context,
            sink,
            breakers: RwLock::new(HashMap::new()),
            eligible: DashMap::new(),
            config,
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Subscription CRUD
    // ─────────────────────────────────────────────────────────────────────

    /// Subscribe `observer` to `target`'s traffic for the given patterns.
    ///
    /// Rejects self-referential observation of `observe:*`/`observation:*`
    /// traffic. Resubscribing resets the observer's limiter and breaker
    /// state.
    pub fn subscribe(
        &self,
        observer: &str,
        target: &str,
        event_patterns: &[String],
        filter: SubscriptionFilter,
    ) -> Result<SubscriptionId> {
        let patterns = if event_patterns.is_empty() {
            vec![EventPattern::Any]
        } else {
            event_patterns
                .iter()
                .map(|p| EventPattern::parse(p))
                .collect::<std::result::Result<Vec<_>, _>>()?
        };

        if observer == target
            && patterns
                .iter()
                .any(|p| p.matches("observe:begin") || p.matches("observation:subscribe"))
        {
            return Err(ObserveError::SelfObservation(observer.to_string()));
        }

        if let Some(rate) = filter.sampling_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ObserveError::SamplingRate(rate));
            }
        }

        let content = filter
            .content_rules
            .as_ref()
            .map(Condition::parse)
            .transpose()?;
        let limiter = filter.rate_limit.map(|spec| {
            Mutex::new(TokenBucket::new(
                spec.max,
                Duration::from_secs(spec.window_secs.max(1)),
            ))
        });

        let sub = Subscription {
            subscription_id: SubscriptionId::new(),
            observer: AgentId::from(observer),
            target: AgentId::from(target),
            event_patterns: patterns,
            filter,
            created_at: Utc::now(),
        };
        let id = sub.subscription_id.clone();

        let state = Arc::new(SubscriptionState {
            sub,
            content,
            limiter,
        });
        let _ = self.subs.write().insert(id.clone(), state);
        // Resubscription gives the observer a clean breaker slate.
        let _ = self.breakers.write().remove(&AgentId::from(observer));

        info!(observer, target, subscription_id = %id, "subscription created");
        Ok(id)
    }

    /// Remove every subscription from `observer` on `target`. Returns the
    /// number removed.
    pub fn unsubscribe(&self, observer: &str, target: &str) -> usize {
        let mut subs = self.subs.write();
        let before = subs.len();
        subs.retain(|_, state| {
            !(state.sub.observer.as_str() == observer && state.sub.target.as_str() == target)
        });
        let removed = before - subs.len();
        if removed > 0 {
            info!(observer, target, removed, "unsubscribed");
        }
        removed
    }

    /// List subscriptions, optionally filtered by observer and/or target.
    #[must_use]
    pub fn list_subscriptions(
        &self,
        observer: Option<&str>,
        target: Option<&str>,
    ) -> Vec<Subscription> {
        let mut subs: Vec<Subscription> = self
            .subs
            .read()
            .values()
            .filter(|state| observer.is_none_or(|o| state.sub.observer.as_str() == o))
            .filter(|state| target.is_none_or(|t| state.sub.target.as_str() == t))
            .map(|state| state.sub.clone())
            .collect();
        subs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        subs
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn count(&self) -> usize {
        self.subs.read().len()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle cleanup
    // ─────────────────────────────────────────────────────────────────────

    /// Handle an actor's termination: remove target-side subscriptions (and
    /// notify their observers) and observer-side subscriptions (silently).
    /// Both removals happen under one write lock, atomic with concurrent
    /// subscribes. Returns `(removed_as_target, removed_as_observer)`.
    pub async fn handle_termination(&self, actor: &str) -> (usize, usize) {
        let (to_notify, silent) = {
            let mut subs = self.subs.write();
            let mut notify: Vec<Subscription> = Vec::new();
            let mut silent = 0usize;
            subs.retain(|_, state| {
                if state.sub.target.as_str() == actor {
                    notify.push(state.sub.clone());
                    false
                } else if state.sub.observer.as_str() == actor {
                    silent += 1;
                    false
                } else {
                    true
                }
            });
            let _ = self.breakers.write().remove(&AgentId::from(actor));
            debug!(actor, notified = notify.len(), silent, "termination cleanup");
            (notify, silent)
        };

        for sub in &to_notify {
            let notice = ObservationNotice {
                kind: NoticeKind::TargetTerminated,
                observer: sub.observer.clone(),
                target: sub.target.clone(),
                event_name: String::new(),
                payload: Value::Null,
                context_ref: None,
                subscription_id: Some(sub.subscription_id.clone()),
                result: None,
                error: None,
                duration_ms: None,
                timestamp: Utc::now(),
            };
            let _ = self.deliver(&sub.observer, notice).await;
        }
        (to_notify.len(), silent)
    }

    // ─────────────────────────────────────────────────────────────────────
    // History and replay
    // ─────────────────────────────────────────────────────────────────────

    /// Query recorded observations from the cold event log.
    pub async fn query_history(&self, filter: &HistoryFilter) -> Result<Vec<EventLogRow>> {
        Ok(self.context.query_events(to_log_query(filter)?).await?)
    }

    /// Re-deliver recorded events to `observer` as `replay` notices.
    ///
    /// `speed` scales recorded inter-event gaps (2.0 = twice as fast);
    /// `None` replays back-to-back. Returns the number of records replayed.
    pub async fn replay(
        &self,
        observer: &str,
        filter: &HistoryFilter,
        speed: Option<f64>,
    ) -> Result<usize> {
        let rows = self.query_history(filter).await?;
        let observer_id = AgentId::from(observer);
        let mut previous: Option<DateTime<Utc>> = None;
        let mut replayed = 0usize;

        for row in rows {
            let timestamp = row.timestamp.parse::<DateTime<Utc>>().ok();
            if let (Some(speed), Some(prev), Some(current)) = (speed, previous, timestamp) {
                if speed > 0.0 {
                    let gap = (current - prev).to_std().unwrap_or_default();
                    let scaled = gap.div_f64(speed.max(f64::EPSILON));
                    if !scaled.is_zero() {
                        tokio::time::sleep(scaled).await;
                    }
                }
            }
            previous = timestamp;

            let payload: Value = serde_json::from_str(&row.payload).unwrap_or(Value::Null);
            let notice = ObservationNotice {
                kind: NoticeKind::Replay,
                observer: observer_id.clone(),
                target: AgentId::from(row.agent_id.clone().unwrap_or_default()),
                event_name: row.name.clone(),
                payload,
                context_ref: row.context_ref.clone(),
                subscription_id: None,
                result: None,
                error: None,
                duration_ms: None,
                timestamp: Utc::now(),
            };
            let _ = self.deliver(&observer_id, notice).await;
            replayed += 1;
        }
        Ok(replayed)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Delivery
    // ─────────────────────────────────────────────────────────────────────

    fn breaker_for(&self, observer: &AgentId) -> Arc<Mutex<CircuitBreaker>> {
        if let Some(existing) = self.breakers.read().get(observer) {
            return Arc::clone(existing);
        }
        let mut breakers = self.breakers.write();
        Arc::clone(
            breakers
                .entry(observer.clone())
                .or_insert_with(|| Arc::new(Mutex::new(CircuitBreaker::new(self.config.breaker.clone())))),
        )
    }

    /// Attempt one delivery through the breaker. Returns whether it was
    /// actually delivered. `circuit_open` skips are logged, never escalated.
    async fn deliver(&self, observer: &AgentId, notice: ObservationNotice) -> bool {
        let breaker = self.breaker_for(observer);
        if !breaker.lock().allows_delivery() {
            debug!(observer = %observer, "circuit open; skipping delivery");
            return false;
        }

        let attempt = tokio::time::timeout(self.config.delivery_timeout, self.sink.deliver(notice))
            .await;
        match attempt {
            Ok(Ok(())) => {
                breaker.lock().record_success();
                true
            }
            Ok(Err(error)) => {
                warn!(observer = %observer, error = %error, "observer delivery failed");
                breaker.lock().record_failure();
                false
            }
            Err(_) => {
                warn!(observer = %observer, "observer delivery timed out");
                breaker.lock().record_failure();
                false
            }
        }
    }

    /// Decide the eligible subscription set for one dispatch: pattern,
    /// namespace allow/block, content rules, then sampling, then the rate
    /// limiter (sampling drops before tokens are spent).
    fn eligible_for(
        &self,
        event: &Event,
        source: &AgentId,
        ctx: &EventContext,
    ) -> Vec<Arc<SubscriptionState>> {
        let candidates: Vec<Arc<SubscriptionState>> = {
            self.subs
                .read()
                .values()
                .filter(|state| &state.sub.target == source)
                .cloned()
                .collect()
        };

        let mut eligible = Vec::new();
        for state in candidates {
            if !state.sub.event_patterns.iter().any(|p| p.matches(&event.name)) {
                continue;
            }
            let namespace = event.namespace();
            if let Some(allow) = &state.sub.filter.source_allow {
                if !allow.iter().any(|ns| ns == namespace) {
                    continue;
                }
            }
            if let Some(block) = &state.sub.filter.source_block {
                if block.iter().any(|ns| ns == namespace) {
                    continue;
                }
            }
            if let Some(content) = &state.content {
                if !content.evaluate(&event.payload, ctx) {
                    continue;
                }
            }
            if let Some(rate) = state.sub.filter.sampling_rate {
                if rand::random::<f64>() >= rate {
                    continue;
                }
            }
            if let Some(limiter) = &state.limiter {
                if !limiter.lock().try_acquire() {
                    continue;
                }
            }
            eligible.push(state);
        }
        eligible
    }

}

fn notice_for(kind: NoticeKind, state: &SubscriptionState, event: &Event) -> ObservationNotice {
    ObservationNotice {
        kind,
        observer: state.sub.observer.clone(),
        target: state.sub.target.clone(),
        event_name: event.name.clone(),
        payload: event.payload.clone(),
        context_ref: event.context_ref.clone(),
        subscription_id: Some(state.sub.subscription_id.clone()),
        result: None,
        error: None,
        duration_ms: None,
        timestamp: Utc::now(),
    }
}

/// Observation notifications never observe themselves.
fn is_observation_event(name: &str) -> bool {
    name.starts_with("observe:") || name.starts_with("observation:")
}

#[async_trait]
impl DispatchObserver for ObservationManager {
    async fn before_dispatch(&self, event: &Event, ctx: &EventContext) {
        if is_observation_event(&event.name) {
            return;
        }
        let Some(source) = &ctx.agent_id else {
            return;
        };

        // The recorder half: observation is the consumer that logs events.
        self.context.record_event(event, Some(source.as_str()));

        let eligible = self.eligible_for(event, source, ctx);
        if eligible.is_empty() {
            return;
        }

        let _ = self.eligible.insert(
            ctx.event_id.clone(),
            eligible.iter().map(|s| s.sub.subscription_id.clone()).collect(),
        );

        let deliveries = eligible.iter().map(|state| {
            let notice = notice_for(NoticeKind::Begin, state, event);
            self.deliver(&state.sub.observer, notice)
        });
        let _ = join_all(deliveries).await;
    }

    async fn after_dispatch(&self, event: &Event, ctx: &EventContext, summary: &DispatchSummary) {
        if is_observation_event(&event.name) {
            return;
        }
        let Some((_, subscription_ids)) = self.eligible.remove(&ctx.event_id) else {
            return;
        };

        let states: Vec<Arc<SubscriptionState>> = {
            let subs = self.subs.read();
            subscription_ids
                .iter()
                .filter_map(|id| subs.get(id).cloned())
                .collect()
        };

        let deliveries = states.iter().map(|state| {
            let mut notice = notice_for(NoticeKind::End, state, event);
            notice.result = summary.first_result().cloned();
            notice.error = summary.first_error().map(ToString::to_string);
            notice.duration_ms = Some(summary.duration_ms);
            self.deliver(&state.sub.observer, notice)
        });
        let _ = join_all(deliveries).await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle handler
// ─────────────────────────────────────────────────────────────────────────────

/// Router handler consuming agent-lifecycle termination events and driving
/// subscription cleanup.
pub struct LifecycleHandler {
    manager: Arc<ObservationManager>,
}

impl LifecycleHandler {
    /// Create a handler driving the given manager.
    #[must_use]
    pub fn new(manager: Arc<ObservationManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl EventHandler for LifecycleHandler {
    fn name(&self) -> &str {
        "observation-lifecycle"
    }

    fn pattern(&self) -> EventPattern {
        EventPattern::Exact(weft_core::constants::names::AGENT_TERMINATED.to_string())
    }

    async fn handle(
        &self,
        event: &Event,
        _ctx: &EventContext,
    ) -> std::result::Result<Value, HandlerError> {
        let Some(agent_id) = event.payload.get("agentId").and_then(Value::as_str) else {
            return Err(HandlerError::new("BadRequest", "missing 'agentId'"));
        };
        let (removed_as_target, removed_as_observer) =
            self.manager.handle_termination(agent_id).await;
        Ok(serde_json::json!({
            "agentId": agent_id,
            "removedAsTarget": removed_as_target,
            "removedAsObserver": removed_as_observer,
        }))
    }
}

fn to_log_query(filter: &HistoryFilter) -> Result<EventLogQuery> {
    let (name_exact, name_prefix) = match &filter.pattern {
        None => (None, None),
        Some(raw) => match EventPattern::parse(raw)? {
            EventPattern::Exact(name) => (Some(name), None),
            EventPattern::Namespace(prefix) => (None, Some(prefix)),
            EventPattern::Any => (None, None),
        },
    };
    Ok(EventLogQuery {
        agent_id: filter.agent_id.clone(),
        name_exact,
        name_prefix,
        since: filter.since.map(|t| t.to_rfc3339()),
        until: filter.until.map(|t| t.to_rfc3339()),
        limit: filter.limit,
    })
}

impl std::fmt::Debug for ObservationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservationManager")
            .field("subscriptions", &self.count())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ChannelSink;
    use crate::types::RateLimitSpec;
    use tokio::sync::mpsc;
    use weft_context::{ContextConfig, ContextManager};
    use weft_router::{ContextTracker, EventRouter, RouterConfig};
    use weft_store::connection::{self, ConnectionConfig};
    use weft_store::migrations::run_migrations;

    struct Fixture {
        router: Arc<EventRouter>,
        manager: Arc<ObservationManager>,
        sink: Arc<ChannelSink>,
        context: Arc<ContextManager>,
    }

    fn setup() -> Fixture {
        let pool = connection::new_in_memory(&ConnectionConfig::default()).unwrap();
        {
            let conn = pool.get().unwrap();
            let _ = run_migrations(&conn).unwrap();
        }
        let context = ContextManager::new(pool, ContextConfig::default());
        let router = EventRouter::new(
            RouterConfig::default(),
            Arc::clone(&context) as Arc<dyn ContextTracker>,
        );
        let sink = Arc::new(ChannelSink::new());
        let manager = ObservationManager::new(
            Arc::clone(&context),
            Arc::clone(&sink) as Arc<dyn ObserverSink>,
            ObserveConfig::default(),
        );
        router.set_observer(Arc::clone(&manager) as Arc<dyn DispatchObserver>);
        router.register_handler(Arc::new(LifecycleHandler::new(Arc::clone(&manager))));
        Fixture {
            router,
            manager,
            sink,
            context,
        }
    }

    fn inbox(fixture: &Fixture, observer: &str) -> mpsc::Receiver<ObservationNotice> {
        fixture.sink.register(&AgentId::from(observer), 64)
    }

    fn from_agent(agent: &str) -> EventContext {
        EventContext::root().with_agent(agent)
    }

    fn drain(rx: &mut mpsc::Receiver<ObservationNotice>) -> Vec<ObservationNotice> {
        let mut notices = Vec::new();
        while let Ok(notice) = rx.try_recv() {
            notices.push(notice);
        }
        notices
    }

    // ── Subscribe / list / unsubscribe ────────────────────────────────

    #[tokio::test]
    async fn subscribe_and_list() {
        let fixture = setup();
        let id = fixture
            .manager
            .subscribe("a", "b", &["task:*".to_string()], SubscriptionFilter::default())
            .unwrap();

        let all = fixture.manager.list_subscriptions(None, None);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].subscription_id, id);

        assert_eq!(fixture.manager.list_subscriptions(Some("a"), None).len(), 1);
        assert_eq!(fixture.manager.list_subscriptions(None, Some("b")).len(), 1);
        assert!(fixture.manager.list_subscriptions(Some("b"), None).is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_removes_all_matching() {
        let fixture = setup();
        let _ = fixture
            .manager
            .subscribe("a", "b", &["task:*".to_string()], SubscriptionFilter::default())
            .unwrap();
        let _ = fixture
            .manager
            .subscribe("a", "b", &["order:*".to_string()], SubscriptionFilter::default())
            .unwrap();

        assert_eq!(fixture.manager.unsubscribe("a", "b"), 2);
        assert_eq!(fixture.manager.unsubscribe("a", "b"), 0);
        assert_eq!(fixture.manager.count(), 0);
    }

    #[tokio::test]
    async fn self_observation_rejected() {
        let fixture = setup();
        let err = fixture
            .manager
            .subscribe("a", "a", &["observe:*".to_string()], SubscriptionFilter::default())
            .unwrap_err();
        assert!(matches!(err, ObserveError::SelfObservation(_)));

        // Observing someone else's non-observation traffic is fine.
        assert!(
            fixture
                .manager
                .subscribe("a", "b", &["task:*".to_string()], SubscriptionFilter::default())
                .is_ok()
        );
    }

    #[tokio::test]
    async fn invalid_sampling_rate_rejected() {
        let fixture = setup();
        let err = fixture
            .manager
            .subscribe(
                "a",
                "b",
                &["task:*".to_string()],
                SubscriptionFilter {
                    sampling_rate: Some(1.5),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, ObserveError::SamplingRate(_)));
    }

    // ── Interception ──────────────────────────────────────────────────

    #[tokio::test]
    async fn begin_then_end_for_matched_event() {
        let fixture = setup();
        let _ = fixture
            .manager
            .subscribe("a", "b", &["task:*".to_string()], SubscriptionFilter::default())
            .unwrap();
        let mut rx = inbox(&fixture, "a");

        let _ = fixture
            .router
            .emit_with_context(
                "task:done",
                serde_json::json!({"ok": true}),
                from_agent("b"),
            )
            .await;

        let notices = drain(&mut rx);
        assert_eq!(notices.len(), 2);
        assert_eq!(notices[0].kind, NoticeKind::Begin);
        assert_eq!(notices[0].event_name, "task:done");
        assert_eq!(notices[1].kind, NoticeKind::End);
        assert_eq!(notices[1].event_name, "task:done");
        assert!(notices[1].duration_ms.is_some());
    }

    #[tokio::test]
    async fn unmatched_pattern_not_observed() {
        let fixture = setup();
        let _ = fixture
            .manager
            .subscribe("a", "b", &["order:*".to_string()], SubscriptionFilter::default())
            .unwrap();
        let mut rx = inbox(&fixture, "a");

        let _ = fixture
            .router
            .emit_with_context("task:done", serde_json::json!({}), from_agent("b"))
            .await;

        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn other_actors_traffic_not_observed() {
        let fixture = setup();
        let _ = fixture
            .manager
            .subscribe("a", "b", &["task:*".to_string()], SubscriptionFilter::default())
            .unwrap();
        let mut rx = inbox(&fixture, "a");

        let _ = fixture
            .router
            .emit_with_context("task:done", serde_json::json!({}), from_agent("c"))
            .await;

        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn content_rules_filter_observation() {
        let fixture = setup();
        let _ = fixture
            .manager
            .subscribe(
                "a",
                "b",
                &["task:*".to_string()],
                SubscriptionFilter {
                    content_rules: Some(serde_json::json!({
                        "field": "severity", "op": "eq", "value": "high"
                    })),
                    ..Default::default()
                },
            )
            .unwrap();
        let mut rx = inbox(&fixture, "a");

        let _ = fixture
            .router
            .emit_with_context(
                "task:done",
                serde_json::json!({"severity": "low"}),
                from_agent("b"),
            )
            .await;
        assert!(drain(&mut rx).is_empty());

        let _ = fixture
            .router
            .emit_with_context(
                "task:done",
                serde_json::json!({"severity": "high"}),
                from_agent("b"),
            )
            .await;
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[tokio::test]
    async fn source_block_filters_namespace() {
        let fixture = setup();
        let _ = fixture
            .manager
            .subscribe(
                "a",
                "b",
                &["*".to_string()],
                SubscriptionFilter {
                    source_block: Some(vec!["debug".to_string()]),
                    ..Default::default()
                },
            )
            .unwrap();
        let mut rx = inbox(&fixture, "a");

        let _ = fixture
            .router
            .emit_with_context("debug:trace", serde_json::json!({}), from_agent("b"))
            .await;
        assert!(drain(&mut rx).is_empty());

        let _ = fixture
            .router
            .emit_with_context("task:done", serde_json::json!({}), from_agent("b"))
            .await;
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[tokio::test]
    async fn zero_sampling_drops_everything() {
        let fixture = setup();
        let _ = fixture
            .manager
            .subscribe(
                "a",
                "b",
                &["task:*".to_string()],
                SubscriptionFilter {
                    sampling_rate: Some(0.0),
                    ..Default::default()
                },
            )
            .unwrap();
        let mut rx = inbox(&fixture, "a");

        for _ in 0..20 {
            let _ = fixture
                .router
                .emit_with_context("task:done", serde_json::json!({}), from_agent("b"))
                .await;
        }
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn rate_limit_caps_begin_notifications() {
        let fixture = setup();
        let _ = fixture
            .manager
            .subscribe(
                "a",
                "b",
                &["task:*".to_string()],
                SubscriptionFilter {
                    rate_limit: Some(RateLimitSpec {
                        max: 5,
                        window_secs: 3600,
                    }),
                    ..Default::default()
                },
            )
            .unwrap();
        let mut rx = inbox(&fixture, "a");

        for _ in 0..100 {
            let _ = fixture
                .router
                .emit_with_context("task:done", serde_json::json!({}), from_agent("b"))
                .await;
        }

        let notices = drain(&mut rx);
        let begins = notices
            .iter()
            .filter(|n| n.kind == NoticeKind::Begin)
            .count();
        assert_eq!(begins, 5, "at most max begin notifications per window");
        // Underlying events all processed; only observation was throttled.
    }

    #[tokio::test]
    async fn observation_events_are_never_observed() {
        let fixture = setup();
        let _ = fixture
            .manager
            .subscribe("a", "b", &["*".to_string()], SubscriptionFilter::default())
            .unwrap();
        let mut rx = inbox(&fixture, "a");

        let _ = fixture
            .router
            .emit_with_context(
                "observe:begin",
                serde_json::json!({}),
                from_agent("b"),
            )
            .await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn end_carries_result_and_error() {
        use weft_core::pattern::EventPattern as EP;
        use weft_core::Event;

        struct OkHandler;
        #[async_trait]
        impl EventHandler for OkHandler {
            fn name(&self) -> &str {
                "ok"
            }
            fn pattern(&self) -> EP {
                EP::parse("task:good").unwrap()
            }
            async fn handle(
                &self,
                _e: &Event,
                _c: &EventContext,
            ) -> std::result::Result<Value, HandlerError> {
                Ok(serde_json::json!({"done": true}))
            }
        }

        struct FailHandler;
        #[async_trait]
        impl EventHandler for FailHandler {
            fn name(&self) -> &str {
                "bad"
            }
            fn pattern(&self) -> EP {
                EP::parse("task:bad").unwrap()
            }
            async fn handle(
                &self,
                _e: &Event,
                _c: &EventContext,
            ) -> std::result::Result<Value, HandlerError> {
                Err(HandlerError::new("Boom", "task failed"))
            }
        }

        let fixture = setup();
        fixture.router.register_handler(Arc::new(OkHandler));
        fixture.router.register_handler(Arc::new(FailHandler));
        let _ = fixture
            .manager
            .subscribe("a", "b", &["task:*".to_string()], SubscriptionFilter::default())
            .unwrap();
        let mut rx = inbox(&fixture, "a");

        let _ = fixture
            .router
            .emit_with_context("task:good", serde_json::json!({}), from_agent("b"))
            .await;
        let notices = drain(&mut rx);
        assert_eq!(notices[1].result.as_ref().unwrap()["done"], true);
        assert!(notices[1].error.is_none());

        let _ = fixture
            .router
            .emit_with_context("task:bad", serde_json::json!({}), from_agent("b"))
            .await;
        let notices = drain(&mut rx);
        assert!(notices[1].error.as_ref().unwrap().contains("task failed"));
    }

    // ── Circuit breaker ───────────────────────────────────────────────

    #[tokio::test]
    async fn breaker_opens_for_failing_observer() {
        let pool = connection::new_in_memory(&ConnectionConfig::default()).unwrap();
        {
            let conn = pool.get().unwrap();
            let _ = run_migrations(&conn).unwrap();
        }
        let context = ContextManager::new(pool, ContextConfig::default());
        let router = EventRouter::new(
            RouterConfig::default(),
            Arc::clone(&context) as Arc<dyn ContextTracker>,
        );
        let sink = Arc::new(ChannelSink::new());
        let manager = ObservationManager::new(
            Arc::clone(&context),
            Arc::clone(&sink) as Arc<dyn ObserverSink>,
            ObserveConfig {
                breaker: BreakerConfig {
                    failure_threshold: 3,
                    window: Duration::from_secs(60),
                    cooldown: Duration::from_secs(3600),
                },
                ..Default::default()
            },
        );
        router.set_observer(Arc::clone(&manager) as Arc<dyn DispatchObserver>);

        // Observer "a" never registers an inbox: every delivery fails.
        let _ = manager
            .subscribe("a", "b", &["task:*".to_string()], SubscriptionFilter::default())
            .unwrap();

        for _ in 0..10 {
            let _ = router
                .emit_with_context("task:done", serde_json::json!({}), from_agent("b"))
                .await;
        }

        // After threshold failures the breaker is open and deliveries are
        // skipped without retry.
        let breaker = manager.breaker_for(&AgentId::from("a"));
        assert_eq!(breaker.lock().state(), crate::breaker::BreakerState::Open);
    }

    #[tokio::test]
    async fn resubscription_resets_breaker() {
        let fixture = setup();
        let _ = fixture
            .manager
            .subscribe("a", "b", &["task:*".to_string()], SubscriptionFilter::default())
            .unwrap();

        // Force the breaker open.
        {
            let breaker = fixture.manager.breaker_for(&AgentId::from("a"));
            let mut guard = breaker.lock();
            for _ in 0..10 {
                guard.record_failure();
            }
            assert!(!guard.allows_delivery());
        }

        let _ = fixture
            .manager
            .subscribe("a", "b", &["order:*".to_string()], SubscriptionFilter::default())
            .unwrap();
        let breaker = fixture.manager.breaker_for(&AgentId::from("a"));
        assert!(breaker.lock().allows_delivery(), "fresh breaker after resubscribe");
    }

    // ── Termination cleanup ───────────────────────────────────────────

    #[tokio::test]
    async fn termination_cleans_both_directions() {
        let fixture = setup();
        // m is observer of x, and target observed by y.
        let _ = fixture
            .manager
            .subscribe("m", "x", &["task:*".to_string()], SubscriptionFilter::default())
            .unwrap();
        let _ = fixture
            .manager
            .subscribe("y", "m", &["task:*".to_string()], SubscriptionFilter::default())
            .unwrap();
        let mut y_inbox = inbox(&fixture, "y");
        let mut m_inbox = inbox(&fixture, "m");

        let (as_target, as_observer) = fixture.manager.handle_termination("m").await;
        assert_eq!(as_target, 1);
        assert_eq!(as_observer, 1);

        // y is told its target went away; m (the terminated actor) hears
        // nothing.
        let y_notices = drain(&mut y_inbox);
        assert_eq!(y_notices.len(), 1);
        assert_eq!(y_notices[0].kind, NoticeKind::TargetTerminated);
        assert!(drain(&mut m_inbox).is_empty());

        // No dangling subscriptions in either direction.
        assert!(fixture.manager.list_subscriptions(None, None).is_empty());
    }

    #[tokio::test]
    async fn termination_via_lifecycle_event() {
        let fixture = setup();
        let _ = fixture
            .manager
            .subscribe("y", "m", &["task:*".to_string()], SubscriptionFilter::default())
            .unwrap();
        let mut y_inbox = inbox(&fixture, "y");

        let outcome = fixture
            .router
            .emit("agent:terminated", serde_json::json!({"agentId": "m"}))
            .await;
        let result = outcome.first_result().unwrap();
        assert_eq!(result["removedAsTarget"], 1);

        assert_eq!(drain(&mut y_inbox).len(), 1);
        assert!(fixture.manager.list_subscriptions(None, Some("m")).is_empty());
    }

    // ── History and replay ────────────────────────────────────────────

    #[tokio::test]
    async fn history_is_recorded_and_queryable() {
        let fixture = setup();
        let _ = fixture
            .router
            .emit_with_context("task:done", serde_json::json!({"n": 1}), from_agent("b"))
            .await;
        let _ = fixture
            .router
            .emit_with_context("order:created", serde_json::json!({}), from_agent("b"))
            .await;
        fixture.context.flush().await.unwrap();

        let rows = fixture
            .manager
            .query_history(&HistoryFilter {
                agent_id: Some("b".to_string()),
                pattern: Some("task:*".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "task:done");
    }

    #[tokio::test]
    async fn replay_redelivers_recorded_events() {
        let fixture = setup();
        let _ = fixture
            .router
            .emit_with_context("task:one", serde_json::json!({"n": 1}), from_agent("b"))
            .await;
        let _ = fixture
            .router
            .emit_with_context("task:two", serde_json::json!({"n": 2}), from_agent("b"))
            .await;
        fixture.context.flush().await.unwrap();

        let mut rx = inbox(&fixture, "replayer");
        let replayed = fixture
            .manager
            .replay(
                "replayer",
                &HistoryFilter {
                    agent_id: Some("b".to_string()),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(replayed, 2);

        let notices = drain(&mut rx);
        assert_eq!(notices.len(), 2);
        assert!(notices.iter().all(|n| n.kind == NoticeKind::Replay));
        assert_eq!(notices[0].event_name, "task:one");
        assert_eq!(notices[1].event_name, "task:two");
    }
}
