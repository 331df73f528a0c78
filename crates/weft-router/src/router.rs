//! The event router.
//!
//! `emit` is a fan-out: every matching handler runs concurrently, every
//! matching non-expired transformer whose condition holds fires
//! independently, and derived emissions carry child contexts (depth + 1)
//! bounded by `max_depth`. Failures are normalized onto `system:error` while
//! the caller's [`EmitOutcome`] still reports every handler result.
//!
//! # Recursion guards
//!
//! - Transformer chains stop at `max_depth`; the refusal emits one
//!   diagnostic (`max_depth_exceeded`) which itself never transforms.
//! - Failures of handlers processing `system:error` are logged, not
//!   re-emitted — the error channel cannot feed itself.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::{BoxFuture, join_all};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use weft_core::constants::names;
use weft_core::{ErrorEventPayload, ErrorKind, Event, EventContext, RuleId};

use crate::context_tracker::ContextTracker;
use crate::errors::HandlerError;
use crate::handler::EventHandler;
use crate::observer::{DispatchObserver, DispatchSummary, HandlerOutcome};
use crate::pending::{CORRELATION_TOKEN_KEY, PendingTransform, PendingTransforms};
use crate::registry::HandlerRegistry;
use crate::transformer::CompiledTransformer;

/// Error class reported when a handler exceeds its timeout.
const TIMEOUT_CLASS: &str = "HandlerTimeout";
/// Error class reported when a handler task panics.
const PANIC_CLASS: &str = "HandlerPanic";

/// Router tunables.
#[derive(Clone, Debug)]
pub struct RouterConfig {
    /// Maximum context depth a transformer chain may reach.
    pub max_depth: u32,
    /// Default per-handler execution timeout in milliseconds.
    pub handler_timeout_ms: u64,
    /// Default deadline for async transform responses in milliseconds.
    pub async_transform_timeout_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_depth: 32,
            handler_timeout_ms: 30_000,
            async_transform_timeout_ms: 30_000,
        }
    }
}

impl From<&weft_settings::RouterSettings> for RouterConfig {
    fn from(settings: &weft_settings::RouterSettings) -> Self {
        Self {
            max_depth: settings.max_depth,
            handler_timeout_ms: settings.handler_timeout_ms,
            async_transform_timeout_ms: settings.async_transform_timeout_ms,
        }
    }
}

/// Result of one emission, returned to the caller.
#[derive(Clone, Debug)]
pub struct EmitOutcome {
    /// The dispatched event, with its context reference attached.
    pub event: Event,
    /// The lineage context the event was dispatched under.
    pub context: EventContext,
    /// Per-handler results and timing.
    pub handlers: DispatchSummary,
    /// Number of transformer emissions this dispatch produced directly.
    pub transforms_fired: usize,
}

impl EmitOutcome {
    /// First successful handler result, if any.
    #[must_use]
    pub fn first_result(&self) -> Option<&Value> {
        self.handlers.first_result()
    }

    /// First handler error, if any handler failed.
    #[must_use]
    pub fn first_error(&self) -> Option<&HandlerError> {
        self.handlers.first_error()
    }
}

/// The dispatch core: pattern-matched fan-out with transformer re-emission.
pub struct EventRouter {
    config: RouterConfig,
    tracker: Arc<dyn ContextTracker>,
    handlers: RwLock<HandlerRegistry>,
    transformers: RwLock<Vec<Arc<CompiledTransformer>>>,
    pending: PendingTransforms,
    observer: RwLock<Option<Arc<dyn DispatchObserver>>>,
    self_ref: Weak<EventRouter>,
}

impl EventRouter {
    /// Create a router with the given config and context tracker.
    pub fn new(config: RouterConfig, tracker: Arc<dyn ContextTracker>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            config,
            tracker,
            handlers: RwLock::new(HandlerRegistry::new()),
            transformers: RwLock::new(Vec::new()),
            pending: PendingTransforms::new(),
            observer: RwLock::new(None),
            self_ref: weak.clone(),
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────────────

    /// Register a handler (replaces any handler with the same name).
    pub fn register_handler(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.write().register(handler);
    }

    /// Unregister a handler by name.
    pub fn unregister_handler(&self, name: &str) -> bool {
        self.handlers.write().unregister(name)
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.read().count()
    }

    /// Install a compiled transformer (replaces any with the same rule ID).
    /// The list stays sorted by priority descending — evaluation order only,
    /// never exclusivity.
    pub fn register_transformer(&self, transformer: CompiledTransformer) {
        let mut transformers = self.transformers.write();
        transformers.retain(|t| t.rule_id != transformer.rule_id);
        debug!(
            rule_id = %transformer.rule_id,
            source = %transformer.source,
            target = %transformer.target_event,
            "registering transformer"
        );
        transformers.push(Arc::new(transformer));
        transformers.sort_by_key(|t| std::cmp::Reverse(t.priority));
    }

    /// Remove a transformer by rule ID.
    pub fn unregister_transformer(&self, rule_id: &RuleId) -> bool {
        let mut transformers = self.transformers.write();
        let before = transformers.len();
        transformers.retain(|t| &t.rule_id != rule_id);
        transformers.len() < before
    }

    /// Number of installed transformers.
    #[must_use]
    pub fn transformer_count(&self) -> usize {
        self.transformers.read().len()
    }

    /// Install the dispatch observer (at most one).
    pub fn set_observer(&self, observer: Arc<dyn DispatchObserver>) {
        *self.observer.write() = Some(observer);
    }

    /// Remove the dispatch observer.
    pub fn clear_observer(&self) {
        *self.observer.write() = None;
    }

    /// Number of in-flight async transforms.
    #[must_use]
    pub fn pending_transform_count(&self) -> usize {
        self.pending.len()
    }

    /// The context tracker this router registers emissions with.
    #[must_use]
    pub fn tracker(&self) -> &Arc<dyn ContextTracker> {
        &self.tracker
    }

    // ─────────────────────────────────────────────────────────────────────
    // Emission
    // ─────────────────────────────────────────────────────────────────────

    /// Emit an event with a fresh root context.
    pub async fn emit(&self, name: &str, payload: Value) -> EmitOutcome {
        self.emit_with_context(name, payload, EventContext::root())
            .await
    }

    /// Emit an event under an explicit lineage context.
    ///
    /// Callers inside the causal scope of another event pass a derived child
    /// context; top-level callers pass a scoped root.
    pub async fn emit_with_context(
        &self,
        name: &str,
        payload: Value,
        ctx: EventContext,
    ) -> EmitOutcome {
        self.dispatch(name.to_string(), payload, ctx, true).await
    }

    fn dispatch(
        &self,
        name: String,
        payload: Value,
        ctx: EventContext,
        allow_transforms: bool,
    ) -> BoxFuture<'_, EmitOutcome> {
        Box::pin(async move {
            let reference = self.tracker.register(&ctx).await;
            let event = Event {
                name,
                payload,
                context_ref: Some(reference),
                timestamp: Utc::now(),
            };

            let observer: Option<Arc<dyn DispatchObserver>> = self.observer.read().clone();
            if let Some(obs) = &observer {
                obs.before_dispatch(&event, &ctx).await;
            }

            // Handlers run concurrently; every matching one fires.
            let matching = { self.handlers.read().matching(&event.name) };
            let summary = self.run_handlers(matching, &event, &ctx).await;
            self.report_failures(&event, &ctx, &summary).await;

            // Transformers fire independently in priority order.
            let mut transforms_fired = 0;
            if allow_transforms {
                transforms_fired = self.run_transformers(&event, &ctx).await;
            }

            // A response event echoing a parked correlation token completes
            // its async transform.
            self.resolve_async_response(&event).await;

            if let Some(obs) = &observer {
                obs.after_dispatch(&event, &ctx, &summary).await;
            }

            EmitOutcome {
                event,
                context: ctx,
                handlers: summary,
                transforms_fired,
            }
        })
    }

    async fn run_handlers(
        &self,
        handlers: Vec<Arc<dyn EventHandler>>,
        event: &Event,
        ctx: &EventContext,
    ) -> DispatchSummary {
        if handlers.is_empty() {
            return DispatchSummary::default();
        }
        let started = Instant::now();

        let mut handler_names = Vec::with_capacity(handlers.len());
        let mut tasks = Vec::with_capacity(handlers.len());
        for handler in handlers {
            let name = handler.name().to_string();
            let timeout = Duration::from_millis(
                handler.timeout_ms().unwrap_or(self.config.handler_timeout_ms),
            );
            let event = event.clone();
            let ctx = ctx.clone();
            handler_names.push(name.clone());
            tasks.push(tokio::spawn(async move {
                let handler_started = Instant::now();
                let result =
                    match tokio::time::timeout(timeout, handler.handle(&event, &ctx)).await {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(error)) => Err(error),
                        Err(_) => Err(HandlerError::new(
                            TIMEOUT_CLASS,
                            format!("handler timed out after {}ms", timeout.as_millis()),
                        )),
                    };
                HandlerOutcome {
                    handler: name,
                    result,
                    duration_ms: u64::try_from(handler_started.elapsed().as_millis())
                        .unwrap_or(u64::MAX),
                }
            }));
        }

        let joined = join_all(tasks).await;
        let results = joined
            .into_iter()
            .zip(handler_names)
            .map(|(joined, name)| match joined {
                Ok(outcome) => outcome,
                Err(join_error) => HandlerOutcome {
                    handler: name,
                    result: Err(HandlerError::new(PANIC_CLASS, join_error.to_string())),
                    duration_ms: 0,
                },
            })
            .collect();

        DispatchSummary {
            results,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Wrap every handler failure into a `system:error` emission. Failures of
    /// error-channel handlers are logged only — never re-emitted.
    async fn report_failures(&self, event: &Event, ctx: &EventContext, summary: &DispatchSummary) {
        for outcome in &summary.results {
            let Err(error) = &outcome.result else {
                continue;
            };
            if event.name == names::SYSTEM_ERROR {
                warn!(
                    handler = %outcome.handler,
                    error = %error,
                    "error-channel handler failed; not re-emitting"
                );
                continue;
            }
            let kind = if error.class == TIMEOUT_CLASS {
                ErrorKind::Timeout
            } else {
                ErrorKind::HandlerFailure
            };
            self.emit_error(
                kind,
                error.class.clone(),
                error.message.clone(),
                &outcome.handler,
                event.context_ref.clone(),
                ctx,
            )
            .await;
        }
    }

    async fn run_transformers(&self, event: &Event, ctx: &EventContext) -> usize {
        let now = Utc::now();
        let matching: Vec<Arc<CompiledTransformer>> = {
            self.transformers
                .read()
                .iter()
                .filter(|t| !t.is_expired(now) && t.source.matches(&event.name))
                .cloned()
                .collect()
        };
        if matching.is_empty() {
            return 0;
        }

        // Depth bound: refuse propagation past the limit with one diagnostic.
        if ctx.depth >= self.config.max_depth {
            warn!(
                event = %event.name,
                depth = ctx.depth,
                max_depth = self.config.max_depth,
                "transformer chain exceeded max depth; refusing propagation"
            );
            if event.name != names::SYSTEM_ERROR {
                let payload = ErrorEventPayload::new(
                    ErrorKind::MaxDepthExceeded,
                    "DepthLimit",
                    format!(
                        "refusing transform of '{}' at depth {} (max {})",
                        event.name, ctx.depth, self.config.max_depth
                    ),
                    event.name.clone(),
                )
                .with_context_ref(event.context_ref.clone().unwrap_or_default());
                let _ = self
                    .dispatch(
                        names::SYSTEM_ERROR.to_string(),
                        payload.to_value(),
                        ctx.child(),
                        false,
                    )
                    .await;
            }
            return 0;
        }

        let mut fired = 0;
        for transformer in matching {
            fired += self.apply_transformer(&transformer, event, ctx).await;
        }
        fired
    }

    async fn apply_transformer(
        &self,
        transformer: &CompiledTransformer,
        event: &Event,
        ctx: &EventContext,
    ) -> usize {
        if let Some(condition) = &transformer.condition {
            if !condition.evaluate(&event.payload, ctx) {
                return 0;
            }
        }

        let mut mapped = match transformer.mapping.apply(&event.payload, ctx) {
            Ok(value) => value,
            Err(error) => {
                warn!(rule_id = %transformer.rule_id, error = %error, "mapping failed");
                self.emit_error(
                    ErrorKind::TransformerFailure,
                    "TemplateError".to_string(),
                    error.to_string(),
                    transformer.rule_id.as_str(),
                    event.context_ref.clone(),
                    ctx,
                )
                .await;
                return 0;
            }
        };

        let child = ctx.child();
        if let Some(async_spec) = &transformer.async_spec {
            let token = PendingTransforms::mint_token();
            if let Value::Object(map) = &mut mapped {
                let _ = map.insert(
                    CORRELATION_TOKEN_KEY.to_string(),
                    Value::String(token.clone()),
                );
            }
            self.pending.insert(
                token.clone(),
                PendingTransform {
                    rule_id: transformer.rule_id.clone(),
                    target_event: transformer.target_event.clone(),
                    completion_event: async_spec.completion_event.clone(),
                    origin: ctx.clone(),
                    origin_ref: event.context_ref.clone(),
                    created_at: Utc::now(),
                },
            );
            let timeout = Duration::from_millis(
                async_spec
                    .timeout_ms
                    .unwrap_or(self.config.async_transform_timeout_ms),
            );
            self.spawn_async_timeout(token, timeout);
        }

        let _ = self
            .dispatch(transformer.target_event.clone(), mapped, child, true)
            .await;
        1
    }

    /// A response event that echoes a parked token routes its payload to the
    /// transform's completion channel, derived from the *origin* context so
    /// the completion stays on the caller's causal chain.
    async fn resolve_async_response(&self, event: &Event) {
        let Some(token) = event
            .payload
            .get(CORRELATION_TOKEN_KEY)
            .and_then(Value::as_str)
        else {
            return;
        };
        let Some(pending) = self.pending.claim(token, &event.name) else {
            return;
        };

        debug!(
            token,
            completion = %pending.completion_event,
            rule_id = %pending.rule_id,
            "async transform completed"
        );
        let _ = self
            .dispatch(
                pending.completion_event.clone(),
                event.payload.clone(),
                pending.origin.child(),
                true,
            )
            .await;
    }

    fn spawn_async_timeout(&self, token: String, timeout: Duration) {
        let weak = self.self_ref.clone();
        drop(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(router) = weak.upgrade() else {
                return;
            };
            let Some(entry) = router.pending.reap(&token) else {
                return;
            };
            warn!(
                token,
                rule_id = %entry.rule_id,
                timeout_ms = timeout.as_millis(),
                "async transform timed out"
            );
            router
                .emit_error(
                    ErrorKind::Timeout,
                    "AsyncTransformTimeout".to_string(),
                    format!(
                        "no response for async transform within {}ms",
                        timeout.as_millis()
                    ),
                    entry.rule_id.as_str(),
                    entry.origin_ref.clone(),
                    &entry.origin,
                )
                .await;
        }));
    }

    async fn emit_error(
        &self,
        kind: ErrorKind,
        class: String,
        message: String,
        source: &str,
        context_ref: Option<String>,
        parent_ctx: &EventContext,
    ) {
        let mut payload = ErrorEventPayload::new(kind, class, message, source);
        if let Some(reference) = context_ref {
            payload = payload.with_context_ref(reference);
        }
        let _ = self
            .dispatch(
                names::SYSTEM_ERROR.to_string(),
                payload.to_value(),
                parent_ctx.child(),
                true,
            )
            .await;
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("handlers", &self.handler_count())
            .field("transformers", &self.transformer_count())
            .field("pending_transforms", &self.pending_transform_count())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
