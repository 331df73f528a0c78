//! The context manager.
//!
//! Owns the hot tier, the cold-tier writer, and the migration sweep.
//! Implements the router's [`ContextTracker`] seam (reference minting and
//! resolution) and the [`CheckpointHook`] for explicit hot-tier
//! snapshot/restore. Ordinary restart starts with an empty hot tier by
//! design — the restore path runs only when an orchestrator hands back a
//! checkpoint blob.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use weft_core::checkpoint::{CheckpointError, CheckpointHook};
use weft_core::{Event, EventContext};
use weft_router::ContextTracker;
use weft_store::repositories::{ContextQuery, ContextRepo, EventLogQuery, EventLogRepo};
use weft_store::row_types::{ContextRow, EventLogRow};
use weft_store::ConnectionPool;

use crate::errors::{ContextError, Result};
use crate::hot::HotTier;
use crate::writer::{ColdWriter, WriteJob};

/// Context manager tunables.
#[derive(Clone, Debug)]
pub struct ContextConfig {
    /// How long a context stays hot before migration.
    pub hot_retention: Duration,
    /// Interval between migration sweeps.
    pub migration_interval: Duration,
    /// Bound on the cold-tier writer queue.
    pub writer_queue_size: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            hot_retention: Duration::from_secs(86_400),
            migration_interval: Duration::from_secs(60),
            writer_queue_size: 256,
        }
    }
}

impl From<&weft_settings::ContextSettings> for ContextConfig {
    fn from(settings: &weft_settings::ContextSettings) -> Self {
        Self {
            hot_retention: Duration::from_secs(settings.hot_retention_secs),
            migration_interval: Duration::from_secs(settings.migration_interval_secs),
            writer_queue_size: settings.writer_queue_size,
        }
    }
}

/// A resolved context with the reference it lives under.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedContext {
    /// Opaque reference string.
    pub reference: String,
    /// The lineage record.
    pub context: EventContext,
}

/// Filters for [`ContextManager::query_contexts`].
#[derive(Clone, Debug, Default)]
pub struct ContextQueryParams {
    /// Match this chain correlation ID.
    pub correlation_id: Option<String>,
    /// Match this emitting agent.
    pub agent_id: Option<String>,
    /// Match this owning session.
    pub session_id: Option<String>,
    /// Match the context created for this event.
    pub event_id: Option<String>,
    /// Only contexts created at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Only contexts created before this instant.
    pub until: Option<DateTime<Utc>>,
    /// Maximum results.
    pub limit: Option<usize>,
}

/// Tier population counts for `context:stats`.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextStats {
    /// Contexts resident in the hot tier.
    pub hot_count: usize,
    /// Contexts in the cold tier.
    pub cold_count: i64,
    /// Recorded events in the cold event log.
    pub recorded_events: i64,
}

/// Two-tier context store with lineage rules.
pub struct ContextManager {
    hot: RwLock<HotTier>,
    pool: ConnectionPool,
    writer: ColdWriter,
    config: ContextConfig,
}

impl ContextManager {
    /// Create a manager over a migrated pool, spawning its writer task.
    ///
    /// Startup is a clean slate: the hot tier starts empty regardless of
    /// what the cold tier holds. Pass a checkpoint blob through
    /// [`CheckpointHook::restore`] for the explicit restore path.
    #[must_use]
    pub fn new(pool: ConnectionPool, config: ContextConfig) -> Arc<Self> {
        let writer = ColdWriter::spawn(pool.clone(), config.writer_queue_size);
        Arc::new(Self {
            hot: RwLock::new(HotTier::new()),
            pool,
            writer,
            config,
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Creation and lineage
    // ─────────────────────────────────────────────────────────────────────

    /// Store a context and mint its reference. The reference is assigned
    /// exactly once; resolving it later yields identical data.
    pub fn create(&self, ctx: &EventContext) -> String {
        let reference = ctx.mint_ref();
        self.hot.write().insert(reference.clone(), ctx.clone());
        reference
    }

    /// Derive a child context from the context behind `parent_ref`.
    ///
    /// This is the lineage-preserving path for events that already carry a
    /// reference: the child gets a fresh `event_id`, inherits
    /// `root_event_id` and `correlation_id`, and increments `depth`.
    pub async fn derive(&self, parent_ref: &str) -> Result<ResolvedContext> {
        let parent = self
            .get_context(parent_ref)
            .await?
            .ok_or_else(|| ContextError::NotFound(parent_ref.to_string()))?;
        let child = parent.child();
        let reference = self.create(&child);
        Ok(ResolvedContext {
            reference,
            context: child,
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Resolution
    // ─────────────────────────────────────────────────────────────────────

    /// Resolve a reference, checking the hot tier then the cold tier.
    pub async fn get_context(&self, reference: &str) -> Result<Option<EventContext>> {
        if let Some(ctx) = self.hot.read().get(reference).cloned() {
            return Ok(Some(ctx));
        }
        let pool = self.pool.clone();
        let reference = reference.to_string();
        let row = tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            ContextRepo::get_by_ref(&conn, &reference)
        })
        .await
        .map_err(|e| ContextError::TaskFailed(e.to_string()))??;

        match row {
            Some(row) => Ok(Some(serde_json::from_str(&row.fields)?)),
            None => Ok(None),
        }
    }

    /// Batch-resolve references. Missing references are omitted.
    pub async fn get_contexts(
        &self,
        references: &[String],
    ) -> Result<HashMap<String, EventContext>> {
        let mut resolved = HashMap::new();
        let mut misses = Vec::new();
        {
            let hot = self.hot.read();
            for reference in references {
                match hot.get(reference) {
                    Some(ctx) => {
                        let _ = resolved.insert(reference.clone(), ctx.clone());
                    }
                    None => misses.push(reference.clone()),
                }
            }
        }
        if misses.is_empty() {
            return Ok(resolved);
        }

        let pool = self.pool.clone();
        let rows = tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            let refs: Vec<&str> = misses.iter().map(String::as_str).collect();
            ContextRepo::get_by_refs(&conn, &refs)
        })
        .await
        .map_err(|e| ContextError::TaskFailed(e.to_string()))??;

        for (reference, row) in rows {
            let ctx: EventContext = serde_json::from_str(&row.fields)?;
            let _ = resolved.insert(reference, ctx);
        }
        Ok(resolved)
    }

    /// Query contexts across both tiers by secondary fields, newest first.
    pub async fn query_contexts(
        &self,
        params: &ContextQueryParams,
    ) -> Result<Vec<ResolvedContext>> {
        // Hot tier: filter a snapshot so readers never block the writer.
        let hot_matches: Vec<ResolvedContext> = {
            let snapshot = self.hot.read().snapshot();
            snapshot
                .into_iter()
                .filter(|(_, ctx)| matches_params(ctx, params))
                .map(|(reference, context)| ResolvedContext { reference, context })
                .collect()
        };

        let query = ContextQuery {
            correlation_id: params.correlation_id.clone(),
            agent_id: params.agent_id.clone(),
            session_id: params.session_id.clone(),
            event_id: params.event_id.clone(),
            since: params.since.map(rfc3339),
            until: params.until.map(rfc3339),
            limit: params.limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX)),
        };
        let pool = self.pool.clone();
        let rows = tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            ContextRepo::query(&conn, &query)
        })
        .await
        .map_err(|e| ContextError::TaskFailed(e.to_string()))??;

        // Merge, deduplicating on reference (an entry can sit in both tiers
        // during the copy-then-evict window).
        let mut merged = hot_matches;
        for row in rows {
            if merged.iter().any(|r| r.reference == row.reference) {
                continue;
            }
            merged.push(ResolvedContext {
                reference: row.reference.clone(),
                context: serde_json::from_str(&row.fields)?,
            });
        }
        merged.sort_by(|a, b| b.context.timestamp.cmp(&a.context.timestamp));
        if let Some(limit) = params.limit {
            merged.truncate(limit);
        }
        Ok(merged)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Event recording (observation history source)
    // ─────────────────────────────────────────────────────────────────────

    /// Append a routed event to the cold event log. Non-blocking: under
    /// queue pressure the record is dropped rather than stalling dispatch.
    pub fn record_event(&self, event: &Event, agent_id: Option<&str>) {
        let row = EventLogRow {
            id: format!("log_{}", Uuid::now_v7().simple()),
            name: event.name.clone(),
            agent_id: agent_id.map(String::from),
            timestamp: rfc3339(event.timestamp),
            payload: event.payload.to_string(),
            context_ref: event.context_ref.clone(),
        };
        let _ = self.writer.try_submit(WriteJob::Events { rows: vec![row] });
    }

    /// Query the recorded event log (history and replay source).
    pub async fn query_events(&self, query: EventLogQuery) -> Result<Vec<EventLogRow>> {
        let pool = self.pool.clone();
        let rows = tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            EventLogRepo::query(&conn, &query)
        })
        .await
        .map_err(|e| ContextError::TaskFailed(e.to_string()))??;
        Ok(rows)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Migration and retention
    // ─────────────────────────────────────────────────────────────────────

    /// Run one hot→cold migration sweep: copy aged entries through the
    /// writer, await the commit ack, then evict. Returns migrated count.
    pub async fn run_migration_once(&self) -> Result<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.hot_retention)
                .unwrap_or_else(|_| chrono::Duration::seconds(86_400));
        let aged = { self.hot.read().aged(cutoff) };
        if aged.is_empty() {
            return Ok(0);
        }

        let rows: Vec<ContextRow> = aged
            .iter()
            .map(|(reference, ctx)| context_row(reference, ctx))
            .collect::<std::result::Result<_, serde_json::Error>>()?;

        let (ack_tx, ack_rx) = tokio::sync::oneshot::channel();
        if !self
            .writer
            .submit(WriteJob::Contexts {
                rows,
                ack: Some(ack_tx),
            })
            .await
        {
            return Err(ContextError::WriterUnavailable);
        }
        if ack_rx.await.is_err() {
            // Write failed; entries stay hot and the next sweep retries.
            warn!("migration batch not acknowledged; keeping entries hot");
            return Err(ContextError::WriterUnavailable);
        }

        let references: Vec<String> = aged.into_iter().map(|(reference, _)| reference).collect();
        let migrated = references.len();
        self.hot.write().evict(&references);
        debug!(migrated, "hot contexts migrated to cold tier");
        Ok(migrated)
    }

    /// Spawn the periodic migration task.
    pub fn spawn_migration_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        let interval = manager.config.migration_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                let _ = ticker.tick().await;
                if let Err(error) = manager.run_migration_once().await {
                    warn!(error = %error, "migration sweep failed");
                }
            }
        })
    }

    /// Delete cold-tier contexts older than the cutoff (retention GC —
    /// the only path that ever deletes a context).
    pub async fn gc_cold(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let pool = self.pool.clone();
        let cutoff = rfc3339(older_than);
        let removed = tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            ContextRepo::delete_older_than(&conn, &cutoff)
        })
        .await
        .map_err(|e| ContextError::TaskFailed(e.to_string()))??;
        if removed > 0 {
            info!(removed, "cold-tier retention GC");
        }
        Ok(removed)
    }

    /// Wait until all enqueued cold writes have committed.
    pub async fn flush(&self) -> Result<()> {
        if self.writer.flush().await {
            Ok(())
        } else {
            Err(ContextError::WriterUnavailable)
        }
    }

    /// Tier population counts.
    pub async fn stats(&self) -> Result<ContextStats> {
        let hot_count = self.hot.read().len();
        let pool = self.pool.clone();
        let (cold_count, recorded_events) = tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            let cold = ContextRepo::count(&conn)?;
            let events = EventLogRepo::count(&conn)?;
            Ok::<_, weft_store::StoreError>((cold, events))
        })
        .await
        .map_err(|e| ContextError::TaskFailed(e.to_string()))??;

        Ok(ContextStats {
            hot_count,
            cold_count,
            recorded_events,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Router and checkpoint seams
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl ContextTracker for ContextManager {
    async fn register(&self, ctx: &EventContext) -> String {
        self.create(ctx)
    }

    async fn resolve(&self, reference: &str) -> Option<EventContext> {
        match self.get_context(reference).await {
            Ok(ctx) => ctx,
            Err(error) => {
                warn!(reference, error = %error, "context resolution failed");
                None
            }
        }
    }
}

#[async_trait]
impl CheckpointHook for ContextManager {
    fn blob_name(&self) -> &'static str {
        "contexts"
    }

    async fn collect(&self) -> std::result::Result<Value, CheckpointError> {
        // Only the hot tier: the cold tier is already durable.
        let snapshot = self.hot.read().snapshot();
        let entries: Vec<Value> = snapshot
            .into_iter()
            .map(|(reference, ctx)| {
                Ok(serde_json::json!({
                    "reference": reference,
                    "context": serde_json::to_value(&ctx)?,
                }))
            })
            .collect::<std::result::Result<_, serde_json::Error>>()?;
        Ok(Value::Array(entries))
    }

    async fn restore(&self, blob: Value) -> std::result::Result<(), CheckpointError> {
        let Value::Array(entries) = blob else {
            return Err(CheckpointError::Malformed {
                component: "contexts".to_string(),
                message: "expected an array of hot-tier entries".to_string(),
            });
        };
        let mut hot = self.hot.write();
        for entry in entries {
            let reference = entry
                .get("reference")
                .and_then(Value::as_str)
                .ok_or_else(|| CheckpointError::Malformed {
                    component: "contexts".to_string(),
                    message: "entry missing 'reference'".to_string(),
                })?
                .to_string();
            let ctx: EventContext = serde_json::from_value(
                entry.get("context").cloned().unwrap_or(Value::Null),
            )
            .map_err(|e| CheckpointError::Malformed {
                component: "contexts".to_string(),
                message: e.to_string(),
            })?;
            hot.insert(reference, ctx);
        }
        info!(restored = hot.len(), "hot context tier restored from checkpoint");
        Ok(())
    }
}

fn rfc3339(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn matches_params(ctx: &EventContext, params: &ContextQueryParams) -> bool {
    if let Some(correlation_id) = &params.correlation_id {
        if ctx.correlation_id.as_str() != correlation_id {
            return false;
        }
    }
    if let Some(agent_id) = &params.agent_id {
        if ctx.agent_id.as_ref().map(|id| id.as_str()) != Some(agent_id.as_str()) {
            return false;
        }
    }
    if let Some(session_id) = &params.session_id {
        if ctx.session_id.as_ref().map(|id| id.as_str()) != Some(session_id.as_str()) {
            return false;
        }
    }
    if let Some(event_id) = &params.event_id {
        if ctx.event_id.as_str() != event_id {
            return false;
        }
    }
    if let Some(since) = params.since {
        if ctx.timestamp < since {
            return false;
        }
    }
    if let Some(until) = params.until {
        if ctx.timestamp >= until {
            return false;
        }
    }
    true
}

fn context_row(
    reference: &str,
    ctx: &EventContext,
) -> std::result::Result<ContextRow, serde_json::Error> {
    Ok(ContextRow {
        reference: reference.to_string(),
        event_id: ctx.event_id.as_str().to_string(),
        correlation_id: ctx.correlation_id.as_str().to_string(),
        parent_event_id: ctx.parent_event_id.as_ref().map(|id| id.as_str().to_string()),
        root_event_id: ctx.root_event_id.as_str().to_string(),
        depth: i64::from(ctx.depth),
        agent_id: ctx.agent_id.as_ref().map(|id| id.as_str().to_string()),
        session_id: ctx.session_id.as_ref().map(|id| id.as_str().to_string()),
        client_id: ctx.client_id.as_ref().map(|id| id.as_str().to_string()),
        timestamp: rfc3339(ctx.timestamp),
        fields: serde_json::to_string(ctx)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
