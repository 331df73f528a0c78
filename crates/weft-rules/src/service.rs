//! The routing rule service.
//!
//! Wraps the in-memory rule table with validation, capability gating, audit
//! logging, durable mirroring, and live transformer registration. Every
//! mutation happens under one lock so the record and its registration are
//! added/removed atomically as observed by callers; the durable mirror and
//! audit entry commit in a single transaction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use weft_core::checkpoint::{CheckpointError, CheckpointHook};
use weft_core::constants::{SYSTEM_ACTOR, capabilities};
use weft_core::RuleId;
use weft_core::pattern::EventPattern;
use weft_router::EventRouter;
use weft_store::repositories::{AppendAuditParams, AuditQuery, AuditRepo, RuleRepo};
use weft_store::row_types::AuditRow;
use weft_store::{ConnectionPool, StoreError};

use crate::capability::CapabilityChecker;
use crate::compile::{compile_rule, validate_spec, validate_target};
use crate::errors::{Result, RuleError};
use crate::types::{RoutingRule, RuleFilter, RuleSpec, RuleUpdate};

/// Rule service tunables.
#[derive(Clone, Debug)]
pub struct RuleServiceConfig {
    /// Interval between TTL expiry sweeps.
    pub sweep_interval: Duration,
}

impl Default for RuleServiceConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
        }
    }
}

impl From<&weft_settings::RuleSettings> for RuleServiceConfig {
    fn from(settings: &weft_settings::RuleSettings) -> Self {
        Self {
            sweep_interval: Duration::from_secs(settings.sweep_interval_secs),
        }
    }
}

/// CRUD service over dynamically-added routing rules.
pub struct RuleService {
    rules: RwLock<HashMap<RuleId, RoutingRule>>,
    router: Arc<EventRouter>,
    pool: ConnectionPool,
    capabilities: Arc<dyn CapabilityChecker>,
    mutation: Mutex<()>,
    config: RuleServiceConfig,
}

impl RuleService {
    /// Create a service over a migrated pool and a live router.
    ///
    /// Startup is a clean slate: no transformers are re-registered from the
    /// durable mirror. The explicit checkpoint restore path reconstructs
    /// records and registrations together.
    #[must_use]
    pub fn new(
        router: Arc<EventRouter>,
        pool: ConnectionPool,
        capabilities: Arc<dyn CapabilityChecker>,
        config: RuleServiceConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            rules: RwLock::new(HashMap::new()),
            router,
            pool,
            capabilities,
            mutation: Mutex::new(()),
            config,
        })
    }

    async fn authorize(&self, actor: &str) -> Result<()> {
        // The router's own internal caller is always authorized.
        if actor == SYSTEM_ACTOR {
            return Ok(());
        }
        if self
            .capabilities
            .has_capability(actor, capabilities::ROUTING_CONTROL)
            .await
        {
            return Ok(());
        }
        Err(RuleError::PermissionDenied {
            actor: actor.to_string(),
            capability: capabilities::ROUTING_CONTROL.to_string(),
        })
    }

    async fn store_write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Connection) -> weft_store::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(StoreError::from)?;
            f(&conn)
        })
        .await
        .map_err(|e| RuleError::TaskFailed(e.to_string()))?
        .map_err(Into::into)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────

    /// Create a rule: validate, mirror durably with its audit entry, then
    /// install the compiled transformer and the in-memory record.
    pub async fn add_rule(&self, actor: &str, spec: RuleSpec) -> Result<RoutingRule> {
        self.authorize(actor).await?;
        let rule = validate_spec(&spec, actor, Utc::now())?;
        let transformer = compile_rule(&rule)?;

        let _guard = self.mutation.lock().await;
        if self.rules.read().contains_key(&rule.rule_id) {
            return Err(RuleError::DuplicateRule(rule.rule_id.as_str().to_string()));
        }

        let row = rule.to_row()?;
        let after = serde_json::to_string(&rule)?;
        let actor_owned = actor.to_string();
        self.store_write(move |conn| {
            let tx = conn.unchecked_transaction()?;
            RuleRepo::insert(&tx, &row)?;
            let timestamp = Utc::now().to_rfc3339();
            let _ = AuditRepo::append(
                &tx,
                &AppendAuditParams {
                    operation: "add",
                    rule_id: &row.rule_id,
                    actor: &actor_owned,
                    timestamp: &timestamp,
                    before_state: None,
                    after_state: Some(&after),
                },
            )?;
            tx.commit()?;
            Ok(())
        })
        .await?;

        self.router.register_transformer(transformer);
        let _ = self.rules.write().insert(rule.rule_id.clone(), rule.clone());
        info!(rule_id = %rule.rule_id, source = %rule.source_pattern, target = %rule.target_event, "rule added");
        Ok(rule)
    }

    /// Update a rule: re-validate, recompile, and swap the live registration.
    pub async fn update_rule(
        &self,
        actor: &str,
        rule_id: &str,
        update: RuleUpdate,
    ) -> Result<RoutingRule> {
        self.authorize(actor).await?;
        let _guard = self.mutation.lock().await;

        let rid = RuleId::from(rule_id);
        let existing = self
            .rules
            .read()
            .get(&rid)
            .cloned()
            .ok_or_else(|| RuleError::NotFound(rule_id.to_string()))?;

        let mut updated = existing.clone();
        if let Some(source) = &update.source_pattern {
            updated.source_pattern = EventPattern::parse(source)
                .map_err(|e| RuleError::InvalidPattern(e.to_string()))?;
        }
        if let Some(target) = &update.target_event {
            updated.target_event = target.clone();
        }
        match update.condition {
            Some(Value::Null) => updated.condition = None,
            Some(condition) => updated.condition = Some(condition),
            None => {}
        }
        if let Some(mapping) = update.mapping {
            updated.mapping = mapping;
        }
        if let Some(priority) = update.priority {
            updated.priority = priority;
        }
        if let Some(ttl_secs) = update.ttl_secs {
            if ttl_secs == 0 {
                return Err(RuleError::TtlInvalid("ttl must be positive".to_string()));
            }
            updated.ttl_secs = Some(ttl_secs);
            updated.expires_at = Some(
                Utc::now()
                    + chrono::Duration::seconds(i64::try_from(ttl_secs).unwrap_or(i64::MAX)),
            );
        }
        if let Some(async_spec) = update.async_spec {
            updated.async_spec = Some(async_spec);
        }

        validate_target(&updated.target_event)?;
        if updated.source_pattern.matches(&updated.target_event) {
            return Err(RuleError::SelfCycle(rule_id.to_string()));
        }
        let transformer = compile_rule(&updated)?;

        let row = updated.to_row()?;
        let before = serde_json::to_string(&existing)?;
        let after = serde_json::to_string(&updated)?;
        let actor_owned = actor.to_string();
        self.store_write(move |conn| {
            let tx = conn.unchecked_transaction()?;
            RuleRepo::update(&tx, &row)?;
            let timestamp = Utc::now().to_rfc3339();
            let _ = AuditRepo::append(
                &tx,
                &AppendAuditParams {
                    operation: "update",
                    rule_id: &row.rule_id,
                    actor: &actor_owned,
                    timestamp: &timestamp,
                    before_state: Some(&before),
                    after_state: Some(&after),
                },
            )?;
            tx.commit()?;
            Ok(())
        })
        .await?;

        self.router.register_transformer(transformer);
        let _ = self.rules.write().insert(rid, updated.clone());
        info!(rule_id, "rule updated");
        Ok(updated)
    }

    /// Delete a rule: remove the durable mirror (with audit), the live
    /// registration, and the record.
    pub async fn delete_rule(&self, actor: &str, rule_id: &str) -> Result<()> {
        self.authorize(actor).await?;
        let _guard = self.mutation.lock().await;

        let rid = RuleId::from(rule_id);
        let existing = self
            .rules
            .read()
            .get(&rid)
            .cloned()
            .ok_or_else(|| RuleError::NotFound(rule_id.to_string()))?;

        let before = serde_json::to_string(&existing)?;
        let rule_id_owned = rule_id.to_string();
        let actor_owned = actor.to_string();
        self.store_write(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let _ = RuleRepo::delete(&tx, &rule_id_owned)?;
            let timestamp = Utc::now().to_rfc3339();
            let _ = AuditRepo::append(
                &tx,
                &AppendAuditParams {
                    operation: "delete",
                    rule_id: &rule_id_owned,
                    actor: &actor_owned,
                    timestamp: &timestamp,
                    before_state: Some(&before),
                    after_state: None,
                },
            )?;
            tx.commit()?;
            Ok(())
        })
        .await?;

        let _ = self.router.unregister_transformer(&rid);
        let _ = self.rules.write().remove(&rid);
        info!(rule_id, "rule deleted");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────

    /// Active (non-expired) rules matching the filter, priority descending.
    #[must_use]
    pub fn query_rules(&self, filter: &RuleFilter) -> Vec<RoutingRule> {
        let now = Utc::now();
        let mut rules: Vec<RoutingRule> = self
            .rules
            .read()
            .values()
            .filter(|rule| !rule.is_expired(now))
            .filter(|rule| {
                filter
                    .source_pattern
                    .as_ref()
                    .is_none_or(|pattern| &rule.source_pattern.to_string() == pattern)
            })
            .filter(|rule| {
                filter
                    .created_by
                    .as_ref()
                    .is_none_or(|creator| &rule.created_by == creator)
            })
            .cloned()
            .collect();
        rules.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        rules
    }

    /// Look up a single rule.
    #[must_use]
    pub fn get_rule(&self, rule_id: &str) -> Option<RoutingRule> {
        self.rules.read().get(&RuleId::from(rule_id)).cloned()
    }

    /// Number of live rules.
    #[must_use]
    pub fn count(&self) -> usize {
        self.rules.read().len()
    }

    /// Read the immutable audit trail.
    pub async fn get_audit_log(&self, query: AuditQuery) -> Result<Vec<AuditRow>> {
        self.store_write(move |conn| AuditRepo::query(conn, &query))
            .await
    }

    // ─────────────────────────────────────────────────────────────────────
    // TTL sweep
    // ─────────────────────────────────────────────────────────────────────

    /// Remove every expired rule (record + registration as one operation),
    /// appending a `ttl_expired` audit entry for each. Returns removed IDs.
    pub async fn run_sweep_once(&self) -> Result<Vec<RuleId>> {
        let now = Utc::now();
        let expired: Vec<RoutingRule> = self
            .rules
            .read()
            .values()
            .filter(|rule| rule.is_expired(now))
            .cloned()
            .collect();
        if expired.is_empty() {
            return Ok(Vec::new());
        }

        let _guard = self.mutation.lock().await;
        let mut removed = Vec::with_capacity(expired.len());
        for rule in expired {
            // A concurrent delete may have won while we waited on the lock.
            if !self.rules.read().contains_key(&rule.rule_id) {
                continue;
            }

            let before = serde_json::to_string(&rule)?;
            let rule_id_owned = rule.rule_id.as_str().to_string();
            self.store_write(move |conn| {
                let tx = conn.unchecked_transaction()?;
                let _ = RuleRepo::delete(&tx, &rule_id_owned)?;
                let timestamp = Utc::now().to_rfc3339();
                let _ = AuditRepo::append(
                    &tx,
                    &AppendAuditParams {
                        operation: "ttl_expired",
                        rule_id: &rule_id_owned,
                        actor: SYSTEM_ACTOR,
                        timestamp: &timestamp,
                        before_state: Some(&before),
                        after_state: None,
                    },
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?;

            let _ = self.router.unregister_transformer(&rule.rule_id);
            let _ = self.rules.write().remove(&rule.rule_id);
            debug!(rule_id = %rule.rule_id, "rule expired");
            removed.push(rule.rule_id);
        }
        if !removed.is_empty() {
            info!(count = removed.len(), "ttl sweep removed expired rules");
        }
        Ok(removed)
    }

    /// Spawn the periodic TTL sweep task.
    pub fn spawn_sweep_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let service = Arc::clone(self);
        let interval = service.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                let _ = ticker.tick().await;
                if let Err(error) = service.run_sweep_once().await {
                    warn!(error = %error, "ttl sweep failed");
                }
            }
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Checkpoint hook
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl CheckpointHook for RuleService {
    fn blob_name(&self) -> &'static str {
        "rules"
    }

    async fn collect(&self) -> std::result::Result<Value, CheckpointError> {
        let rules: Vec<RoutingRule> = self.rules.read().values().cloned().collect();
        Ok(serde_json::to_value(rules)?)
    }

    async fn restore(&self, blob: Value) -> std::result::Result<(), CheckpointError> {
        let rules: Vec<RoutingRule> =
            serde_json::from_value(blob).map_err(|e| CheckpointError::Malformed {
                component: "rules".to_string(),
                message: e.to_string(),
            })?;

        let _guard = self.mutation.lock().await;
        let now = Utc::now();
        let mut restored = 0usize;
        for rule in rules {
            if rule.is_expired(now) {
                continue;
            }
            let transformer = compile_rule(&rule).map_err(|e| CheckpointError::Restore {
                component: "rules".to_string(),
                message: e.to_string(),
            })?;

            // The mirror may already hold this rule (it is durable); insert
            // or refresh so record and registration agree.
            let row = rule.to_row().map_err(|e| CheckpointError::Restore {
                component: "rules".to_string(),
                message: e.to_string(),
            })?;
            let mirror = self
                .store_write(move |conn| {
                    match RuleRepo::insert(conn, &row) {
                        Err(StoreError::DuplicateKey(_)) => RuleRepo::update(conn, &row),
                        other => other,
                    }
                })
                .await;
            if let Err(error) = mirror {
                return Err(CheckpointError::Restore {
                    component: "rules".to_string(),
                    message: error.to_string(),
                });
            }

            self.router.register_transformer(transformer);
            let _ = self.rules.write().insert(rule.rule_id.clone(), rule);
            restored += 1;
        }
        info!(restored, "rule set restored from checkpoint");
        Ok(())
    }
}

impl std::fmt::Debug for RuleService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleService")
            .field("rules", &self.count())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
