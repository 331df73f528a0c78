//! Checkpoint collect/restore hooks.
//!
//! Components with volatile state (the hot context tier, the live rule set)
//! implement [`CheckpointHook`]. An external orchestrator drives collection;
//! each hook contributes an independent named sub-blob. Ordinary process
//! restart never calls `restore` — that path exists only for explicit
//! checkpoint restoration.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised by checkpoint collection or restoration.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Serialization of component state failed.
    #[error("checkpoint serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A restore blob did not have the shape the component expects.
    #[error("malformed checkpoint blob for '{component}': {message}")]
    Malformed {
        /// Component whose blob was malformed.
        component: String,
        /// What was wrong.
        message: String,
    },

    /// Restoring state into the live component failed.
    #[error("checkpoint restore error in '{component}': {message}")]
    Restore {
        /// Component that failed to restore.
        component: String,
        /// What went wrong.
        message: String,
    },
}

/// Snapshot/restore hook implemented by each stateful component.
///
/// `collect` and `restore` compose independently: the orchestrator gathers
/// every hook's sub-blob under its [`blob_name`](CheckpointHook::blob_name)
/// and hands each back verbatim on restore.
#[async_trait]
pub trait CheckpointHook: Send + Sync {
    /// Stable key for this component's sub-blob.
    fn blob_name(&self) -> &'static str;

    /// Snapshot volatile state into a JSON blob.
    async fn collect(&self) -> Result<Value, CheckpointError>;

    /// Repopulate volatile state from a previously collected blob.
    async fn restore(&self, blob: Value) -> Result<(), CheckpointError>;
}

/// Collect every hook's sub-blob into one composite checkpoint object.
pub async fn collect_all(hooks: &[&dyn CheckpointHook]) -> Result<Value, CheckpointError> {
    let mut composite = Map::new();
    for hook in hooks {
        let blob = hook.collect().await?;
        let _ = composite.insert(hook.blob_name().to_string(), blob);
    }
    Ok(Value::Object(composite))
}

/// Restore every hook from its named sub-blob in a composite checkpoint.
///
/// Hooks whose name is absent from the composite are skipped — components
/// added after the checkpoint was taken start empty.
pub async fn restore_all(
    hooks: &[&dyn CheckpointHook],
    composite: &Value,
) -> Result<(), CheckpointError> {
    for hook in hooks {
        if let Some(blob) = composite.get(hook.blob_name()) {
            hook.restore(blob.clone()).await?;
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
