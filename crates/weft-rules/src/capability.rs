//! Capability checking seam.
//!
//! The permission service is an external collaborator; the rule service only
//! needs a yes/no answer for `(actor, capability)`. Production injects a
//! client for the real service; tests and single-process deployments use
//! [`StaticCapabilities`].

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;

/// Answers capability checks for actors.
#[async_trait]
pub trait CapabilityChecker: Send + Sync {
    /// Whether the actor holds the capability.
    async fn has_capability(&self, actor: &str, capability: &str) -> bool;
}

/// In-memory capability table.
#[derive(Default)]
pub struct StaticCapabilities {
    grants: RwLock<HashMap<String, HashSet<String>>>,
}

impl StaticCapabilities {
    /// Create an empty table (no actor holds anything).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant a capability to an actor.
    pub fn grant(&self, actor: &str, capability: &str) {
        let _ = self
            .grants
            .write()
            .entry(actor.to_string())
            .or_default()
            .insert(capability.to_string());
    }

    /// Revoke a capability from an actor.
    pub fn revoke(&self, actor: &str, capability: &str) {
        if let Some(set) = self.grants.write().get_mut(actor) {
            let _ = set.remove(capability);
        }
    }
}

#[async_trait]
impl CapabilityChecker for StaticCapabilities {
    async fn has_capability(&self, actor: &str, capability: &str) -> bool {
        self.grants
            .read()
            .get(actor)
            .is_some_and(|set| set.contains(capability))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
