//! Context tracking seam.
//!
//! The router mints a context reference for every emission and threads the
//! context object explicitly through dispatch. Storage and resolution live
//! behind [`ContextTracker`] so the router never depends on a concrete
//! context store — production wires in the context manager, tests use
//! [`MemoryContextTracker`].

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use weft_core::EventContext;

/// Registration and resolution of event contexts.
#[async_trait]
pub trait ContextTracker: Send + Sync {
    /// Store a context and return its freshly minted opaque reference.
    async fn register(&self, ctx: &EventContext) -> String;

    /// Resolve a reference back to its context, if known.
    async fn resolve(&self, reference: &str) -> Option<EventContext>;
}

/// In-memory tracker for tests and standalone router use.
#[derive(Default)]
pub struct MemoryContextTracker {
    contexts: RwLock<HashMap<String, EventContext>>,
}

impl MemoryContextTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored contexts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contexts.read().len()
    }

    /// Whether the tracker is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contexts.read().is_empty()
    }
}

#[async_trait]
impl ContextTracker for MemoryContextTracker {
    async fn register(&self, ctx: &EventContext) -> String {
        let reference = ctx.mint_ref();
        let _ = self
            .contexts
            .write()
            .insert(reference.clone(), ctx.clone());
        reference
    }

    async fn resolve(&self, reference: &str) -> Option<EventContext> {
        self.contexts.read().get(reference).cloned()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_and_resolve() {
        let tracker = MemoryContextTracker::new();
        let ctx = EventContext::root().with_agent("a1");
        let reference = tracker.register(&ctx).await;

        let resolved = tracker.resolve(&reference).await.unwrap();
        assert_eq!(resolved, ctx);
    }

    #[tokio::test]
    async fn resolve_unknown_is_none() {
        let tracker = MemoryContextTracker::new();
        assert!(tracker.resolve("ctx_agent_missing").await.is_none());
    }

    #[tokio::test]
    async fn each_registration_mints_unique_ref() {
        let tracker = MemoryContextTracker::new();
        let ctx = EventContext::root();
        let a = tracker.register(&ctx).await;
        let b = tracker.register(&ctx).await;
        assert_ne!(a, b);
        assert_eq!(tracker.len(), 2);
    }
}
