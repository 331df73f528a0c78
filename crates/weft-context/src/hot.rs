//! The hot tier: recent contexts in process memory.
//!
//! Entries are keyed by reference with an insertion-ordered age queue
//! alongside, so the migration sweep can find aged entries without scanning
//! the whole map. Contexts are immutable; eviction happens only after the
//! cold copy is acknowledged (copy-then-evict), so a reference present in
//! the age queue is always resolvable.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};

use weft_core::EventContext;

/// In-memory recent-context storage.
#[derive(Default)]
pub struct HotTier {
    entries: HashMap<String, EventContext>,
    age: VecDeque<(DateTime<Utc>, String)>,
}

impl HotTier {
    /// Create an empty hot tier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a context under its reference.
    pub fn insert(&mut self, reference: String, ctx: EventContext) {
        self.age.push_back((ctx.timestamp, reference.clone()));
        let _ = self.entries.insert(reference, ctx);
    }

    /// Look up a context by reference.
    #[must_use]
    pub fn get(&self, reference: &str) -> Option<&EventContext> {
        self.entries.get(reference)
    }

    /// References and contexts older than the cutoff, in age order. Entries
    /// stay resident until [`evict`](HotTier::evict) — this is the copy half
    /// of copy-then-evict. A full filter, not a prefix scan: restored
    /// checkpoint entries may sit out of order in the queue.
    #[must_use]
    pub fn aged(&self, cutoff: DateTime<Utc>) -> Vec<(String, EventContext)> {
        self.age
            .iter()
            .filter(|(timestamp, _)| *timestamp < cutoff)
            .filter_map(|(_, reference)| {
                self.entries
                    .get(reference)
                    .map(|ctx| (reference.clone(), ctx.clone()))
            })
            .collect()
    }

    /// Remove the given references after their cold copies are durable.
    pub fn evict(&mut self, references: &[String]) {
        for reference in references {
            let _ = self.entries.remove(reference);
        }
        self.age
            .retain(|(_, reference)| self.entries.contains_key(reference));
    }

    /// Number of resident contexts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the tier is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy-on-read snapshot of every resident entry (for iteration,
    /// checkpointing, and queries without holding the lock).
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, EventContext)> {
        self.entries
            .iter()
            .map(|(reference, ctx)| (reference.clone(), ctx.clone()))
            .collect()
    }
}

impl std::fmt::Debug for HotTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotTier").field("len", &self.len()).finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
