//! Pending async-transform tracking.
//!
//! When an async transformer fires, the router parks a [`PendingTransform`]
//! keyed by the generated correlation token. The response event (any event
//! echoing the token, other than the request itself) claims the entry; a
//! timer reaps entries whose deadline passes first. Claim and reap race on
//! the same `DashMap::remove`, so exactly one side wins.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use weft_core::{EventContext, RuleId};

/// Payload key carrying the correlation token in mapped and response events.
pub const CORRELATION_TOKEN_KEY: &str = "correlationToken";

/// A parked async transform awaiting its response event.
#[derive(Clone, Debug)]
pub struct PendingTransform {
    /// Rule that fired the transform.
    pub rule_id: RuleId,
    /// Event name the request was emitted as.
    pub target_event: String,
    /// Event name the response is routed to.
    pub completion_event: String,
    /// Context of the original source event; the completion derives from it.
    pub origin: EventContext,
    /// Context reference of the original source event.
    pub origin_ref: Option<String>,
    /// When the transform was parked.
    pub created_at: DateTime<Utc>,
}

/// Token-keyed table of in-flight async transforms.
#[derive(Default)]
pub struct PendingTransforms {
    entries: DashMap<String, PendingTransform>,
}

impl PendingTransforms {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a fresh correlation token.
    #[must_use]
    pub fn mint_token() -> String {
        format!("tok_{}", Uuid::now_v7().simple())
    }

    /// Park a transform under its token.
    pub fn insert(&self, token: String, pending: PendingTransform) {
        let _ = self.entries.insert(token, pending);
    }

    /// Claim the entry for a response event. The request event itself (the
    /// transformer's own target) never claims its entry.
    pub fn claim(&self, token: &str, event_name: &str) -> Option<PendingTransform> {
        let guard = self.entries.get(token)?;
        if guard.target_event == event_name {
            return None;
        }
        drop(guard);
        self.entries.remove(token).map(|(_, pending)| pending)
    }

    /// Remove an entry on timeout. Returns it if the response never arrived.
    pub fn reap(&self, token: &str) -> Option<PendingTransform> {
        self.entries.remove(token).map(|(_, pending)| pending)
    }

    /// Number of in-flight transforms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no transforms are in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for PendingTransforms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTransforms")
            .field("in_flight", &self.len())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_pending() -> PendingTransform {
        PendingTransform {
            rule_id: RuleId::from("r1"),
            target_event: "enrich:request".to_string(),
            completion_event: "enrich:done".to_string(),
            origin: EventContext::root(),
            origin_ref: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn tokens_are_unique() {
        assert_ne!(PendingTransforms::mint_token(), PendingTransforms::mint_token());
        assert!(PendingTransforms::mint_token().starts_with("tok_"));
    }

    #[test]
    fn claim_by_response_event() {
        let table = PendingTransforms::new();
        table.insert("tok_1".to_string(), make_pending());

        let claimed = table.claim("tok_1", "enrich:response").unwrap();
        assert_eq!(claimed.completion_event, "enrich:done");
        assert!(table.is_empty());
    }

    #[test]
    fn request_event_does_not_claim_its_own_entry() {
        let table = PendingTransforms::new();
        table.insert("tok_1".to_string(), make_pending());

        assert!(table.claim("tok_1", "enrich:request").is_none());
        assert_eq!(table.len(), 1, "entry stays parked");
    }

    #[test]
    fn claim_unknown_token_is_none() {
        let table = PendingTransforms::new();
        assert!(table.claim("tok_ghost", "enrich:response").is_none());
    }

    #[test]
    fn reap_removes_entry() {
        let table = PendingTransforms::new();
        table.insert("tok_1".to_string(), make_pending());

        assert!(table.reap("tok_1").is_some());
        assert!(table.reap("tok_1").is_none(), "second reap finds nothing");
    }

    #[test]
    fn claim_then_reap_only_one_wins() {
        let table = PendingTransforms::new();
        table.insert("tok_1".to_string(), make_pending());

        assert!(table.claim("tok_1", "enrich:response").is_some());
        assert!(table.reap("tok_1").is_none());
    }
}
