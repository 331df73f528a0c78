//! Event lineage contexts.
//!
//! An [`EventContext`] records the causal lineage of an event: its own
//! `event_id`, the chain's shared `correlation_id` and `root_event_id`, the
//! parent link, and a depth counter that increases by exactly one per causal
//! hop. Contexts are addressed by opaque references issued at creation time
//! (`ctx_<category>_<suffix>`); callers never construct or parse references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::ids::{AgentId, ClientId, CorrelationId, EventId, SessionId};

/// Coarse scope category embedded in a context reference.
///
/// Derived from which scope fields are populated; purely a debugging aid —
/// references stay opaque to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefCategory {
    /// Context carries an `agent_id`.
    Agent,
    /// Context carries a `session_id` but no agent.
    Session,
    /// Context carries a `client_id` only.
    Client,
    /// No scope fields; an internal/system emission.
    System,
}

impl RefCategory {
    /// Short tag used inside reference strings.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Session => "session",
            Self::Client => "client",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for RefCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lineage and scope metadata for one emitted event.
///
/// Invariants:
/// - `depth` of a derived child is exactly `depth(parent) + 1`
/// - `root_event_id` and `correlation_id` are inherited unchanged across an
///   entire derivation chain
/// - a root context has `parent_event_id = None`, `depth = 0`, and
///   `root_event_id == event_id`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventContext {
    /// ID of the event this context was created for.
    pub event_id: EventId,
    /// Shared across every event in one causal chain.
    pub correlation_id: CorrelationId,
    /// Direct causal parent (absent at the chain root).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_event_id: Option<EventId>,
    /// First ancestor of the chain, inherited unchanged.
    pub root_event_id: EventId,
    /// Causal hops from the chain root.
    pub depth: u32,
    /// Emitting agent, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    /// Owning session, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Originating client connection, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    /// Context creation time.
    pub timestamp: DateTime<Utc>,
    /// Open extension fields carried verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EventContext {
    /// Create a root context (depth 0, its own event as chain root).
    #[must_use]
    pub fn root() -> Self {
        let event_id = EventId::new();
        Self {
            correlation_id: CorrelationId::new(),
            parent_event_id: None,
            root_event_id: event_id.clone(),
            event_id,
            depth: 0,
            agent_id: None,
            session_id: None,
            client_id: None,
            timestamp: Utc::now(),
            extra: Map::new(),
        }
    }

    /// Derive a child context one causal hop below `self`.
    ///
    /// The child gets a fresh `event_id`, inherits `correlation_id`,
    /// `root_event_id`, scope fields, and extension fields, and increments
    /// `depth` by exactly one.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            event_id: EventId::new(),
            correlation_id: self.correlation_id.clone(),
            parent_event_id: Some(self.event_id.clone()),
            root_event_id: self.root_event_id.clone(),
            depth: self.depth + 1,
            agent_id: self.agent_id.clone(),
            session_id: self.session_id.clone(),
            client_id: self.client_id.clone(),
            timestamp: Utc::now(),
            extra: self.extra.clone(),
        }
    }

    /// Set the emitting agent.
    #[must_use]
    pub fn with_agent(mut self, agent_id: impl Into<AgentId>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Set the owning session.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<SessionId>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set the originating client.
    #[must_use]
    pub fn with_client(mut self, client_id: impl Into<ClientId>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Attach an extension field.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        let _ = self.extra.insert(key.into(), value);
        self
    }

    /// Scope category for reference generation.
    #[must_use]
    pub fn category(&self) -> RefCategory {
        if self.agent_id.is_some() {
            RefCategory::Agent
        } else if self.session_id.is_some() {
            RefCategory::Session
        } else if self.client_id.is_some() {
            RefCategory::Client
        } else {
            RefCategory::System
        }
    }

    /// Mint a fresh opaque reference string for this context.
    ///
    /// Format: `ctx_<category>_<uuidv7>`. The suffix is time-ordered, which
    /// keeps references human-debuggable without being parseable contract.
    #[must_use]
    pub fn mint_ref(&self) -> String {
        format!("ctx_{}_{}", self.category(), Uuid::now_v7().simple())
    }
}

impl Default for EventContext {
    fn default() -> Self {
        Self::root()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
