//! # weft-core
//!
//! Foundation types for the Weft event core.
//!
//! This crate provides the shared vocabulary that all other Weft crates depend on:
//!
//! - **Branded IDs**: `AgentId`, `SessionId`, `RuleId`, … as newtypes for type safety
//! - **Events**: the ephemeral [`Event`](event::Event) record emitted into the router
//! - **Contexts**: [`EventContext`](context::EventContext) lineage records with
//!   depth/correlation invariants and opaque references
//! - **Patterns**: [`EventPattern`](pattern::EventPattern) exact/wildcard matching
//! - **Error events**: the normalized `system:error` payload shape
//! - **Checkpoint**: the [`CheckpointHook`](checkpoint::CheckpointHook) trait that
//!   components implement for explicit snapshot/restore

#![deny(unsafe_code)]

pub mod checkpoint;
pub mod constants;
pub mod context;
pub mod error_event;
pub mod event;
pub mod ids;
pub mod pattern;

pub use context::{EventContext, RefCategory};
pub use error_event::{ErrorEventPayload, ErrorKind};
pub use event::Event;
pub use ids::{AgentId, ClientId, CorrelationId, EventId, RuleId, SessionId, SubscriptionId};
pub use pattern::{EventPattern, PatternError};
