//! # weft-context
//!
//! The context reference manager: creates, stores, and resolves lineage
//! records behind opaque `ctx_*` references.
//!
//! Storage is two-tiered. The **hot tier** is an in-process map bounded by a
//! retention window; the **cold tier** is the durable `weft-store` contexts
//! table with secondary indexes. A background migration copies aged entries
//! cold-first and evicts only after the write is acknowledged, so resolution
//! is idempotent across the tier boundary.
//!
//! The manager also records routed event traffic into the cold `event_log`
//! (feeding observation history/replay) and implements the router's
//! [`ContextTracker`](weft_router::ContextTracker) seam plus the
//! [`CheckpointHook`](weft_core::checkpoint::CheckpointHook) for explicit
//! snapshot/restore of the hot tier.

#![deny(unsafe_code)]

pub mod errors;
pub mod gateway;
pub mod hot;
pub mod manager;
pub mod writer;

pub use errors::{ContextError, Result};
pub use gateway::ContextGateway;
pub use manager::{ContextConfig, ContextManager, ContextQueryParams, ContextStats, ResolvedContext};
