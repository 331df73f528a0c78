//! # weft-router
//!
//! The dispatch core of the Weft event bus.
//!
//! [`EventRouter`](router::EventRouter) receives `(name, payload, context)`,
//! finds *all* matching destinations (fan-out, never pick-one), runs handlers
//! concurrently, and applies compiled transformers to produce derived
//! emissions with depth-bounded lineage. Failures never propagate raw: they
//! are normalized onto the `system:error` channel while the caller still
//! receives a structured outcome.
//!
//! - **Handlers**: [`EventHandler`](handler::EventHandler) implementations in a
//!   replace-by-name [`HandlerRegistry`](registry::HandlerRegistry)
//! - **Transformers**: [`CompiledTransformer`](transformer::CompiledTransformer)
//!   entries compiled from routing rules (condition tree + mapping template)
//! - **Async transforms**: correlation-token tracking with timeouts
//! - **Seams**: [`ContextTracker`](context_tracker::ContextTracker) for
//!   reference minting and [`DispatchObserver`](observer::DispatchObserver)
//!   for the observation layer

#![deny(unsafe_code)]

pub mod checkpoint_gateway;
pub mod condition;
pub mod context_tracker;
pub mod errors;
pub mod handler;
pub mod observer;
pub mod pending;
pub mod registry;
pub mod router;
pub mod template;
pub mod transformer;

pub use checkpoint_gateway::CheckpointGateway;
pub use condition::{CompareOp, Condition};
pub use context_tracker::{ContextTracker, MemoryContextTracker};
pub use errors::{ConditionError, HandlerError, TemplateError};
pub use handler::EventHandler;
pub use observer::{DispatchObserver, DispatchSummary, HandlerOutcome};
pub use registry::HandlerRegistry;
pub use router::{EmitOutcome, EventRouter, RouterConfig};
pub use template::MappingTemplate;
pub use transformer::{AsyncTransformSpec, CompiledTransformer};
