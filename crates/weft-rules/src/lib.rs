//! # weft-rules
//!
//! The dynamic routing rule service: a CRUD layer over runtime-addable
//! transformer rules.
//!
//! Every accepted rule is compiled into a live
//! [`CompiledTransformer`](weft_router::CompiledTransformer) registration;
//! record and registration are mutated under one lock so callers never
//! observe one without the other. Mutations are gated by the
//! `routing_control` capability, mirrored to the durable store, and recorded
//! in an immutable audit trail that outlives the rules themselves. A
//! background sweep retires TTL rules; checkpoint restore reconstructs both
//! the records and the live registrations.

#![deny(unsafe_code)]

pub mod capability;
pub mod compile;
pub mod errors;
pub mod gateway;
pub mod service;
pub mod types;

pub use capability::{CapabilityChecker, StaticCapabilities};
pub use errors::{Result, RuleError};
pub use gateway::RoutingGateway;
pub use service::{RuleService, RuleServiceConfig};
pub use types::{RoutingRule, RuleFilter, RuleSpec, RuleUpdate};
