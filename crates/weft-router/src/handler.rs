//! Event handler trait.
//!
//! Defines the [`EventHandler`] trait that all router destinations implement.
//! Handlers are registered with the [`HandlerRegistry`](crate::registry::HandlerRegistry)
//! and invoked concurrently by the [`EventRouter`](crate::router::EventRouter).

use async_trait::async_trait;
use serde_json::Value;

use weft_core::pattern::EventPattern;
use weft_core::{Event, EventContext};

use crate::errors::HandlerError;

/// A router destination.
///
/// Implementations are registered by name in the handler registry; on emit,
/// every handler whose [`pattern`](EventHandler::pattern) matches the event
/// name runs — dispatch is a fan-out, not a pick-one.
///
/// # Errors
///
/// Errors never crash the router. Each is wrapped into a structured
/// `system:error` emission, and the caller receives the error in its
/// dispatch outcome.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Unique name for this handler. Re-registering a name replaces the
    /// previous handler.
    fn name(&self) -> &str;

    /// Which event names this handler receives.
    fn pattern(&self) -> EventPattern;

    /// Per-handler execution timeout override in milliseconds.
    fn timeout_ms(&self) -> Option<u64> {
        None
    }

    /// Process one event with its lineage context, returning a result payload.
    async fn handle(&self, event: &Event, ctx: &EventContext) -> Result<Value, HandlerError>;
}
