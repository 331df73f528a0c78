//! Dispatch observation seam.
//!
//! The observation manager wraps dispatch with begin/end notifications
//! without the router knowing about subscriptions. At most one observer is
//! installed; it sees every emission with its context and, afterwards, a
//! summary of handler results.

use async_trait::async_trait;
use serde_json::Value;

use weft_core::{Event, EventContext};

use crate::errors::HandlerError;

/// Per-handler result included in a dispatch summary.
#[derive(Clone, Debug)]
pub struct HandlerOutcome {
    /// Handler name.
    pub handler: String,
    /// Result payload or the failure that was wrapped onto `system:error`.
    pub result: Result<Value, HandlerError>,
    /// Wall-clock execution time in milliseconds.
    pub duration_ms: u64,
}

/// Summary of one dispatch, provided to the observer after handlers finish.
#[derive(Clone, Debug, Default)]
pub struct DispatchSummary {
    /// Per-handler outcomes in completion order.
    pub results: Vec<HandlerOutcome>,
    /// Total dispatch duration in milliseconds.
    pub duration_ms: u64,
}

impl DispatchSummary {
    /// First handler error, if any handler failed.
    #[must_use]
    pub fn first_error(&self) -> Option<&HandlerError> {
        self.results.iter().find_map(|r| r.result.as_ref().err())
    }

    /// First successful handler result, if any.
    #[must_use]
    pub fn first_result(&self) -> Option<&Value> {
        self.results.iter().find_map(|r| r.result.as_ref().ok())
    }
}

/// Hook invoked around every dispatch.
#[async_trait]
pub trait DispatchObserver: Send + Sync {
    /// Called before matching handlers run.
    async fn before_dispatch(&self, event: &Event, ctx: &EventContext);

    /// Called after all matching handlers complete.
    async fn after_dispatch(&self, event: &Event, ctx: &EventContext, summary: &DispatchSummary);
}
