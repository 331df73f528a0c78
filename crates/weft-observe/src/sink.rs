//! Observer delivery sinks.
//!
//! Notifications reach observers through an [`ObserverSink`]. Production
//! wires [`RouterSink`] (notices re-enter the router as `observe:*` events);
//! tests and in-process observers use [`ChannelSink`] (one bounded inbox per
//! registered observer). Sink failures feed the per-observer circuit breaker.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use weft_core::constants::names;
use weft_core::{AgentId, EventContext};
use weft_router::EventRouter;

use crate::types::{NoticeKind, ObservationNotice};

/// A failed delivery attempt.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    /// The observer has no registered inbox.
    #[error("observer '{0}' has no inbox")]
    NoInbox(String),

    /// The observer's inbox is gone or full.
    #[error("delivery to observer '{0}' failed")]
    DeliveryFailed(String),
}

/// Delivers one notification to one observer.
#[async_trait]
pub trait ObserverSink: Send + Sync {
    /// Attempt delivery. Errors feed the observer's circuit breaker.
    async fn deliver(&self, notice: ObservationNotice) -> Result<(), SinkError>;
}

/// Sink that re-enters the router: notices become `observe:*` events scoped
/// to the observer.
pub struct RouterSink {
    router: Arc<EventRouter>,
}

impl RouterSink {
    /// Create a sink emitting into the given router.
    #[must_use]
    pub fn new(router: Arc<EventRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl ObserverSink for RouterSink {
    async fn deliver(&self, notice: ObservationNotice) -> Result<(), SinkError> {
        let event_name = match notice.kind {
            NoticeKind::Begin => names::OBSERVE_BEGIN,
            NoticeKind::End => names::OBSERVE_END,
            NoticeKind::TargetTerminated => names::OBSERVE_TARGET_TERMINATED,
            NoticeKind::Replay => names::OBSERVE_REPLAY,
        };
        let ctx = EventContext::root().with_agent(notice.observer.clone());
        let payload =
            serde_json::to_value(&notice).map_err(|_| {
                SinkError::DeliveryFailed(notice.observer.as_str().to_string())
            })?;
        let _ = self.router.emit_with_context(event_name, payload, ctx).await;
        Ok(())
    }
}

/// Sink backed by one bounded channel per observer.
#[derive(Default)]
pub struct ChannelSink {
    inboxes: RwLock<HashMap<AgentId, mpsc::Sender<ObservationNotice>>>,
}

impl ChannelSink {
    /// Create a sink with no registered inboxes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer's inbox, returning the receiving half.
    pub fn register(&self, observer: &AgentId, capacity: usize) -> mpsc::Receiver<ObservationNotice> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let _ = self.inboxes.write().insert(observer.clone(), tx);
        rx
    }

    /// Remove an observer's inbox.
    pub fn unregister(&self, observer: &AgentId) {
        let _ = self.inboxes.write().remove(observer);
    }
}

#[async_trait]
impl ObserverSink for ChannelSink {
    async fn deliver(&self, notice: ObservationNotice) -> Result<(), SinkError> {
        let sender = {
            self.inboxes
                .read()
                .get(&notice.observer)
                .cloned()
                .ok_or_else(|| SinkError::NoInbox(notice.observer.as_str().to_string()))?
        };
        let observer = notice.observer.as_str().to_string();
        sender
            .send(notice)
            .await
            .map_err(|_| SinkError::DeliveryFailed(observer))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_notice(observer: &str, kind: NoticeKind) -> ObservationNotice {
        ObservationNotice {
            kind,
            observer: AgentId::from(observer),
            target: AgentId::from("target"),
            event_name: "task:done".to_string(),
            payload: serde_json::json!({}),
            context_ref: None,
            subscription_id: None,
            result: None,
            error: None,
            duration_ms: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn channel_sink_delivers_to_registered_inbox() {
        let sink = ChannelSink::new();
        let mut rx = sink.register(&AgentId::from("a"), 8);

        sink.deliver(make_notice("a", NoticeKind::Begin)).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, NoticeKind::Begin);
    }

    #[tokio::test]
    async fn channel_sink_fails_without_inbox() {
        let sink = ChannelSink::new();
        let err = sink
            .deliver(make_notice("ghost", NoticeKind::Begin))
            .await
            .unwrap_err();
        assert_eq!(err, SinkError::NoInbox("ghost".to_string()));
    }

    #[tokio::test]
    async fn channel_sink_fails_after_unregister() {
        let sink = ChannelSink::new();
        let _rx = sink.register(&AgentId::from("a"), 8);
        sink.unregister(&AgentId::from("a"));
        assert!(sink.deliver(make_notice("a", NoticeKind::End)).await.is_err());
    }

    #[tokio::test]
    async fn router_sink_emits_observe_events() {
        use std::sync::Mutex;
        use weft_core::Event;
        use weft_core::pattern::EventPattern;
        use weft_router::{
            EventHandler, HandlerError, MemoryContextTracker, RouterConfig,
        };

        struct Collector(Arc<Mutex<Vec<String>>>);

        #[async_trait]
        impl EventHandler for Collector {
            fn name(&self) -> &str {
                "collector"
            }
            fn pattern(&self) -> EventPattern {
                EventPattern::parse("observe:*").unwrap()
            }
            async fn handle(
                &self,
                event: &Event,
                _ctx: &EventContext,
            ) -> Result<serde_json::Value, HandlerError> {
                self.0.lock().unwrap().push(event.name.clone());
                Ok(serde_json::Value::Null)
            }
        }

        let router = EventRouter::new(
            RouterConfig::default(),
            Arc::new(MemoryContextTracker::new()),
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        router.register_handler(Arc::new(Collector(Arc::clone(&seen))));

        let sink = RouterSink::new(Arc::clone(&router));
        sink.deliver(make_notice("a", NoticeKind::Begin)).await.unwrap();
        sink.deliver(make_notice("a", NoticeKind::End)).await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["observe:begin".to_string(), "observe:end".to_string()]
        );
    }
}
