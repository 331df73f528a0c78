//! # weft-observe
//!
//! The observation/subscription layer: lets one actor watch another actor's
//! event traffic through the router's dispatch-observer seam.
//!
//! Matched events produce `observe:begin`/`observe:end` notifications
//! delivered per subscription through an [`ObserverSink`](sink::ObserverSink),
//! shaped by pattern/content/source filters, probabilistic sampling, and a
//! per-subscription token bucket. Repeated delivery failures open a
//! per-observer circuit breaker. Terminations cascade: target-side
//! subscriptions notify their observers, observer-side ones vanish silently.
//!
//! History and replay are served from the context manager's cold event log —
//! persistence stays in one place.

#![deny(unsafe_code)]

pub mod breaker;
pub mod errors;
pub mod gateway;
pub mod manager;
pub mod rate_limit;
pub mod sink;
pub mod types;

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use errors::{ObserveError, Result};
pub use gateway::ObservationGateway;
pub use manager::{HistoryFilter, LifecycleHandler, ObservationManager, ObserveConfig};
pub use rate_limit::TokenBucket;
pub use sink::{ChannelSink, ObserverSink, RouterSink, SinkError};
pub use types::{NoticeKind, ObservationNotice, RateLimitSpec, Subscription, SubscriptionFilter};
