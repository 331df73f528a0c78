//! Per-observer circuit breaking.
//!
//! Repeated delivery failures within a rolling window open the breaker:
//! subsequent notifications are skipped without retry. After a cooldown the
//! breaker half-opens (one probe delivery allowed); the next success closes
//! it fully, another failure re-opens it.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Breaker tunables.
#[derive(Clone, Debug)]
pub struct BreakerConfig {
    /// Failures within the window that open the breaker.
    pub failure_threshold: u32,
    /// Rolling failure window.
    pub window: Duration,
    /// Cooldown before an open breaker half-opens.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Breaker state machine position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerState {
    /// Deliveries flow normally.
    Closed,
    /// Deliveries are skipped until the cooldown passes.
    Open,
    /// One probe delivery is allowed through.
    HalfOpen,
}

/// Failure-isolation state for one observer.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    half_open: bool,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            failures: VecDeque::new(),
            opened_at: None,
            half_open: false,
        }
    }

    /// Current state, advancing open→half-open when the cooldown has passed.
    pub fn state(&mut self) -> BreakerState {
        if let Some(opened_at) = self.opened_at {
            if opened_at.elapsed() >= self.config.cooldown {
                self.opened_at = None;
                self.half_open = true;
            }
        }
        if self.opened_at.is_some() {
            BreakerState::Open
        } else if self.half_open {
            BreakerState::HalfOpen
        } else {
            BreakerState::Closed
        }
    }

    /// Whether a delivery should be attempted right now.
    pub fn allows_delivery(&mut self) -> bool {
        self.state() != BreakerState::Open
    }

    /// Record a successful delivery: fully closes the breaker.
    pub fn record_success(&mut self) {
        self.failures.clear();
        self.opened_at = None;
        self.half_open = false;
    }

    /// Record a failed delivery. A half-open probe failure re-opens
    /// immediately; otherwise the rolling window decides.
    pub fn record_failure(&mut self) {
        let now = Instant::now();
        if self.half_open {
            self.half_open = false;
            self.opened_at = Some(now);
            return;
        }

        self.failures.push_back(now);
        while let Some(front) = self.failures.front() {
            if now.duration_since(*front) > self.config.window {
                let _ = self.failures.pop_front();
            } else {
                break;
            }
        }
        if self.failures.len() >= self.config.failure_threshold as usize {
            self.opened_at = Some(now);
            self.failures.clear();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
