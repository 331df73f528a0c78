//! Per-subscription rate limiting.
//!
//! Token bucket: capacity `max`, refilled continuously at `max / window`.
//! Excess observation notifications are dropped, never queued — the
//! underlying event still processes normally, only the observation
//! side-channel is throttled.

use std::time::{Duration, Instant};

/// A token bucket over a rolling window.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket allowing `max` acquisitions per `window`.
    #[must_use]
    pub fn new(max: u32, window: Duration) -> Self {
        let capacity = f64::from(max.max(1));
        let window_secs = window.as_secs_f64().max(f64::EPSILON);
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: capacity / window_secs,
            last_refill: Instant::now(),
        }
    }

    /// Take one token if available.
    pub fn try_acquire(&mut self) -> bool {
        self.refill(Instant::now());
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently available (floored).
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn available(&mut self) -> u32 {
        self.refill(Instant::now());
        let tokens = self.tokens.floor();
        if tokens <= 0.0 {
            0
        } else if tokens >= f64::from(u32::MAX) {
            u32::MAX
        } else {
            tokens as u32
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
