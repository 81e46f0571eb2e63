//! Token bucket implementation.

use std::time::Duration;
use tokio::time::Instant;

/// A fixed-capacity token bucket with continuous refill.
///
/// The bucket models the burst allowance of an API: up to `capacity`
/// requests may be made back-to-back, after which requests are admitted at
/// `refill_rate` tokens per second. The token count always stays within
/// `[0, capacity]`.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Maximum number of tokens the bucket can hold
    capacity: u32,
    /// Tokens currently available
    tokens: f64,
    /// Tokens added per second
    refill_rate: f64,
    /// When tokens were last credited
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a new bucket that starts full.
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self::with_instant(capacity, refill_rate, Instant::now())
    }

    /// Create a new full bucket whose refill clock starts at `now`.
    pub fn with_instant(capacity: u32, refill_rate: f64, now: Instant) -> Self {
        Self {
            capacity,
            tokens: capacity as f64,
            refill_rate: refill_rate.max(0.0),
            last_refill: now,
        }
    }

    /// Try to take `n` tokens.
    pub fn consume(&mut self, n: u32) -> bool {
        self.consume_at(n, Instant::now())
    }

    /// Try to take `n` tokens at the given instant.
    ///
    /// A failed attempt leaves the token count untouched apart from the refill.
    pub fn consume_at(&mut self, n: u32, now: Instant) -> bool {
        self.refill(now);

        let needed = n as f64;
        if self.tokens >= needed {
            self.tokens -= needed;
            true
        } else {
            false
        }
    }

    /// Minimum time until `n` tokens are available.
    pub fn wait_time(&mut self, n: u32) -> Duration {
        self.wait_time_at(n, Instant::now())
    }

    /// Minimum time, measured from `now`, until `n` tokens are available.
    ///
    /// Returns [`Duration::MAX`] when the bucket can never satisfy the request,
    /// either because `n` exceeds the capacity or because nothing refills it.
    pub fn wait_time_at(&mut self, n: u32, now: Instant) -> Duration {
        self.refill(now);

        let needed = n as f64;
        if self.tokens >= needed {
            return Duration::ZERO;
        }
        if n > self.capacity || self.refill_rate <= 0.0 {
            return Duration::MAX;
        }

        Duration::try_from_secs_f64((needed - self.tokens) / self.refill_rate)
            .unwrap_or(Duration::MAX)
    }

    /// Credit `n` tokens back, capped at capacity.
    pub fn refund(&mut self, n: u32) {
        self.tokens = (self.tokens + n as f64).min(self.capacity as f64);
    }

    /// Change the refill rate.
    ///
    /// Tokens accrued up to `now` are credited at the old rate first so the
    /// new rate only applies going forward.
    pub fn set_refill_rate_at(&mut self, refill_rate: f64, now: Instant) {
        self.refill(now);
        self.refill_rate = refill_rate.max(0.0);
    }

    /// Tokens that would be available at `now`, without mutating the bucket.
    pub fn tokens_at(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        (self.tokens + elapsed * self.refill_rate).min(self.capacity as f64)
    }

    /// Tokens as of the last refill.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Get the capacity of this bucket.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Get the refill rate in tokens per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    fn refill(&mut self, now: Instant) {
        // Monotonic clock, but a caller-supplied instant may still lag behind.
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity as f64);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }
}
