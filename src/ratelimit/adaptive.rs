//! Adaptive per-API limiter.
//!
//! An [`AdaptiveLimiter`] layers a [`TokenBucket`] (burst allowance) under a
//! [`SlidingWindowCounter`] (precise per-minute ceiling). Both gates must pass
//! for a request to be admitted.
//!
//! The effective rate moves within `[1, requests_per_minute]` driven by two
//! feedback signals:
//!
//! - a slow loop that, at most once per adjustment interval and only with
//!   enough samples, raises the rate when calls mostly succeed and lowers it
//!   when they mostly fail;
//! - an immediate penalty that cuts the rate whenever the upstream reports a
//!   rate-limit error.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use super::bucket::TokenBucket;
use super::rules::RateLimitConfig;
use super::window::SlidingWindowCounter;
use crate::error::{QuotaguardError, Result};

/// Length of the sliding window enforcing `requests_per_minute`.
const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Tuning for the feedback controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptivePolicy {
    /// Minimum seconds between periodic adjustments
    pub adjustment_interval_secs: u64,
    /// Outcomes required before a periodic adjustment is considered
    pub min_samples: u64,
    /// Success rate above which the rate is raised
    pub increase_threshold: f64,
    /// Success rate below which the rate is lowered
    pub decrease_threshold: f64,
    /// Multiplier applied when raising the rate
    pub increase_factor: f64,
    /// Multiplier applied when lowering the rate
    pub decrease_factor: f64,
    /// Multiplier applied immediately on a rate-limit error
    pub rate_limit_penalty: f64,
}

impl Default for AdaptivePolicy {
    fn default() -> Self {
        Self {
            adjustment_interval_secs: 300,
            min_samples: 10,
            increase_threshold: 0.95,
            decrease_threshold: 0.80,
            increase_factor: 1.10,
            decrease_factor: 0.80,
            rate_limit_penalty: 0.50,
        }
    }
}

impl AdaptivePolicy {
    /// The adjustment interval as a duration.
    pub fn adjustment_interval(&self) -> Duration {
        Duration::from_secs(self.adjustment_interval_secs)
    }

    /// Check that thresholds and factors are coherent.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(QuotaguardError::Config(msg.to_string()));

        if self.adjustment_interval_secs == 0 {
            return invalid("adjustment_interval_secs must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.increase_threshold)
            || !(0.0..=1.0).contains(&self.decrease_threshold)
        {
            return invalid("success rate thresholds must lie within [0, 1]");
        }
        if self.decrease_threshold > self.increase_threshold {
            return invalid("decrease_threshold must not exceed increase_threshold");
        }
        if self.increase_factor <= 0.0 || self.decrease_factor <= 0.0 {
            return invalid("adjustment factors must be positive");
        }
        if !(self.rate_limit_penalty > 0.0 && self.rate_limit_penalty < 1.0) {
            return invalid("rate_limit_penalty must lie within (0, 1)");
        }
        Ok(())
    }
}

/// Result of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request may proceed.
    Admitted,
    /// The request must wait at least `wait` before it can be admitted.
    Denied { wait: Duration },
}

impl Admission {
    /// Whether the request was admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Point-in-time view of one limiter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimiterStats {
    /// Effective requests per minute
    pub current_rate: u32,
    /// Configured requests per minute
    pub base_rate: u32,
    /// Burst tokens available right now
    pub tokens_available: f64,
    /// Successes since the last adjustment
    pub success_count: u64,
    /// Errors since the last adjustment
    pub error_count: u64,
    /// Requests admitted in the trailing minute
    pub requests_in_window: usize,
    /// Configured hourly ceiling (advisory)
    pub requests_per_hour: u32,
    /// Configured burst size
    pub burst_capacity: u32,
    /// Configured cooldown (advisory)
    pub cooldown_seconds: u32,
}

/// Mutable limiter state, guarded as a unit.
#[derive(Debug)]
struct LimiterState {
    current_rate: u32,
    success_count: u64,
    error_count: u64,
    last_adjustment: Instant,
    bucket: TokenBucket,
    window: SlidingWindowCounter,
}

impl LimiterState {
    fn set_rate(&mut self, rate: u32, now: Instant) {
        self.current_rate = rate;
        self.bucket.set_refill_rate_at(rate as f64 / 60.0, now);
        self.window.set_max_requests(rate);
    }
}

/// Rate limiter for a single external API.
///
/// All state sits behind one mutex so admission, refill and window updates
/// are atomic for concurrent callers of the same API. The lock is never held
/// across a wait.
#[derive(Debug)]
pub struct AdaptiveLimiter {
    /// API this limiter protects
    name: String,
    /// Baseline limits, never mutated
    base_config: RateLimitConfig,
    /// Upper bound for `current_rate`, at least 1
    max_rate: u32,
    /// Feedback tuning
    policy: AdaptivePolicy,
    state: Mutex<LimiterState>,
}

impl AdaptiveLimiter {
    /// Create a limiter with the default policy.
    pub fn new(name: impl Into<String>, config: RateLimitConfig) -> Self {
        Self::with_policy(name, config, AdaptivePolicy::default())
    }

    /// Create a limiter with a custom policy.
    pub fn with_policy(
        name: impl Into<String>,
        config: RateLimitConfig,
        policy: AdaptivePolicy,
    ) -> Self {
        Self::with_instant(name, config, policy, Instant::now())
    }

    /// Create a limiter whose clocks start at `now`.
    pub fn with_instant(
        name: impl Into<String>,
        config: RateLimitConfig,
        policy: AdaptivePolicy,
        now: Instant,
    ) -> Self {
        // Zero ceilings would stall admission forever; treat them as 1.
        let rate = config.requests_per_minute.max(1);
        let burst = config.burst_capacity.max(1);
        let state = LimiterState {
            current_rate: rate,
            success_count: 0,
            error_count: 0,
            last_adjustment: now,
            bucket: TokenBucket::with_instant(burst, rate as f64 / 60.0, now),
            window: SlidingWindowCounter::new(RATE_WINDOW, rate),
        };

        Self {
            name: name.into(),
            base_config: config,
            max_rate: rate,
            policy,
            state: Mutex::new(state),
        }
    }

    /// Try to admit one request.
    pub fn acquire(&self) -> bool {
        self.try_acquire_at(Instant::now()).is_admitted()
    }

    /// Try to admit one request at `now`.
    pub fn acquire_at(&self, now: Instant) -> bool {
        self.try_acquire_at(now).is_admitted()
    }

    /// Try to admit one request, reporting how long to wait on denial.
    pub fn try_acquire(&self) -> Admission {
        self.try_acquire_at(Instant::now())
    }

    /// Try to admit one request at `now`.
    ///
    /// The token bucket is consulted first; a bucket denial skips the window.
    /// If the window denies after the bucket admitted, the token is refunded.
    /// On denial the wait is the larger of the two gates' estimates.
    pub fn try_acquire_at(&self, now: Instant) -> Admission {
        let mut state = self.state.lock();

        if !state.bucket.consume_at(1, now) {
            let wait = state
                .bucket
                .wait_time_at(1, now)
                .max(state.window.wait_time_at(now));
            debug!(
                api = %self.name,
                wait_ms = wait.as_millis() as u64,
                "Burst allowance exhausted"
            );
            return Admission::Denied { wait };
        }

        let (allowed, window_wait) = state.window.is_allowed_at(now);
        if !allowed {
            state.bucket.refund(1);
            let wait = window_wait.max(state.bucket.wait_time_at(1, now));
            debug!(
                api = %self.name,
                rate = state.current_rate,
                wait_ms = wait.as_millis() as u64,
                "Per-minute ceiling reached"
            );
            return Admission::Denied { wait };
        }

        trace!(api = %self.name, "Request admitted");
        Admission::Admitted
    }

    /// How long until a request would be admitted, without consuming anything.
    pub fn wait_time_at(&self, now: Instant) -> Duration {
        let mut state = self.state.lock();
        state
            .bucket
            .wait_time_at(1, now)
            .max(state.window.wait_time_at(now))
    }

    /// Report a successful upstream call.
    pub fn record_success(&self) {
        self.record_success_at(Instant::now());
    }

    /// Report a successful upstream call at `now`.
    pub fn record_success_at(&self, now: Instant) {
        let mut state = self.state.lock();
        state.success_count += 1;
        self.maybe_adjust_rate(&mut state, now);
    }

    /// Report a failed upstream call.
    pub fn record_error(&self, is_rate_limit_error: bool) {
        self.record_error_at(is_rate_limit_error, Instant::now());
    }

    /// Report a failed upstream call at `now`.
    ///
    /// A rate-limit error cuts the rate immediately, independent of the
    /// periodic adjustment.
    pub fn record_error_at(&self, is_rate_limit_error: bool, now: Instant) {
        let mut state = self.state.lock();
        state.error_count += 1;

        if is_rate_limit_error {
            let old_rate = state.current_rate;
            let new_rate = scale_rate(old_rate, self.policy.rate_limit_penalty).min(self.max_rate);
            if new_rate != old_rate {
                state.set_rate(new_rate, now);
                info!(
                    api = %self.name,
                    old_rate,
                    new_rate,
                    "Upstream rate limit hit, backing off"
                );
            } else {
                debug!(
                    api = %self.name,
                    rate = old_rate,
                    "Upstream rate limit hit at minimum rate"
                );
            }
        }

        self.maybe_adjust_rate(&mut state, now);
    }

    fn maybe_adjust_rate(&self, state: &mut LimiterState, now: Instant) {
        let since_last = now.saturating_duration_since(state.last_adjustment);
        if since_last < self.policy.adjustment_interval() {
            return;
        }

        let total = state.success_count + state.error_count;
        if total < self.policy.min_samples {
            return;
        }

        let success_rate = state.success_count as f64 / total as f64;
        let base_rate = self.max_rate;
        let old_rate = state.current_rate;

        let new_rate = if success_rate > self.policy.increase_threshold {
            scale_rate(old_rate, self.policy.increase_factor)
                .max(old_rate.saturating_add(1))
                .min(base_rate)
        } else if success_rate < self.policy.decrease_threshold {
            scale_rate(old_rate, self.policy.decrease_factor).min(old_rate)
        } else {
            old_rate
        };
        let new_rate = new_rate.max(1);

        if new_rate != old_rate {
            state.set_rate(new_rate, now);
            info!(
                api = %self.name,
                old_rate,
                new_rate,
                success_rate,
                samples = total,
                "Adjusted rate"
            );
        } else {
            debug!(
                api = %self.name,
                rate = old_rate,
                success_rate,
                samples = total,
                "Rate unchanged"
            );
        }

        state.success_count = 0;
        state.error_count = 0;
        state.last_adjustment = now;
    }

    /// Snapshot of the limiter. Does not change any state.
    pub fn stats(&self) -> LimiterStats {
        self.stats_at(Instant::now())
    }

    /// Snapshot of the limiter as seen at `now`.
    pub fn stats_at(&self, now: Instant) -> LimiterStats {
        let state = self.state.lock();
        LimiterStats {
            current_rate: state.current_rate,
            base_rate: self.base_config.requests_per_minute,
            tokens_available: state.bucket.tokens_at(now),
            success_count: state.success_count,
            error_count: state.error_count,
            requests_in_window: state.window.requests_in_window_at(now),
            requests_per_hour: self.base_config.requests_per_hour,
            burst_capacity: self.base_config.burst_capacity,
            cooldown_seconds: self.base_config.cooldown_seconds,
        }
    }

    /// Get the effective requests per minute.
    pub fn current_rate(&self) -> u32 {
        self.state.lock().current_rate
    }

    /// Get the refill rate of the burst bucket, in tokens per second.
    pub fn refill_rate(&self) -> f64 {
        self.state.lock().bucket.refill_rate()
    }

    /// Get the per-minute ceiling of the sliding window.
    pub fn window_limit(&self) -> u32 {
        self.state.lock().window.max_requests()
    }

    /// Get the API name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the baseline configuration.
    pub fn base_config(&self) -> &RateLimitConfig {
        &self.base_config
    }

    /// Get the feedback policy.
    pub fn policy(&self) -> &AdaptivePolicy {
        &self.policy
    }
}

/// Multiply a rate, truncating toward zero and flooring at 1.
fn scale_rate(rate: u32, factor: f64) -> u32 {
    let scaled = (rate as f64 * factor) as u32;
    scaled.max(1)
}
