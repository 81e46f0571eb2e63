//! Quotaguard - Adaptive Rate Limiting for Outbound Calls
//!
//! This crate gates calls to external, independently quota-limited services
//! (market data providers, AI inference APIs, database backends). Each API
//! gets an adaptive limiter combining a token bucket for bursts with a
//! sliding window for the per-minute ceiling, and the effective rate follows
//! the success and error feedback callers report back.
//!
//! A single [`LimiterRegistry`] is built at process start and shared with
//! every caller; outbound calls go through [`guarded_call`] or a
//! [`CallGuard`].

pub mod config;
pub mod error;
pub mod guard;
pub mod ratelimit;

pub use config::QuotaguardConfig;
pub use error::{QuotaguardError, Result};
pub use guard::{guarded_call, is_rate_limit_error, CallGuard};
pub use ratelimit::{
    AdaptiveLimiter, AdaptivePolicy, Admission, ApiLimits, LimiterRegistry, LimiterStats,
    RateLimitConfig, Throttle, WaitOutcome,
};
