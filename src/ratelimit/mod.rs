//! Rate limiting logic and state management.

mod adaptive;
mod backend;
mod bucket;
mod registry;
mod rules;
mod window;

pub use adaptive::{AdaptiveLimiter, AdaptivePolicy, Admission, LimiterStats};
pub use backend::Throttle;
pub use bucket::TokenBucket;
pub use registry::{LimiterRegistry, WaitOutcome};
pub use rules::{ApiLimits, RateLimitConfig};
pub use window::SlidingWindowCounter;
