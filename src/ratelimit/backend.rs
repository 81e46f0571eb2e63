//! Throttle trait for abstracting the limiter behind outbound calls.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// The acquire/report boundary callers use around outbound calls.
///
/// [`LimiterRegistry`](super::LimiterRegistry) is the production
/// implementation; the trait lets guarded calls run against any backend.
#[async_trait]
pub trait Throttle: Send + Sync {
    /// Try to admit one call to `api` without waiting.
    fn acquire(&self, api: &str) -> bool;

    /// Admit one call to `api`, sleeping once if it is not admissible yet.
    ///
    /// Returns how long the call waited.
    async fn wait_if_needed(&self, api: &str) -> Duration;

    /// Report that a call to `api` succeeded.
    fn record_success(&self, api: &str);

    /// Report that a call to `api` failed.
    fn record_error(&self, api: &str, is_rate_limit_error: bool);
}

#[async_trait]
impl<T: Throttle + ?Sized> Throttle for Arc<T> {
    fn acquire(&self, api: &str) -> bool {
        (**self).acquire(api)
    }

    async fn wait_if_needed(&self, api: &str) -> Duration {
        (**self).wait_if_needed(api).await
    }

    fn record_success(&self, api: &str) {
        (**self).record_success(api)
    }

    fn record_error(&self, api: &str, is_rate_limit_error: bool) {
        (**self).record_error(api, is_rate_limit_error)
    }
}
