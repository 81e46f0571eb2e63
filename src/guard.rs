//! Guarded outbound calls.
//!
//! Wrap every call to a rate-limited dependency in [`guarded_call`] (or a
//! [`CallGuard`] bound to the API name). The wrapper waits for admission,
//! runs the call and feeds the outcome back into the limiter. Errors are
//! inspected for rate-limit signatures and then returned to the caller
//! unchanged.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{trace, warn};

use crate::ratelimit::Throttle;

/// Lowercase substrings that mark an error as upstream rate limiting.
pub const RATE_LIMIT_SIGNATURES: [&str; 4] =
    ["rate limit", "too many requests", "429", "quota exceeded"];

/// Whether an error message looks like the upstream throttled us.
pub fn is_rate_limit_error(message: &str) -> bool {
    let message = message.to_lowercase();
    RATE_LIMIT_SIGNATURES
        .iter()
        .any(|signature| message.contains(signature))
}

/// Run `call` against `api` under `throttle`.
///
/// Waits for admission, runs the call, then records success or failure.
/// A failure is classified by its message (including any source chain the
/// error type prints in alternate form) and returned as-is.
pub async fn guarded_call<B, F, Fut, T, E>(throttle: &B, api: &str, call: F) -> Result<T, E>
where
    B: Throttle + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let waited = throttle.wait_if_needed(api).await;
    if !waited.is_zero() {
        trace!(api = %api, waited_ms = waited.as_millis() as u64, "Proceeding after wait");
    }

    match call().await {
        Ok(value) => {
            throttle.record_success(api);
            Ok(value)
        }
        Err(err) => {
            let rate_limited = is_rate_limit_error(&format!("{:#}", err));
            if rate_limited {
                warn!(api = %api, error = %err, "Upstream reported rate limiting");
            }
            throttle.record_error(api, rate_limited);
            Err(err)
        }
    }
}

/// A handle that guards calls to one API.
///
/// Cheap to clone; clones share the same throttle.
pub struct CallGuard<B: Throttle + ?Sized> {
    throttle: Arc<B>,
    api: Arc<str>,
}

impl<B: Throttle + ?Sized> CallGuard<B> {
    /// Bind `throttle` to `api`.
    pub fn new(throttle: Arc<B>, api: impl Into<Arc<str>>) -> Self {
        Self {
            throttle,
            api: api.into(),
        }
    }

    /// Run `call` under this guard.
    pub async fn call<F, Fut, T, E>(&self, call: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        guarded_call(self.throttle.as_ref(), &self.api, call).await
    }

    /// Get the guarded API name.
    pub fn api(&self) -> &str {
        &self.api
    }

    /// Get the underlying throttle.
    pub fn throttle(&self) -> &Arc<B> {
        &self.throttle
    }
}

impl<B: Throttle + ?Sized> Clone for CallGuard<B> {
    fn clone(&self) -> Self {
        Self {
            throttle: Arc::clone(&self.throttle),
            api: Arc::clone(&self.api),
        }
    }
}

impl<B: Throttle + ?Sized> fmt::Debug for CallGuard<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallGuard").field("api", &self.api).finish()
    }
}
