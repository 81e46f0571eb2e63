//! Registry of per-API limiters.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::adaptive::{AdaptiveLimiter, AdaptivePolicy, Admission, LimiterStats};
use super::backend::Throttle;
use super::rules::{ApiLimits, RateLimitConfig};

/// Unknown API names remembered for warn-once logging.
const MAX_TRACKED_UNKNOWN: usize = 1024;

/// Outcome of [`LimiterRegistry::wait_if_needed_or`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The wait finished; the duration slept, zero if admitted straight away.
    ///
    /// After a non-zero sleep admission is not re-checked.
    Waited(Duration),
    /// The caller's cancellation future completed first.
    Cancelled,
}

/// Owns one [`AdaptiveLimiter`] per external API.
///
/// Construct one registry at process start and share it (typically behind an
/// `Arc`) with every caller. Limiters for different APIs never contend with
/// each other. Names without a limiter are admitted unthrottled.
///
/// API names are expected to come from a fixed set. Up to
/// `MAX_TRACKED_UNKNOWN` unknown names are remembered for logging; beyond
/// that, new unknown names are only logged at debug level.
pub struct LimiterRegistry {
    /// Limiters indexed by API name
    limiters: DashMap<String, Arc<AdaptiveLimiter>>,
    /// Policy applied to limiters registered later
    policy: AdaptivePolicy,
    /// Unknown names already reported
    unknown: DashSet<String>,
}

impl LimiterRegistry {
    /// Create a registry with one limiter per configured API.
    pub fn new(limits: &ApiLimits, policy: AdaptivePolicy) -> Self {
        let registry = Self {
            limiters: DashMap::with_capacity(limits.len()),
            policy,
            unknown: DashSet::new(),
        };

        for (name, config) in &limits.apis {
            registry.register(name.clone(), *config);
        }

        registry
    }

    /// Create a registry for the built-in API set with the default policy.
    pub fn with_defaults() -> Self {
        Self::new(&ApiLimits::defaults(), AdaptivePolicy::default())
    }

    /// Add a limiter for `name`.
    ///
    /// Returns `false` and keeps the existing limiter if the name is taken.
    /// Invalid configurations are refused and also return `false`.
    pub fn register(&self, name: impl Into<String>, config: RateLimitConfig) -> bool {
        let name = name.into();
        if let Err(e) = config.validate() {
            warn!(api = %name, error = %e, "Refusing invalid limiter configuration");
            return false;
        }
        match self.limiters.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                warn!(api = %name, "Limiter already registered, keeping existing one");
                false
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                info!(
                    api = %name,
                    requests_per_minute = config.requests_per_minute,
                    burst_capacity = config.burst_capacity,
                    "Registered limiter"
                );
                entry.insert(Arc::new(AdaptiveLimiter::with_policy(
                    name.clone(),
                    config,
                    self.policy.clone(),
                )));
                self.unknown.remove(&name);
                true
            }
        }
    }

    /// Get the limiter for an API.
    pub fn get(&self, api: &str) -> Option<Arc<AdaptiveLimiter>> {
        self.limiters.get(api).map(|l| Arc::clone(l.value()))
    }

    /// Try to admit one call to `api`.
    ///
    /// Unknown names are admitted: a misconfigured name must never block
    /// traffic. The gap is logged the first time each name is seen.
    pub fn acquire(&self, api: &str) -> bool {
        self.try_acquire(api).is_admitted()
    }

    /// Try to admit one call to `api`, reporting the wait estimate on denial.
    pub fn try_acquire(&self, api: &str) -> Admission {
        match self.get(api) {
            Some(limiter) => limiter.try_acquire(),
            None => {
                self.note_unknown(api);
                Admission::Admitted
            }
        }
    }

    /// Report a successful call. Unknown names are ignored.
    pub fn record_success(&self, api: &str) {
        if let Some(limiter) = self.get(api) {
            limiter.record_success();
        }
    }

    /// Report a failed call. Unknown names are ignored.
    pub fn record_error(&self, api: &str, is_rate_limit_error: bool) {
        if let Some(limiter) = self.get(api) {
            limiter.record_error(is_rate_limit_error);
        }
    }

    /// Try to admit a call; if denied, sleep once for the estimated wait.
    ///
    /// Returns the time slept (zero when admitted straight away). The sleep
    /// happens outside any lock and admission is not re-checked afterwards;
    /// callers that need a hard guarantee call again. Dropping the returned
    /// future cancels the sleep.
    pub async fn wait_if_needed(&self, api: &str) -> Duration {
        match self.try_acquire(api) {
            Admission::Admitted => Duration::ZERO,
            Admission::Denied { wait } => {
                debug!(api = %api, wait_ms = wait.as_millis() as u64, "Waiting for rate limit");
                tokio::time::sleep(wait).await;
                wait
            }
        }
    }

    /// Like [`wait_if_needed`](Self::wait_if_needed), but abandon the sleep
    /// when `cancel` completes first (a deadline or shutdown signal).
    pub async fn wait_if_needed_or<F>(&self, api: &str, cancel: F) -> WaitOutcome
    where
        F: Future<Output = ()>,
    {
        let wait = match self.try_acquire(api) {
            Admission::Admitted => return WaitOutcome::Waited(Duration::ZERO),
            Admission::Denied { wait } => wait,
        };

        debug!(api = %api, wait_ms = wait.as_millis() as u64, "Waiting for rate limit");
        tokio::select! {
            _ = tokio::time::sleep(wait) => WaitOutcome::Waited(wait),
            _ = cancel => {
                debug!(api = %api, "Rate limit wait cancelled");
                WaitOutcome::Cancelled
            }
        }
    }

    /// Snapshot of one API's limiter.
    pub fn get_stats(&self, api: &str) -> Option<LimiterStats> {
        self.get(api).map(|limiter| limiter.stats())
    }

    /// Snapshot of every limiter, keyed by API name.
    ///
    /// Read-only: taking a snapshot never changes admission state.
    pub fn get_all_stats(&self) -> BTreeMap<String, LimiterStats> {
        let now = Instant::now();
        self.limiters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stats_at(now)))
            .collect()
    }

    /// Registered API names, sorted.
    pub fn api_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.limiters.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Whether `api` has a limiter.
    pub fn contains(&self, api: &str) -> bool {
        self.limiters.contains_key(api)
    }

    /// Number of registered limiters.
    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    /// Whether no limiter is registered.
    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }

    fn note_unknown(&self, api: &str) {
        if self.unknown.contains(api) || self.unknown.len() >= MAX_TRACKED_UNKNOWN {
            debug!(api = %api, "Unthrottled call to unconfigured API");
        } else if self.unknown.insert(api.to_string()) {
            warn!(api = %api, "No rate limiter configured for API, allowing call unthrottled");
        }
    }
}

impl Default for LimiterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for LimiterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimiterRegistry")
            .field("apis", &self.api_names())
            .finish()
    }
}

#[async_trait]
impl Throttle for LimiterRegistry {
    fn acquire(&self, api: &str) -> bool {
        LimiterRegistry::acquire(self, api)
    }

    async fn wait_if_needed(&self, api: &str) -> Duration {
        LimiterRegistry::wait_if_needed(self, api).await
    }

    fn record_success(&self, api: &str) {
        LimiterRegistry::record_success(self, api)
    }

    fn record_error(&self, api: &str, is_rate_limit_error: bool) {
        LimiterRegistry::record_error(self, api, is_rate_limit_error)
    }
}
