//! Per-API rate limit configuration.
//!
//! Each external dependency gets its own baseline [`RateLimitConfig`]. The
//! baselines are fixed at construction; the adaptive controller only ever
//! moves the effective rate *below* them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::error::{QuotaguardError, Result};

/// Baseline limits for one external API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained ceiling, enforced precisely over a rolling minute
    pub requests_per_minute: u32,
    /// Hourly ceiling (advisory, not enforced)
    pub requests_per_hour: u32,
    /// Requests that may be issued back-to-back
    pub burst_capacity: u32,
    /// Back-off period after a failure (advisory, not enforced)
    #[serde(default)]
    pub cooldown_seconds: u32,
}

impl RateLimitConfig {
    /// Create a new configuration.
    pub fn new(
        requests_per_minute: u32,
        requests_per_hour: u32,
        burst_capacity: u32,
        cooldown_seconds: u32,
    ) -> Self {
        Self {
            requests_per_minute,
            requests_per_hour,
            burst_capacity,
            cooldown_seconds,
        }
    }

    /// Check that every ceiling is non-zero.
    pub fn validate(&self) -> Result<()> {
        match self.problem() {
            Some(problem) => Err(QuotaguardError::Config(problem.to_string())),
            None => Ok(()),
        }
    }

    fn problem(&self) -> Option<&'static str> {
        if self.requests_per_minute == 0 {
            Some("requests_per_minute must be greater than 0")
        } else if self.requests_per_hour == 0 {
            Some("requests_per_hour must be greater than 0")
        } else if self.burst_capacity == 0 {
            Some("burst_capacity must be greater than 0")
        } else {
            None
        }
    }
}

/// A named set of API limits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiLimits {
    /// Map of API name to its baseline limits
    #[serde(default)]
    pub apis: HashMap<String, RateLimitConfig>,
}

impl ApiLimits {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in limits for the known dependency classes.
    ///
    /// Ceilings differ by an order of magnitude between the public market
    /// data API, AI inference and the database backend.
    pub fn defaults() -> Self {
        Self::new()
            .with_api("market_data", RateLimitConfig::new(25, 500, 5, 60))
            .with_api("ai_inference", RateLimitConfig::new(50, 1000, 10, 30))
            .with_api("database", RateLimitConfig::new(250, 10_000, 50, 5))
    }

    /// Add or replace the limits for an API.
    pub fn with_api(mut self, name: impl Into<String>, config: RateLimitConfig) -> Self {
        self.apis.insert(name.into(), config);
        self
    }

    /// Load limits from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading API limits");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load limits from a YAML string and validate them.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let limits: ApiLimits = serde_yaml::from_str(yaml)?;
        limits.validate()?;
        Ok(limits)
    }

    /// Validate every entry, naming the offending API on failure.
    pub fn validate(&self) -> Result<()> {
        for (name, config) in &self.apis {
            if name.is_empty() {
                return Err(QuotaguardError::Config("API name must not be empty".to_string()));
            }
            if let Some(problem) = config.problem() {
                return Err(QuotaguardError::Config(format!("{}: {}", name, problem)));
            }
        }
        Ok(())
    }

    /// Get the limits for an API.
    pub fn get(&self, name: &str) -> Option<&RateLimitConfig> {
        self.apis.get(name)
    }

    /// Number of configured APIs.
    pub fn len(&self) -> usize {
        self.apis.len()
    }

    /// Whether no API is configured.
    pub fn is_empty(&self) -> bool {
        self.apis.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_limits() {
        let yaml = r#"
apis:
  market_data:
    requests_per_minute: 5
    requests_per_hour: 100
    burst_capacity: 2
    cooldown_seconds: 60
  database:
    requests_per_minute: 300
    requests_per_hour: 18000
    burst_capacity: 60
"#;
        let limits = ApiLimits::from_yaml(yaml).unwrap();
        assert_eq!(limits.len(), 2);

        let market = limits.get("market_data").unwrap();
        assert_eq!(*market, RateLimitConfig::new(5, 100, 2, 60));

        // cooldown_seconds is optional
        assert_eq!(limits.get("database").unwrap().cooldown_seconds, 0);
    }

    #[test]
    fn test_parse_rejects_zero_ceiling() {
        let yaml = r#"
apis:
  broken:
    requests_per_minute: 0
    requests_per_hour: 100
    burst_capacity: 2
"#;
        let err = ApiLimits::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, QuotaguardError::Config(_)));
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_parse_rejects_missing_field() {
        let yaml = r#"
apis:
  partial:
    requests_per_minute: 10
"#;
        assert!(matches!(
            ApiLimits::from_yaml(yaml),
            Err(QuotaguardError::Yaml(_))
        ));
    }

    #[test]
    fn test_validate_each_field() {
        assert!(RateLimitConfig::new(1, 1, 1, 0).validate().is_ok());
        assert!(RateLimitConfig::new(0, 1, 1, 0).validate().is_err());
        assert!(RateLimitConfig::new(1, 0, 1, 0).validate().is_err());
        assert!(RateLimitConfig::new(1, 1, 0, 0).validate().is_err());
    }

    #[test]
    fn test_defaults_are_valid() {
        let limits = ApiLimits::defaults();
        assert!(limits.validate().is_ok());
        assert_eq!(limits.len(), 3);

        let market = limits.get("market_data").unwrap().requests_per_minute;
        let database = limits.get("database").unwrap().requests_per_minute;
        assert!(database >= market * 10);
    }

    #[test]
    fn test_with_api_replaces() {
        let limits = ApiLimits::new()
            .with_api("search", RateLimitConfig::new(10, 100, 2, 0))
            .with_api("search", RateLimitConfig::new(20, 200, 4, 0));
        assert_eq!(limits.len(), 1);
        assert_eq!(limits.get("search").unwrap().requests_per_minute, 20);
    }
}
