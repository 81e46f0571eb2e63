//! Configuration management for Quotaguard.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{QuotaguardError, Result};
use crate::ratelimit::{AdaptivePolicy, ApiLimits, LimiterRegistry, RateLimitConfig};

/// Prefix for environment overrides, e.g. `QUOTAGUARD__STATS__REPORT_INTERVAL_SECS`.
pub const ENV_PREFIX: &str = "QUOTAGUARD";

/// Main configuration for a Quotaguard process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaguardConfig {
    /// Baseline limits per API; empty means the built-in set
    #[serde(default)]
    pub apis: HashMap<String, RateLimitConfig>,

    /// Feedback controller tuning
    #[serde(default)]
    pub adaptive: AdaptivePolicy,

    /// Statistics reporting
    #[serde(default)]
    pub stats: StatsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Statistics reporting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Seconds between stats reports
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: default_report_interval(),
        }
    }
}

impl StatsConfig {
    /// The report interval as a duration.
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }
}

fn default_report_interval() -> u64 {
    60
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl QuotaguardConfig {
    /// Load configuration from a YAML file, with environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(QuotaguardError::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }

        let contents = std::fs::read_to_string(path)?;
        let settings = config::Config::builder()
            .add_source(config::File::from_str(&contents, config::FileFormat::Yaml))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let mut config: QuotaguardConfig = settings.try_deserialize()?;
        // Layered settings lowercase map keys; API names are case-sensitive.
        config.apis = serde_yaml::from_str::<ApiLimits>(&contents)?.apis;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: QuotaguardConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate limits, policy and intervals.
    pub fn validate(&self) -> Result<()> {
        self.api_limits().validate()?;
        self.adaptive.validate()?;
        if self.stats.report_interval_secs == 0 {
            return Err(QuotaguardError::Config(
                "stats.report_interval_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// The configured API limits, or the built-in set when none are given.
    pub fn api_limits(&self) -> ApiLimits {
        if self.apis.is_empty() {
            ApiLimits::defaults()
        } else {
            ApiLimits {
                apis: self.apis.clone(),
            }
        }
    }

    /// Build the process-wide registry described by this configuration.
    pub fn build_registry(&self) -> LimiterRegistry {
        LimiterRegistry::new(&self.api_limits(), self.adaptive.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QuotaguardConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stats.report_interval(), Duration::from_secs(60));
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
        assert_eq!(config.api_limits(), ApiLimits::defaults());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
apis:
  market_data:
    requests_per_minute: 5
    requests_per_hour: 500
    burst_capacity: 2
    cooldown_seconds: 60
adaptive:
  adjustment_interval_secs: 120
  min_samples: 20
stats:
  report_interval_secs: 15
logging:
  level: debug
  json: true
"#;
        let config = QuotaguardConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.apis.len(), 1);
        assert_eq!(config.adaptive.adjustment_interval_secs, 120);
        assert_eq!(config.adaptive.min_samples, 20);
        // Unset policy fields keep their defaults
        assert_eq!(config.adaptive.increase_threshold, 0.95);
        assert_eq!(config.stats.report_interval_secs, 15);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);

        let registry = config.build_registry();
        assert_eq!(registry.api_names(), vec!["market_data".to_string()]);
    }

    #[test]
    fn test_empty_apis_fall_back_to_defaults() {
        let config = QuotaguardConfig::from_yaml("stats:\n  report_interval_secs: 5\n").unwrap();
        let registry = config.build_registry();
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_rejects_invalid_policy() {
        let yaml = r#"
adaptive:
  increase_threshold: 0.5
  decrease_threshold: 0.9
"#;
        assert!(matches!(
            QuotaguardConfig::from_yaml(yaml),
            Err(QuotaguardError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_zero_report_interval() {
        let yaml = "stats:\n  report_interval_secs: 0\n";
        assert!(QuotaguardConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_from_file_with_env_override() {
        let path = std::env::temp_dir().join(format!(
            "quotaguard-config-{}.yaml",
            std::process::id()
        ));
        std::fs::write(
            &path,
            r#"
apis:
  database:
    requests_per_minute: 300
    requests_per_hour: 18000
    burst_capacity: 60
stats:
  report_interval_secs: 30
"#,
        )
        .unwrap();

        std::env::set_var("QUOTAGUARD__STATS__REPORT_INTERVAL_SECS", "10");
        let result = QuotaguardConfig::from_file(&path);
        std::env::remove_var("QUOTAGUARD__STATS__REPORT_INTERVAL_SECS");
        std::fs::remove_file(&path).unwrap();

        let config = result.unwrap();
        assert_eq!(config.stats.report_interval_secs, 10);
        assert_eq!(config.apis["database"].requests_per_minute, 300);
    }

    #[test]
    fn test_from_file_keeps_api_name_case() {
        let path = std::env::temp_dir().join(format!(
            "quotaguard-case-{}.yaml",
            std::process::id()
        ));
        std::fs::write(
            &path,
            r#"
apis:
  MarketData:
    requests_per_minute: 5
    requests_per_hour: 300
    burst_capacity: 2
"#,
        )
        .unwrap();

        let from_file = QuotaguardConfig::from_file(&path);
        std::fs::remove_file(&path).unwrap();
        let from_file = from_file.unwrap();

        assert!(from_file.apis.contains_key("MarketData"));
        assert!(!from_file.apis.contains_key("marketdata"));

        let registry = from_file.build_registry();
        assert!(registry.contains("MarketData"));
        assert!(registry.acquire("MarketData"));
        assert!(registry.acquire("MarketData"));
        assert!(!registry.acquire("MarketData"));
    }

    #[test]
    fn test_from_file_missing() {
        let err = QuotaguardConfig::from_file("/nonexistent/quotaguard.yaml").unwrap_err();
        assert!(matches!(err, QuotaguardError::Config(_)));
    }
}
