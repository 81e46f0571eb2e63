//! Error types for Quotaguard.
//!
//! Admission checks and outcome reporting never fail; only loading and
//! validating configuration produces errors.

use thiserror::Error;

/// Main error type for Quotaguard operations.
#[derive(Error, Debug)]
pub enum QuotaguardError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Layered settings errors (file + environment)
    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Quotaguard operations.
pub type Result<T> = std::result::Result<T, QuotaguardError>;
