//! Error types for the Ratekeeper crate.

use thiserror::Error;

/// Main error type for Ratekeeper operations.
#[derive(Error, Debug)]
pub enum RateKeeperError {
    /// A limit was rejected because its values can never admit a request.
    #[error("Invalid configuration for '{key}': {reason}")]
    InvalidConfiguration {
        /// The limit key being configured
        key: String,
        /// Why the configuration was rejected
        reason: String,
    },

    /// A client or resource identifier was empty or otherwise malformed.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Configuration loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RateKeeperError {
    pub(crate) fn invalid_config(key: &str, reason: impl Into<String>) -> Self {
        RateKeeperError::InvalidConfiguration {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<::config::ConfigError> for RateKeeperError {
    fn from(err: ::config::ConfigError) -> Self {
        RateKeeperError::Config(err.to_string())
    }
}

/// Result type alias for Ratekeeper operations.
pub type Result<T> = std::result::Result<T, RateKeeperError>;
