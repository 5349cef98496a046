//! Configuration management for Ratekeeper.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{RateKeeperError, Result};
use crate::ratelimit::{RateSpec, WindowMode};

/// Prefix for environment overrides, e.g. `RATEKEEPER__LIMITER__WINDOW_MODE=fixed`.
pub const ENV_PREFIX: &str = "RATEKEEPER";

/// Main configuration for a Ratekeeper instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Limiter behavior
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// What the boolean admission API answers for keys without a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownKeyPolicy {
    /// Unconfigured keys are admitted without tracking.
    #[default]
    Allow,
    /// Unconfigured keys are refused.
    Reject,
}

/// Limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Sliding or fixed windows, for every key of the instance
    #[serde(default)]
    pub window_mode: WindowMode,

    /// Answer for keys with no configured limit
    #[serde(default)]
    pub unknown_key_policy: UnknownKeyPolicy,

    /// Idle state is evicted after this many windows
    #[serde(default = "default_retention_factor")]
    pub retention_factor: u32,

    /// Background eviction interval in milliseconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_ms: u64,

    /// Sweep idle state inline every N checks (0 disables)
    #[serde(default)]
    pub inline_sweep_every: u64,

    /// Limit applied when no registry entry matches
    #[serde(default)]
    pub default_limit: Option<RateSpec>,

    /// Path to the limit rules file
    #[serde(default)]
    pub rules_path: Option<String>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            window_mode: WindowMode::default(),
            unknown_key_policy: UnknownKeyPolicy::default(),
            retention_factor: default_retention_factor(),
            cleanup_interval_ms: default_cleanup_interval(),
            inline_sweep_every: 0,
            default_limit: None,
            rules_path: None,
        }
    }
}

fn default_retention_factor() -> u32 {
    2
}

fn default_cleanup_interval() -> u64 {
    1000
}

impl LimiterConfig {
    /// Reject settings that would break eviction or admission.
    pub fn validate(&self) -> Result<()> {
        if self.retention_factor == 0 {
            return Err(RateKeeperError::Config(
                "retention_factor must be at least 1".into(),
            ));
        }
        if self.cleanup_interval_ms == 0 {
            return Err(RateKeeperError::Config(
                "cleanup_interval_ms must be greater than zero".into(),
            ));
        }
        if let Some(spec) = &self.default_limit {
            spec.to_limit_config("default_limit")?;
        }
        Ok(())
    }
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

impl ServiceConfig {
    /// Load configuration from an optional file, layered with environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            info!(path = %path, "Loading service configuration");
            builder = builder.add_source(::config::File::with_name(path));
        }

        let settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: ServiceConfig = settings.try_deserialize()?;
        config.limiter.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ServiceConfig = serde_yaml::from_str(yaml)
            .map_err(|e| RateKeeperError::Config(e.to_string()))?;
        config.limiter.validate()?;
        Ok(config)
    }
}
