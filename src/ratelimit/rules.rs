//! Rate limit rules configuration.
//!
//! This module handles loading named limits from a YAML rules file and
//! converting them into registry entries. Keys are `client`,
//! `client/resource`, or `"*/resource"` for a limit every client of a
//! resource gets (quoted, since YAML reads a bare `*` as an alias).
//! A rules file looks like:
//!
//! ```yaml
//! limits:
//!   - key: free
//!     requests_per_unit: 60
//!     unit: minute
//!   - key: "*/search"
//!     requests_per_unit: 20
//!     unit: second
//!   - key: alice/search
//!     requests_per_unit: 5
//!     window_ms: 500
//!     name: alice-search-burst
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use super::registry::LimitConfig;
use crate::error::{RateKeeperError, Result};

/// A complete rules file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Limits keyed by `client`, `client/resource` or `*/resource`
    #[serde(default)]
    pub limits: Vec<LimitRule>,
}

/// One registry entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitRule {
    /// The limit key
    pub key: String,
    /// The rate to apply
    #[serde(flatten)]
    pub rate: RateSpec,
}

/// A rate expressed as a request count per time unit or per explicit window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateSpec {
    /// Number of requests allowed per window
    pub requests_per_unit: u64,
    /// Calendar-style window length
    #[serde(default)]
    pub unit: Option<TimeUnit>,
    /// Arbitrary window length in milliseconds
    #[serde(default)]
    pub window_ms: Option<u64>,
    /// Optional name/description for this limit
    #[serde(default)]
    pub name: Option<String>,
}

/// Time unit for rate limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Get the duration of this time unit.
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86400),
        }
    }
}

impl RateSpec {
    /// Resolve the window and validate the result for `key`.
    pub fn to_limit_config(&self, key: &str) -> Result<LimitConfig> {
        let window = match (self.unit, self.window_ms) {
            (Some(unit), None) => unit.duration(),
            (None, Some(ms)) => Duration::from_millis(ms),
            (Some(_), Some(_)) => {
                return Err(RateKeeperError::invalid_config(
                    key,
                    "set either unit or window_ms, not both",
                ))
            }
            (None, None) => {
                return Err(RateKeeperError::invalid_config(
                    key,
                    "one of unit or window_ms is required",
                ))
            }
        };

        let config = LimitConfig {
            max_requests: self.requests_per_unit,
            window,
            name: self.name.clone(),
        };
        config.validate(key)?;
        Ok(config)
    }
}

impl RulesConfig {
    /// Create an empty rules set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // A bare list of rules is accepted as shorthand for `limits:`
        if let Ok(limits) = serde_yaml::from_str::<Vec<LimitRule>>(yaml) {
            return Ok(Self { limits });
        }

        serde_yaml::from_str(yaml)
            .map_err(|e| RateKeeperError::Config(format!("Failed to parse rate limit rules: {}", e)))
    }

    /// Convert every rule into a registry entry, failing on the first invalid one.
    pub fn to_limit_configs(&self) -> Result<Vec<(String, LimitConfig)>> {
        self.limits
            .iter()
            .map(|rule| Ok((rule.key.clone(), rule.rate.to_limit_config(&rule.key)?)))
            .collect()
    }
}
