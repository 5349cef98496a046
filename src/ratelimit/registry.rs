//! Runtime-mutable limit configuration.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::key::validate_limit_key;
use crate::error::{RateKeeperError, Result};

/// Configuration for a rate limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Maximum requests allowed in the time window
    pub max_requests: u64,
    /// Time window for the limit
    pub window: Duration,
    /// Name/description of this limit
    #[serde(default)]
    pub name: Option<String>,
}

impl LimitConfig {
    /// Create an unnamed limit.
    pub fn new(max_requests: u64, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            name: None,
        }
    }

    /// Attach a descriptive name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Check that the limit can admit at least one request.
    pub fn validate(&self, key: &str) -> Result<()> {
        validate_limit_key(key).map_err(|reason| RateKeeperError::invalid_config(key, reason))?;
        if self.max_requests == 0 {
            return Err(RateKeeperError::invalid_config(
                key,
                "max_requests must be greater than zero",
            ));
        }
        if self.window.is_zero() {
            return Err(RateKeeperError::invalid_config(
                key,
                "window must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Limit configurations indexed by limit key.
///
/// Configs are replaced as whole values under a write lock, so readers see
/// either the old or the new limit, never a mix. Usage state lives in the
/// tracker and is not touched by any registry operation.
#[derive(Debug, Default)]
pub struct LimitRegistry {
    limits: RwLock<HashMap<String, LimitConfig>>,
}

impl LimitRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or replace the limit for `key`.
    pub fn set_limit(&self, key: &str, max_requests: u64, window: Duration) -> Result<()> {
        self.insert(key, LimitConfig::new(max_requests, window))
    }

    /// Set or replace the limit for `key` with a full config.
    pub fn insert(&self, key: &str, config: LimitConfig) -> Result<()> {
        config.validate(key)?;

        debug!(
            key = %key,
            max_requests = config.max_requests,
            window = ?config.window,
            "Setting rate limit"
        );
        self.limits.write().insert(key.to_string(), config);
        Ok(())
    }

    /// Validate every entry, then install them all under one write lock.
    ///
    /// Nothing is installed if any entry is invalid.
    pub fn load<I>(&self, limits: I) -> Result<usize>
    where
        I: IntoIterator<Item = (String, LimitConfig)>,
    {
        let limits: Vec<(String, LimitConfig)> = limits.into_iter().collect();
        for (key, config) in &limits {
            config.validate(key)?;
        }

        let count = limits.len();
        let mut guard = self.limits.write();
        guard.extend(limits);
        info!(loaded = count, total = guard.len(), "Rate limits loaded");
        Ok(count)
    }

    /// Get the limit configured for `key`.
    pub fn get_limit(&self, key: &str) -> Option<LimitConfig> {
        self.limits.read().get(key).cloned()
    }

    /// Return the first configured limit among `candidates`.
    pub fn resolve<'a, I>(&self, candidates: I) -> Option<LimitConfig>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let limits = self.limits.read();
        candidates
            .into_iter()
            .find_map(|candidate| limits.get(candidate).cloned())
    }

    /// Remove the limit for `key`, returning the previous config.
    pub fn remove_limit(&self, key: &str) -> Option<LimitConfig> {
        self.limits.write().remove(key)
    }

    /// All configured limits, sorted by key.
    pub fn snapshot(&self) -> Vec<(String, LimitConfig)> {
        let mut entries: Vec<(String, LimitConfig)> = self
            .limits
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Number of configured limits.
    pub fn len(&self) -> usize {
        self.limits.read().len()
    }

    /// Whether no limits are configured.
    pub fn is_empty(&self) -> bool {
        self.limits.read().is_empty()
    }
}
