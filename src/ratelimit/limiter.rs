//! Core rate limiter implementation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use super::key::ClientKey;
use super::registry::{LimitConfig, LimitRegistry};
use super::rules::RulesConfig;
use super::tracker::WindowTracker;
use super::window::{Decision, WindowMode};
use crate::clock::{Clock, SystemClock};
use crate::config::{LimiterConfig, UnknownKeyPolicy};
use crate::error::Result;

/// The admission engine.
///
/// Combines the limit registry and the window tracker behind a single
/// handle. The struct is thread-safe; share it with `Arc` across tasks and
/// threads. Each instance owns its own state, so independent limiters never
/// observe each other.
#[derive(Debug)]
pub struct RateLimiter {
    registry: LimitRegistry,
    tracker: WindowTracker,
    clock: Arc<dyn Clock>,
    unknown_key_policy: UnknownKeyPolicy,
    default_limit: Option<LimitConfig>,
    retention_factor: u32,
    /// Inline sweep period in checks, 0 when disabled
    inline_sweep_every: u64,
    checks: AtomicU64,
}

impl RateLimiter {
    /// Create a sliding-window limiter with default settings.
    pub fn new() -> Self {
        Self::with_mode(WindowMode::Sliding)
    }

    /// Create a limiter with default settings and the given window mode.
    pub fn with_mode(mode: WindowMode) -> Self {
        let defaults = LimiterConfig::default();
        Self {
            registry: LimitRegistry::new(),
            tracker: WindowTracker::new(mode),
            clock: Arc::new(SystemClock),
            unknown_key_policy: defaults.unknown_key_policy,
            default_limit: None,
            retention_factor: defaults.retention_factor,
            inline_sweep_every: defaults.inline_sweep_every,
            checks: AtomicU64::new(0),
        }
    }

    /// Create a limiter from configuration.
    pub fn with_config(config: &LimiterConfig) -> Result<Self> {
        config.validate()?;

        let default_limit = config
            .default_limit
            .as_ref()
            .map(|spec| spec.to_limit_config("default_limit"))
            .transpose()?;

        info!(
            mode = ?config.window_mode,
            unknown_key_policy = ?config.unknown_key_policy,
            retention_factor = config.retention_factor,
            has_default_limit = default_limit.is_some(),
            "Rate limiter initialized"
        );

        Ok(Self {
            registry: LimitRegistry::new(),
            tracker: WindowTracker::new(config.window_mode),
            clock: Arc::new(SystemClock),
            unknown_key_policy: config.unknown_key_policy,
            default_limit,
            retention_factor: config.retention_factor,
            inline_sweep_every: config.inline_sweep_every,
            checks: AtomicU64::new(0),
        })
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the answer `allow` gives for keys without a limit.
    pub fn with_unknown_key_policy(mut self, policy: UnknownKeyPolicy) -> Self {
        self.unknown_key_policy = policy;
        self
    }

    /// Set the limit used when no registry entry matches.
    pub fn with_default_limit(mut self, limit: LimitConfig) -> Result<Self> {
        limit.validate("default_limit")?;
        self.default_limit = Some(limit);
        Ok(self)
    }

    /// Check admission for `key` and record the request if admitted.
    ///
    /// Returns `Decision::Unconfigured` without touching any state when no
    /// limit applies. Malformed keys are rejected before any lookup.
    pub fn check(&self, key: &ClientKey) -> Result<Decision> {
        if let Err(e) = key.validate() {
            warn!(key = ?key, error = %e, "Rejected malformed rate limit key");
            return Err(e);
        }

        let Some(limit) = self.resolve_limit(key) else {
            trace!(key = %key, "No limit configured");
            return Ok(Decision::Unconfigured);
        };

        let now = self.clock.now();
        let decision = self
            .tracker
            .record_and_check(key, limit.max_requests, limit.window, now);

        if let Decision::Denied { retry_after } = decision {
            debug!(
                key = %key,
                limit = limit.max_requests,
                window = ?limit.window,
                retry_after = ?retry_after,
                "Rate limit exceeded"
            );
        }

        self.maybe_sweep(now);
        Ok(decision)
    }

    /// Whether a client-scoped request may proceed now.
    pub fn allow(&self, client: &str) -> bool {
        self.allow_key(&ClientKey::new(client))
    }

    /// Whether a request from `client` to `resource` may proceed now.
    pub fn allow_resource(&self, client: &str, resource: &str) -> bool {
        self.allow_key(&ClientKey::with_resource(client, resource))
    }

    /// Whether a request for `key` may proceed now.
    ///
    /// Unconfigured keys follow the instance's [`UnknownKeyPolicy`];
    /// malformed keys are refused.
    pub fn allow_key(&self, key: &ClientKey) -> bool {
        match self.check(key) {
            Ok(Decision::Allowed { .. }) => true,
            Ok(Decision::Denied { .. }) => false,
            Ok(Decision::Unconfigured) => self.unknown_key_policy == UnknownKeyPolicy::Allow,
            Err(_) => false,
        }
    }

    /// Set or replace the limit for `key`.
    ///
    /// Accumulated usage is kept; the new limit applies from the next check.
    pub fn set_limit(&self, key: &str, max_requests: u64, window: Duration) -> Result<()> {
        self.registry.set_limit(key, max_requests, window)
    }

    /// Set or replace the limit for `key` with a full config.
    pub fn insert_limit(&self, key: &str, config: LimitConfig) -> Result<()> {
        self.registry.insert(key, config)
    }

    /// Get the limit configured for `key`.
    pub fn get_limit(&self, key: &str) -> Option<LimitConfig> {
        self.registry.get_limit(key)
    }

    /// Remove the limit for `key`. Usage state is left to age out.
    pub fn remove_limit(&self, key: &str) -> Option<LimitConfig> {
        self.registry.remove_limit(key)
    }

    /// Install every limit of a rules file. Nothing is installed on error.
    pub fn load_rules(&self, rules: &RulesConfig) -> Result<usize> {
        let limits = rules.to_limit_configs()?;
        self.registry.load(limits)
    }

    /// Clear accumulated usage for `key` without altering its limit.
    pub fn reset(&self, key: &ClientKey) -> bool {
        let existed = self.tracker.reset(key);
        debug!(key = %key, existed = existed, "Usage reset");
        existed
    }

    /// Clear accumulated usage for every scope of `client`.
    pub fn reset_client(&self, client: &str) -> usize {
        let removed = self.tracker.reset_client(client);
        debug!(client = %client, removed = removed, "Client usage reset");
        removed
    }

    /// Requests currently counted for `key` under its current limit.
    ///
    /// Returns `None` if the key has no tracked state. Read-only: usage is
    /// never expired by looking at it.
    pub fn usage(&self, key: &ClientKey) -> Option<u64> {
        let window = self.resolve_limit(key).map(|limit| limit.window);
        self.tracker.usage(key, self.clock.now(), window)
    }

    /// Evict state idle for longer than the retention period.
    ///
    /// Retention is measured against each key's current window, so state
    /// that a raised window still counts is kept.
    pub fn sweep(&self) -> usize {
        self.evict_idle(self.clock.now())
    }

    /// Get the number of tracked subjects.
    pub fn tracked_count(&self) -> usize {
        self.tracker.len()
    }

    /// Every configured limit, sorted by key.
    pub fn limits(&self) -> Vec<(String, LimitConfig)> {
        self.registry.snapshot()
    }

    /// The window mode applied to every key.
    pub fn window_mode(&self) -> WindowMode {
        self.tracker.mode()
    }

    /// The answer `allow` gives for keys without a limit.
    pub fn unknown_key_policy(&self) -> UnknownKeyPolicy {
        self.unknown_key_policy
    }

    /// Clear all usage state.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.tracker.clear();
    }

    fn resolve_limit(&self, key: &ClientKey) -> Option<LimitConfig> {
        self.registry
            .resolve(&key.limit_candidates())
            .or_else(|| self.default_limit.clone())
    }

    fn maybe_sweep(&self, now: Instant) {
        if self.inline_sweep_every == 0 {
            return;
        }
        let checks = self.checks.fetch_add(1, Ordering::Relaxed) + 1;
        if checks % self.inline_sweep_every == 0 {
            self.evict_idle(now);
        }
    }

    fn evict_idle(&self, now: Instant) -> usize {
        self.tracker.evict_idle(now, self.retention_factor, |key| {
            self.resolve_limit(key).map(|limit| limit.window)
        })
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
