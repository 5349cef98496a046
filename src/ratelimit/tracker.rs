//! Per-subject window tracking.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, trace};

use super::key::ClientKey;
use super::window::{Decision, WindowMode, WindowState};

/// Tracked state for one subject.
#[derive(Debug, Clone)]
pub(crate) struct ClientState {
    window: WindowState,
    /// Last time any check touched this state
    last_seen: Instant,
    /// Window length used by the last check, for idle eviction
    window_len: Duration,
}

impl ClientState {
    fn new(mode: WindowMode, now: Instant, window_len: Duration) -> Self {
        Self {
            window: WindowState::new(mode, now),
            last_seen: now,
            window_len,
        }
    }

    /// Every counted request is at or before `last_seen`, so none can still
    /// be live once `retention_factor` of the longest applicable window has
    /// passed. `current_window` is the key's window now, which may be longer
    /// than the one the last check saw.
    fn is_idle(
        &self,
        now: Instant,
        retention_factor: u32,
        current_window: Option<Duration>,
    ) -> bool {
        let window = current_window.map_or(self.window_len, |w| w.max(self.window_len));
        now.saturating_duration_since(self.last_seen) >= window.saturating_mul(retention_factor)
    }
}

/// Window state for every subject seen by a limiter.
///
/// State lives in a sharded map. An admission check holds the shard lock
/// for its key from read to record, so checks on one key are linearizable
/// while unrelated keys proceed on other shards. Eviction takes the same
/// shard locks and cannot remove state mid-check.
#[derive(Debug)]
pub struct WindowTracker {
    mode: WindowMode,
    states: DashMap<ClientKey, ClientState>,
}

impl WindowTracker {
    /// Create an empty tracker using `mode` for every subject.
    pub fn new(mode: WindowMode) -> Self {
        Self {
            mode,
            states: DashMap::new(),
        }
    }

    /// The window mode applied to all subjects.
    pub fn mode(&self) -> WindowMode {
        self.mode
    }

    /// Evaluate one request for `key` at `now`, recording it if admitted.
    pub fn record_and_check(
        &self,
        key: &ClientKey,
        limit: u64,
        window: Duration,
        now: Instant,
    ) -> Decision {
        let mut state = match self.states.get_mut(key) {
            Some(state) => state,
            None => self.states.entry(key.clone()).or_insert_with(|| {
                debug!(key = %key, mode = ?self.mode, "Creating window state");
                ClientState::new(self.mode, now, window)
            }),
        };

        let decision = state.window.record_and_check(limit, window, now);
        state.last_seen = now;
        state.window_len = window;

        trace!(key = %key, limit = limit, decision = ?decision, "Window evaluated");
        decision
    }

    /// Requests currently counted for `key`, or `None` if it has no state.
    ///
    /// Counts against `current_window` when given, otherwise against the
    /// window of the last check. Never expires anything.
    pub fn usage(
        &self,
        key: &ClientKey,
        now: Instant,
        current_window: Option<Duration>,
    ) -> Option<u64> {
        self.states.get(key).map(|state| {
            let window = current_window.unwrap_or(state.window_len);
            state.window.count(window, now)
        })
    }

    /// Drop the usage history for `key`. Returns whether state existed.
    pub fn reset(&self, key: &ClientKey) -> bool {
        self.states.remove(key).is_some()
    }

    /// Drop the usage history for every scope of `client`.
    pub fn reset_client(&self, client: &str) -> usize {
        let mut removed = 0;
        self.states.retain(|key, _| {
            let keep = key.client != client;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Remove states idle for at least `retention_factor` windows.
    ///
    /// `current_window` returns the window configured for a key right now.
    /// A state is measured against the longer of that and the window of its
    /// last check, so raising a window never lets eviction drop live
    /// requests. Returns the number of evicted subjects.
    pub fn evict_idle<F>(&self, now: Instant, retention_factor: u32, current_window: F) -> usize
    where
        F: Fn(&ClientKey) -> Option<Duration>,
    {
        let mut evicted = 0;
        self.states.retain(|key, state| {
            let idle = state.is_idle(now, retention_factor, current_window(key));
            if idle {
                evicted += 1;
            }
            !idle
        });

        if evicted > 0 {
            debug!(evicted = evicted, remaining = self.states.len(), "Evicted idle window state");
        }
        evicted
    }

    /// Number of tracked subjects.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether no subjects are tracked.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Clear all state.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.states.clear();
    }
}
