//! Window state for a single rate-limited subject.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// How request windows are bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowMode {
    /// Only requests in the trailing `window` count.
    #[default]
    Sliding,
    /// Counts reset entirely when the window elapses.
    Fixed,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request was admitted and recorded.
    Allowed {
        /// Requests still available in the current window
        remaining: u64,
    },
    /// The request was rejected and not recorded.
    Denied {
        /// Time until a request would next be admitted, assuming no
        /// configuration change
        retry_after: Duration,
    },
    /// No limit applies to the key.
    Unconfigured,
}

impl Decision {
    /// Whether the request was admitted under a configured limit.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    /// Backoff hint for denied requests.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Decision::Denied { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Request history for one subject.
///
/// The sliding variant keeps one timestamp per admitted request; the fixed
/// variant keeps a counter and the instant its window opened.
#[derive(Debug, Clone)]
pub enum WindowState {
    /// Timestamps of admitted requests, oldest first.
    Sliding { hits: VecDeque<Instant> },
    /// Admitted requests since `window_start`.
    Fixed { count: u64, window_start: Instant },
}

impl WindowState {
    /// Create empty state for the given mode.
    pub fn new(mode: WindowMode, now: Instant) -> Self {
        match mode {
            WindowMode::Sliding => WindowState::Sliding {
                hits: VecDeque::new(),
            },
            WindowMode::Fixed => WindowState::Fixed {
                count: 0,
                window_start: now,
            },
        }
    }

    /// The mode this state was created for.
    pub fn mode(&self) -> WindowMode {
        match self {
            WindowState::Sliding { .. } => WindowMode::Sliding,
            WindowState::Fixed { .. } => WindowMode::Fixed,
        }
    }

    /// Evaluate one request at `now` and record it if admitted.
    ///
    /// Returns `true` if the request is within the limit, `false` if over limit.
    /// Denied requests leave the state untouched apart from expiring
    /// requests that fell out of the window.
    pub fn record_and_check(&mut self, limit: u64, window: Duration, now: Instant) -> Decision {
        self.roll(window, now);

        match self {
            WindowState::Sliding { hits } => {
                let current = hits.len() as u64;
                if current < limit {
                    hits.push_back(now);
                    return Decision::Allowed {
                        remaining: limit - current - 1,
                    };
                }

                // The request that has to expire before `len < limit` holds.
                let blocking = hits.len() - limit as usize;
                let retry_after = hits
                    .get(blocking)
                    .map(|t| window.saturating_sub(now.saturating_duration_since(*t)))
                    .unwrap_or(window);
                Decision::Denied { retry_after }
            }
            WindowState::Fixed {
                count,
                window_start,
            } => {
                if *count < limit {
                    *count += 1;
                    return Decision::Allowed {
                        remaining: limit - *count,
                    };
                }

                let elapsed = now.saturating_duration_since(*window_start);
                Decision::Denied {
                    retry_after: window.saturating_sub(elapsed),
                }
            }
        }
    }

    /// Requests counted in the window as of `now`. Leaves the state as is.
    pub fn count(&self, window: Duration, now: Instant) -> u64 {
        match self {
            WindowState::Sliding { hits } => hits
                .iter()
                .filter(|hit| now.saturating_duration_since(**hit) < window)
                .count() as u64,
            WindowState::Fixed {
                count,
                window_start,
            } => {
                if now.saturating_duration_since(*window_start) >= window {
                    0
                } else {
                    *count
                }
            }
        }
    }

    /// Expire requests that are no longer inside the window.
    ///
    /// A request admitted at `t` stops counting at exactly `t + window`.
    fn roll(&mut self, window: Duration, now: Instant) {
        match self {
            WindowState::Sliding { hits } => {
                while let Some(oldest) = hits.front() {
                    if now.saturating_duration_since(*oldest) < window {
                        break;
                    }
                    hits.pop_front();
                }
            }
            WindowState::Fixed {
                count,
                window_start,
            } => {
                if now.saturating_duration_since(*window_start) >= window {
                    *count = 0;
                    *window_start = now;
                }
            }
        }
    }
}
