//! Rate limiting logic and state management.

mod cleanup;
mod key;
mod limiter;
mod registry;
mod rules;
mod tracker;
mod window;

pub use cleanup::CleanupTask;
pub use key::{resource_limit_key, ClientKey, ANY_CLIENT, KEY_SEPARATOR};
pub use limiter::RateLimiter;
pub use registry::{LimitConfig, LimitRegistry};
pub use rules::{LimitRule, RateSpec, RulesConfig, TimeUnit};
pub use tracker::WindowTracker;
pub use window::{Decision, WindowMode, WindowState};
