//! Ratekeeper - In-Process Rate Limiting
//!
//! This crate implements a single-node, concurrency-safe rate limiter with
//! sliding or fixed windows, per-client and per-client-per-resource limits,
//! runtime limit updates and idle state eviction.
//!
//! ```
//! use std::time::Duration;
//! use ratekeeper::ratelimit::RateLimiter;
//!
//! let limiter = RateLimiter::new();
//! limiter.set_limit("c1", 3, Duration::from_secs(1)).unwrap();
//!
//! assert!(limiter.allow("c1"));
//! assert!(limiter.allow("c1"));
//! assert!(limiter.allow("c1"));
//! assert!(!limiter.allow("c1"));
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
