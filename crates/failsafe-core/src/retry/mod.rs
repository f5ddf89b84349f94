//! Retry policies
//!
//! This module decides whether a completed attempt should be followed by
//! another one, and how long to wait before it.
//!
//! # Features
//!
//! - Retry limits by attempt count and by elapsed time
//! - Delay strategies: none, fixed, exponential backoff, random
//! - Factor- or duration-based jitter that never yields a negative delay
//! - Retry and abort conditions over errors, results, or whole outcomes
//! - Pluggable error classification via the `RetryPredicate` trait
//!
//! # Example
//!
//! ```rust
//! use failsafe_core::retry::{Decision, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy: RetryPolicy<(), String> = RetryPolicy::new()
//!     .with_max_retries(2)
//!     .with_delay(Duration::from_millis(10));
//!
//! let failed: Result<(), String> = Err("unavailable".into());
//! assert_eq!(
//!     policy.evaluate(&failed, 1, Duration::ZERO),
//!     Decision::Retry(Duration::from_millis(10))
//! );
//! assert!(policy.evaluate(&failed, 3, Duration::ZERO).is_stop());
//! ```

mod policy;
mod strategies;

pub use policy::{Decision, RetryPolicy, StopReason};
pub use strategies::{
    calculate_delay, AlwaysRetry, ClosurePredicate, Delay, Jitter, MessagePredicate, NeverRetry,
    RetryPredicate,
};
