//! # failsafe-core
//!
//! Asynchronous failure handling for fallible operations:
//! - Retry policies with fixed, backoff and random delays plus jitter
//! - Circuit breakers over count- or time-based rolling windows
//! - Delayed rescheduling of attempts through a pluggable [`Scheduler`]
//! - Cancellable [`FailsafeFuture`] handles that can be awaited or blocked on
//! - YAML configuration with environment overrides
//!
//! # Example
//!
//! ```rust,no_run
//! use failsafe_core::{CircuitBreaker, CircuitBreakerSettings, Failsafe, RetryPolicy, TokioScheduler};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let breaker = Arc::new(CircuitBreaker::new(
//!     CircuitBreakerSettings::default().with_delay(Duration::from_secs(30)),
//! )?);
//!
//! let failsafe = Failsafe::new(TokioScheduler::current()?)
//!     .with_retry_policy(RetryPolicy::new().with_max_retries(2))?
//!     .with_circuit_breaker(breaker)?;
//!
//! let body = failsafe
//!     .execute_future(|| async { tokio::fs::read_to_string("/etc/hosts").await })?
//!     .await?;
//! println!("{} bytes", body.len());
//! # Ok(())
//! # }
//! ```

pub mod circuit;
pub mod clock;
pub mod config;
pub mod error;
pub mod execution;
pub mod failsafe;
pub mod retry;
pub mod scheduler;
pub mod types;

pub use circuit::{CircuitBreaker, CircuitBreakerSettings, CircuitState, RollingWindow};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::ConfigLoader;
pub use error::{Error, Result};
pub use execution::{
    AsyncExecution, Callable, ExecutionContext, ExecutionError, ExecutionListener,
    ExecutionStats, FailsafeFuture,
};
pub use failsafe::Failsafe;
pub use retry::{Delay, Jitter, RetryPolicy};
pub use scheduler::{ManualScheduler, ScheduledTask, Scheduler, TokioScheduler};
pub use types::FailsafeConfig;
