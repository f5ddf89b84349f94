//! Asynchronous executions
//!
//! One call to an entry point on [`crate::Failsafe`] creates one
//! [`AsyncExecution`] and the [`FailsafeFuture`] it completes. Attempts run
//! on the configured scheduler, one after another, until the retry policy
//! stops, the circuit breaker refuses a retry, or the caller cancels.
//!
//! # Features
//!
//! - One internal [`Callable`] contract for plain, contextual, manual and
//!   future-returning operations
//! - Manual retries from inside the operation (`retry_on`, `retry_for`,
//!   `complete` then `retry`)
//! - Exactly-once completion; cancellation that stops the pending retry
//! - Lifecycle hooks through [`ExecutionListener`], isolated from panics
//! - Panicking operations end the execution with [`ExecutionError::Panicked`]
//! - Panicking operations end the execution with [`ExecutionError::Panicked`]

mod async_execution;
mod callable;
mod error;
mod future;
mod listener;

pub use async_execution::AsyncExecution;
pub(crate) use async_execution::ExecutionSetup;
pub use callable::{Callable, ExecutionContext};
pub use error::ExecutionError;
pub use future::FailsafeFuture;
pub use listener::{
    ExecutionListener, ExecutionStats, HookListener, Listeners, NoOpListener, StatsListener,
    TracingListener,
};
