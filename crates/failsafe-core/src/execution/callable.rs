//! Callable shapes
//!
//! Every operation an execution runs is reduced to one contract: a function
//! handed the [`AsyncExecution`] driving it, which eventually reports the
//! attempt's outcome to that execution. The constructors on [`Callable`]
//! adapt the supported shapes to it:
//!
//! | Constructor               | Operation shape                                 | Reports outcome |
//! |---------------------------|-------------------------------------------------|-----------------|
//! | [`Callable::new`]         | `Fn() -> Result<T, E>`                          | automatically   |
//! | [`Callable::contextual`]  | `Fn(&ExecutionContext) -> Result<T, E>`         | automatically   |
//! | [`Callable::manual`]      | `Fn(AsyncExecution<T, E>)`                      | by the operation |
//! | [`Callable::future`]      | `Fn() -> impl Future<Output = Result<T, E>>`    | automatically   |
//! | [`Callable::future_manual`] | `Fn(AsyncExecution<T, E>) -> impl Future<Output = ()>` | by the operation |

use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::async_execution::AsyncExecution;

/// Read-only view of an execution, passed to contextual operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionContext {
    attempts: u32,
    start_time: Instant,
    elapsed: Duration,
}

impl ExecutionContext {
    pub(crate) fn new(attempts: u32, start_time: Instant, elapsed: Duration) -> Self {
        Self {
            attempts,
            start_time,
            elapsed,
        }
    }

    /// The current attempt number, starting at 1
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// When the execution was created
    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    /// Time since the execution was created
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

/// An operation in the form executions run it
pub struct Callable<T, E> {
    run: Arc<dyn Fn(AsyncExecution<T, E>) + Send + Sync>,
}

impl<T, E> Callable<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Wrap a synchronous operation
    pub fn new<F>(operation: F) -> Self
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
    {
        Self::manual(move |execution| {
            let outcome = operation();
            execution.record(outcome);
        })
    }

    /// Wrap a synchronous operation that reads the execution's progress
    pub fn contextual<F>(operation: F) -> Self
    where
        F: Fn(&ExecutionContext) -> Result<T, E> + Send + Sync + 'static,
    {
        Self::manual(move |execution| {
            let outcome = operation(&execution.context());
            execution.record(outcome);
        })
    }

    /// Wrap an operation that reports its own outcome
    ///
    /// The operation must eventually call one of the recording, completing
    /// or retrying methods on the execution it receives, possibly from
    /// another thread.
    pub fn manual<F>(operation: F) -> Self
    where
        F: Fn(AsyncExecution<T, E>) + Send + Sync + 'static,
    {
        Self {
            run: Arc::new(operation),
        }
    }

    /// Wrap an operation returning a future of its outcome
    ///
    /// The future runs on the current tokio runtime if there is one, and is
    /// otherwise driven to completion on the attempt's thread. A panic while
    /// polling it ends the execution with [`super::ExecutionError::Panicked`].
    pub fn future<F, Fut>(operation: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self::manual(move |execution| {
            let attempt = execution.attempts();
            let pending = operation();
            drive(async move {
                match AssertUnwindSafe(pending).catch_unwind().await {
                    Ok(outcome) => {
                        execution.record(outcome);
                    }
                    Err(payload) => execution.attempt_panicked(attempt, payload.as_ref()),
                }
            });
        })
    }

    /// Wrap an asynchronous operation that reports its own outcome
    pub fn future_manual<F, Fut>(operation: F) -> Self
    where
        F: Fn(AsyncExecution<T, E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::manual(move |execution| {
            let attempt = execution.attempts();
            let reporter = execution.clone();
            let pending = operation(execution);
            drive(async move {
                if let Err(payload) = AssertUnwindSafe(pending).catch_unwind().await {
                    reporter.attempt_panicked(attempt, payload.as_ref());
                }
            });
        })
    }

    pub(crate) fn call(&self, execution: AsyncExecution<T, E>) {
        (self.run)(execution)
    }
}

fn drive<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(future);
        }
        Err(_) => futures::executor::block_on(future),
    }
}

impl<T, E> Clone for Callable<T, E> {
    fn clone(&self) -> Self {
        Self {
            run: self.run.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Callable<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable").finish_non_exhaustive()
    }
}
