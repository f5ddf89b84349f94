//! Entry point
//!
//! [`Failsafe`] combines a retry policy, an optional circuit breaker, a
//! scheduler and listeners into a reusable configuration. Each `execute*`
//! call creates a fresh execution and returns its future without blocking.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use crate::circuit::CircuitBreaker;
use crate::clock::{system_clock, SharedClock};
use crate::error::{Error, Result};
use crate::execution::{
    AsyncExecution, Callable, ExecutionContext, ExecutionError, ExecutionListener,
    ExecutionSetup, ExecutionStats, FailsafeFuture, Listeners,
};
use crate::retry::RetryPolicy;
use crate::scheduler::Scheduler;

/// Reusable execution configuration
///
/// Without a retry policy, operations are attempted once.
///
/// # Example
///
/// ```rust,no_run
/// use failsafe_core::{Failsafe, RetryPolicy, TokioScheduler};
/// use std::time::Duration;
///
/// # async fn run() -> anyhow::Result<()> {
/// let failsafe = Failsafe::new(TokioScheduler::current()?).with_retry_policy(
///     RetryPolicy::new()
///         .with_max_retries(3)
///         .with_backoff(Duration::from_millis(50), Duration::from_secs(1), 2.0),
/// )?;
///
/// let value = failsafe
///     .execute(|| std::fs::read_to_string("/etc/hostname"))?
///     .await?;
/// println!("{}", value);
/// # Ok(())
/// # }
/// ```
pub struct Failsafe<T, E> {
    retry_policy: Option<Arc<RetryPolicy<T, E>>>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    scheduler: Arc<dyn Scheduler>,
    listeners: Listeners<T, E>,
    clock: SharedClock,
}

impl<T, E> Failsafe<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Run attempts on `scheduler`
    pub fn new<S>(scheduler: S) -> Self
    where
        S: Scheduler + 'static,
    {
        Self {
            retry_policy: None,
            circuit_breaker: None,
            scheduler: Arc::new(scheduler),
            listeners: Listeners::new(),
            clock: system_clock(),
        }
    }

    /// Retry according to `policy`
    ///
    /// Fails if a policy is already configured or the policy is invalid.
    pub fn with_retry_policy(mut self, policy: RetryPolicy<T, E>) -> Result<Self> {
        if self.retry_policy.is_some() {
            return Err(Error::already_configured("retry policy"));
        }
        policy.validate()?;
        self.retry_policy = Some(Arc::new(policy));
        Ok(self)
    }

    /// Guard executions with `breaker`
    ///
    /// The breaker may be shared with other configurations. Fails if a
    /// breaker is already configured.
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Result<Self> {
        if self.circuit_breaker.is_some() {
            return Err(Error::already_configured("circuit breaker"));
        }
        self.circuit_breaker = Some(breaker);
        Ok(self)
    }

    /// Notify `listener` of execution events
    pub fn with_listener<L>(mut self, listener: L) -> Self
    where
        L: ExecutionListener<T, E> + 'static,
    {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Measure elapsed time with `clock`
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy<T, E>> {
        self.retry_policy.as_deref()
    }

    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.circuit_breaker.as_ref()
    }

    /// Execute a synchronous operation
    pub fn execute<F>(&self, operation: F) -> std::result::Result<FailsafeFuture<T, E>, ExecutionError<E>>
    where
        F: Fn() -> std::result::Result<T, E> + Send + Sync + 'static,
    {
        self.call(Callable::new(operation), FailsafeFuture::new())
    }

    /// Execute a synchronous operation that reads the execution's progress
    pub fn execute_contextual<F>(
        &self,
        operation: F,
    ) -> std::result::Result<FailsafeFuture<T, E>, ExecutionError<E>>
    where
        F: Fn(&ExecutionContext) -> std::result::Result<T, E> + Send + Sync + 'static,
    {
        self.call(Callable::contextual(operation), FailsafeFuture::new())
    }

    /// Execute an operation that reports its own outcome and retries
    pub fn execute_async<F>(
        &self,
        operation: F,
    ) -> std::result::Result<FailsafeFuture<T, E>, ExecutionError<E>>
    where
        F: Fn(AsyncExecution<T, E>) + Send + Sync + 'static,
    {
        self.call(Callable::manual(operation), FailsafeFuture::new())
    }

    /// Execute an operation returning a future of its outcome
    pub fn execute_future<F, Fut>(
        &self,
        operation: F,
    ) -> std::result::Result<FailsafeFuture<T, E>, ExecutionError<E>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        self.call(Callable::future(operation), FailsafeFuture::new())
    }

    /// Execute an asynchronous operation that reports its own outcome
    pub fn execute_future_async<F, Fut>(
        &self,
        operation: F,
    ) -> std::result::Result<FailsafeFuture<T, E>, ExecutionError<E>>
    where
        F: Fn(AsyncExecution<T, E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.call(Callable::future_manual(operation), FailsafeFuture::new())
    }

    /// Execute `callable`, completing a future the caller created
    ///
    /// The future must be fresh: one already bound to an execution or
    /// already complete is refused and left untouched with the caller.
    pub fn execute_with_future(
        &self,
        future: &FailsafeFuture<T, E>,
        callable: Callable<T, E>,
    ) -> std::result::Result<(), ExecutionError<E>> {
        self.start(callable, future)
    }

    fn call(
        &self,
        callable: Callable<T, E>,
        future: FailsafeFuture<T, E>,
    ) -> std::result::Result<FailsafeFuture<T, E>, ExecutionError<E>> {
        self.start(callable, &future)?;
        Ok(future)
    }

    fn start(
        &self,
        callable: Callable<T, E>,
        future: &FailsafeFuture<T, E>,
    ) -> std::result::Result<(), ExecutionError<E>> {
        if let Some(breaker) = &self.circuit_breaker {
            breaker.initialize();
            if !breaker.allows_execution() {
                debug!("Circuit breaker open, rejecting execution");
                self.listeners.circuit_open(&ExecutionStats::default());
                return Err(ExecutionError::CircuitOpen);
            }
        }

        let setup = ExecutionSetup {
            policy: self
                .retry_policy
                .clone()
                .unwrap_or_else(|| Arc::new(RetryPolicy::never())),
            breaker: self.circuit_breaker.clone(),
            scheduler: self.scheduler.clone(),
            listeners: self.listeners.clone(),
            clock: self.clock.clone(),
        };
        let execution = AsyncExecution::new(setup, callable, future).ok_or_else(|| {
            ExecutionError::Scheduling(Error::invalid_argument(
                "future is already bound to an execution",
            ))
        })?;
        execution.start();
        Ok(())
    }
}

impl<T, E> Clone for Failsafe<T, E> {
    fn clone(&self) -> Self {
        Self {
            retry_policy: self.retry_policy.clone(),
            circuit_breaker: self.circuit_breaker.clone(),
            scheduler: self.scheduler.clone(),
            listeners: self.listeners.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Failsafe<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failsafe")
            .field("retry_policy", &self.retry_policy)
            .field("circuit_breaker", &self.circuit_breaker)
            .field("listeners", &self.listeners)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::CircuitBreakerSettings;
    use crate::scheduler::ManualScheduler;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};

    type Config = Failsafe<u32, io::Error>;

    #[test]
    fn test_retry_policy_configured_once() {
        let failsafe = Config::new(ManualScheduler::new())
            .with_retry_policy(RetryPolicy::new())
            .unwrap();
        let err = failsafe
            .with_retry_policy(RetryPolicy::new())
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyConfigured { .. }));
    }

    #[test]
    fn test_circuit_breaker_configured_once() {
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerSettings::default()).unwrap());
        let failsafe = Config::new(ManualScheduler::new())
            .with_circuit_breaker(breaker.clone())
            .unwrap();
        assert!(failsafe.with_circuit_breaker(breaker).is_err());
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let policy = RetryPolicy::new().with_jitter_factor(2.0);
        let err = Config::new(ManualScheduler::new())
            .with_retry_policy(policy)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn test_execute_returns_before_first_attempt() {
        let scheduler = ManualScheduler::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();
        let future = Config::new(scheduler.clone())
            .execute(move || {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(5)
            })
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!future.is_done());

        scheduler.run_until_idle();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(future.get().unwrap(), 5);
    }

    #[test]
    fn test_without_policy_runs_once() {
        let scheduler = ManualScheduler::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();
        let future = Config::new(scheduler.clone())
            .execute(move || {
                counted.fetch_add(1, Ordering::SeqCst);
                Err(io::Error::other("down"))
            })
            .unwrap();

        scheduler.run_until_idle();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let err = future.get().unwrap_err();
        assert!(err.is_exhausted());
        assert_eq!(err.attempts(), 1);
    }

    #[test]
    fn test_reused_future_is_refused() {
        let scheduler = ManualScheduler::new();
        let failsafe = Config::new(scheduler.clone());
        let future = FailsafeFuture::new();
        failsafe
            .execute_with_future(&future, Callable::new(|| Ok(1)))
            .unwrap();

        let err = failsafe
            .execute_with_future(&future, Callable::new(|| Ok(2)))
            .unwrap_err();
        assert!(err.is_scheduling());

        // The refused call leaves the caller's future with its first execution
        scheduler.run_until_idle();
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(future.get().unwrap(), 1);
    }

    #[test]
    fn test_refused_completed_future_keeps_its_outcome() {
        let scheduler = ManualScheduler::new();
        let future = FailsafeFuture::new();
        assert!(future.complete(Ok(7), true));

        let err = Config::new(scheduler.clone())
            .execute_with_future(&future, Callable::new(|| Ok(8)))
            .unwrap_err();
        assert!(err.is_scheduling());
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(future.get().unwrap(), 7);
    }

    #[test]
    fn test_first_attempt_scheduling_failure_completes_future() {
        let scheduler = ManualScheduler::new();
        scheduler.shutdown();
        let future = Config::new(scheduler).execute(|| Ok(1)).unwrap();

        assert!(future.is_done());
        assert!(future.get().unwrap_err().is_scheduling());
    }
}
