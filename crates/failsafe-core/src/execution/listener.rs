//! Execution lifecycle hooks
//!
//! This module provides the `ExecutionListener` trait for observing
//! executions, a `TracingListener` implementation that logs using the
//! `tracing` crate, and the [`Listeners`] set the engine invokes.
//!
//! Hooks never influence control flow. A hook that panics is logged and
//! otherwise ignored.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::error::ExecutionError;

/// Progress of an execution at the time a hook fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutionStats {
    /// Attempts started so far
    pub attempts: u32,
    /// Time since the execution was created
    pub elapsed: Duration,
}

/// Observer for execution lifecycle events
///
/// Every hook has an empty default, so implementors only override what they
/// need. `T` and `E` are the wrapped operation's value and error types.
///
/// # Example
///
/// ```rust
/// use failsafe_core::execution::{ExecutionListener, ExecutionStats};
/// use std::time::Duration;
///
/// struct RetryLogger;
///
/// impl ExecutionListener<String, std::io::Error> for RetryLogger {
///     fn on_retry(
///         &self,
///         outcome: &Result<String, std::io::Error>,
///         delay: Duration,
///         stats: &ExecutionStats,
///     ) {
///         if let Err(err) = outcome {
///             eprintln!("attempt {} failed ({}), retrying in {:?}", stats.attempts, err, delay);
///         }
///     }
/// }
/// ```
pub trait ExecutionListener<T, E>: Send + Sync {
    /// An attempt reported its outcome
    fn on_attempt_complete(&self, outcome: &Result<T, E>, stats: &ExecutionStats) {
        let _ = (outcome, stats);
    }

    /// Another attempt was scheduled after `delay`
    fn on_retry(&self, outcome: &Result<T, E>, delay: Duration, stats: &ExecutionStats) {
        let _ = (outcome, delay, stats);
    }

    /// The execution completed successfully
    fn on_success(&self, value: &T, stats: &ExecutionStats) {
        let _ = (value, stats);
    }

    /// The execution completed unsuccessfully
    ///
    /// The outcome may still hold a value when the final result matched a
    /// retry condition.
    fn on_failure(&self, outcome: &Result<T, ExecutionError<E>>, stats: &ExecutionStats) {
        let _ = (outcome, stats);
    }

    /// An abort condition ended the execution
    fn on_abort(&self, outcome: &Result<T, E>, stats: &ExecutionStats) {
        let _ = (outcome, stats);
    }

    /// The retry policy ran out of attempts or time
    fn on_retries_exceeded(&self, outcome: &Result<T, E>, stats: &ExecutionStats) {
        let _ = (outcome, stats);
    }

    /// The execution was cancelled
    fn on_cancelled(&self, stats: &ExecutionStats) {
        let _ = stats;
    }

    /// An open circuit breaker refused the execution or its next retry
    fn on_circuit_open(&self, stats: &ExecutionStats) {
        let _ = stats;
    }

    /// The execution reached its terminal outcome, whatever it was
    fn on_complete(
        &self,
        outcome: &Result<T, ExecutionError<E>>,
        success: bool,
        stats: &ExecutionStats,
    ) {
        let _ = (outcome, success, stats);
    }
}

/// A listener that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpListener;

impl<T, E> ExecutionListener<T, E> for NoOpListener {}

/// A listener that logs execution events using the `tracing` crate
///
/// # Log Levels
///
/// - `on_retry`: WARN
/// - `on_success`: INFO (after retries) or DEBUG (first attempt)
/// - `on_failure`: ERROR
/// - `on_abort`, `on_retries_exceeded`: DEBUG
/// - `on_cancelled`, `on_circuit_open`: WARN
///
/// # Example
///
/// ```rust
/// use failsafe_core::execution::TracingListener;
///
/// let listener = TracingListener::new("fetch-profile");
/// assert_eq!(listener.operation(), "fetch-profile");
/// ```
#[derive(Debug, Clone)]
pub struct TracingListener {
    /// Name of the guarded operation, used as log context
    operation: String,
}

impl TracingListener {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }
}

impl Default for TracingListener {
    fn default() -> Self {
        Self::new("execution")
    }
}

impl<T, E: fmt::Display> ExecutionListener<T, E> for TracingListener {
    fn on_retry(&self, outcome: &Result<T, E>, delay: Duration, stats: &ExecutionStats) {
        match outcome {
            Err(err) => tracing::warn!(
                operation = %self.operation,
                attempt = stats.attempts,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "attempt failed, will retry"
            ),
            Ok(_) => tracing::warn!(
                operation = %self.operation,
                attempt = stats.attempts,
                delay_ms = delay.as_millis() as u64,
                "attempt returned a retryable result, will retry"
            ),
        }
    }

    fn on_success(&self, _value: &T, stats: &ExecutionStats) {
        if stats.attempts > 1 {
            tracing::info!(
                operation = %self.operation,
                attempts = stats.attempts,
                total_duration_ms = stats.elapsed.as_millis() as u64,
                "succeeded after retry"
            );
        } else {
            tracing::debug!(
                operation = %self.operation,
                duration_ms = stats.elapsed.as_millis() as u64,
                "succeeded on first attempt"
            );
        }
    }

    fn on_failure(&self, outcome: &Result<T, ExecutionError<E>>, stats: &ExecutionStats) {
        match outcome {
            Err(err) => tracing::error!(
                operation = %self.operation,
                attempts = stats.attempts,
                error = %err,
                "execution failed"
            ),
            Ok(_) => tracing::error!(
                operation = %self.operation,
                attempts = stats.attempts,
                "execution ended with an unaccepted result"
            ),
        }
    }

    fn on_abort(&self, _outcome: &Result<T, E>, stats: &ExecutionStats) {
        tracing::debug!(
            operation = %self.operation,
            attempt = stats.attempts,
            "abort condition matched"
        );
    }

    fn on_retries_exceeded(&self, _outcome: &Result<T, E>, stats: &ExecutionStats) {
        tracing::debug!(
            operation = %self.operation,
            attempts = stats.attempts,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "retry budget exhausted"
        );
    }

    fn on_cancelled(&self, stats: &ExecutionStats) {
        tracing::warn!(
            operation = %self.operation,
            attempts = stats.attempts,
            "execution cancelled"
        );
    }

    fn on_circuit_open(&self, stats: &ExecutionStats) {
        tracing::warn!(
            operation = %self.operation,
            attempts = stats.attempts,
            "circuit breaker open, execution rejected"
        );
    }
}

/// A listener that counts execution events
///
/// Useful for testing and metrics collection.
#[derive(Debug, Default)]
pub struct StatsListener {
    attempts: AtomicU32,
    retries: AtomicU32,
    successes: AtomicU32,
    failures: AtomicU32,
    aborts: AtomicU32,
    exhaustions: AtomicU32,
    cancellations: AtomicU32,
    circuit_rejections: AtomicU32,
    completions: AtomicU32,
}

impl StatsListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts that reported an outcome
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn retries(&self) -> u32 {
        self.retries.load(Ordering::SeqCst)
    }

    pub fn successes(&self) -> u32 {
        self.successes.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn aborts(&self) -> u32 {
        self.aborts.load(Ordering::SeqCst)
    }

    pub fn exhaustions(&self) -> u32 {
        self.exhaustions.load(Ordering::SeqCst)
    }

    pub fn cancellations(&self) -> u32 {
        self.cancellations.load(Ordering::SeqCst)
    }

    pub fn circuit_rejections(&self) -> u32 {
        self.circuit_rejections.load(Ordering::SeqCst)
    }

    pub fn completions(&self) -> u32 {
        self.completions.load(Ordering::SeqCst)
    }
}

impl<T, E> ExecutionListener<T, E> for StatsListener {
    fn on_attempt_complete(&self, _outcome: &Result<T, E>, _stats: &ExecutionStats) {
        self.attempts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_retry(&self, _outcome: &Result<T, E>, _delay: Duration, _stats: &ExecutionStats) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }

    fn on_success(&self, _value: &T, _stats: &ExecutionStats) {
        self.successes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_failure(&self, _outcome: &Result<T, ExecutionError<E>>, _stats: &ExecutionStats) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }

    fn on_abort(&self, _outcome: &Result<T, E>, _stats: &ExecutionStats) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_retries_exceeded(&self, _outcome: &Result<T, E>, _stats: &ExecutionStats) {
        self.exhaustions.fetch_add(1, Ordering::SeqCst);
    }

    fn on_cancelled(&self, _stats: &ExecutionStats) {
        self.cancellations.fetch_add(1, Ordering::SeqCst);
    }

    fn on_circuit_open(&self, _stats: &ExecutionStats) {
        self.circuit_rejections.fetch_add(1, Ordering::SeqCst);
    }

    fn on_complete(
        &self,
        _outcome: &Result<T, ExecutionError<E>>,
        _success: bool,
        _stats: &ExecutionStats,
    ) {
        self.completions.fetch_add(1, Ordering::SeqCst);
    }
}

type OutcomeHook<T, E> = Arc<dyn Fn(&Result<T, E>, &ExecutionStats) + Send + Sync>;
type FinalHook<T, E> = Arc<dyn Fn(&Result<T, ExecutionError<E>>, &ExecutionStats) + Send + Sync>;

/// A listener assembled from closures
///
/// # Example
///
/// ```rust
/// use failsafe_core::execution::HookListener;
///
/// let listener: HookListener<u32, String> = HookListener::new()
///     .on_success(|value, stats| println!("got {} after {} attempts", value, stats.attempts))
///     .on_failure(|outcome, _| println!("gave up: {:?}", outcome.as_ref().err()));
/// ```
pub struct HookListener<T, E> {
    attempt_complete: Option<OutcomeHook<T, E>>,
    retry: Option<Arc<dyn Fn(&Result<T, E>, Duration, &ExecutionStats) + Send + Sync>>,
    success: Option<Arc<dyn Fn(&T, &ExecutionStats) + Send + Sync>>,
    failure: Option<FinalHook<T, E>>,
    complete: Option<FinalHook<T, E>>,
}

impl<T, E> HookListener<T, E> {
    pub fn new() -> Self {
        Self {
            attempt_complete: None,
            retry: None,
            success: None,
            failure: None,
            complete: None,
        }
    }

    pub fn on_attempt_complete(
        mut self,
        hook: impl Fn(&Result<T, E>, &ExecutionStats) + Send + Sync + 'static,
    ) -> Self {
        self.attempt_complete = Some(Arc::new(hook));
        self
    }

    pub fn on_retry(
        mut self,
        hook: impl Fn(&Result<T, E>, Duration, &ExecutionStats) + Send + Sync + 'static,
    ) -> Self {
        self.retry = Some(Arc::new(hook));
        self
    }

    pub fn on_success(mut self, hook: impl Fn(&T, &ExecutionStats) + Send + Sync + 'static) -> Self {
        self.success = Some(Arc::new(hook));
        self
    }

    pub fn on_failure(
        mut self,
        hook: impl Fn(&Result<T, ExecutionError<E>>, &ExecutionStats) + Send + Sync + 'static,
    ) -> Self {
        self.failure = Some(Arc::new(hook));
        self
    }

    pub fn on_complete(
        mut self,
        hook: impl Fn(&Result<T, ExecutionError<E>>, &ExecutionStats) + Send + Sync + 'static,
    ) -> Self {
        self.complete = Some(Arc::new(hook));
        self
    }
}

impl<T, E> Default for HookListener<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> ExecutionListener<T, E> for HookListener<T, E> {
    fn on_attempt_complete(&self, outcome: &Result<T, E>, stats: &ExecutionStats) {
        if let Some(hook) = &self.attempt_complete {
            hook(outcome, stats);
        }
    }

    fn on_retry(&self, outcome: &Result<T, E>, delay: Duration, stats: &ExecutionStats) {
        if let Some(hook) = &self.retry {
            hook(outcome, delay, stats);
        }
    }

    fn on_success(&self, value: &T, stats: &ExecutionStats) {
        if let Some(hook) = &self.success {
            hook(value, stats);
        }
    }

    fn on_failure(&self, outcome: &Result<T, ExecutionError<E>>, stats: &ExecutionStats) {
        if let Some(hook) = &self.failure {
            hook(outcome, stats);
        }
    }

    fn on_complete(
        &self,
        outcome: &Result<T, ExecutionError<E>>,
        _success: bool,
        stats: &ExecutionStats,
    ) {
        if let Some(hook) = &self.complete {
            hook(outcome, stats);
        }
    }
}

/// Implement ExecutionListener for Arc<L> where L: ExecutionListener
impl<T, E, L: ExecutionListener<T, E> + ?Sized> ExecutionListener<T, E> for Arc<L> {
    fn on_attempt_complete(&self, outcome: &Result<T, E>, stats: &ExecutionStats) {
        (**self).on_attempt_complete(outcome, stats)
    }

    fn on_retry(&self, outcome: &Result<T, E>, delay: Duration, stats: &ExecutionStats) {
        (**self).on_retry(outcome, delay, stats)
    }

    fn on_success(&self, value: &T, stats: &ExecutionStats) {
        (**self).on_success(value, stats)
    }

    fn on_failure(&self, outcome: &Result<T, ExecutionError<E>>, stats: &ExecutionStats) {
        (**self).on_failure(outcome, stats)
    }

    fn on_abort(&self, outcome: &Result<T, E>, stats: &ExecutionStats) {
        (**self).on_abort(outcome, stats)
    }

    fn on_retries_exceeded(&self, outcome: &Result<T, E>, stats: &ExecutionStats) {
        (**self).on_retries_exceeded(outcome, stats)
    }

    fn on_cancelled(&self, stats: &ExecutionStats) {
        (**self).on_cancelled(stats)
    }

    fn on_circuit_open(&self, stats: &ExecutionStats) {
        (**self).on_circuit_open(stats)
    }

    fn on_complete(
        &self,
        outcome: &Result<T, ExecutionError<E>>,
        success: bool,
        stats: &ExecutionStats,
    ) {
        (**self).on_complete(outcome, success, stats)
    }
}

/// Implement ExecutionListener for Box<L> where L: ExecutionListener
impl<T, E, L: ExecutionListener<T, E> + ?Sized> ExecutionListener<T, E> for Box<L> {
    fn on_attempt_complete(&self, outcome: &Result<T, E>, stats: &ExecutionStats) {
        (**self).on_attempt_complete(outcome, stats)
    }

    fn on_retry(&self, outcome: &Result<T, E>, delay: Duration, stats: &ExecutionStats) {
        (**self).on_retry(outcome, delay, stats)
    }

    fn on_success(&self, value: &T, stats: &ExecutionStats) {
        (**self).on_success(value, stats)
    }

    fn on_failure(&self, outcome: &Result<T, ExecutionError<E>>, stats: &ExecutionStats) {
        (**self).on_failure(outcome, stats)
    }

    fn on_abort(&self, outcome: &Result<T, E>, stats: &ExecutionStats) {
        (**self).on_abort(outcome, stats)
    }

    fn on_retries_exceeded(&self, outcome: &Result<T, E>, stats: &ExecutionStats) {
        (**self).on_retries_exceeded(outcome, stats)
    }

    fn on_cancelled(&self, stats: &ExecutionStats) {
        (**self).on_cancelled(stats)
    }

    fn on_circuit_open(&self, stats: &ExecutionStats) {
        (**self).on_circuit_open(stats)
    }

    fn on_complete(
        &self,
        outcome: &Result<T, ExecutionError<E>>,
        success: bool,
        stats: &ExecutionStats,
    ) {
        (**self).on_complete(outcome, success, stats)
    }
}

/// The registered listeners of an execution
///
/// Each hook is delivered to every listener in registration order. Panics
/// inside a hook are caught and logged.
pub struct Listeners<T, E> {
    listeners: Vec<Arc<dyn ExecutionListener<T, E>>>,
}

impl<T, E> Listeners<T, E> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    pub fn push(&mut self, listener: Arc<dyn ExecutionListener<T, E>>) {
        self.listeners.push(listener);
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    fn each(&self, hook: &str, f: impl Fn(&dyn ExecutionListener<T, E>)) {
        for listener in &self.listeners {
            let result = catch_unwind(AssertUnwindSafe(|| f(listener.as_ref())));
            if result.is_err() {
                tracing::warn!(hook = hook, "execution listener panicked; ignoring");
            }
        }
    }

    pub(crate) fn attempt_complete(&self, outcome: &Result<T, E>, stats: &ExecutionStats) {
        self.each("on_attempt_complete", |l| l.on_attempt_complete(outcome, stats));
    }

    pub(crate) fn retry(&self, outcome: &Result<T, E>, delay: Duration, stats: &ExecutionStats) {
        self.each("on_retry", |l| l.on_retry(outcome, delay, stats));
    }

    pub(crate) fn abort(&self, outcome: &Result<T, E>, stats: &ExecutionStats) {
        self.each("on_abort", |l| l.on_abort(outcome, stats));
    }

    pub(crate) fn retries_exceeded(&self, outcome: &Result<T, E>, stats: &ExecutionStats) {
        self.each("on_retries_exceeded", |l| l.on_retries_exceeded(outcome, stats));
    }

    pub(crate) fn circuit_open(&self, stats: &ExecutionStats) {
        self.each("on_circuit_open", |l| l.on_circuit_open(stats));
    }

    /// Deliver the terminal outcome: success, cancellation or failure, then
    /// completion
    pub(crate) fn completed(
        &self,
        outcome: &Result<T, ExecutionError<E>>,
        success: bool,
        stats: &ExecutionStats,
    ) {
        match outcome {
            Ok(value) if success => self.each("on_success", |l| l.on_success(value, stats)),
            Err(ExecutionError::Cancelled { .. }) => {
                self.each("on_cancelled", |l| l.on_cancelled(stats))
            }
            _ => self.each("on_failure", |l| l.on_failure(outcome, stats)),
        }
        self.each("on_complete", |l| l.on_complete(outcome, success, stats));
    }
}

impl<T, E> Default for Listeners<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Clone for Listeners<T, E> {
    fn clone(&self) -> Self {
        Self {
            listeners: self.listeners.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Listeners<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.listeners.len())
            .finish()
    }
}
