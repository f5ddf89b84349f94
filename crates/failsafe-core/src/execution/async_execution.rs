//! The per-call attempt driver
//!
//! An [`AsyncExecution`] owns the attempt counter of one logical call. Each
//! attempt reports its outcome back into it; the execution then records the
//! outcome with the circuit breaker, asks the retry policy what to do, and
//! either completes the future or schedules the next attempt.
//!
//! ```text
//!            record                         scheduled attempt starts
//!  Running ----------> AwaitingRetry -------------------------------> Running
//!     |                     |
//!     | stop                | cancel
//!     v                     v
//!  Completed            Cancelled
//! ```
//!
//! The completion and cancellation paths race on the state lock; whichever
//! leaves the running states first wins and the other does nothing.
//!
//! An execution also completes when an attempt panics, when its scheduled
//! task is dropped without running, or when the last handle to a running
//! attempt is dropped before it reports.

use parking_lot::{Mutex, MutexGuard};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::circuit::{CircuitBreaker, HalfOpenSlot};
use crate::clock::SharedClock;
use crate::error::Error;
use crate::retry::{Decision, RetryPolicy, StopReason};
use crate::scheduler::{ScheduledTask, Scheduler, Task};

use super::callable::{Callable, ExecutionContext};
use super::error::{panic_message, ExecutionError};
use super::future::{FailsafeFuture, FutureCore};
use super::listener::{ExecutionStats, Listeners};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    AwaitingRetry,
    Completed,
    Cancelled,
}

impl Phase {
    fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Cancelled)
    }
}

/// What happened to a reported outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handled {
    Completed,
    Retrying,
    /// The policy wants a retry but the caller asked only to complete
    Deferred,
    /// The execution was not waiting for an outcome
    Ignored,
}

struct ExecutionState<T, E> {
    phase: Phase,
    attempts: u32,
    /// The current attempt has been handed to the operation
    started: bool,
    attempt_started: Instant,
    /// Half-open breaker slot held by the current attempt until it records
    slot: Option<HalfOpenSlot>,
    /// Handle of the scheduled attempt, tagged with its attempt number
    pending: Option<(u32, Box<dyn ScheduledTask>)>,
    /// Outcome held back by `complete` for a later `retry`
    last_outcome: Option<Result<T, E>>,
}

/// Everything an execution needs besides its operation
pub(crate) struct ExecutionSetup<T, E> {
    pub(crate) policy: Arc<RetryPolicy<T, E>>,
    pub(crate) breaker: Option<Arc<CircuitBreaker>>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) listeners: Listeners<T, E>,
    pub(crate) clock: SharedClock,
}

impl<T, E> Clone for ExecutionSetup<T, E> {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy.clone(),
            breaker: self.breaker.clone(),
            scheduler: self.scheduler.clone(),
            listeners: self.listeners.clone(),
            clock: self.clock.clone(),
        }
    }
}

pub(crate) struct ExecutionInner<T, E> {
    callable: Callable<T, E>,
    setup: ExecutionSetup<T, E>,
    future: Arc<FutureCore<T, E>>,
    start_time: Instant,
    state: Mutex<ExecutionState<T, E>>,
}

impl<T, E> ExecutionInner<T, E> {
    fn stats_of(&self, state: &ExecutionState<T, E>) -> ExecutionStats {
        ExecutionStats {
            attempts: state.attempts,
            elapsed: self
                .setup
                .clock
                .now()
                .saturating_duration_since(self.start_time),
        }
    }

    pub(crate) fn stats(&self) -> ExecutionStats {
        self.stats_of(&self.state.lock())
    }

    fn release_slot(&self, slot: Option<HalfOpenSlot>) {
        if let (Some(breaker), Some(slot)) = (&self.setup.breaker, slot) {
            breaker.release_slot(slot);
        }
    }

    /// Move to `Cancelled` unless already terminal
    ///
    /// Returns whether the cancellation became the future's outcome.
    pub(crate) fn cancel(&self, may_interrupt_if_running: bool) -> bool {
        let (pending, slot, stats) = {
            let mut state = self.state.lock();
            if state.phase.is_terminal() {
                return false;
            }
            state.phase = Phase::Cancelled;
            state.last_outcome = None;
            (state.pending.take(), state.slot.take(), self.stats_of(&state))
        };
        self.release_slot(slot);

        if let Some((attempt, handle)) = pending {
            let stopped = handle.cancel(may_interrupt_if_running);
            debug!(attempt = attempt, stopped = stopped, "Cancelled scheduled attempt");
        }
        debug!(attempts = stats.attempts, "Execution cancelled");
        self.future
            .complete(Err(ExecutionError::cancelled(stats.attempts)), false, stats)
    }
}

/// Handle to the execution of one logical call
///
/// Operations created with [`Callable::manual`] or
/// [`Callable::future_manual`] receive this handle and use it to report
/// their outcome. Every attempt may report at most once: after an outcome
/// has been recorded and a retry scheduled, further reports for that
/// attempt are ignored.
///
/// # Example
///
/// ```rust
/// use failsafe_core::execution::Callable;
///
/// // Retry until the value arrives, handing outcomes back by hand
/// let callable: Callable<String, std::io::Error> = Callable::manual(|execution| {
///     if execution.attempts() < 3 {
///         execution.retry_on(std::io::Error::other("not ready"));
///     } else {
///         execution.record_result("ready".to_string());
///     }
/// });
/// # let _ = callable;
/// ```
pub struct AsyncExecution<T, E> {
    inner: Arc<ExecutionInner<T, E>>,
}

impl<T, E> AsyncExecution<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Create an execution driving `future`
    ///
    /// Returns `None` if the future is already bound to another execution
    /// or already complete.
    pub(crate) fn new(
        setup: ExecutionSetup<T, E>,
        callable: Callable<T, E>,
        future: &FailsafeFuture<T, E>,
    ) -> Option<Self> {
        let now = setup.clock.now();
        let listeners = setup.listeners.clone();
        let inner = Arc::new(ExecutionInner {
            callable,
            setup,
            future: future.core(),
            start_time: now,
            state: Mutex::new(ExecutionState {
                phase: Phase::Running,
                attempts: 1,
                started: false,
                attempt_started: now,
                slot: None,
                pending: None,
                last_outcome: None,
            }),
        });
        if !future.bind(Arc::downgrade(&inner), listeners) {
            // Keep the refused execution from completing a future it does not own
            inner.state.lock().phase = Phase::Completed;
            return None;
        }
        Some(Self { inner })
    }

    /// Schedule the first attempt
    pub(crate) fn start(&self) {
        self.schedule(1, Duration::ZERO);
    }

    /// The current attempt number, starting at 1
    pub fn attempts(&self) -> u32 {
        self.inner.state.lock().attempts
    }

    /// When the execution was created
    pub fn start_time(&self) -> Instant {
        self.inner.start_time
    }

    /// Time since the execution was created
    pub fn elapsed(&self) -> Duration {
        self.inner
            .setup
            .clock
            .now()
            .saturating_duration_since(self.inner.start_time)
    }

    /// Whether the execution has reached a terminal outcome, cancellation
    /// included
    pub fn is_complete(&self) -> bool {
        self.inner.state.lock().phase.is_terminal()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.state.lock().phase == Phase::Cancelled
    }

    /// Snapshot of the execution's progress
    pub fn context(&self) -> ExecutionContext {
        let stats = self.inner.stats();
        ExecutionContext::new(stats.attempts, self.inner.start_time, stats.elapsed)
    }

    /// Report the current attempt's outcome, then complete or retry
    ///
    /// Returns whether the execution completed.
    pub fn record(&self, outcome: Result<T, E>) -> bool {
        self.report(outcome, false) == Handled::Completed
    }

    /// [`Self::record`] for a value
    pub fn record_result(&self, value: T) -> bool {
        self.record(Ok(value))
    }

    /// [`Self::record`] for an error
    pub fn record_failure(&self, error: E) -> bool {
        self.record(Err(error))
    }

    /// Complete with `value` if the retry policy accepts it
    ///
    /// When the policy would retry instead, nothing is scheduled and the
    /// value is kept for a later [`Self::retry`]. Returns whether the
    /// execution completed.
    pub fn complete(&self, value: T) -> bool {
        self.report(Ok(value), true) == Handled::Completed
    }

    /// Retry using the outcome held back by [`Self::complete`]
    ///
    /// Returns whether a retry was scheduled.
    pub fn retry(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.phase != Phase::Running {
            return false;
        }
        let held = state.last_outcome.take();
        match held {
            Some(outcome) => self.resolve(state, outcome, false, false) == Handled::Retrying,
            None => false,
        }
    }

    /// Report `error` and retry if the policy allows, completing otherwise
    ///
    /// Returns whether a retry was scheduled.
    pub fn retry_on(&self, error: E) -> bool {
        self.report(Err(error), false) == Handled::Retrying
    }

    /// Report `value` and retry if the policy allows, completing otherwise
    ///
    /// Returns whether a retry was scheduled.
    pub fn retry_for(&self, value: T) -> bool {
        self.report(Ok(value), false) == Handled::Retrying
    }

    /// Cancel the execution
    ///
    /// A scheduled attempt is prevented from starting; an attempt already
    /// running keeps running but its outcome is discarded. Returns false if
    /// the execution or its future had already finished.
    pub fn cancel(&self, may_interrupt_if_running: bool) -> bool {
        self.inner.cancel(may_interrupt_if_running)
    }

    fn report(&self, outcome: Result<T, E>, defer_retry: bool) -> Handled {
        let state = self.inner.state.lock();
        if state.phase != Phase::Running {
            debug!(
                attempt = state.attempts,
                phase = ?state.phase,
                "Discarding outcome reported outside a running attempt"
            );
            return Handled::Ignored;
        }
        self.resolve(state, outcome, true, defer_retry)
    }

    /// Apply an outcome to a running execution
    ///
    /// Releases the state lock before any listener or future is notified.
    fn resolve(
        &self,
        mut state: MutexGuard<'_, ExecutionState<T, E>>,
        outcome: Result<T, E>,
        record_breaker: bool,
        defer_retry: bool,
    ) -> Handled {
        let inner = &*self.inner;
        let setup = &inner.setup;

        if record_breaker {
            if let Some(breaker) = &setup.breaker {
                let took = setup
                    .clock
                    .now()
                    .saturating_duration_since(state.attempt_started);
                let slot = state.slot.take();
                breaker.record_attempt(setup.policy.is_failure(&outcome), took, slot);
            }
        }

        let stats = inner.stats_of(&state);
        match setup.policy.evaluate(&outcome, stats.attempts, stats.elapsed) {
            Decision::Stop(reason) => {
                state.phase = Phase::Completed;
                state.last_outcome = None;
                let pending = state.pending.take();
                drop(state);
                drop(pending);

                setup.listeners.attempt_complete(&outcome, &stats);
                match reason {
                    StopReason::Aborted => setup.listeners.abort(&outcome, &stats),
                    reason if reason.is_exhausted() => {
                        setup.listeners.retries_exceeded(&outcome, &stats)
                    }
                    _ => {}
                }

                let success = reason == StopReason::NotRetryable && outcome.is_ok();
                let outcome = outcome.map_err(|source| match reason {
                    StopReason::Aborted => ExecutionError::aborted(stats.attempts, source),
                    StopReason::NotRetryable => {
                        ExecutionError::non_retryable(stats.attempts, source)
                    }
                    StopReason::RetriesExceeded | StopReason::DurationExceeded => {
                        ExecutionError::exhausted(stats.attempts, source, stats.elapsed)
                    }
                });
                debug!(
                    attempts = stats.attempts,
                    reason = ?reason,
                    success = success,
                    "Execution completed"
                );
                inner.future.complete(outcome, success, stats);
                Handled::Completed
            }

            Decision::Retry(_) if defer_retry => {
                state.last_outcome = Some(outcome);
                Handled::Deferred
            }

            Decision::Retry(delay) => {
                if let Some(breaker) = &setup.breaker {
                    if !breaker.allows_execution() {
                        state.phase = Phase::Completed;
                        state.last_outcome = None;
                        let pending = state.pending.take();
                        drop(state);
                        drop(pending);

                        setup.listeners.attempt_complete(&outcome, &stats);
                        setup.listeners.circuit_open(&stats);
                        debug!(
                            attempts = stats.attempts,
                            "Circuit breaker open, abandoning retries"
                        );
                        inner
                            .future
                            .complete(Err(ExecutionError::CircuitOpen), false, stats);
                        return Handled::Completed;
                    }
                }

                state.attempts += 1;
                state.started = false;
                state.phase = Phase::AwaitingRetry;
                state.last_outcome = None;
                let next = state.attempts;
                drop(state);

                setup.listeners.attempt_complete(&outcome, &stats);
                setup.listeners.retry(&outcome, delay, &stats);
                debug!(
                    attempt = next,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling retry"
                );
                self.schedule(next, delay);
                Handled::Retrying
            }
        }
    }

    fn schedule(&self, attempt: u32, delay: Duration) {
        let guard = AttemptTask {
            execution: Some(self.clone()),
            attempt,
        };
        let task: Task = Box::new(move || guard.run());

        match self.inner.setup.scheduler.schedule(task, delay) {
            Ok(handle) => {
                let mut state = self.inner.state.lock();
                if state.attempts == attempt && !state.phase.is_terminal() {
                    state.pending = Some((attempt, handle));
                } else if state.phase.is_terminal() {
                    // Cancelled while the task was being handed over
                    drop(state);
                    handle.cancel(false);
                }
            }
            Err(err) => {
                let stats = {
                    let mut state = self.inner.state.lock();
                    if state.phase.is_terminal() {
                        return;
                    }
                    state.phase = Phase::Completed;
                    self.inner.stats_of(&state)
                };
                warn!(attempt = attempt, error = %err, "Failed to schedule attempt");
                self.inner
                    .future
                    .complete(Err(ExecutionError::Scheduling(err)), false, stats);
            }
        }
    }

    fn run_attempt(&self, attempt: u32) {
        {
            let mut state = self.inner.state.lock();
            if state.phase.is_terminal() || state.attempts != attempt {
                return;
            }
            if self.inner.future.is_done() {
                // Completed from outside; nothing left to compute
                state.phase = Phase::Completed;
                state.pending = None;
                return;
            }
            state.phase = Phase::Running;
            state.started = true;
            state.attempt_started = self.inner.setup.clock.now();
            state.pending = None;
            state.slot = self
                .inner
                .setup
                .breaker
                .as_ref()
                .and_then(|breaker| breaker.acquire_slot());
        }

        debug!(attempt = attempt, "Running attempt");
        let call = catch_unwind(AssertUnwindSafe(|| self.inner.callable.call(self.clone())));
        if let Err(payload) = call {
            self.attempt_panicked(attempt, payload.as_ref());
        }
    }

    /// End the execution with [`ExecutionError::Panicked`] if `attempt` is
    /// still running and has not reported
    ///
    /// The panic counts as a failed execution for the circuit breaker.
    pub(crate) fn attempt_panicked(&self, attempt: u32, payload: &(dyn Any + Send)) {
        let inner = &*self.inner;
        let stats = {
            let mut state = inner.state.lock();
            if state.phase != Phase::Running || state.attempts != attempt || !state.started {
                return;
            }
            state.phase = Phase::Completed;
            // A deferred outcome was already recorded with the breaker
            let recorded = state.last_outcome.take().is_some();
            let slot = state.slot.take();
            match &inner.setup.breaker {
                Some(breaker) if !recorded => {
                    let took = inner
                        .setup
                        .clock
                        .now()
                        .saturating_duration_since(state.attempt_started);
                    breaker.record_attempt(true, took, slot);
                }
                _ => {}
            }
            inner.stats_of(&state)
        };

        let message = panic_message(payload);
        warn!(attempt = attempt, panic = %message, "Attempt panicked");
        inner.future.complete(
            Err(ExecutionError::Panicked {
                attempts: stats.attempts,
                message,
            }),
            false,
            stats,
        );
    }

    /// Complete with a scheduling error when the task for `attempt` is
    /// dropped before it ran
    fn attempt_dropped(&self, attempt: u32) {
        let inner = &*self.inner;
        let stats = {
            let mut state = inner.state.lock();
            if state.phase.is_terminal() || state.attempts != attempt || state.started {
                return;
            }
            state.phase = Phase::Completed;
            state.pending = None;
            inner.stats_of(&state)
        };

        warn!(attempt = attempt, "Scheduled attempt was dropped before it ran");
        let err =
            Error::scheduler_rejected(format!("attempt {} was dropped before it ran", attempt));
        inner
            .future
            .complete(Err(ExecutionError::Scheduling(err)), false, stats);
    }
}

/// The task handed to the scheduler for one attempt
///
/// Dropping it unrun, as a runtime does when it shuts down, completes the
/// execution instead of leaving it waiting.
struct AttemptTask<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    execution: Option<AsyncExecution<T, E>>,
    attempt: u32,
}

impl<T, E> AttemptTask<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn run(mut self) {
        if let Some(execution) = self.execution.take() {
            execution.run_attempt(self.attempt);
        }
    }
}

impl<T, E> Drop for AttemptTask<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn drop(&mut self) {
        if let Some(execution) = self.execution.take() {
            execution.attempt_dropped(self.attempt);
        }
    }
}

impl<T, E> Drop for ExecutionInner<T, E> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.phase.is_terminal() {
            return;
        }
        state.phase = Phase::Completed;
        let slot = state.slot.take();
        let stats = ExecutionStats {
            attempts: state.attempts,
            elapsed: self
                .setup
                .clock
                .now()
                .saturating_duration_since(self.start_time),
        };
        self.release_slot(slot);

        warn!(attempt = stats.attempts, "Execution dropped without reporting an outcome");
        self.future.complete(
            Err(ExecutionError::Abandoned {
                attempts: stats.attempts,
            }),
            false,
            stats,
        );
    }
}

impl<T, E> Clone for AsyncExecution<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> fmt::Debug for AsyncExecution<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("AsyncExecution")
            .field("phase", &state.phase)
            .field("attempts", &state.attempts)
            .field("pending", &state.pending.as_ref().map(|(attempt, _)| *attempt))
            .finish()
    }
}
