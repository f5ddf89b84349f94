//! The caller-visible handle of an execution

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use super::async_execution::ExecutionInner;
use super::error::ExecutionError;
use super::listener::{ExecutionStats, Listeners};

enum Slot<T, E> {
    Empty,
    Ready(Result<T, ExecutionError<E>>),
    Taken,
}

struct FutureState<T, E> {
    /// Set by the first completion; later completions are ignored
    claimed: bool,
    cancelled: bool,
    slot: Slot<T, E>,
    waker: Option<Waker>,
}

pub(crate) struct FutureCore<T, E> {
    state: Mutex<FutureState<T, E>>,
    ready: Condvar,
    listeners: Mutex<Listeners<T, E>>,
    execution: Mutex<Option<Weak<ExecutionInner<T, E>>>>,
}

impl<T, E> FutureCore<T, E> {
    fn new() -> Self {
        Self {
            state: Mutex::new(FutureState {
                claimed: false,
                cancelled: false,
                slot: Slot::Empty,
                waker: None,
            }),
            ready: Condvar::new(),
            listeners: Mutex::new(Listeners::new()),
            execution: Mutex::new(None),
        }
    }

    /// Set the outcome unless one was already set
    ///
    /// Listeners run on the completing thread before waiters are released.
    pub(crate) fn complete(
        &self,
        outcome: Result<T, ExecutionError<E>>,
        success: bool,
        stats: ExecutionStats,
    ) -> bool {
        {
            let mut state = self.state.lock();
            if state.claimed {
                return false;
            }
            state.claimed = true;
            state.cancelled = matches!(outcome, Err(ExecutionError::Cancelled { .. }));
        }

        let listeners = self.listeners.lock().clone();
        listeners.completed(&outcome, success, &stats);

        let waker = {
            let mut state = self.state.lock();
            state.slot = Slot::Ready(outcome);
            state.waker.take()
        };
        self.ready.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    pub(crate) fn is_done(&self) -> bool {
        !matches!(self.state.lock().slot, Slot::Empty)
    }
}

/// Handle to the eventual outcome of an execution
///
/// The outcome is set exactly once, by the execution finishing, by
/// [`FailsafeFuture::cancel`], or by [`FailsafeFuture::complete`]. It can be
/// awaited, or waited for synchronously with [`FailsafeFuture::get`].
///
/// # Example
///
/// ```rust
/// use failsafe_core::execution::{ExecutionError, FailsafeFuture};
///
/// let future: FailsafeFuture<u32, String> = FailsafeFuture::new();
/// assert!(future.complete(Ok(1), true));
/// assert!(!future.complete(Err(ExecutionError::CircuitOpen), false));
/// assert_eq!(future.get().unwrap(), 1);
/// ```
pub struct FailsafeFuture<T, E> {
    core: Arc<FutureCore<T, E>>,
}

impl<T, E> FailsafeFuture<T, E> {
    /// Create a future not yet bound to any execution
    pub fn new() -> Self {
        Self {
            core: Arc::new(FutureCore::new()),
        }
    }

    pub(crate) fn core(&self) -> Arc<FutureCore<T, E>> {
        self.core.clone()
    }

    /// Attach the execution driving this future and the listeners to notify
    ///
    /// Returns false if the future is already bound or already complete.
    pub(crate) fn bind(
        &self,
        execution: Weak<ExecutionInner<T, E>>,
        listeners: Listeners<T, E>,
    ) -> bool {
        let mut linked = self.core.execution.lock();
        if linked.is_some() || self.core.is_done() {
            return false;
        }
        *linked = Some(execution);
        *self.core.listeners.lock() = listeners;
        true
    }

    fn execution(&self) -> Option<Arc<ExecutionInner<T, E>>> {
        self.core.execution.lock().as_ref().and_then(Weak::upgrade)
    }

    /// Whether an outcome has been set
    pub fn is_done(&self) -> bool {
        self.core.is_done()
    }

    /// Whether the outcome is a cancellation
    pub fn is_cancelled(&self) -> bool {
        self.core.state.lock().cancelled
    }

    /// Block until an outcome is set or `timeout` passes, returning whether
    /// the outcome is available
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.core.state.lock();
        while matches!(state.slot, Slot::Empty) {
            if self.core.ready.wait_until(&mut state, deadline).timed_out() {
                return !matches!(state.slot, Slot::Empty);
            }
        }
        true
    }
}

impl<T, E> FailsafeFuture<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Set the outcome unless one is already set
    ///
    /// Returns whether this call set it. `success` tells listeners whether to
    /// treat a value as a success.
    pub fn complete(&self, outcome: Result<T, ExecutionError<E>>, success: bool) -> bool {
        let stats = self
            .execution()
            .map(|execution| execution.stats())
            .unwrap_or_default();
        self.core.complete(outcome, success, stats)
    }

    /// Cancel the execution behind this future
    ///
    /// A pending retry is prevented from starting. An attempt already
    /// running is only signalled when `may_interrupt_if_running` is set, and
    /// its outcome is discarded either way. Returns false if the future
    /// already had an outcome.
    pub fn cancel(&self, may_interrupt_if_running: bool) -> bool {
        match self.execution() {
            Some(execution) => execution.cancel(may_interrupt_if_running),
            None => self
                .core
                .complete(Err(ExecutionError::cancelled(0)), false, ExecutionStats::default()),
        }
    }

    /// Block until the outcome is available and return it
    ///
    /// # Panics
    ///
    /// Panics if the outcome was already taken by awaiting the future.
    pub fn get(self) -> Result<T, ExecutionError<E>> {
        let mut state = self.core.state.lock();
        while matches!(state.slot, Slot::Empty) {
            self.core.ready.wait(&mut state);
        }
        take_outcome(&mut state)
    }

    /// Block until the outcome is available or `timeout` passes
    ///
    /// Expiry yields [`ExecutionError::Timeout`] and leaves the execution
    /// running.
    ///
    /// # Panics
    ///
    /// Panics if the outcome was already taken by awaiting the future.
    pub fn get_timeout(self, timeout: Duration) -> Result<T, ExecutionError<E>> {
        if !self.wait_timeout(timeout) {
            return Err(ExecutionError::Timeout { timeout });
        }
        let mut state = self.core.state.lock();
        take_outcome(&mut state)
    }
}

fn take_outcome<T, E>(state: &mut FutureState<T, E>) -> Result<T, ExecutionError<E>> {
    match std::mem::replace(&mut state.slot, Slot::Taken) {
        Slot::Ready(outcome) => outcome,
        Slot::Empty | Slot::Taken => panic!("FailsafeFuture outcome taken after completion"),
    }
}

impl<T, E> Default for FailsafeFuture<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Future for FailsafeFuture<T, E> {
    type Output = Result<T, ExecutionError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.core.state.lock();
        if matches!(state.slot, Slot::Empty) {
            state.waker = Some(cx.waker().clone());
            return Poll::Pending;
        }
        Poll::Ready(take_outcome(&mut state))
    }
}

impl<T, E> fmt::Debug for FailsafeFuture<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.core.state.lock();
        let status = match state.slot {
            Slot::Empty if state.claimed => "completing",
            Slot::Empty => "pending",
            Slot::Ready(_) => "ready",
            Slot::Taken => "taken",
        };
        f.debug_struct("FailsafeFuture")
            .field("status", &status)
            .field("cancelled", &state.cancelled)
            .finish()
    }
}
