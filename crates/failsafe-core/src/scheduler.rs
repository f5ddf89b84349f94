//! Delayed task scheduling
//!
//! Executions never run attempts themselves. They hand each attempt to a
//! [`Scheduler`] together with a delay and keep the returned
//! [`ScheduledTask`] so the attempt can be cancelled before it starts.
//!
//! Two schedulers are provided:
//!
//! - [`TokioScheduler`] sleeps on a tokio runtime and then runs the attempt
//!   on the blocking pool, since attempts are ordinary synchronous closures.
//! - [`ManualScheduler`] keeps tasks in a queue driven by a virtual clock,
//!   for deterministic tests.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{Error, Result};

/// A unit of work handed to a scheduler
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks after a delay
pub trait Scheduler: Send + Sync {
    /// Run `task` once `delay` has passed
    ///
    /// A zero delay must run the task promptly. Failing to accept the task
    /// (for example after shutdown) is reported as an error, never a panic.
    /// A scheduler that accepts a task and later drops it unrun, as a tokio
    /// runtime does once shut down, fails the execution waiting on it.
    fn schedule(&self, task: Task, delay: Duration) -> Result<Box<dyn ScheduledTask>>;
}

/// Handle to a task accepted by a [`Scheduler`]
pub trait ScheduledTask: Send + Sync {
    /// Try to stop the task, returning whether it was stopped
    ///
    /// A task that has not started yet is always stoppable. A task that has
    /// started is only signalled when `may_interrupt_if_running` is set, and
    /// may still run to completion.
    fn cancel(&self, may_interrupt_if_running: bool) -> bool;

    /// Whether the task has finished or been cancelled
    fn is_done(&self) -> bool;
}

impl<S: Scheduler + ?Sized> Scheduler for Arc<S> {
    fn schedule(&self, task: Task, delay: Duration) -> Result<Box<dyn ScheduledTask>> {
        (**self).schedule(task, delay)
    }
}

// ============================================================================
// Tokio
// ============================================================================

/// Scheduler backed by a tokio runtime
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    /// Schedule onto the given runtime
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Schedule onto the runtime the caller is running in
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| Error::scheduler_rejected(format!("no tokio runtime available: {}", e)))
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, task: Task, delay: Duration) -> Result<Box<dyn ScheduledTask>> {
        let started = Arc::new(AtomicBool::new(false));
        let flag = started.clone();
        let join = self.handle.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            flag.store(true, Ordering::SeqCst);
            if let Err(e) = tokio::task::spawn_blocking(task).await {
                if e.is_panic() {
                    debug!(error = %e, "Scheduled task panicked");
                }
            }
        });
        Ok(Box::new(TokioTask { join, started }))
    }
}

struct TokioTask {
    join: JoinHandle<()>,
    started: Arc<AtomicBool>,
}

impl ScheduledTask for TokioTask {
    fn cancel(&self, may_interrupt_if_running: bool) -> bool {
        if self.join.is_finished() {
            return false;
        }
        if self.started.load(Ordering::SeqCst) && !may_interrupt_if_running {
            return false;
        }
        self.join.abort();
        true
    }

    fn is_done(&self) -> bool {
        self.join.is_finished()
    }
}

// ============================================================================
// Manual
// ============================================================================

const PENDING: u8 = 0;
const STARTED: u8 = 1;
const CANCELLED: u8 = 2;

struct Entry {
    id: u64,
    due: Duration,
    task: Task,
    status: Arc<AtomicU8>,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_id: u64,
    queue: Vec<Entry>,
    shut_down: bool,
}

/// A scheduler that only runs tasks when told to
///
/// Time is virtual: it starts at zero and moves with [`ManualScheduler::advance`].
/// Clones share the same queue.
///
/// # Example
///
/// ```rust
/// use failsafe_core::scheduler::{ManualScheduler, Scheduler};
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let scheduler = ManualScheduler::new();
/// let ran = Arc::new(AtomicBool::new(false));
/// let flag = ran.clone();
/// scheduler
///     .schedule(Box::new(move || flag.store(true, Ordering::SeqCst)), Duration::from_secs(1))
///     .unwrap();
///
/// assert_eq!(scheduler.run_pending(), 0);
/// assert_eq!(scheduler.advance(Duration::from_secs(1)), 1);
/// assert!(ran.load(Ordering::SeqCst));
/// ```
#[derive(Clone, Default)]
pub struct ManualScheduler {
    state: Arc<Mutex<ManualState>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every task scheduled from now on
    pub fn shutdown(&self) {
        self.state.lock().shut_down = true;
    }

    /// Virtual time elapsed so far
    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    /// Tasks waiting to run, excluding cancelled ones
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .queue
            .iter()
            .filter(|entry| entry.status.load(Ordering::SeqCst) == PENDING)
            .count()
    }

    /// Delay requested by the next task to run, relative to its scheduling
    pub fn next_due(&self) -> Option<Duration> {
        let state = self.state.lock();
        state
            .queue
            .iter()
            .filter(|entry| entry.status.load(Ordering::SeqCst) == PENDING)
            .map(|entry| entry.due.saturating_sub(state.now))
            .min()
    }

    /// Run every task that is due, including tasks they schedule with no
    /// delay, and return how many ran
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Some(task) = self.take_due() {
            task();
            ran += 1;
        }
        ran
    }

    /// Move virtual time forward, running tasks in due order as it passes
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.state.lock().now + by;
        let mut ran = 0;
        loop {
            ran += self.run_pending();
            let mut state = self.state.lock();
            let next = state
                .queue
                .iter()
                .filter(|entry| entry.status.load(Ordering::SeqCst) == PENDING)
                .map(|entry| entry.due)
                .min();
            match next {
                Some(due) if due <= target => state.now = due.max(state.now),
                _ => {
                    state.now = target;
                    break;
                }
            }
        }
        ran + self.run_pending()
    }

    /// Keep advancing to the next due task until the queue is empty
    pub fn run_until_idle(&self) -> usize {
        let mut ran = self.run_pending();
        while let Some(wait) = self.next_due() {
            ran += self.advance(wait);
        }
        ran
    }

    fn take_due(&self) -> Option<Task> {
        let mut state = self.state.lock();
        state
            .queue
            .retain(|entry| entry.status.load(Ordering::SeqCst) != CANCELLED);
        let now = state.now;
        let index = state
            .queue
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.due <= now)
            .min_by_key(|(_, entry)| (entry.due, entry.id))
            .map(|(index, _)| index)?;
        let entry = state.queue.remove(index);
        entry
            .status
            .compare_exchange(PENDING, STARTED, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| entry.task)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, task: Task, delay: Duration) -> Result<Box<dyn ScheduledTask>> {
        let mut state = self.state.lock();
        if state.shut_down {
            return Err(Error::scheduler_rejected("scheduler has been shut down"));
        }
        let status = Arc::new(AtomicU8::new(PENDING));
        let id = state.next_id;
        state.next_id += 1;
        let due = state.now + delay;
        state.queue.push(Entry {
            id,
            due,
            task,
            status: status.clone(),
        });
        Ok(Box::new(ManualTask { status }))
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ManualScheduler")
            .field("now", &state.now)
            .field("queued", &state.queue.len())
            .field("shut_down", &state.shut_down)
            .finish()
    }
}

struct ManualTask {
    status: Arc<AtomicU8>,
}

impl ScheduledTask for ManualTask {
    fn cancel(&self, _may_interrupt_if_running: bool) -> bool {
        self.status
            .compare_exchange(PENDING, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn is_done(&self) -> bool {
        self.status.load(Ordering::SeqCst) != PENDING
    }
}
