//! Circuit breaker state machine

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::clock::{system_clock, SharedClock};
use crate::error::{Error, Result};

use super::window::{OutcomeWindow, RollingWindow};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Executions flow through and outcomes are counted
    Closed,
    /// Executions are rejected until the delay elapses
    Open,
    /// A limited number of probe executions test for recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        };
        f.write_str(name)
    }
}

/// Tuning for a [`CircuitBreaker`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitBreakerSettings {
    /// Failure rate in `[0, 1)` above which a closed breaker opens
    pub failure_rate_threshold: f64,
    /// Outcomes that must be in the window before the rate is considered
    pub minimum_executions: u32,
    /// Which outcomes the failure rate is computed over
    pub window: RollingWindow,
    /// How long the breaker stays open before allowing probes
    pub delay: Duration,
    /// Consecutive half-open successes required to close
    pub success_threshold: u32,
    /// Concurrent probes allowed while half-open
    pub half_open_max_probes: u32,
    /// Successful executions slower than this are recorded as failures
    pub timeout: Option<Duration>,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            minimum_executions: 10,
            window: RollingWindow::default(),
            delay: Duration::from_secs(60),
            success_threshold: 1,
            half_open_max_probes: 1,
            timeout: None,
        }
    }
}

impl CircuitBreakerSettings {
    pub fn with_failure_rate_threshold(mut self, threshold: f64) -> Self {
        self.failure_rate_threshold = threshold;
        self
    }

    pub fn with_minimum_executions(mut self, minimum: u32) -> Self {
        self.minimum_executions = minimum;
        self
    }

    pub fn with_window(mut self, window: RollingWindow) -> Self {
        self.window = window;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_success_threshold(mut self, successes: u32) -> Self {
        self.success_threshold = successes;
        self
    }

    pub fn with_half_open_max_probes(mut self, probes: u32) -> Self {
        self.half_open_max_probes = probes;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Check that the settings describe a breaker that can both open and close
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.failure_rate_threshold) {
            return Err(Error::invalid_argument(format!(
                "failure rate threshold must be within [0, 1), got {}",
                self.failure_rate_threshold
            )));
        }
        if self.success_threshold == 0 {
            return Err(Error::invalid_argument(
                "success threshold must be at least 1",
            ));
        }
        if self.half_open_max_probes == 0 {
            return Err(Error::invalid_argument(
                "half-open probe budget must be at least 1",
            ));
        }
        match self.window {
            RollingWindow::Count { size } if size == 0 || size < self.minimum_executions => {
                Err(Error::invalid_argument(format!(
                    "count window of {} cannot hold the minimum of {} executions",
                    size, self.minimum_executions
                )))
            }
            RollingWindow::Time { duration } if duration.is_zero() => Err(
                Error::invalid_argument("time window duration must be positive"),
            ),
            _ => Ok(()),
        }
    }
}

/// Point-in-time view of a breaker's counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    /// Successes currently inside the rolling window
    pub window_successes: u32,
    /// Failures currently inside the rolling window
    pub window_failures: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    /// Executions refused by `allows_execution`
    pub rejections: u64,
}

impl CircuitBreakerMetrics {
    /// Failure rate over the rolling window, zero when it is empty
    pub fn failure_rate(&self) -> f64 {
        let total = self.window_successes + self.window_failures;
        if total == 0 {
            0.0
        } else {
            self.window_failures as f64 / total as f64
        }
    }
}

type StateListener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct StateListeners {
    on_open: Vec<StateListener>,
    on_half_open: Vec<StateListener>,
    on_close: Vec<StateListener>,
}

#[derive(Debug)]
struct BreakerCore {
    state: CircuitState,
    window: OutcomeWindow,
    opened_at: Option<Instant>,
    half_open_successes: u32,
    half_open_in_flight: u32,
    /// Bumped on every entry into half-open
    half_open_epoch: u64,
    total_successes: u64,
    total_failures: u64,
    rejections: u64,
}

impl BreakerCore {
    fn new(window: RollingWindow) -> Self {
        Self {
            state: CircuitState::Closed,
            window: OutcomeWindow::new(window),
            opened_at: None,
            half_open_successes: 0,
            half_open_in_flight: 0,
            half_open_epoch: 0,
            total_successes: 0,
            total_failures: 0,
            rejections: 0,
        }
    }

    /// Move to `to`, returning the transition if the state changed
    fn transition(
        &mut self,
        to: CircuitState,
        now: Instant,
    ) -> Option<(CircuitState, CircuitState)> {
        let from = self.state;
        match to {
            CircuitState::Open => self.opened_at = Some(now),
            CircuitState::Closed | CircuitState::HalfOpen => {
                if to == CircuitState::HalfOpen {
                    self.half_open_epoch += 1;
                }
                self.window.clear();
                self.half_open_successes = 0;
                self.half_open_in_flight = 0;
                self.opened_at = None;
            }
        }
        self.state = to;
        (from != to).then_some((from, to))
    }

    fn holds(&self, slot: HalfOpenSlot) -> bool {
        self.state == CircuitState::HalfOpen && self.half_open_epoch == slot.epoch
    }
}

/// Which half-open slot a recorded outcome frees
#[derive(Debug, Clone, Copy)]
enum Release {
    /// Public recording paths pair with `before_execution` by convention
    Untracked,
    Slot(HalfOpenSlot),
    Nothing,
}

/// A half-open execution slot taken by one attempt
///
/// Slots from an earlier half-open period are stale and release nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HalfOpenSlot {
    epoch: u64,
}

/// A thread-safe circuit breaker
///
/// One breaker is typically shared by many executions. State and counters
/// live behind a single lock; transitions into [`CircuitState::HalfOpen`]
/// happen lazily when [`CircuitBreaker::allows_execution`] notices the open
/// delay has elapsed.
///
/// # Example
///
/// ```rust
/// use failsafe_core::circuit::{CircuitBreaker, CircuitBreakerSettings, CircuitState};
///
/// let breaker = CircuitBreaker::new(
///     CircuitBreakerSettings::default()
///         .with_failure_rate_threshold(0.5)
///         .with_minimum_executions(4),
/// )
/// .unwrap();
///
/// for _ in 0..3 {
///     breaker.record_failure();
/// }
/// breaker.record_success();
/// assert_eq!(breaker.state(), CircuitState::Open);
/// assert!(!breaker.allows_execution());
/// ```
pub struct CircuitBreaker {
    settings: CircuitBreakerSettings,
    clock: SharedClock,
    core: Mutex<Option<BreakerCore>>,
    listeners: Mutex<StateListeners>,
}

impl CircuitBreaker {
    /// Create a breaker reading time from the system clock
    pub fn new(settings: CircuitBreakerSettings) -> Result<Self> {
        Self::with_clock(settings, system_clock())
    }

    /// Create a breaker reading time from `clock`
    pub fn with_clock(settings: CircuitBreakerSettings, clock: SharedClock) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            clock,
            core: Mutex::new(None),
            listeners: Mutex::new(StateListeners::default()),
        })
    }

    pub fn settings(&self) -> &CircuitBreakerSettings {
        &self.settings
    }

    /// Called when the breaker opens
    pub fn on_open(&self, listener: impl Fn() + Send + Sync + 'static) -> &Self {
        self.listeners.lock().on_open.push(Arc::new(listener));
        self
    }

    /// Called when the breaker moves to half-open
    pub fn on_half_open(&self, listener: impl Fn() + Send + Sync + 'static) -> &Self {
        self.listeners.lock().on_half_open.push(Arc::new(listener));
        self
    }

    /// Called when the breaker closes
    pub fn on_close(&self, listener: impl Fn() + Send + Sync + 'static) -> &Self {
        self.listeners.lock().on_close.push(Arc::new(listener));
        self
    }

    /// Establish the breaker in the closed state if it has never been used
    ///
    /// Calling this again on a live breaker leaves its state and counters
    /// untouched.
    pub fn initialize(&self) {
        self.with_core(|_, _| (None, ()));
    }

    pub fn state(&self) -> CircuitState {
        self.with_core(|core, _| (None, core.state))
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    pub fn is_half_open(&self) -> bool {
        self.state() == CircuitState::HalfOpen
    }

    /// Whether an execution may start now
    ///
    /// An open breaker whose delay has elapsed moves to half-open as part of
    /// this check. Half-open breakers allow executions while probe budget
    /// remains.
    pub fn allows_execution(&self) -> bool {
        let delay = self.settings.delay;
        let max_probes = self.settings.half_open_max_probes;
        self.with_core(|core, now| {
            let mut transition = None;
            if core.state == CircuitState::Open {
                let elapsed = core
                    .opened_at
                    .map_or(Duration::MAX, |at| now.saturating_duration_since(at));
                if elapsed >= delay {
                    transition = core.transition(CircuitState::HalfOpen, now);
                }
            }

            let allowed = match core.state {
                CircuitState::Closed => true,
                CircuitState::HalfOpen => core.half_open_in_flight < max_probes,
                CircuitState::Open => false,
            };
            if !allowed {
                core.rejections += 1;
            }
            (transition, allowed)
        })
    }

    /// Note that an allowed execution is starting
    ///
    /// Half-open breakers count these against the probe budget until the
    /// execution's outcome is recorded.
    pub fn before_execution(&self) {
        self.acquire_slot();
    }

    /// [`Self::before_execution`], returning the half-open slot it took
    pub(crate) fn acquire_slot(&self) -> Option<HalfOpenSlot> {
        self.with_core(|core, _| {
            if core.state != CircuitState::HalfOpen {
                return (None, None);
            }
            core.half_open_in_flight += 1;
            let slot = HalfOpenSlot {
                epoch: core.half_open_epoch,
            };
            (None, Some(slot))
        })
    }

    /// Give back a slot whose attempt will never record an outcome
    pub(crate) fn release_slot(&self, slot: HalfOpenSlot) {
        self.with_core(|core, _| {
            if core.holds(slot) {
                core.half_open_in_flight = core.half_open_in_flight.saturating_sub(1);
            }
            (None, ())
        });
    }

    pub fn record_success(&self) {
        self.record(false, Release::Untracked);
    }

    pub fn record_failure(&self) {
        self.record(true, Release::Untracked);
    }

    /// Record an execution that took `duration`
    ///
    /// A success slower than the configured timeout is recorded as a failure.
    pub fn record_execution(&self, failed: bool, duration: Duration) {
        let timed_out = self.settings.timeout.is_some_and(|timeout| duration > timeout);
        self.record(failed || timed_out, Release::Untracked);
    }

    /// Record the outcome of an attempt that started with `slot`
    ///
    /// Only an attempt holding a current half-open slot frees one.
    pub(crate) fn record_attempt(
        &self,
        failed: bool,
        duration: Duration,
        slot: Option<HalfOpenSlot>,
    ) {
        let timed_out = self.settings.timeout.is_some_and(|timeout| duration > timeout);
        let release = slot.map_or(Release::Nothing, Release::Slot);
        self.record(failed || timed_out, release);
    }

    /// Force the breaker open
    pub fn open(&self) {
        self.with_core(|core, now| (core.transition(CircuitState::Open, now), ()));
    }

    /// Force the breaker closed, clearing its window
    pub fn close(&self) {
        self.with_core(|core, now| (core.transition(CircuitState::Closed, now), ()));
    }

    /// Force the breaker half-open
    pub fn half_open(&self) {
        self.with_core(|core, now| (core.transition(CircuitState::HalfOpen, now), ()));
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        self.with_core(|core, now| {
            let (window_successes, window_failures) = core.window.counts(now);
            let metrics = CircuitBreakerMetrics {
                state: core.state,
                window_successes,
                window_failures,
                total_successes: core.total_successes,
                total_failures: core.total_failures,
                rejections: core.rejections,
            };
            (None, metrics)
        })
    }

    fn record(&self, failed: bool, release: Release) {
        let settings = self.settings;
        self.with_core(|core, now| {
            let releases_slot = match release {
                Release::Untracked => true,
                Release::Slot(slot) => core.holds(slot),
                Release::Nothing => false,
            };
            if failed {
                core.total_failures += 1;
            } else {
                core.total_successes += 1;
            }

            let transition = match core.state {
                CircuitState::Closed => {
                    core.window.record(now, !failed);
                    let (successes, failures) = core.window.counts(now);
                    let total = successes + failures;
                    let tripped = total > 0
                        && total >= settings.minimum_executions
                        && failures as f64 / total as f64 > settings.failure_rate_threshold;
                    if tripped {
                        core.transition(CircuitState::Open, now)
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    if releases_slot {
                        core.half_open_in_flight = core.half_open_in_flight.saturating_sub(1);
                    }
                    if failed {
                        core.transition(CircuitState::Open, now)
                    } else {
                        core.half_open_successes += 1;
                        if core.half_open_successes >= settings.success_threshold {
                            core.transition(CircuitState::Closed, now)
                        } else {
                            None
                        }
                    }
                }
                // Late outcome of an execution that started before the trip
                CircuitState::Open => None,
            };
            (transition, ())
        });
    }

    /// Run `f` inside the critical section, then report any transition
    fn with_core<R>(
        &self,
        f: impl FnOnce(&mut BreakerCore, Instant) -> (Option<(CircuitState, CircuitState)>, R),
    ) -> R {
        let now = self.clock.now();
        let (transition, value) = {
            let mut guard = self.core.lock();
            let core = guard.get_or_insert_with(|| BreakerCore::new(self.settings.window));
            f(core, now)
        };
        if let Some((from, to)) = transition {
            self.notify(from, to);
        }
        value
    }

    fn notify(&self, from: CircuitState, to: CircuitState) {
        match to {
            CircuitState::Open => warn!(from = %from, to = %to, "Circuit breaker opened"),
            _ => info!(from = %from, to = %to, "Circuit breaker state changed"),
        }

        let listeners = {
            let listeners = self.listeners.lock();
            match to {
                CircuitState::Open => listeners.on_open.clone(),
                CircuitState::HalfOpen => listeners.on_half_open.clone(),
                CircuitState::Closed => listeners.on_close.clone(),
            }
        };
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener())).is_err() {
                warn!(to = %to, "circuit breaker state listener panicked; ignoring");
            }
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("settings", &self.settings)
            .field("core", &*self.core.lock())
            .finish()
    }
}
