//! Retry policy and attempt evaluation
//!
//! A [`RetryPolicy`] is immutable once built and is shared between every
//! execution it governs. [`RetryPolicy::evaluate`] is a pure function of the
//! attempt outcome and history (plus a random source for jitter).

use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};

use super::strategies::{calculate_delay, ClosurePredicate, Delay, Jitter, RetryPredicate};

type OutcomePredicate<T, E> = Arc<dyn Fn(&std::result::Result<T, E>) -> bool + Send + Sync>;

/// What to do after an attempt completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Schedule another attempt after the delay
    Retry(Duration),

    /// No further attempts; the outcome is final
    Stop(StopReason),
}

impl Decision {
    /// Whether this decision ends the execution
    pub fn is_stop(&self) -> bool {
        matches!(self, Decision::Stop(_))
    }
}

/// Why an execution stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The outcome does not match any retry condition
    NotRetryable,

    /// An abort condition matched the outcome
    Aborted,

    /// The retry budget is spent
    RetriesExceeded,

    /// The maximum duration has elapsed
    DurationExceeded,
}

impl StopReason {
    /// Whether the policy gave up on an outcome it would otherwise retry
    pub fn is_exhausted(&self) -> bool {
        matches!(self, StopReason::RetriesExceeded | StopReason::DurationExceeded)
    }
}

/// Configuration deciding whether, and after how long, to retry
///
/// The type parameters are the value and error types of the wrapped
/// operation, so that retry and abort conditions can inspect them.
///
/// # Example
///
/// ```rust
/// use failsafe_core::retry::RetryPolicy;
/// use std::io;
/// use std::time::Duration;
///
/// let policy: RetryPolicy<String, io::Error> = RetryPolicy::new()
///     .with_max_retries(5)
///     .with_backoff(Duration::from_millis(100), Duration::from_secs(5), 2.0)
///     .with_jitter_factor(0.1)
///     .retry_on(|err: &io::Error| err.kind() == io::ErrorKind::TimedOut)
///     .abort_on(|err: &io::Error| err.kind() == io::ErrorKind::PermissionDenied);
///
/// assert!(policy.validate().is_ok());
/// ```
pub struct RetryPolicy<T, E> {
    max_retries: Option<u32>,
    max_duration: Option<Duration>,
    delay: Delay,
    jitter: Option<Jitter>,
    retry_conditions: Vec<OutcomePredicate<T, E>>,
    failures_checked: bool,
    abort_conditions: Vec<OutcomePredicate<T, E>>,
}

impl<T, E> RetryPolicy<T, E> {
    /// A policy that retries any failure, without limit or delay
    pub fn new() -> Self {
        Self {
            max_retries: None,
            max_duration: None,
            delay: Delay::None,
            jitter: None,
            retry_conditions: Vec::new(),
            failures_checked: false,
            abort_conditions: Vec::new(),
        }
    }

    /// A policy that never retries
    pub fn never() -> Self {
        Self::new().with_max_retries(0)
    }

    /// Limit the number of retries (attempts beyond the first)
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Remove any limit on the number of retries
    pub fn with_unlimited_retries(mut self) -> Self {
        self.max_retries = None;
        self
    }

    /// Stop retrying once this much time has passed since the first attempt
    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = Some(max_duration);
        self
    }

    /// Wait a fixed delay between attempts
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = if delay.is_zero() {
            Delay::None
        } else {
            Delay::Fixed(delay)
        };
        self
    }

    /// Wait an exponentially growing delay between attempts
    pub fn with_backoff(mut self, initial: Duration, max: Duration, multiplier: f64) -> Self {
        self.delay = Delay::Backoff {
            initial,
            max,
            multiplier,
        };
        self
    }

    /// Wait a random delay in `[min, max)` between attempts
    pub fn with_random_delay(mut self, min: Duration, max: Duration) -> Self {
        self.delay = Delay::Random { min, max };
        self
    }

    /// Set the delay strategy directly
    pub fn with_delay_strategy(mut self, delay: Delay) -> Self {
        self.delay = delay;
        self
    }

    /// Randomize each delay by up to `factor` of itself in either direction
    pub fn with_jitter_factor(mut self, factor: f64) -> Self {
        self.jitter = Some(Jitter::Factor(factor));
        self
    }

    /// Randomize each delay by up to `jitter` in either direction
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = Some(Jitter::Duration(jitter));
        self
    }

    /// Retry failures matching the predicate
    ///
    /// Once any error condition is registered, errors matching none of the
    /// retry conditions are no longer retried.
    pub fn retry_on<F>(self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
        T: 'static,
        E: 'static,
    {
        self.retry_on_predicate(ClosurePredicate::new(predicate))
    }

    /// Retry failures accepted by a [`RetryPredicate`]
    pub fn retry_on_predicate<P>(mut self, predicate: P) -> Self
    where
        P: RetryPredicate<E> + 'static,
        T: 'static,
        E: 'static,
    {
        self.failures_checked = true;
        self.retry_conditions.push(Arc::new(move |outcome| match outcome {
            Err(err) => predicate.should_retry(err),
            Ok(_) => false,
        }));
        self
    }

    /// Retry successful results matching the predicate
    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
        T: 'static,
        E: 'static,
    {
        self.retry_conditions.push(Arc::new(move |outcome| match outcome {
            Ok(value) => predicate(value),
            Err(_) => false,
        }));
        self
    }

    /// Retry whenever the predicate matches the whole outcome
    pub fn retry_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&std::result::Result<T, E>) -> bool + Send + Sync + 'static,
    {
        self.failures_checked = true;
        self.retry_conditions.push(Arc::new(predicate));
        self
    }

    /// Stop immediately on failures matching the predicate
    pub fn abort_on<F>(self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
        T: 'static,
        E: 'static,
    {
        self.abort_on_predicate(ClosurePredicate::new(predicate))
    }

    /// Stop immediately on failures accepted by a [`RetryPredicate`]
    pub fn abort_on_predicate<P>(mut self, predicate: P) -> Self
    where
        P: RetryPredicate<E> + 'static,
        T: 'static,
        E: 'static,
    {
        self.abort_conditions.push(Arc::new(move |outcome| match outcome {
            Err(err) => predicate.should_retry(err),
            Ok(_) => false,
        }));
        self
    }

    /// Stop immediately on results matching the predicate
    pub fn abort_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
        T: 'static,
        E: 'static,
    {
        self.abort_conditions.push(Arc::new(move |outcome| match outcome {
            Ok(value) => predicate(value),
            Err(_) => false,
        }));
        self
    }

    /// Stop immediately whenever the predicate matches the whole outcome
    pub fn abort_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&std::result::Result<T, E>) -> bool + Send + Sync + 'static,
    {
        self.abort_conditions.push(Arc::new(predicate));
        self
    }

    /// Maximum number of retries, `None` when unlimited
    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    /// Maximum elapsed time, if any
    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration
    }

    /// The configured delay strategy
    pub fn delay(&self) -> &Delay {
        &self.delay
    }

    /// The configured jitter, if any
    pub fn jitter(&self) -> Option<&Jitter> {
        self.jitter.as_ref()
    }

    /// Whether this policy can ever schedule a retry
    pub fn allows_retries(&self) -> bool {
        self.max_retries != Some(0)
    }

    /// Check that the delay and jitter parameters are usable
    pub fn validate(&self) -> Result<()> {
        match self.delay {
            Delay::Backoff {
                initial,
                max,
                multiplier,
            } => {
                if !multiplier.is_finite() || multiplier < 1.0 {
                    return Err(Error::invalid_argument(format!(
                        "backoff multiplier must be at least 1, got {}",
                        multiplier
                    )));
                }
                if initial > max {
                    return Err(Error::invalid_argument(
                        "initial backoff delay must not exceed the max delay",
                    ));
                }
            }
            Delay::Random { min, max } if min > max => {
                return Err(Error::invalid_argument(
                    "random delay minimum must not exceed the maximum",
                ));
            }
            _ => {}
        }

        if let Some(Jitter::Factor(factor)) = self.jitter {
            if !(0.0..=1.0).contains(&factor) {
                return Err(Error::invalid_argument(format!(
                    "jitter factor must be within [0, 1], got {}",
                    factor
                )));
            }
        }

        Ok(())
    }

    /// Whether the outcome matches an abort condition
    pub fn can_abort_for(&self, outcome: &std::result::Result<T, E>) -> bool {
        self.abort_conditions.iter().any(|condition| condition(outcome))
    }

    /// Whether the outcome counts as a failure worth retrying
    ///
    /// Any failure is retryable until an error condition is registered.
    pub fn can_retry_for(&self, outcome: &std::result::Result<T, E>) -> bool {
        self.retry_conditions.iter().any(|condition| condition(outcome))
            || (outcome.is_err() && !self.failures_checked)
    }

    /// Classify an outcome as a failure for circuit breaker bookkeeping
    pub fn is_failure(&self, outcome: &std::result::Result<T, E>) -> bool {
        self.can_retry_for(outcome)
    }

    /// Decide what happens after an attempt
    ///
    /// # Arguments
    ///
    /// * `outcome` - The result of the attempt that just completed
    /// * `attempts` - Number of attempts made so far, including this one
    /// * `elapsed` - Time since the first attempt started
    pub fn evaluate(
        &self,
        outcome: &std::result::Result<T, E>,
        attempts: u32,
        elapsed: Duration,
    ) -> Decision {
        self.evaluate_with(outcome, attempts, elapsed, &mut rand::rng())
    }

    /// [`Self::evaluate`] with an explicit random source
    pub fn evaluate_with<R: Rng>(
        &self,
        outcome: &std::result::Result<T, E>,
        attempts: u32,
        elapsed: Duration,
        rng: &mut R,
    ) -> Decision {
        if self.can_abort_for(outcome) {
            return Decision::Stop(StopReason::Aborted);
        }
        if !self.can_retry_for(outcome) {
            return Decision::Stop(StopReason::NotRetryable);
        }
        if let Some(max_retries) = self.max_retries {
            if attempts > max_retries {
                return Decision::Stop(StopReason::RetriesExceeded);
            }
        }
        if let Some(max_duration) = self.max_duration {
            if elapsed >= max_duration {
                return Decision::Stop(StopReason::DurationExceeded);
            }
        }

        let mut delay = calculate_delay(&self.delay, self.jitter.as_ref(), attempts, rng);
        if let Some(max_duration) = self.max_duration {
            delay = delay.min(max_duration - elapsed);
        }
        Decision::Retry(delay)
    }
}

impl<T, E> Default for RetryPolicy<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Clone for RetryPolicy<T, E> {
    fn clone(&self) -> Self {
        Self {
            max_retries: self.max_retries,
            max_duration: self.max_duration,
            delay: self.delay,
            jitter: self.jitter,
            retry_conditions: self.retry_conditions.clone(),
            failures_checked: self.failures_checked,
            abort_conditions: self.abort_conditions.clone(),
        }
    }
}

impl<T, E> fmt::Debug for RetryPolicy<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("max_duration", &self.max_duration)
            .field("delay", &self.delay)
            .field("jitter", &self.jitter)
            .field("retry_conditions", &self.retry_conditions.len())
            .field("abort_conditions", &self.abort_conditions.len())
            .finish()
    }
}
