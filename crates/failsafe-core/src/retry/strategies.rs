//! Retry delay strategies and predicates
//!
//! This module implements the delay strategies a [`super::RetryPolicy`] can
//! be configured with, the jitter applied on top of them, and a trait for
//! deciding whether an error should be retried.

use rand::Rng;
use std::error::Error;
use std::time::Duration;

/// How long to wait between attempts
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Delay {
    /// Retry immediately
    #[default]
    None,

    /// The same delay before every retry
    Fixed(Duration),

    /// `initial * multiplier^(attempt - 1)`, capped at `max`
    Backoff {
        initial: Duration,
        max: Duration,
        multiplier: f64,
    },

    /// Uniformly sampled from `[min, max)`
    Random { min: Duration, max: Duration },
}

/// Randomization applied to a computed delay
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Jitter {
    /// Perturb by up to `delay * factor` in either direction (factor in `[0, 1]`)
    Factor(f64),

    /// Perturb by up to this amount in either direction
    Duration(Duration),
}

/// Calculate the delay before the next attempt
///
/// # Arguments
///
/// * `delay` - The configured delay strategy
/// * `jitter` - Optional randomization to apply to the computed delay
/// * `attempt` - The attempt that just completed (1-indexed)
/// * `rng` - Random source for random delays and jitter
///
/// # Example
///
/// ```rust
/// use failsafe_core::retry::{calculate_delay, Delay};
/// use std::time::Duration;
///
/// let delay = Delay::Backoff {
///     initial: Duration::from_millis(100),
///     max: Duration::from_millis(800),
///     multiplier: 2.0,
/// };
///
/// let mut rng = rand::rng();
/// assert_eq!(calculate_delay(&delay, None, 1, &mut rng), Duration::from_millis(100));
/// assert_eq!(calculate_delay(&delay, None, 3, &mut rng), Duration::from_millis(400));
/// assert_eq!(calculate_delay(&delay, None, 9, &mut rng), Duration::from_millis(800));
/// ```
pub fn calculate_delay<R: Rng>(
    delay: &Delay,
    jitter: Option<&Jitter>,
    attempt: u32,
    rng: &mut R,
) -> Duration {
    // Attempt is 1-indexed, but we want 0-indexed for calculations
    let attempt_index = attempt.saturating_sub(1);

    let base = match *delay {
        Delay::None => Duration::ZERO,

        Delay::Fixed(delay) => delay,

        Delay::Backoff {
            initial,
            max,
            multiplier,
        } => {
            let exponent = attempt_index.min(i32::MAX as u32) as i32;
            let nanos = initial.as_nanos() as f64 * multiplier.powi(exponent);
            // NaN (zero initial times an infinite factor) falls through to the cap
            let capped = nanos.min(max.as_nanos() as f64);
            Duration::from_nanos(capped as u64)
        }

        Delay::Random { min, max } => {
            if max > min {
                rng.random_range(min..max)
            } else {
                min
            }
        }
    };

    match jitter {
        Some(jitter) if !base.is_zero() => apply_jitter(base, jitter, rng),
        _ => base,
    }
}

/// Perturb `delay` by the jitter, never going below zero
fn apply_jitter<R: Rng>(delay: Duration, jitter: &Jitter, rng: &mut R) -> Duration {
    let spread_nanos = match *jitter {
        Jitter::Factor(factor) => delay.as_nanos() as f64 * factor.clamp(0.0, 1.0),
        Jitter::Duration(amount) => amount.as_nanos() as f64,
    };
    if spread_nanos <= 0.0 {
        return delay;
    }

    let offset = rng.random_range(-1.0..=1.0) * spread_nanos;
    let jittered = (delay.as_nanos() as f64 + offset).max(0.0);
    Duration::from_nanos(jittered as u64)
}

/// A predicate that determines whether an error should be retried
///
/// Implement this trait to customize which errors are retryable. Register
/// it with [`super::RetryPolicy::retry_on_predicate`] or
/// [`super::RetryPolicy::abort_on_predicate`].
///
/// # Example
///
/// ```rust
/// use failsafe_core::retry::RetryPredicate;
/// use std::io::{Error, ErrorKind};
///
/// struct IoRetryPredicate;
///
/// impl RetryPredicate<Error> for IoRetryPredicate {
///     fn should_retry(&self, error: &Error) -> bool {
///         // Don't retry permanent errors
///         !matches!(
///             error.kind(),
///             ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::InvalidInput
///         )
///     }
/// }
/// ```
pub trait RetryPredicate<E: ?Sized>: Send + Sync {
    /// Determine whether the given error should be retried
    fn should_retry(&self, error: &E) -> bool;
}

/// A predicate that always returns true (all errors are retryable)
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetry;

impl<E: ?Sized> RetryPredicate<E> for AlwaysRetry {
    fn should_retry(&self, _error: &E) -> bool {
        true
    }
}

/// A predicate that never retries (no errors are retryable)
#[derive(Debug, Clone, Copy)]
pub struct NeverRetry;

impl<E: ?Sized> RetryPredicate<E> for NeverRetry {
    fn should_retry(&self, _error: &E) -> bool {
        false
    }
}

/// A predicate that uses a closure to determine retryability
pub struct ClosurePredicate<F> {
    predicate: F,
}

impl<F> ClosurePredicate<F> {
    /// Create a new closure-based predicate
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<E, F> RetryPredicate<E> for ClosurePredicate<F>
where
    F: Fn(&E) -> bool + Send + Sync,
{
    fn should_retry(&self, error: &E) -> bool {
        (self.predicate)(error)
    }
}

/// A predicate that matches on error messages
#[derive(Debug, Clone)]
pub struct MessagePredicate {
    /// Lowercased patterns searched for in the error message
    patterns: Vec<String>,
}

impl MessagePredicate {
    /// Create a new message predicate with the given patterns
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.into().to_lowercase())
                .collect(),
        }
    }

    /// Create a predicate for common transient network errors
    pub fn network_errors() -> Self {
        Self::new([
            "timeout",
            "timed out",
            "connection reset",
            "connection refused",
            "network unreachable",
            "temporary failure",
        ])
    }
}

impl<E: Error> RetryPredicate<E> for MessagePredicate {
    fn should_retry(&self, error: &E) -> bool {
        let message = error.to_string().to_lowercase();
        self.patterns.iter().any(|pattern| message.contains(pattern))
    }
}
