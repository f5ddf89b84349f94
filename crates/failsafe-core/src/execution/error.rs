//! Terminal errors of an execution
//!
//! This module defines the error a [`super::FailsafeFuture`] resolves to when
//! an execution does not produce a value.

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Why an execution ended without a value
///
/// The error type is generic over `E`, the error type of the wrapped
/// operation.
#[derive(Debug)]
pub enum ExecutionError<E> {
    /// The retry policy ran out of attempts or time
    Exhausted {
        /// Number of attempts made before giving up
        attempts: u32,
        /// The error from the final attempt
        source: E,
        /// Time from the first attempt to the final outcome
        total_duration: Duration,
    },

    /// The final attempt failed with an error the policy does not retry
    NonRetryable {
        /// Number of attempts made, including the failing one
        attempts: u32,
        /// The error from the final attempt
        source: E,
    },

    /// An abort condition matched the final attempt's error
    Aborted {
        /// Number of attempts made, including the aborted one
        attempts: u32,
        /// The error that triggered the abort
        source: E,
    },

    /// The circuit breaker refused the execution or its next retry
    CircuitOpen,

    /// The execution was cancelled before producing an outcome
    Cancelled {
        /// Number of attempts started before cancellation
        attempts: u32,
    },

    /// A blocking wait gave up before the execution finished
    ///
    /// The execution itself keeps running.
    Timeout {
        /// How long the caller waited
        timeout: Duration,
    },

    /// The scheduler refused an attempt or dropped it without running it
    Scheduling(crate::Error),

    /// The operation panicked during an attempt
    Panicked {
        /// Number of attempts made, including the one that panicked
        attempts: u32,
        /// The panic payload, if it was a string
        message: String,
    },

    /// Every handle to a running attempt was dropped before it reported
    Abandoned {
        /// Number of attempts made, including the abandoned one
        attempts: u32,
    },
}

impl<E: fmt::Display> fmt::Display for ExecutionError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionError::Exhausted {
                attempts,
                source,
                total_duration,
            } => {
                write!(
                    f,
                    "retries exhausted after {} attempts over {:.2}s: {}",
                    attempts,
                    total_duration.as_secs_f64(),
                    source
                )
            }
            ExecutionError::NonRetryable { attempts, source } => {
                write!(
                    f,
                    "non-retryable error after {} attempts: {}",
                    attempts, source
                )
            }
            ExecutionError::Aborted { attempts, source } => {
                write!(f, "aborted after {} attempts: {}", attempts, source)
            }
            ExecutionError::CircuitOpen => write!(f, "circuit breaker is open"),
            ExecutionError::Cancelled { attempts } => {
                write!(f, "execution cancelled after {} attempts", attempts)
            }
            ExecutionError::Timeout { timeout } => {
                write!(
                    f,
                    "timed out after {}ms waiting for execution",
                    timeout.as_millis()
                )
            }
            ExecutionError::Scheduling(err) => write!(f, "failed to schedule attempt: {}", err),
            ExecutionError::Panicked { attempts, message } => {
                write!(f, "attempt {} panicked: {}", attempts, message)
            }
            ExecutionError::Abandoned { attempts } => {
                write!(
                    f,
                    "attempt {} was dropped without reporting an outcome",
                    attempts
                )
            }
        }
    }
}

impl<E: Error + 'static> Error for ExecutionError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ExecutionError::Exhausted { source, .. }
            | ExecutionError::NonRetryable { source, .. }
            | ExecutionError::Aborted { source, .. } => Some(source),
            ExecutionError::Scheduling(err) => Some(err),
            _ => None,
        }
    }
}

impl<E> ExecutionError<E> {
    /// Create an exhausted error
    pub fn exhausted(attempts: u32, source: E, total_duration: Duration) -> Self {
        ExecutionError::Exhausted {
            attempts,
            source,
            total_duration,
        }
    }

    /// Create a non-retryable error
    pub fn non_retryable(attempts: u32, source: E) -> Self {
        ExecutionError::NonRetryable { attempts, source }
    }

    /// Create an aborted error
    pub fn aborted(attempts: u32, source: E) -> Self {
        ExecutionError::Aborted { attempts, source }
    }

    /// Create a cancelled error
    pub fn cancelled(attempts: u32) -> Self {
        ExecutionError::Cancelled { attempts }
    }

    /// Number of attempts made, zero when none ran
    pub fn attempts(&self) -> u32 {
        match self {
            ExecutionError::Exhausted { attempts, .. }
            | ExecutionError::NonRetryable { attempts, .. }
            | ExecutionError::Aborted { attempts, .. }
            | ExecutionError::Cancelled { attempts }
            | ExecutionError::Panicked { attempts, .. }
            | ExecutionError::Abandoned { attempts } => *attempts,
            _ => 0,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, ExecutionError::Exhausted { .. })
    }

    pub fn is_non_retryable(&self) -> bool {
        matches!(self, ExecutionError::NonRetryable { .. })
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, ExecutionError::Aborted { .. })
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ExecutionError::CircuitOpen)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExecutionError::Cancelled { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecutionError::Timeout { .. })
    }

    pub fn is_scheduling(&self) -> bool {
        matches!(self, ExecutionError::Scheduling(_))
    }

    pub fn is_panicked(&self) -> bool {
        matches!(self, ExecutionError::Panicked { .. })
    }

    pub fn is_abandoned(&self) -> bool {
        matches!(self, ExecutionError::Abandoned { .. })
    }

    /// Get the wrapped operation's error, consuming this error
    pub fn into_source(self) -> Option<E> {
        match self {
            ExecutionError::Exhausted { source, .. }
            | ExecutionError::NonRetryable { source, .. }
            | ExecutionError::Aborted { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Get a reference to the wrapped operation's error
    pub fn source_ref(&self) -> Option<&E> {
        match self {
            ExecutionError::Exhausted { source, .. }
            | ExecutionError::NonRetryable { source, .. }
            | ExecutionError::Aborted { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Map the wrapped operation's error type using a closure
    pub fn map_err<F, E2>(self, f: F) -> ExecutionError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            ExecutionError::Exhausted {
                attempts,
                source,
                total_duration,
            } => ExecutionError::Exhausted {
                attempts,
                source: f(source),
                total_duration,
            },
            ExecutionError::NonRetryable { attempts, source } => ExecutionError::NonRetryable {
                attempts,
                source: f(source),
            },
            ExecutionError::Aborted { attempts, source } => ExecutionError::Aborted {
                attempts,
                source: f(source),
            },
            ExecutionError::CircuitOpen => ExecutionError::CircuitOpen,
            ExecutionError::Cancelled { attempts } => ExecutionError::Cancelled { attempts },
            ExecutionError::Timeout { timeout } => ExecutionError::Timeout { timeout },
            ExecutionError::Scheduling(err) => ExecutionError::Scheduling(err),
            ExecutionError::Panicked { attempts, message } => {
                ExecutionError::Panicked { attempts, message }
            }
            ExecutionError::Abandoned { attempts } => ExecutionError::Abandoned { attempts },
        }
    }
}

/// Text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
