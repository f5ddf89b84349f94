//! Configuration types for retry policies and circuit breakers
//!
//! These mirror the programmatic builders in a form that can be read from
//! YAML. Durations are expressed in milliseconds.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::circuit::{CircuitBreaker, CircuitBreakerSettings, RollingWindow};
use crate::error::{Error, Result};
use crate::retry::{Delay, RetryPolicy};

/// Complete failsafe configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FailsafeConfig {
    /// Retry policy settings
    #[serde(default)]
    pub retry: RetryPolicyConfig,

    /// Circuit breaker settings; no breaker when absent
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

/// Retry policy settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryPolicyConfig {
    /// Maximum number of retries, -1 for unlimited
    #[serde(default = "default_max_retries")]
    pub max_retries: i64,

    /// Upper bound on the whole execution in milliseconds
    #[serde(default)]
    pub max_duration_ms: Option<u64>,

    /// How the delay between attempts is computed
    #[serde(default)]
    pub strategy: DelayStrategy,

    /// Fixed delay, or initial delay for backoff
    #[serde(default = "default_delay")]
    pub delay_ms: u64,

    /// Backoff cap, or upper bound for random delays
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Lower bound for random delays
    #[serde(default)]
    pub min_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Proportional jitter in [0, 1]
    #[serde(default)]
    pub jitter_factor: Option<f64>,

    /// Absolute jitter in milliseconds
    #[serde(default)]
    pub jitter_ms: Option<u64>,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            max_duration_ms: None,
            strategy: DelayStrategy::default(),
            delay_ms: default_delay(),
            max_delay_ms: default_max_delay(),
            min_delay_ms: 0,
            backoff_multiplier: default_backoff_multiplier(),
            jitter_factor: None,
            jitter_ms: None,
        }
    }
}

fn default_max_retries() -> i64 {
    3
}
fn default_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

/// Delay strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DelayStrategy {
    /// Retry immediately
    None,

    /// Same delay before every retry
    FixedDelay,

    /// Delay grows by the multiplier after every retry (default)
    #[default]
    ExponentialBackoff,

    /// Uniformly random delay between the min and max
    RandomDelay,
}

impl RetryPolicyConfig {
    /// Build a retry policy from these settings
    ///
    /// The policy retries every error; predicates are added in code.
    pub fn to_policy<T, E>(&self) -> Result<RetryPolicy<T, E>> {
        let mut policy = RetryPolicy::new();
        policy = match self.max_retries {
            -1 => policy.with_unlimited_retries(),
            n if n < -1 => {
                return Err(Error::invalid_config(format!(
                    "max-retries must be -1 or greater, got {}",
                    n
                )))
            }
            n => policy.with_max_retries(u32::try_from(n).map_err(|_| {
                Error::invalid_config(format!("max-retries is too large: {}", n))
            })?),
        };

        if let Some(ms) = self.max_duration_ms {
            policy = policy.with_max_duration(Duration::from_millis(ms));
        }

        let delay = match self.strategy {
            DelayStrategy::None => Delay::None,
            DelayStrategy::FixedDelay => Delay::Fixed(Duration::from_millis(self.delay_ms)),
            DelayStrategy::ExponentialBackoff => Delay::Backoff {
                initial: Duration::from_millis(self.delay_ms),
                max: Duration::from_millis(self.max_delay_ms),
                multiplier: self.backoff_multiplier,
            },
            DelayStrategy::RandomDelay => Delay::Random {
                min: Duration::from_millis(self.min_delay_ms),
                max: Duration::from_millis(self.max_delay_ms),
            },
        };
        policy = policy.with_delay_strategy(delay);

        match (self.jitter_factor, self.jitter_ms) {
            (Some(_), Some(_)) => {
                return Err(Error::invalid_config(
                    "jitter-factor and jitter-ms are mutually exclusive",
                ))
            }
            (Some(factor), None) => policy = policy.with_jitter_factor(factor),
            (None, Some(ms)) => policy = policy.with_jitter(Duration::from_millis(ms)),
            (None, None) => {}
        }

        policy
            .validate()
            .map_err(|e| Error::invalid_config(format!("retry: {}", e)))?;
        Ok(policy)
    }
}

/// Circuit breaker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CircuitBreakerConfig {
    /// Failure rate in [0, 1) above which the breaker opens
    #[serde(default = "default_failure_rate_threshold")]
    pub failure_rate_threshold: f64,

    /// Executions required in the window before the rate is judged
    #[serde(default = "default_minimum_executions")]
    pub minimum_executions: u32,

    #[serde(default)]
    pub window: RollingWindow,

    /// Time spent open before probing
    #[serde(default = "default_breaker_delay")]
    pub delay_ms: u64,

    /// Consecutive half-open successes needed to close
    #[serde(default = "default_one")]
    pub success_threshold: u32,

    #[serde(default = "default_one")]
    pub half_open_max_probes: u32,

    /// Successful attempts slower than this count as failures
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: default_failure_rate_threshold(),
            minimum_executions: default_minimum_executions(),
            window: RollingWindow::default(),
            delay_ms: default_breaker_delay(),
            success_threshold: default_one(),
            half_open_max_probes: default_one(),
            timeout_ms: None,
        }
    }
}

fn default_failure_rate_threshold() -> f64 {
    0.5
}
fn default_minimum_executions() -> u32 {
    10
}
fn default_breaker_delay() -> u64 {
    60000
}
fn default_one() -> u32 {
    1
}

impl CircuitBreakerConfig {
    pub fn to_settings(&self) -> Result<CircuitBreakerSettings> {
        let mut settings = CircuitBreakerSettings::default()
            .with_failure_rate_threshold(self.failure_rate_threshold)
            .with_minimum_executions(self.minimum_executions)
            .with_window(self.window)
            .with_delay(Duration::from_millis(self.delay_ms))
            .with_success_threshold(self.success_threshold)
            .with_half_open_max_probes(self.half_open_max_probes);
        if let Some(ms) = self.timeout_ms {
            settings = settings.with_timeout(Duration::from_millis(ms));
        }
        settings
            .validate()
            .map_err(|e| Error::invalid_config(format!("circuit-breaker: {}", e)))?;
        Ok(settings)
    }

    /// Build a circuit breaker from these settings
    pub fn to_breaker(&self) -> Result<CircuitBreaker> {
        CircuitBreaker::new(self.to_settings()?)
    }
}
