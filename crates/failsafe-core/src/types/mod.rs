//! Serializable configuration types

mod runtime_config;

pub use runtime_config::{
    CircuitBreakerConfig, DelayStrategy, FailsafeConfig, RetryPolicyConfig,
};
