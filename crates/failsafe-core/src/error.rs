//! Error types for failsafe-core
//!
//! These are the errors reported synchronously to whoever configures or
//! wires up an execution. Errors produced by the wrapped operation itself
//! travel through [`crate::execution::ExecutionError`] instead.

use thiserror::Error;

/// Result type alias using failsafe-core's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration and wiring errors
#[derive(Error, Debug)]
pub enum Error {
    /// A builder method received an argument outside its valid range
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// A component was configured twice on the same call chain
    #[error("A {component} has already been configured")]
    AlreadyConfigured { component: String },

    /// The scheduler refused to accept a task
    #[error("Scheduler rejected task: {reason}")]
    SchedulerRejected { reason: String },

    /// Invalid configuration values
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an already configured error
    pub fn already_configured(component: impl Into<String>) -> Self {
        Self::AlreadyConfigured {
            component: component.into(),
        }
    }

    /// Create a scheduler rejection error
    pub fn scheduler_rejected(reason: impl Into<String>) -> Self {
        Self::SchedulerRejected {
            reason: reason.into(),
        }
    }

    /// Create an invalid config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a config not found error
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }
}
