//! Configuration loader with environment overrides
//!
//! Configuration is assembled with the following precedence (low to high):
//! 1. Built-in defaults
//! 2. A YAML file or string
//! 3. Environment variables (FAILSAFE_* prefix)

use camino::{Utf8Path, Utf8PathBuf};
use std::env;
use std::fs;
use std::str::FromStr;
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{CircuitBreakerConfig, FailsafeConfig};

/// Loads [`FailsafeConfig`] from YAML and the environment
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    path: Option<Utf8PathBuf>,
}

impl ConfigLoader {
    /// A loader that starts from built-in defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// A loader that reads `path` on top of the defaults
    pub fn with_file(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// The file this loader reads, if any
    pub fn path(&self) -> Option<&Utf8Path> {
        self.path.as_deref()
    }

    /// Load the configuration
    ///
    /// Fails if the configured file does not exist.
    pub fn load(&self) -> Result<FailsafeConfig> {
        let config = match &self.path {
            Some(path) => Self::read_yaml_file(path)?,
            None => FailsafeConfig::default(),
        };
        Self::apply_env_overrides(config)
    }

    /// Load `path`, then apply environment overrides
    pub fn load_file(path: &Utf8Path) -> Result<FailsafeConfig> {
        Self::with_file(path).load()
    }

    /// Parse `yaml`, then apply environment overrides
    pub fn from_yaml_str(yaml: &str) -> Result<FailsafeConfig> {
        let config: FailsafeConfig = serde_yaml_ng::from_str(yaml)?;
        Self::apply_env_overrides(config)
    }

    fn read_yaml_file(path: &Utf8Path) -> Result<FailsafeConfig> {
        if !path.exists() {
            return Err(Error::config_not_found(path.as_str()));
        }
        debug!("Loading failsafe configuration from {}", path);
        let content = fs::read_to_string(path)?;
        serde_yaml_ng::from_str(&content)
            .map_err(|e| Error::invalid_config(format!("Failed to parse {}: {}", path, e)))
    }

    /// Apply FAILSAFE_* environment variables to `config`
    ///
    /// Breaker overrides enable a breaker with default settings when the
    /// configuration has none.
    pub fn apply_env_overrides(mut config: FailsafeConfig) -> Result<FailsafeConfig> {
        if let Some(val) = env_value::<i64>("FAILSAFE_MAX_RETRIES")? {
            config.retry.max_retries = val;
        }

        if let Some(val) = env_value::<u64>("FAILSAFE_MAX_DURATION_MS")? {
            config.retry.max_duration_ms = Some(val);
        }

        if let Some(val) = env_value::<u64>("FAILSAFE_DELAY_MS")? {
            config.retry.delay_ms = val;
        }

        if let Some(val) = env_value::<u64>("FAILSAFE_MAX_DELAY_MS")? {
            config.retry.max_delay_ms = val;
        }

        if let Some(val) = env_value::<u64>("FAILSAFE_BREAKER_DELAY_MS")? {
            breaker_config(&mut config).delay_ms = val;
        }

        if let Some(val) = env_value::<f64>("FAILSAFE_BREAKER_FAILURE_RATE")? {
            breaker_config(&mut config).failure_rate_threshold = val;
        }

        Ok(config)
    }
}

fn breaker_config(config: &mut FailsafeConfig) -> &mut CircuitBreakerConfig {
    config
        .circuit_breaker
        .get_or_insert_with(CircuitBreakerConfig::default)
}

fn env_value<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(val) => {
            debug!("Applying {} override", name);
            val.trim()
                .parse()
                .map(Some)
                .map_err(|_| Error::invalid_config(format!("{} must be a valid number", name)))
        }
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::RollingWindow;
    use serial_test::serial;
    use tempfile::TempDir;

    const OVERRIDES: [&str; 6] = [
        "FAILSAFE_MAX_RETRIES",
        "FAILSAFE_MAX_DURATION_MS",
        "FAILSAFE_DELAY_MS",
        "FAILSAFE_MAX_DELAY_MS",
        "FAILSAFE_BREAKER_DELAY_MS",
        "FAILSAFE_BREAKER_FAILURE_RATE",
    ];

    fn clear_env() {
        for name in OVERRIDES {
            env::remove_var(name);
        }
    }

    fn temp_config(content: &str) -> (Utf8PathBuf, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let dir =
            Utf8PathBuf::from_path_buf(temp_dir.path().to_path_buf()).expect("Invalid UTF-8 path");
        let path = dir.join("failsafe.yaml");
        fs::write(&path, content).unwrap();
        (path, temp_dir)
    }

    #[test]
    #[serial]
    fn test_load_defaults() {
        clear_env();
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config, FailsafeConfig::default());
    }

    #[test]
    #[serial]
    fn test_load_file() {
        clear_env();
        let (path, _temp) = temp_config(
            r#"
retry:
  max-retries: 5
  strategy: fixed-delay
  delay-ms: 250
circuit-breaker:
  window:
    kind: time
    duration-ms: 10000
"#,
        );

        let config = ConfigLoader::load_file(&path).unwrap();
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.delay_ms, 250);
        let breaker = config.circuit_breaker.unwrap();
        assert_eq!(
            breaker.window,
            RollingWindow::Time {
                duration: std::time::Duration::from_secs(10)
            }
        );
        assert_eq!(breaker.minimum_executions, 10);
    }

    #[test]
    #[serial]
    fn test_missing_file() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp_dir.path().join("absent.yaml"))
            .expect("Invalid UTF-8 path");

        let err = ConfigLoader::with_file(path).load().unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound { .. }));
    }

    #[test]
    #[serial]
    fn test_malformed_file() {
        clear_env();
        let (path, _temp) = temp_config("retry: [not, a, mapping]");
        let err = ConfigLoader::load_file(&path).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        env::set_var("FAILSAFE_MAX_RETRIES", "-1");
        env::set_var("FAILSAFE_MAX_DURATION_MS", "9000");
        env::set_var("FAILSAFE_DELAY_MS", "20");
        env::set_var("FAILSAFE_MAX_DELAY_MS", "400");
        env::set_var("FAILSAFE_BREAKER_DELAY_MS", "1500");
        env::set_var("FAILSAFE_BREAKER_FAILURE_RATE", "0.75");

        let config = ConfigLoader::from_yaml_str("retry:\n  max-retries: 2\n").unwrap();
        clear_env();

        assert_eq!(config.retry.max_retries, -1);
        assert_eq!(config.retry.max_duration_ms, Some(9000));
        assert_eq!(config.retry.delay_ms, 20);
        assert_eq!(config.retry.max_delay_ms, 400);
        let breaker = config.circuit_breaker.unwrap();
        assert_eq!(breaker.delay_ms, 1500);
        assert_eq!(breaker.failure_rate_threshold, 0.75);
    }

    #[test]
    #[serial]
    fn test_invalid_env_override() {
        clear_env();
        env::set_var("FAILSAFE_DELAY_MS", "soon");
        let result = ConfigLoader::new().load();
        clear_env();

        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }
}
