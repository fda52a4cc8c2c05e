//! Configuration.
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `SPINDLE__SECTION__KEY` environment variables. Durations are
//! plain millisecond integers in the file and exposed as `Duration` through
//! accessors.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::domain::QueueName;
use crate::error::ConfigError;
use crate::impls::RetryPolicy;
use crate::impls::memory_broker::{DEFAULT_LEASE_DURATION, DEFAULT_RETENTION};
use crate::middleware::{FailMode, IdempotencyConfig};

pub const ENV_PREFIX: &str = "SPINDLE";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpindleConfig {
    pub server: ServerConfig,
    pub idempotency: IdempotencySettings,
    pub fire_and_forget: FireAndForgetConfig,
    pub broker: BrokerConfig,
    pub logging: LoggingConfig,
}

/// Worker server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Worker loops, i.e. max in-flight tasks.
    pub concurrency: usize,
    /// Queues to pull from. Always drained critical > default > low.
    pub queues: Vec<QueueName>,
    /// Deadline for a task whose envelope sets none.
    pub task_timeout_ms: u64,
    /// Max time one lease call waits for work.
    pub poll_interval_ms: u64,
    /// How long shutdown waits for in-flight tasks before aborting them.
    pub shutdown_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            queues: QueueName::ALL.to_vec(),
            task_timeout_ms: 5 * 60 * 1000,
            poll_interval_ms: 1000,
            shutdown_grace_ms: 10_000,
        }
    }
}

impl ServerConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency == 0 {
            return Err("server.concurrency must be at least 1".to_string());
        }
        if self.queues.is_empty() {
            return Err("server.queues must name at least one queue".to_string());
        }
        if self.task_timeout_ms == 0 {
            return Err("server.task_timeout_ms must be positive".to_string());
        }
        if self.poll_interval_ms == 0 {
            return Err("server.poll_interval_ms must be positive".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencySettings {
    pub fail_mode: FailMode,
    pub lock_ttl_ms: u64,
    pub completed_ttl_ms: u64,
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        let defaults = IdempotencyConfig::default();
        Self {
            fail_mode: defaults.fail_mode,
            lock_ttl_ms: defaults.lock_ttl.as_millis() as u64,
            completed_ttl_ms: defaults.completed_ttl.as_millis() as u64,
        }
    }
}

impl IdempotencySettings {
    pub fn to_middleware_config(&self) -> IdempotencyConfig {
        IdempotencyConfig {
            fail_mode: self.fail_mode,
            lock_ttl: Duration::from_millis(self.lock_ttl_ms),
            completed_ttl: Duration::from_millis(self.completed_ttl_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FireAndForgetConfig {
    pub timeout_ms: u64,
    /// Queue for envelopes that did not pick one.
    pub default_queue: QueueName,
}

impl Default for FireAndForgetConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            default_queue: QueueName::Low,
        }
    }
}

impl FireAndForgetConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// In-memory broker tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub lease_duration_ms: u64,
    /// How long completed and archived records stay inspectable.
    pub retention_ms: u64,
    pub retry_base_delay_ms: u64,
    pub retry_multiplier: f64,
    pub retry_max_delay_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            lease_duration_ms: DEFAULT_LEASE_DURATION.as_millis() as u64,
            retention_ms: DEFAULT_RETENTION.as_millis() as u64,
            retry_base_delay_ms: retry.base_delay.as_millis() as u64,
            retry_multiplier: retry.multiplier,
            retry_max_delay_ms: retry.max_delay.as_millis() as u64,
        }
    }
}

impl BrokerConfig {
    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.retry_base_delay_ms),
            self.retry_multiplier,
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl SpindleConfig {
    /// Defaults <- `path` (if given) <- environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&SpindleConfig::default())?);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let config: SpindleConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate().map_err(ConfigError::Invalid)?;

        let task_timeout = self.server.task_timeout_ms;
        if self.idempotency.lock_ttl_ms <= task_timeout {
            return Err(ConfigError::Invalid(format!(
                "idempotency.lock_ttl_ms ({}) must exceed server.task_timeout_ms ({task_timeout})",
                self.idempotency.lock_ttl_ms
            )));
        }
        if self.idempotency.completed_ttl_ms == 0 {
            return Err(ConfigError::Invalid(
                "idempotency.completed_ttl_ms must be positive".to_string(),
            ));
        }
        if self.broker.lease_duration_ms <= task_timeout {
            return Err(ConfigError::Invalid(format!(
                "broker.lease_duration_ms ({}) must exceed server.task_timeout_ms ({task_timeout})",
                self.broker.lease_duration_ms
            )));
        }
        if self.broker.retention_ms == 0 {
            return Err(ConfigError::Invalid(
                "broker.retention_ms must be positive".to_string(),
            ));
        }
        if !self.broker.retry_multiplier.is_finite() || self.broker.retry_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "broker.retry_multiplier must be a finite number >= 1.0".to_string(),
            ));
        }
        if self.fire_and_forget.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "fire_and_forget.timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = SpindleConfig::default();
        config.validate().unwrap();

        assert_eq!(config.server.concurrency, 10);
        assert_eq!(config.server.queues, QueueName::ALL.to_vec());
        assert_eq!(config.fire_and_forget.timeout(), Duration::from_secs(5));
        assert_eq!(config.fire_and_forget.default_queue, QueueName::Low);
        assert_eq!(config.idempotency.fail_mode, FailMode::FailOpen);
    }

    #[test]
    fn lock_ttl_must_exceed_task_timeout() {
        let mut config = SpindleConfig::default();
        config.idempotency.lock_ttl_ms = config.server.task_timeout_ms;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("lock_ttl_ms"));
    }

    #[test]
    fn zero_retention_is_rejected() {
        let mut config = SpindleConfig::default();
        config.broker.retention_ms = 0;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("retention_ms"));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut config = SpindleConfig::default();
        config.server.concurrency = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[server]
concurrency = 3
queues = ["critical", "default"]

[idempotency]
fail_mode = "fail_closed"

[broker]
retention_ms = 60000
"#
        )
        .unwrap();

        let config = SpindleConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.server.concurrency, 3);
        assert_eq!(config.server.queues, vec![QueueName::Critical, QueueName::Default]);
        assert_eq!(config.idempotency.fail_mode, FailMode::FailClosed);
        assert_eq!(config.broker.retention(), Duration::from_secs(60));
        // untouched keys keep their defaults
        assert_eq!(config.server.poll_interval_ms, 1000);
    }

    #[test]
    fn environment_overrides_defaults() {
        // Only this test touches the variable.
        unsafe { std::env::set_var("SPINDLE__FIRE_AND_FORGET__TIMEOUT_MS", "750") };
        let config = SpindleConfig::load(None);
        unsafe { std::env::remove_var("SPINDLE__FIRE_AND_FORGET__TIMEOUT_MS") };

        assert_eq!(config.unwrap().fire_and_forget.timeout_ms, 750);
    }

    #[test]
    fn idempotency_settings_convert_to_middleware_config() {
        let settings = IdempotencySettings {
            fail_mode: FailMode::FailClosed,
            lock_ttl_ms: 1_000,
            completed_ttl_ms: 2_000,
        };
        let config = settings.to_middleware_config();

        assert_eq!(config.fail_mode, FailMode::FailClosed);
        assert_eq!(config.lock_ttl, Duration::from_secs(1));
        assert_eq!(config.completed_ttl, Duration::from_secs(2));
    }
}
