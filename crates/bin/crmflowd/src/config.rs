//! Configuration loading — TOML file with environment variable overrides.
//!
//! Reads `crmflow.toml` from the working directory, or the file named by
//! `CRMFLOW_CONFIG`. Every field has a sensible default so the file is
//! optional. Environment variables take precedence over file values.

use std::time::Duration;

use serde::Deserialize;

use crmflow_app::action_executor::DEFAULT_CONFLICT_RETRIES;
use crmflow_app::automation_engine::{DEFAULT_LOCK_LEASE_SECS, MAX_LOCK_LEASE_SECS};
use crmflow_app::dispatcher::DispatcherConfig;
use crmflow_app::step_machine::{DEFAULT_MAX_STEPS_PER_TICK, DEFAULT_STEP_TIMEOUT};

const DEFAULT_PATH: &str = "crmflow.toml";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Database settings.
    pub database: DatabaseConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Automation engine tuning.
    pub engine: EngineConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to (e.g. `0.0.0.0`).
    pub host: String,
    /// TCP port.
    pub port: u16,
}

/// `SQLite` database configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `SQLite` connection URL or file path.
    pub url: String,
    pub max_connections: u32,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// Scheduler, locking and execution limits.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sweep_interval_secs: u64,
    /// Most due enrollments loaded per sweep.
    pub batch_size: usize,
    /// Most enrollment ticks running at once.
    pub max_concurrency: usize,
    /// How long a tick may hold an enrollment's lock before others may take it.
    ///
    /// Must exceed `step_timeout_secs * max_steps_per_tick`, the longest a
    /// tick can run.
    pub lock_lease_secs: i64,
    pub step_timeout_secs: u64,
    pub max_steps_per_tick: usize,
    /// Re-reads after a version conflict before an action gives up.
    pub conflict_retries: u32,
    pub event_bus_capacity: usize,
}

impl Config {
    /// Load configuration from the config file (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// resulting configuration is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CRMFLOW_CONFIG").unwrap_or_else(|_| DEFAULT_PATH.to_string());
        let mut config = Self::from_file(&path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("CRMFLOW_HOST") {
            self.server.host = val;
        }
        if let Some(port) = var("CRMFLOW_PORT").and_then(|val| val.parse().ok()) {
            self.server.port = port;
        }
        if let Some(val) = var("CRMFLOW_BIND") {
            if let Some((host, port)) = val.rsplit_once(':') {
                self.server.host = host.to_string();
                if let Ok(port) = port.parse() {
                    self.server.port = port;
                }
            }
        }
        if let Some(val) = var("CRMFLOW_DATABASE_URL") {
            self.database.url = val;
        }
        if let Some(val) = var("CRMFLOW_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("RUST_LOG") {
            self.logging.filter = val;
        }
        if let Some(secs) = var("CRMFLOW_SWEEP_INTERVAL_SECS").and_then(|val| val.parse().ok()) {
            self.engine.sweep_interval_secs = secs;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation("port must be non-zero".to_string()));
        }
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "database url must not be empty".to_string(),
            ));
        }
        let engine = &self.engine;
        if engine.sweep_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "engine.sweep_interval_secs must be non-zero".to_string(),
            ));
        }
        if engine.batch_size == 0 || engine.max_concurrency == 0 || engine.max_steps_per_tick == 0 {
            return Err(ConfigError::Validation(
                "engine.batch_size, max_concurrency and max_steps_per_tick must be non-zero"
                    .to_string(),
            ));
        }
        if engine.event_bus_capacity == 0 {
            return Err(ConfigError::Validation(
                "engine.event_bus_capacity must be non-zero".to_string(),
            ));
        }
        if engine.step_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "engine.step_timeout_secs must be non-zero".to_string(),
            ));
        }
        // a tick must never outlive the lock that guards it
        let tick_budget = u64::try_from(engine.max_steps_per_tick)
            .unwrap_or(u64::MAX)
            .saturating_mul(engine.step_timeout_secs);
        let lease = u64::try_from(engine.lock_lease_secs).unwrap_or(0);
        if lease <= tick_budget {
            return Err(ConfigError::Validation(format!(
                "engine.lock_lease_secs must exceed step_timeout_secs * max_steps_per_tick ({tick_budget})"
            )));
        }
        if engine.lock_lease_secs > MAX_LOCK_LEASE_SECS {
            return Err(ConfigError::Validation(format!(
                "engine.lock_lease_secs must be at most {MAX_LOCK_LEASE_SECS}"
            )));
        }
        Ok(())
    }

    /// Return the `host:port` bind address.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Return the database URL in `sqlx`-compatible format.
    #[must_use]
    pub fn database_url(&self) -> &str {
        &self.database.url
    }
}

impl EngineConfig {
    #[must_use]
    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            batch_size: self.batch_size,
            max_concurrency: self.max_concurrency,
        }
    }

    #[must_use]
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    #[must_use]
    pub fn lock_lease(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::seconds(self.lock_lease_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:crmflow.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "crmflowd=info,crmflow_app=info,tower_http=debug".to_string(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let dispatcher = DispatcherConfig::default();
        Self {
            sweep_interval_secs: dispatcher.sweep_interval.as_secs(),
            batch_size: dispatcher.batch_size,
            max_concurrency: dispatcher.max_concurrency,
            lock_lease_secs: DEFAULT_LOCK_LEASE_SECS,
            step_timeout_secs: DEFAULT_STEP_TIMEOUT.as_secs(),
            max_steps_per_tick: DEFAULT_MAX_STEPS_PER_TICK,
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
            event_bus_capacity: 1024,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn should_produce_sensible_defaults() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.database.url, "sqlite:crmflow.db?mode=rwc");
        assert_eq!(config.engine.sweep_interval_secs, 5);
        assert_eq!(config.engine.lock_lease_secs, 1800);
        assert_eq!(config.engine.step_timeout_secs, 30);
        assert_eq!(config.engine.max_steps_per_tick, 50);
        assert_eq!(config.engine.conflict_retries, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn should_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn should_parse_full_toml() {
        let toml = "
            [server]
            host = '127.0.0.1'
            port = 9090

            [database]
            url = 'sqlite:test.db'
            max_connections = 2

            [logging]
            filter = 'debug'

            [engine]
            sweep_interval_secs = 1
            batch_size = 10
            max_concurrency = 2
            lock_lease_secs = 120
            step_timeout_secs = 10
            max_steps_per_tick = 5
            conflict_retries = 4
            event_bus_capacity = 64
        ";
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.database.url, "sqlite:test.db");
        assert_eq!(config.database.max_connections, 2);
        assert_eq!(config.logging.filter, "debug");
        assert_eq!(config.engine.batch_size, 10);
        assert_eq!(config.engine.conflict_retries, 4);
        assert_eq!(config.engine.dispatcher().sweep_interval, Duration::from_secs(1));
        assert_eq!(config.engine.lock_lease(), chrono::TimeDelta::seconds(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn should_parse_partial_toml_with_defaults() {
        let toml = "
            [engine]
            batch_size = 7
        ";
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.engine.batch_size, 7);
        assert_eq!(config.engine.max_concurrency, 8);
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn should_return_default_when_file_not_found() {
        let config = Config::from_file("nonexistent.toml").unwrap();
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn should_report_parse_error_for_invalid_toml() {
        let result: Result<Config, _> = toml::from_str("invalid {{{");
        assert!(result.is_err());
    }

    #[test]
    fn should_apply_env_overrides_over_file_values() {
        let mut config = Config::default();
        config.apply_env_overrides(env(&[
            ("CRMFLOW_BIND", "127.0.0.1:8080"),
            ("CRMFLOW_DATABASE_URL", "sqlite::memory:"),
            ("CRMFLOW_LOG", "warn"),
            ("RUST_LOG", "trace"),
            ("CRMFLOW_SWEEP_INTERVAL_SECS", "2"),
        ]));
        assert_eq!(config.bind_addr(), "127.0.0.1:8080");
        assert_eq!(config.database_url(), "sqlite::memory:");
        assert_eq!(config.logging.filter, "trace");
        assert_eq!(config.engine.sweep_interval_secs, 2);
    }

    #[test]
    fn should_ignore_unparsable_env_values() {
        let mut config = Config::default();
        config.apply_env_overrides(env(&[
            ("CRMFLOW_PORT", "http"),
            ("CRMFLOW_SWEEP_INTERVAL_SECS", "soon"),
        ]));
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.engine.sweep_interval_secs, 5);
    }

    #[test]
    fn should_reject_zero_port() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_reject_lease_shorter_than_step_timeout() {
        let mut config = Config::default();
        config.engine.lock_lease_secs = 10;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn should_reject_lease_shorter_than_longest_tick() {
        let mut config = Config::default();
        config.engine.step_timeout_secs = 30;
        config.engine.max_steps_per_tick = 50;
        config.engine.lock_lease_secs = 61;
        let Err(ConfigError::Validation(message)) = config.validate() else {
            panic!("lease of one step accepted");
        };
        assert!(message.contains("(1500)"));

        config.engine.lock_lease_secs = 1501;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn should_reject_zero_sweep_interval() {
        let mut config = Config::default();
        config.engine.sweep_interval_secs = 0;
        assert!(config.validate().is_err());
    }
}
