//! Configuration management system for FerroSync
//!
//! Configuration is layered: built-in defaults, then an optional YAML/TOML/JSON file, then
//! `FERROSYNC__*` environment variables (`__` separates nested keys, e.g.
//! `FERROSYNC__SCHEDULER__CHECK_INTERVAL_MS=30000`).
//!
//! # Examples
//!
//! ```rust
//! use ferrosync_config::ConfigBuilder;
//!
//! let config = ConfigBuilder::new()
//!     .optional_file("ferrosync.yaml")
//!     .env("FERROSYNC")
//!     .build()
//!     .expect("Failed to load configuration");
//!
//! println!("Check interval: {:?}", config.scheduler.check_interval());
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use ferrosync_types::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub mod builder;
pub mod error;
pub mod loader;

pub use builder::ConfigBuilder;
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

/// Main configuration structure for FerroSync
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scheduler loop configuration
    pub scheduler: SchedulerSettings,
    /// Retry budgets
    pub retry: RetrySettings,
    /// Transport configuration
    pub transport: TransportSettings,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// State storage configuration
    pub storage: StorageConfig,
}

impl Config {
    /// Reject settings the scheduler cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        self.scheduler.validate()?;
        self.retry.validate()?;
        self.logging.validate()
    }
}

/// Scheduler loop configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Period between due-schedule checks
    pub check_interval_ms: u64,
    /// Runs allowed to execute at the same time across all schedules
    pub max_concurrent_runs: usize,
    /// A `running` status older than this is reset at startup
    pub stale_run_threshold_secs: u64,
    /// Interpret trigger times in the local timezone instead of UTC
    pub use_local_time: bool,
}

impl SchedulerSettings {
    /// Minimum accepted check interval
    pub const MIN_CHECK_INTERVAL_MS: u64 = 1000;

    /// Check interval as a duration
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    /// Stale threshold as a duration
    pub fn stale_run_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_run_threshold_secs)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.check_interval_ms < Self::MIN_CHECK_INTERVAL_MS {
            return Err(ConfigError::invalid(
                "scheduler.check_interval_ms",
                format!(
                    "{} is below the minimum of {}",
                    self.check_interval_ms,
                    Self::MIN_CHECK_INTERVAL_MS
                ),
            ));
        }
        if self.max_concurrent_runs == 0 {
            return Err(ConfigError::invalid(
                "scheduler.max_concurrent_runs",
                "at least one run must be allowed",
            ));
        }
        if self.stale_run_threshold_secs == 0 {
            return Err(ConfigError::invalid(
                "scheduler.stale_run_threshold_secs",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            check_interval_ms: 60_000,
            max_concurrent_runs: (num_cpus::get() * 2).max(2),
            stale_run_threshold_secs: 2 * 60 * 60,
            use_local_time: true,
        }
    }
}

/// Retry budgets for the two retried operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Budget for establishing the transport connection
    pub connect: RetryConfig,
    /// Budget for each single-file transfer
    pub transfer: RetryConfig,
}

impl RetrySettings {
    fn validate(&self) -> ConfigResult<()> {
        self.connect
            .validate()
            .map_err(|message| ConfigError::invalid("retry.connect", message))?;
        self.transfer
            .validate()
            .map_err(|message| ConfigError::invalid("retry.transfer", message))
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            connect: RetryConfig {
                max_attempts: 3,
                initial_delay_ms: 1000,
                max_delay_ms: 10_000,
                backoff_multiplier: 2.0,
            },
            transfer: RetryConfig::default(),
        }
    }
}

/// Transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Control connection timeout
    pub connect_timeout_secs: u64,
    /// Use passive data connections
    pub passive_mode: bool,
    /// Relay directory for server-to-server copies; system temp when unset
    pub temp_dir: Option<PathBuf>,
}

impl TransportSettings {
    /// Connect timeout as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            passive_mode: true,
            temp_dir: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Enable JSON formatting
    pub json_format: bool,
    /// Write logs to this file instead of stderr
    pub log_file: Option<PathBuf>,
}

impl LoggingConfig {
    const LEVELS: [&'static str; 5] = ["trace", "debug", "info", "warn", "error"];

    fn validate(&self) -> ConfigResult<()> {
        let level = self.level.to_ascii_lowercase();
        if Self::LEVELS.contains(&level.as_str()) {
            Ok(())
        } else {
            Err(ConfigError::invalid(
                "logging.level",
                format!("unknown level '{}'", self.level),
            ))
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            log_file: None,
        }
    }
}

/// State storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Snapshot file holding connections, schedules and history
    pub state_file: Option<PathBuf>,
    /// Finished runs kept in history, oldest dropped first; `0` keeps all
    pub max_history: usize,
    /// Audit events kept; `0` keeps all
    pub max_audit_events: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_file: None,
            max_history: 1000,
            max_audit_events: 5000,
        }
    }
}
