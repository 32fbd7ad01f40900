//! Configuration management.
//!
//! Two layers:
//! - [`Config`]: process settings read from the environment at startup
//! - [`ThresholdConfig`]: engine tunables kept in the key-value store
//!
//! # Example
//!
//! ```
//! use perf_thresholds::config::{Config, LogFormat, StoreBackend, DEFAULT_DATABASE_PATH};
//!
//! // Create a config directly (use Config::from_env() in production)
//! let config = Config {
//!     store_backend: StoreBackend::Memory,
//!     database_path: DEFAULT_DATABASE_PATH.to_string(),
//!     log_level: "info".to_string(),
//!     log_format: LogFormat::Text,
//!     collection_interval_secs: 300,
//!     system_metrics_enabled: false,
//! };
//!
//! assert!(perf_thresholds::config::validate_config(&config).is_ok());
//! assert_eq!(config.collection_interval().as_secs(), 300);
//! ```

mod engine;
mod validation;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub use engine::{
    ConfigUpdate, ThresholdConfig, DEFAULT_ADJUSTMENT_FREQUENCY_HOURS,
    DEFAULT_ADJUSTMENT_SENSITIVITY, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_LEARNING_WINDOW_DAYS,
    DEFAULT_MAX_THRESHOLD_CHANGE, DEFAULT_MIN_SAMPLES_FOR_ADJUSTMENT,
    MAX_ADJUSTMENT_FREQUENCY_HOURS, MAX_LEARNING_WINDOW_DAYS,
};
pub use validation::{validate_config, MAX_COLLECTION_INTERVAL_SECS, MIN_COLLECTION_INTERVAL_SECS};

use crate::error::ConfigError;

/// Default database path.
pub const DEFAULT_DATABASE_PATH: &str = "./data/thresholds.db";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default seconds between scheduled collections.
pub const DEFAULT_COLLECTION_INTERVAL_SECS: u64 = 300;

/// Which key-value store backs the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StoreBackend {
    /// `SQLite` file at [`Config::database_path`].
    #[default]
    Sqlite,
    /// In-process store; nothing survives a restart.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            _ => Err(ConfigError::InvalidValue {
                var: "THRESHOLDS_STORE".into(),
                reason: format!("expected 'sqlite' or 'memory', got '{s}'"),
            }),
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sqlite => "sqlite",
            Self::Memory => "memory",
        })
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::InvalidValue {
                var: "LOG_FORMAT".into(),
                reason: format!("expected 'text' or 'json', got '{s}'"),
            }),
        }
    }
}

/// Process configuration.
///
/// Use [`Config::from_env`] to load it from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Store backend.
    pub store_backend: StoreBackend,
    /// Database path (`SQLite` backend only).
    pub database_path: String,
    /// Log level or `EnvFilter` directive.
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
    /// Seconds between scheduled collections.
    pub collection_interval_secs: u64,
    /// Whether to read CPU, memory, and disk usage from the OS.
    pub system_metrics_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_backend: StoreBackend::default(),
            database_path: DEFAULT_DATABASE_PATH.into(),
            log_level: DEFAULT_LOG_LEVEL.into(),
            log_format: LogFormat::default(),
            collection_interval_secs: DEFAULT_COLLECTION_INTERVAL_SECS,
            system_metrics_enabled: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional environment variables (with defaults):
    /// - `THRESHOLDS_STORE`: `sqlite` or `memory` (default: `sqlite`)
    /// - `DATABASE_PATH`: Path to `SQLite` database (default: `./data/thresholds.db`)
    /// - `LOG_LEVEL`: Logging level (default: `info`)
    /// - `LOG_FORMAT`: `text` or `json` (default: `text`)
    /// - `COLLECTION_INTERVAL_SECS`: Scheduler period (default: `300`)
    /// - `SYSTEM_METRICS_ENABLED`: Read OS metrics (default: `true`)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a variable does not parse or
    /// fails validation (see [`validate_config`]).
    #[must_use = "configuration should be used"]
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        let store_backend = std::env::var("THRESHOLDS_STORE")
            .map_or(Ok(StoreBackend::default()), |val| val.parse())?;

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| DEFAULT_DATABASE_PATH.into());

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.into());

        let log_format =
            std::env::var("LOG_FORMAT").map_or(Ok(LogFormat::default()), |val| val.parse())?;

        let collection_interval_secs =
            parse_env_u64("COLLECTION_INTERVAL_SECS", DEFAULT_COLLECTION_INTERVAL_SECS)?;

        let system_metrics_enabled = parse_env_bool("SYSTEM_METRICS_ENABLED", true)?;

        let config = Self {
            store_backend,
            database_path,
            log_level,
            log_format,
            collection_interval_secs,
            system_metrics_enabled,
        };

        validate_config(&config)?;
        Ok(config)
    }

    /// Scheduler period.
    #[must_use]
    pub const fn collection_interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval_secs)
    }
}

/// Parse an environment variable as u64, using a default if not set.
fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    std::env::var(name).map_or(Ok(default), |val| {
        val.parse().map_err(|_| ConfigError::InvalidValue {
            var: name.into(),
            reason: "must be a positive integer".into(),
        })
    })
}

/// Parse an environment variable as a boolean, using a default if not set.
fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    std::env::var(name).map_or(Ok(default), |val| {
        match val.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                var: name.into(),
                reason: "must be true or false".into(),
            }),
        }
    })
}
