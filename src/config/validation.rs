//! Configuration validation.
//!
//! This module provides validation logic for process settings,
//! ensuring they are within acceptable ranges.

use super::{Config, StoreBackend};
use crate::error::ConfigError;

/// Shortest scheduler period in seconds.
pub const MIN_COLLECTION_INTERVAL_SECS: u64 = 30;

/// Longest scheduler period in seconds (one day).
pub const MAX_COLLECTION_INTERVAL_SECS: u64 = 86_400;

/// Validate configuration values.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] if any value is out of range:
/// - `DATABASE_PATH` must not be empty when the `SQLite` backend is used
/// - `LOG_LEVEL` must not be empty
/// - `COLLECTION_INTERVAL_SECS` must be between 30 and 86400
#[must_use = "validation result should be checked"]
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.store_backend == StoreBackend::Sqlite && config.database_path.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            var: "DATABASE_PATH".into(),
            reason: "must not be empty".into(),
        });
    }

    if config.log_level.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            var: "LOG_LEVEL".into(),
            reason: "must not be empty".into(),
        });
    }

    if !(MIN_COLLECTION_INTERVAL_SECS..=MAX_COLLECTION_INTERVAL_SECS)
        .contains(&config.collection_interval_secs)
    {
        return Err(ConfigError::InvalidValue {
            var: "COLLECTION_INTERVAL_SECS".into(),
            reason: format!(
                "must be between {MIN_COLLECTION_INTERVAL_SECS} and {MAX_COLLECTION_INTERVAL_SECS} seconds"
            ),
        });
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_empty_database_path_with_sqlite() {
        let config = Config {
            database_path: "  ".into(),
            ..Config::default()
        };
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var, .. } if var == "DATABASE_PATH"));
    }

    #[test]
    fn test_empty_database_path_with_memory() {
        let config = Config {
            store_backend: StoreBackend::Memory,
            database_path: String::new(),
            ..Config::default()
        };
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_empty_log_level() {
        let config = Config {
            log_level: String::new(),
            ..Config::default()
        };
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var, .. } if var == "LOG_LEVEL"));
    }

    #[test_case(MIN_COLLECTION_INTERVAL_SECS, true ; "minimum")]
    #[test_case(MAX_COLLECTION_INTERVAL_SECS, true ; "maximum")]
    #[test_case(MIN_COLLECTION_INTERVAL_SECS - 1, false ; "below minimum")]
    #[test_case(MAX_COLLECTION_INTERVAL_SECS + 1, false ; "above maximum")]
    fn test_interval_bounds(secs: u64, valid: bool) {
        let config = Config {
            collection_interval_secs: secs,
            ..Config::default()
        };
        assert_eq!(validate_config(&config).is_ok(), valid);
    }
}
