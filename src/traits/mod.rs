//! Trait definitions for mockable dependencies.
//!
//! This module defines traits for:
//! - [`KeyValueStore`]: Backing store abstraction
//! - [`SystemMetricsProvider`]: OS resource introspection
//! - [`ApplicationMetricsSource`]: Request, cache, error, and queue counters
//! - [`TimeProvider`]: Time abstraction for testing
//!
//! # Mocking
//!
//! All traits are annotated with `#[cfg_attr(test, mockall::automock)]`
//! which generates mock implementations automatically for testing.
//!
//! # Example
//!
//! ```
//! use perf_thresholds::traits::{ManualTimeProvider, RealTimeProvider, TimeProvider};
//! use chrono::{Duration, TimeZone, Utc};
//!
//! let time_provider = RealTimeProvider;
//! println!("Current time: {}", time_provider.now());
//!
//! let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
//! let manual = ManualTimeProvider::new(start);
//! manual.advance(Duration::hours(6));
//! assert_eq!(manual.now(), start + Duration::hours(6));
//! ```

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{EngineError, StorageError};

/// Key-value store trait for mocking.
///
/// Values are JSON documents. A `ttl` of `None` keeps the entry until it is
/// overwritten or deleted; expired entries read back as `None`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key.
    ///
    /// Returns `None` if the key is absent or expired.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the store cannot be read.
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    /// Set a value, replacing any previous entry.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the store cannot be written.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>)
        -> Result<(), StorageError>;

    /// Delete a key. Returns `true` if an entry was removed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the store cannot be written.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;
}

/// OS resource introspection.
///
/// Each reading is a percentage in `[0, 100]`, or `None` when the platform
/// cannot report it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SystemMetricsProvider: Send + Sync {
    /// Short provider name for logging.
    fn name(&self) -> &'static str;

    /// CPU utilisation across all cores.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Collection`] if the reading failed unexpectedly.
    async fn cpu_usage(&self) -> Result<Option<f64>, EngineError>;

    /// Physical memory in use.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Collection`] if the reading failed unexpectedly.
    async fn memory_usage(&self) -> Result<Option<f64>, EngineError>;

    /// Space used on the root filesystem.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Collection`] if the reading failed unexpectedly.
    async fn disk_usage(&self) -> Result<Option<f64>, EngineError>;
}

/// Application-level counters.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ApplicationMetricsSource: Send + Sync {
    /// Average request latency in milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Collection`] if the source failed unexpectedly.
    async fn response_time(&self) -> Result<Option<f64>, EngineError>;

    /// Database connections in use, as a percentage of the pool maximum.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Collection`] if the source failed unexpectedly.
    async fn db_connections(&self) -> Result<Option<f64>, EngineError>;

    /// Cache hit rate as a percentage.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Collection`] if the source failed unexpectedly.
    async fn cache_hit_rate(&self) -> Result<Option<f64>, EngineError>;

    /// Failed requests as a percentage of all requests in the last hour.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Collection`] if the source failed unexpectedly.
    async fn error_rate(&self) -> Result<Option<f64>, EngineError>;

    /// Items waiting in the work queue.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Collection`] if the source failed unexpectedly.
    async fn queue_length(&self) -> Result<Option<f64>, EngineError>;
}

/// Time provider trait for mocking.
///
/// This trait abstracts time operations to allow for
/// deterministic testing of time-dependent code.
#[cfg_attr(test, mockall::automock)]
pub trait TimeProvider: Send + Sync {
    /// Get the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Real time provider using system clock.
///
/// This is the production implementation that returns the actual current time.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealTimeProvider;

impl TimeProvider for RealTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Used by tests and benchmarks to walk through rate-limit windows and
/// retention boundaries without sleeping.
#[derive(Debug)]
pub struct ManualTimeProvider {
    now: RwLock<DateTime<Utc>>,
}

impl ManualTimeProvider {
    /// Create a clock fixed at `start`.
    #[must_use]
    pub const fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, time: DateTime<Utc>) {
        match self.now.write() {
            Ok(mut now) => *now = time,
            Err(poison_error) => *poison_error.into_inner() = time,
        }
    }

    /// Move the clock forward (or backward, for a negative delta).
    pub fn advance(&self, delta: chrono::Duration) {
        match self.now.write() {
            Ok(mut now) => *now += delta,
            Err(poison_error) => *poison_error.into_inner() += delta,
        }
    }
}

impl TimeProvider for ManualTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        match self.now.read() {
            Ok(now) => *now,
            Err(poison_error) => *poison_error.into_inner(),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::float_cmp
)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use static_assertions::assert_impl_all;

    assert_impl_all!(RealTimeProvider: Send, Sync, Clone, Copy, Default);
    assert_impl_all!(ManualTimeProvider: Send, Sync);

    #[test]
    fn test_real_time_provider_now() {
        let provider = RealTimeProvider;
        let before = Utc::now();
        let now = provider.now();
        let after = Utc::now();
        assert!(now >= before);
        assert!(now <= after);
    }

    #[test]
    fn test_manual_time_provider_set_and_advance() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let clock = ManualTimeProvider::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(chrono::Duration::minutes(90));
        assert_eq!(clock.now(), start + chrono::Duration::minutes(90));

        let later = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        clock.set(later);
        assert_eq!(clock.now(), later);
    }

    #[test]
    fn test_mock_time_provider() {
        let fixed = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let mut mock = MockTimeProvider::new();
        mock.expect_now().returning(move || fixed);
        assert_eq!(mock.now(), fixed);
    }

    #[tokio::test]
    async fn test_mock_key_value_store_get() {
        let mut mock = MockKeyValueStore::new();
        mock.expect_get()
            .returning(|_| Ok(Some(serde_json::json!({"warning_value": 500.0}))));

        let value = mock.get("performance_thresholds").await.unwrap();
        assert_eq!(value.unwrap()["warning_value"], 500.0);
    }

    #[tokio::test]
    async fn test_mock_key_value_store_error() {
        let mut mock = MockKeyValueStore::new();
        mock.expect_set().returning(|_, _, _| {
            Err(StorageError::Unavailable {
                message: "refused".to_string(),
            })
        });

        let result = mock.set("k", Value::Null, None).await;
        assert!(matches!(result, Err(StorageError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn test_mock_system_provider() {
        let mut mock = MockSystemMetricsProvider::new();
        mock.expect_cpu_usage().returning(|| Ok(Some(42.5)));
        mock.expect_disk_usage().returning(|| Ok(None));

        assert_eq!(mock.cpu_usage().await.unwrap(), Some(42.5));
        assert_eq!(mock.disk_usage().await.unwrap(), None);
    }
}
