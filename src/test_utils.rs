//! Test utilities and mock factories.
//!
//! This module provides shared testing infrastructure:
//! - Mock metric sources with fixed readings
//! - A store that always fails
//! - Sample builders
//!
//! Only compiled for tests (`#[cfg(test)]`).

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{DateTime, TimeZone, Utc};

use crate::error::StorageError;
use crate::thresholds::{MetricName, MetricSample};
use crate::traits::{MockApplicationMetricsSource, MockKeyValueStore, MockSystemMetricsProvider};

/// Fixed instant used as "now" by most tests.
#[must_use]
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap()
}

/// Application readings for a mock source; `None` means unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppReadings {
    /// Average latency in ms.
    pub response_time: Option<f64>,
    /// Connection pool use in percent.
    pub db_connections: Option<f64>,
    /// Cache hit rate in percent.
    pub cache_hit_rate: Option<f64>,
    /// Error rate in percent.
    pub error_rate: Option<f64>,
    /// Queue depth.
    pub queue_length: Option<f64>,
}

/// Create a mock application source that always reports `readings`.
///
/// # Example
///
/// ```ignore
/// let app = mock_app_source(AppReadings {
///     response_time: Some(120.0),
///     ..AppReadings::default()
/// });
/// ```
#[must_use]
pub fn mock_app_source(readings: AppReadings) -> MockApplicationMetricsSource {
    let mut app = MockApplicationMetricsSource::new();
    app.expect_response_time()
        .returning(move || Ok(readings.response_time));
    app.expect_db_connections()
        .returning(move || Ok(readings.db_connections));
    app.expect_cache_hit_rate()
        .returning(move || Ok(readings.cache_hit_rate));
    app.expect_error_rate()
        .returning(move || Ok(readings.error_rate));
    app.expect_queue_length()
        .returning(move || Ok(readings.queue_length));
    app
}

/// Create a mock OS provider that always reports the given percentages.
#[must_use]
pub fn mock_system(cpu: f64, memory: f64, disk: f64) -> MockSystemMetricsProvider {
    let mut system = MockSystemMetricsProvider::new();
    system.expect_name().return_const("mock");
    system.expect_cpu_usage().returning(move || Ok(Some(cpu)));
    system
        .expect_memory_usage()
        .returning(move || Ok(Some(memory)));
    system.expect_disk_usage().returning(move || Ok(Some(disk)));
    system
}

/// Create a store whose reads fail with [`StorageError::Unavailable`] and
/// which must never be written.
#[must_use]
pub fn unreachable_store(message: &'static str) -> MockKeyValueStore {
    let mut store = MockKeyValueStore::new();
    store.expect_get().returning(move |_| {
        Err(StorageError::Unavailable {
            message: message.into(),
        })
    });
    store.expect_set().never();
    store.expect_delete().never();
    store
}

/// Build a sample from `(metric, value)` pairs; the rest are unavailable.
#[must_use]
pub fn sample_at(timestamp: DateTime<Utc>, values: &[(MetricName, f64)]) -> MetricSample {
    values
        .iter()
        .fold(MetricSample::new(timestamp), |sample, &(metric, value)| {
            sample.with_value(metric, Some(value))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{ApplicationMetricsSource, KeyValueStore, SystemMetricsProvider};

    #[tokio::test]
    async fn test_mock_app_source_reports_readings() {
        let app = mock_app_source(AppReadings {
            response_time: Some(120.0),
            queue_length: Some(2.0),
            ..AppReadings::default()
        });
        assert_eq!(app.response_time().await.unwrap(), Some(120.0));
        assert_eq!(app.queue_length().await.unwrap(), Some(2.0));
        assert_eq!(app.error_rate().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_mock_system_reports_readings() {
        let system = mock_system(10.0, 20.0, 30.0);
        assert_eq!(system.name(), "mock");
        assert_eq!(system.disk_usage().await.unwrap(), Some(30.0));
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_reads() {
        let store = unreachable_store("down");
        assert!(matches!(
            store.get("any").await,
            Err(StorageError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_sample_at_leaves_rest_unavailable() {
        let sample = sample_at(fixed_now(), &[(MetricName::CpuUsage, 40.0)]);
        assert_eq!(sample.available_count(), 1);
        assert_eq!(sample.value(MetricName::CpuUsage), Some(40.0));
        assert_eq!(sample.value(MetricName::ErrorRate), None);
    }
}
