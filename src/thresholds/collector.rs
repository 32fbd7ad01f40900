//! Sampling every metric from its source.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::types::{MetricName, MetricSample};
use crate::error::EngineError;
use crate::traits::{ApplicationMetricsSource, SystemMetricsProvider};

/// Reads the eight metrics from the configured sources.
///
/// A source failure affects only its own metric: the error is logged and
/// the metric is recorded as unavailable.
#[derive(Clone)]
pub struct MetricCollector {
    system: Arc<dyn SystemMetricsProvider>,
    application: Option<Arc<dyn ApplicationMetricsSource>>,
}

impl std::fmt::Debug for MetricCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricCollector")
            .field("system", &self.system.name())
            .field("application", &self.application.is_some())
            .finish()
    }
}

impl MetricCollector {
    /// Create a collector. Without an application source those five
    /// metrics are always unavailable.
    #[must_use]
    pub fn new(
        system: Arc<dyn SystemMetricsProvider>,
        application: Option<Arc<dyn ApplicationMetricsSource>>,
    ) -> Self {
        Self {
            system,
            application,
        }
    }

    /// Take one sample stamped `timestamp`.
    pub async fn sample(&self, timestamp: DateTime<Utc>) -> MetricSample {
        let mut sample = MetricSample::new(timestamp);

        for metric in MetricName::ALL {
            let reading = self.read(metric).await;
            let value = match reading {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(metric = %metric, error = %e, "Metric collection failed");
                    None
                }
            };
            if value.is_some_and(|v| !v.is_finite()) {
                tracing::warn!(metric = %metric, "Discarding non-finite reading");
            }
            sample.set(metric, value);
        }

        tracing::debug!(
            available = sample.available_count(),
            total = MetricName::ALL.len(),
            "Collected metric sample"
        );
        sample
    }

    async fn read(&self, metric: MetricName) -> Result<Option<f64>, EngineError> {
        match (metric, self.application.as_deref()) {
            (MetricName::CpuUsage, _) => self.system.cpu_usage().await,
            (MetricName::MemoryUsage, _) => self.system.memory_usage().await,
            (MetricName::DiskUsage, _) => self.system.disk_usage().await,
            (_, None) => Ok(None),
            (MetricName::ResponseTime, Some(app)) => app.response_time().await,
            (MetricName::DbConnections, Some(app)) => app.db_connections().await,
            (MetricName::CacheHitRate, Some(app)) => app.cache_hit_rate().await,
            (MetricName::ErrorRate, Some(app)) => app.error_rate().await,
            (MetricName::QueueLength, Some(app)) => app.queue_length().await,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::metrics::NullSystemProvider;
    use crate::test_utils::{mock_app_source, mock_system, AppReadings};
    use crate::traits::{MockApplicationMetricsSource, MockSystemMetricsProvider};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, 1, 0, 0, 0).unwrap()
    }

    fn healthy_app() -> MockApplicationMetricsSource {
        mock_app_source(AppReadings {
            response_time: Some(210.0),
            db_connections: Some(35.0),
            cache_hit_rate: Some(92.0),
            error_rate: Some(0.4),
            queue_length: Some(3.0),
        })
    }

    #[tokio::test]
    async fn test_all_sources_present() {
        let system = mock_system(41.0, 63.5, 77.0);

        let collector = MetricCollector::new(Arc::new(system), Some(Arc::new(healthy_app())));
        let sample = collector.sample(ts()).await;

        assert_eq!(sample.timestamp, ts());
        assert_eq!(sample.available_count(), 8);
        assert_eq!(sample.value(MetricName::CpuUsage), Some(41.0));
        assert_eq!(sample.value(MetricName::ResponseTime), Some(210.0));
    }

    #[tokio::test]
    async fn test_missing_sources_are_unavailable() {
        let collector = MetricCollector::new(Arc::new(NullSystemProvider), None);
        let sample = collector.sample(ts()).await;
        assert_eq!(sample.available_count(), 0);
        assert_eq!(sample.values.len(), 8);
    }

    #[tokio::test]
    async fn test_failure_and_non_finite_are_isolated() {
        let mut system = MockSystemMetricsProvider::new();
        system.expect_cpu_usage().returning(|| {
            Err(EngineError::Collection {
                metric: "cpu_usage".into(),
                message: "boom".into(),
            })
        });
        system.expect_memory_usage().returning(|| Ok(Some(f64::NAN)));
        system.expect_disk_usage().returning(|| Ok(Some(50.0)));

        let collector = MetricCollector::new(Arc::new(system), Some(Arc::new(healthy_app())));
        let sample = collector.sample(ts()).await;

        assert_eq!(sample.value(MetricName::CpuUsage), None);
        assert_eq!(sample.value(MetricName::MemoryUsage), None);
        assert_eq!(sample.value(MetricName::DiskUsage), Some(50.0));
        assert_eq!(sample.available_count(), 6);
    }
}
