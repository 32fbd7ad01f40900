//! OS resource readings.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EngineError;
use crate::traits::SystemMetricsProvider;

/// Provider used when OS introspection is unavailable or disabled.
///
/// Every reading is unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSystemProvider;

#[async_trait]
impl SystemMetricsProvider for NullSystemProvider {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn cpu_usage(&self) -> Result<Option<f64>, EngineError> {
        Ok(None)
    }

    async fn memory_usage(&self) -> Result<Option<f64>, EngineError> {
        Ok(None)
    }

    async fn disk_usage(&self) -> Result<Option<f64>, EngineError> {
        Ok(None)
    }
}

#[cfg(feature = "system-metrics")]
pub use sysinfo_provider::SysinfoProvider;

#[cfg(feature = "system-metrics")]
mod sysinfo_provider {
    use std::path::Path;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use sysinfo::{Disks, System};

    use crate::error::EngineError;
    use crate::thresholds::MetricName;
    use crate::traits::SystemMetricsProvider;

    /// Readings from the `sysinfo` crate.
    ///
    /// CPU usage needs two refreshes separated by
    /// [`sysinfo::MINIMUM_CPU_UPDATE_INTERVAL`], so that reading sleeps briefly.
    #[derive(Debug)]
    pub struct SysinfoProvider {
        system: Mutex<System>,
    }

    impl Default for SysinfoProvider {
        fn default() -> Self {
            Self::new()
        }
    }

    impl SysinfoProvider {
        /// Create a provider with nothing loaded yet.
        #[must_use]
        pub fn new() -> Self {
            Self {
                system: Mutex::new(System::new()),
            }
        }

        fn with_system<T>(
            &self,
            metric: MetricName,
            f: impl FnOnce(&mut System) -> T,
        ) -> Result<T, EngineError> {
            let mut system = self.system.lock().map_err(|_| EngineError::Collection {
                metric: metric.to_string(),
                message: "system info lock poisoned".into(),
            })?;
            Ok(f(&mut system))
        }
    }

    #[async_trait]
    impl SystemMetricsProvider for SysinfoProvider {
        fn name(&self) -> &'static str {
            "sysinfo"
        }

        async fn cpu_usage(&self) -> Result<Option<f64>, EngineError> {
            self.with_system(MetricName::CpuUsage, System::refresh_cpu)?;
            tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
            self.with_system(MetricName::CpuUsage, |system| {
                system.refresh_cpu();
                if system.cpus().is_empty() {
                    None
                } else {
                    Some(f64::from(system.global_cpu_info().cpu_usage()))
                }
            })
        }

        #[allow(clippy::cast_precision_loss)]
        async fn memory_usage(&self) -> Result<Option<f64>, EngineError> {
            self.with_system(MetricName::MemoryUsage, |system| {
                system.refresh_memory();
                let total = system.total_memory();
                (total > 0).then(|| system.used_memory() as f64 / total as f64 * 100.0)
            })
        }

        #[allow(clippy::cast_precision_loss)]
        async fn disk_usage(&self) -> Result<Option<f64>, EngineError> {
            let disks = Disks::new_with_refreshed_list();
            let root = disks
                .iter()
                .find(|disk| disk.mount_point() == Path::new("/"))
                .or_else(|| disks.iter().next());

            Ok(root.and_then(|disk| {
                let total = disk.total_space();
                let used = total.saturating_sub(disk.available_space());
                (total > 0).then(|| used as f64 / total as f64 * 100.0)
            }))
        }
    }
}

/// Pick the system provider for this build and configuration.
#[must_use]
pub fn select_system_provider(enabled: bool) -> Arc<dyn SystemMetricsProvider> {
    #[cfg(feature = "system-metrics")]
    if enabled {
        tracing::debug!("Using sysinfo system metrics");
        return Arc::new(SysinfoProvider::new());
    }

    if enabled {
        tracing::warn!("System metrics requested but the system-metrics feature is off");
    }
    Arc::new(NullSystemProvider)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(NullSystemProvider: Send, Sync, Clone, Default);

    #[tokio::test]
    async fn test_null_provider_reports_unavailable() {
        let provider = NullSystemProvider;
        assert_eq!(provider.name(), "null");
        assert_eq!(provider.cpu_usage().await.unwrap(), None);
        assert_eq!(provider.memory_usage().await.unwrap(), None);
        assert_eq!(provider.disk_usage().await.unwrap(), None);
    }

    #[test]
    fn test_select_disabled_is_null() {
        assert_eq!(select_system_provider(false).name(), "null");
    }

    #[cfg(feature = "system-metrics")]
    #[tokio::test]
    async fn test_sysinfo_readings_are_percentages() {
        let provider = select_system_provider(true);
        assert_eq!(provider.name(), "sysinfo");

        let readings = [
            provider.cpu_usage().await.unwrap(),
            provider.memory_usage().await.unwrap(),
            provider.disk_usage().await.unwrap(),
        ];
        for value in readings.into_iter().flatten() {
            assert!((0.0..=100.0 + f64::EPSILON).contains(&value), "{value}");
        }
    }
}
