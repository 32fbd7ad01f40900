//! Single-writer threshold service.
//!
//! [`ThresholdService`] owns a [`ThresholdManager`] inside one background
//! task. Every engine call goes through a [`ServiceHandle`], so adjustment
//! runs, manual overrides, and config updates never interleave.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 ThresholdService                     │
//! │  (Background Tokio Task)                             │
//! ├─────────────────────────────────────────────────────┤
//! │  ThresholdManager                                    │
//! │   ├─MetricCollector                                  │
//! │   ├─HistoryStore / StateStore                        │
//! │   └─analyzer, adjuster, checker                      │
//! │                        ▲                             │
//! │  ┌──────────┐    ┌────────────┐    ┌─────────────┐   │
//! │  │ Interval │    │ Command RX │    │ Shutdown    │   │
//! │  │ Ticker   │    │ (mpsc)     │    │ (watch)     │   │
//! │  └──────────┘    └────────────┘    └─────────────┘   │
//! └────────────────────────┼────────────────────────────┘
//!                          │
//! ┌────────────────────────┼────────────────────────────┐
//! │                  ServiceHandle                       │
//! │  (Clone-able, Send+Sync)                             │
//! ├─────────────────────────────────────────────────────┤
//! │  command_tx: mpsc::Sender<ServiceCommand>            │
//! │  status_rx: watch::Receiver<ServiceStatus>           │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Each scheduled cycle collects a sample, checks it, and runs a non-forced
//! adjustment when auto adjustment is enabled.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};

use super::manager::ThresholdManager;
use super::types::{
    AdjustmentOutcome, AdjustmentRecord, AlertLevel, AnalysisResult, CheckResult, MetricSample,
    StatusSnapshot, Threshold, ThresholdTable,
};
use crate::config::{ConfigUpdate, ThresholdConfig};
use crate::error::EngineError;

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// Commands that can be sent to the service.
#[derive(Debug)]
pub enum ServiceCommand {
    /// Collect and record a sample.
    Collect {
        /// Response channel.
        response_tx: Reply<MetricSample>,
    },
    /// Analyze the learning window.
    Analyze {
        /// Response channel.
        response_tx: Reply<AnalysisResult>,
    },
    /// Run an adjustment.
    Adjust {
        /// Ignore the rate limit.
        force: bool,
        /// Response channel.
        response_tx: Reply<AdjustmentOutcome>,
    },
    /// Collect and check a sample.
    Check {
        /// Response channel.
        response_tx: Reply<CheckResult>,
    },
    /// Build a status snapshot.
    Status {
        /// Response channel.
        response_tx: Reply<StatusSnapshot>,
    },
    /// Read the threshold table.
    Thresholds {
        /// Response channel.
        response_tx: Reply<ThresholdTable>,
    },
    /// Manually override one threshold.
    SetThreshold {
        /// Metric name.
        metric: String,
        /// New warning value.
        warning: f64,
        /// New critical value.
        critical: f64,
        /// Response channel.
        response_tx: Reply<Threshold>,
    },
    /// Read the engine config.
    Config {
        /// Response channel.
        response_tx: Reply<ThresholdConfig>,
    },
    /// Update the engine config.
    UpdateConfig {
        /// Fields to change.
        update: ConfigUpdate,
        /// Response channel.
        response_tx: Reply<ThresholdConfig>,
    },
    /// Read the audit log.
    History {
        /// Maximum number of records.
        limit: Option<usize>,
        /// Response channel.
        response_tx: Reply<Vec<AdjustmentRecord>>,
    },
}

/// Scheduler state published on every change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Whether the service loop is running.
    pub running: bool,
    /// Scheduled cycles started.
    pub total_cycles: u64,
    /// Cycles that completed without a store error.
    pub successful_cycles: u64,
    /// Cycles that hit a store error.
    pub failed_cycles: u64,
    /// When the last cycle started.
    pub last_cycle_at: Option<DateTime<Utc>>,
    /// Overall status of the last scheduled check.
    pub last_check_status: Option<AlertLevel>,
    /// Error from the last failed cycle.
    pub last_error: Option<String>,
}

/// Handle for talking to a running [`ThresholdService`].
///
/// This handle is cheap to clone and can be shared across tasks.
#[derive(Clone)]
pub struct ServiceHandle {
    command_tx: mpsc::Sender<ServiceCommand>,
    status_rx: watch::Receiver<ServiceStatus>,
}

impl std::fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("status", &*self.status_rx.borrow())
            .finish_non_exhaustive()
    }
}

impl ServiceHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> ServiceCommand,
    ) -> Result<T, EngineError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(command(response_tx))
            .await
            .map_err(|_| EngineError::ServiceUnavailable {
                message: "Threshold service not running".into(),
            })?;

        response_rx
            .await
            .map_err(|_| EngineError::ServiceUnavailable {
                message: "Threshold service disconnected".into(),
            })?
    }

    /// See [`ThresholdManager::collect_current_metrics`].
    pub async fn collect(&self) -> Result<MetricSample, EngineError> {
        self.request(|response_tx| ServiceCommand::Collect { response_tx })
            .await
    }

    /// See [`ThresholdManager::analyze_patterns`].
    pub async fn analyze(&self) -> Result<AnalysisResult, EngineError> {
        self.request(|response_tx| ServiceCommand::Analyze { response_tx })
            .await
    }

    /// See [`ThresholdManager::adjust_thresholds`].
    pub async fn adjust(&self, force: bool) -> Result<AdjustmentOutcome, EngineError> {
        self.request(|response_tx| ServiceCommand::Adjust { force, response_tx })
            .await
    }

    /// See [`ThresholdManager::check_thresholds`].
    pub async fn check(&self) -> Result<CheckResult, EngineError> {
        self.request(|response_tx| ServiceCommand::Check { response_tx })
            .await
    }

    /// See [`ThresholdManager::status`].
    pub async fn status(&self) -> Result<StatusSnapshot, EngineError> {
        self.request(|response_tx| ServiceCommand::Status { response_tx })
            .await
    }

    /// See [`ThresholdManager::current_thresholds`].
    pub async fn thresholds(&self) -> Result<ThresholdTable, EngineError> {
        self.request(|response_tx| ServiceCommand::Thresholds { response_tx })
            .await
    }

    /// See [`ThresholdManager::set_threshold`].
    pub async fn set_threshold(
        &self,
        metric: impl Into<String>,
        warning: f64,
        critical: f64,
    ) -> Result<Threshold, EngineError> {
        let metric = metric.into();
        self.request(|response_tx| ServiceCommand::SetThreshold {
            metric,
            warning,
            critical,
            response_tx,
        })
        .await
    }

    /// See [`ThresholdManager::config`].
    pub async fn config(&self) -> Result<ThresholdConfig, EngineError> {
        self.request(|response_tx| ServiceCommand::Config { response_tx })
            .await
    }

    /// See [`ThresholdManager::update_config`].
    pub async fn update_config(&self, update: ConfigUpdate) -> Result<ThresholdConfig, EngineError> {
        self.request(|response_tx| ServiceCommand::UpdateConfig {
            update,
            response_tx,
        })
        .await
    }

    /// See [`ThresholdManager::adjustment_history`].
    pub async fn history(&self, limit: Option<usize>) -> Result<Vec<AdjustmentRecord>, EngineError> {
        self.request(|response_tx| ServiceCommand::History { limit, response_tx })
            .await
    }

    /// Latest scheduler status.
    #[must_use]
    pub fn service_status(&self) -> ServiceStatus {
        self.status_rx.borrow().clone()
    }

    /// Subscribe to scheduler status updates.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ServiceStatus> {
        self.status_rx.clone()
    }

    /// Create a handle that is not connected to any service.
    ///
    /// Every request fails with [`EngineError::ServiceUnavailable`].
    #[must_use]
    pub fn for_testing() -> Self {
        let (command_tx, _command_rx) = mpsc::channel(1);
        let (status_tx, status_rx) = watch::channel(ServiceStatus::default());
        drop(status_tx);
        Self {
            command_tx,
            status_rx,
        }
    }
}

/// The threshold service.
///
/// Runs as a background task and serializes all engine calls.
pub struct ThresholdService {
    manager: ThresholdManager,
    interval: Duration,
    command_rx: mpsc::Receiver<ServiceCommand>,
    status_tx: watch::Sender<ServiceStatus>,
    status: ServiceStatus,
}

impl ThresholdService {
    /// Create a service and its handle.
    ///
    /// `interval` is the time between scheduled collection cycles.
    #[must_use]
    pub fn new(manager: ThresholdManager, interval: Duration) -> (Self, ServiceHandle) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let status = ServiceStatus {
            running: true,
            ..ServiceStatus::default()
        };
        let (status_tx, status_rx) = watch::channel(status.clone());

        let service = Self {
            manager,
            interval,
            command_rx,
            status_tx,
            status,
        };
        let handle = ServiceHandle {
            command_tx,
            status_rx,
        };
        (service, handle)
    }

    /// Run the service loop until shutdown is signalled or every handle is
    /// dropped.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        // tokio panics on a zero period
        let mut interval = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // Skip the first immediate tick
        interval.tick().await;

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Threshold service started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_cycle().await;
                }
                command = self.command_rx.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            tracing::info!("All service handles dropped");
                            break;
                        }
                    }
                }
                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        tracing::info!("Threshold service shutting down");
                        break;
                    }
                }
            }
        }

        self.status.running = false;
        self.update_status();
    }

    /// One scheduled cycle: collect, check, and maybe adjust.
    async fn run_cycle(&mut self) {
        self.status.total_cycles += 1;
        self.status.last_cycle_at = Some(Utc::now());

        match self.cycle().await {
            Ok(level) => {
                self.status.successful_cycles += 1;
                self.status.last_check_status = Some(level);
                self.status.last_error = None;
            }
            Err(e) => {
                self.status.failed_cycles += 1;
                self.status.last_error = Some(e.to_string());
                tracing::error!(error = %e, "Threshold cycle failed");
            }
        }

        self.update_status();
    }

    async fn cycle(&self) -> Result<AlertLevel, EngineError> {
        let sample = self.manager.collect_current_metrics().await?;
        let check = self.manager.check_thresholds(Some(sample)).await?;

        if self.manager.config().await?.auto_adjustment_enabled {
            match self.manager.adjust_thresholds(None, false).await? {
                AdjustmentOutcome::Completed(record) => tracing::debug!(
                    applied = record.applied_adjustments.len(),
                    "Scheduled adjustment finished"
                ),
                AdjustmentOutcome::InsufficientData {
                    current_samples,
                    required,
                } => tracing::debug!(current_samples, required, "Scheduled adjustment skipped"),
            }
        }

        tracing::info!(
            status = %check.status,
            warnings = check.warning_count,
            critical = check.critical_count,
            "Threshold cycle completed"
        );
        Ok(check.status)
    }

    async fn handle_command(&self, command: ServiceCommand) {
        let manager = &self.manager;
        // A dropped receiver just means the caller stopped waiting.
        match command {
            ServiceCommand::Collect { response_tx } => {
                let _ = response_tx.send(manager.collect_current_metrics().await);
            }
            ServiceCommand::Analyze { response_tx } => {
                let _ = response_tx.send(manager.analyze_patterns().await);
            }
            ServiceCommand::Adjust { force, response_tx } => {
                let _ = response_tx.send(manager.adjust_thresholds(None, force).await);
            }
            ServiceCommand::Check { response_tx } => {
                let _ = response_tx.send(manager.check_thresholds(None).await);
            }
            ServiceCommand::Status { response_tx } => {
                let _ = response_tx.send(manager.status().await);
            }
            ServiceCommand::Thresholds { response_tx } => {
                let _ = response_tx.send(manager.current_thresholds().await);
            }
            ServiceCommand::SetThreshold {
                metric,
                warning,
                critical,
                response_tx,
            } => {
                let _ = response_tx.send(manager.set_threshold(&metric, warning, critical).await);
            }
            ServiceCommand::Config { response_tx } => {
                let _ = response_tx.send(manager.config().await);
            }
            ServiceCommand::UpdateConfig {
                update,
                response_tx,
            } => {
                let _ = response_tx.send(manager.update_config(&update).await);
            }
            ServiceCommand::History { limit, response_tx } => {
                let _ = response_tx.send(manager.adjustment_history(limit).await);
            }
        }
    }

    fn update_status(&self) {
        let _ = self.status_tx.send(self.status.clone());
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
    use crate::metrics::{NullSystemProvider, RequestEvent, RuntimeCounters};
    use crate::storage::MemoryStore;
    use crate::thresholds::{MetricCollector, MetricName};
    use crate::traits::RealTimeProvider;
    use static_assertions::assert_impl_all;
    use std::sync::Arc;

    assert_impl_all!(ServiceHandle: Send, Sync, Clone);

    fn manager(counters: Arc<RuntimeCounters>) -> ThresholdManager {
        let clock = Arc::new(RealTimeProvider);
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let collector = MetricCollector::new(Arc::new(NullSystemProvider), Some(counters));
        ThresholdManager::new(store, collector, clock)
    }

    fn spawn(
        manager: ThresholdManager,
        interval: Duration,
    ) -> (ServiceHandle, watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        let (service, handle) = ThresholdService::new(manager, interval);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(service.run(shutdown_rx));
        (handle, shutdown_tx, join)
    }

    #[tokio::test]
    async fn test_handle_round_trip() {
        let counters = Arc::new(RuntimeCounters::new());
        counters.record_request(RequestEvent::new(120.0, true));
        let (handle, shutdown_tx, join) = spawn(manager(counters), Duration::from_secs(3600));

        let sample = handle.collect().await.unwrap();
        assert_eq!(sample.value(MetricName::ResponseTime), Some(120.0));

        let table = handle.thresholds().await.unwrap();
        assert_eq!(table, ThresholdTable::defaults());

        let updated = handle.set_threshold("queue_length", 50.0, 200.0).await.unwrap();
        assert_eq!(updated.warning_value, 50.0);

        let config = handle
            .update_config(ConfigUpdate::from_pairs([("learning_window_days", "7")]).unwrap())
            .await
            .unwrap();
        assert_eq!(config.learning_window_days, 7);
        assert_eq!(handle.config().await.unwrap().learning_window_days, 7);

        let analysis = handle.analyze().await.unwrap();
        assert!(matches!(analysis, AnalysisResult::InsufficientData { .. }));
        assert!(handle.history(None).await.unwrap().is_empty());

        shutdown_tx.send(true).unwrap();
        join.await.unwrap();
        assert!(!handle.service_status().running);
        assert!(matches!(
            handle.check().await,
            Err(EngineError::ServiceUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_scheduled_cycle_collects() {
        let counters = Arc::new(RuntimeCounters::new());
        let (handle, shutdown_tx, join) = spawn(manager(counters), Duration::from_millis(20));

        let mut status_rx = handle.subscribe();
        while status_rx.borrow_and_update().total_cycles == 0 {
            status_rx.changed().await.unwrap();
        }

        let status = handle.service_status();
        assert_eq!(status.successful_cycles, status.total_cycles);
        assert_eq!(status.last_check_status, Some(AlertLevel::Ok));
        assert!(handle.status().await.unwrap().history_samples >= 1);

        shutdown_tx.send(true).unwrap();
        join.await.unwrap();
    }

    #[tokio::test]
    async fn test_for_testing_handle_is_unavailable() {
        let handle = ServiceHandle::for_testing();
        assert!(matches!(
            handle.thresholds().await,
            Err(EngineError::ServiceUnavailable { .. })
        ));
        assert!(!handle.service_status().running);
    }
}
