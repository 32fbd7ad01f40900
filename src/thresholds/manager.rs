//! The threshold engine facade.
//!
//! [`ThresholdManager`] threads the store, metric sources, and clock through
//! every engine operation. It holds no mutable state of its own; everything
//! lives in the key-value store. Run it inside a
//! [`ThresholdService`](super::ThresholdService) when several callers share
//! one store, so read-modify-write sequences do not interleave.

use std::collections::BTreeMap;
use std::sync::Arc;

use uuid::Uuid;

use super::adjuster::{apply_proposals, plan_adjustments, should_auto_apply};
use super::analyzer::{analyze_history, metric_values};
use super::checker::check_sample;
use super::collector::MetricCollector;
use super::types::{
    AdjustmentOutcome, AdjustmentRecord, AnalysisResult, CheckResult, MetricName, MetricSample,
    PatternAnalysis, StatusSnapshot, Threshold, ThresholdTable,
};
use crate::config::{ConfigUpdate, ThresholdConfig};
use crate::error::EngineError;
use crate::storage::{HistoryStore, StateStore};
use crate::traits::{KeyValueStore, TimeProvider};

/// Adaptive threshold engine.
#[derive(Clone)]
pub struct ThresholdManager {
    collector: MetricCollector,
    history: HistoryStore,
    state: StateStore,
    clock: Arc<dyn TimeProvider>,
}

impl std::fmt::Debug for ThresholdManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThresholdManager")
            .field("collector", &self.collector)
            .finish_non_exhaustive()
    }
}

impl ThresholdManager {
    /// Create an engine over `store`.
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        collector: MetricCollector,
        clock: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            collector,
            history: HistoryStore::new(store.clone(), clock.clone()),
            state: StateStore::new(store),
            clock,
        }
    }

    /// Sample every metric and append the sample to history.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::StoreUnavailable`] if the history cannot be
    /// written. Per-metric source failures are not errors.
    pub async fn collect_current_metrics(&self) -> Result<MetricSample, EngineError> {
        let sample = self.collector.sample(self.clock.now()).await;
        self.history.append_sample(sample.clone()).await?;
        Ok(sample)
    }

    /// Analyze the learning window.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::StoreUnavailable`] if history, thresholds, or
    /// config cannot be read.
    pub async fn analyze_patterns(&self) -> Result<AnalysisResult, EngineError> {
        let config = self.state.config().await?;
        let samples = self.history.get_samples(config.learning_window_days).await?;
        let thresholds = self.state.thresholds().await?;

        let result = analyze_history(&samples, &thresholds, &config, self.clock.now());
        match &result {
            AnalysisResult::Complete(analysis) => tracing::info!(
                samples = analysis.sample_count,
                confidence = analysis.confidence,
                anomalies = analysis.anomalies.len(),
                "Pattern analysis complete"
            ),
            AnalysisResult::InsufficientData {
                current_samples,
                required,
            } => tracing::info!(
                current_samples,
                required,
                "Not enough history to analyze"
            ),
        }
        Ok(result)
    }

    /// Propose and, when confident enough, apply threshold changes.
    ///
    /// Runs a fresh analysis when `analysis` is `None`. A forced run ignores
    /// the per-metric rate limit. Every completed run is recorded in the
    /// audit log, whether or not anything was applied.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::StoreUnavailable`] if state cannot be read or
    /// written.
    pub async fn adjust_thresholds(
        &self,
        analysis: Option<PatternAnalysis>,
        force: bool,
    ) -> Result<AdjustmentOutcome, EngineError> {
        let analysis = match analysis {
            Some(analysis) => analysis,
            None => match self.analyze_patterns().await? {
                AnalysisResult::Complete(analysis) => analysis,
                AnalysisResult::InsufficientData {
                    current_samples,
                    required,
                } => {
                    return Ok(AdjustmentOutcome::InsufficientData {
                        current_samples,
                        required,
                    })
                }
            },
        };

        let now = self.clock.now();
        let config = self.state.config().await?;
        let mut thresholds = self.state.thresholds().await?;
        let mut adjusted_at = self.state.last_adjustment_times().await?;

        let proposed = plan_adjustments(&analysis, &thresholds, &adjusted_at, &config, now, force);
        let confident = should_auto_apply(analysis.confidence, &config);

        let applied = if confident && !proposed.is_empty() {
            apply_proposals(&mut thresholds, &mut adjusted_at, &proposed, now);
            self.state.save_thresholds(&thresholds).await?;
            self.state.save_adjustment_times(&adjusted_at).await?;
            for adjustment in &proposed {
                tracing::info!(
                    metric = %adjustment.metric,
                    old_warning = adjustment.old_warning,
                    new_warning = adjustment.new_warning,
                    old_critical = adjustment.old_critical,
                    new_critical = adjustment.new_critical,
                    "Threshold adjusted"
                );
            }
            proposed.clone()
        } else {
            Vec::new()
        };

        let record = AdjustmentRecord {
            id: Uuid::new_v4(),
            timestamp: now,
            confidence: analysis.confidence,
            confidence_threshold: config.confidence_threshold,
            analysis,
            proposed_adjustments: proposed,
            auto_applied: !applied.is_empty(),
            applied_adjustments: applied,
        };
        self.history.append_adjustment(record.clone()).await?;

        tracing::info!(
            id = %record.id,
            proposed = record.proposed_adjustments.len(),
            applied = record.applied_adjustments.len(),
            confidence = record.confidence,
            force,
            "Adjustment run recorded"
        );
        Ok(AdjustmentOutcome::Completed(record))
    }

    /// Classify a sample against the current thresholds.
    ///
    /// Collects (and records) a fresh sample when `sample` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::StoreUnavailable`] if collection or the
    /// threshold read fails.
    pub async fn check_thresholds(
        &self,
        sample: Option<MetricSample>,
    ) -> Result<CheckResult, EngineError> {
        let sample = match sample {
            Some(sample) => sample,
            None => self.collect_current_metrics().await?,
        };
        let thresholds = self.state.thresholds().await?;
        let result = check_sample(&sample, &thresholds);

        for alert in &result.alerts {
            tracing::warn!(
                metric = %alert.metric,
                level = %alert.level,
                value = alert.value,
                threshold = alert.threshold,
                "{}",
                alert.message
            );
        }
        Ok(result)
    }

    /// The threshold table in force.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::StoreUnavailable`] if the store cannot be read.
    pub async fn current_thresholds(&self) -> Result<ThresholdTable, EngineError> {
        Ok(self.state.thresholds().await?)
    }

    /// Manually override one metric's threshold.
    ///
    /// Bypasses analysis and the rate limit. Other fields of the threshold
    /// (unit, adaptive, inverted) are kept.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownMetric`] for a name outside the fixed
    /// set, [`EngineError::InvalidThreshold`] for a non-finite or misordered
    /// pair, or [`EngineError::StoreUnavailable`] if the store fails.
    pub async fn set_threshold(
        &self,
        metric: &str,
        warning: f64,
        critical: f64,
    ) -> Result<Threshold, EngineError> {
        let metric: MetricName = metric.parse()?;
        let mut thresholds = self.state.thresholds().await?;
        let Some(current) = thresholds.get(metric).copied() else {
            return Err(EngineError::UnknownMetric {
                name: metric.to_string(),
            });
        };

        let updated = Threshold {
            warning_value: warning,
            critical_value: critical,
            ..current
        };
        updated
            .validate()
            .map_err(|reason| EngineError::InvalidThreshold {
                metric: metric.to_string(),
                reason,
            })?;

        thresholds.insert(metric, updated);
        self.state.save_thresholds(&thresholds).await?;

        tracing::info!(
            metric = %metric,
            old_warning = current.warning_value,
            new_warning = warning,
            old_critical = current.critical_value,
            new_critical = critical,
            "Threshold manually updated"
        );
        Ok(updated)
    }

    /// The effective engine config.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::StoreUnavailable`] if the store cannot be read.
    pub async fn config(&self) -> Result<ThresholdConfig, EngineError> {
        Ok(self.state.config().await?)
    }

    /// Merge `update` onto the current config, validate, and persist it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] if the merged config is invalid,
    /// or [`EngineError::StoreUnavailable`] if the store fails.
    pub async fn update_config(&self, update: &ConfigUpdate) -> Result<ThresholdConfig, EngineError> {
        let current = self.state.config().await?;
        let updated = current.apply(update)?;
        self.state.save_config(&updated).await?;
        tracing::info!(?update, "Engine config updated");
        Ok(updated)
    }

    /// Audit records, most recent first.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::StoreUnavailable`] if the store cannot be read.
    pub async fn adjustment_history(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<AdjustmentRecord>, EngineError> {
        Ok(self.history.adjustments(limit).await?)
    }

    /// Point-in-time view of the engine.
    ///
    /// Collects and checks a fresh sample. A failed collection is reported
    /// in the snapshot instead of failing the call.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::StoreUnavailable`] if config or history cannot
    /// be read.
    pub async fn status(&self) -> Result<StatusSnapshot, EngineError> {
        let (current_metrics, threshold_check, collection_error) =
            match self.collect_current_metrics().await {
                Ok(sample) => {
                    let check = self.check_thresholds(Some(sample.clone())).await?;
                    (Some(sample), Some(check), None)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Status collection failed");
                    (None, None, Some(e.to_string()))
                }
            };

        let config = self.state.config().await?;
        let samples = self.history.all_samples().await?;
        let latest = self.history.adjustments(Some(1)).await?;
        let total_adjustments = self.history.adjustment_count().await?;

        let samples_per_metric: BTreeMap<MetricName, usize> = MetricName::ALL
            .into_iter()
            .map(|metric| (metric, metric_values(&samples, metric).len()))
            .collect();

        Ok(StatusSnapshot {
            timestamp: self.clock.now(),
            current_metrics,
            threshold_check,
            collection_error,
            auto_adjustment_enabled: config.auto_adjustment_enabled,
            config,
            last_adjustment: latest.first().map(|r| r.timestamp),
            total_adjustments,
            history_samples: samples.len(),
            samples_per_metric,
        })
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
    use crate::metrics::NullSystemProvider;
    use crate::storage::MemoryStore;
    use crate::test_utils::{fixed_now as start, mock_app_source, unreachable_store, AppReadings};
    use crate::thresholds::AlertLevel;
    use crate::traits::{ManualTimeProvider, MockApplicationMetricsSource};
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn app_reporting(response_time: f64) -> MockApplicationMetricsSource {
        mock_app_source(AppReadings {
            response_time: Some(response_time),
            ..AppReadings::default()
        })
    }

    fn manager_with(
        app: MockApplicationMetricsSource,
    ) -> (ThresholdManager, Arc<ManualTimeProvider>) {
        let clock = Arc::new(ManualTimeProvider::new(start()));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let collector = MetricCollector::new(Arc::new(NullSystemProvider), Some(Arc::new(app)));
        (ThresholdManager::new(store, collector, clock.clone()), clock)
    }

    async fn collect_n(manager: &ThresholdManager, clock: &ManualTimeProvider, n: usize) {
        for _ in 0..n {
            manager.collect_current_metrics().await.unwrap();
            clock.advance(Duration::minutes(5));
        }
    }

    fn completed(outcome: AdjustmentOutcome) -> AdjustmentRecord {
        match outcome {
            AdjustmentOutcome::Completed(record) => record,
            other => panic!("expected a completed run, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cold_start_is_insufficient_data() {
        let (manager, _) = manager_with(app_reporting(100.0));

        let analysis = manager.analyze_patterns().await.unwrap();
        assert_eq!(
            analysis,
            AnalysisResult::InsufficientData {
                current_samples: 0,
                required: 50
            }
        );

        let outcome = manager.adjust_thresholds(None, false).await.unwrap();
        assert!(matches!(outcome, AdjustmentOutcome::InsufficientData { .. }));
        assert_eq!(
            manager.current_thresholds().await.unwrap(),
            ThresholdTable::defaults()
        );
        assert!(manager.adjustment_history(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_low_confidence_proposes_without_applying() {
        let (manager, clock) = manager_with(app_reporting(100.0));
        collect_n(&manager, &clock, 50).await;

        let record = completed(manager.adjust_thresholds(None, false).await.unwrap());
        assert_eq!(record.confidence, 0.5);
        assert!(!record.auto_applied);
        assert_eq!(record.proposed_adjustments.len(), 1);
        assert!(record.applied_adjustments.is_empty());
        assert_eq!(
            manager.current_thresholds().await.unwrap(),
            ThresholdTable::defaults()
        );
        assert_eq!(manager.adjustment_history(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_confident_run_applies_then_rate_limits() {
        let (manager, clock) = manager_with(app_reporting(100.0));
        collect_n(&manager, &clock, 100).await;

        let first = completed(manager.adjust_thresholds(None, false).await.unwrap());
        assert!(first.auto_applied);
        assert_eq!(first.applied_adjustments.len(), 1);
        let rt = manager
            .current_thresholds()
            .await
            .unwrap()
            .get(MetricName::ResponseTime)
            .copied()
            .unwrap();
        assert!((rt.warning_value - 350.0).abs() < 1e-9);
        assert!((rt.critical_value - 700.0).abs() < 1e-9);

        let second = completed(manager.adjust_thresholds(None, false).await.unwrap());
        assert!(second.proposed_adjustments.is_empty());
        assert!(second.applied_adjustments.is_empty());
        assert!(!second.auto_applied);
        assert_eq!(second.confidence, 1.0);

        let forced = completed(manager.adjust_thresholds(None, true).await.unwrap());
        assert_eq!(forced.applied_adjustments.len(), 1);
        let rt = manager
            .current_thresholds()
            .await
            .unwrap()
            .get(MetricName::ResponseTime)
            .copied()
            .unwrap();
        assert!((rt.warning_value - 245.0).abs() < 1e-9);

        assert_eq!(manager.adjustment_history(Some(2)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_expires() {
        let (manager, clock) = manager_with(app_reporting(100.0));
        collect_n(&manager, &clock, 100).await;
        completed(manager.adjust_thresholds(None, false).await.unwrap());

        clock.advance(Duration::hours(6));
        let later = completed(manager.adjust_thresholds(None, false).await.unwrap());
        assert_eq!(later.applied_adjustments.len(), 1);
    }

    #[tokio::test]
    async fn test_auto_adjustment_disabled_only_proposes() {
        let (manager, clock) = manager_with(app_reporting(100.0));
        manager
            .update_config(&ConfigUpdate::from_pairs([("auto_adjustment_enabled", "false")]).unwrap())
            .await
            .unwrap();
        collect_n(&manager, &clock, 100).await;

        let record = completed(manager.adjust_thresholds(None, false).await.unwrap());
        assert_eq!(record.confidence, 1.0);
        assert!(!record.auto_applied);
        assert_eq!(record.proposed_adjustments.len(), 1);
        assert!(record.applied_adjustments.is_empty());
    }

    #[tokio::test]
    async fn test_check_thresholds_collects_when_no_sample() {
        let (manager, _) = manager_with(app_reporting(800.0));
        let result = manager.check_thresholds(None).await.unwrap();
        assert_eq!(result.status, AlertLevel::Warning);
        assert_eq!(result.metrics_checked, 1);

        let status = manager.status().await.unwrap();
        assert_eq!(status.history_samples, 2);
        assert_eq!(status.samples_per_metric[&MetricName::ResponseTime], 2);
        assert_eq!(status.samples_per_metric[&MetricName::CpuUsage], 0);
    }

    #[tokio::test]
    async fn test_set_threshold_validation() {
        let (manager, _) = manager_with(app_reporting(1.0));

        let err = manager.set_threshold("latency", 1.0, 2.0).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownMetric { .. }));

        let err = manager
            .set_threshold("cache_hit_rate", 60.0, 80.0)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidThreshold { .. }));

        let err = manager
            .set_threshold("cpu_usage", f64::NAN, 80.0)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidThreshold { .. }));

        let updated = manager.set_threshold("cpu_usage", 60.0, 75.0).await.unwrap();
        assert_eq!(updated.warning_value, 60.0);
        assert!(updated.adaptive);
        assert_eq!(
            manager
                .current_thresholds()
                .await
                .unwrap()
                .get(MetricName::CpuUsage),
            Some(&updated)
        );
    }

    #[tokio::test]
    async fn test_update_config_rejects_invalid() {
        let (manager, _) = manager_with(app_reporting(1.0));
        let update = ConfigUpdate::from_pairs([("max_threshold_change", "1.5")]).unwrap();
        let err = manager.update_config(&update).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
        assert_eq!(manager.config().await.unwrap(), ThresholdConfig::default());
    }

    #[tokio::test]
    async fn test_store_unavailable_on_collect() {
        let store = unreachable_store("refused");

        let clock = Arc::new(ManualTimeProvider::new(start()));
        let collector = MetricCollector::new(Arc::new(NullSystemProvider), None);
        let manager = ThresholdManager::new(Arc::new(store), collector, clock);

        let err = manager.collect_current_metrics().await.unwrap_err();
        assert!(matches!(err, EngineError::StoreUnavailable(_)));
        assert!(matches!(
            manager.status().await,
            Err(EngineError::StoreUnavailable(_))
        ));
    }
}
