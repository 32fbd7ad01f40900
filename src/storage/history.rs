//! Rolling sample history and the adjustment audit log.

#![allow(clippy::missing_errors_doc)]

use std::sync::Arc;

use chrono::Duration;

use super::{
    get_json, set_json, ADJUSTMENTS_KEY, AUDIT_RETENTION_DAYS, AUDIT_TTL, HISTORY_KEY,
    HISTORY_RETENTION_DAYS, STATE_TTL,
};
use crate::error::StorageError;
use crate::thresholds::{AdjustmentRecord, MetricSample};
use crate::traits::{KeyValueStore, TimeProvider};

/// Append-only views over the sample history and the audit log.
///
/// Each append loads the whole list, drops entries past retention, and
/// writes it back. Both lists are kept oldest first.
#[derive(Clone)]
pub struct HistoryStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn TimeProvider>,
}

impl std::fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryStore").finish_non_exhaustive()
    }
}

impl HistoryStore {
    /// Create a history view over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn TimeProvider>) -> Self {
        Self { store, clock }
    }

    /// Every retained sample, oldest first.
    pub async fn all_samples(&self) -> Result<Vec<MetricSample>, StorageError> {
        Ok(get_json(self.store.as_ref(), HISTORY_KEY)
            .await?
            .unwrap_or_default())
    }

    /// Append a sample and drop everything at or past the retention cutoff.
    pub async fn append_sample(&self, sample: MetricSample) -> Result<(), StorageError> {
        let cutoff = self.clock.now() - Duration::days(HISTORY_RETENTION_DAYS);
        let mut samples = self.all_samples().await?;
        let before = samples.len();

        samples.push(sample);
        samples.retain(|s| s.timestamp > cutoff);
        samples.sort_by_key(|s| s.timestamp);

        let dropped = (before + 1).saturating_sub(samples.len());
        if dropped > 0 {
            tracing::debug!(dropped, retained = samples.len(), "Trimmed sample history");
        }

        set_json(self.store.as_ref(), HISTORY_KEY, &samples, Some(STATE_TTL)).await
    }

    /// Samples from the last `window_days` days, oldest first.
    pub async fn get_samples(&self, window_days: u32) -> Result<Vec<MetricSample>, StorageError> {
        let now = self.clock.now();
        let since = now - Duration::days(i64::from(window_days));
        let mut samples = self.all_samples().await?;
        samples.retain(|s| s.timestamp >= since && s.timestamp <= now);
        Ok(samples)
    }

    /// Number of retained samples.
    pub async fn sample_count(&self) -> Result<usize, StorageError> {
        Ok(self.all_samples().await?.len())
    }

    /// Append an audit record and drop records older than the audit retention.
    pub async fn append_adjustment(&self, record: AdjustmentRecord) -> Result<(), StorageError> {
        let cutoff = self.clock.now() - Duration::days(AUDIT_RETENTION_DAYS);
        let mut records = self.all_adjustments().await?;

        records.push(record);
        records.retain(|r| r.timestamp > cutoff);

        set_json(self.store.as_ref(), ADJUSTMENTS_KEY, &records, Some(AUDIT_TTL)).await
    }

    /// Audit records, most recent first, capped at `limit` when given.
    pub async fn adjustments(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<AdjustmentRecord>, StorageError> {
        let mut records = self.all_adjustments().await?;
        records.reverse();
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    /// Number of retained audit records.
    pub async fn adjustment_count(&self) -> Result<usize, StorageError> {
        Ok(self.all_adjustments().await?.len())
    }

    async fn all_adjustments(&self) -> Result<Vec<AdjustmentRecord>, StorageError> {
        Ok(get_json(self.store.as_ref(), ADJUSTMENTS_KEY)
            .await?
            .unwrap_or_default())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::float_cmp,
    clippy::cast_precision_loss
)]
mod tests {
    use super::*;
    use crate::config::ThresholdConfig;
    use crate::storage::MemoryStore;
    use crate::thresholds::{MetricName, PatternAnalysis};
    use crate::traits::{ManualTimeProvider, MockKeyValueStore};
    use chrono::{DateTime, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
    }

    fn fixture() -> (HistoryStore, Arc<ManualTimeProvider>) {
        let clock = Arc::new(ManualTimeProvider::new(start()));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        (HistoryStore::new(store, clock.clone()), clock)
    }

    fn sample_at(timestamp: DateTime<Utc>, cpu: f64) -> MetricSample {
        MetricSample::new(timestamp).with_value(MetricName::CpuUsage, Some(cpu))
    }

    fn record_at(timestamp: DateTime<Utc>) -> AdjustmentRecord {
        AdjustmentRecord {
            id: Uuid::new_v4(),
            timestamp,
            analysis: PatternAnalysis {
                timestamp,
                window_days: ThresholdConfig::default().learning_window_days,
                sample_count: 0,
                metrics: BTreeMap::new(),
                anomalies: Vec::new(),
                confidence: 0.0,
            },
            proposed_adjustments: Vec::new(),
            applied_adjustments: Vec::new(),
            confidence: 0.0,
            confidence_threshold: 0.7,
            auto_applied: false,
        }
    }

    #[tokio::test]
    async fn test_empty_history() {
        let (history, _) = fixture();
        assert!(history.get_samples(7).await.unwrap().is_empty());
        assert_eq!(history.sample_count().await.unwrap(), 0);
        assert!(history.adjustments(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_drops_samples_past_retention() {
        let (history, clock) = fixture();

        history.append_sample(sample_at(start(), 1.0)).await.unwrap();
        clock.advance(Duration::days(10));
        history
            .append_sample(sample_at(clock.now(), 2.0))
            .await
            .unwrap();

        // Exactly 30 days after the first sample: the boundary is exclusive.
        clock.set(start() + Duration::days(30));
        history
            .append_sample(sample_at(clock.now(), 3.0))
            .await
            .unwrap();

        let samples = history.all_samples().await.unwrap();
        let values: Vec<f64> = samples
            .iter()
            .filter_map(|s| s.value(MetricName::CpuUsage))
            .collect();
        assert_eq!(values, vec![2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_get_samples_filters_window() {
        let (history, clock) = fixture();
        for day in 0..10 {
            clock.set(start() + Duration::days(day));
            history
                .append_sample(sample_at(clock.now(), day as f64))
                .await
                .unwrap();
        }

        let recent = history.get_samples(3).await.unwrap();
        let values: Vec<f64> = recent
            .iter()
            .filter_map(|s| s.value(MetricName::CpuUsage))
            .collect();
        assert_eq!(values, vec![6.0, 7.0, 8.0, 9.0]);
        assert!(recent.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn test_adjustments_most_recent_first_with_limit() {
        let (history, clock) = fixture();
        let mut ids = Vec::new();
        for hour in 0..4 {
            clock.set(start() + Duration::hours(hour));
            let record = record_at(clock.now());
            ids.push(record.id);
            history.append_adjustment(record).await.unwrap();
        }

        let all = history.adjustments(None).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].id, ids[3]);
        assert_eq!(all[3].id, ids[0]);

        let two = history.adjustments(Some(2)).await.unwrap();
        assert_eq!(two.iter().map(|r| r.id).collect::<Vec<_>>(), vec![ids[3], ids[2]]);
    }

    #[tokio::test]
    async fn test_audit_retention_is_ninety_days() {
        let (history, clock) = fixture();
        history.append_adjustment(record_at(start())).await.unwrap();

        clock.set(start() + Duration::days(89));
        history
            .append_adjustment(record_at(clock.now()))
            .await
            .unwrap();
        assert_eq!(history.adjustment_count().await.unwrap(), 2);

        clock.set(start() + Duration::days(91));
        history
            .append_adjustment(record_at(clock.now()))
            .await
            .unwrap();
        assert_eq!(history.adjustment_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_store_error_propagates() {
        let mut store = MockKeyValueStore::new();
        store.expect_get().returning(|_| {
            Err(StorageError::Unavailable {
                message: "down".into(),
            })
        });
        let clock = Arc::new(ManualTimeProvider::new(start()));
        let history = HistoryStore::new(Arc::new(store), clock);

        let result = history.append_sample(sample_at(start(), 1.0)).await;
        assert!(matches!(result, Err(StorageError::Unavailable { .. })));
    }
}
