//! Thresholds, engine config, and the rate-limit clock.

#![allow(clippy::missing_errors_doc)]

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{get_json, set_json, CONFIG_KEY, LAST_ADJUSTMENT_KEY, STATE_TTL, THRESHOLDS_KEY};
use crate::config::ThresholdConfig;
use crate::error::StorageError;
use crate::thresholds::{AdjustmentClock, MetricName, ThresholdTable};
use crate::traits::KeyValueStore;

/// Typed access to the engine's mutable state documents.
#[derive(Clone)]
pub struct StateStore {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore").finish_non_exhaustive()
    }
}

impl StateStore {
    /// Create a state view over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Current thresholds.
    ///
    /// The default table is written on first use. Metrics missing from a
    /// stored table are filled from the defaults.
    pub async fn thresholds(&self) -> Result<ThresholdTable, StorageError> {
        match get_json::<ThresholdTable>(self.store.as_ref(), THRESHOLDS_KEY).await? {
            Some(table) => Ok(table.with_defaults_filled()),
            None => {
                let table = ThresholdTable::defaults();
                tracing::info!("Initializing default thresholds");
                self.save_thresholds(&table).await?;
                Ok(table)
            }
        }
    }

    /// Persist the threshold table.
    pub async fn save_thresholds(&self, table: &ThresholdTable) -> Result<(), StorageError> {
        set_json(self.store.as_ref(), THRESHOLDS_KEY, table, Some(STATE_TTL)).await
    }

    /// Effective engine config.
    ///
    /// Stored fields override the defaults. A stored config that fails
    /// validation is ignored with a warning.
    pub async fn config(&self) -> Result<ThresholdConfig, StorageError> {
        let stored = match get_json::<ThresholdConfig>(self.store.as_ref(), CONFIG_KEY).await {
            Ok(stored) => stored,
            Err(StorageError::Serialization { message, .. }) => {
                tracing::warn!(error = %message, "Stored config is malformed, using defaults");
                None
            }
            Err(e) => return Err(e),
        };

        let Some(config) = stored else {
            return Ok(ThresholdConfig::default());
        };
        match config.validate() {
            Ok(()) => Ok(config),
            Err(e) => {
                tracing::warn!(error = %e, "Stored config is invalid, using defaults");
                Ok(ThresholdConfig::default())
            }
        }
    }

    /// Persist the engine config.
    pub async fn save_config(&self, config: &ThresholdConfig) -> Result<(), StorageError> {
        set_json(self.store.as_ref(), CONFIG_KEY, config, Some(STATE_TTL)).await
    }

    /// Per-metric time of the last applied adjustment.
    pub async fn last_adjustment_times(&self) -> Result<AdjustmentClock, StorageError> {
        Ok(get_json(self.store.as_ref(), LAST_ADJUSTMENT_KEY)
            .await?
            .unwrap_or_default())
    }

    /// Persist the whole rate-limit clock.
    pub async fn save_adjustment_times(&self, clock: &AdjustmentClock) -> Result<(), StorageError> {
        set_json(self.store.as_ref(), LAST_ADJUSTMENT_KEY, clock, Some(STATE_TTL)).await
    }

    /// Stamp one metric as adjusted at `at`.
    pub async fn record_adjustment_time(
        &self,
        metric: MetricName,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut clock = self.last_adjustment_times().await?;
        clock.record(metric, at);
        self.save_adjustment_times(&clock).await
    }
}
