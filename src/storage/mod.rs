//! Storage backends and typed views over them.
//!
//! This module provides:
//! - [`MemoryStore`]: TTL-aware in-process store
//! - [`SqliteStore`]: durable `SQLite` store
//! - [`HistoryStore`]: rolling sample history and adjustment audit log
//! - [`StateStore`]: thresholds, engine config, and the rate-limit clock
//!
//! # Architecture
//!
//! Both backends implement [`KeyValueStore`](crate::traits::KeyValueStore)
//! and hold JSON documents under fixed keys. The typed views load a whole
//! document, change it, and write it back; the threshold service runs them
//! one at a time so no update is lost.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use perf_thresholds::storage::{HistoryStore, MemoryStore};
//! use perf_thresholds::thresholds::{MetricName, MetricSample};
//! use perf_thresholds::traits::{RealTimeProvider, TimeProvider};
//!
//! # tokio_test::block_on(async {
//! let clock = Arc::new(RealTimeProvider);
//! let store = Arc::new(MemoryStore::new(clock.clone()));
//! let history = HistoryStore::new(store, clock.clone());
//!
//! let sample = MetricSample::new(clock.now()).with_value(MetricName::CpuUsage, Some(12.5));
//! history.append_sample(sample).await.unwrap();
//! assert_eq!(history.get_samples(1).await.unwrap().len(), 1);
//! # });
//! ```

mod history;
mod memory;
mod sqlite;
mod state;

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StorageError;
use crate::traits::KeyValueStore;

pub use history::HistoryStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use state::StateStore;

/// Current threshold table.
pub const THRESHOLDS_KEY: &str = "performance_thresholds";

/// Rolling sample history.
pub const HISTORY_KEY: &str = "performance_metrics_history";

/// Adjustment audit log.
pub const ADJUSTMENTS_KEY: &str = "threshold_adjustments";

/// Stored engine config overrides.
pub const CONFIG_KEY: &str = "threshold_config";

/// Per-metric time of the last applied adjustment.
pub const LAST_ADJUSTMENT_KEY: &str = "threshold_last_adjustment";

/// Days of samples kept.
pub const HISTORY_RETENTION_DAYS: i64 = 30;

/// Days of audit records kept.
pub const AUDIT_RETENTION_DAYS: i64 = 90;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// TTL for thresholds, config, the rate-limit clock, and history.
pub const STATE_TTL: Duration = Duration::from_secs(DAY.as_secs() * 30);

/// TTL for the audit log.
pub const AUDIT_TTL: Duration = Duration::from_secs(DAY.as_secs() * 90);

/// Read and decode a JSON document.
///
/// # Errors
///
/// Returns [`StorageError::Serialization`] if the stored document does not
/// match `T`, or the backend's error if the read fails.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    store
        .get(key)
        .await?
        .map(|value| {
            serde_json::from_value(value).map_err(|e| StorageError::Serialization {
                key: key.into(),
                message: e.to_string(),
            })
        })
        .transpose()
}

/// Encode and write a JSON document.
///
/// # Errors
///
/// Returns [`StorageError::Serialization`] if `value` cannot be encoded, or
/// the backend's error if the write fails.
pub async fn set_json<T: Serialize + Sync>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), StorageError> {
    let value = serde_json::to_value(value).map_err(|e| StorageError::Serialization {
        key: key.into(),
        message: e.to_string(),
    })?;
    store.set(key, value, ttl).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::traits::MockKeyValueStore;
    use serde_json::json;

    #[test]
    fn test_ttls_match_retention() {
        assert_eq!(STATE_TTL.as_secs(), 30 * 86_400);
        assert_eq!(AUDIT_TTL.as_secs(), 90 * 86_400);
    }

    #[tokio::test]
    async fn test_get_json_decodes() {
        let mut store = MockKeyValueStore::new();
        store
            .expect_get()
            .withf(|key| key == CONFIG_KEY)
            .returning(|_| Ok(Some(json!([1, 2, 3]))));

        let value: Option<Vec<u32>> = get_json(&store, CONFIG_KEY).await.unwrap();
        assert_eq!(value, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_get_json_type_mismatch() {
        let mut store = MockKeyValueStore::new();
        store
            .expect_get()
            .returning(|_| Ok(Some(json!("not a list"))));

        let result: Result<Option<Vec<u32>>, _> = get_json(&store, HISTORY_KEY).await;
        assert!(matches!(
            result,
            Err(StorageError::Serialization { key, .. }) if key == HISTORY_KEY
        ));
    }

    #[tokio::test]
    async fn test_set_json_passes_ttl() {
        let mut store = MockKeyValueStore::new();
        store
            .expect_set()
            .withf(|key, value, ttl| {
                key == THRESHOLDS_KEY && value == &json!({"a": 1}) && *ttl == Some(STATE_TTL)
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        set_json(&store, THRESHOLDS_KEY, &json!({"a": 1}), Some(STATE_TTL))
            .await
            .unwrap();
    }
}
