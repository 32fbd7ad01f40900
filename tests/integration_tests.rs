//! Integration tests for perf-thresholds.
//!
//! These tests verify:
//! - `SQLite` persistence across reopen
//! - TTL expiry in both store backends
//! - Configuration loading from the environment
//! - The public statistics helpers

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use perf_thresholds::config::{Config, ConfigUpdate, StoreBackend};
use perf_thresholds::error::ConfigError;
use perf_thresholds::metrics::NullSystemProvider;
use perf_thresholds::storage::{HistoryStore, MemoryStore, SqliteStore, StateStore};
use perf_thresholds::thresholds::stats::{median, percentile, sorted};
use perf_thresholds::thresholds::{MetricCollector, MetricName, MetricSample, ThresholdManager};
use perf_thresholds::traits::{KeyValueStore, ManualTimeProvider, TimeProvider};
use serde_json::json;
use serial_test::serial;
use tempfile::TempDir;

// ============================================================================
// Test Utilities
// ============================================================================

fn clock() -> Arc<ManualTimeProvider> {
    Arc::new(ManualTimeProvider::new(
        Utc.with_ymd_and_hms(2024, 5, 20, 9, 30, 0).unwrap(),
    ))
}

/// Create a test database in a temporary directory.
async fn create_test_store(
    temp_dir: &TempDir,
    clock: Arc<ManualTimeProvider>,
) -> Arc<SqliteStore> {
    let db_path = temp_dir.path().join("thresholds.db");
    Arc::new(
        SqliteStore::with_clock(db_path, clock)
            .await
            .expect("Failed to create store"),
    )
}

fn manager(store: Arc<dyn KeyValueStore>, clock: Arc<ManualTimeProvider>) -> ThresholdManager {
    let collector = MetricCollector::new(Arc::new(NullSystemProvider), None);
    ThresholdManager::new(store, collector, clock)
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn test_sqlite_state_survives_reopen() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let clock = clock();

    {
        let store = create_test_store(&temp_dir, clock.clone()).await;
        let manager = manager(store, clock.clone());
        manager
            .set_threshold("queue_length", 50.0, 200.0)
            .await
            .unwrap();
        manager
            .update_config(&ConfigUpdate::from_pairs([("learning_window_days", "7")]).unwrap())
            .await
            .unwrap();
        manager.collect_current_metrics().await.unwrap();
    }

    let store = create_test_store(&temp_dir, clock.clone()).await;
    let manager = manager(store, clock);

    let table = manager.current_thresholds().await.unwrap();
    let queue = table.get(MetricName::QueueLength).unwrap();
    assert_eq!(queue.warning_value, 50.0);
    assert_eq!(queue.critical_value, 200.0);
    assert_eq!(manager.config().await.unwrap().learning_window_days, 7);

    let status = manager.status().await.unwrap();
    assert_eq!(status.history_samples, 2);
}

#[tokio::test]
async fn test_sqlite_history_round_trip() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let clock = clock();
    let store = create_test_store(&temp_dir, clock.clone()).await;
    let history = HistoryStore::new(store, clock.clone());

    let now = clock.now();
    for minutes in [10, 5, 0] {
        let sample = MetricSample::new(now - chrono::Duration::minutes(minutes))
            .with_value(MetricName::CpuUsage, Some(40.0 + minutes as f64));
        history.append_sample(sample).await.unwrap();
    }

    let samples = history.get_samples(1).await.unwrap();
    let cpu: Vec<f64> = samples
        .iter()
        .filter_map(|s| s.value(MetricName::CpuUsage))
        .collect();
    assert_eq!(cpu, vec![50.0, 45.0, 40.0]);
}

#[tokio::test]
async fn test_sqlite_entries_expire() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let clock = clock();
    let store = create_test_store(&temp_dir, clock.clone()).await;

    store
        .set("short", json!(1), Some(Duration::from_secs(60)))
        .await
        .unwrap();
    store.set("forever", json!(2), None).await.unwrap();

    clock.advance(chrono::Duration::seconds(61));
    assert_eq!(store.get("short").await.unwrap(), None);
    assert_eq!(store.get("forever").await.unwrap(), Some(json!(2)));
    assert!(store.delete("forever").await.unwrap());
    assert!(!store.delete("forever").await.unwrap());
}

#[tokio::test]
async fn test_memory_entries_expire() {
    let clock = clock();
    let store = MemoryStore::new(clock.clone());

    store
        .set("short", json!("x"), Some(Duration::from_secs(30)))
        .await
        .unwrap();
    assert_eq!(store.get("short").await.unwrap(), Some(json!("x")));

    clock.advance(chrono::Duration::seconds(30));
    assert_eq!(store.get("short").await.unwrap(), None);
}

#[tokio::test]
async fn test_thresholds_written_on_first_read() {
    let clock = clock();
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new(clock));
    let state = StateStore::new(store.clone());

    assert_eq!(store.get("performance_thresholds").await.unwrap(), None);
    state.thresholds().await.unwrap();
    assert!(store.get("performance_thresholds").await.unwrap().is_some());
}

// ============================================================================
// Configuration
// ============================================================================

fn clear_env() {
    for var in [
        "THRESHOLDS_STORE",
        "DATABASE_PATH",
        "LOG_LEVEL",
        "LOG_FORMAT",
        "COLLECTION_INTERVAL_SECS",
        "SYSTEM_METRICS_ENABLED",
    ] {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_config_from_env_memory_backend() {
    clear_env();
    std::env::set_var("THRESHOLDS_STORE", "memory");
    std::env::set_var("COLLECTION_INTERVAL_SECS", "120");

    let config = Config::from_env().expect("should load config");
    assert_eq!(config.store_backend, StoreBackend::Memory);
    assert_eq!(config.collection_interval(), Duration::from_secs(120));

    clear_env();
}

#[test]
#[serial]
fn test_config_from_env_rejects_short_interval() {
    clear_env();
    std::env::set_var("COLLECTION_INTERVAL_SECS", "1");

    let result = Config::from_env();
    assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));

    clear_env();
}

// ============================================================================
// Statistics
// ============================================================================

#[test]
fn test_percentile_interpolates() {
    let values = sorted(&[5.0, 1.0, 4.0, 2.0, 3.0]);
    assert!((percentile(&values, 95.0) - 4.8).abs() < 1e-12);
    assert_eq!(percentile(&values, 50.0), 3.0);
    assert_eq!(median(&values), 3.0);
    assert_eq!(percentile(&values, 100.0), 5.0);
    assert_eq!(percentile(&values, 0.0), 1.0);
}
