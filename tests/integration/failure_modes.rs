//! Store outages, broken sources, and bad input.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::sync::Arc;

use perf_thresholds::config::{ConfigUpdate, ThresholdConfig};
use perf_thresholds::error::{ConfigError, EngineError};
use perf_thresholds::metrics::NullSystemProvider;
use perf_thresholds::storage::{CONFIG_KEY, THRESHOLDS_KEY};
use perf_thresholds::thresholds::{
    AlertLevel, MetricCollector, MetricName, ThresholdManager, ThresholdTable,
};
use perf_thresholds::traits::{KeyValueStore, RealTimeProvider};
use serde_json::json;

use super::common::{BrokenSource, FixedLatency, Fixture, UnreachableStore};

fn unreachable_manager() -> ThresholdManager {
    let collector = MetricCollector::new(
        Arc::new(NullSystemProvider),
        Some(Arc::new(FixedLatency(1.0))),
    );
    ThresholdManager::new(
        Arc::new(UnreachableStore),
        collector,
        Arc::new(RealTimeProvider),
    )
}

#[tokio::test]
async fn test_unreachable_store_fails_every_operation() {
    let manager = unreachable_manager();

    assert!(matches!(
        manager.collect_current_metrics().await,
        Err(EngineError::StoreUnavailable(_))
    ));
    assert!(matches!(
        manager.analyze_patterns().await,
        Err(EngineError::StoreUnavailable(_))
    ));
    assert!(matches!(
        manager.adjust_thresholds(None, true).await,
        Err(EngineError::StoreUnavailable(_))
    ));
    assert!(matches!(
        manager.check_thresholds(None).await,
        Err(EngineError::StoreUnavailable(_))
    ));
    assert!(matches!(
        manager.current_thresholds().await,
        Err(EngineError::StoreUnavailable(_))
    ));
    assert!(matches!(
        manager.status().await,
        Err(EngineError::StoreUnavailable(_))
    ));
}

#[tokio::test]
async fn test_broken_sources_yield_unavailable_metrics() {
    let fixture = Fixture::new(BrokenSource);

    let sample = fixture.manager.collect_current_metrics().await.unwrap();
    assert_eq!(sample.available_count(), 0);

    let check = fixture.manager.check_thresholds(None).await.unwrap();
    assert_eq!(check.status, AlertLevel::Ok);
    assert_eq!(check.metrics_checked, 0);

    let status = fixture.manager.status().await.unwrap();
    assert!(status.collection_error.is_none());
    assert_eq!(status.samples_per_metric[&MetricName::ResponseTime], 0);
}

#[tokio::test]
async fn test_rejected_config_update_changes_nothing() {
    let fixture = Fixture::new(FixedLatency(1.0));

    let update = ConfigUpdate::from_pairs([
        ("learning_window_days", "7"),
        ("confidence_threshold", "1.5"),
    ])
    .unwrap();
    let err = fixture.manager.update_config(&update).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidConfig(_)));
    assert_eq!(
        fixture.manager.config().await.unwrap(),
        ThresholdConfig::default()
    );
}

#[test]
fn test_unknown_config_key_is_rejected() {
    let err = ConfigUpdate::from_pairs([("window", "7")]).unwrap_err();
    assert_eq!(
        err,
        ConfigError::UnknownKey {
            key: "window".into()
        }
    );
}

#[tokio::test]
async fn test_misordered_override_is_rejected() {
    let fixture = Fixture::new(FixedLatency(1.0));

    let err = fixture
        .manager
        .set_threshold("response_time", 900.0, 400.0)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidThreshold { metric, .. } if metric == "response_time"
    ));
    assert_eq!(
        fixture.manager.current_thresholds().await.unwrap(),
        ThresholdTable::defaults()
    );
}

#[tokio::test]
async fn test_corrupt_stored_config_falls_back_to_defaults() {
    let fixture = Fixture::new(FixedLatency(1.0));
    fixture
        .store
        .set(CONFIG_KEY, json!("not a config"), None)
        .await
        .unwrap();

    assert_eq!(
        fixture.manager.config().await.unwrap(),
        ThresholdConfig::default()
    );
}

#[tokio::test]
async fn test_partial_stored_thresholds_are_completed() {
    let fixture = Fixture::new(FixedLatency(1.0));
    let mut response_time = *ThresholdTable::defaults()
        .get(MetricName::ResponseTime)
        .unwrap();
    response_time.warning_value = 250.0;
    fixture
        .store
        .set(
            THRESHOLDS_KEY,
            json!({ "response_time": serde_json::to_value(response_time).unwrap() }),
            None,
        )
        .await
        .unwrap();

    let table = fixture.manager.current_thresholds().await.unwrap();
    assert_eq!(table.iter().count(), MetricName::ALL.len());
    assert_eq!(
        table.get(MetricName::ResponseTime).unwrap().warning_value,
        250.0
    );
    assert_eq!(
        table.get(MetricName::QueueLength),
        ThresholdTable::defaults().get(MetricName::QueueLength)
    );
}
