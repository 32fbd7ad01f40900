//! Collect → analyze → adjust workflows against an in-memory store.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::float_cmp)]

use std::sync::Arc;

use chrono::Duration;
use perf_thresholds::config::ConfigUpdate;
use perf_thresholds::metrics::{NullSystemProvider, StoreCounters};
use perf_thresholds::storage::MemoryStore;
use perf_thresholds::thresholds::{
    AdjustmentOutcome, AdjustmentRecord, AlertLevel, AnalysisResult, MetricCollector,
    MetricName, PatternAnalysis, ThresholdManager, ThresholdTable,
};
use perf_thresholds::traits::{KeyValueStore, ManualTimeProvider};
use pretty_assertions::assert_eq;
use serde_json::json;

use super::common::{start, FixedLatency, Fixture};

fn completed(outcome: AdjustmentOutcome) -> AdjustmentRecord {
    match outcome {
        AdjustmentOutcome::Completed(record) => record,
        other => panic!("expected a completed run, got {other:?}"),
    }
}

fn complete(result: AnalysisResult) -> PatternAnalysis {
    match result {
        AnalysisResult::Complete(analysis) => analysis,
        other => panic!("expected a complete analysis, got {other:?}"),
    }
}

/// Engine whose application counters come from the store it persists to.
fn store_backed() -> (ThresholdManager, Arc<MemoryStore>, Arc<ManualTimeProvider>) {
    let clock = Arc::new(ManualTimeProvider::new(start()));
    let store = Arc::new(MemoryStore::new(clock.clone()));
    let counters = StoreCounters::new(store.clone());
    let collector = MetricCollector::new(Arc::new(NullSystemProvider), Some(Arc::new(counters)));
    let manager = ThresholdManager::new(store.clone(), collector, clock.clone());
    (manager, store, clock)
}

#[tokio::test]
async fn test_cold_start_reports_insufficient_data() {
    let fixture = Fixture::new(FixedLatency(120.0));

    assert_eq!(
        fixture.manager.analyze_patterns().await.unwrap(),
        AnalysisResult::InsufficientData {
            current_samples: 0,
            required: 50,
        }
    );
    assert_eq!(
        fixture.manager.adjust_thresholds(None, false).await.unwrap(),
        AdjustmentOutcome::InsufficientData {
            current_samples: 0,
            required: 50,
        }
    );
    assert_eq!(
        fixture.manager.current_thresholds().await.unwrap(),
        ThresholdTable::defaults()
    );
}

#[tokio::test]
async fn test_confidence_gate_blocks_early_adjustment() {
    let fixture = Fixture::new(FixedLatency(100.0));
    fixture.collect(50).await;

    let record = completed(fixture.manager.adjust_thresholds(None, false).await.unwrap());

    assert_eq!(record.confidence, 0.5);
    assert_eq!(record.confidence_threshold, 0.8);
    assert!(!record.auto_applied);
    assert_eq!(record.proposed_adjustments.len(), 1);
    assert!(record.applied_adjustments.is_empty());
    assert_eq!(
        fixture.manager.current_thresholds().await.unwrap(),
        ThresholdTable::defaults()
    );
}

#[tokio::test]
async fn test_full_adjustment_cycle() {
    let fixture = Fixture::new(FixedLatency(100.0));
    fixture.collect(100).await;

    // Suggested 120/150 ms is far below 500/1000, so the 30% step bound applies
    let first = completed(fixture.manager.adjust_thresholds(None, false).await.unwrap());
    assert!(first.auto_applied);
    let applied = &first.applied_adjustments[0];
    assert_eq!(applied.metric, MetricName::ResponseTime);
    assert!((applied.new_warning - 350.0).abs() < 1e-9);
    assert!((applied.new_critical - 700.0).abs() < 1e-9);

    // Within six hours the metric is rate limited
    fixture.clock.advance(Duration::hours(1));
    let limited = completed(fixture.manager.adjust_thresholds(None, false).await.unwrap());
    assert!(limited.proposed_adjustments.is_empty());
    assert!(limited.applied_adjustments.is_empty());
    assert!(!limited.auto_applied);

    // Forcing skips the rate limit but not the step bound
    let forced = completed(fixture.manager.adjust_thresholds(None, true).await.unwrap());
    let rt = fixture
        .manager
        .current_thresholds()
        .await
        .unwrap()
        .get(MetricName::ResponseTime)
        .copied()
        .unwrap();
    assert!((rt.warning_value - 245.0).abs() < 1e-9);
    assert!((rt.critical_value - 490.0).abs() < 1e-9);

    let history = fixture.manager.adjustment_history(None).await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].id, forced.id);
    assert_eq!(history[2].id, first.id);

    let status = fixture.manager.status().await.unwrap();
    assert_eq!(status.total_adjustments, 3);
    assert_eq!(status.last_adjustment, Some(forced.timestamp));
}

#[tokio::test]
async fn test_adjusting_a_supplied_analysis() {
    let fixture = Fixture::new(FixedLatency(100.0));
    fixture.collect(100).await;
    let analysis = complete(fixture.manager.analyze_patterns().await.unwrap());

    let record = completed(
        fixture
            .manager
            .adjust_thresholds(Some(analysis.clone()), false)
            .await
            .unwrap(),
    );
    assert_eq!(record.analysis, analysis);
    assert_eq!(record.applied_adjustments.len(), 1);
}

#[tokio::test]
async fn test_history_outside_window_is_ignored() {
    let fixture = Fixture::new(FixedLatency(100.0));
    fixture.collect(60).await;

    fixture.clock.advance(Duration::days(15));
    assert_eq!(
        fixture.manager.analyze_patterns().await.unwrap(),
        AnalysisResult::InsufficientData {
            current_samples: 0,
            required: 50,
        }
    );

    // Still retained: the window is narrower than retention
    let status = fixture.manager.status().await.unwrap();
    assert_eq!(status.history_samples, 61);
}

#[tokio::test]
async fn test_wider_window_includes_older_history() {
    let fixture = Fixture::new(FixedLatency(100.0));
    fixture.collect(60).await;
    fixture.clock.advance(Duration::days(15));

    let update = ConfigUpdate::from_pairs([("learning_window_days", "30")]).unwrap();
    fixture.manager.update_config(&update).await.unwrap();

    let analysis = complete(fixture.manager.analyze_patterns().await.unwrap());
    assert_eq!(analysis.sample_count, 60);
    assert_eq!(analysis.window_days, 30);
}

#[tokio::test]
async fn test_store_counters_feed_checks() {
    let (manager, store, _) = store_backed();

    store.set("avg_response_time", json!(1200.0), None).await.unwrap();
    store.set("cache_hits", json!(55), None).await.unwrap();
    store.set("cache_misses", json!(45), None).await.unwrap();
    store.set("error_count_last_hour", json!(3), None).await.unwrap();
    store.set("total_requests_last_hour", json!(100), None).await.unwrap();

    let check = manager.check_thresholds(None).await.unwrap();
    assert_eq!(check.status, AlertLevel::Critical);
    // Queue length reads as an empty queue when never published
    assert_eq!(check.metrics_checked, 4);
    assert_eq!(check.critical_count, 2);
    assert_eq!(check.warning_count, 1);

    let level_of = |metric| {
        check
            .alerts
            .iter()
            .find(|alert| alert.metric == metric)
            .map(|alert| alert.level)
    };
    assert_eq!(level_of(MetricName::ResponseTime), Some(AlertLevel::Critical));
    // Inverted: 55% is under the 60% critical floor
    assert_eq!(level_of(MetricName::CacheHitRate), Some(AlertLevel::Critical));
    // Not inverted: 3% is past the 1% warning and below the 5% critical
    assert_eq!(level_of(MetricName::ErrorRate), Some(AlertLevel::Warning));
}

#[tokio::test]
async fn test_healthy_cache_is_ok() {
    let (manager, store, _) = store_backed();
    store.set("cache_hits", json!(90), None).await.unwrap();
    store.set("cache_misses", json!(10), None).await.unwrap();

    let check = manager.check_thresholds(None).await.unwrap();
    assert_eq!(check.status, AlertLevel::Ok);
    assert!(check.alerts.is_empty());
    assert_eq!(check.metrics_checked, 2);
}

#[tokio::test]
async fn test_spike_is_flagged_as_anomaly() {
    let (manager, store, clock) = store_backed();

    for i in 0..60 {
        let latency = if i == 45 { 1000.0 } else { 100.0 };
        store
            .set("avg_response_time", json!(latency), None)
            .await
            .unwrap();
        manager.collect_current_metrics().await.unwrap();
        clock.advance(Duration::minutes(5));
    }

    let analysis = complete(manager.analyze_patterns().await.unwrap());
    assert_eq!(analysis.anomalies.len(), 1);
    let report = &analysis.anomalies[0];
    assert_eq!(report.metric, MetricName::ResponseTime);
    assert_eq!(report.total_outliers, 1);
    assert_eq!(report.outliers[0].index, 45);
    assert_eq!(report.outliers[0].value, 1000.0);
    assert!(report.outliers[0].z_score > 3.0);
}

#[tokio::test]
async fn test_anomaly_detection_can_be_disabled() {
    let (manager, store, clock) = store_backed();
    let update = ConfigUpdate::from_pairs([("anomaly_detection_enabled", "false")]).unwrap();
    manager.update_config(&update).await.unwrap();

    for i in 0..60 {
        let latency = if i == 10 { 5000.0 } else { 100.0 };
        store
            .set("avg_response_time", json!(latency), None)
            .await
            .unwrap();
        manager.collect_current_metrics().await.unwrap();
        clock.advance(Duration::minutes(5));
    }

    let analysis = complete(manager.analyze_patterns().await.unwrap());
    assert!(analysis.anomalies.is_empty());
}

#[tokio::test]
async fn test_manual_override_survives_until_next_adjustment() {
    let fixture = Fixture::new(FixedLatency(100.0));

    let threshold = fixture
        .manager
        .set_threshold("response_time", 300.0, 600.0)
        .await
        .unwrap();
    assert_eq!(threshold.warning_value, 300.0);

    let check = fixture.manager.check_thresholds(None).await.unwrap();
    assert_eq!(check.status, AlertLevel::Ok);

    let table = fixture.manager.current_thresholds().await.unwrap();
    assert_eq!(table.get(MetricName::ResponseTime), Some(&threshold));
    assert_eq!(
        table.get(MetricName::CpuUsage),
        ThresholdTable::defaults().get(MetricName::CpuUsage)
    );
}
