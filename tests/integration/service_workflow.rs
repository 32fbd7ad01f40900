//! The single-writer service: commands, scheduling, and shutdown.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use perf_thresholds::config::ConfigUpdate;
use perf_thresholds::metrics::NullSystemProvider;
use perf_thresholds::storage::MemoryStore;
use perf_thresholds::thresholds::{
    AdjustmentOutcome, AlertLevel, MetricCollector, MetricName, ServiceHandle, ServiceStatus,
    ThresholdManager, ThresholdService,
};
use perf_thresholds::traits::{ApplicationMetricsSource, KeyValueStore, ManualTimeProvider};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::common::{start, FixedLatency, UnreachableStore};

struct Running {
    handle: ServiceHandle,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

fn spawn(
    store: Arc<dyn KeyValueStore>,
    app: impl ApplicationMetricsSource + 'static,
    interval: Duration,
) -> Running {
    let clock = Arc::new(ManualTimeProvider::new(start()));
    let collector = MetricCollector::new(Arc::new(NullSystemProvider), Some(Arc::new(app)));
    let manager = ThresholdManager::new(store, collector, clock);
    let (service, handle) = ThresholdService::new(manager, interval);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(service.run(shutdown_rx));
    Running {
        handle,
        shutdown_tx,
        task,
    }
}

fn memory_store() -> Arc<dyn KeyValueStore> {
    Arc::new(MemoryStore::new(Arc::new(ManualTimeProvider::new(start()))))
}

async fn wait_for(
    handle: &ServiceHandle,
    predicate: impl Fn(&ServiceStatus) -> bool,
) -> ServiceStatus {
    let mut status_rx = handle.subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = status_rx.borrow_and_update().clone();
            if predicate(&status) {
                return status;
            }
            if status_rx.changed().await.is_err() {
                return status_rx.borrow().clone();
            }
        }
    })
    .await
    .expect("service status did not reach the expected state")
}

#[tokio::test]
async fn test_commands_round_trip() {
    let running = spawn(memory_store(), FixedLatency(750.0), Duration::from_secs(3600));
    let handle = &running.handle;

    let sample = handle.collect().await.unwrap();
    assert_eq!(sample.value(MetricName::ResponseTime), Some(750.0));

    let check = handle.check().await.unwrap();
    assert_eq!(check.status, AlertLevel::Warning);

    let threshold = handle.set_threshold("response_time", 800.0, 1600.0).await.unwrap();
    assert_eq!(threshold.critical_value, 1600.0);
    assert_eq!(handle.check().await.unwrap().status, AlertLevel::Ok);

    let config = handle
        .update_config(ConfigUpdate::from_pairs([("min_samples_for_adjustment", "3")]).unwrap())
        .await
        .unwrap();
    assert_eq!(config.min_samples_for_adjustment, 3);
    assert_eq!(handle.config().await.unwrap(), config);

    let status = handle.status().await.unwrap();
    assert_eq!(status.history_samples, 4);
    assert!(handle.history(None).await.unwrap().is_empty());

    running.shutdown_tx.send(true).unwrap();
    running.task.await.unwrap();
    assert!(!handle.service_status().running);
}

#[tokio::test]
async fn test_requests_after_shutdown_fail() {
    let running = spawn(memory_store(), FixedLatency(100.0), Duration::from_secs(3600));
    running.shutdown_tx.send(true).unwrap();
    running.task.await.unwrap();

    let err = running.handle.thresholds().await.unwrap_err();
    assert!(matches!(
        err,
        perf_thresholds::error::EngineError::ServiceUnavailable { .. }
    ));
}

#[tokio::test]
async fn test_concurrent_collections_are_all_recorded() {
    let running = spawn(memory_store(), FixedLatency(100.0), Duration::from_secs(3600));

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let handle = running.handle.clone();
            tokio::spawn(async move { handle.collect().await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let status = running.handle.status().await.unwrap();
    // Twenty collections plus the one status takes
    assert_eq!(status.history_samples, 21);

    let _ = running.shutdown_tx.send(true);
}

#[tokio::test]
async fn test_concurrent_adjustments_apply_once() {
    let running = spawn(memory_store(), FixedLatency(100.0), Duration::from_secs(3600));
    for _ in 0..100 {
        running.handle.collect().await.unwrap();
    }

    let tasks: Vec<_> = (0..5)
        .map(|_| {
            let handle = running.handle.clone();
            tokio::spawn(async move { handle.adjust(false).await })
        })
        .collect();

    let mut applied = 0;
    for task in tasks {
        match task.await.unwrap().unwrap() {
            AdjustmentOutcome::Completed(record) => applied += record.applied_adjustments.len(),
            other => panic!("expected a completed run, got {other:?}"),
        }
    }
    assert_eq!(applied, 1);
    assert_eq!(running.handle.history(None).await.unwrap().len(), 5);

    let _ = running.shutdown_tx.send(true);
}

#[tokio::test]
async fn test_scheduled_cycles_collect_and_check() {
    let running = spawn(memory_store(), FixedLatency(1500.0), Duration::from_millis(20));

    let status = wait_for(&running.handle, |s| s.successful_cycles >= 2).await;
    assert!(status.running);
    assert_eq!(status.failed_cycles, 0);
    assert_eq!(status.last_check_status, Some(AlertLevel::Critical));
    assert!(status.last_cycle_at.is_some());

    let _ = running.shutdown_tx.send(true);
    running.task.await.unwrap();
}

#[tokio::test]
async fn test_scheduled_cycles_record_store_failures() {
    let running = spawn(
        Arc::new(UnreachableStore),
        FixedLatency(100.0),
        Duration::from_millis(20),
    );

    let status = wait_for(&running.handle, |s| s.failed_cycles >= 1).await;
    assert_eq!(status.successful_cycles, 0);
    assert!(status
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("connection refused")));

    let _ = running.shutdown_tx.send(true);
    running.task.await.unwrap();
}

#[tokio::test]
async fn test_service_stops_when_handles_dropped() {
    let running = spawn(memory_store(), FixedLatency(100.0), Duration::from_secs(3600));
    let Running {
        handle,
        shutdown_tx,
        task,
    } = running;

    drop(handle);
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("service should stop")
        .unwrap();
    drop(shutdown_tx);
}
