//! Shared fixtures for workflow tests.

#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use perf_thresholds::error::{EngineError, StorageError};
use perf_thresholds::metrics::NullSystemProvider;
use perf_thresholds::storage::MemoryStore;
use perf_thresholds::thresholds::{MetricCollector, ThresholdManager};
use perf_thresholds::traits::{ApplicationMetricsSource, KeyValueStore, ManualTimeProvider};
use serde_json::Value;

/// Start of every test timeline.
pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap()
}

/// Application source reporting a constant latency and nothing else.
#[derive(Debug, Clone, Copy)]
pub struct FixedLatency(pub f64);

#[async_trait]
impl ApplicationMetricsSource for FixedLatency {
    async fn response_time(&self) -> Result<Option<f64>, EngineError> {
        Ok(Some(self.0))
    }

    async fn db_connections(&self) -> Result<Option<f64>, EngineError> {
        Ok(None)
    }

    async fn cache_hit_rate(&self) -> Result<Option<f64>, EngineError> {
        Ok(None)
    }

    async fn error_rate(&self) -> Result<Option<f64>, EngineError> {
        Ok(None)
    }

    async fn queue_length(&self) -> Result<Option<f64>, EngineError> {
        Ok(None)
    }
}

/// Application source whose every reading fails.
#[derive(Debug, Clone, Copy)]
pub struct BrokenSource;

fn broken(metric: &str) -> EngineError {
    EngineError::Collection {
        metric: metric.into(),
        message: "source offline".into(),
    }
}

#[async_trait]
impl ApplicationMetricsSource for BrokenSource {
    async fn response_time(&self) -> Result<Option<f64>, EngineError> {
        Err(broken("response_time"))
    }

    async fn db_connections(&self) -> Result<Option<f64>, EngineError> {
        Err(broken("db_connections"))
    }

    async fn cache_hit_rate(&self) -> Result<Option<f64>, EngineError> {
        Err(broken("cache_hit_rate"))
    }

    async fn error_rate(&self) -> Result<Option<f64>, EngineError> {
        Err(broken("error_rate"))
    }

    async fn queue_length(&self) -> Result<Option<f64>, EngineError> {
        Err(broken("queue_length"))
    }
}

/// Store that refuses every call.
#[derive(Debug, Clone, Copy)]
pub struct UnreachableStore;

fn refused() -> StorageError {
    StorageError::Unavailable {
        message: "connection refused".into(),
    }
}

#[async_trait]
impl KeyValueStore for UnreachableStore {
    async fn get(&self, _key: &str) -> Result<Option<Value>, StorageError> {
        Err(refused())
    }

    async fn set(
        &self,
        _key: &str,
        _value: Value,
        _ttl: Option<std::time::Duration>,
    ) -> Result<(), StorageError> {
        Err(refused())
    }

    async fn delete(&self, _key: &str) -> Result<bool, StorageError> {
        Err(refused())
    }
}

/// Engine over a fresh in-memory store with a manual clock.
pub struct Fixture {
    pub manager: ThresholdManager,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualTimeProvider>,
}

impl Fixture {
    pub fn new(app: impl ApplicationMetricsSource + 'static) -> Self {
        let clock = Arc::new(ManualTimeProvider::new(start()));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let collector = MetricCollector::new(Arc::new(NullSystemProvider), Some(Arc::new(app)));
        let manager = ThresholdManager::new(store.clone(), collector, clock.clone());
        Self {
            manager,
            store,
            clock,
        }
    }

    /// Collect `n` samples five minutes apart.
    pub async fn collect(&self, n: usize) {
        for _ in 0..n {
            self.manager.collect_current_metrics().await.unwrap();
            self.clock.advance(Duration::minutes(5));
        }
    }
}
