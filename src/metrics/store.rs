//! Counters published to the key-value store by another process.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::EngineError;
use crate::thresholds::MetricName;
use crate::traits::{ApplicationMetricsSource, KeyValueStore};

const AVG_RESPONSE_TIME: &str = "avg_response_time";
const DB_CONNECTIONS_ACTIVE: &str = "db_connections_active";
const DB_CONNECTIONS_MAX: &str = "db_connections_max";
const CACHE_HITS: &str = "cache_hits";
const CACHE_MISSES: &str = "cache_misses";
const ERROR_COUNT_LAST_HOUR: &str = "error_count_last_hour";
const TOTAL_REQUESTS_LAST_HOUR: &str = "total_requests_last_hour";
const QUEUE_LENGTH: &str = "queue_length";

/// Every key read by [`StoreCounters`].
pub const COUNTER_KEYS: [&str; 8] = [
    AVG_RESPONSE_TIME,
    DB_CONNECTIONS_ACTIVE,
    DB_CONNECTIONS_MAX,
    CACHE_HITS,
    CACHE_MISSES,
    ERROR_COUNT_LAST_HOUR,
    TOTAL_REQUESTS_LAST_HOUR,
    QUEUE_LENGTH,
];

/// Application counters read from well-known store keys.
///
/// Event counters (`cache_hits`, `cache_misses`, `error_count_last_hour`,
/// `queue_length`) are created by the publisher on the first event, so an
/// absent one reads as 0 once its ratio has a denominator. A ratio whose
/// denominator is absent, and an absent `avg_response_time`, are unavailable.
/// A key holding something other than a number, or a store read failure, is
/// a collection error.
#[derive(Clone)]
pub struct StoreCounters {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for StoreCounters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreCounters").finish_non_exhaustive()
    }
}

impl StoreCounters {
    /// Read counters from `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    async fn number(&self, metric: MetricName, key: &str) -> Result<Option<f64>, EngineError> {
        let value = self
            .store
            .get(key)
            .await
            .map_err(|e| EngineError::Collection {
                metric: metric.to_string(),
                message: e.to_string(),
            })?;

        match value {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(other) => Err(EngineError::Collection {
                metric: metric.to_string(),
                message: format!("counter {key} is not a number: {other}"),
            }),
        }
    }

    /// `numerator / denominator * 100`. An absent numerator counts as 0;
    /// unavailable when the denominator is absent or not positive.
    async fn percentage(
        &self,
        metric: MetricName,
        numerator: &str,
        denominator: &str,
    ) -> Result<Option<f64>, EngineError> {
        let Some(whole) = self.number(metric, denominator).await? else {
            return Ok(None);
        };
        let part = self.number(metric, numerator).await?.unwrap_or(0.0);
        Ok((whole > 0.0).then(|| part / whole * 100.0))
    }
}

#[async_trait]
impl ApplicationMetricsSource for StoreCounters {
    async fn response_time(&self) -> Result<Option<f64>, EngineError> {
        self.number(MetricName::ResponseTime, AVG_RESPONSE_TIME)
            .await
    }

    async fn db_connections(&self) -> Result<Option<f64>, EngineError> {
        self.percentage(
            MetricName::DbConnections,
            DB_CONNECTIONS_ACTIVE,
            DB_CONNECTIONS_MAX,
        )
        .await
    }

    async fn cache_hit_rate(&self) -> Result<Option<f64>, EngineError> {
        let metric = MetricName::CacheHitRate;
        let hits = self.number(metric, CACHE_HITS).await?;
        let misses = self.number(metric, CACHE_MISSES).await?;
        if hits.is_none() && misses.is_none() {
            return Ok(None);
        }
        let (hits, misses) = (hits.unwrap_or(0.0), misses.unwrap_or(0.0));
        Ok((hits + misses > 0.0).then(|| hits / (hits + misses) * 100.0))
    }

    async fn error_rate(&self) -> Result<Option<f64>, EngineError> {
        self.percentage(
            MetricName::ErrorRate,
            ERROR_COUNT_LAST_HOUR,
            TOTAL_REQUESTS_LAST_HOUR,
        )
        .await
    }

    async fn queue_length(&self) -> Result<Option<f64>, EngineError> {
        let length = self.number(MetricName::QueueLength, QUEUE_LENGTH).await?;
        Ok(Some(length.unwrap_or(0.0)))
    }
}
