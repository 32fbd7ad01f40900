//! Metric sources.
//!
//! This module provides:
//! - [`RuntimeCounters`]: in-process request, cache, queue, and pool counters
//! - [`StoreCounters`]: counters another process publishes to the store
//! - [`SysinfoProvider`] / [`NullSystemProvider`]: OS resource readings
//! - [`Timer`]: latency measurement for feeding [`RuntimeCounters`]
//!
//! # Example
//!
//! ```
//! use perf_thresholds::metrics::{RequestEvent, RuntimeCounters};
//! use perf_thresholds::traits::ApplicationMetricsSource;
//!
//! # tokio_test::block_on(async {
//! let counters = RuntimeCounters::new();
//! counters.record_request(RequestEvent::new(120.0, true));
//! counters.record_request(RequestEvent::new(180.0, false));
//!
//! assert_eq!(counters.response_time().await.unwrap(), Some(150.0));
//! assert_eq!(counters.error_rate().await.unwrap(), Some(50.0));
//! // No cache traffic yet
//! assert_eq!(counters.cache_hit_rate().await.unwrap(), None);
//! # });
//! ```

// Counters are converted to f64 for percentages
#![allow(clippy::cast_precision_loss)]

mod store;
mod system;

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::traits::{ApplicationMetricsSource, RealTimeProvider, TimeProvider};

pub use store::{StoreCounters, COUNTER_KEYS};
#[cfg(feature = "system-metrics")]
pub use system::SysinfoProvider;
pub use system::{select_system_provider, NullSystemProvider};

/// How far back request events are kept for the error rate.
const REQUEST_WINDOW_HOURS: i64 = 1;

/// Requests averaged for the response time reading.
pub const RECENT_REQUESTS: usize = 10;

/// A single handled request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEvent {
    /// Latency in milliseconds.
    pub latency_ms: f64,
    /// Whether the request succeeded.
    pub success: bool,
    /// When the request finished.
    pub timestamp: DateTime<Utc>,
}

impl RequestEvent {
    /// Create an event stamped now.
    #[must_use]
    pub fn new(latency_ms: f64, success: bool) -> Self {
        Self::at(Utc::now(), latency_ms, success)
    }

    /// Create an event with an explicit timestamp.
    #[must_use]
    pub const fn at(timestamp: DateTime<Utc>, latency_ms: f64, success: bool) -> Self {
        Self {
            latency_ms,
            success,
            timestamp,
        }
    }
}

/// Point-in-time copy of the raw counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    /// Request events held.
    pub requests: usize,
    /// Cache hits since start.
    pub cache_hits: u64,
    /// Cache misses since start.
    pub cache_misses: u64,
    /// Current queue depth.
    pub queue_length: u64,
    /// Database connections in use.
    pub db_connections_active: u32,
    /// Database pool size.
    pub db_connections_max: u32,
}

#[derive(Debug, Default)]
struct CounterState {
    requests: VecDeque<RequestEvent>,
    cache_hits: u64,
    cache_misses: u64,
    queue_length: u64,
    db_active: u32,
    db_max: u32,
}

/// Thread-safe application counters.
///
/// The host application records requests and updates gauges; the collector
/// reads them through [`ApplicationMetricsSource`].
pub struct RuntimeCounters {
    state: RwLock<CounterState>,
    clock: Arc<dyn TimeProvider>,
}

impl std::fmt::Debug for RuntimeCounters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeCounters")
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl Default for RuntimeCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeCounters {
    /// Create empty counters using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(RealTimeProvider))
    }

    /// Create empty counters with an explicit clock for the error-rate window.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            state: RwLock::new(CounterState::default()),
            clock,
        }
    }

    /// Record a handled request.
    ///
    /// Events older than the error-rate window are dropped, except that the
    /// last [`RECENT_REQUESTS`] are always kept for the response time.
    pub fn record_request(&self, event: RequestEvent) {
        let cutoff = self.request_cutoff();
        match self.state.write() {
            Ok(mut state) => {
                state.requests.push_back(event);
                while state.requests.len() > RECENT_REQUESTS
                    && state.requests.front().is_some_and(|e| e.timestamp < cutoff)
                {
                    state.requests.pop_front();
                }
            }
            Err(poison_error) => {
                tracing::error!(
                    latency_ms = event.latency_ms,
                    error = %poison_error,
                    "Failed to record request: RwLock poisoned"
                );
            }
        }
    }

    /// Record a cache hit.
    pub fn record_cache_hit(&self) {
        self.update("cache hit", |state| state.cache_hits += 1);
    }

    /// Record a cache miss.
    pub fn record_cache_miss(&self) {
        self.update("cache miss", |state| state.cache_misses += 1);
    }

    /// Set the current queue depth.
    pub fn set_queue_length(&self, length: u64) {
        self.update("queue length", |state| state.queue_length = length);
    }

    /// Set database pool usage.
    pub fn set_db_connections(&self, active: u32, max: u32) {
        self.update("db connections", |state| {
            state.db_active = active;
            state.db_max = max;
        });
    }

    /// Copy of the raw counters.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        self.read(|state| CounterSnapshot {
            requests: state.requests.len(),
            cache_hits: state.cache_hits,
            cache_misses: state.cache_misses,
            queue_length: state.queue_length,
            db_connections_active: state.db_active,
            db_connections_max: state.db_max,
        })
    }

    /// Reset everything (useful for testing).
    pub fn clear(&self) {
        self.update("clear", |state| *state = CounterState::default());
    }

    fn request_cutoff(&self) -> DateTime<Utc> {
        self.clock.now() - Duration::hours(REQUEST_WINDOW_HOURS)
    }

    fn update(&self, what: &'static str, f: impl FnOnce(&mut CounterState)) {
        match self.state.write() {
            Ok(mut state) => f(&mut state),
            Err(poison_error) => {
                tracing::error!(
                    counter = what,
                    error = %poison_error,
                    "Failed to update counter: RwLock poisoned"
                );
            }
        }
    }

    fn read<T>(&self, f: impl FnOnce(&CounterState) -> T) -> T {
        match self.state.read() {
            Ok(state) => f(&state),
            Err(poison_error) => {
                tracing::warn!(
                    error = %poison_error,
                    "Reading counters from poisoned lock, using recovered data"
                );
                f(&poison_error.into_inner())
            }
        }
    }
}

#[async_trait]
impl ApplicationMetricsSource for RuntimeCounters {
    async fn response_time(&self) -> Result<Option<f64>, EngineError> {
        Ok(self.read(|state| {
            let recent: Vec<f64> = state
                .requests
                .iter()
                .rev()
                .take(RECENT_REQUESTS)
                .map(|e| e.latency_ms)
                .collect();
            if recent.is_empty() {
                None
            } else {
                Some(recent.iter().sum::<f64>() / recent.len() as f64)
            }
        }))
    }

    async fn db_connections(&self) -> Result<Option<f64>, EngineError> {
        Ok(self.read(|state| {
            (state.db_max > 0)
                .then(|| f64::from(state.db_active) / f64::from(state.db_max) * 100.0)
        }))
    }

    async fn cache_hit_rate(&self) -> Result<Option<f64>, EngineError> {
        Ok(self.read(|state| {
            let total = state.cache_hits + state.cache_misses;
            (total > 0).then(|| state.cache_hits as f64 / total as f64 * 100.0)
        }))
    }

    async fn error_rate(&self) -> Result<Option<f64>, EngineError> {
        let since = self.request_cutoff();
        Ok(self.read(|state| {
            let (total, failed) = state
                .requests
                .iter()
                .filter(|e| e.timestamp >= since)
                .fold((0_usize, 0_usize), |(total, failed), e| {
                    (total + 1, failed + usize::from(!e.success))
                });
            (total > 0).then(|| failed as f64 / total as f64 * 100.0)
        }))
    }

    async fn queue_length(&self) -> Result<Option<f64>, EngineError> {
        Ok(Some(self.read(|state| state.queue_length as f64)))
    }
}

/// Timer for measuring request latency.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Stop the timer and record the request.
    pub fn finish(self, counters: &RuntimeCounters, success: bool) {
        counters.record_request(RequestEvent::new(self.elapsed_ms(), success));
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::start()
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
    use crate::traits::ManualTimeProvider;
    use chrono::TimeZone;
    use static_assertions::assert_impl_all;

    assert_impl_all!(RuntimeCounters: Send, Sync, Default);

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 1, 12, 0, 0).unwrap()
    }

    fn counters() -> (RuntimeCounters, Arc<ManualTimeProvider>) {
        let clock = Arc::new(ManualTimeProvider::new(now()));
        (RuntimeCounters::with_clock(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_empty_counters() {
        let (counters, _) = counters();
        assert_eq!(counters.response_time().await.unwrap(), None);
        assert_eq!(counters.db_connections().await.unwrap(), None);
        assert_eq!(counters.cache_hit_rate().await.unwrap(), None);
        assert_eq!(counters.error_rate().await.unwrap(), None);
        assert_eq!(counters.queue_length().await.unwrap(), Some(0.0));
    }

    #[tokio::test]
    async fn test_response_time_uses_last_ten() {
        let (counters, _) = counters();
        // Ten slow requests followed by ten fast ones
        for _ in 0..10 {
            counters.record_request(RequestEvent::at(now(), 1000.0, true));
        }
        for i in 0..10 {
            counters.record_request(RequestEvent::at(now(), f64::from(i) * 10.0, true));
        }
        assert_eq!(counters.response_time().await.unwrap(), Some(45.0));
    }

    #[tokio::test]
    async fn test_error_rate_last_hour_only() {
        let (counters, _) = counters();
        counters.record_request(RequestEvent::at(now() - Duration::hours(2), 10.0, false));
        counters.record_request(RequestEvent::at(now() - Duration::minutes(30), 10.0, false));
        counters.record_request(RequestEvent::at(now() - Duration::minutes(5), 10.0, true));
        counters.record_request(RequestEvent::at(now(), 10.0, true));
        counters.record_request(RequestEvent::at(now(), 10.0, true));

        assert_eq!(counters.error_rate().await.unwrap(), Some(25.0));
    }

    #[tokio::test]
    async fn test_error_rate_none_when_window_empty() {
        let (counters, clock) = counters();
        counters.record_request(RequestEvent::at(now(), 10.0, false));
        clock.advance(Duration::hours(2));
        assert_eq!(counters.error_rate().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cache_and_pool_percentages() {
        let (counters, _) = counters();
        for _ in 0..3 {
            counters.record_cache_hit();
        }
        counters.record_cache_miss();
        counters.set_db_connections(8, 20);
        counters.set_queue_length(42);

        assert_eq!(counters.cache_hit_rate().await.unwrap(), Some(75.0));
        assert_eq!(counters.db_connections().await.unwrap(), Some(40.0));
        assert_eq!(counters.queue_length().await.unwrap(), Some(42.0));

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.cache_hits, 3);
        assert_eq!(snapshot.cache_misses, 1);
        assert_eq!(snapshot.db_connections_max, 20);
    }

    #[test]
    fn test_requests_older_than_window_are_dropped() {
        let (counters, clock) = counters();
        for _ in 0..50 {
            counters.record_request(RequestEvent::at(now(), 1.0, true));
        }
        assert_eq!(counters.snapshot().requests, 50);

        clock.advance(Duration::hours(2));
        counters.record_request(RequestEvent::at(clock.now(), 1.0, true));
        assert_eq!(counters.snapshot().requests, RECENT_REQUESTS);
    }

    #[tokio::test]
    async fn test_error_rate_covers_full_hour_under_heavy_traffic() {
        let (counters, clock) = counters();
        // 20 000 requests spread over 50 minutes, failures only in the first 10
        for i in 0..20_000_i64 {
            let at = now() + Duration::milliseconds(i * 150);
            clock.set(at);
            let success = at >= now() + Duration::minutes(10);
            counters.record_request(RequestEvent::at(at, 5.0, success));
        }
        assert_eq!(counters.snapshot().requests, 20_000);

        let failed = (Duration::minutes(10).num_milliseconds() / 150) as f64;
        let rate = counters.error_rate().await.unwrap().unwrap();
        assert!((rate - failed / 20_000.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_clear() {
        let (counters, _) = counters();
        counters.record_request(RequestEvent::at(now(), 1.0, true));
        counters.record_cache_hit();
        counters.clear();
        assert_eq!(counters.snapshot(), CounterSnapshot::default());
    }

    #[test]
    fn test_timer_finish_records_request() {
        let counters = RuntimeCounters::new();
        let timer = Timer::start();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.elapsed_ms() >= 5.0);
        timer.finish(&counters, true);
        assert_eq!(counters.snapshot().requests, 1);
    }
}
