//! The adaptive threshold engine.
//!
//! This module provides:
//! - [`MetricCollector`]: one [`MetricSample`] from the configured sources
//! - [`analyzer`]: per-metric statistics, suggestions, and anomaly detection
//! - [`adjuster`]: bounded, rate-limited, confidence-gated changes
//! - [`checker`]: classification of a sample against the thresholds
//! - [`ThresholdManager`]: the facade tying them to the store
//! - [`ThresholdService`]: single-writer actor and scheduler
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use perf_thresholds::metrics::{NullSystemProvider, RequestEvent, RuntimeCounters};
//! use perf_thresholds::storage::MemoryStore;
//! use perf_thresholds::thresholds::{AlertLevel, MetricCollector, ThresholdManager};
//! use perf_thresholds::traits::RealTimeProvider;
//!
//! # tokio_test::block_on(async {
//! let counters = Arc::new(RuntimeCounters::new());
//! counters.record_request(RequestEvent::new(750.0, true));
//!
//! let clock = Arc::new(RealTimeProvider);
//! let collector = MetricCollector::new(Arc::new(NullSystemProvider), Some(counters));
//! let manager = ThresholdManager::new(Arc::new(MemoryStore::default()), collector, clock);
//!
//! // 750 ms is past the 500 ms warning boundary
//! let check = manager.check_thresholds(None).await.unwrap();
//! assert_eq!(check.status, AlertLevel::Warning);
//! # });
//! ```

pub mod adjuster;
pub mod analyzer;
pub mod checker;
mod collector;
mod manager;
mod service;
pub mod stats;
mod types;

pub use adjuster::{AdjustmentClock, AdjustmentState};
pub use collector::MetricCollector;
pub use manager::ThresholdManager;
pub use service::{ServiceCommand, ServiceHandle, ServiceStatus, ThresholdService};
pub use types::{
    AdjustmentOutcome, AdjustmentRecord, Alert, AlertLevel, AnalysisResult, AnomalyReport,
    CheckResult, MetricAnalysis, MetricName, MetricOutcome, MetricSample, Outlier,
    PatternAnalysis, ProposedAdjustment, Seasonality, StatusSnapshot, Threshold, ThresholdTable,
    Trend, Unit,
};
