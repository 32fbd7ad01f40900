//! Adaptive performance thresholds
//!
//! Samples a fixed set of performance metrics, keeps a rolling history, and
//! moves warning/critical thresholds toward what the system actually does,
//! within bounds and only when confident.
//!
//! # Features
//!
//! - Eight metrics from OS introspection and application counters
//! - Percentile-based threshold suggestions with trend and daily-cycle analysis
//! - Z-score anomaly detection
//! - Bounded, rate-limited, confidence-gated adjustment with an audit log
//! - `SQLite` or in-memory key-value persistence with TTLs
//! - A single-writer service task that also runs the collection schedule
//!
//! # Quick Start
//!
//! ```bash
//! perf-thresholds check
//! perf-thresholds run --interval 5m
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐  commands   ┌──────────────────┐   get/set   ┌──────────────┐
//! │ CLI / app  │────────────▶│ ThresholdService │────────────▶│ KeyValueStore│
//! │ (handles)  │◀────────────│ (single writer)  │◀────────────│ SQLite / mem │
//! └────────────┘   replies   └────────┬─────────┘             └──────────────┘
//!                                     │ sample
//!                                     ▼
//!                        sysinfo + application counters
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod storage;
pub mod thresholds;
pub mod traits;

#[cfg(test)]
mod test_utils;
