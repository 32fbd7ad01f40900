//! Domain types for the threshold engine.
//!
//! Everything here is plain data: serializable, cloneable, and free of I/O.
//! Behaviour lives in the sibling modules.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ThresholdConfig;
use crate::error::EngineError;

// ============================================================================
// Metrics
// ============================================================================

/// The fixed set of tracked metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    /// Average request latency.
    ResponseTime,
    /// Physical memory in use.
    MemoryUsage,
    /// CPU utilisation.
    CpuUsage,
    /// Root filesystem usage.
    DiskUsage,
    /// Database pool usage.
    DbConnections,
    /// Cache hit rate (lower is worse).
    CacheHitRate,
    /// Failed request rate.
    ErrorRate,
    /// Work queue depth.
    QueueLength,
}

impl MetricName {
    /// Every metric, in table order.
    pub const ALL: [Self; 8] = [
        Self::ResponseTime,
        Self::MemoryUsage,
        Self::CpuUsage,
        Self::DiskUsage,
        Self::DbConnections,
        Self::CacheHitRate,
        Self::ErrorRate,
        Self::QueueLength,
    ];

    /// Wire name of the metric.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ResponseTime => "response_time",
            Self::MemoryUsage => "memory_usage",
            Self::CpuUsage => "cpu_usage",
            Self::DiskUsage => "disk_usage",
            Self::DbConnections => "db_connections",
            Self::CacheHitRate => "cache_hit_rate",
            Self::ErrorRate => "error_rate",
            Self::QueueLength => "queue_length",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricName {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|metric| metric.as_str() == s)
            .ok_or_else(|| EngineError::UnknownMetric { name: s.into() })
    }
}

/// Display unit of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    /// Milliseconds.
    #[serde(rename = "ms")]
    Milliseconds,
    /// Percent.
    #[serde(rename = "%")]
    Percent,
    /// A count of items.
    #[serde(rename = "items")]
    Items,
}

impl Unit {
    /// Short suffix used in messages.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Milliseconds => "ms",
            Self::Percent => "%",
            Self::Items => "items",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// One observation of every metric.
///
/// A value is either finite or absent; [`MetricSample::with_value`] drops
/// NaN and infinities so that invariant holds for anything built through it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// When the sample was taken.
    pub timestamp: DateTime<Utc>,
    /// Reading per metric; `None` means unavailable.
    pub values: BTreeMap<MetricName, Option<f64>>,
}

impl MetricSample {
    /// An empty sample with every metric unavailable.
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            values: MetricName::ALL.into_iter().map(|m| (m, None)).collect(),
        }
    }

    /// Set a reading. Non-finite values are stored as unavailable.
    #[must_use]
    pub fn with_value(mut self, metric: MetricName, value: Option<f64>) -> Self {
        self.set(metric, value);
        self
    }

    /// Set a reading in place. Non-finite values are stored as unavailable.
    pub fn set(&mut self, metric: MetricName, value: Option<f64>) {
        self.values.insert(metric, value.filter(|v| v.is_finite()));
    }

    /// Reading for a metric, if available.
    #[must_use]
    pub fn value(&self, metric: MetricName) -> Option<f64> {
        self.values.get(&metric).copied().flatten()
    }

    /// Number of metrics with a reading.
    #[must_use]
    pub fn available_count(&self) -> usize {
        self.values.values().filter(|v| v.is_some()).count()
    }
}

// ============================================================================
// Thresholds
// ============================================================================

/// Severity of a metric reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    /// Within bounds.
    Ok,
    /// Past the warning boundary.
    Warning,
    /// Past the critical boundary.
    Critical,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "ok",
            Self::Warning => "warning",
            Self::Critical => "critical",
        })
    }
}

/// Warning/critical boundaries for one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    /// Warning boundary.
    pub warning_value: f64,
    /// Critical boundary.
    pub critical_value: f64,
    /// Display unit.
    pub unit: Unit,
    /// Whether automatic adjustment may change this threshold.
    pub adaptive: bool,
    /// Whether lower readings are worse.
    pub inverted: bool,
}

impl Threshold {
    const fn new(warning_value: f64, critical_value: f64, unit: Unit, inverted: bool) -> Self {
        Self {
            warning_value,
            critical_value,
            unit,
            adaptive: true,
            inverted,
        }
    }

    /// Check that both values are finite and critical is at least as severe
    /// as warning.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the pair is invalid.
    pub fn validate(&self) -> Result<(), String> {
        if !self.warning_value.is_finite() || !self.critical_value.is_finite() {
            return Err("warning and critical must be finite numbers".into());
        }
        if self.inverted && self.critical_value > self.warning_value {
            return Err(format!(
                "critical ({}) must be <= warning ({}) for an inverted metric",
                self.critical_value, self.warning_value
            ));
        }
        if !self.inverted && self.critical_value < self.warning_value {
            return Err(format!(
                "critical ({}) must be >= warning ({})",
                self.critical_value, self.warning_value
            ));
        }
        Ok(())
    }

    /// Classify a reading against this threshold.
    #[must_use]
    pub fn classify(&self, value: f64) -> AlertLevel {
        if self.inverted {
            if value <= self.critical_value {
                AlertLevel::Critical
            } else if value <= self.warning_value {
                AlertLevel::Warning
            } else {
                AlertLevel::Ok
            }
        } else if value >= self.critical_value {
            AlertLevel::Critical
        } else if value >= self.warning_value {
            AlertLevel::Warning
        } else {
            AlertLevel::Ok
        }
    }
}

/// Thresholds for every metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThresholdTable(BTreeMap<MetricName, Threshold>);

impl ThresholdTable {
    /// The documented defaults.
    #[must_use]
    pub fn defaults() -> Self {
        use MetricName as M;
        Self(BTreeMap::from([
            (M::ResponseTime, Threshold::new(500.0, 1000.0, Unit::Milliseconds, false)),
            (M::MemoryUsage, Threshold::new(70.0, 85.0, Unit::Percent, false)),
            (M::CpuUsage, Threshold::new(70.0, 85.0, Unit::Percent, false)),
            (M::DiskUsage, Threshold::new(80.0, 90.0, Unit::Percent, false)),
            (M::DbConnections, Threshold::new(80.0, 95.0, Unit::Percent, false)),
            (M::CacheHitRate, Threshold::new(80.0, 60.0, Unit::Percent, true)),
            // Higher error rates are worse, so this one is not inverted.
            (M::ErrorRate, Threshold::new(1.0, 5.0, Unit::Percent, false)),
            (M::QueueLength, Threshold::new(100.0, 500.0, Unit::Items, false)),
        ]))
    }

    /// Threshold for a metric.
    #[must_use]
    pub fn get(&self, metric: MetricName) -> Option<&Threshold> {
        self.0.get(&metric)
    }

    /// Replace a metric's threshold.
    pub fn insert(&mut self, metric: MetricName, threshold: Threshold) {
        self.0.insert(metric, threshold);
    }

    /// Iterate in metric order.
    pub fn iter(&self) -> impl Iterator<Item = (MetricName, &Threshold)> {
        self.0.iter().map(|(m, t)| (*m, t))
    }

    /// Fill in any metric missing from a stored table with its default.
    #[must_use]
    pub fn with_defaults_filled(mut self) -> Self {
        for (metric, threshold) in Self::defaults().0 {
            self.0.entry(metric).or_insert(threshold);
        }
        self
    }
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self::defaults()
    }
}

// ============================================================================
// Analysis
// ============================================================================

/// Direction of a metric over the analysed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    /// Slope above the sensitivity cutoff.
    Increasing,
    /// Slope below the negative cutoff.
    Decreasing,
    /// Neither.
    Stable,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Increasing => "increasing",
            Self::Decreasing => "decreasing",
            Self::Stable => "stable",
        })
    }
}

/// Daily-cycle detection result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Seasonality {
    /// Fewer than one full cycle of samples.
    InsufficientData,
    /// No repeating pattern.
    None,
    /// Strong autocorrelation at `lag` samples.
    Periodic {
        /// Lag in samples.
        lag: usize,
    },
}

/// Statistics and suggestion for one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAnalysis {
    /// The metric analysed.
    pub metric: MetricName,
    /// Readings used.
    pub sample_count: usize,
    /// Arithmetic mean.
    pub mean: f64,
    /// 50th percentile.
    pub median: f64,
    /// Population standard deviation.
    pub std_dev: f64,
    /// 80th percentile.
    pub p80: f64,
    /// 95th percentile.
    pub p95: f64,
    /// 99th percentile.
    pub p99: f64,
    /// Least-squares slope per sample.
    pub slope: f64,
    /// Trend classification of `slope`.
    pub trend: Trend,
    /// Daily-cycle detection.
    pub seasonality: Seasonality,
    /// Warning value in force.
    pub current_warning: f64,
    /// Critical value in force.
    pub current_critical: f64,
    /// Warning value the distribution suggests.
    pub suggested_warning: f64,
    /// Critical value the distribution suggests.
    pub suggested_critical: f64,
    /// `|current - suggested| / current` for the warning value.
    pub threshold_deviation: f64,
    /// Whether the deviation is large enough to adjust.
    pub needs_adjustment: bool,
    /// Confidence in the suggestion, in `[0, 1]`.
    pub confidence: f64,
    /// Human-readable explanation.
    pub rationale: String,
}

/// Per-metric analysis result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MetricOutcome {
    /// Enough readings to analyse.
    Analyzed(MetricAnalysis),
    /// Too few readings; no suggestion is made.
    InsufficientData {
        /// Readings available.
        samples: usize,
    },
}

impl MetricOutcome {
    /// The analysis, if one was produced.
    #[must_use]
    pub const fn analysis(&self) -> Option<&MetricAnalysis> {
        match self {
            Self::Analyzed(analysis) => Some(analysis),
            Self::InsufficientData { .. } => None,
        }
    }
}

/// One flagged reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outlier {
    /// Position among the metric's readings, oldest first.
    pub index: usize,
    /// The reading.
    pub value: f64,
    /// Distance from the mean in standard deviations.
    pub z_score: f64,
    /// When the reading was taken.
    pub timestamp: DateTime<Utc>,
}

/// Outliers found for one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    /// The metric.
    pub metric: MetricName,
    /// Flagged readings.
    pub outliers: Vec<Outlier>,
    /// `outliers.len()`.
    pub total_outliers: usize,
    /// `total_outliers / sample_count`.
    pub outlier_rate: f64,
    /// Readings examined.
    pub sample_count: usize,
}

/// Full analysis of the learning window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternAnalysis {
    /// When the analysis ran.
    pub timestamp: DateTime<Utc>,
    /// Window length used.
    pub window_days: u32,
    /// Samples in the window.
    pub sample_count: usize,
    /// Per-metric results.
    pub metrics: BTreeMap<MetricName, MetricOutcome>,
    /// Outlier reports (empty when detection is disabled).
    pub anomalies: Vec<AnomalyReport>,
    /// Mean confidence of the analysed metrics.
    pub confidence: f64,
}

/// Result of analysing the learning window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisResult {
    /// The window held enough samples.
    Complete(PatternAnalysis),
    /// Not enough history yet.
    InsufficientData {
        /// Samples in the window.
        current_samples: usize,
        /// Samples needed.
        required: usize,
    },
}

// ============================================================================
// Adjustment
// ============================================================================

/// A proposed threshold change for one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedAdjustment {
    /// The metric.
    pub metric: MetricName,
    /// Warning before.
    pub old_warning: f64,
    /// Warning after.
    pub new_warning: f64,
    /// Critical before.
    pub old_critical: f64,
    /// Critical after.
    pub new_critical: f64,
    /// Confidence of the metric's analysis.
    pub confidence: f64,
    /// Why the change was proposed.
    pub reason: String,
}

/// Audit entry for one adjustment run. Never modified once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentRecord {
    /// Unique id.
    pub id: Uuid,
    /// When the run happened.
    pub timestamp: DateTime<Utc>,
    /// The analysis the run was based on.
    pub analysis: PatternAnalysis,
    /// Every proposal.
    pub proposed_adjustments: Vec<ProposedAdjustment>,
    /// Proposals actually committed.
    pub applied_adjustments: Vec<ProposedAdjustment>,
    /// Overall confidence.
    pub confidence: f64,
    /// Confidence needed to auto-apply.
    pub confidence_threshold: f64,
    /// Whether at least one proposal was committed.
    pub auto_applied: bool,
}

/// Result of an adjustment run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdjustmentOutcome {
    /// The run completed and was recorded.
    Completed(AdjustmentRecord),
    /// Not enough history; nothing was attempted.
    InsufficientData {
        /// Samples in the window.
        current_samples: usize,
        /// Samples needed.
        required: usize,
    },
}

// ============================================================================
// Checking and status
// ============================================================================

/// A metric past one of its boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// The metric.
    pub metric: MetricName,
    /// Warning or critical.
    pub level: AlertLevel,
    /// The reading.
    pub value: f64,
    /// The boundary that was crossed.
    pub threshold: f64,
    /// Display unit.
    pub unit: Unit,
    /// Human-readable description.
    pub message: String,
}

/// Result of checking one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Timestamp of the checked sample.
    pub timestamp: DateTime<Utc>,
    /// Worst level among the alerts.
    pub status: AlertLevel,
    /// Non-ok metrics.
    pub alerts: Vec<Alert>,
    /// Critical alerts.
    pub critical_count: usize,
    /// Warning alerts.
    pub warning_count: usize,
    /// Metrics that had a reading and were compared.
    pub metrics_checked: usize,
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
    /// Freshly collected sample, if collection succeeded.
    pub current_metrics: Option<MetricSample>,
    /// Check of that sample.
    pub threshold_check: Option<CheckResult>,
    /// Why collection failed, if it did.
    pub collection_error: Option<String>,
    /// Effective engine configuration.
    pub config: ThresholdConfig,
    /// Shortcut for `config.auto_adjustment_enabled`.
    pub auto_adjustment_enabled: bool,
    /// Timestamp of the newest audit record.
    pub last_adjustment: Option<DateTime<Utc>>,
    /// Audit records retained.
    pub total_adjustments: usize,
    /// Samples retained.
    pub history_samples: usize,
    /// Readings retained per metric.
    pub samples_per_metric: BTreeMap<MetricName, usize>,
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
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    #[test_case("response_time", MetricName::ResponseTime)]
    #[test_case("cache_hit_rate", MetricName::CacheHitRate)]
    #[test_case("queue_length", MetricName::QueueLength)]
    fn test_metric_name_parse(input: &str, expected: MetricName) {
        assert_eq!(input.parse::<MetricName>().unwrap(), expected);
        assert_eq!(expected.to_string(), input);
    }

    #[test]
    fn test_metric_name_unknown() {
        let err = "latency".parse::<MetricName>().unwrap_err();
        assert_eq!(
            err,
            EngineError::UnknownMetric {
                name: "latency".to_string()
            }
        );
    }

    #[test]
    fn test_sample_drops_non_finite() {
        let sample = MetricSample::new(ts())
            .with_value(MetricName::CpuUsage, Some(f64::NAN))
            .with_value(MetricName::MemoryUsage, Some(f64::INFINITY))
            .with_value(MetricName::DiskUsage, Some(55.0));
        assert_eq!(sample.value(MetricName::CpuUsage), None);
        assert_eq!(sample.value(MetricName::MemoryUsage), None);
        assert_eq!(sample.value(MetricName::DiskUsage), Some(55.0));
        assert_eq!(sample.available_count(), 1);
        assert_eq!(sample.values.len(), 8);
    }

    #[test]
    fn test_sample_serializes_metric_names_as_keys() {
        let sample = MetricSample::new(ts()).with_value(MetricName::QueueLength, Some(3.0));
        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["values"]["queue_length"], 3.0);
        assert!(json["values"]["cpu_usage"].is_null());

        let back: MetricSample = serde_json::from_value(json).unwrap();
        assert_eq!(back, sample);
    }

    #[test]
    fn test_defaults_table() {
        let table = ThresholdTable::defaults();
        let rt = table.get(MetricName::ResponseTime).unwrap();
        assert_eq!(rt.warning_value, 500.0);
        assert_eq!(rt.critical_value, 1000.0);
        assert_eq!(rt.unit, Unit::Milliseconds);
        assert!(table.iter().all(|(_, t)| t.adaptive));
        assert!(table.iter().all(|(_, t)| t.validate().is_ok()));
        assert_eq!(table.iter().count(), 8);
    }

    #[test]
    fn test_error_rate_is_not_inverted() {
        let table = ThresholdTable::defaults();
        let error_rate = table.get(MetricName::ErrorRate).unwrap();
        assert!(!error_rate.inverted);
        assert_eq!(error_rate.classify(0.0), AlertLevel::Ok);
        assert_eq!(error_rate.classify(2.0), AlertLevel::Warning);
        assert_eq!(error_rate.classify(7.5), AlertLevel::Critical);
    }

    #[test_case(55.0, AlertLevel::Critical)]
    #[test_case(60.0, AlertLevel::Critical)]
    #[test_case(70.0, AlertLevel::Warning)]
    #[test_case(80.0, AlertLevel::Warning)]
    #[test_case(90.0, AlertLevel::Ok)]
    fn test_inverted_classification(value: f64, expected: AlertLevel) {
        let table = ThresholdTable::defaults();
        let cache = table.get(MetricName::CacheHitRate).unwrap();
        assert_eq!(cache.classify(value), expected);
    }

    #[test_case(499.9, AlertLevel::Ok)]
    #[test_case(500.0, AlertLevel::Warning)]
    #[test_case(1000.0, AlertLevel::Critical)]
    fn test_normal_classification(value: f64, expected: AlertLevel) {
        let table = ThresholdTable::defaults();
        let rt = table.get(MetricName::ResponseTime).unwrap();
        assert_eq!(rt.classify(value), expected);
    }

    #[test]
    fn test_threshold_validate_ordering() {
        let mut threshold = *ThresholdTable::defaults().get(MetricName::CpuUsage).unwrap();
        threshold.critical_value = 60.0;
        assert!(threshold.validate().is_err());

        let mut inverted = *ThresholdTable::defaults()
            .get(MetricName::CacheHitRate)
            .unwrap();
        inverted.critical_value = 90.0;
        assert!(inverted.validate().is_err());

        threshold.critical_value = f64::NAN;
        assert!(threshold.validate().is_err());
    }

    #[test]
    fn test_with_defaults_filled() {
        let mut partial = ThresholdTable(BTreeMap::new());
        partial.insert(
            MetricName::CpuUsage,
            Threshold::new(50.0, 60.0, Unit::Percent, false),
        );
        let filled = partial.with_defaults_filled();
        assert_eq!(filled.iter().count(), 8);
        assert_eq!(filled.get(MetricName::CpuUsage).unwrap().warning_value, 50.0);
    }

    #[test]
    fn test_outcome_serialization_tags() {
        let outcome = AnalysisResult::InsufficientData {
            current_samples: 3,
            required: 50,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "insufficient_data");
        assert_eq!(json["current_samples"], 3);
    }

    #[test]
    fn test_alert_level_ordering() {
        assert!(AlertLevel::Critical > AlertLevel::Warning);
        assert!(AlertLevel::Warning > AlertLevel::Ok);
    }
}
