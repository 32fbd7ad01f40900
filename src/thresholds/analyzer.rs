//! Statistical analysis of metric history.
//!
//! Turns a window of [`MetricSample`]s into per-metric statistics, suggested
//! thresholds, outlier reports, and a confidence score. Pure functions; the
//! manager supplies the window and the current thresholds.

#![allow(clippy::cast_precision_loss)]

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::stats;
use super::types::{
    AnalysisResult, AnomalyReport, MetricAnalysis, MetricName, MetricOutcome, MetricSample,
    Outlier, PatternAnalysis, Threshold, ThresholdTable,
};
use crate::config::ThresholdConfig;

/// Readings needed before a metric is analysed.
pub const MIN_ANALYSIS_SAMPLES: usize = 10;

/// Readings needed before outlier detection runs for a metric.
pub const MIN_ANOMALY_SAMPLES: usize = 20;

/// Relative warning deviation above which a metric needs adjustment.
pub const ADJUSTMENT_DEVIATION: f64 = 0.2;

/// Z-score above which a reading is an outlier.
pub const OUTLIER_Z_SCORE: f64 = 3.0;

/// Sample count at which the size factor of confidence saturates.
pub const FULL_CONFIDENCE_SAMPLES: f64 = 100.0;

/// Largest confidence penalty for variability.
pub const MAX_VARIABILITY_PENALTY: f64 = 0.5;

/// Readings for one metric, oldest first, skipping unavailable ones.
#[must_use]
pub fn metric_values(samples: &[MetricSample], metric: MetricName) -> Vec<f64> {
    samples.iter().filter_map(|s| s.value(metric)).collect()
}

/// Confidence in a suggestion.
///
/// `min(1, n / 100) * (1 - min(0.5, std_dev / mean))`. A mean at or below
/// zero makes the coefficient of variation meaningless, so the variability
/// penalty is taken at its maximum.
#[must_use]
pub fn confidence(sample_count: usize, mean: f64, std_dev: f64) -> f64 {
    let size_factor = (sample_count as f64 / FULL_CONFIDENCE_SAMPLES).min(1.0);
    let penalty = if mean > 0.0 {
        (std_dev / mean).min(MAX_VARIABILITY_PENALTY)
    } else {
        MAX_VARIABILITY_PENALTY
    };
    size_factor * (1.0 - penalty)
}

/// Analyse one metric's readings against its current threshold.
///
/// Returns [`MetricOutcome::InsufficientData`] below
/// [`MIN_ANALYSIS_SAMPLES`] readings; no suggestion is made in that case.
#[must_use]
pub fn analyze_metric(
    metric: MetricName,
    threshold: &Threshold,
    values: &[f64],
    sensitivity: f64,
) -> MetricOutcome {
    if values.len() < MIN_ANALYSIS_SAMPLES {
        return MetricOutcome::InsufficientData {
            samples: values.len(),
        };
    }

    let sorted = stats::sorted(values);
    let mean = stats::mean(values);
    let std_dev = stats::std_dev(values);
    let slope = stats::slope(values);
    let trend = stats::classify_trend(slope, sensitivity);

    let (suggested_warning, suggested_critical) = if threshold.inverted {
        (stats::percentile(&sorted, 25.0), stats::percentile(&sorted, 10.0))
    } else {
        (stats::percentile(&sorted, 80.0), stats::percentile(&sorted, 95.0))
    };

    let current_warning = threshold.warning_value;
    let threshold_deviation = if current_warning == 0.0 {
        0.0
    } else {
        (current_warning - suggested_warning).abs() / current_warning.abs()
    };
    let needs_adjustment = threshold_deviation > ADJUSTMENT_DEVIATION;

    let unit = threshold.unit;
    let rationale = if needs_adjustment {
        format!(
            "suggested warning {suggested_warning:.2}{unit} deviates {:.1}% from current {current_warning:.2}{unit} (trend: {trend})",
            threshold_deviation * 100.0
        )
    } else {
        format!(
            "current warning {current_warning:.2}{unit} is within {:.0}% of suggested {suggested_warning:.2}{unit} (trend: {trend})",
            ADJUSTMENT_DEVIATION * 100.0
        )
    };

    MetricOutcome::Analyzed(MetricAnalysis {
        metric,
        sample_count: values.len(),
        mean,
        median: stats::median(&sorted),
        std_dev,
        p80: stats::percentile(&sorted, 80.0),
        p95: stats::percentile(&sorted, 95.0),
        p99: stats::percentile(&sorted, 99.0),
        slope,
        trend,
        seasonality: stats::seasonality(values),
        current_warning,
        current_critical: threshold.critical_value,
        suggested_warning,
        suggested_critical,
        threshold_deviation,
        needs_adjustment,
        confidence: confidence(values.len(), mean, std_dev),
        rationale,
    })
}

/// Z-score outlier detection for every metric.
///
/// Metrics with fewer than [`MIN_ANOMALY_SAMPLES`] readings or zero
/// variance are skipped. Only metrics with at least one outlier are
/// reported. `index` is the reading's position among that metric's
/// available readings.
#[must_use]
pub fn detect_anomalies(history: &[MetricSample]) -> Vec<AnomalyReport> {
    MetricName::ALL
        .into_iter()
        .filter_map(|metric| {
            let readings: Vec<(DateTime<Utc>, f64)> = history
                .iter()
                .filter_map(|s| s.value(metric).map(|v| (s.timestamp, v)))
                .collect();
            if readings.len() < MIN_ANOMALY_SAMPLES {
                return None;
            }

            let values: Vec<f64> = readings.iter().map(|(_, v)| *v).collect();
            let mean = stats::mean(&values);
            let std_dev = stats::std_dev(&values);
            if std_dev == 0.0 {
                return None;
            }

            let outliers: Vec<Outlier> = readings
                .iter()
                .enumerate()
                .filter_map(|(index, (timestamp, value))| {
                    let z_score = (value - mean).abs() / std_dev;
                    (z_score > OUTLIER_Z_SCORE).then(|| Outlier {
                        index,
                        value: *value,
                        z_score,
                        timestamp: *timestamp,
                    })
                })
                .collect();
            if outliers.is_empty() {
                return None;
            }

            Some(AnomalyReport {
                metric,
                total_outliers: outliers.len(),
                outlier_rate: outliers.len() as f64 / values.len() as f64,
                sample_count: values.len(),
                outliers,
            })
        })
        .collect()
}

/// Mean confidence of the analysed metrics; `0.0` when none were analysed.
#[must_use]
pub fn overall_confidence<'a>(outcomes: impl IntoIterator<Item = &'a MetricOutcome>) -> f64 {
    let (sum, count) = outcomes
        .into_iter()
        .filter_map(MetricOutcome::analysis)
        .fold((0.0, 0_usize), |(sum, count), a| (sum + a.confidence, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Full analysis of a learning window.
///
/// `samples` must already be restricted to the window. Returns
/// [`AnalysisResult::InsufficientData`] when the window holds fewer than
/// `config.min_samples_for_adjustment` samples.
#[must_use]
pub fn analyze_history(
    samples: &[MetricSample],
    thresholds: &ThresholdTable,
    config: &ThresholdConfig,
    now: DateTime<Utc>,
) -> AnalysisResult {
    if samples.len() < config.min_samples_for_adjustment {
        return AnalysisResult::InsufficientData {
            current_samples: samples.len(),
            required: config.min_samples_for_adjustment,
        };
    }

    let metrics: BTreeMap<MetricName, MetricOutcome> = thresholds
        .iter()
        .map(|(metric, threshold)| {
            let values = metric_values(samples, metric);
            (
                metric,
                analyze_metric(metric, threshold, &values, config.adjustment_sensitivity),
            )
        })
        .collect();

    let anomalies = if config.anomaly_detection_enabled {
        detect_anomalies(samples)
    } else {
        Vec::new()
    };

    AnalysisResult::Complete(PatternAnalysis {
        timestamp: now,
        window_days: config.learning_window_days,
        sample_count: samples.len(),
        confidence: overall_confidence(metrics.values()),
        metrics,
        anomalies,
    })
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
    use crate::thresholds::types::{Seasonality, Trend};
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn series(metric: MetricName, values: &[f64]) -> Vec<MetricSample> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                MetricSample::new(start() + Duration::minutes(5 * i64::try_from(i).unwrap()))
                    .with_value(metric, Some(*v))
            })
            .collect()
    }

    fn threshold(metric: MetricName) -> Threshold {
        *ThresholdTable::defaults().get(metric).unwrap()
    }

    #[test]
    fn test_insufficient_data_below_ten() {
        let values = [100.0; 9];
        let outcome = analyze_metric(
            MetricName::ResponseTime,
            &threshold(MetricName::ResponseTime),
            &values,
            0.1,
        );
        assert_eq!(outcome, MetricOutcome::InsufficientData { samples: 9 });
        assert!(outcome.analysis().is_none());
    }

    #[test]
    fn test_analysis_of_constant_series() {
        let values = [100.0; 50];
        let outcome = analyze_metric(
            MetricName::ResponseTime,
            &threshold(MetricName::ResponseTime),
            &values,
            0.1,
        );
        let a = outcome.analysis().unwrap();
        assert_eq!(a.sample_count, 50);
        assert_eq!(a.mean, 100.0);
        assert_eq!(a.median, 100.0);
        assert_eq!(a.std_dev, 0.0);
        assert_eq!(a.suggested_warning, 100.0);
        assert_eq!(a.suggested_critical, 100.0);
        assert_eq!(a.trend, Trend::Stable);
        assert_eq!(a.seasonality, Seasonality::None);
        assert!((a.threshold_deviation - 0.8).abs() < 1e-12);
        assert!(a.needs_adjustment);
        assert!((a.confidence - 0.5).abs() < 1e-12);
        assert!(a.rationale.contains("deviates"));
    }

    #[test]
    fn test_inverted_metric_uses_lower_percentiles() {
        let values: Vec<f64> = (1..=100).map(f64::from).collect();
        let outcome = analyze_metric(
            MetricName::CacheHitRate,
            &threshold(MetricName::CacheHitRate),
            &values,
            0.1,
        );
        let a = outcome.analysis().unwrap();
        assert!((a.suggested_warning - 25.75).abs() < 1e-9);
        assert!((a.suggested_critical - 10.9).abs() < 1e-9);
        assert_eq!(a.trend, Trend::Increasing);
    }

    #[test]
    fn test_small_deviation_does_not_need_adjustment() {
        // p80 of 440..=530 is 512: 2.4% from 500
        let values: Vec<f64> = (0..10).map(|i| 440.0 + 10.0 * f64::from(i)).collect();
        let a = analyze_metric(
            MetricName::ResponseTime,
            &threshold(MetricName::ResponseTime),
            &values,
            100.0,
        );
        let a = a.analysis().unwrap();
        assert!(!a.needs_adjustment);
        assert!(a.rationale.contains("within 20%"));
    }

    #[test]
    fn test_zero_warning_means_no_deviation() {
        let mut t = threshold(MetricName::QueueLength);
        t.warning_value = 0.0;
        let a = analyze_metric(MetricName::QueueLength, &t, &[5.0; 20], 0.1);
        let a = a.analysis().unwrap();
        assert_eq!(a.threshold_deviation, 0.0);
        assert!(!a.needs_adjustment);
    }

    #[test]
    fn test_confidence_formula() {
        assert!((confidence(50, 100.0, 0.0) - 0.5).abs() < 1e-12);
        assert!((confidence(200, 100.0, 0.0) - 1.0).abs() < 1e-12);
        assert!((confidence(100, 100.0, 20.0) - 0.8).abs() < 1e-12);
        // Variability penalty is capped at 0.5.
        assert!((confidence(100, 10.0, 50.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_confidence_with_zero_mean_takes_max_penalty() {
        assert!((confidence(100, 0.0, 0.0) - 0.5).abs() < 1e-12);
        assert!((confidence(40, 0.0, 3.0) - 0.2).abs() < 1e-12);
        assert!((confidence(100, -5.0, 1.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_detect_anomalies_flags_single_spike() {
        let cluster = [35.0, 37.0, 39.0, 41.0, 43.0, 45.0];
        let mut values: Vec<f64> = cluster.iter().cycle().take(24).copied().collect();
        values.insert(17, 95.0);
        let history = series(MetricName::CpuUsage, &values);

        let reports = detect_anomalies(&history);
        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert_eq!(report.metric, MetricName::CpuUsage);
        assert_eq!(report.total_outliers, 1);
        assert_eq!(report.sample_count, 25);
        assert!((report.outlier_rate - 0.04).abs() < 1e-12);

        let outlier = &report.outliers[0];
        assert_eq!(outlier.value, 95.0);
        assert_eq!(outlier.index, 17);
        assert_eq!(outlier.timestamp, history[17].timestamp);
        assert!(outlier.z_score > 3.0);
    }

    #[test]
    fn test_detect_anomalies_skips_short_and_flat_series() {
        let mut short: Vec<f64> = vec![40.0; 18];
        short.push(500.0);
        assert!(detect_anomalies(&series(MetricName::CpuUsage, &short)).is_empty());
        assert!(detect_anomalies(&series(MetricName::CpuUsage, &[40.0; 30])).is_empty());
    }

    #[test]
    fn test_anomaly_index_counts_only_available_readings() {
        let mut history = series(MetricName::MemoryUsage, &[50.0; 30]);
        for sample in history.iter_mut().take(5) {
            sample.set(MetricName::MemoryUsage, None);
        }
        history[20].set(MetricName::MemoryUsage, Some(99.0));
        history[21].set(MetricName::MemoryUsage, Some(51.0));
        let reports = detect_anomalies(&history);
        let outlier = &reports[0].outliers[0];
        assert_eq!(outlier.index, 15);
        assert_eq!(outlier.timestamp, history[20].timestamp);
    }

    #[test]
    fn test_overall_confidence_excludes_insufficient() {
        let analysed = analyze_metric(
            MetricName::ResponseTime,
            &threshold(MetricName::ResponseTime),
            &[100.0; 60],
            0.1,
        );
        let outcomes = [
            analysed,
            MetricOutcome::InsufficientData { samples: 2 },
        ];
        assert!((overall_confidence(&outcomes) - 0.6).abs() < 1e-12);
        assert_eq!(overall_confidence(&Vec::<MetricOutcome>::new()), 0.0);
    }

    #[test]
    fn test_analyze_history_gate() {
        let config = ThresholdConfig::default();
        let history = series(MetricName::ResponseTime, &[100.0; 49]);
        let result = analyze_history(&history, &ThresholdTable::defaults(), &config, start());
        assert_eq!(
            result,
            AnalysisResult::InsufficientData {
                current_samples: 49,
                required: 50
            }
        );
    }

    #[test]
    fn test_analyze_history_complete() {
        let config = ThresholdConfig::default();
        let history = series(MetricName::ResponseTime, &[100.0; 50]);
        let AnalysisResult::Complete(analysis) =
            analyze_history(&history, &ThresholdTable::defaults(), &config, start())
        else {
            panic!("expected a complete analysis");
        };
        assert_eq!(analysis.sample_count, 50);
        assert_eq!(analysis.metrics.len(), 8);
        assert!(analysis.metrics[&MetricName::ResponseTime].analysis().is_some());
        assert_eq!(
            analysis.metrics[&MetricName::CpuUsage],
            MetricOutcome::InsufficientData { samples: 0 }
        );
        assert!((analysis.confidence - 0.5).abs() < 1e-12);
        assert!(analysis.anomalies.is_empty());
    }

    #[test]
    fn test_analyze_history_respects_anomaly_flag() {
        let mut values = vec![40.0; 40];
        values[10] = 41.0;
        values[30] = 400.0;
        let history = series(MetricName::CpuUsage, &values);
        let config = ThresholdConfig {
            min_samples_for_adjustment: 10,
            ..ThresholdConfig::default()
        };

        let AnalysisResult::Complete(with) =
            analyze_history(&history, &ThresholdTable::defaults(), &config, start())
        else {
            panic!("expected a complete analysis");
        };
        assert_eq!(with.anomalies.len(), 1);

        let disabled = ThresholdConfig {
            anomaly_detection_enabled: false,
            ..config
        };
        let AnalysisResult::Complete(without) =
            analyze_history(&history, &ThresholdTable::defaults(), &disabled, start())
        else {
            panic!("expected a complete analysis");
        };
        assert!(without.anomalies.is_empty());
    }
}
