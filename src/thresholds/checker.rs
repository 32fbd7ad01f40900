//! Threshold evaluation.

use super::types::{Alert, AlertLevel, CheckResult, MetricSample, ThresholdTable};

/// Classify every available reading in `sample` and aggregate the alerts.
///
/// Unavailable readings are skipped. The overall status is the worst alert
/// level, or `ok` when there are no alerts.
#[must_use]
pub fn check_sample(sample: &MetricSample, thresholds: &ThresholdTable) -> CheckResult {
    let mut alerts = Vec::new();
    let mut metrics_checked = 0;

    for (metric, threshold) in thresholds.iter() {
        let Some(value) = sample.value(metric) else {
            continue;
        };
        metrics_checked += 1;

        let level = threshold.classify(value);
        let breached = match level {
            AlertLevel::Ok => continue,
            AlertLevel::Warning => threshold.warning_value,
            AlertLevel::Critical => threshold.critical_value,
        };
        let relation = if threshold.inverted { "below" } else { "above" };
        let unit = threshold.unit;
        alerts.push(Alert {
            metric,
            level,
            value,
            threshold: breached,
            unit,
            message: format!(
                "{metric} is {level}: {value:.2}{unit} is at or {relation} the {level} threshold of {breached:.2}{unit}"
            ),
        });
    }

    let critical_count = alerts
        .iter()
        .filter(|a| a.level == AlertLevel::Critical)
        .count();
    let warning_count = alerts.len() - critical_count;
    let status = alerts
        .iter()
        .map(|a| a.level)
        .max()
        .unwrap_or(AlertLevel::Ok);

    CheckResult {
        timestamp: sample.timestamp,
        status,
        alerts,
        critical_count,
        warning_count,
        metrics_checked,
    }
}
