//! Plain-text rendering of command results.
//!
//! `--json` output bypasses this module and serializes the result directly.

use std::fmt::Write as _;

use crate::config::ThresholdConfig;
use crate::thresholds::{
    AdjustmentOutcome, AdjustmentRecord, AlertLevel, AnalysisResult, CheckResult, MetricName,
    MetricOutcome, MetricSample, ProposedAdjustment, Seasonality, ServiceStatus, StatusSnapshot,
    ThresholdTable, Unit,
};

use super::duration::format_duration;

fn with_unit(value: f64, unit: Unit) -> String {
    match unit {
        Unit::Items => format!("{value:.1} {}", unit.symbol()),
        Unit::Milliseconds | Unit::Percent => format!("{value:.1}{}", unit.symbol()),
    }
}

fn unit_of(table: &ThresholdTable, metric: MetricName) -> Unit {
    table
        .get(metric)
        .map_or(Unit::Items, |threshold| threshold.unit)
}

/// Render one sample, with units taken from `thresholds`.
#[must_use]
pub fn render_sample(sample: &MetricSample, thresholds: &ThresholdTable) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Sample at {}", sample.timestamp.to_rfc3339());
    for metric in MetricName::ALL {
        let value = sample.value(metric).map_or_else(
            || "unavailable".to_string(),
            |v| with_unit(v, unit_of(thresholds, metric)),
        );
        let _ = writeln!(out, "  {:<16} {value}", metric.as_str());
    }
    out
}

/// Render an analysis result.
#[must_use]
pub fn render_analysis(result: &AnalysisResult) -> String {
    let analysis = match result {
        AnalysisResult::Complete(analysis) => analysis,
        AnalysisResult::InsufficientData {
            current_samples,
            required,
        } => {
            return format!("Insufficient data: {current_samples} of {required} samples\n");
        }
    };

    let mut out = String::new();
    let _ = writeln!(
        out,
        "Analysis of {} samples over {} days (confidence {:.2})",
        analysis.sample_count, analysis.window_days, analysis.confidence
    );

    for (metric, outcome) in &analysis.metrics {
        match outcome {
            MetricOutcome::InsufficientData { samples } => {
                let _ = writeln!(out, "  {metric}: insufficient data ({samples} readings)");
            }
            MetricOutcome::Analyzed(m) => {
                let seasonality = match m.seasonality {
                    Seasonality::Periodic { lag } => format!(", periodic (lag {lag})"),
                    Seasonality::None | Seasonality::InsufficientData => String::new(),
                };
                let _ = writeln!(
                    out,
                    "  {metric}: mean {:.2}, median {:.2}, std dev {:.2}, {}{seasonality}",
                    m.mean, m.median, m.std_dev, m.trend
                );
                let _ = writeln!(
                    out,
                    "    current {:.2}/{:.2}, suggested {:.2}/{:.2}, confidence {:.2}{}",
                    m.current_warning,
                    m.current_critical,
                    m.suggested_warning,
                    m.suggested_critical,
                    m.confidence,
                    if m.needs_adjustment {
                        " (needs adjustment)"
                    } else {
                        ""
                    }
                );
            }
        }
    }

    for report in &analysis.anomalies {
        let _ = writeln!(
            out,
            "  anomalies in {}: {} of {} readings ({:.1}%)",
            report.metric,
            report.total_outliers,
            report.sample_count,
            report.outlier_rate * 100.0
        );
    }

    out
}

fn render_proposal(out: &mut String, proposal: &ProposedAdjustment) {
    let _ = writeln!(
        out,
        "    {}: warning {:.2} -> {:.2}, critical {:.2} -> {:.2} ({})",
        proposal.metric,
        proposal.old_warning,
        proposal.new_warning,
        proposal.old_critical,
        proposal.new_critical,
        proposal.reason
    );
}

fn render_record(out: &mut String, record: &AdjustmentRecord) {
    let _ = writeln!(
        out,
        "{} {} confidence {:.2}/{:.2}, {} proposed, {} applied{}",
        record.timestamp.to_rfc3339(),
        record.id,
        record.confidence,
        record.confidence_threshold,
        record.proposed_adjustments.len(),
        record.applied_adjustments.len(),
        if record.auto_applied { "" } else { " (not auto-applied)" }
    );
    let shown = if record.applied_adjustments.is_empty() {
        &record.proposed_adjustments
    } else {
        &record.applied_adjustments
    };
    for proposal in shown {
        render_proposal(out, proposal);
    }
}

/// Render an adjustment outcome.
#[must_use]
pub fn render_adjustment(outcome: &AdjustmentOutcome) -> String {
    match outcome {
        AdjustmentOutcome::InsufficientData {
            current_samples,
            required,
        } => format!("Insufficient data: {current_samples} of {required} samples\n"),
        AdjustmentOutcome::Completed(record) => {
            let mut out = String::new();
            render_record(&mut out, record);
            out
        }
    }
}

/// Render a threshold check.
#[must_use]
pub fn render_check(check: &CheckResult) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Status: {} ({} checked, {} critical, {} warning)",
        check.status, check.metrics_checked, check.critical_count, check.warning_count
    );
    for alert in &check.alerts {
        let marker = match alert.level {
            AlertLevel::Critical => "CRIT",
            AlertLevel::Warning => "WARN",
            AlertLevel::Ok => "OK",
        };
        let _ = writeln!(out, "  [{marker}] {}", alert.message);
    }
    out
}

/// Render the threshold table.
#[must_use]
pub fn render_thresholds(table: &ThresholdTable) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<16} {:>12} {:>12}  flags",
        "metric", "warning", "critical"
    );
    for (metric, threshold) in table.iter() {
        let mut flags = Vec::new();
        if threshold.adaptive {
            flags.push("adaptive");
        }
        if threshold.inverted {
            flags.push("inverted");
        }
        let _ = writeln!(
            out,
            "{:<16} {:>12} {:>12}  {}",
            metric.as_str(),
            with_unit(threshold.warning_value, threshold.unit),
            with_unit(threshold.critical_value, threshold.unit),
            flags.join(",")
        );
    }
    out
}

/// Render the engine configuration.
#[must_use]
pub fn render_config(config: &ThresholdConfig) -> String {
    let frequency = std::time::Duration::from_secs(u64::from(config.adjustment_frequency_hours) * 3600);
    let mut out = String::new();
    let _ = writeln!(out, "learning_window_days       {}", config.learning_window_days);
    let _ = writeln!(out, "adjustment_sensitivity     {}", config.adjustment_sensitivity);
    let _ = writeln!(
        out,
        "min_samples_for_adjustment {}",
        config.min_samples_for_adjustment
    );
    let _ = writeln!(out, "max_threshold_change       {}", config.max_threshold_change);
    let _ = writeln!(
        out,
        "adjustment_frequency_hours {} ({})",
        config.adjustment_frequency_hours,
        format_duration(frequency)
    );
    let _ = writeln!(out, "confidence_threshold       {}", config.confidence_threshold);
    let _ = writeln!(
        out,
        "anomaly_detection_enabled  {}",
        config.anomaly_detection_enabled
    );
    let _ = writeln!(
        out,
        "auto_adjustment_enabled    {}",
        config.auto_adjustment_enabled
    );
    out
}

/// Render the adjustment audit log, newest first.
#[must_use]
pub fn render_history(records: &[AdjustmentRecord]) -> String {
    if records.is_empty() {
        return "No adjustments recorded\n".to_string();
    }
    let mut out = String::new();
    for record in records {
        render_record(&mut out, record);
    }
    out
}

/// Render an engine status snapshot.
#[must_use]
pub fn render_status(status: &StatusSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Status at {}", status.timestamp.to_rfc3339());

    match (&status.threshold_check, &status.collection_error) {
        (Some(check), _) => {
            out.push_str(&render_check(check));
        }
        (None, Some(error)) => {
            let _ = writeln!(out, "Collection failed: {error}");
        }
        (None, None) => {}
    }

    let _ = writeln!(
        out,
        "Auto adjustment: {}",
        if status.auto_adjustment_enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
    let _ = writeln!(
        out,
        "Last adjustment: {}",
        status
            .last_adjustment
            .map_or_else(|| "never".to_string(), |at| at.to_rfc3339())
    );
    let _ = writeln!(out, "Adjustments recorded: {}", status.total_adjustments);
    let _ = writeln!(out, "History samples: {}", status.history_samples);
    for (metric, count) in &status.samples_per_metric {
        let _ = writeln!(out, "  {:<16} {count}", metric.as_str());
    }
    out
}

/// Render the scheduler's counters.
#[must_use]
pub fn render_service_status(status: &ServiceStatus) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Scheduler {}: {} cycles ({} ok, {} failed)",
        if status.running { "running" } else { "stopped" },
        status.total_cycles,
        status.successful_cycles,
        status.failed_cycles
    );
    if let Some(at) = status.last_cycle_at {
        let _ = writeln!(out, "Last cycle: {}", at.to_rfc3339());
    }
    if let Some(level) = status.last_check_status {
        let _ = writeln!(out, "Last check: {level}");
    }
    if let Some(error) = &status.last_error {
        let _ = writeln!(out, "Last error: {error}");
    }
    out
}
