//! Help text for CLI commands.

/// Get help text for CLI commands.
#[must_use]
pub const fn help_text() -> &'static str {
    r#"perf-thresholds: adaptive performance thresholds

Usage: perf-thresholds [--json] COMMAND [options]

Commands:
  collect             Collect and store one metric sample now

  analyze             Analyze patterns over the learning window

  adjust [options]    Propose and (if confident) apply threshold changes
    --force, -f         Ignore the per-metric rate limit

  check               Check current metrics against thresholds

  status              Show engine status

  thresholds          Show current thresholds

  config              Show engine configuration

  config set KEY=VALUE...
                      Update engine configuration
                      Keys: learning_window_days, adjustment_sensitivity,
                            min_samples_for_adjustment, max_threshold_change,
                            adjustment_frequency_hours, confidence_threshold,
                            anomaly_detection_enabled, auto_adjustment_enabled

  set-threshold METRIC WARNING CRITICAL
                      Override one metric's thresholds

  history [options]   Show the adjustment audit log
    --limit, -l N       Maximum records to show

  run [options]       Run the collection scheduler until Ctrl-C
    --interval, -i D    Collection period, e.g. "30s", "5m", "1h"

  help                Show this message

Global options:
  --json              Print results as JSON

Examples:
  perf-thresholds check
  perf-thresholds --json status
  perf-thresholds adjust --force
  perf-thresholds config set confidence_threshold=0.7 auto_adjustment_enabled=false
  perf-thresholds set-threshold response_time 400 900
  perf-thresholds run --interval 1m
"#
}
