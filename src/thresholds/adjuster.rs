//! Bounded, rate-limited threshold adjustment.
//!
//! Each adaptive metric moves between two states:
//!
//! ```text
//!   Eligible ──(adjustment applied)──▶ RateLimited { until }
//!      ▲                                     │
//!      └────────(until has passed)───────────┘
//! ```
//!
//! Transitions are purely time based. A forced run ignores the state.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::types::{
    MetricAnalysis, MetricName, PatternAnalysis, ProposedAdjustment, Threshold, ThresholdTable,
};
use crate::config::ThresholdConfig;

/// Relative change from `current` to `suggested`; `0.0` when `current` is 0.
#[must_use]
pub fn relative_change(current: f64, suggested: f64) -> f64 {
    if current == 0.0 {
        0.0
    } else {
        (suggested - current) / current
    }
}

/// Clamp a relative change to `±max_change`, keeping its sign.
#[must_use]
pub fn bounded_change(relative: f64, max_change: f64) -> f64 {
    relative.clamp(-max_change, max_change)
}

/// Rate-limit state of one metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AdjustmentState {
    /// May be adjusted now.
    Eligible,
    /// Adjusted recently.
    RateLimited {
        /// When the metric becomes eligible again.
        until: DateTime<Utc>,
    },
}

/// Per-metric time of the last applied adjustment.
///
/// Persisted alongside the thresholds so the rate limit survives restarts
/// and is shared by every process using the same store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdjustmentClock(BTreeMap<MetricName, DateTime<Utc>>);

impl AdjustmentClock {
    /// When a metric was last adjusted.
    #[must_use]
    pub fn last_adjusted(&self, metric: MetricName) -> Option<DateTime<Utc>> {
        self.0.get(&metric).copied()
    }

    /// Current state of a metric.
    #[must_use]
    pub fn state(
        &self,
        metric: MetricName,
        now: DateTime<Utc>,
        frequency_hours: u32,
    ) -> AdjustmentState {
        match self.last_adjusted(metric) {
            Some(last) => {
                let until = last + Duration::hours(i64::from(frequency_hours));
                if now < until {
                    AdjustmentState::RateLimited { until }
                } else {
                    AdjustmentState::Eligible
                }
            }
            None => AdjustmentState::Eligible,
        }
    }

    /// Whether a metric was adjusted within the last `frequency_hours`.
    #[must_use]
    pub fn is_rate_limited(
        &self,
        metric: MetricName,
        now: DateTime<Utc>,
        frequency_hours: u32,
    ) -> bool {
        matches!(
            self.state(metric, now, frequency_hours),
            AdjustmentState::RateLimited { .. }
        )
    }

    /// Stamp a metric as adjusted at `at`.
    pub fn record(&mut self, metric: MetricName, at: DateTime<Utc>) {
        self.0.insert(metric, at);
    }
}

/// Build a bounded proposal from one metric's analysis.
///
/// Warning and critical move independently toward their suggestions, each
/// by at most `max_change` of its current value. Returns `None` when the
/// analysis does not call for a change or when the result would break the
/// warning/critical ordering.
#[must_use]
pub fn propose(
    metric: MetricName,
    threshold: &Threshold,
    analysis: &MetricAnalysis,
    max_change: f64,
) -> Option<ProposedAdjustment> {
    if !analysis.needs_adjustment {
        return None;
    }

    let warning_change = bounded_change(
        relative_change(threshold.warning_value, analysis.suggested_warning),
        max_change,
    );
    let critical_change = bounded_change(
        relative_change(threshold.critical_value, analysis.suggested_critical),
        max_change,
    );
    let candidate = Threshold {
        warning_value: threshold.warning_value * (1.0 + warning_change),
        critical_value: threshold.critical_value * (1.0 + critical_change),
        ..*threshold
    };

    if let Err(reason) = candidate.validate() {
        tracing::warn!(
            metric = %metric,
            reason = %reason,
            "Dropping threshold proposal that breaks severity ordering"
        );
        return None;
    }

    Some(ProposedAdjustment {
        metric,
        old_warning: threshold.warning_value,
        new_warning: candidate.warning_value,
        old_critical: threshold.critical_value,
        new_critical: candidate.critical_value,
        confidence: analysis.confidence,
        reason: format!(
            "{}; warning {:+.1}%, critical {:+.1}%",
            analysis.rationale,
            warning_change * 100.0,
            critical_change * 100.0
        ),
    })
}

/// Proposals for every adaptive, eligible, analysed metric.
#[must_use]
pub fn plan_adjustments(
    analysis: &PatternAnalysis,
    thresholds: &ThresholdTable,
    clock: &AdjustmentClock,
    config: &ThresholdConfig,
    now: DateTime<Utc>,
    force: bool,
) -> Vec<ProposedAdjustment> {
    thresholds
        .iter()
        .filter(|(_, threshold)| threshold.adaptive)
        .filter_map(|(metric, threshold)| {
            if !force {
                if let AdjustmentState::RateLimited { until } =
                    clock.state(metric, now, config.adjustment_frequency_hours)
                {
                    tracing::debug!(metric = %metric, until = %until, "Metric is rate limited");
                    return None;
                }
            }
            let metric_analysis = analysis.metrics.get(&metric)?.analysis()?;
            propose(metric, threshold, metric_analysis, config.max_threshold_change)
        })
        .collect()
}

/// Whether proposals at `confidence` may be committed without review.
#[must_use]
pub fn should_auto_apply(confidence: f64, config: &ThresholdConfig) -> bool {
    config.auto_adjustment_enabled && confidence >= config.confidence_threshold
}

/// Commit proposals to the table and stamp the clock.
pub fn apply_proposals(
    thresholds: &mut ThresholdTable,
    clock: &mut AdjustmentClock,
    proposals: &[ProposedAdjustment],
    now: DateTime<Utc>,
) {
    for proposal in proposals {
        if let Some(current) = thresholds.get(proposal.metric).copied() {
            thresholds.insert(
                proposal.metric,
                Threshold {
                    warning_value: proposal.new_warning,
                    critical_value: proposal.new_critical,
                    ..current
                },
            );
            clock.record(proposal.metric, now);
        }
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
    use crate::thresholds::analyzer::analyze_metric;
    use crate::thresholds::types::MetricOutcome;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use test_case::test_case;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap()
    }

    fn analysis_for(metric: MetricName, values: &[f64]) -> MetricAnalysis {
        let table = ThresholdTable::defaults();
        match analyze_metric(metric, table.get(metric).unwrap(), values, 0.1) {
            MetricOutcome::Analyzed(a) => a,
            MetricOutcome::InsufficientData { .. } => panic!("expected analysis"),
        }
    }

    fn pattern(analyses: Vec<MetricAnalysis>) -> PatternAnalysis {
        PatternAnalysis {
            timestamp: now(),
            window_days: 14,
            sample_count: 100,
            confidence: 1.0,
            metrics: analyses
                .into_iter()
                .map(|a| (a.metric, MetricOutcome::Analyzed(a)))
                .collect(),
            anomalies: Vec::new(),
        }
    }

    #[test_case(-0.8, 0.3, -0.3)]
    #[test_case(0.5, 0.3, 0.3)]
    #[test_case(0.1, 0.3, 0.1)]
    #[test_case(-0.3, 0.3, -0.3)]
    fn test_bounded_change(relative: f64, max: f64, expected: f64) {
        assert_eq!(bounded_change(relative, max), expected);
    }

    #[test]
    fn test_relative_change_zero_current() {
        assert_eq!(relative_change(0.0, 10.0), 0.0);
        assert!((relative_change(500.0, 100.0) + 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_propose_clamps_both_values() {
        let table = ThresholdTable::defaults();
        let analysis = analysis_for(MetricName::ResponseTime, &[100.0; 100]);
        let proposal = propose(
            MetricName::ResponseTime,
            table.get(MetricName::ResponseTime).unwrap(),
            &analysis,
            0.3,
        )
        .unwrap();
        assert!((proposal.new_warning - 350.0).abs() < 1e-9);
        assert!((proposal.new_critical - 700.0).abs() < 1e-9);
        assert_eq!(proposal.old_warning, 500.0);
        assert_eq!(proposal.old_critical, 1000.0);
        assert!((proposal.confidence - 1.0).abs() < 1e-12);
        assert!(proposal.reason.contains("-30.0%"));
    }

    #[test]
    fn test_propose_skips_when_not_needed() {
        let table = ThresholdTable::defaults();
        let values: Vec<f64> = (0..10).map(|i| 440.0 + 10.0 * f64::from(i)).collect();
        let analysis = analysis_for(MetricName::ResponseTime, &values);
        assert!(!analysis.needs_adjustment);
        assert!(propose(
            MetricName::ResponseTime,
            table.get(MetricName::ResponseTime).unwrap(),
            &analysis,
            0.3
        )
        .is_none());
    }

    #[test]
    fn test_propose_drops_ordering_violation() {
        let table = ThresholdTable::defaults();
        let mut analysis = analysis_for(MetricName::CacheHitRate, &[50.0; 20]);
        analysis.suggested_warning = 55.0;
        analysis.suggested_critical = 90.0;
        assert!(propose(
            MetricName::CacheHitRate,
            table.get(MetricName::CacheHitRate).unwrap(),
            &analysis,
            0.3
        )
        .is_none());
    }

    #[test]
    fn test_clock_state_transitions() {
        let mut clock = AdjustmentClock::default();
        let metric = MetricName::CpuUsage;
        assert_eq!(clock.state(metric, now(), 6), AdjustmentState::Eligible);

        clock.record(metric, now());
        let until = now() + Duration::hours(6);
        assert_eq!(
            clock.state(metric, now() + Duration::hours(5), 6),
            AdjustmentState::RateLimited { until }
        );
        assert!(clock.is_rate_limited(metric, now() + Duration::minutes(359), 6));
        assert!(!clock.is_rate_limited(metric, until, 6));
        assert!(!clock.is_rate_limited(MetricName::DiskUsage, now(), 6));
    }

    #[test]
    fn test_plan_respects_rate_limit_unless_forced() {
        let analysis = pattern(vec![analysis_for(MetricName::ResponseTime, &[100.0; 100])]);
        let table = ThresholdTable::defaults();
        let config = ThresholdConfig::default();
        let mut clock = AdjustmentClock::default();
        clock.record(MetricName::ResponseTime, now() - Duration::hours(1));

        assert!(plan_adjustments(&analysis, &table, &clock, &config, now(), false).is_empty());
        assert_eq!(
            plan_adjustments(&analysis, &table, &clock, &config, now(), true).len(),
            1
        );
    }

    #[test]
    fn test_plan_skips_non_adaptive() {
        let analysis = pattern(vec![analysis_for(MetricName::ResponseTime, &[100.0; 100])]);
        let mut table = ThresholdTable::defaults();
        let mut rt = *table.get(MetricName::ResponseTime).unwrap();
        rt.adaptive = false;
        table.insert(MetricName::ResponseTime, rt);

        let plan = plan_adjustments(
            &analysis,
            &table,
            &AdjustmentClock::default(),
            &ThresholdConfig::default(),
            now(),
            true,
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn test_should_auto_apply() {
        let config = ThresholdConfig::default();
        assert!(should_auto_apply(0.8, &config));
        assert!(!should_auto_apply(0.79, &config));
        let manual = ThresholdConfig {
            auto_adjustment_enabled: false,
            ..config
        };
        assert!(!should_auto_apply(1.0, &manual));
    }

    #[test]
    fn test_apply_proposals_updates_table_and_clock() {
        let mut table = ThresholdTable::defaults();
        let mut clock = AdjustmentClock::default();
        let analysis = analysis_for(MetricName::ResponseTime, &[100.0; 100]);
        let proposal = propose(
            MetricName::ResponseTime,
            table.get(MetricName::ResponseTime).unwrap(),
            &analysis,
            0.3,
        )
        .unwrap();

        apply_proposals(&mut table, &mut clock, &[proposal], now());

        let rt = table.get(MetricName::ResponseTime).unwrap();
        assert!((rt.warning_value - 350.0).abs() < 1e-9);
        assert!(rt.adaptive);
        assert_eq!(clock.last_adjusted(MetricName::ResponseTime), Some(now()));
    }

    proptest! {
        #[test]
        fn prop_bounded_change_magnitude(relative in -10.0f64..10.0, max in 0.01f64..1.0) {
            let bounded = bounded_change(relative, max);
            if relative.abs() > max {
                prop_assert!((bounded.abs() - max).abs() < 1e-12);
                prop_assert_eq!(bounded.signum(), relative.signum());
            } else {
                prop_assert_eq!(bounded, relative);
            }
        }

        #[test]
        fn prop_proposal_never_exceeds_step(
            values in prop::collection::vec(1.0f64..5000.0, 10..120),
            max in 0.05f64..0.9,
        ) {
            let table = ThresholdTable::defaults();
            let threshold = table.get(MetricName::ResponseTime).unwrap();
            let analysis = match analyze_metric(MetricName::ResponseTime, threshold, &values, 0.1) {
                MetricOutcome::Analyzed(a) => a,
                MetricOutcome::InsufficientData { .. } => unreachable!(),
            };
            if let Some(p) = propose(MetricName::ResponseTime, threshold, &analysis, max) {
                prop_assert!((p.new_warning - p.old_warning).abs() <= p.old_warning * max + 1e-9);
                prop_assert!((p.new_critical - p.old_critical).abs() <= p.old_critical * max + 1e-9);
                prop_assert!(p.new_critical >= p.new_warning);
            }
        }
    }
}
