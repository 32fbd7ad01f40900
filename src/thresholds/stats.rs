//! Descriptive statistics over metric readings.
//!
//! All functions are total: empty input yields `0.0` (or `None` where a
//! statistic is undefined) rather than panicking.

#![allow(clippy::cast_precision_loss)]

use super::types::{Seasonality, Trend};

/// Lag checked for a daily cycle, assuming hourly samples.
pub const SEASONAL_LAG: usize = 24;

/// Autocorrelation at [`SEASONAL_LAG`] at or above this counts as periodic.
pub const SEASONAL_CORRELATION: f64 = 0.5;

/// Arithmetic mean.
#[must_use]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation; `0.0` for fewer than two values.
#[must_use]
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Copy and sort ascending. NaN never reaches here, so `total_cmp` orders
/// the same as numeric comparison.
#[must_use]
pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    out.sort_by(f64::total_cmp);
    out
}

/// Linear-interpolation percentile of an ascending slice.
///
/// `k = (n - 1) * p / 100`, `f = floor(k)`; the result is
/// `v[f] + (k - f) * (v[f + 1] - v[f])`, or `v[f]` when `f` is the last
/// index. `p` is clamped to `[0, 100]`.
#[must_use]
pub fn percentile(sorted_values: &[f64], p: f64) -> f64 {
    let Some(last) = sorted_values.len().checked_sub(1) else {
        return 0.0;
    };
    let k = last as f64 * p.clamp(0.0, 100.0) / 100.0;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let f = (k.floor() as usize).min(last);
    if f == last {
        return sorted_values[last];
    }
    let c = k - f as f64;
    sorted_values[f] + c * (sorted_values[f + 1] - sorted_values[f])
}

/// Median of an ascending slice.
#[must_use]
pub fn median(sorted_values: &[f64]) -> f64 {
    percentile(sorted_values, 50.0)
}

/// Least-squares slope of `value` against sample index.
#[must_use]
pub fn slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = mean(values);
    let (num, den) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, y)| {
            let dx = i as f64 - x_mean;
            (num + dx * (y - y_mean), den + dx * dx)
        });
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// Classify a slope against a symmetric cutoff.
#[must_use]
pub fn classify_trend(slope: f64, sensitivity: f64) -> Trend {
    if slope > sensitivity {
        Trend::Increasing
    } else if slope < -sensitivity {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

/// Sample autocorrelation at `lag`, or `None` when undefined.
#[must_use]
pub fn autocorrelation(values: &[f64], lag: usize) -> Option<f64> {
    if lag == 0 || values.len() <= lag {
        return None;
    }
    let m = mean(values);
    let denom: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    if denom == 0.0 {
        return None;
    }
    let numer: f64 = values
        .iter()
        .zip(values.iter().skip(lag))
        .map(|(a, b)| (a - m) * (b - m))
        .sum();
    Some(numer / denom)
}

/// Daily-cycle detection.
///
/// Needs one cycle to say anything and two cycles to find a pattern.
#[must_use]
pub fn seasonality(values: &[f64]) -> Seasonality {
    if values.len() < SEASONAL_LAG {
        return Seasonality::InsufficientData;
    }
    if values.len() < SEASONAL_LAG * 2 {
        return Seasonality::None;
    }
    match autocorrelation(values, SEASONAL_LAG) {
        Some(r) if r >= SEASONAL_CORRELATION => Seasonality::Periodic { lag: SEASONAL_LAG },
        _ => Seasonality::None,
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::float_cmp,
    clippy::cast_precision_loss
)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_percentile_reference_values() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!((percentile(&v, 95.0) - 4.8).abs() < EPS);
        assert!((percentile(&v, 50.0) - 3.0).abs() < EPS);
        assert!((median(&v) - 3.0).abs() < EPS);
        assert_eq!(percentile(&v, 100.0), 5.0);
        assert_eq!(percentile(&v, 0.0), 1.0);
    }

    #[test]
    fn test_percentile_empty_and_single() {
        assert_eq!(percentile(&[], 50.0), 0.0);
        assert_eq!(percentile(&[7.0], 99.0), 7.0);
    }

    #[test]
    fn test_median_even_length_interpolates() {
        assert!((median(&[1.0, 2.0, 3.0, 4.0]) - 2.5).abs() < EPS);
    }

    #[test]
    fn test_std_dev_population() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((std_dev(&v) - 2.0).abs() < EPS);
        assert_eq!(std_dev(&[3.0]), 0.0);
        assert_eq!(std_dev(&[]), 0.0);
    }

    #[test]
    fn test_slope_linear_series() {
        let v: Vec<f64> = (0..20).map(|i| 3.0 + 0.5 * f64::from(i)).collect();
        assert!((slope(&v) - 0.5).abs() < EPS);
        assert_eq!(slope(&[4.0; 10]), 0.0);
        assert_eq!(slope(&[1.0]), 0.0);
    }

    #[test_case(0.2, Trend::Increasing)]
    #[test_case(-0.2, Trend::Decreasing)]
    #[test_case(0.1, Trend::Stable)]
    #[test_case(-0.1, Trend::Stable)]
    #[test_case(0.0, Trend::Stable)]
    fn test_classify_trend(slope: f64, expected: Trend) {
        assert_eq!(classify_trend(slope, 0.1), expected);
    }

    #[test]
    fn test_seasonality_thresholds() {
        assert_eq!(seasonality(&[1.0; 23]), Seasonality::InsufficientData);
        assert_eq!(seasonality(&[1.0; 30]), Seasonality::None);
        // Constant series has no variance, so no autocorrelation.
        assert_eq!(seasonality(&[1.0; 96]), Seasonality::None);
    }

    #[test]
    fn test_seasonality_detects_daily_cycle() {
        let v: Vec<f64> = (0..96)
            .map(|i| (f64::from(i % 24) * std::f64::consts::TAU / 24.0).sin() * 10.0 + 50.0)
            .collect();
        assert_eq!(seasonality(&v), Seasonality::Periodic { lag: 24 });
    }

    #[test]
    fn test_autocorrelation_undefined() {
        assert_eq!(autocorrelation(&[1.0, 2.0], 0), None);
        assert_eq!(autocorrelation(&[1.0, 2.0], 2), None);
        assert_eq!(autocorrelation(&[5.0; 10], 3), None);
    }

    fn manual_percentile(v: &[f64], p: f64) -> f64 {
        let n = v.len();
        let k = (n - 1) as f64 * p / 100.0;
        let f = k.floor();
        let c = k - f;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let f = f as usize;
        if f + 1 < n {
            v[f] + c * (v[f + 1] - v[f])
        } else {
            v[f]
        }
    }

    proptest! {
        #[test]
        fn prop_percentile_matches_formula(
            mut values in prop::collection::vec(-1.0e6f64..1.0e6, 1..200),
            p in 0.0f64..=100.0,
        ) {
            values.sort_by(f64::total_cmp);
            let expected = manual_percentile(&values, p);
            let actual = percentile(&values, p);
            prop_assert!((actual - expected).abs() <= 1e-6 * expected.abs().max(1.0));
        }

        #[test]
        fn prop_percentile_within_range(
            values in prop::collection::vec(-1.0e6f64..1.0e6, 1..200),
            p in 0.0f64..=100.0,
        ) {
            let s = sorted(&values);
            let v = percentile(&s, p);
            prop_assert!(v >= s[0] - 1e-9);
            prop_assert!(v <= s[s.len() - 1] + 1e-9);
        }
    }
}
