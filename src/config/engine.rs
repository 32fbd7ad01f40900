//! Engine tunables.
//!
//! [`ThresholdConfig`] lives in the key-value store next to the thresholds
//! it governs, so every process sharing a store sees the same settings.
//! Stored documents may be partial; missing fields take their defaults.
//!
//! # Example
//!
//! ```
//! use perf_thresholds::config::{ConfigUpdate, ThresholdConfig};
//!
//! let config = ThresholdConfig::default();
//! assert_eq!(config.min_samples_for_adjustment, 50);
//!
//! let update = ConfigUpdate::from_pairs([("confidence_threshold", "0.9")]).unwrap();
//! let updated = config.apply(&update).unwrap();
//! assert!((updated.confidence_threshold - 0.9).abs() < f64::EPSILON);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default: days of history the analysis looks at.
pub const DEFAULT_LEARNING_WINDOW_DAYS: u32 = 14;

/// Default: slope magnitude separating a trend from noise.
pub const DEFAULT_ADJUSTMENT_SENSITIVITY: f64 = 0.1;

/// Default: samples needed in the window before adjusting.
pub const DEFAULT_MIN_SAMPLES_FOR_ADJUSTMENT: usize = 50;

/// Default: largest fractional change in one step.
pub const DEFAULT_MAX_THRESHOLD_CHANGE: f64 = 0.3;

/// Default: hours between adjustments of the same metric.
pub const DEFAULT_ADJUSTMENT_FREQUENCY_HOURS: u32 = 6;

/// Default: overall confidence needed to auto-apply.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.8;

/// Longest learning window; history is only kept this long.
pub const MAX_LEARNING_WINDOW_DAYS: u32 = 30;

/// Longest rate-limit interval (30 days).
pub const MAX_ADJUSTMENT_FREQUENCY_HOURS: u32 = 720;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Days of history the analysis looks at.
    pub learning_window_days: u32,
    /// Slope magnitude separating `stable` from a trend.
    pub adjustment_sensitivity: f64,
    /// Samples needed in the window before a full analysis runs.
    pub min_samples_for_adjustment: usize,
    /// Largest fractional change to a threshold in one step.
    pub max_threshold_change: f64,
    /// Hours between adjustments of the same metric.
    pub adjustment_frequency_hours: u32,
    /// Overall confidence needed to auto-apply proposals.
    pub confidence_threshold: f64,
    /// Include Z-score outlier detection in the analysis.
    pub anomaly_detection_enabled: bool,
    /// Allow proposals to be committed without review.
    pub auto_adjustment_enabled: bool,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            learning_window_days: DEFAULT_LEARNING_WINDOW_DAYS,
            adjustment_sensitivity: DEFAULT_ADJUSTMENT_SENSITIVITY,
            min_samples_for_adjustment: DEFAULT_MIN_SAMPLES_FOR_ADJUSTMENT,
            max_threshold_change: DEFAULT_MAX_THRESHOLD_CHANGE,
            adjustment_frequency_hours: DEFAULT_ADJUSTMENT_FREQUENCY_HOURS,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            anomaly_detection_enabled: true,
            auto_adjustment_enabled: true,
        }
    }
}

impl ThresholdConfig {
    /// Validate every field.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.learning_window_days == 0 || self.learning_window_days > MAX_LEARNING_WINDOW_DAYS {
            return Err(invalid(
                "learning_window_days",
                format!("must be between 1 and {MAX_LEARNING_WINDOW_DAYS}"),
            ));
        }
        if !self.adjustment_sensitivity.is_finite() || self.adjustment_sensitivity < 0.0 {
            return Err(invalid(
                "adjustment_sensitivity",
                "must be a non-negative number".into(),
            ));
        }
        if self.min_samples_for_adjustment == 0 {
            return Err(invalid(
                "min_samples_for_adjustment",
                "must be at least 1".into(),
            ));
        }
        // A full step down would zero a threshold, which then never moves again
        if !(self.max_threshold_change > 0.0 && self.max_threshold_change < 1.0) {
            return Err(invalid(
                "max_threshold_change",
                "must be greater than 0 and less than 1".into(),
            ));
        }
        if self.adjustment_frequency_hours > MAX_ADJUSTMENT_FREQUENCY_HOURS {
            return Err(invalid(
                "adjustment_frequency_hours",
                format!("must be at most {MAX_ADJUSTMENT_FREQUENCY_HOURS}"),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(invalid(
                "confidence_threshold",
                "must be between 0 and 1".into(),
            ));
        }
        Ok(())
    }

    /// Merge an update onto this config and validate the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if the merged config is invalid.
    pub fn apply(&self, update: &ConfigUpdate) -> Result<Self, ConfigError> {
        let merged = Self {
            learning_window_days: update
                .learning_window_days
                .unwrap_or(self.learning_window_days),
            adjustment_sensitivity: update
                .adjustment_sensitivity
                .unwrap_or(self.adjustment_sensitivity),
            min_samples_for_adjustment: update
                .min_samples_for_adjustment
                .unwrap_or(self.min_samples_for_adjustment),
            max_threshold_change: update
                .max_threshold_change
                .unwrap_or(self.max_threshold_change),
            adjustment_frequency_hours: update
                .adjustment_frequency_hours
                .unwrap_or(self.adjustment_frequency_hours),
            confidence_threshold: update
                .confidence_threshold
                .unwrap_or(self.confidence_threshold),
            anomaly_detection_enabled: update
                .anomaly_detection_enabled
                .unwrap_or(self.anomaly_detection_enabled),
            auto_adjustment_enabled: update
                .auto_adjustment_enabled
                .unwrap_or(self.auto_adjustment_enabled),
        };
        merged.validate()?;
        Ok(merged)
    }
}

/// A partial update to [`ThresholdConfig`]. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigUpdate {
    /// New learning window.
    pub learning_window_days: Option<u32>,
    /// New trend cutoff.
    pub adjustment_sensitivity: Option<f64>,
    /// New minimum sample count.
    pub min_samples_for_adjustment: Option<usize>,
    /// New step bound.
    pub max_threshold_change: Option<f64>,
    /// New rate-limit interval.
    pub adjustment_frequency_hours: Option<u32>,
    /// New confidence gate.
    pub confidence_threshold: Option<f64>,
    /// Toggle anomaly detection.
    pub anomaly_detection_enabled: Option<bool>,
    /// Toggle auto-apply.
    pub auto_adjustment_enabled: Option<bool>,
}

impl ConfigUpdate {
    /// Build an update from `key = value` pairs, as given on the command line.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownKey`] for a key that is not a config
    /// field and [`ConfigError::InvalidValue`] for a value that does not
    /// parse.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut update = Self::default();
        for (key, value) in pairs {
            let (key, value) = (key.as_ref().trim(), value.as_ref().trim());
            match key {
                "learning_window_days" => update.learning_window_days = Some(parse(key, value)?),
                "adjustment_sensitivity" => {
                    update.adjustment_sensitivity = Some(parse(key, value)?);
                }
                "min_samples_for_adjustment" => {
                    update.min_samples_for_adjustment = Some(parse(key, value)?);
                }
                "max_threshold_change" => update.max_threshold_change = Some(parse(key, value)?),
                "adjustment_frequency_hours" => {
                    update.adjustment_frequency_hours = Some(parse(key, value)?);
                }
                "confidence_threshold" => update.confidence_threshold = Some(parse(key, value)?),
                "anomaly_detection_enabled" => {
                    update.anomaly_detection_enabled = Some(parse_bool(key, value)?);
                }
                "auto_adjustment_enabled" => {
                    update.auto_adjustment_enabled = Some(parse_bool(key, value)?);
                }
                _ => return Err(ConfigError::UnknownKey { key: key.into() }),
            }
        }
        Ok(update)
    }

    /// Whether the update changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

fn invalid(var: &str, reason: String) -> ConfigError {
    ConfigError::InvalidValue {
        var: var.into(),
        reason,
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| invalid(key, format!("cannot parse '{value}'")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, format!("expected true or false, got '{value}'"))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use test_case::test_case;

    #[test]
    fn test_defaults_are_valid() {
        let config = ThresholdConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.learning_window_days, 14);
        assert_eq!(config.adjustment_sensitivity, 0.1);
        assert_eq!(config.min_samples_for_adjustment, 50);
        assert_eq!(config.max_threshold_change, 0.3);
        assert_eq!(config.adjustment_frequency_hours, 6);
        assert_eq!(config.confidence_threshold, 0.8);
        assert!(config.anomaly_detection_enabled);
        assert!(config.auto_adjustment_enabled);
    }

    #[test]
    fn test_partial_document_merges_with_defaults() {
        let stored = json!({"confidence_threshold": 0.6, "auto_adjustment_enabled": false});
        let config: ThresholdConfig = serde_json::from_value(stored).unwrap();
        assert_eq!(config.confidence_threshold, 0.6);
        assert!(!config.auto_adjustment_enabled);
        assert_eq!(config.learning_window_days, DEFAULT_LEARNING_WINDOW_DAYS);
    }

    #[test_case("learning_window_days", "0")]
    #[test_case("learning_window_days", "31")]
    #[test_case("adjustment_sensitivity", "-0.5")]
    #[test_case("min_samples_for_adjustment", "0")]
    #[test_case("max_threshold_change", "0")]
    #[test_case("max_threshold_change", "1")]
    #[test_case("max_threshold_change", "1.5")]
    #[test_case("adjustment_frequency_hours", "721")]
    #[test_case("confidence_threshold", "1.01")]
    fn test_apply_rejects_out_of_range(key: &str, value: &str) {
        let update = ConfigUpdate::from_pairs([(key, value)]).unwrap();
        let err = ThresholdConfig::default().apply(&update).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var, .. } if var == key));
    }

    #[test]
    fn test_max_threshold_change_just_below_one_is_accepted() {
        let update = ConfigUpdate::from_pairs([("max_threshold_change", "0.99")]).unwrap();
        let config = ThresholdConfig::default().apply(&update).unwrap();
        assert_eq!(config.max_threshold_change, 0.99);
    }

    #[test]
    fn test_from_pairs_parses_all_types() {
        let update = ConfigUpdate::from_pairs([
            ("learning_window_days", "7"),
            ("max_threshold_change", "0.25"),
            ("anomaly_detection_enabled", "off"),
        ])
        .unwrap();
        assert_eq!(update.learning_window_days, Some(7));
        assert_eq!(update.max_threshold_change, Some(0.25));
        assert_eq!(update.anomaly_detection_enabled, Some(false));
        assert!(update.confidence_threshold.is_none());
    }

    #[test]
    fn test_from_pairs_unknown_key() {
        let err = ConfigUpdate::from_pairs([("window", "7")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownKey {
                key: "window".to_string()
            }
        );
    }

    #[test]
    fn test_from_pairs_bad_value() {
        let err = ConfigUpdate::from_pairs([("auto_adjustment_enabled", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_empty_update_is_identity() {
        let update = ConfigUpdate::default();
        assert!(update.is_empty());
        let config = ThresholdConfig::default();
        assert_eq!(config.apply(&update).unwrap(), config);
    }

    #[test]
    fn test_update_rejects_unknown_json_field() {
        let result: Result<ConfigUpdate, _> = serde_json::from_value(json!({"bogus": 1}));
        assert!(result.is_err());
    }
}
