//! Core configuration
//!
//! Tunables for key derivation, lockout, baselines and cooldowns. The host
//! persists this as JSON next to the database if it wants non-default values.

use crate::error::CoreError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default PBKDF2-HMAC-SHA256 iteration count
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 100_000;

/// Default baseline window (number of most recent observations)
pub const DEFAULT_BASELINE_WINDOW: usize = 21;

/// Default |z| above which a change point is flagged
pub const DEFAULT_CHANGE_POINT_THRESHOLD: f64 = 1.5;

/// Default floor for the rolling standard deviation
pub const DEFAULT_STD_FLOOR: f64 = 0.1;

/// Longest accepted unlock lockout (one day)
pub const MAX_LOCKOUT_SECONDS: i64 = 86_400;

/// Longest accepted intervention cooldown (one year)
pub const MAX_COOLDOWN_HOURS: i64 = 24 * 366;

/// Longest accepted trend look-back (ten years)
pub const MAX_TREND_PERIOD_DAYS: i64 = 3_660;

/// Configuration for a [`crate::pipeline::WellnessCore`] instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// PBKDF2 iterations used for new accounts
    pub pbkdf2_iterations: u32,
    /// Number of most recent mood observations in the baseline window
    pub baseline_window: usize,
    /// |z| threshold for change-point detection
    pub change_point_threshold: f64,
    /// Floor applied to the rolling standard deviation
    pub std_floor: f64,
    /// Consecutive failed unlocks before lockout
    pub max_unlock_attempts: u32,
    /// Lockout duration in seconds
    pub lockout_seconds: i64,
    /// Hours before an intervention is eligible for re-recommendation
    pub cooldown_hours: i64,
    /// Minimum password length for new accounts
    pub min_password_length: usize,
    /// Look-back period for mood trend analysis
    pub trend_period_days: i64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: DEFAULT_PBKDF2_ITERATIONS,
            baseline_window: DEFAULT_BASELINE_WINDOW,
            change_point_threshold: DEFAULT_CHANGE_POINT_THRESHOLD,
            std_floor: DEFAULT_STD_FLOOR,
            max_unlock_attempts: 3,
            lockout_seconds: 30,
            cooldown_hours: 24,
            min_password_length: 8,
            trend_period_days: 7,
        }
    }
}

impl CoreConfig {
    /// Check that the configuration can drive the pipeline
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.pbkdf2_iterations == 0 {
            return Err(CoreError::Validation(
                "pbkdf2_iterations must be greater than zero".to_string(),
            ));
        }
        if self.baseline_window == 0 {
            return Err(CoreError::Validation(
                "baseline_window must be greater than zero".to_string(),
            ));
        }
        if self.max_unlock_attempts == 0 {
            return Err(CoreError::Validation(
                "max_unlock_attempts must be greater than zero".to_string(),
            ));
        }
        if self.std_floor.is_nan()
            || self.std_floor <= 0.0
            || !self.change_point_threshold.is_finite()
        {
            return Err(CoreError::Validation(
                "std_floor must be positive and change_point_threshold finite".to_string(),
            ));
        }
        check_range("lockout_seconds", self.lockout_seconds, MAX_LOCKOUT_SECONDS)?;
        check_range("cooldown_hours", self.cooldown_hours, MAX_COOLDOWN_HOURS)?;
        check_range(
            "trend_period_days",
            self.trend_period_days,
            MAX_TREND_PERIOD_DAYS,
        )?;
        Ok(())
    }

    /// Load configuration from JSON, filling missing fields with defaults
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn check_range(name: &str, value: i64, max: i64) -> Result<(), CoreError> {
    if !(0..=max).contains(&value) {
        return Err(CoreError::Validation(format!(
            "{name} must be between 0 and {max}"
        )));
    }
    Ok(())
}

/// `now` minus `span`, saturating at the earliest representable instant.
///
/// A span that does not fit a [`Duration`] reaches back past every record.
pub(crate) fn lookback(now: DateTime<Utc>, span: Option<Duration>) -> DateTime<Utc> {
    span.and_then(|span| now.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = CoreConfig::default();
        assert_eq!(config.pbkdf2_iterations, 100_000);
        assert_eq!(config.baseline_window, 21);
        assert_eq!(config.max_unlock_attempts, 3);
        assert_eq!(config.lockout_seconds, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = CoreConfig::from_json(r#"{"baseline_window": 14}"#).unwrap();
        assert_eq!(config.baseline_window, 14);
        assert_eq!(config.cooldown_hours, 24);
    }

    #[test]
    fn test_rejects_zero_iterations() {
        let result = CoreConfig::from_json(r#"{"pbkdf2_iterations": 0}"#);
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_serialization() {
        let config = CoreConfig {
            lockout_seconds: 60,
            ..Default::default()
        };
        let json = config.to_json().unwrap();
        let loaded = CoreConfig::from_json(&json).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_rejects_out_of_range_durations() {
        for json in [
            r#"{"cooldown_hours": 9000000000}"#,
            r#"{"lockout_seconds": 9223372036854775807}"#,
            r#"{"trend_period_days": 100000000000000}"#,
            r#"{"lockout_seconds": -1}"#,
        ] {
            let result = CoreConfig::from_json(json);
            assert!(matches!(result, Err(CoreError::Validation(_))), "{json}");
        }
        assert!(CoreConfig::from_json(r#"{"cooldown_hours": 8784}"#).is_ok());
    }

    #[test]
    fn test_lookback_saturates() {
        let now = Utc::now();
        assert_eq!(lookback(now, Duration::try_hours(2)), now - Duration::hours(2));
        assert_eq!(lookback(now, Duration::try_days(i64::MAX)), DateTime::<Utc>::MIN_UTC);
        assert_eq!(
            lookback(now, Duration::try_days(i64::from(u32::MAX))),
            DateTime::<Utc>::MIN_UTC
        );
    }
}
