//! Baseline engine
//!
//! Rolling mean, standard deviation and z-score over the most recent mood
//! intensities. The latest observation is compared against a window that
//! includes itself, so a single sharp drop after a stable run still reads as
//! a change point.

use crate::config::{
    CoreConfig, DEFAULT_BASELINE_WINDOW, DEFAULT_CHANGE_POINT_THRESHOLD, DEFAULT_STD_FLOOR,
};
use crate::types::{Baseline, MoodObservation};
use chrono::{DateTime, Utc};

/// Mean reported when there is no history yet (middle of the 1-5 scale)
pub const EMPTY_HISTORY_MEAN: f64 = 3.0;

/// Standard deviation reported when there is no history yet
pub const EMPTY_HISTORY_STD: f64 = 1.0;

/// Pure baseline calculator
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineEngine {
    window_size: usize,
    change_point_threshold: f64,
    std_floor: f64,
}

impl Default for BaselineEngine {
    fn default() -> Self {
        Self::new(DEFAULT_BASELINE_WINDOW)
    }
}

impl BaselineEngine {
    /// Create an engine with the given window size. A window of 0 is treated as 1.
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            change_point_threshold: DEFAULT_CHANGE_POINT_THRESHOLD,
            std_floor: DEFAULT_STD_FLOOR,
        }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self {
            window_size: config.baseline_window.max(1),
            change_point_threshold: config.change_point_threshold,
            std_floor: config.std_floor,
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Compute the baseline of a chronologically ordered history.
    ///
    /// Only the last `window_size` observations are used. Never fails.
    pub fn compute(&self, history: &[MoodObservation], computed_at: DateTime<Utc>) -> Baseline {
        let start = history.len().saturating_sub(self.window_size);
        let window: Vec<f64> = history[start..]
            .iter()
            .map(|o| f64::from(o.intensity.value()))
            .collect();

        let Some(&latest) = window.last() else {
            return Baseline {
                rolling_mean: EMPTY_HISTORY_MEAN,
                rolling_std: EMPTY_HISTORY_STD,
                z_score: 0.0,
                change_point_detected: false,
                confidence: 0.0,
                window_size: self.window_size,
                observed_count: 0,
                computed_at,
            };
        };

        let n = window.len() as f64;
        let mean = window.iter().sum::<f64>() / n;
        let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        // Population std, floored so constant windows still yield a finite z.
        let std = variance.sqrt().max(self.std_floor);
        let z_score = (latest - mean) / std;

        Baseline {
            rolling_mean: mean,
            rolling_std: std,
            z_score,
            change_point_detected: z_score.abs() > self.change_point_threshold,
            confidence: (n / self.window_size as f64).min(1.0),
            window_size: self.window_size,
            observed_count: window.len(),
            computed_at,
        }
    }

    /// Baseline handed to the recommendation selector.
    ///
    /// A lone observation always scores zero against itself, so it is scored
    /// against the empty-history prior instead. Larger windows are unchanged.
    pub fn compute_for_recommendation(
        &self,
        history: &[MoodObservation],
        computed_at: DateTime<Utc>,
    ) -> Baseline {
        let mut baseline = self.compute(history, computed_at);
        if baseline.observed_count == 1 {
            if let Some(latest) = history.last() {
                let z = (f64::from(latest.intensity.value()) - EMPTY_HISTORY_MEAN)
                    / EMPTY_HISTORY_STD;
                baseline.z_score = z;
                baseline.change_point_detected = z.abs() > self.change_point_threshold;
            }
        }
        baseline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Intensity;
    use chrono::Duration;
    use proptest::prelude::*;

    fn history(values: &[u8]) -> Vec<MoodObservation> {
        let start = Utc::now() - Duration::days(values.len() as i64);
        values
            .iter()
            .enumerate()
            .map(|(i, v)| MoodObservation {
                timestamp: start + Duration::days(i as i64),
                intensity: Intensity::new(*v).unwrap(),
            })
            .collect()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_empty_history() {
        let baseline = BaselineEngine::default().compute(&[], Utc::now());
        assert_eq!(baseline.rolling_mean, 3.0);
        assert_eq!(baseline.rolling_std, 1.0);
        assert_eq!(baseline.z_score, 0.0);
        assert!(!baseline.change_point_detected);
        assert_eq!(baseline.confidence, 0.0);
        assert_eq!(baseline.observed_count, 0);
    }

    #[test]
    fn test_constant_window_uses_std_floor() {
        let baseline = BaselineEngine::default().compute(&history(&[5; 5]), Utc::now());
        assert!(approx(baseline.rolling_mean, 5.0));
        assert!(approx(baseline.rolling_std, 0.1));
        assert!(approx(baseline.z_score, 0.0));
        assert!(!baseline.change_point_detected);
        assert!(approx(baseline.confidence, 5.0 / 21.0));
    }

    #[test]
    fn test_single_point() {
        let baseline = BaselineEngine::default().compute(&history(&[2]), Utc::now());
        assert!(approx(baseline.rolling_mean, 2.0));
        assert!(approx(baseline.rolling_std, 0.1));
        assert!(approx(baseline.z_score, 0.0));
    }

    #[test]
    fn test_sharp_drop_is_change_point() {
        let mut values = vec![3u8; 20];
        values.push(1);
        let baseline = BaselineEngine::default().compute(&history(&values), Utc::now());

        // mean = 61/21, population std = sqrt(80)/21, z = -40/sqrt(80)
        assert!(approx(baseline.rolling_mean, 61.0 / 21.0));
        assert!(approx(baseline.rolling_std, 80f64.sqrt() / 21.0));
        assert!(approx(baseline.z_score, -40.0 / 80f64.sqrt()));
        assert!(baseline.change_point_detected);
        assert!(approx(baseline.confidence, 1.0));
    }

    #[test]
    fn test_window_keeps_most_recent() {
        let mut values = vec![1u8; 30];
        values.extend([5u8; 4]);
        let engine = BaselineEngine::new(4);
        let baseline = engine.compute(&history(&values), Utc::now());
        assert!(approx(baseline.rolling_mean, 5.0));
        assert_eq!(baseline.observed_count, 4);
        assert_eq!(baseline.confidence, 1.0);
    }

    #[test]
    fn test_zero_window_treated_as_one() {
        let engine = BaselineEngine::new(0);
        assert_eq!(engine.window_size(), 1);
        let baseline = engine.compute(&history(&[1, 5]), Utc::now());
        assert!(approx(baseline.rolling_mean, 5.0));
    }

    #[test]
    fn test_threshold_from_config() {
        let config = CoreConfig {
            change_point_threshold: 5.0,
            ..Default::default()
        };
        let mut values = vec![3u8; 20];
        values.push(1);
        let baseline = BaselineEngine::from_config(&config).compute(&history(&values), Utc::now());
        assert!(!baseline.change_point_detected);
    }

    #[test]
    fn test_single_observation_scored_against_prior() {
        let engine = BaselineEngine::default();
        let baseline = engine.compute_for_recommendation(&history(&[2]), Utc::now());
        assert!(approx(baseline.z_score, -1.0));
        assert!(!baseline.change_point_detected);

        let low = engine.compute_for_recommendation(&history(&[1]), Utc::now());
        assert!(low.change_point_detected);

        // Longer windows are left alone
        let steady = engine.compute_for_recommendation(&history(&[2, 2]), Utc::now());
        assert!(approx(steady.z_score, 0.0));
    }

    proptest! {
        #[test]
        fn prop_baseline_bounds(values in proptest::collection::vec(1u8..=5, 0..60)) {
            let baseline = BaselineEngine::default().compute(&history(&values), Utc::now());
            prop_assert!(baseline.rolling_mean >= 1.0 && baseline.rolling_mean <= 5.0);
            prop_assert!(baseline.rolling_std >= 0.1);
            prop_assert!(baseline.z_score.is_finite());
            prop_assert!(baseline.confidence >= 0.0 && baseline.confidence <= 1.0);
            prop_assert_eq!(
                baseline.change_point_detected,
                baseline.z_score.abs() > DEFAULT_CHANGE_POINT_THRESHOLD
            );
        }
    }
}
