//! Mood insights
//!
//! Summary statistics for the dashboard: recent trend, average mood and the
//! current logging streak.

use crate::config::lookback;
use crate::types::{MoodInsights, MoodObservation, MoodTrend, TrendDirection};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::BTreeSet;

/// |slope| above which the trend counts as improving or declining
pub const TREND_SLOPE_THRESHOLD: f64 = 0.1;

/// Average reported when there are no entries
pub const NEUTRAL_MOOD: f64 = 3.0;

/// Least-squares trend over the observations of the last `period_days`.
///
/// The regression runs over entry order, not elapsed time, so a burst of
/// entries in one afternoon weighs as much as a week of daily entries.
pub fn mood_trend(history: &[MoodObservation], now: DateTime<Utc>, period_days: i64) -> MoodTrend {
    let cutoff = lookback(now, Duration::try_days(period_days));
    let y: Vec<f64> = history
        .iter()
        .filter(|o| o.timestamp >= cutoff)
        .map(|o| f64::from(o.intensity.value()))
        .collect();

    if y.len() < 2 {
        return MoodTrend {
            direction: TrendDirection::Stable,
            slope: 0.0,
            correlation: 0.0,
        };
    }

    let n = y.len() as f64;
    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_xx, mut sum_yy) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for (i, value) in y.iter().enumerate() {
        let x = i as f64;
        sum_x += x;
        sum_y += value;
        sum_xy += x * value;
        sum_xx += x * x;
        sum_yy += value * value;
    }

    let covariance = n * sum_xy - sum_x * sum_y;
    let slope = covariance / (n * sum_xx - sum_x * sum_x);
    let spread = ((n * sum_xx - sum_x * sum_x) * (n * sum_yy - sum_y * sum_y)).sqrt();
    // Constant scores have no correlation to report
    let correlation = if spread > 0.0 { covariance / spread } else { 0.0 };

    let direction = if slope.abs() > TREND_SLOPE_THRESHOLD {
        if slope > 0.0 {
            TrendDirection::Improving
        } else {
            TrendDirection::Declining
        }
    } else {
        TrendDirection::Stable
    };

    MoodTrend {
        direction,
        slope,
        correlation,
    }
}

/// Mean intensity rounded to one decimal
pub fn average_mood(history: &[MoodObservation]) -> f64 {
    if history.is_empty() {
        return NEUTRAL_MOOD;
    }
    let sum: f64 = history.iter().map(|o| f64::from(o.intensity.value())).sum();
    (sum / history.len() as f64 * 10.0).round() / 10.0
}

/// Consecutive calendar days (UTC) ending `today` with at least one entry
pub fn streak_days(history: &[MoodObservation], today: NaiveDate) -> u32 {
    let days: BTreeSet<NaiveDate> = history.iter().map(|o| o.timestamp.date_naive()).collect();

    let mut streak = 0;
    let mut day = today;
    while days.contains(&day) {
        streak += 1;
        match day.pred_opt() {
            Some(previous) => day = previous,
            None => break,
        }
    }
    streak
}

/// All insights at once
pub fn summarize(
    history: &[MoodObservation],
    now: DateTime<Utc>,
    period_days: i64,
) -> MoodInsights {
    MoodInsights {
        trend: mood_trend(history, now, period_days),
        average_mood: average_mood(history),
        streak_days: streak_days(history, now.date_naive()),
        total_entries: history.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Intensity;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 20, 0, 0).unwrap()
    }

    /// One observation per day, the last one today
    fn daily(values: &[u8]) -> Vec<MoodObservation> {
        let count = values.len() as i64;
        values
            .iter()
            .enumerate()
            .map(|(i, v)| MoodObservation {
                timestamp: now() - Duration::days(count - 1 - i as i64),
                intensity: Intensity::new(*v).unwrap(),
            })
            .collect()
    }

    #[test]
    fn test_trend_improving() {
        let trend = mood_trend(&daily(&[1, 2, 3, 4, 5]), now(), 7);
        assert_eq!(trend.direction, TrendDirection::Improving);
        assert!((trend.slope - 1.0).abs() < 1e-9);
        assert!((trend.correlation - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_trend_declining() {
        let trend = mood_trend(&daily(&[5, 4, 4, 2]), now(), 7);
        assert_eq!(trend.direction, TrendDirection::Declining);
        assert!(trend.slope < 0.0);
    }

    #[test]
    fn test_trend_stable_for_constant_scores() {
        let trend = mood_trend(&daily(&[3, 3, 3]), now(), 7);
        assert_eq!(trend.direction, TrendDirection::Stable);
        assert_eq!(trend.slope, 0.0);
        assert_eq!(trend.correlation, 0.0);
    }

    #[test]
    fn test_trend_ignores_old_entries() {
        // Only the last 3 days fall inside a 2-day period
        let trend = mood_trend(&daily(&[1, 1, 1, 1, 5, 5, 5]), now(), 2);
        assert_eq!(trend.direction, TrendDirection::Stable);
    }

    #[test]
    fn test_trend_needs_two_points() {
        let trend = mood_trend(&daily(&[4]), now(), 7);
        assert_eq!(trend.direction, TrendDirection::Stable);
        assert_eq!(trend.slope, 0.0);
    }

    #[test]
    fn test_average_mood() {
        assert_eq!(average_mood(&[]), 3.0);
        assert_eq!(average_mood(&daily(&[1, 2, 2])), 1.7);
        assert_eq!(average_mood(&daily(&[4, 5])), 4.5);
    }

    #[test]
    fn test_streak_days() {
        assert_eq!(streak_days(&daily(&[3, 3, 3, 3]), now().date_naive()), 4);
        assert_eq!(streak_days(&[], now().date_naive()), 0);

        // A gap two days ago ends the streak
        let mut history = daily(&[3, 3]);
        history.insert(
            0,
            MoodObservation {
                timestamp: now() - Duration::days(5),
                intensity: Intensity::new(3).unwrap(),
            },
        );
        assert_eq!(streak_days(&history, now().date_naive()), 2);
    }

    #[test]
    fn test_streak_requires_entry_today() {
        let yesterday = now() - Duration::days(1);
        let history = vec![MoodObservation {
            timestamp: yesterday,
            intensity: Intensity::new(3).unwrap(),
        }];
        assert_eq!(streak_days(&history, now().date_naive()), 0);
    }

    #[test]
    fn test_summarize() {
        let insights = summarize(&daily(&[2, 3, 4]), now(), 7);
        assert_eq!(insights.total_entries, 3);
        assert_eq!(insights.streak_days, 3);
        assert_eq!(insights.average_mood, 3.0);
        assert_eq!(insights.trend.direction, TrendDirection::Improving);
    }
}
