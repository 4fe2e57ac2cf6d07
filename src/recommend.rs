//! Intervention recommendation
//!
//! Maps a baseline to a mood regime, filters the intervention catalogue by
//! regime, cooldown and time of day, and picks the shortest remaining
//! candidate. Selection is deterministic and always yields a recommendation.

use crate::types::{Baseline, Priority, Recommendation};
use serde::{Deserialize, Serialize};

/// Intervention used when every candidate is filtered out
pub const FALLBACK_INTERVENTION_ID: &str = BREATHING_478.id;

/// Kind of exercise an intervention offers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterventionCategory {
    Grounding,
    Breathing,
    Affirmation,
    Gratitude,
    Mindfulness,
    Relaxation,
    Vr,
}

/// Catalogue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Intervention {
    pub id: &'static str,
    pub name: &'static str,
    pub duration_minutes: u32,
    pub category: InterventionCategory,
    /// Inclusive local-hour window in which the intervention is offered
    pub hours: Option<(u32, u32)>,
}

impl Intervention {
    /// Whether the intervention is offered at `hour` (0-23)
    pub fn available_at(&self, hour: u32) -> bool {
        match self.hours {
            Some((start, end)) => (start..=end).contains(&hour),
            None => true,
        }
    }
}

const BREATHING_478: Intervention = Intervention {
    id: "breathing_478",
    name: "4-7-8 Breathing",
    duration_minutes: 5,
    category: InterventionCategory::Breathing,
    hours: None,
};

/// Intervention catalogue in tie-break order
pub const CATALOGUE: &[Intervention] = &[
    Intervention {
        id: "grounding_54321",
        name: "5-4-3-2-1 Grounding",
        duration_minutes: 3,
        category: InterventionCategory::Grounding,
        hours: None,
    },
    BREATHING_478,
    Intervention {
        id: "positive_affirmation",
        name: "Positive Affirmations",
        duration_minutes: 2,
        category: InterventionCategory::Affirmation,
        hours: None,
    },
    Intervention {
        id: "gratitude_reflection",
        name: "Gratitude Reflection",
        duration_minutes: 4,
        category: InterventionCategory::Gratitude,
        hours: None,
    },
    Intervention {
        id: "mindful_moment",
        name: "Mindful Moment",
        duration_minutes: 5,
        category: InterventionCategory::Mindfulness,
        hours: None,
    },
    Intervention {
        id: "progressive_relaxation",
        name: "Progressive Muscle Relaxation",
        duration_minutes: 15,
        category: InterventionCategory::Relaxation,
        hours: Some((18, 23)),
    },
    Intervention {
        id: "vr_forest",
        name: "VR Forest Scene",
        duration_minutes: 10,
        category: InterventionCategory::Vr,
        hours: Some((6, 22)),
    },
];

/// Look up a catalogue entry by id
pub fn lookup(id: &str) -> Option<&'static Intervention> {
    CATALOGUE.iter().find(|i| i.id == id)
}

/// Mood regime derived from a baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    SignificantDecline,
    BelowBaseline,
    ChangePoint,
    Positive,
    Maintenance,
}

impl Regime {
    /// Classify a baseline; the first matching row wins
    pub fn classify(baseline: &Baseline) -> Self {
        let z = baseline.z_score;
        if z <= -1.5 {
            Regime::SignificantDecline
        } else if z <= -1.0 {
            Regime::BelowBaseline
        } else if baseline.change_point_detected && z < 0.0 {
            Regime::ChangePoint
        } else if z >= 1.5 {
            Regime::Positive
        } else {
            Regime::Maintenance
        }
    }

    pub fn priority(&self) -> Priority {
        match self {
            Regime::SignificantDecline => Priority::High,
            Regime::BelowBaseline | Regime::ChangePoint => Priority::Medium,
            Regime::Positive | Regime::Maintenance => Priority::Low,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Regime::SignificantDecline => "significant mood decline",
            Regime::BelowBaseline => "mood below baseline",
            Regime::ChangePoint => "mood change point detected",
            Regime::Positive => "reinforcing positive state",
            Regime::Maintenance => "maintaining wellness",
        }
    }

    /// Categories suited to this regime
    pub fn categories(&self) -> &'static [InterventionCategory] {
        use InterventionCategory::*;
        match self {
            Regime::SignificantDecline => &[Grounding, Breathing],
            Regime::BelowBaseline | Regime::ChangePoint => &[Breathing, Mindfulness, Relaxation],
            Regime::Positive => &[Affirmation, Gratitude],
            Regime::Maintenance => &[Gratitude, Mindfulness, Vr],
        }
    }
}

/// Deterministic intervention selector
#[derive(Debug, Clone, Copy, Default)]
pub struct RecommendationSelector;

impl RecommendationSelector {
    pub fn new() -> Self {
        Self
    }

    /// Choose an intervention for the current baseline.
    ///
    /// # Arguments
    /// * `baseline` - Latest computed baseline
    /// * `recent_ids` - Interventions still in cooldown
    /// * `hour` - Local hour of day (0-23); larger values wrap
    pub fn select<S: AsRef<str>>(
        &self,
        baseline: &Baseline,
        recent_ids: &[S],
        hour: u32,
    ) -> Recommendation {
        let regime = Regime::classify(baseline);
        let hour = hour % 24;
        let categories = regime.categories();

        // min_by_key keeps the first minimum, so equal durations fall back to catalogue order
        let chosen = CATALOGUE
            .iter()
            .filter(|i| categories.contains(&i.category))
            .filter(|i| i.available_at(hour))
            .filter(|i| !recent_ids.iter().any(|r| r.as_ref() == i.id))
            .min_by_key(|i| i.duration_minutes);

        let (intervention, fallback) = match chosen {
            Some(intervention) => (intervention, false),
            None => (fallback_intervention(), true),
        };

        Recommendation {
            intervention_id: intervention.id.to_string(),
            priority: regime.priority(),
            reason: regime.reason().to_string(),
            duration_minutes: intervention.duration_minutes,
            confidence: baseline.confidence,
            fallback,
        }
    }
}

fn fallback_intervention() -> &'static Intervention {
    lookup(FALLBACK_INTERVENTION_ID).unwrap_or(&BREATHING_478)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn baseline(z: f64, change_point: bool) -> Baseline {
        Baseline {
            rolling_mean: 3.0,
            rolling_std: 1.0,
            z_score: z,
            change_point_detected: change_point,
            confidence: 0.8,
            window_size: 21,
            observed_count: 17,
            computed_at: Utc::now(),
        }
    }

    const NONE: &[&str] = &[];

    #[test]
    fn test_fallback_is_breathing() {
        assert_eq!(fallback_intervention().id, FALLBACK_INTERVENTION_ID);
        assert_eq!(lookup(FALLBACK_INTERVENTION_ID), Some(fallback_intervention()));
        assert!(fallback_intervention().hours.is_none());
    }

    #[test]
    fn test_significant_decline_prefers_grounding() {
        let rec = RecommendationSelector::new().select(&baseline(-2.0, true), NONE, 14);
        assert_eq!(rec.intervention_id, "grounding_54321");
        assert_eq!(rec.priority, Priority::High);
        assert_eq!(rec.reason, "significant mood decline");
        assert_eq!(rec.duration_minutes, 3);
        assert_eq!(rec.confidence, 0.8);
        assert!(!rec.fallback);
    }

    #[test]
    fn test_regime_boundaries() {
        assert_eq!(Regime::classify(&baseline(-1.5, false)), Regime::SignificantDecline);
        assert_eq!(Regime::classify(&baseline(-1.0, false)), Regime::BelowBaseline);
        assert_eq!(Regime::classify(&baseline(-0.5, true)), Regime::ChangePoint);
        assert_eq!(Regime::classify(&baseline(-0.5, false)), Regime::Maintenance);
        assert_eq!(Regime::classify(&baseline(1.5, true)), Regime::Positive);
        assert_eq!(Regime::classify(&baseline(0.0, false)), Regime::Maintenance);
    }

    #[test]
    fn test_cooldown_excludes_recent() {
        let rec =
            RecommendationSelector::new().select(&baseline(-2.0, true), &["grounding_54321"], 14);
        assert_eq!(rec.intervention_id, "breathing_478");
        assert!(!rec.fallback);
    }

    #[test]
    fn test_all_excluded_falls_back() {
        let recent = ["grounding_54321", "breathing_478"];
        let rec = RecommendationSelector::new().select(&baseline(-2.0, true), &recent, 14);
        assert_eq!(rec.intervention_id, "breathing_478");
        assert_eq!(rec.priority, Priority::High);
        assert!(rec.fallback);
    }

    #[test]
    fn test_tie_breaks_on_catalogue_order() {
        // breathing_478 and mindful_moment are both 5 minutes
        let rec = RecommendationSelector::new().select(&baseline(-1.2, false), NONE, 14);
        assert_eq!(rec.priority, Priority::Medium);
        assert_eq!(rec.intervention_id, "breathing_478");

        let rec =
            RecommendationSelector::new().select(&baseline(-1.2, false), &["breathing_478"], 14);
        assert_eq!(rec.intervention_id, "mindful_moment");
    }

    #[test]
    fn test_time_of_day_window() {
        let relaxation = lookup("progressive_relaxation").unwrap();
        assert!(relaxation.available_at(18));
        assert!(relaxation.available_at(23));
        assert!(!relaxation.available_at(14));

        let recent = ["breathing_478", "mindful_moment"];
        let evening = RecommendationSelector::new().select(&baseline(-1.2, false), &recent, 20);
        assert_eq!(evening.intervention_id, "progressive_relaxation");

        let afternoon = RecommendationSelector::new().select(&baseline(-1.2, false), &recent, 14);
        assert!(afternoon.fallback);
    }

    #[test]
    fn test_positive_and_maintenance() {
        let positive = RecommendationSelector::new().select(&baseline(2.0, true), NONE, 10);
        assert_eq!(positive.intervention_id, "positive_affirmation");
        assert_eq!(positive.reason, "reinforcing positive state");

        let steady = RecommendationSelector::new().select(&baseline(0.2, false), NONE, 10);
        assert_eq!(steady.intervention_id, "gratitude_reflection");
        assert_eq!(steady.priority, Priority::Low);

        let night = RecommendationSelector::new().select(
            &baseline(0.2, false),
            &["gratitude_reflection", "mindful_moment"],
            3,
        );
        assert!(night.fallback);
    }

    #[test]
    fn test_deterministic() {
        let selector = RecommendationSelector::new();
        let b = baseline(-1.7, true);
        assert_eq!(selector.select(&b, NONE, 9), selector.select(&b, NONE, 9));
    }
}
