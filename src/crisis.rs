//! Crisis keyword gate
//!
//! Scans free text for crisis language before anything else touches it. A
//! critical match stops the pipeline and returns fixed support resources.
//!
//! This is case-insensitive substring matching. It misses paraphrases and
//! misspellings, and it fires on innocent text that happens to contain a
//! keyword ("down" in "countdown"). It is a safety net for routing people to
//! help, not a clinical assessment.

use crate::types::{CrisisResource, CrisisResponse, CrisisScan, CrisisSeverity};

/// Keyword tiers, most severe first. Tiers are disjoint.
pub const KEYWORD_TIERS: &[(CrisisSeverity, &[&str])] = &[
    (
        CrisisSeverity::Critical,
        &[
            "suicide",
            "kill myself",
            "end it all",
            "want to die",
            "better off dead",
            "no point living",
            "hurt myself",
            "self harm",
            "self-harm",
            "overdose",
            "hang myself",
        ],
    ),
    (
        CrisisSeverity::High,
        &["hopeless", "worthless", "can't go on", "no point", "give up"],
    ),
    (
        CrisisSeverity::Medium,
        &["depressed", "anxious", "overwhelmed", "stressed", "worried"],
    ),
    (
        CrisisSeverity::Low,
        &["sad", "down", "upset", "frustrated", "tired"],
    ),
];

const CRISIS_MESSAGE: &str = "It sounds like you are going through something really painful. \
You don't have to face this alone. Please reach out to someone who can help right now.";

/// Lowercase and fold typographic apostrophes so "can’t" matches "can't"
fn normalize(text: &str) -> String {
    text.to_lowercase().replace(['\u{2019}', '\u{2018}'], "'")
}

/// Scan text for crisis keywords.
///
/// Every matched keyword is returned in tier order; the severity is that of
/// the most severe match. Text without matches yields `detected = false` and
/// severity `Low`.
pub fn scan(text: &str) -> CrisisScan {
    let haystack = normalize(text);
    let mut severity = None;
    let mut matched_keywords = Vec::new();

    for (tier, keywords) in KEYWORD_TIERS {
        for keyword in keywords.iter().filter(|k| haystack.contains(*k)) {
            severity.get_or_insert(*tier);
            matched_keywords.push(keyword.to_string());
        }
    }

    CrisisScan {
        detected: severity.is_some(),
        severity: severity.unwrap_or(CrisisSeverity::Low),
        matched_keywords,
    }
}

/// Support resources shown when a critical match stops the pipeline
pub fn crisis_resources() -> Vec<CrisisResource> {
    vec![
        CrisisResource {
            name: "988 Suicide & Crisis Lifeline".to_string(),
            contact: "988".to_string(),
            country_code: "US".to_string(),
            available_24h: true,
        },
        CrisisResource {
            name: "AASRA".to_string(),
            contact: "+91-22-27546669".to_string(),
            country_code: "IN".to_string(),
            available_24h: true,
        },
        CrisisResource {
            name: "Befrienders Worldwide".to_string(),
            contact: "https://www.befrienders.org".to_string(),
            country_code: "INTL".to_string(),
            available_24h: true,
        },
    ]
}

/// Fixed response for a critical scan
pub fn crisis_response() -> CrisisResponse {
    CrisisResponse {
        message: CRISIS_MESSAGE.to_string(),
        resources: crisis_resources(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    #[test]
    fn test_critical_phrase() {
        let result = scan("I want to kill myself");
        assert!(result.detected);
        assert_eq!(result.severity, CrisisSeverity::Critical);
        assert!(result.is_critical());
        assert_eq!(result.matched_keywords, vec!["kill myself".to_string()]);
    }

    #[test]
    fn test_no_match() {
        let result = scan("I had a great day");
        assert!(!result.detected);
        assert_eq!(result.severity, CrisisSeverity::Low);
        assert!(result.matched_keywords.is_empty());
        assert!(!result.is_critical());
    }

    #[test]
    fn test_case_insensitive() {
        assert!(scan("FEELING HOPELESS").detected);
        assert_eq!(scan("Feeling Hopeless").severity, CrisisSeverity::High);
    }

    #[test]
    fn test_typographic_apostrophe() {
        let result = scan("I can\u{2019}t go on like this");
        assert_eq!(result.severity, CrisisSeverity::High);
        assert_eq!(result.matched_keywords, vec!["can't go on".to_string()]);
    }

    #[test]
    fn test_highest_tier_wins_and_all_matches_listed() {
        let result = scan("so tired and stressed, there is no point living");
        assert_eq!(result.severity, CrisisSeverity::Critical);
        assert_eq!(
            result.matched_keywords,
            vec![
                "no point living".to_string(),
                "no point".to_string(),
                "stressed".to_string(),
                "tired".to_string(),
            ]
        );
    }

    #[test]
    fn test_low_tier_only() {
        let result = scan("a bit sad today");
        assert!(result.detected);
        assert_eq!(result.severity, CrisisSeverity::Low);
    }

    #[test]
    fn test_tiers_are_disjoint() {
        let mut seen = HashSet::new();
        for (_, keywords) in KEYWORD_TIERS {
            for keyword in keywords.iter() {
                assert!(seen.insert(*keyword), "duplicate keyword {}", keyword);
            }
        }
    }

    #[test]
    fn test_crisis_response_resources() {
        let response = crisis_response();
        let contacts: Vec<_> = response.resources.iter().map(|r| r.contact.as_str()).collect();
        assert!(contacts.contains(&"988"));
        assert!(contacts.contains(&"+91-22-27546669"));
        assert!(contacts.iter().any(|c| c.contains("befrienders.org")));
    }
}
