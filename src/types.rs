//! Core types for the MindWell pipeline
//!
//! This module defines the records owned by the encrypted store and the value
//! objects returned by the baseline engine, the recommendation selector and
//! the crisis gate.

use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Mood intensity on the 1-5 scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Intensity(u8);

impl Intensity {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    /// Create an intensity, rejecting values outside 1-5
    pub fn new(value: u8) -> Result<Self, CoreError> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(CoreError::Validation(format!(
                "intensity must be between {} and {}, got {}",
                Self::MIN,
                Self::MAX,
                value
            )))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Label shown by the mood picker for this intensity
    pub fn default_label(self) -> &'static str {
        match self.0 {
            1 => "Very Sad",
            2 => "Sad",
            3 => "Neutral",
            4 => "Happy",
            _ => "Very Happy",
        }
    }
}

impl TryFrom<u8> for Intensity {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Intensity> for u8 {
    fn from(intensity: Intensity) -> Self {
        intensity.0
    }
}

/// Effectiveness rating given at the end of an intervention (1-5)
pub type Effectiveness = Intensity;

/// Stored credentials for the single device user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    /// PBKDF2 salt (base64)
    pub salt: String,
    /// Verifier constant encrypted under the derived key (wire format)
    pub key_verifier: String,
    /// PBKDF2 iteration count the key was derived with
    pub kdf_iterations: u32,
    pub created_at: DateTime<Utc>,
}

/// User record as exported: no salt, verifier or key material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.user_id.clone(),
            created_at: user.created_at,
        }
    }
}

/// Input for a new mood entry before encryption
#[derive(Debug, Clone, PartialEq)]
pub struct MoodInput {
    pub intensity: Intensity,
    /// Label chosen by the user; derived from intensity when absent
    pub mood_label: Option<String>,
    pub note: String,
    pub tags: BTreeSet<String>,
    pub voice_note_ref: Option<String>,
    /// Entry time; now when absent
    pub timestamp: Option<DateTime<Utc>>,
}

impl MoodInput {
    pub fn new(intensity: Intensity, note: impl Into<String>) -> Self {
        Self {
            intensity,
            mood_label: None,
            note: note.into(),
            tags: BTreeSet::new(),
            voice_note_ref: None,
            timestamp: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.mood_label = Some(label.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_voice_note(mut self, reference: impl Into<String>) -> Self {
        self.voice_note_ref = Some(reference.into());
        self
    }
}

/// Result of decrypting a protected text field
///
/// A field that fails authentication is reported as `Corrupt`, never as an
/// empty or placeholder string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DecryptedText {
    Plain { text: String },
    Corrupt { reason: String },
}

impl DecryptedText {
    pub fn as_plain(&self) -> Option<&str> {
        match self {
            DecryptedText::Plain { text } => Some(text),
            DecryptedText::Corrupt { .. } => None,
        }
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, DecryptedText::Corrupt { .. })
    }
}

/// Mood entry with its note decrypted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub mood_label: String,
    pub intensity: Intensity,
    pub note: DecryptedText,
    pub tags: BTreeSet<String>,
    pub voice_note_ref: Option<String>,
}

/// Single point of the intensity history fed to the baseline engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoodObservation {
    pub timestamp: DateTime<Utc>,
    pub intensity: Intensity,
}

/// Filter for listing mood entries; `None` fields match everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MoodFilter {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub min_intensity: Option<Intensity>,
    pub max_intensity: Option<Intensity>,
    pub tag: Option<String>,
    pub label: Option<String>,
}

/// Rolling baseline derived from the mood intensity window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub rolling_mean: f64,
    pub rolling_std: f64,
    pub z_score: f64,
    pub change_point_detected: bool,
    /// min(1, observed_count / window_size)
    pub confidence: f64,
    pub window_size: usize,
    pub observed_count: usize,
    pub computed_at: DateTime<Utc>,
}

/// Recommendation priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

/// Intervention chosen for the current mood state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub intervention_id: String,
    pub priority: Priority,
    pub reason: String,
    pub duration_minutes: u32,
    /// Confidence of the baseline the choice was made from
    pub confidence: f64,
    /// True when every candidate was excluded and the canonical fallback was used
    pub fallback: bool,
}

/// Intervention session record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionRun {
    pub id: String,
    pub intervention_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub outcome: Option<DecryptedText>,
    pub effectiveness: Option<Effectiveness>,
}

/// Record types gated by consent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    MoodEntry,
    Baseline,
    InterventionRun,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::MoodEntry => "mood entries",
            RecordKind::Baseline => "baselines",
            RecordKind::InterventionRun => "intervention runs",
        }
    }
}

/// Per-user privacy preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentSettings {
    pub mood_data_consent: bool,
    pub behavioral_data_consent: bool,
    pub analytics_consent: bool,
    pub crash_reporting_consent: bool,
    pub local_storage_only: bool,
    /// Records older than this are purged; 0 deletes everything
    pub data_retention_days: u32,
}

impl Default for ConsentSettings {
    /// Settings written at account creation: local-only mood tracking
    fn default() -> Self {
        Self {
            mood_data_consent: true,
            behavioral_data_consent: true,
            analytics_consent: false,
            crash_reporting_consent: false,
            local_storage_only: true,
            data_retention_days: 365,
        }
    }
}

impl ConsentSettings {
    /// Settings after the user revokes everything
    pub fn revoked() -> Self {
        Self {
            mood_data_consent: false,
            behavioral_data_consent: false,
            analytics_consent: false,
            crash_reporting_consent: false,
            local_storage_only: true,
            data_retention_days: 0,
        }
    }

    /// Whether records of `kind` may be written
    pub fn permits(&self, kind: RecordKind) -> bool {
        match kind {
            RecordKind::MoodEntry | RecordKind::Baseline => self.mood_data_consent,
            RecordKind::InterventionRun => self.behavioral_data_consent,
        }
    }
}

/// Crisis severity tier, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrisisSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl CrisisSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrisisSeverity::Low => "low",
            CrisisSeverity::Medium => "medium",
            CrisisSeverity::High => "high",
            CrisisSeverity::Critical => "critical",
        }
    }
}

/// Result of scanning free text for crisis language
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrisisScan {
    pub detected: bool,
    /// Highest matched tier; `Low` when nothing matched
    pub severity: CrisisSeverity,
    pub matched_keywords: Vec<String>,
}

impl CrisisScan {
    pub fn is_critical(&self) -> bool {
        self.detected && self.severity == CrisisSeverity::Critical
    }
}

/// Crisis support contact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrisisResource {
    pub name: String,
    pub contact: String,
    pub country_code: String,
    pub available_24h: bool,
}

/// Fixed response emitted when the crisis gate short-circuits the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrisisResponse {
    pub message: String,
    pub resources: Vec<CrisisResource>,
}

/// Direction of the recent mood trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Improving,
    Declining,
    Stable,
}

/// Linear trend over the recent mood history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodTrend {
    pub direction: TrendDirection,
    pub slope: f64,
    pub correlation: f64,
}

/// Dashboard summary of the mood history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodInsights {
    pub trend: MoodTrend,
    pub average_mood: f64,
    pub streak_days: u32,
    pub total_entries: usize,
}

/// Decrypted snapshot for user-initiated backup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSnapshot {
    pub version: String,
    pub export_date: DateTime<Utc>,
    pub user: UserSummary,
    pub mood_entries: Vec<MoodEntry>,
    pub baselines: Vec<Baseline>,
    pub interventions: Vec<InterventionRun>,
    pub consent: Option<ConsentSettings>,
}
