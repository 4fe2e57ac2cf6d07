//! Pipeline orchestration
//!
//! This module provides the public API for MindWell Core. [`WellnessCore`]
//! owns the encrypted store and the key manager and runs every mood
//! submission through the same stages:
//!
//! 1. CrisisGate - scan free text; a critical match stops here
//! 2. EncryptedStore - seal the note and append the entry
//! 3. BaselineEngine - recompute the baseline over the updated window
//! 4. RecommendationSelector - pick an intervention outside its cooldown

use crate::baseline::BaselineEngine;
use crate::config::{self, CoreConfig};
use crate::crisis;
use crate::error::CoreError;
use crate::insights;
use crate::keys::{CredentialStore, KeyManager};
use crate::recommend::{self, RecommendationSelector};
use crate::store::{EncryptedStore, RecordCounts};
use crate::types::{
    Baseline, ConsentSettings, CrisisResponse, CrisisScan, Effectiveness, ExportSnapshot,
    Intensity, InterventionRun, MoodEntry, MoodFilter, MoodInput, MoodInsights, Recommendation,
    UserSummary,
};
use chrono::{DateTime, Duration, Local, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

/// Phrase the user must type to confirm destructive operations
pub const CONFIRMATION_PHRASE: &str = "DELETE ALL MY DATA";

/// Number of recent entries summarized by [`WellnessCore::insights`]
pub const INSIGHTS_HISTORY_LIMIT: usize = 100;

/// Result of a call that accepts free text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Gated<T> {
    /// The text passed the crisis gate and the operation completed
    Accepted { result: T },
    /// Critical crisis language was found; nothing was stored
    Crisis {
        scan: CrisisScan,
        response: CrisisResponse,
    },
}

impl<T> Gated<T> {
    pub fn accepted(self) -> Option<T> {
        match self {
            Gated::Accepted { result } => Some(result),
            Gated::Crisis { .. } => None,
        }
    }

    pub fn is_crisis(&self) -> bool {
        matches!(self, Gated::Crisis { .. })
    }
}

/// Everything produced by logging one mood entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodLogged {
    pub entry: MoodEntry,
    pub baseline: Baseline,
    pub recommendation: Recommendation,
    /// Non-critical scan result, so the UI can offer gentler support
    pub scan: CrisisScan,
}

/// The on-device wellness core
pub struct WellnessCore {
    store: EncryptedStore,
    keys: KeyManager,
    engine: BaselineEngine,
    selector: RecommendationSelector,
    config: CoreConfig,
}

impl WellnessCore {
    /// Open (or create) the database at `path`
    pub fn open<P: AsRef<Path>>(path: P, config: CoreConfig) -> Result<Self, CoreError> {
        Self::with_store(EncryptedStore::open(path)?, config)
    }

    /// Core backed by a throwaway in-memory database
    pub fn in_memory(config: CoreConfig) -> Result<Self, CoreError> {
        Self::with_store(EncryptedStore::open_in_memory()?, config)
    }

    pub fn with_store(store: EncryptedStore, config: CoreConfig) -> Result<Self, CoreError> {
        config.validate()?;
        Ok(Self {
            store,
            keys: KeyManager::new(&config),
            engine: BaselineEngine::from_config(&config),
            selector: RecommendationSelector::new(),
            config,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Account and session
    // ------------------------------------------------------------------

    pub fn has_account(&self) -> Result<bool, CoreError> {
        Ok(self.store.load_user()?.is_some())
    }

    pub fn is_unlocked(&self) -> bool {
        self.keys.is_unlocked()
    }

    /// Create the device account, store default consent and unlock
    pub fn create_account(&mut self, password: &str) -> Result<UserSummary, CoreError> {
        let was_unlocked = self.keys.is_unlocked();
        let keys = &mut self.keys;
        let created = self.store.in_transaction(|store| {
            let user = keys.create_new_key(store, password)?;
            store.save_consent(&user.user_id, &ConsentSettings::default())?;
            Ok(user)
        });

        match created {
            Ok(user) => Ok(UserSummary::from(&user)),
            Err(err) => {
                // The user row was rolled back, so the fresh session key is stale.
                if !was_unlocked {
                    self.keys.lock();
                }
                Err(err)
            }
        }
    }

    /// Unlock with the account password and apply the retention policy
    pub fn unlock(&mut self, password: &str) -> Result<(), CoreError> {
        self.keys.unlock(&self.store, password)?;
        let user_id = self.keys.user_id()?.to_string();
        self.enforce_retention(&user_id, Utc::now())?;
        Ok(())
    }

    /// Unlock with a previously exported key and apply the retention policy
    pub fn unlock_with_exported_key(&mut self, exported: &str) -> Result<(), CoreError> {
        self.keys.unlock_with_key(&self.store, exported)?;
        let user_id = self.keys.user_id()?.to_string();
        self.enforce_retention(&user_id, Utc::now())?;
        Ok(())
    }

    pub fn lock(&mut self) {
        self.keys.lock();
    }

    /// Base64 of the session key for user-held backup
    pub fn export_key(&self) -> Result<String, CoreError> {
        self.keys.export_key()
    }

    // ------------------------------------------------------------------
    // Mood logging
    // ------------------------------------------------------------------

    /// Log a mood with the current time
    pub fn log_mood<I, S>(
        &mut self,
        intensity: u8,
        note: &str,
        tags: I,
    ) -> Result<Gated<MoodLogged>, CoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let input = MoodInput::new(Intensity::new(intensity)?, note).with_tags(tags);
        self.log_mood_entry(input)
    }

    /// Log a fully specified mood entry
    pub fn log_mood_entry(&mut self, input: MoodInput) -> Result<Gated<MoodLogged>, CoreError> {
        self.log_at(input, Utc::now(), Local::now().hour())
    }

    fn log_at(
        &mut self,
        input: MoodInput,
        now: DateTime<Utc>,
        hour: u32,
    ) -> Result<Gated<MoodLogged>, CoreError> {
        let scan = crisis::scan(&input.note);
        if scan.is_critical() {
            return Ok(intercept(scan));
        }

        let key = self.keys.key()?;
        let user_id = self.keys.user_id()?;

        let entry = self.store.put_mood_entry(key, user_id, &input)?;

        let window = self
            .store
            .intensity_window(user_id, self.engine.window_size())?;
        let baseline = self.engine.compute(&window, now);
        self.store.save_baseline(user_id, &baseline)?;

        let recent = self.store.recent_intervention_ids(user_id, self.cooldown_start(now))?;
        let scoring = self.engine.compute_for_recommendation(&window, now);
        let recommendation = self.selector.select(&scoring, &recent, hour);

        info!(
            entry_id = %entry.id,
            intensity = entry.intensity.value(),
            z_score = baseline.z_score,
            intervention = %recommendation.intervention_id,
            priority = recommendation.priority.as_str(),
            "Logged mood entry"
        );

        Ok(Gated::Accepted {
            result: MoodLogged {
                entry,
                baseline,
                recommendation,
                scan,
            },
        })
    }

    /// Scan free text without storing anything
    pub fn scan_text(&self, text: &str) -> CrisisScan {
        crisis::scan(text)
    }

    /// The `n` most recent entries, newest first
    pub fn recent_entries(&self, n: usize) -> Result<Vec<MoodEntry>, CoreError> {
        self.entries(&MoodFilter::default(), Some(n), 0)
    }

    /// Filtered, paged entries, newest first
    pub fn entries(
        &self,
        filter: &MoodFilter,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<MoodEntry>, CoreError> {
        let key = self.keys.key()?;
        let user_id = self.keys.user_id()?;
        self.store.list_mood_entries(key, user_id, filter, limit, offset)
    }

    pub fn delete_entry(&self, id: &str) -> Result<bool, CoreError> {
        let user_id = self.keys.user_id()?;
        self.store.delete_mood_entry(user_id, id)
    }

    // ------------------------------------------------------------------
    // Baseline and recommendations
    // ------------------------------------------------------------------

    /// Baseline over the current intensity window
    pub fn baseline(&self) -> Result<Baseline, CoreError> {
        self.baseline_at(Utc::now())
    }

    fn baseline_at(&self, now: DateTime<Utc>) -> Result<Baseline, CoreError> {
        let user_id = self.keys.user_id()?;
        let window = self
            .store
            .intensity_window(user_id, self.engine.window_size())?;
        Ok(self.engine.compute(&window, now))
    }

    /// Recommendation for the current baseline at local `hour`
    pub fn recommendation(&self, hour: u32) -> Result<Recommendation, CoreError> {
        let now = Utc::now();
        let user_id = self.keys.user_id()?;
        let window = self
            .store
            .intensity_window(user_id, self.engine.window_size())?;
        let baseline = self.engine.compute_for_recommendation(&window, now);
        let recent = self.store.recent_intervention_ids(user_id, self.cooldown_start(now))?;
        Ok(self.selector.select(&baseline, &recent, hour))
    }

    fn cooldown_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        config::lookback(now, Duration::try_hours(self.config.cooldown_hours))
    }

    /// Summary statistics for the dashboard
    pub fn insights(&self, now: DateTime<Utc>) -> Result<MoodInsights, CoreError> {
        let user_id = self.keys.user_id()?;
        let history = self.store.intensity_window(user_id, INSIGHTS_HISTORY_LIMIT)?;
        Ok(insights::summarize(&history, now, self.config.trend_period_days))
    }

    // ------------------------------------------------------------------
    // Interventions
    // ------------------------------------------------------------------

    /// Record that the user started a catalogue intervention
    pub fn record_intervention_start(
        &self,
        intervention_id: &str,
    ) -> Result<InterventionRun, CoreError> {
        if recommend::lookup(intervention_id).is_none() {
            return Err(CoreError::Validation(format!(
                "unknown intervention: {}",
                intervention_id
            )));
        }
        let user_id = self.keys.user_id()?;
        self.store
            .start_intervention_run(user_id, intervention_id, Utc::now())
    }

    /// Complete a run. The outcome text goes through the crisis gate first.
    pub fn record_intervention_end(
        &self,
        run_id: &str,
        effectiveness: Option<Effectiveness>,
        outcome: Option<&str>,
    ) -> Result<Gated<InterventionRun>, CoreError> {
        if let Some(text) = outcome {
            let scan = crisis::scan(text);
            if scan.is_critical() {
                return Ok(intercept(scan));
            }
        }

        let key = self.keys.key()?;
        let user_id = self.keys.user_id()?;
        let run = self.store.complete_intervention_run(
            key,
            user_id,
            run_id,
            Utc::now(),
            effectiveness,
            outcome,
        )?;
        Ok(Gated::Accepted { result: run })
    }

    pub fn intervention_history(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<InterventionRun>, CoreError> {
        let key = self.keys.key()?;
        let user_id = self.keys.user_id()?;
        self.store.list_intervention_runs(key, user_id, limit)
    }

    // ------------------------------------------------------------------
    // Consent and retention
    // ------------------------------------------------------------------

    /// Current consent settings; a user without saved settings has consented to nothing
    pub fn consent(&self) -> Result<ConsentSettings, CoreError> {
        let user_id = self.keys.user_id()?;
        Ok(self
            .store
            .consent(user_id)?
            .unwrap_or_else(ConsentSettings::revoked))
    }

    /// Save new consent settings and apply their retention period immediately
    pub fn update_consent(&mut self, settings: ConsentSettings) -> Result<(), CoreError> {
        let user_id = self.keys.user_id()?.to_string();
        self.store.save_consent(&user_id, &settings)?;
        info!(
            mood = settings.mood_data_consent,
            behavioral = settings.behavioral_data_consent,
            retention_days = settings.data_retention_days,
            "Updated consent settings"
        );
        self.enforce_retention(&user_id, Utc::now())?;
        Ok(())
    }

    /// Purge records past the retention period. A period of 0 removes every
    /// record; the account and its consent settings remain.
    fn enforce_retention(&mut self, user_id: &str, now: DateTime<Utc>) -> Result<usize, CoreError> {
        let Some(consent) = self.store.consent(user_id)? else {
            return Ok(0);
        };
        let cutoff = if consent.data_retention_days == 0 {
            DateTime::<Utc>::MAX_UTC
        } else {
            config::lookback(now, Duration::try_days(i64::from(consent.data_retention_days)))
        };
        self.store.purge_older_than(user_id, cutoff)
    }

    // ------------------------------------------------------------------
    // Export and deletion
    // ------------------------------------------------------------------

    /// Decrypted snapshot of every record for user-initiated backup
    pub fn export_all(&self) -> Result<ExportSnapshot, CoreError> {
        let key = self.keys.key()?;
        let user_id = self.keys.user_id()?;
        self.store.export(key, user_id)
    }

    /// Delete the account and all its data. Requires an unlocked session.
    pub fn wipe_all(&mut self, confirmation: &str) -> Result<RecordCounts, CoreError> {
        check_confirmation(confirmation)?;
        let user_id = self.keys.user_id()?.to_string();
        let removed = self.store.secure_wipe_all(&user_id)?;
        self.keys.forget();
        Ok(removed)
    }

    /// Destroy the account of a user who forgot their password.
    ///
    /// Encrypted data cannot be recovered without the password, so the only
    /// way back in is to start over.
    pub fn reset_forgotten_password(
        &mut self,
        confirmation: &str,
    ) -> Result<RecordCounts, CoreError> {
        check_confirmation(confirmation)?;
        let user = self.store.load_user()?.ok_or(CoreError::NoAccount)?;
        let removed = self.store.secure_wipe_all(&user.user_id)?;
        self.keys.forget();
        warn!(user_id = %user.user_id, "Account reset after forgotten password");
        Ok(removed)
    }
}

fn intercept<T>(scan: CrisisScan) -> Gated<T> {
    info!(
        severity = scan.severity.as_str(),
        keywords = scan.matched_keywords.len(),
        "Crisis language intercepted, nothing stored"
    );
    Gated::Crisis {
        scan,
        response: crisis::crisis_response(),
    }
}

fn check_confirmation(confirmation: &str) -> Result<(), CoreError> {
    if confirmation == CONFIRMATION_PHRASE {
        Ok(())
    } else {
        debug!("Destructive operation refused: confirmation phrase mismatch");
        Err(CoreError::Validation(format!(
            "type \"{}\" to confirm",
            CONFIRMATION_PHRASE
        )))
    }
}
