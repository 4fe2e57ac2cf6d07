//! Encrypted local store
//!
//! SQLite-backed persistence for users, mood entries, baselines, intervention
//! runs and consent settings. Free-text fields (mood notes, intervention
//! outcomes) are sealed with the session key before they touch the database;
//! timestamps, intensities, labels and tags stay plaintext so they can be
//! indexed and filtered.

use crate::crypto::{self, SessionKey};
use crate::error::CoreError;
use crate::keys::CredentialStore;
use crate::types::{
    Baseline, ConsentSettings, DecryptedText, Effectiveness, ExportSnapshot, Intensity,
    InterventionRun, MoodEntry, MoodFilter, MoodInput, MoodObservation, RecordKind, User,
    UserSummary,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// Version tag written into export snapshots
pub const EXPORT_FORMAT_VERSION: &str = "1.0.0";

const SCHEMA: &str = "BEGIN;
    CREATE TABLE IF NOT EXISTS users (
        user_id TEXT PRIMARY KEY,
        salt TEXT NOT NULL,
        key_verifier TEXT NOT NULL,
        kdf_iterations INTEGER NOT NULL,
        created_at_us INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS mood_entries (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        timestamp_us INTEGER NOT NULL,
        mood_label TEXT NOT NULL,
        intensity INTEGER NOT NULL CHECK (intensity BETWEEN 1 AND 5),
        note_encrypted TEXT NOT NULL,
        tags TEXT NOT NULL,
        voice_note_ref TEXT
    );
    CREATE INDEX IF NOT EXISTS mood_entries_user_ts_idx ON mood_entries(user_id, timestamp_us);
    CREATE INDEX IF NOT EXISTS mood_entries_intensity_idx ON mood_entries(user_id, intensity);
    CREATE TABLE IF NOT EXISTS baselines (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        rolling_mean REAL NOT NULL,
        rolling_std REAL NOT NULL,
        z_score REAL NOT NULL,
        change_point INTEGER NOT NULL,
        confidence REAL NOT NULL,
        window_size INTEGER NOT NULL,
        observed_count INTEGER NOT NULL,
        computed_at_us INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS baselines_user_idx ON baselines(user_id, computed_at_us);
    CREATE TABLE IF NOT EXISTS intervention_runs (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        intervention_id TEXT NOT NULL,
        start_us INTEGER NOT NULL,
        end_us INTEGER,
        outcome_encrypted TEXT,
        effectiveness INTEGER CHECK (effectiveness IS NULL OR effectiveness BETWEEN 1 AND 5)
    );
    CREATE INDEX IF NOT EXISTS intervention_runs_user_idx ON intervention_runs(user_id, start_us);
    CREATE TABLE IF NOT EXISTS consent_settings (
        user_id TEXT PRIMARY KEY,
        mood_data_consent INTEGER NOT NULL,
        behavioral_data_consent INTEGER NOT NULL,
        analytics_consent INTEGER NOT NULL,
        crash_reporting_consent INTEGER NOT NULL,
        local_storage_only INTEGER NOT NULL,
        data_retention_days INTEGER NOT NULL,
        updated_at_us INTEGER NOT NULL
    );
    COMMIT;";

/// Row counts per table for one user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCounts {
    pub users: usize,
    pub mood_entries: usize,
    pub baselines: usize,
    pub intervention_runs: usize,
    pub consent_settings: usize,
}

impl RecordCounts {
    pub fn total(&self) -> usize {
        self.users
            + self.mood_entries
            + self.baselines
            + self.intervention_runs
            + self.consent_settings
    }
}

/// Encrypted store over an embedded SQLite database
pub struct EncryptedStore {
    conn: Connection,
}

impl EncryptedStore {
    /// Open (or create) a database file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        let conn = Connection::open(path.as_ref())?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        debug!(path = %path.as_ref().display(), journal_mode = %mode, "Opened mood store");
        Self::init(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self, CoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, CoreError> {
        // Deleted rows are overwritten with zeros instead of left in free pages.
        let _: i64 = conn.pragma_update_and_check(None, "secure_delete", "ON", |row| row.get(0))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Run `f` inside one transaction; an error rolls every write back
    pub fn in_transaction<T, F>(&self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&Self) -> Result<T, CoreError>,
    {
        let tx = self.conn.unchecked_transaction()?;
        let value = f(self)?;
        tx.commit()?;
        Ok(value)
    }

    // ------------------------------------------------------------------
    // Consent
    // ------------------------------------------------------------------

    /// Insert or replace the consent settings of a user
    pub fn save_consent(&self, user_id: &str, settings: &ConsentSettings) -> Result<(), CoreError> {
        self.conn.execute(
            "INSERT INTO consent_settings (user_id, mood_data_consent, behavioral_data_consent,
                analytics_consent, crash_reporting_consent, local_storage_only,
                data_retention_days, updated_at_us)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(user_id) DO UPDATE SET
                mood_data_consent = excluded.mood_data_consent,
                behavioral_data_consent = excluded.behavioral_data_consent,
                analytics_consent = excluded.analytics_consent,
                crash_reporting_consent = excluded.crash_reporting_consent,
                local_storage_only = excluded.local_storage_only,
                data_retention_days = excluded.data_retention_days,
                updated_at_us = excluded.updated_at_us",
            params![
                user_id,
                settings.mood_data_consent,
                settings.behavioral_data_consent,
                settings.analytics_consent,
                settings.crash_reporting_consent,
                settings.local_storage_only,
                settings.data_retention_days as i64,
                Utc::now().timestamp_micros(),
            ],
        )?;
        debug!(user_id, "Saved consent settings");
        Ok(())
    }

    /// Consent settings of a user, if any were saved
    pub fn consent(&self, user_id: &str) -> Result<Option<ConsentSettings>, CoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT mood_data_consent, behavioral_data_consent, analytics_consent,
                        crash_reporting_consent, local_storage_only, data_retention_days
                 FROM consent_settings WHERE user_id = ?1",
                params![user_id],
                |r| {
                    Ok((
                        r.get::<_, bool>(0)?,
                        r.get::<_, bool>(1)?,
                        r.get::<_, bool>(2)?,
                        r.get::<_, bool>(3)?,
                        r.get::<_, bool>(4)?,
                        r.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((mood, behavioral, analytics, crash, local_only, retention)) = row else {
            return Ok(None);
        };
        let data_retention_days = u32::try_from(retention)
            .map_err(|_| CoreError::Validation(format!("invalid retention days: {}", retention)))?;

        Ok(Some(ConsentSettings {
            mood_data_consent: mood,
            behavioral_data_consent: behavioral,
            analytics_consent: analytics,
            crash_reporting_consent: crash,
            local_storage_only: local_only,
            data_retention_days,
        }))
    }

    /// Fail with `ConsentDenied` unless the user consented to writing `kind`.
    /// A user without saved settings has not consented to anything.
    fn ensure_consent(&self, user_id: &str, kind: RecordKind) -> Result<(), CoreError> {
        let permitted = self
            .consent(user_id)?
            .map(|settings| settings.permits(kind))
            .unwrap_or(false);
        if permitted {
            Ok(())
        } else {
            debug!(user_id, record = kind.as_str(), "Write refused by consent settings");
            Err(CoreError::ConsentDenied(kind.as_str().to_string()))
        }
    }

    // ------------------------------------------------------------------
    // Mood entries
    // ------------------------------------------------------------------

    /// Append a mood entry, sealing its note under `key`
    pub fn put_mood_entry(
        &self,
        key: &SessionKey,
        user_id: &str,
        input: &MoodInput,
    ) -> Result<MoodEntry, CoreError> {
        self.ensure_consent(user_id, RecordKind::MoodEntry)?;

        let id = uuid::Uuid::new_v4().to_string();
        let timestamp = input.timestamp.unwrap_or_else(Utc::now);
        let mood_label = input
            .mood_label
            .clone()
            .filter(|label| !label.trim().is_empty())
            .unwrap_or_else(|| input.intensity.default_label().to_string());
        let note_encrypted = crypto::encrypt_field(&input.note, key)?;
        let tags = serde_json::to_string(&input.tags)?;

        self.conn.execute(
            "INSERT INTO mood_entries (id, user_id, timestamp_us, mood_label, intensity,
                note_encrypted, tags, voice_note_ref)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                user_id,
                timestamp.timestamp_micros(),
                mood_label,
                input.intensity.value() as i64,
                note_encrypted,
                tags,
                input.voice_note_ref,
            ],
        )?;

        debug!(entry_id = %id, intensity = input.intensity.value(), "Stored mood entry");

        Ok(MoodEntry {
            id,
            timestamp,
            mood_label,
            intensity: input.intensity,
            note: DecryptedText::Plain {
                text: input.note.clone(),
            },
            tags: input.tags.clone(),
            voice_note_ref: input.voice_note_ref.clone(),
        })
    }

    /// Fetch one mood entry
    pub fn get_mood_entry(
        &self,
        key: &SessionKey,
        user_id: &str,
        id: &str,
    ) -> Result<Option<MoodEntry>, CoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, timestamp_us, mood_label, intensity, note_encrypted, tags,
                        voice_note_ref
                 FROM mood_entries WHERE user_id = ?1 AND id = ?2",
                params![user_id, id],
                MoodRow::from_row,
            )
            .optional()?;
        row.map(|r| r.into_entry(key)).transpose()
    }

    /// List mood entries newest first.
    ///
    /// Notes that fail to decrypt come back as [`DecryptedText::Corrupt`] on
    /// their own record; the rest of the page is unaffected.
    pub fn list_mood_entries(
        &self,
        key: &SessionKey,
        user_id: &str,
        filter: &MoodFilter,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<MoodEntry>, CoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, timestamp_us, mood_label, intensity, note_encrypted, tags, voice_note_ref
             FROM mood_entries
             WHERE user_id = ?1
               AND (?2 IS NULL OR timestamp_us >= ?2)
               AND (?3 IS NULL OR timestamp_us <= ?3)
               AND (?4 IS NULL OR intensity >= ?4)
               AND (?5 IS NULL OR intensity <= ?5)
               AND (?6 IS NULL OR mood_label = ?6)
               AND (?7 IS NULL OR EXISTS (
                    SELECT 1 FROM json_each(mood_entries.tags) WHERE json_each.value = ?7))
             ORDER BY timestamp_us DESC, rowid DESC
             LIMIT ?8 OFFSET ?9",
        )?;

        let rows = stmt
            .query_map(
                params![
                    user_id,
                    filter.since.map(|t| t.timestamp_micros()),
                    filter.until.map(|t| t.timestamp_micros()),
                    filter.min_intensity.map(|i| i.value() as i64),
                    filter.max_intensity.map(|i| i.value() as i64),
                    filter.label,
                    filter.tag,
                    limit.map(|l| l as i64).unwrap_or(-1),
                    offset as i64,
                ],
                MoodRow::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(|row| row.into_entry(key)).collect()
    }

    /// Number of mood entries stored for a user
    pub fn count_mood_entries(&self, user_id: &str) -> Result<usize, CoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM mood_entries WHERE user_id = ?1",
            params![user_id],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    /// Delete one mood entry; returns whether it existed
    pub fn delete_mood_entry(&self, user_id: &str, id: &str) -> Result<bool, CoreError> {
        let changes = self.conn.execute(
            "DELETE FROM mood_entries WHERE user_id = ?1 AND id = ?2",
            params![user_id, id],
        )?;
        debug!(entry_id = id, deleted = changes > 0, "Delete mood entry");
        Ok(changes > 0)
    }

    /// The most recent `n` observations in chronological order
    pub fn intensity_window(
        &self,
        user_id: &str,
        n: usize,
    ) -> Result<Vec<MoodObservation>, CoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT timestamp_us, intensity FROM mood_entries
             WHERE user_id = ?1
             ORDER BY timestamp_us DESC, rowid DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![user_id, n as i64], |r| {
                Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut window = rows
            .into_iter()
            .map(|(ts, intensity)| -> Result<_, CoreError> {
                Ok(MoodObservation {
                    timestamp: from_micros(ts)?,
                    intensity: intensity_from_db(intensity)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        window.reverse();
        Ok(window)
    }

    // ------------------------------------------------------------------
    // Baselines
    // ------------------------------------------------------------------

    /// Append a computed baseline
    pub fn save_baseline(&self, user_id: &str, baseline: &Baseline) -> Result<(), CoreError> {
        self.ensure_consent(user_id, RecordKind::Baseline)?;
        self.conn.execute(
            "INSERT INTO baselines (user_id, rolling_mean, rolling_std, z_score, change_point,
                confidence, window_size, observed_count, computed_at_us)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                user_id,
                baseline.rolling_mean,
                baseline.rolling_std,
                baseline.z_score,
                baseline.change_point_detected,
                baseline.confidence,
                baseline.window_size as i64,
                baseline.observed_count as i64,
                baseline.computed_at.timestamp_micros(),
            ],
        )?;
        Ok(())
    }

    /// Most recently computed baseline
    pub fn latest_baseline(&self, user_id: &str) -> Result<Option<Baseline>, CoreError> {
        Ok(self.list_baselines(user_id, Some(1))?.into_iter().next())
    }

    /// Baselines newest first
    pub fn list_baselines(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Baseline>, CoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT rolling_mean, rolling_std, z_score, change_point, confidence,
                    window_size, observed_count, computed_at_us
             FROM baselines WHERE user_id = ?1
             ORDER BY computed_at_us DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![user_id, limit.map(|l| l as i64).unwrap_or(-1)], |r| {
                Ok((
                    r.get::<_, f64>(0)?,
                    r.get::<_, f64>(1)?,
                    r.get::<_, f64>(2)?,
                    r.get::<_, bool>(3)?,
                    r.get::<_, f64>(4)?,
                    r.get::<_, i64>(5)?,
                    r.get::<_, i64>(6)?,
                    r.get::<_, i64>(7)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut baselines = Vec::with_capacity(rows.len());
        for (mean, std, z, change_point, confidence, window, observed, computed_at) in rows {
            baselines.push(Baseline {
                rolling_mean: mean,
                rolling_std: std,
                z_score: z,
                change_point_detected: change_point,
                confidence,
                window_size: window.max(0) as usize,
                observed_count: observed.max(0) as usize,
                computed_at: from_micros(computed_at)?,
            });
        }
        Ok(baselines)
    }

    // ------------------------------------------------------------------
    // Intervention runs
    // ------------------------------------------------------------------

    /// Record the start of an intervention session
    pub fn start_intervention_run(
        &self,
        user_id: &str,
        intervention_id: &str,
        start_time: DateTime<Utc>,
    ) -> Result<InterventionRun, CoreError> {
        self.ensure_consent(user_id, RecordKind::InterventionRun)?;
        if intervention_id.trim().is_empty() {
            return Err(CoreError::Validation(
                "intervention id must not be empty".to_string(),
            ));
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO intervention_runs (id, user_id, intervention_id, start_us)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, user_id, intervention_id, start_time.timestamp_micros()],
        )?;
        debug!(run_id = %id, intervention_id, "Started intervention run");

        Ok(InterventionRun {
            id,
            intervention_id: intervention_id.to_string(),
            start_time,
            end_time: None,
            outcome: None,
            effectiveness: None,
        })
    }

    /// Complete an intervention run. A run can be completed only once.
    pub fn complete_intervention_run(
        &self,
        key: &SessionKey,
        user_id: &str,
        run_id: &str,
        end_time: DateTime<Utc>,
        effectiveness: Option<Effectiveness>,
        outcome: Option<&str>,
    ) -> Result<InterventionRun, CoreError> {
        self.ensure_consent(user_id, RecordKind::InterventionRun)?;

        let existing = self
            .get_intervention_run(key, user_id, run_id)?
            .ok_or_else(|| CoreError::NotFound(format!("intervention run {}", run_id)))?;
        if existing.end_time.is_some() {
            return Err(CoreError::Validation(format!(
                "intervention run {} is already completed",
                run_id
            )));
        }
        if end_time < existing.start_time {
            return Err(CoreError::Validation(
                "intervention end time precedes its start time".to_string(),
            ));
        }

        let outcome_encrypted = outcome
            .map(|text| crypto::encrypt_field(text, key))
            .transpose()?;

        let changes = self.conn.execute(
            "UPDATE intervention_runs
             SET end_us = ?1, outcome_encrypted = ?2, effectiveness = ?3
             WHERE user_id = ?4 AND id = ?5 AND end_us IS NULL",
            params![
                end_time.timestamp_micros(),
                outcome_encrypted,
                effectiveness.map(|e| e.value() as i64),
                user_id,
                run_id,
            ],
        )?;
        if changes == 0 {
            return Err(CoreError::Validation(format!(
                "intervention run {} is already completed",
                run_id
            )));
        }
        debug!(run_id, "Completed intervention run");

        Ok(InterventionRun {
            end_time: Some(end_time),
            outcome: outcome.map(|text| DecryptedText::Plain {
                text: text.to_string(),
            }),
            effectiveness,
            ..existing
        })
    }

    /// Fetch one intervention run
    pub fn get_intervention_run(
        &self,
        key: &SessionKey,
        user_id: &str,
        run_id: &str,
    ) -> Result<Option<InterventionRun>, CoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, intervention_id, start_us, end_us, outcome_encrypted, effectiveness
                 FROM intervention_runs WHERE user_id = ?1 AND id = ?2",
                params![user_id, run_id],
                RunRow::from_row,
            )
            .optional()?;
        row.map(|r| r.into_run(key)).transpose()
    }

    /// Intervention runs newest first
    pub fn list_intervention_runs(
        &self,
        key: &SessionKey,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<InterventionRun>, CoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, intervention_id, start_us, end_us, outcome_encrypted, effectiveness
             FROM intervention_runs WHERE user_id = ?1
             ORDER BY start_us DESC, rowid DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(
                params![user_id, limit.map(|l| l as i64).unwrap_or(-1)],
                RunRow::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(|row| row.into_run(key)).collect()
    }

    /// Distinct interventions started at or after `since`, for cooldown filtering
    pub fn recent_intervention_ids(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<String>, CoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT intervention_id FROM intervention_runs
             WHERE user_id = ?1 AND start_us >= ?2
             ORDER BY intervention_id",
        )?;
        let ids = stmt
            .query_map(params![user_id, since.timestamp_micros()], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    // ------------------------------------------------------------------
    // Bulk operations
    // ------------------------------------------------------------------

    /// Rows currently stored for a user in each table
    pub fn record_counts(&self, user_id: &str) -> Result<RecordCounts, CoreError> {
        let count = |table: &str| -> Result<usize, CoreError> {
            let sql = format!("SELECT COUNT(*) FROM {} WHERE user_id = ?1", table);
            let n: i64 = self.conn.query_row(&sql, params![user_id], |r| r.get(0))?;
            Ok(n as usize)
        };
        Ok(RecordCounts {
            users: count("users")?,
            mood_entries: count("mood_entries")?,
            baselines: count("baselines")?,
            intervention_runs: count("intervention_runs")?,
            consent_settings: count("consent_settings")?,
        })
    }

    /// Delete every record of a user from every table in a single transaction.
    ///
    /// Either all tables are cleared or none are.
    pub fn secure_wipe_all(&mut self, user_id: &str) -> Result<RecordCounts, CoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let removed = RecordCounts {
            mood_entries: tx.execute(
                "DELETE FROM mood_entries WHERE user_id = ?1",
                params![user_id],
            )?,
            baselines: tx.execute("DELETE FROM baselines WHERE user_id = ?1", params![user_id])?,
            intervention_runs: tx.execute(
                "DELETE FROM intervention_runs WHERE user_id = ?1",
                params![user_id],
            )?,
            consent_settings: tx.execute(
                "DELETE FROM consent_settings WHERE user_id = ?1",
                params![user_id],
            )?,
            users: tx.execute("DELETE FROM users WHERE user_id = ?1", params![user_id])?,
        };

        tx.commit()?;

        info!(user_id, removed = removed.total(), "Wiped all user data");
        Ok(removed)
    }

    /// Delete entries, baselines and runs older than `cutoff` in a single transaction
    pub fn purge_older_than(
        &mut self,
        user_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, CoreError> {
        let cutoff_us = cutoff.timestamp_micros();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut removed = tx.execute(
            "DELETE FROM mood_entries WHERE user_id = ?1 AND timestamp_us < ?2",
            params![user_id, cutoff_us],
        )?;
        removed += tx.execute(
            "DELETE FROM baselines WHERE user_id = ?1 AND computed_at_us < ?2",
            params![user_id, cutoff_us],
        )?;
        removed += tx.execute(
            "DELETE FROM intervention_runs WHERE user_id = ?1 AND start_us < ?2",
            params![user_id, cutoff_us],
        )?;

        tx.commit()?;
        if removed > 0 {
            info!(user_id, removed, "Purged records past retention");
        }
        Ok(removed)
    }

    /// Decrypted snapshot of everything stored for a user
    pub fn export(&self, key: &SessionKey, user_id: &str) -> Result<ExportSnapshot, CoreError> {
        let user = self
            .load_user_by_id(user_id)?
            .ok_or_else(|| CoreError::NotFound(format!("user {}", user_id)))?;

        let snapshot = ExportSnapshot {
            version: EXPORT_FORMAT_VERSION.to_string(),
            export_date: Utc::now(),
            user: UserSummary::from(&user),
            mood_entries: self.list_mood_entries(key, user_id, &MoodFilter::default(), None, 0)?,
            baselines: self.list_baselines(user_id, None)?,
            interventions: self.list_intervention_runs(key, user_id, None)?,
            consent: self.consent(user_id)?,
        };

        let corrupt = snapshot
            .mood_entries
            .iter()
            .filter(|e| e.note.is_corrupt())
            .count();
        info!(
            user_id,
            entries = snapshot.mood_entries.len(),
            corrupt,
            "Exported user data"
        );
        Ok(snapshot)
    }

    fn load_user_by_id(&self, user_id: &str) -> Result<Option<User>, CoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT user_id, salt, key_verifier, kdf_iterations, created_at_us
                 FROM users WHERE user_id = ?1",
                params![user_id],
                UserRow::from_row,
            )
            .optional()?;
        row.map(UserRow::into_user).transpose()
    }
}

impl CredentialStore for EncryptedStore {
    fn load_user(&self) -> Result<Option<User>, CoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT user_id, salt, key_verifier, kdf_iterations, created_at_us
                 FROM users ORDER BY created_at_us ASC LIMIT 1",
                [],
                UserRow::from_row,
            )
            .optional()?;
        row.map(UserRow::into_user).transpose()
    }

    fn save_user(&self, user: &User) -> Result<(), CoreError> {
        self.conn.execute(
            "INSERT INTO users (user_id, salt, key_verifier, kdf_iterations, created_at_us)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.user_id,
                user.salt,
                user.key_verifier,
                user.kdf_iterations as i64,
                user.created_at.timestamp_micros(),
            ],
        )?;
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Row mapping
// ----------------------------------------------------------------------

struct UserRow {
    user_id: String,
    salt: String,
    key_verifier: String,
    kdf_iterations: i64,
    created_at_us: i64,
}

impl UserRow {
    fn from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: r.get(0)?,
            salt: r.get(1)?,
            key_verifier: r.get(2)?,
            kdf_iterations: r.get(3)?,
            created_at_us: r.get(4)?,
        })
    }

    fn into_user(self) -> Result<User, CoreError> {
        Ok(User {
            user_id: self.user_id,
            salt: self.salt,
            key_verifier: self.key_verifier,
            kdf_iterations: u32::try_from(self.kdf_iterations).map_err(|_| {
                CoreError::Validation(format!("invalid kdf iterations: {}", self.kdf_iterations))
            })?,
            created_at: from_micros(self.created_at_us)?,
        })
    }
}

struct MoodRow {
    id: String,
    timestamp_us: i64,
    mood_label: String,
    intensity: i64,
    note_encrypted: String,
    tags: String,
    voice_note_ref: Option<String>,
}

impl MoodRow {
    fn from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            timestamp_us: r.get(1)?,
            mood_label: r.get(2)?,
            intensity: r.get(3)?,
            note_encrypted: r.get(4)?,
            tags: r.get(5)?,
            voice_note_ref: r.get(6)?,
        })
    }

    fn into_entry(self, key: &SessionKey) -> Result<MoodEntry, CoreError> {
        let note = open_field(&self.note_encrypted, key, &self.id);
        let tags: BTreeSet<String> = serde_json::from_str(&self.tags)?;
        Ok(MoodEntry {
            timestamp: from_micros(self.timestamp_us)?,
            intensity: intensity_from_db(self.intensity)?,
            id: self.id,
            mood_label: self.mood_label,
            note,
            tags,
            voice_note_ref: self.voice_note_ref,
        })
    }
}

struct RunRow {
    id: String,
    intervention_id: String,
    start_us: i64,
    end_us: Option<i64>,
    outcome_encrypted: Option<String>,
    effectiveness: Option<i64>,
}

impl RunRow {
    fn from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            intervention_id: r.get(1)?,
            start_us: r.get(2)?,
            end_us: r.get(3)?,
            outcome_encrypted: r.get(4)?,
            effectiveness: r.get(5)?,
        })
    }

    fn into_run(self, key: &SessionKey) -> Result<InterventionRun, CoreError> {
        let outcome = self
            .outcome_encrypted
            .as_deref()
            .map(|sealed| open_field(sealed, key, &self.id));
        Ok(InterventionRun {
            start_time: from_micros(self.start_us)?,
            end_time: self.end_us.map(from_micros).transpose()?,
            effectiveness: self.effectiveness.map(intensity_from_db).transpose()?,
            outcome,
            id: self.id,
            intervention_id: self.intervention_id,
        })
    }
}

/// Decrypt a sealed field, isolating failure to a corrupt marker
fn open_field(sealed: &str, key: &SessionKey, record_id: &str) -> DecryptedText {
    match crypto::decrypt_field(sealed, key) {
        Ok(text) => DecryptedText::Plain { text },
        Err(e) => {
            warn!(record_id, "Stored field could not be decrypted");
            DecryptedText::Corrupt {
                reason: e.to_string(),
            }
        }
    }
}

fn from_micros(us: i64) -> Result<DateTime<Utc>, CoreError> {
    DateTime::from_timestamp_micros(us)
        .ok_or_else(|| CoreError::Validation(format!("timestamp out of range: {}", us)))
}

fn intensity_from_db(value: i64) -> Result<Intensity, CoreError> {
    u8::try_from(value)
        .map_err(|_| CoreError::Validation(format!("stored intensity out of range: {}", value)))
        .and_then(Intensity::new)
}

#[cfg(test)]
impl EncryptedStore {
    /// Make every consent insert fail, to exercise rollback paths
    pub(crate) fn fail_consent_writes(&self) {
        self.conn
            .execute_batch(
                "CREATE TRIGGER reject_consent BEFORE INSERT ON consent_settings
                 BEGIN SELECT RAISE(ABORT, 'consent write rejected'); END;",
            )
            .unwrap();
    }
}
