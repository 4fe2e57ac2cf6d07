//! Error types for MindWell Core

use thiserror::Error;

/// Errors surfaced by the key manager, the encrypted store and the pipeline facade.
///
/// Baseline computation, recommendation selection and crisis scanning never
/// fail and do not appear here.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Authentication failed: incorrect password")]
    Authentication,

    #[error("Too many failed unlock attempts, retry in {retry_after_secs}s")]
    LockedOut { retry_after_secs: i64 },

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Consent not given for {0}")]
    ConsentDenied(String),

    #[error("Session is locked")]
    SessionLocked,

    #[error("No account exists on this device")]
    NoAccount,

    #[error("An account already exists on this device")]
    AccountExists,

    #[error("Not found: {0}")]
    NotFound(String),
}
