//! Session key management
//!
//! The key manager owns the in-memory session key and its lock/unlock
//! lifecycle. Account creation stores a salt and a verifier (a known constant
//! sealed under the derived key); unlocking re-derives a candidate key and only
//! succeeds if the verifier opens to that constant.

use crate::config::{CoreConfig, MAX_LOCKOUT_SECONDS};
use crate::crypto::{self, SessionKey};
use crate::error::CoreError;
use crate::types::User;
use chrono::{DateTime, Duration, Utc};
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

/// Plaintext sealed as the key verifier
pub const VERIFIER_CONSTANT: &str = "mindwell-key-verifier-v1";

/// Persistence for account credentials (salt and verifier)
pub trait CredentialStore {
    /// Load the device user, if an account exists
    fn load_user(&self) -> Result<Option<User>, CoreError>;

    /// Persist a newly created user
    fn save_user(&self, user: &User) -> Result<(), CoreError>;
}

/// Holds the session key and enforces the unlock lockout
#[derive(Debug)]
pub struct KeyManager {
    key: Option<SessionKey>,
    user_id: Option<String>,
    failed_attempts: u32,
    locked_until: Option<DateTime<Utc>>,
    iterations: u32,
    max_attempts: u32,
    lockout: Duration,
    min_password_length: usize,
}

impl Default for KeyManager {
    fn default() -> Self {
        Self::new(&CoreConfig::default())
    }
}

impl KeyManager {
    /// Create a locked key manager
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            key: None,
            user_id: None,
            failed_attempts: 0,
            locked_until: None,
            iterations: config.pbkdf2_iterations,
            max_attempts: config.max_unlock_attempts,
            lockout: Duration::try_seconds(config.lockout_seconds.clamp(0, MAX_LOCKOUT_SECONDS))
                .unwrap_or_else(Duration::zero),
            min_password_length: config.min_password_length,
        }
    }

    /// Check a new password against the account password policy
    pub fn validate_password(&self, password: &str) -> Result<(), CoreError> {
        if password.trim().is_empty() {
            return Err(CoreError::Validation("password must not be empty".to_string()));
        }
        if password.chars().count() < self.min_password_length {
            return Err(CoreError::Validation(format!(
                "password must be at least {} characters long",
                self.min_password_length
            )));
        }
        Ok(())
    }

    /// Create the device account and unlock the session with its key.
    ///
    /// Generates a fresh salt, derives the key and persists the salt with a
    /// verifier. Fails if an account already exists.
    pub fn create_new_key<S: CredentialStore>(
        &mut self,
        store: &S,
        password: &str,
    ) -> Result<User, CoreError> {
        self.validate_password(password)?;

        if store.load_user()?.is_some() {
            return Err(CoreError::AccountExists);
        }

        let salt = crypto::generate_salt();
        let key = crypto::derive_key(password, &salt, self.iterations)?;
        let key_verifier = crypto::encrypt_field(VERIFIER_CONSTANT, &key)?;

        let user = User {
            user_id: uuid::Uuid::new_v4().to_string(),
            salt: crypto::encode_salt(&salt),
            key_verifier,
            kdf_iterations: self.iterations,
            created_at: Utc::now(),
        };
        store.save_user(&user)?;

        info!(user_id = %user.user_id, iterations = self.iterations, "Created account key");

        self.key = Some(key);
        self.user_id = Some(user.user_id.clone());
        self.reset_attempts();
        Ok(user)
    }

    /// Unlock the session with a password
    pub fn unlock<S: CredentialStore>(
        &mut self,
        store: &S,
        password: &str,
    ) -> Result<(), CoreError> {
        self.unlock_at(store, password, Utc::now())
    }

    /// Unlock the session, evaluating the lockout against `now`
    pub fn unlock_at<S: CredentialStore>(
        &mut self,
        store: &S,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        self.check_lockout(now)?;

        if password.is_empty() {
            return Err(CoreError::Validation("password must not be empty".to_string()));
        }

        let user = store.load_user()?.ok_or(CoreError::NoAccount)?;
        let salt = crypto::decode_salt(&user.salt)?;
        let candidate = crypto::derive_key(password, &salt, user.kdf_iterations)?;
        self.accept(user, candidate, now)
    }

    /// Unlock with a key from [`KeyManager::export_key`], the recovery path
    /// for a forgotten password. Failed attempts count toward the lockout.
    pub fn unlock_with_key<S: CredentialStore>(
        &mut self,
        store: &S,
        exported: &str,
    ) -> Result<(), CoreError> {
        self.unlock_with_key_at(store, exported, Utc::now())
    }

    pub fn unlock_with_key_at<S: CredentialStore>(
        &mut self,
        store: &S,
        exported: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        self.check_lockout(now)?;
        let candidate = SessionKey::import_base64(exported)?;
        let user = store.load_user()?.ok_or(CoreError::NoAccount)?;
        self.accept(user, candidate, now)
    }

    fn check_lockout(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        if let Some(until) = self.locked_until {
            if now < until {
                let retry_after_secs = (until - now).num_seconds().max(1);
                debug!(retry_after_secs, "Unlock attempt rejected during lockout");
                return Err(CoreError::LockedOut { retry_after_secs });
            }
            self.reset_attempts();
        }
        Ok(())
    }

    fn accept(
        &mut self,
        user: User,
        candidate: SessionKey,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        if !verifier_matches(&user.key_verifier, &candidate) {
            self.register_failure(now);
            return Err(CoreError::Authentication);
        }

        info!(user_id = %user.user_id, "Session unlocked");
        self.key = Some(candidate);
        self.user_id = Some(user.user_id);
        self.reset_attempts();
        Ok(())
    }

    /// Drop the session key. The key buffer is zeroed on drop.
    pub fn lock(&mut self) {
        if self.key.take().is_some() {
            info!("Session locked");
        }
        self.user_id = None;
    }

    /// Forget the session and the lockout state, used after a destructive reset
    pub fn forget(&mut self) {
        self.lock();
        self.reset_attempts();
    }

    pub fn is_unlocked(&self) -> bool {
        self.key.is_some()
    }

    /// The active session key
    pub fn key(&self) -> Result<&SessionKey, CoreError> {
        self.key.as_ref().ok_or(CoreError::SessionLocked)
    }

    /// The user the session is unlocked for
    pub fn user_id(&self) -> Result<&str, CoreError> {
        self.user_id.as_deref().ok_or(CoreError::SessionLocked)
    }

    /// Export the raw session key as base64 for a user-initiated backup
    pub fn export_key(&self) -> Result<String, CoreError> {
        let key = self.key()?;
        warn!("Session key exported");
        Ok(key.export_base64())
    }

    /// Consecutive failed unlock attempts since the last success or lockout expiry
    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// Attempts left before the lockout starts
    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.failed_attempts)
    }

    fn register_failure(&mut self, now: DateTime<Utc>) {
        self.failed_attempts += 1;
        if self.failed_attempts >= self.max_attempts {
            self.locked_until = Some(
                now.checked_add_signed(self.lockout)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            );
            warn!(
                attempts = self.failed_attempts,
                lockout_secs = self.lockout.num_seconds(),
                "Too many failed unlock attempts, locking out"
            );
        } else {
            debug!(attempts = self.failed_attempts, "Unlock attempt failed");
        }
    }

    fn reset_attempts(&mut self) {
        self.failed_attempts = 0;
        self.locked_until = None;
    }
}

/// True only if the verifier opens under `key` and yields the expected constant
fn verifier_matches(verifier: &str, key: &SessionKey) -> bool {
    match crypto::decrypt_field(verifier, key) {
        Ok(text) => text.as_bytes().ct_eq(VERIFIER_CONSTANT.as_bytes()).into(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    #[derive(Default)]
    struct MemoryCredentials {
        user: RefCell<Option<User>>,
    }

    impl CredentialStore for MemoryCredentials {
        fn load_user(&self) -> Result<Option<User>, CoreError> {
            Ok(self.user.borrow().clone())
        }

        fn save_user(&self, user: &User) -> Result<(), CoreError> {
            *self.user.borrow_mut() = Some(user.clone());
            Ok(())
        }
    }

    fn test_manager() -> KeyManager {
        KeyManager::new(&CoreConfig {
            pbkdf2_iterations: 1_000,
            ..Default::default()
        })
    }

    #[test]
    fn test_create_then_unlock() {
        let store = MemoryCredentials::default();
        let mut manager = test_manager();

        let user = manager.create_new_key(&store, "Str0ng-password").unwrap();
        assert!(manager.is_unlocked());
        assert_eq!(manager.user_id().unwrap(), user.user_id);
        let original = manager.export_key().unwrap();

        manager.lock();
        assert!(!manager.is_unlocked());
        assert!(matches!(manager.key(), Err(CoreError::SessionLocked)));

        manager.unlock(&store, "Str0ng-password").unwrap();
        assert!(manager.is_unlocked());
        assert_eq!(manager.export_key().unwrap(), original);
    }

    #[test]
    fn test_wrong_password_is_rejected() {
        let store = MemoryCredentials::default();
        let mut manager = test_manager();
        manager.create_new_key(&store, "Str0ng-password").unwrap();
        manager.lock();

        let result = manager.unlock(&store, "wrong-password");
        assert!(matches!(result, Err(CoreError::Authentication)));
        assert!(!manager.is_unlocked());
        assert_eq!(manager.failed_attempts(), 1);
    }

    #[test]
    fn test_tampered_verifier_is_rejected() {
        let store = MemoryCredentials::default();
        let mut manager = test_manager();
        manager.create_new_key(&store, "Str0ng-password").unwrap();
        manager.lock();

        // A verifier sealing some other text must not authenticate.
        let salt = crypto::decode_salt(&store.user.borrow().as_ref().unwrap().salt).unwrap();
        let key = crypto::derive_key("Str0ng-password", &salt, 1_000).unwrap();
        let forged = crypto::encrypt_field("something else", &key).unwrap();
        store.user.borrow_mut().as_mut().unwrap().key_verifier = forged;

        let result = manager.unlock(&store, "Str0ng-password");
        assert!(matches!(result, Err(CoreError::Authentication)));
    }

    #[test]
    fn test_lockout_after_max_attempts() {
        let store = MemoryCredentials::default();
        let mut manager = test_manager();
        manager.create_new_key(&store, "Str0ng-password").unwrap();
        manager.lock();

        let start = Utc::now();
        for _ in 0..3 {
            let result = manager.unlock_at(&store, "wrong-password", start);
            assert!(matches!(result, Err(CoreError::Authentication)));
        }
        assert_eq!(manager.remaining_attempts(), 0);

        // Even the right password is refused while locked out.
        let locked = manager.unlock_at(&store, "Str0ng-password", start + Duration::seconds(10));
        match locked {
            Err(CoreError::LockedOut { retry_after_secs }) => assert_eq!(retry_after_secs, 20),
            other => panic!("expected lockout, got {:?}", other),
        }

        manager
            .unlock_at(&store, "Str0ng-password", start + Duration::seconds(31))
            .unwrap();
        assert!(manager.is_unlocked());
        assert_eq!(manager.failed_attempts(), 0);
    }

    #[test]
    fn test_oversized_lockout_is_capped() {
        let store = MemoryCredentials::default();
        let mut manager = KeyManager::new(&CoreConfig {
            pbkdf2_iterations: 1_000,
            lockout_seconds: i64::MAX,
            ..Default::default()
        });
        manager.create_new_key(&store, "Str0ng-password").unwrap();
        manager.lock();

        let start = Utc::now();
        for _ in 0..3 {
            let _ = manager.unlock_at(&store, "wrong-password", start);
        }
        let locked = manager.unlock_at(&store, "Str0ng-password", start + Duration::hours(1));
        assert!(matches!(locked, Err(CoreError::LockedOut { .. })));

        let after = start + Duration::seconds(MAX_LOCKOUT_SECONDS + 1);
        manager.unlock_at(&store, "Str0ng-password", after).unwrap();
        assert!(manager.is_unlocked());
    }

    #[test]
    fn test_unlock_with_exported_key() {
        let store = MemoryCredentials::default();
        let mut manager = test_manager();
        manager.create_new_key(&store, "Str0ng-password").unwrap();
        let exported = manager.export_key().unwrap();
        manager.lock();

        manager.unlock_with_key(&store, &exported).unwrap();
        assert!(manager.is_unlocked());
        assert_eq!(manager.export_key().unwrap(), exported);
        manager.lock();

        let other = crypto::derive_key("other-password", b"some-other-salt!", 1_000).unwrap();
        let result = manager.unlock_with_key(&store, &other.export_base64());
        assert!(matches!(result, Err(CoreError::Authentication)));
        assert_eq!(manager.failed_attempts(), 1);
        assert!(!manager.is_unlocked());
    }

    #[test]
    fn test_success_resets_failures() {
        let store = MemoryCredentials::default();
        let mut manager = test_manager();
        manager.create_new_key(&store, "Str0ng-password").unwrap();
        manager.lock();

        let _ = manager.unlock(&store, "wrong-password");
        let _ = manager.unlock(&store, "wrong-password");
        manager.unlock(&store, "Str0ng-password").unwrap();
        assert_eq!(manager.failed_attempts(), 0);
        assert_eq!(manager.remaining_attempts(), 3);
    }

    #[test]
    fn test_password_policy() {
        let store = MemoryCredentials::default();
        let mut manager = test_manager();

        assert!(matches!(
            manager.create_new_key(&store, ""),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            manager.create_new_key(&store, "        "),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            manager.create_new_key(&store, "short"),
            Err(CoreError::Validation(_))
        ));
        assert!(store.load_user().unwrap().is_none());
    }

    #[test]
    fn test_second_account_rejected() {
        let store = MemoryCredentials::default();
        let mut manager = test_manager();
        manager.create_new_key(&store, "Str0ng-password").unwrap();

        let result = manager.create_new_key(&store, "another-password");
        assert!(matches!(result, Err(CoreError::AccountExists)));
    }

    #[test]
    fn test_unlock_without_account() {
        let store = MemoryCredentials::default();
        let mut manager = test_manager();
        assert!(matches!(
            manager.unlock(&store, "Str0ng-password"),
            Err(CoreError::NoAccount)
        ));
    }

    #[test]
    fn test_stored_user_has_no_key_material() {
        let store = MemoryCredentials::default();
        let mut manager = test_manager();
        let user = manager.create_new_key(&store, "Str0ng-password").unwrap();
        let exported = manager.export_key().unwrap();

        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains(&exported));
        assert_eq!(user.kdf_iterations, 1_000);
    }
}
