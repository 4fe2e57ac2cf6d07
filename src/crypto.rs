//! Field encryption primitives
//!
//! Password stretching with PBKDF2-HMAC-SHA256 and AES-256-GCM sealing of
//! individual text fields. Sealed fields use the wire format
//! `base64(nonce[12] || ciphertext || tag[16])`.

use crate::error::CoreError;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Salt length in bytes
pub const SALT_LEN: usize = 16;

/// AES-GCM nonce length in bytes
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes
pub const TAG_LEN: usize = 16;

/// Derived key length in bytes (AES-256)
pub const KEY_LEN: usize = 32;

/// 256-bit session key. Zeroed when dropped; `Debug` never prints the bytes.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    /// Rebuild a key from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a key produced by [`SessionKey::export_base64`]
    pub fn import_base64(encoded: &str) -> Result<Self, CoreError> {
        let mut bytes = BASE64.decode(encoded.trim()).map_err(|e| {
            CoreError::KeyDerivation(format!("exported key is not valid base64: {}", e))
        })?;
        let key = <[u8; KEY_LEN]>::try_from(bytes.as_slice())
            .map(Self::from_bytes)
            .map_err(|_| {
                CoreError::KeyDerivation(format!("exported key must be {} bytes", KEY_LEN))
            });
        bytes.zeroize();
        key
    }

    /// Base64 of the raw key bytes. This is the only way key material leaves the crate.
    pub fn export_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey([redacted])")
    }
}

/// Generate a fresh random salt from the OS RNG
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive a session key from a password with PBKDF2-HMAC-SHA256.
///
/// # Arguments
/// * `password` - User password; hashed as UTF-8 bytes
/// * `salt` - Per-account random salt
/// * `iterations` - PBKDF2 round count (100 000 for new accounts)
pub fn derive_key(password: &str, salt: &[u8], iterations: u32) -> Result<SessionKey, CoreError> {
    if password.is_empty() {
        return Err(CoreError::KeyDerivation("password must not be empty".to_string()));
    }
    if salt.is_empty() {
        return Err(CoreError::KeyDerivation("salt must not be empty".to_string()));
    }
    if iterations == 0 {
        return Err(CoreError::KeyDerivation(
            "iteration count must be greater than zero".to_string(),
        ));
    }

    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);
    let session_key = SessionKey(key);
    key.zeroize();
    Ok(session_key)
}

/// Encrypt a text field under `key` with a freshly generated nonce
pub fn encrypt_field(plaintext: &str, key: &SessionKey) -> Result<String, CoreError> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = key
        .cipher()
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|e| CoreError::Encryption(e.to_string()))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(sealed))
}

/// Decrypt a field produced by [`encrypt_field`].
///
/// Fails on malformed input, on a wrong key and on any tampering; it never
/// returns unauthenticated plaintext.
pub fn decrypt_field(sealed: &str, key: &SessionKey) -> Result<String, CoreError> {
    let bytes = BASE64
        .decode(sealed)
        .map_err(|e| CoreError::Decryption(format!("invalid base64: {}", e)))?;

    if bytes.len() < NONCE_LEN + TAG_LEN {
        return Err(CoreError::Decryption(format!(
            "sealed field too short: {} bytes",
            bytes.len()
        )));
    }

    let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
    let plaintext = key
        .cipher()
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CoreError::Decryption("authentication failed".to_string()))?;

    String::from_utf8(plaintext).map_err(|e| {
        let mut bytes = e.into_bytes();
        bytes.zeroize();
        CoreError::Decryption("plaintext is not valid UTF-8".to_string())
    })
}

/// Encode a salt for storage
pub fn encode_salt(salt: &[u8]) -> String {
    BASE64.encode(salt)
}

/// Decode a stored salt
pub fn decode_salt(encoded: &str) -> Result<Vec<u8>, CoreError> {
    BASE64
        .decode(encoded)
        .map_err(|e| CoreError::KeyDerivation(format!("stored salt is not valid base64: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::collections::HashSet;

    const TEST_ITERATIONS: u32 = 1_000;

    fn test_key(password: &str) -> SessionKey {
        derive_key(password, b"0123456789abcdef", TEST_ITERATIONS).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let key = test_key("correct horse battery staple");
        let sealed = encrypt_field("feeling awful", &key).unwrap();
        assert_eq!(decrypt_field(&sealed, &key).unwrap(), "feeling awful");
    }

    #[test]
    fn test_empty_plaintext_round_trip() {
        let key = test_key("password123");
        let sealed = encrypt_field("", &key).unwrap();
        assert_eq!(decrypt_field(&sealed, &key).unwrap(), "");
    }

    #[test]
    fn test_wire_format_layout() {
        let key = test_key("password123");
        let sealed = encrypt_field("abc", &key).unwrap();
        let raw = BASE64.decode(sealed).unwrap();
        assert_eq!(raw.len(), NONCE_LEN + 3 + TAG_LEN);
    }

    #[test]
    fn test_cross_key_failure() {
        let key_a = test_key("password-one");
        let key_b = test_key("password-two");
        let sealed = encrypt_field("private note", &key_a).unwrap();
        assert!(matches!(
            decrypt_field(&sealed, &key_b),
            Err(CoreError::Decryption(_))
        ));
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let key = test_key("password123");
        let sealed = encrypt_field("private note", &key).unwrap();
        let mut raw = BASE64.decode(sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = BASE64.encode(raw);
        assert!(decrypt_field(&tampered, &key).is_err());
    }

    #[test]
    fn test_malformed_input_rejected() {
        let key = test_key("password123");
        assert!(decrypt_field("not base64!!", &key).is_err());
        assert!(decrypt_field(&BASE64.encode([0u8; 8]), &key).is_err());
    }

    #[test]
    fn test_nonce_uniqueness() {
        let key = test_key("password123");
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let sealed = encrypt_field("same plaintext", &key).unwrap();
            assert!(seen.insert(sealed), "ciphertext repeated");
        }
    }

    #[test]
    fn test_empty_password_rejected() {
        let result = derive_key("", b"0123456789abcdef", TEST_ITERATIONS);
        assert!(matches!(result, Err(CoreError::KeyDerivation(_))));
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let result = derive_key("password123", b"0123456789abcdef", 0);
        assert!(matches!(result, Err(CoreError::KeyDerivation(_))));
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let a = test_key("password123");
        let b = test_key("password123");
        assert_eq!(a.export_base64(), b.export_base64());
    }

    #[test]
    fn test_salt_changes_key() {
        let a = derive_key("password123", &generate_salt(), TEST_ITERATIONS).unwrap();
        let b = derive_key("password123", &generate_salt(), TEST_ITERATIONS).unwrap();
        assert_ne!(a.export_base64(), b.export_base64());
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = test_key("password123");
        let printed = format!("{:?}", key);
        assert_eq!(printed, "SessionKey([redacted])");
        assert!(!printed.contains(&key.export_base64()));
    }

    #[test]
    fn test_salt_encoding() {
        let salt = generate_salt();
        let decoded = decode_salt(&encode_salt(&salt)).unwrap();
        assert_eq!(decoded, salt.to_vec());
    }

    #[test]
    fn test_exported_key_imports() {
        let key = test_key("password");
        let restored = SessionKey::import_base64(&key.export_base64()).unwrap();
        let sealed = encrypt_field("note", &key).unwrap();
        assert_eq!(decrypt_field(&sealed, &restored).unwrap(), "note");

        assert!(matches!(
            SessionKey::import_base64("not base64!"),
            Err(CoreError::KeyDerivation(_))
        ));
        assert!(matches!(
            SessionKey::import_base64(&BASE64.encode([7u8; 16])),
            Err(CoreError::KeyDerivation(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_round_trip(password in "[ -~]{1,24}", plaintext in any::<String>()) {
            let key = derive_key(&password, b"fixed-test-salt!", 10).unwrap();
            let sealed = encrypt_field(&plaintext, &key).unwrap();
            prop_assert_eq!(decrypt_field(&sealed, &key).unwrap(), plaintext);
        }

        #[test]
        fn prop_cross_key_fails(a in "[a-z]{4,12}", b in "[A-Z]{4,12}") {
            let key_a = derive_key(&a, b"fixed-test-salt!", 10).unwrap();
            let key_b = derive_key(&b, b"fixed-test-salt!", 10).unwrap();
            let sealed = encrypt_field("secret", &key_a).unwrap();
            prop_assert!(decrypt_field(&sealed, &key_b).is_err());
        }
    }
}
