//! MindWell Core - local privacy-preserving mood pipeline
//!
//! Mood submissions flow through a deterministic pipeline: crisis gate →
//! encrypted storage → baseline computation → intervention recommendation.
//! Free-text fields are sealed with a key derived from the user's password and
//! never leave the device unencrypted except through an explicit export.
//!
//! ## Modules
//!
//! - **Keys and crypto**: PBKDF2 key derivation, AES-256-GCM field sealing, unlock lockout
//! - **Store**: SQLite persistence with consent gating, retention and secure wipe
//! - **Baseline / Recommend / Crisis / Insights**: pure analysis over mood history
//! - **Pipeline**: the [`WellnessCore`] facade used by host applications

pub mod baseline;
pub mod config;
pub mod crisis;
pub mod crypto;
pub mod error;
pub mod insights;
pub mod keys;
pub mod pipeline;
pub mod recommend;
pub mod store;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use baseline::BaselineEngine;
pub use config::CoreConfig;
pub use error::CoreError;
pub use keys::{CredentialStore, KeyManager};
pub use pipeline::{Gated, MoodLogged, WellnessCore, CONFIRMATION_PHRASE};
pub use recommend::RecommendationSelector;
pub use store::EncryptedStore;

/// Library version
pub const CORE_VERSION: &str = env!("CARGO_PKG_VERSION");
