//! Field key resolution, validation, generation and caching.
//!
//! # Lifecycle
//!
//! 1. A [`KeyManager`] is constructed explicitly and shared as `Arc<KeyManager>`
//!    by whatever owns the storage connections.
//! 2. The first call to [`KeyManager::key`] resolves the key:
//!    environment variable → [`KeySource`] (YAML `security.encryption_key`) →
//!    freshly generated key persisted back to the source.
//! 3. The resolved key is cached for the lifetime of the manager; every later
//!    call returns the identical key without touching the environment or disk.
//!
//! # Security invariants
//!
//! - Key material is never logged; [`KeyBytes`] redacts itself in `Debug`.
//! - Replacing the key after data has been written makes earlier ciphertext
//!   permanently undecryptable. There is no rotation.
//! - Two processes racing through first-run generation may each persist a key;
//!   the last writer wins and the loser's ciphertext is lost.

pub mod source;
pub mod store;

pub use source::{KeySource, KeySourceError, YamlKeyFile};
pub use store::{KeyBytes, KeyCache};

use std::fmt;

use aes_gcm_siv::aead::{rand_core::RngCore, OsRng};
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use common::EncryptionError;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::crypto::KEY_LEN;

/// Environment variable consulted first for a pre-provisioned key.
pub const DEFAULT_KEY_ENV_VAR: &str = "FINANCE_APP_ENCRYPTION_KEY";

/// Decode and length-check an encoded key (base64url, padded, 32 bytes).
///
/// # Errors
///
/// Returns [`EncryptionError::EncryptionKey`] on bad encoding or length.
pub fn validate_key(raw: &str) -> Result<KeyBytes, EncryptionError> {
    let bytes = URL_SAFE
        .decode(raw.trim())
        .map_err(|_| EncryptionError::EncryptionKey("key is not valid base64url".into()))?;
    KeyBytes::from_slice(&bytes).ok_or_else(|| {
        EncryptionError::EncryptionKey(format!(
            "key must decode to {KEY_LEN} bytes, got {}",
            bytes.len()
        ))
    })
}

/// Generate a fresh random key in its encoded form.
pub fn generate_key_string() -> String {
    let mut key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    let encoded = URL_SAFE.encode(key);
    key.iter_mut().for_each(|b| *b = 0);
    encoded
}

/// Owns the key material for everything built on top of it.
pub struct KeyManager {
    env_var: String,
    source: Box<dyn KeySource>,
    auto_generate: bool,
    cache: KeyCache,
}

impl KeyManager {
    pub fn new(env_var: impl Into<String>, source: Box<dyn KeySource>, auto_generate: bool) -> Self {
        Self {
            env_var: env_var.into(),
            source,
            auto_generate,
            cache: KeyCache::new(),
        }
    }

    /// Build a manager from loaded settings, backed by the YAML key file.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.security.key_env_var.clone(),
            Box::new(YamlKeyFile::new(settings.key_file())),
            settings.security.auto_generate_key,
        )
    }

    /// Returns `true` once a key has been resolved.
    pub fn is_ready(&self) -> bool {
        self.cache.is_ready()
    }

    /// Return the active key, resolving it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`EncryptionError::EncryptionKey`] if the environment key is
    /// invalid, if no key exists and generation is disabled, or if a
    /// generated key cannot be persisted.
    pub fn key(&self) -> Result<KeyBytes, EncryptionError> {
        self.cache.get_or_try_init(|| self.resolve())
    }

    fn resolve(&self) -> Result<KeyBytes, EncryptionError> {
        if let Some(key) = self.load_from_env()? {
            info!(env_var = %self.env_var, "encryption key loaded from environment");
            return Ok(key);
        }
        if let Some(key) = self.load_from_source() {
            info!(source = %self.source.describe(), "encryption key loaded from config");
            return Ok(key);
        }
        if !self.auto_generate {
            return Err(EncryptionError::EncryptionKey(format!(
                "encryption key not found; provide {} or add security.encryption_key to {}",
                self.env_var,
                self.source.describe()
            )));
        }
        self.generate_and_persist()
    }

    fn load_from_env(&self) -> Result<Option<KeyBytes>, EncryptionError> {
        let raw = match std::env::var(&self.env_var) {
            Ok(raw) if !raw.trim().is_empty() => raw,
            Ok(_) | Err(std::env::VarError::NotPresent) => return Ok(None),
            Err(std::env::VarError::NotUnicode(_)) => {
                return Err(EncryptionError::EncryptionKey(format!(
                    "{} is not valid unicode",
                    self.env_var
                )))
            }
        };
        validate_key(&raw).map(Some).map_err(|_| {
            EncryptionError::EncryptionKey(format!(
                "environment encryption key is invalid; regenerate and re-set {}",
                self.env_var
            ))
        })
    }

    fn load_from_source(&self) -> Option<KeyBytes> {
        let raw = match self.source.load() {
            Ok(Some(raw)) if !raw.trim().is_empty() => raw,
            Ok(_) => return None,
            Err(e) => {
                error!(error = %e, "unable to read encryption key from config");
                return None;
            }
        };
        match validate_key(&raw) {
            Ok(key) => Some(key),
            Err(_) => {
                warn!(
                    source = %self.source.describe(),
                    "invalid encryption key stored in config; regenerating"
                );
                None
            }
        }
    }

    fn generate_and_persist(&self) -> Result<KeyBytes, EncryptionError> {
        let encoded = generate_key_string();
        let key = validate_key(&encoded)?;
        self.source.persist(&encoded).map_err(|e| {
            error!(error = %e, "failed to persist generated encryption key");
            EncryptionError::EncryptionKey(format!("failed to persist generated key: {e}"))
        })?;
        info!(
            source = %self.source.describe(),
            "generated new encryption key and stored it in config"
        );
        Ok(key)
    }
}

impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyManager")
            .field("env_var", &self.env_var)
            .field("source", &self.source.describe())
            .field("auto_generate", &self.auto_generate)
            .field("ready", &self.is_ready())
            .finish()
    }
}
