//! Common error types shared across crates.

use thiserror::Error;

/// Top-level error type for field encryption.
///
/// Variants map to how callers are expected to react:
/// - [`EncryptionError::EncryptionKey`] → fatal for the operation that needed the key
/// - [`EncryptionError::Decryption`] → recoverable on read paths (value becomes `None`)
/// - [`EncryptionError::Encryption`] → the value could not be prepared for storage
#[derive(Debug, Error)]
pub enum EncryptionError {
    /// The key is missing, malformed, or could not be persisted.
    #[error("encryption key error: {0}")]
    EncryptionKey(String),

    /// Ciphertext failed authentication or could not be coerced to the requested type.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// A plaintext value could not be encrypted (e.g. a non-numeric value for a numeric field).
    #[error("encryption failed: {0}")]
    Encryption(String),
}

impl EncryptionError {
    /// Returns `true` when a read path may swallow this error and surface an
    /// absent value instead.
    pub fn is_recoverable_on_read(&self) -> bool {
        matches!(self, EncryptionError::Decryption(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_decryption_is_recoverable() {
        assert!(EncryptionError::Decryption("x".into()).is_recoverable_on_read());
        assert!(!EncryptionError::EncryptionKey("x".into()).is_recoverable_on_read());
        assert!(!EncryptionError::Encryption("x".into()).is_recoverable_on_read());
    }

    #[test]
    fn display_includes_message() {
        let e = EncryptionError::EncryptionKey("FINANCE_APP_ENCRYPTION_KEY is invalid".into());
        assert!(e.to_string().contains("FINANCE_APP_ENCRYPTION_KEY"));
    }
}
