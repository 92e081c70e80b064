//! AES-256-GCM-SIV encryption and decryption of individual field values.
//!
//! Every call draws a fresh 96-bit nonce from the OS CSPRNG, so encrypting the
//! same plaintext twice yields different ciphertext. Equality lookups go
//! through search tokens instead (see [`crate::token`]).

use aes_gcm_siv::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256GcmSiv, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use thiserror::Error;

/// Byte length of an AES-256 key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

/// Byte length of an AES-GCM-SIV nonce (12 bytes = 96 bits).
pub const NONCE_LEN: usize = 12;

/// Prefix that appears at the start of every field value written by this crate.
pub const VERSION_PREFIX: &str = "v1.";

/// Leading byte of the binary envelope.
const ENVELOPE_VERSION: u8 = 0x01;

/// Version byte + big-endian issue timestamp. Bound as associated data.
const HEADER_LEN: usize = 1 + 8;

/// AES-GCM-SIV authentication tag length.
const TAG_LEN: usize = 16;

/// A parsed, encrypted field value.
///
/// The string representation is
/// `v1.<base64url(version || issued_at || nonce || ciphertext+tag)>`.
/// [`EncryptedField::parse`] also accepts the envelope without the `v1.`
/// prefix. That path only serves untagged strings admitted by the base64
/// heuristic in `codec::is_ciphertext`; no writer emits that form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedField {
    /// Unix timestamp (seconds) at which the value was encrypted.
    pub issued_at: u64,
    /// Raw nonce bytes.
    pub nonce: [u8; NONCE_LEN],
    /// Raw ciphertext + authentication tag bytes.
    pub ciphertext: Vec<u8>,
}

impl EncryptedField {
    /// Encode this value to its canonical (tagged) string representation.
    pub fn to_string_repr(&self) -> String {
        format!("{VERSION_PREFIX}{}", URL_SAFE.encode(self.to_bytes()))
    }

    /// Parse an encrypted field string back into an [`EncryptedField`].
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::InvalidFormat`] if the string is not valid
    /// base64url or the decoded envelope is truncated or has an unknown version.
    pub fn parse(s: &str) -> Result<Self, CipherError> {
        let body = s.strip_prefix(VERSION_PREFIX).unwrap_or(s);
        let bytes = URL_SAFE
            .decode(body)
            .map_err(|_| CipherError::InvalidFormat)?;
        Self::from_bytes(&bytes)
    }

    /// Returns `true` if `s` carries the reserved version prefix.
    pub fn is_tagged(s: &str) -> bool {
        s.starts_with(VERSION_PREFIX)
    }

    fn header(&self) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[0] = ENVELOPE_VERSION;
        header[1..].copy_from_slice(&self.issued_at.to_be_bytes());
        header
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + NONCE_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.header());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, CipherError> {
        if bytes.len() < HEADER_LEN + NONCE_LEN + TAG_LEN || bytes[0] != ENVELOPE_VERSION {
            return Err(CipherError::InvalidFormat);
        }
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&bytes[1..HEADER_LEN]);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&bytes[HEADER_LEN..HEADER_LEN + NONCE_LEN]);

        Ok(Self {
            issued_at: u64::from_be_bytes(ts),
            nonce,
            ciphertext: bytes[HEADER_LEN + NONCE_LEN..].to_vec(),
        })
    }
}

/// Errors produced by the cipher layer.
#[derive(Debug, Error)]
pub enum CipherError {
    /// The key is the wrong length (must be [`KEY_LEN`] bytes).
    #[error("invalid key length: expected {KEY_LEN} bytes")]
    InvalidKeyLength,

    /// AES-GCM-SIV encryption or decryption failed.
    #[error("aead operation failed")]
    AeadFailure,

    /// The encrypted field string does not match the expected format.
    #[error("invalid encrypted field format")]
    InvalidFormat,
}

/// Encrypt plaintext bytes using AES-256-GCM-SIV.
///
/// # Errors
///
/// Returns [`CipherError::InvalidKeyLength`] if `key` is not [`KEY_LEN`] bytes.
/// Returns [`CipherError::AeadFailure`] on an internal AEAD error.
pub fn encrypt_field(plaintext: &[u8], key: &[u8]) -> Result<EncryptedField, CipherError> {
    let cipher = build_cipher(key)?;

    use aes_gcm_siv::aead::rand_core::RngCore;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let mut field = EncryptedField {
        issued_at: chrono::Utc::now().timestamp().max(0) as u64,
        nonce: nonce_bytes,
        ciphertext: Vec::new(),
    };
    let header = field.header();
    field.ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad: &header,
            },
        )
        .map_err(|_| CipherError::AeadFailure)?;

    Ok(field)
}

/// Decrypt an [`EncryptedField`] back to plaintext bytes.
///
/// # Errors
///
/// Returns [`CipherError::InvalidKeyLength`] if `key` is not [`KEY_LEN`] bytes.
/// Returns [`CipherError::AeadFailure`] if authentication fails (wrong key or tampered data).
pub fn decrypt_field(field: &EncryptedField, key: &[u8]) -> Result<Vec<u8>, CipherError> {
    let cipher = build_cipher(key)?;
    let header = field.header();
    cipher
        .decrypt(
            Nonce::from_slice(&field.nonce),
            Payload {
                msg: field.ciphertext.as_ref(),
                aad: &header,
            },
        )
        .map_err(|_| CipherError::AeadFailure)
}

fn build_cipher(key: &[u8]) -> Result<Aes256GcmSiv, CipherError> {
    if key.len() != KEY_LEN {
        return Err(CipherError::InvalidKeyLength);
    }
    Aes256GcmSiv::new_from_slice(key).map_err(|_| CipherError::InvalidKeyLength)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_key() -> Vec<u8> {
        use aes_gcm_siv::aead::rand_core::RngCore;
        let mut key = vec![0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        key
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = random_key();
        let encrypted = encrypt_field(b"Coffee shop run", &key).unwrap();
        let decrypted = decrypt_field(&encrypted, &key).unwrap();
        assert_eq!(decrypted, b"Coffee shop run");
    }

    #[test]
    fn fresh_nonce_per_call() {
        let key = random_key();
        let a = encrypt_field(b"same", &key).unwrap();
        let b = encrypt_field(b"same", &key).unwrap();
        assert_ne!(a.to_string_repr(), b.to_string_repr());
    }

    #[test]
    fn wrong_key_fails_decryption() {
        let encrypted = encrypt_field(b"secret", &random_key()).unwrap();
        assert!(matches!(
            decrypt_field(&encrypted, &random_key()),
            Err(CipherError::AeadFailure)
        ));
    }

    #[test]
    fn invalid_key_length_rejected() {
        assert!(matches!(
            encrypt_field(b"x", &[0u8; 16]),
            Err(CipherError::InvalidKeyLength)
        ));
    }

    #[test]
    fn string_repr_round_trip() {
        let key = random_key();
        let field = encrypt_field(b"hello", &key).unwrap();
        let s = field.to_string_repr();
        assert!(s.starts_with("v1."));
        assert!(EncryptedField::is_tagged(&s));
        let parsed = EncryptedField::parse(&s).unwrap();
        assert_eq!(parsed, field);
        assert_eq!(decrypt_field(&parsed, &key).unwrap(), b"hello");
    }

    #[test]
    fn untagged_envelope_still_parses() {
        let key = random_key();
        let field = encrypt_field(b"legacy", &key).unwrap();
        let tagged = field.to_string_repr();
        let untagged = tagged.strip_prefix(VERSION_PREFIX).unwrap();
        assert!(!EncryptedField::is_tagged(untagged));
        let parsed = EncryptedField::parse(untagged).unwrap();
        assert_eq!(decrypt_field(&parsed, &key).unwrap(), b"legacy");
    }

    #[test]
    fn issued_at_is_authenticated() {
        let key = random_key();
        let mut field = encrypt_field(b"stamped", &key).unwrap();
        assert!(field.issued_at > 0);
        field.issued_at += 1;
        assert!(decrypt_field(&field, &key).is_err());
    }

    #[test]
    fn parse_rejects_bad_base64() {
        assert!(EncryptedField::parse("v1.!!!").is_err());
        assert!(EncryptedField::parse("Coffee shop run").is_err());
    }

    #[test]
    fn parse_rejects_truncated_envelope() {
        // Valid base64url, but far too short to hold a header, nonce and tag.
        assert!(EncryptedField::parse("Food").is_err());
        assert!(EncryptedField::parse("v1.AQID").is_err());
    }

    #[test]
    fn tampered_ciphertext_fails_auth() {
        let key = random_key();
        let mut field = encrypt_field(b"tamper me", &key).unwrap();
        field.ciphertext[0] ^= 0xFF;
        assert!(decrypt_field(&field, &key).is_err());
    }
}
