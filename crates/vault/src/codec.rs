//! Typed encode/decode of single field values.
//!
//! [`FieldCodec`] turns a [`FieldValue`] of a known [`LogicalType`] into a
//! ciphertext string and back. It holds no state besides the shared
//! [`KeyManager`], so cloning it is cheap and every clone behaves identically.
//!
//! Numeric values are serialized as the shortest decimal text that parses
//! back to the same `f64` (`12.34`, `42.0`), never as raw float bytes.

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use common::{EncryptionError, FieldValue, LogicalType, TransactionPayload, SENSITIVE_TRANSACTION_FIELDS};
use tracing::{debug, error};

use crate::crypto::cipher::{decrypt_field, encrypt_field, EncryptedField, VERSION_PREFIX};
use crate::keys::{KeyBytes, KeyManager};
use crate::token::derive_search_token;

/// Classify a stored string as ciphertext or legacy plaintext.
///
/// Values carrying the `v1.` prefix are recognised exactly. Anything else is
/// judged by the legacy structural heuristic: the whole string must be valid
/// padded base64url. The heuristic has false positives on short plaintexts
/// made only of base64url characters whose length is a multiple of four
/// (`"Food"`, `"Rent"`, `"Checking"`); such values are treated as ciphertext
/// and read back as absent. Values containing spaces or punctuation outside
/// the alphabet, like `"Groceries"` or `"Coffee shop run"`, are never
/// misclassified. The empty string is not ciphertext.
pub fn is_ciphertext(value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    let body = value.strip_prefix(VERSION_PREFIX).unwrap_or(value);
    !body.is_empty() && URL_SAFE.decode(body).is_ok()
}

/// Plaintext bytes for `value` under logical type `ty`.
fn encode_plaintext(value: &FieldValue, ty: LogicalType) -> Result<String, EncryptionError> {
    match (ty, value) {
        (LogicalType::Numeric, _) => value
            .as_f64()
            .map(|n| format!("{n:?}"))
            .ok_or_else(|| EncryptionError::Encryption("value is not numeric".into())),
        (LogicalType::Text, FieldValue::Text(s)) => Ok(s.clone()),
        (LogicalType::Text, FieldValue::Number(n)) => Ok(format!("{n:?}")),
    }
}

fn coerce(plaintext: String, ty: LogicalType) -> Result<FieldValue, EncryptionError> {
    match ty {
        LogicalType::Text => Ok(FieldValue::Text(plaintext)),
        LogicalType::Numeric => plaintext.trim().parse::<f64>().map(FieldValue::Number).map_err(|_| {
            error!(logical_type = %ty, "decrypted value could not be coerced");
            EncryptionError::Decryption("decrypted value has unexpected format".into())
        }),
    }
}

/// Encrypt with an already-resolved key.
pub(crate) fn encrypt_with(
    key: &KeyBytes,
    value: Option<&FieldValue>,
    ty: LogicalType,
) -> Result<Option<String>, EncryptionError> {
    let value = match value {
        None => return Ok(None),
        Some(v) if v.is_empty_text() => return Ok(Some(String::new())),
        Some(v) => v,
    };
    let plaintext = encode_plaintext(value, ty)?;
    let field = encrypt_field(plaintext.as_bytes(), key.as_bytes())
        .map_err(|e| EncryptionError::Encryption(e.to_string()))?;
    Ok(Some(field.to_string_repr()))
}

/// Strict decrypt with an already-resolved key.
pub(crate) fn decrypt_with(
    key: &KeyBytes,
    token: Option<&str>,
    ty: LogicalType,
) -> Result<Option<FieldValue>, EncryptionError> {
    let token = match token {
        None => return Ok(None),
        Some("") => return Ok(Some(FieldValue::Text(String::new()))),
        Some(t) => t,
    };
    let field = EncryptedField::parse(token)
        .map_err(|e| EncryptionError::Decryption(e.to_string()))?;
    let bytes = decrypt_field(&field, key.as_bytes()).map_err(|e| {
        error!("failed to decrypt payload; token invalid");
        EncryptionError::Decryption(e.to_string())
    })?;
    let plaintext = String::from_utf8(bytes)
        .map_err(|_| EncryptionError::Decryption("decrypted value is not UTF-8".into()))?;
    coerce(plaintext, ty).map(Some)
}

/// Lenient read with an already-resolved key: legacy plaintext passes
/// through, verified decryption failures become `None`.
pub(crate) fn read_with(key: &KeyBytes, stored: Option<&str>, ty: LogicalType) -> Option<FieldValue> {
    let stored = stored?;
    if stored.is_empty() {
        return match ty {
            LogicalType::Text => Some(FieldValue::Text(String::new())),
            LogicalType::Numeric => None,
        };
    }
    if !is_ciphertext(stored) {
        return match ty {
            LogicalType::Text => Some(FieldValue::Text(stored.to_owned())),
            LogicalType::Numeric => stored.trim().parse().ok().map(FieldValue::Number),
        };
    }
    match decrypt_with(key, Some(stored), ty) {
        Ok(value) => value,
        Err(e) if e.is_recoverable_on_read() => {
            debug!(error = %e, "stored value unavailable");
            None
        }
        Err(e) => {
            error!(error = %e, "unexpected failure on read path");
            None
        }
    }
}

/// Encrypts and decrypts field values under the manager's key.
#[derive(Debug, Clone)]
pub struct FieldCodec {
    keys: Arc<KeyManager>,
}

impl FieldCodec {
    pub fn new(keys: Arc<KeyManager>) -> Self {
        Self { keys }
    }

    /// Resolve (on first use) and return the active key.
    ///
    /// # Errors
    ///
    /// Propagates [`EncryptionError::EncryptionKey`] from the key manager.
    pub fn key(&self) -> Result<KeyBytes, EncryptionError> {
        self.keys.key()
    }

    /// Encrypt one value.
    ///
    /// `None` stays `None` and the empty string stays empty and unencrypted.
    ///
    /// # Errors
    ///
    /// Returns [`EncryptionError::EncryptionKey`] if no key is available and
    /// [`EncryptionError::Encryption`] for a non-numeric value of a numeric type.
    pub fn encrypt_value(
        &self,
        value: Option<&FieldValue>,
        ty: LogicalType,
    ) -> Result<Option<String>, EncryptionError> {
        if value.is_none() {
            return Ok(None);
        }
        encrypt_with(&self.key()?, value, ty)
    }

    /// Decrypt one ciphertext string and coerce it to `ty`.
    ///
    /// `None` and the empty string pass through unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`EncryptionError::Decryption`] for malformed or unauthenticated
    /// ciphertext and for plaintext that does not coerce to `ty`.
    pub fn decrypt_value(
        &self,
        token: Option<&str>,
        ty: LogicalType,
    ) -> Result<Option<FieldValue>, EncryptionError> {
        match token {
            None => Ok(None),
            Some("") => Ok(Some(FieldValue::Text(String::new()))),
            Some(_) => decrypt_with(&self.key()?, token, ty),
        }
    }

    /// Read-path decrypt: never fails.
    ///
    /// Legacy plaintext is returned as-is (numerics parsed), ciphertext is
    /// decrypted, and anything that cannot be recovered becomes `None`.
    pub fn read_value(&self, stored: Option<&str>, ty: LogicalType) -> Option<FieldValue> {
        stored?;
        match self.key() {
            Ok(key) => read_with(&key, stored, ty),
            Err(e) => {
                error!(error = %e, "encryption key unavailable on read path");
                None
            }
        }
    }

    /// Keyed search token for `value` (see [`crate::token`]).
    ///
    /// # Errors
    ///
    /// Propagates [`EncryptionError::EncryptionKey`] from the key manager.
    pub fn search_token(&self, value: Option<&str>) -> Result<Option<String>, EncryptionError> {
        if value.map_or(true, |v| v.trim().is_empty()) {
            return Ok(None);
        }
        Ok(derive_search_token(&self.key()?, value))
    }

    /// Encrypt the sensitive transaction fields present in `payload`.
    ///
    /// Non-sensitive fields are copied unchanged. With `skip_if_encrypted`,
    /// text values that already look like ciphertext are left alone.
    ///
    /// # Errors
    ///
    /// Returns the first encryption error encountered.
    pub fn encrypt_transaction_payload(
        &self,
        payload: &TransactionPayload,
        skip_if_encrypted: bool,
    ) -> Result<TransactionPayload, EncryptionError> {
        let mut protected = payload.clone();
        for (field, ty) in SENSITIVE_TRANSACTION_FIELDS {
            if !protected.contains(field) {
                continue;
            }
            let current = protected.get(field).cloned();
            if skip_if_encrypted {
                if let Some(FieldValue::Text(s)) = &current {
                    if is_ciphertext(s) {
                        continue;
                    }
                }
            }
            let encrypted = self.encrypt_value(current.as_ref(), *ty)?;
            protected.insert(*field, encrypted.map(FieldValue::Text));
        }
        Ok(protected)
    }

    /// Decrypt the sensitive transaction fields of a stored row.
    ///
    /// Fields that cannot be recovered become `None`.
    pub fn decrypt_transaction_row(&self, row: &TransactionPayload) -> TransactionPayload {
        let mut result = row.clone();
        for (field, ty) in SENSITIVE_TRANSACTION_FIELDS {
            let decrypted = match row.get(field) {
                None => continue,
                Some(FieldValue::Text(s)) => self.read_value(Some(s), *ty),
                Some(FieldValue::Number(n)) => Some(FieldValue::Number(*n)),
            };
            result.insert(*field, decrypted);
        }
        result
    }
}
