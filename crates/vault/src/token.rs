//! Deterministic keyed search tokens.
//!
//! A token is `base64url(HMAC-SHA256(key, normalize(plaintext)))`. Equal
//! normalized inputs always give equal tokens, which is what lets
//! `accounts.name_index` serve equality lookups and uniqueness checks while
//! `accounts.name` itself holds randomized ciphertext.

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::keys::KeyBytes;

type HmacSha256 = Hmac<Sha256>;

/// Encoded token length: 32-byte digest in padded base64url.
pub const TOKEN_LEN: usize = 44;

/// Trim surrounding whitespace and lower-case.
pub fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Derive the search token for `value`.
///
/// Returns `None` for `None` or for input that normalizes to the empty
/// string, so blank values never share a meaningless token.
pub fn derive_search_token(key: &KeyBytes, value: Option<&str>) -> Option<String> {
    let normalized = normalize(value?);
    if normalized.is_empty() {
        return None;
    }
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_bytes()).ok()?;
    mac.update(normalized.as_bytes());
    Some(URL_SAFE.encode(mac.finalize().into_bytes()))
}
