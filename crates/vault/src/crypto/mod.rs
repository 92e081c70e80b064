//! AES-256-GCM-SIV field encryption primitives.
//!
//! This module has no storage or configuration dependencies.
//! It provides the low-level encrypt/decrypt operations used by the field codec.
//!
//! # Ciphertext format
//!
//! ```text
//! v1.<base64url(0x01 || issued_at_be_u64 || nonce || ciphertext+tag)>
//! ```
//!
//! The `v1.` prefix makes ciphertext written by this crate exactly
//! recognisable. Values without it fall back to the structural heuristic in
//! [`crate::codec::is_ciphertext`].

pub mod cipher;

pub use cipher::{EncryptedField, KEY_LEN};
