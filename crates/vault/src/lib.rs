//! `vault`: transparent field-level encryption for the finance SQLite store.
//!
//! Layering, bottom up:
//! 1. [`crypto`]: AES-256-GCM-SIV envelope with a versioned string form.
//! 2. [`keys`]: resolves, generates, persists and caches the field key.
//! 3. [`codec`] and [`token`]: typed value encryption and keyed search tokens.
//! 4. [`store`]: SQLite connections that decrypt in SQL, plus data access.
//! 5. [`migration`]: rewrites legacy plaintext rows as ciphertext.
//!
//! [`config`] loads the settings the binaries hand to these layers.

pub mod codec;
pub mod config;
pub mod crypto;
pub mod keys;
pub mod migration;
pub mod store;
pub mod token;

pub use codec::{is_ciphertext, FieldCodec};
pub use config::Settings;
pub use keys::KeyManager;
pub use migration::{MigrationMode, MigrationReport, MigrationRunner};
