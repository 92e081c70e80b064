//! SQL scalar functions that decrypt inside the query engine.
//!
//! `decrypt_text(x)` and `decrypt_numeric(x)` return the plaintext of an
//! encrypted cell, pass legacy plaintext through, and return `NULL` when a
//! value cannot be recovered. They let `WHERE`, `ORDER BY` and aggregates run
//! on decrypted values without loading whole tables into the application.
//!
//! Functions are per connection in SQLite, so every new connection must go
//! through [`register`] before it sees encrypted columns.

use common::{FieldValue, LogicalType};
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use tracing::debug;

use super::column::decode_stored;
use super::StoreError;
use crate::codec::FieldCodec;
use crate::keys::KeyBytes;

pub const DECRYPT_TEXT: &str = "decrypt_text";
pub const DECRYPT_NUMERIC: &str = "decrypt_numeric";

/// Register the decrypt functions on `conn` under the codec's key.
///
/// The key is resolved here, so registration fails fast when none is
/// available rather than every query returning `NULL`.
///
/// # Errors
///
/// Returns [`StoreError::Encryption`] if the key cannot be resolved and
/// [`StoreError::Database`] if SQLite rejects the registration.
pub fn register(conn: &Connection, codec: &FieldCodec) -> Result<(), StoreError> {
    let key = codec.key()?;
    register_with_key(conn, key)?;
    debug!("decrypt functions registered on connection");
    Ok(())
}

fn register_with_key(conn: &Connection, key: KeyBytes) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

    let text_key = key.clone();
    conn.create_scalar_function(DECRYPT_TEXT, 1, flags, move |ctx| {
        let value = decode_stored(&text_key, ctx.get_raw(0), LogicalType::Text);
        Ok(value.map(|v| match v {
            FieldValue::Text(s) => s,
            FieldValue::Number(n) => format!("{n:?}"),
        }))
    })?;

    conn.create_scalar_function(DECRYPT_NUMERIC, 1, flags, move |ctx| {
        let value = decode_stored(&key, ctx.get_raw(0), LogicalType::Numeric);
        Ok(value.and_then(|v| v.as_f64()))
    })?;

    Ok(())
}
