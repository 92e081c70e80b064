//! SQLite integration: connections that can decrypt in SQL, the encrypted
//! column catalog, DDL, and the data-access functions built on them.
//!
//! Every connection handed out by this module has the decrypt functions
//! registered. Code that opens its own `rusqlite::Connection` must call
//! [`functions::register`] before querying encrypted columns with
//! [`column::EncryptedColumn::decrypted_expr`].

pub mod accounts;
pub mod column;
pub mod functions;
pub mod schema;
pub mod transactions;

use std::path::{Path, PathBuf};

use common::EncryptionError;
use r2d2::{CustomizeConnection, Pool};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use thiserror::Error;
use tracing::{debug, info};

use crate::codec::FieldCodec;

pub type DbPool = Pool<SqliteConnectionManager>;

const DEFAULT_POOL_SIZE: u32 = 4;

const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON;
     PRAGMA busy_timeout = 5000;";

/// Errors produced by the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    #[error("database file not found: {0}")]
    MissingDatabase(PathBuf),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Duplicate(String),

    #[error("invalid input: {0}")]
    Invalid(String),
}

/// Applies pragmas and registers the decrypt functions on each new physical
/// connection the pool opens.
#[derive(Debug)]
struct EncryptionCustomizer {
    codec: FieldCodec,
}

impl CustomizeConnection<Connection, rusqlite::Error> for EncryptionCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(CONNECTION_PRAGMAS)?;
        functions::register(conn, &self.codec).map_err(|e| match e {
            StoreError::Database(inner) => inner,
            other => rusqlite::Error::UserFunctionError(Box::new(other)),
        })
    }
}

/// Open a single connection with pragmas applied and functions registered.
///
/// # Errors
///
/// Returns [`StoreError::MissingDatabase`] if `path` does not exist, and
/// database or key errors from setup.
pub fn open_connection(path: &Path, codec: &FieldCodec) -> Result<Connection, StoreError> {
    if !path.exists() {
        return Err(StoreError::MissingDatabase(path.to_path_buf()));
    }
    let conn = Connection::open(path)?;
    prepare_connection(&conn, codec)?;
    debug!(path = %path.display(), "connection opened");
    Ok(conn)
}

/// In-memory connection with the same setup as [`open_connection`].
///
/// # Errors
///
/// Returns database or key errors from setup.
pub fn open_in_memory(codec: &FieldCodec) -> Result<Connection, StoreError> {
    let conn = Connection::open_in_memory()?;
    prepare_connection(&conn, codec)?;
    Ok(conn)
}

fn prepare_connection(conn: &Connection, codec: &FieldCodec) -> Result<(), StoreError> {
    conn.execute_batch(CONNECTION_PRAGMAS)?;
    functions::register(conn, codec)
}

/// Build a connection pool over the database at `path`, creating the file if
/// needed. Every pooled connection has the decrypt functions registered.
///
/// # Errors
///
/// Returns [`StoreError::Pool`] if the initial connections cannot be
/// established, which includes an unavailable key.
pub fn build_pool(path: &Path, codec: &FieldCodec) -> Result<DbPool, StoreError> {
    info!(path = %path.display(), "opening encrypted store");

    let manager = SqliteConnectionManager::file(path);
    let pool = Pool::builder()
        .max_size(DEFAULT_POOL_SIZE)
        .connection_customizer(Box::new(EncryptionCustomizer { codec: codec.clone() }))
        .build(manager)?;

    // Journal mode is database-wide; once is enough.
    {
        let conn = pool.get()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    }
    Ok(pool)
}

/// Whether `err` means the table or column is absent from this database.
pub fn is_missing_schema(err: &rusqlite::Error) -> bool {
    let msg = match err {
        rusqlite::Error::SqliteFailure(_, Some(msg)) => msg,
        rusqlite::Error::SqlInputError { msg, .. } => msg,
        _ => return false,
    };
    msg.starts_with("no such table") || msg.starts_with("no such column")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests::test_codec;

    #[test]
    fn open_connection_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.db");
        let err = open_connection(&path, &test_codec()).unwrap_err();
        assert!(matches!(err, StoreError::MissingDatabase(p) if p == path));
    }

    #[test]
    fn every_pooled_connection_can_decrypt() {
        let dir = tempfile::tempdir().unwrap();
        let codec = test_codec();
        let pool = build_pool(&dir.path().join("store.db"), &codec).unwrap();

        let token = codec
            .encrypt_value(Some(&common::FieldValue::from("Rent")), common::LogicalType::Text)
            .unwrap();
        let held: Vec<_> = (0..DEFAULT_POOL_SIZE).map(|_| pool.get().unwrap()).collect();
        for conn in &held {
            let plain: Option<String> = conn
                .query_row("SELECT decrypt_text(?1)", [&token], |row| row.get(0))
                .unwrap();
            assert_eq!(plain.as_deref(), Some("Rent"));
        }
    }

    #[test]
    fn missing_schema_is_detected() {
        let conn = open_in_memory(&test_codec()).unwrap();
        let table = conn.prepare("SELECT id FROM budgets").unwrap_err();
        assert!(is_missing_schema(&table));

        conn.execute_batch("CREATE TABLE budgets (id INTEGER PRIMARY KEY)").unwrap();
        let column = conn.prepare("SELECT category FROM budgets").unwrap_err();
        assert!(is_missing_schema(&column));

        let syntax = conn.prepare("SELEC 1").unwrap_err();
        assert!(!is_missing_schema(&syntax));
    }
}
