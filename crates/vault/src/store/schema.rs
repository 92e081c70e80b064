//! DDL for the tables that hold encrypted columns.
//!
//! Every encrypted column is declared `TEXT`: ciphertext is a string no
//! matter the logical type, and `TEXT` affinity stops SQLite from coercing it.

use rusqlite::Connection;
use tracing::info;

use super::StoreError;

const GOVERNED_TABLES_DDL: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL,
    name_index  TEXT UNIQUE,
    type        TEXT NOT NULL DEFAULT 'bank',
    balance     TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS transactions (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    date              TEXT NOT NULL,
    description       TEXT NOT NULL,
    amount            TEXT NOT NULL,
    category          TEXT,
    account           TEXT,
    account_id        INTEGER REFERENCES accounts(id),
    source_file       TEXT NOT NULL,
    import_timestamp  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_transactions_date ON transactions(date);
CREATE INDEX IF NOT EXISTS idx_transactions_account_id ON transactions(account_id);

CREATE TABLE IF NOT EXISTS budgets (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    category          TEXT NOT NULL,
    allocated_amount  TEXT NOT NULL,
    period_start      TEXT NOT NULL,
    period_end        TEXT NOT NULL,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS income_overrides (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    override_date    TEXT NOT NULL,
    override_amount  TEXT NOT NULL,
    notes            TEXT,
    created_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS balance_history (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id  INTEGER NOT NULL REFERENCES accounts(id),
    balance     TEXT NOT NULL,
    timestamp   TEXT NOT NULL,
    notes       TEXT
);
CREATE INDEX IF NOT EXISTS idx_balance_history_account_id ON balance_history(account_id);

CREATE TABLE IF NOT EXISTS balance_overrides (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id        INTEGER NOT NULL REFERENCES accounts(id),
    override_date     TEXT NOT NULL,
    override_balance  TEXT NOT NULL,
    created_at        TEXT NOT NULL,
    notes             TEXT
);
CREATE INDEX IF NOT EXISTS idx_balance_overrides_account_id ON balance_overrides(account_id);
";

/// Create every governed table if it does not already exist.
///
/// # Errors
///
/// Returns [`StoreError::Database`] if any statement fails.
pub fn create_governed_tables(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(GOVERNED_TABLES_DDL)?;
    info!("governed tables ready");
    Ok(())
}
