//! One-shot, idempotent upgrade of legacy plaintext rows to ciphertext.
//!
//! A run walks every governed table inside a single SQLite transaction:
//!
//! ```text
//! NotStarted ─► Scanning ─┬─► RolledBack ─► Done   (dry run)
//!                         └─► Committed  ─► Done   (commit)
//! ```
//!
//! A value is rewritten only when it is non-null, non-empty and not already
//! ciphertext, so a second run over a migrated database changes nothing.
//! Tables or columns absent from the database are skipped. Failures to encode
//! a single value are counted in the report and the scan moves on; database
//! and key errors abort the run and the transaction rolls back.

pub mod timestamps;

use std::collections::BTreeMap;
use std::fmt;

use common::{EncryptionError, FieldValue, LogicalType, TransactionPayload, SENSITIVE_TRANSACTION_FIELDS};
use rusqlite::types::{ToSql, Value};
use rusqlite::{params, Connection, Statement};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::codec::{is_ciphertext, FieldCodec};
use crate::keys::KeyBytes;
use crate::store::column::{
    EncryptedColumn, ACCOUNT_NAME_INDEX, BALANCE_HISTORY_BALANCE, BALANCE_OVERRIDE_BALANCE,
    BUDGET_ALLOCATED_AMOUNT, BUDGET_CATEGORY, INCOME_OVERRIDE_AMOUNT,
};
use crate::store::is_missing_schema;
use crate::token::derive_search_token;

use self::timestamps::normalize_timestamp;

/// Single-column tables handled value by value.
const COLUMN_TARGETS: &[EncryptedColumn] = &[
    BUDGET_CATEGORY,
    BUDGET_ALLOCATED_AMOUNT,
    INCOME_OVERRIDE_AMOUNT,
    BALANCE_HISTORY_BALANCE,
    BALANCE_OVERRIDE_BALANCE,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationMode {
    /// Perform every read and transform, then roll back.
    DryRun,
    /// Write and commit.
    Commit,
}

impl MigrationMode {
    pub fn from_dry_run(dry_run: bool) -> Self {
        if dry_run {
            Self::DryRun
        } else {
            Self::Commit
        }
    }

    pub fn is_dry_run(self) -> bool {
        self == Self::DryRun
    }
}

impl fmt::Display for MigrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DryRun => f.write_str("dry-run"),
            Self::Commit => f.write_str("commit"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    NotStarted,
    Scanning,
    RolledBack,
    Committed,
    Done,
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    #[error("database error during migration: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("a migration runner can only run once (state: {0:?})")]
    AlreadyRun(MigrationState),
}

/// Outcome of a run: rows updated (or that would be updated) per table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub mode: MigrationMode,
    pub per_table: BTreeMap<&'static str, usize>,
    /// Values that could not be encrypted and were left as they were.
    pub failures: usize,
}

impl MigrationReport {
    fn new(mode: MigrationMode) -> Self {
        Self {
            mode,
            per_table: BTreeMap::new(),
            failures: 0,
        }
    }

    fn record(&mut self, table: &'static str, rows: usize) {
        *self.per_table.entry(table).or_default() += rows;
    }

    pub fn total(&self) -> usize {
        self.per_table.values().sum()
    }
}

/// Drives one migration run over a connection.
#[derive(Debug)]
pub struct MigrationRunner<'a> {
    codec: &'a FieldCodec,
    mode: MigrationMode,
    state: MigrationState,
}

impl<'a> MigrationRunner<'a> {
    pub fn new(codec: &'a FieldCodec, mode: MigrationMode) -> Self {
        Self {
            codec,
            mode,
            state: MigrationState::NotStarted,
        }
    }

    pub fn state(&self) -> MigrationState {
        self.state
    }

    /// Run the migration.
    ///
    /// The key is resolved before any table is read, so a failure to load or
    /// persist it aborts the run with nothing touched.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Encryption`] when no key is available,
    /// [`MigrationError::Database`] on any SQLite failure other than a missing
    /// table or column, and [`MigrationError::AlreadyRun`] if this runner was used before.
    pub fn run(&mut self, conn: &mut Connection) -> Result<MigrationReport, MigrationError> {
        if self.state != MigrationState::NotStarted {
            return Err(MigrationError::AlreadyRun(self.state));
        }
        let key = self.codec.key()?;
        let tx = conn.transaction()?;
        self.transition(MigrationState::Scanning);

        let mut scan = Scan {
            conn: &tx,
            codec: self.codec,
            key: &key,
            mode: self.mode,
            report: MigrationReport::new(self.mode),
        };
        scan.transactions()?;
        for column in COLUMN_TARGETS {
            scan.column(column)?;
        }
        scan.accounts()?;
        let report = scan.report;

        match self.mode {
            MigrationMode::DryRun => {
                tx.rollback()?;
                self.transition(MigrationState::RolledBack);
            }
            MigrationMode::Commit => {
                tx.commit()?;
                self.transition(MigrationState::Committed);
            }
        }
        self.transition(MigrationState::Done);

        info!(
            mode = %report.mode,
            rows = report.total(),
            failures = report.failures,
            "migration finished"
        );
        Ok(report)
    }

    fn transition(&mut self, next: MigrationState) {
        debug!(from = ?self.state, to = ?next, "migration state change");
        self.state = next;
    }
}

/// Per-run scanning context.
struct Scan<'c> {
    conn: &'c Connection,
    codec: &'c FieldCodec,
    key: &'c KeyBytes,
    mode: MigrationMode,
    report: MigrationReport,
}

struct TransactionRow {
    id: i64,
    date: Value,
    import_timestamp: Value,
    fields: TransactionPayload,
}

/// Prepare `sql`, or `None` when the table or a column does not exist.
fn prepare_optional<'c>(
    conn: &'c Connection,
    sql: &str,
    table: &str,
) -> Result<Option<Statement<'c>>, MigrationError> {
    match conn.prepare(sql) {
        Ok(stmt) => Ok(Some(stmt)),
        Err(e) if is_missing_schema(&e) => {
            info!(table, reason = %e, "skipping table");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

impl Scan<'_> {
    fn execute(&self, sql: &str, params: &[&dyn ToSql]) -> Result<(), MigrationError> {
        if !self.mode.is_dry_run() {
            self.conn.execute(sql, params)?;
        }
        Ok(())
    }

    fn transactions(&mut self) -> Result<(), MigrationError> {
        const TABLE: &str = "transactions";
        let rows = {
            let Some(mut stmt) = prepare_optional(
                self.conn,
                "SELECT id, date, import_timestamp, description, amount, category, account, source_file
                 FROM transactions",
                TABLE,
            )?
            else {
                self.report.record(TABLE, 0);
                return Ok(());
            };
            let mapped = stmt.query_map([], |row| {
                let mut fields = TransactionPayload::new();
                for (offset, (name, ty)) in SENSITIVE_TRANSACTION_FIELDS.iter().enumerate() {
                    fields.insert(*name, to_field(row.get(3 + offset)?, *ty));
                }
                Ok(TransactionRow {
                    id: row.get(0)?,
                    date: row.get(1)?,
                    import_timestamp: row.get(2)?,
                    fields,
                })
            })?;
            mapped.collect::<Result<Vec<_>, _>>()?
        };

        let mut updated = 0;
        for row in rows {
            let date = normalized(&row.date);
            let import_timestamp = normalized(&row.import_timestamp);
            let timestamps_changed = date.is_some() || import_timestamp.is_some();
            let date = date.map(Value::Text).unwrap_or(row.date);
            let import_timestamp = import_timestamp.map(Value::Text).unwrap_or(row.import_timestamp);

            let pending = SENSITIVE_TRANSACTION_FIELDS
                .iter()
                .any(|(name, _)| needs_encryption(row.fields.get(name)));
            if !pending {
                if timestamps_changed {
                    debug!(table = TABLE, row_id = row.id, "normalizing timestamps");
                    self.execute(
                        "UPDATE transactions SET date = ?1, import_timestamp = ?2 WHERE id = ?3",
                        params![date, import_timestamp, row.id],
                    )?;
                    updated += 1;
                }
                continue;
            }

            let encrypted = match self.codec.encrypt_transaction_payload(&row.fields, true) {
                Ok(encrypted) => encrypted,
                Err(e) => {
                    warn!(table = TABLE, row_id = row.id, error = %e, "unable to encrypt row; left unchanged");
                    self.report.failures += 1;
                    continue;
                }
            };
            let text = |name: &str| encrypted.get(name).and_then(FieldValue::as_str).map(str::to_owned);

            debug!(table = TABLE, row_id = row.id, "encrypting row");
            self.execute(
                "UPDATE transactions
                 SET description = ?1, amount = ?2, category = ?3, account = ?4, source_file = ?5,
                     date = ?6, import_timestamp = ?7
                 WHERE id = ?8",
                params![
                    text("description"),
                    text("amount"),
                    text("category"),
                    text("account"),
                    text("source_file"),
                    date,
                    import_timestamp,
                    row.id,
                ],
            )?;
            updated += 1;
        }

        info!(table = TABLE, rows = updated, "table scanned");
        self.report.record(TABLE, updated);
        Ok(())
    }

    fn column(&mut self, column: &EncryptedColumn) -> Result<(), MigrationError> {
        let select = format!("SELECT id, {} FROM {}", column.column, column.table);
        let rows = {
            let Some(mut stmt) = prepare_optional(self.conn, &select, column.table)? else {
                self.report.record(column.table, 0);
                return Ok(());
            };
            let mapped = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Value>(1)?)))?;
            mapped.collect::<Result<Vec<_>, _>>()?
        };

        let update = format!("UPDATE {} SET {} = ?1 WHERE id = ?2", column.table, column.column);
        let mut updated = 0;
        for (id, raw) in rows {
            let value = to_field(raw, column.logical_type);
            if !needs_encryption(value.as_ref()) {
                continue;
            }
            match self.codec.encrypt_value(value.as_ref(), column.logical_type) {
                Ok(encrypted) => {
                    debug!(table = column.table, column = column.column, row_id = id, "encrypting value");
                    self.execute(&update, params![encrypted, id])?;
                    updated += 1;
                }
                Err(e) => {
                    warn!(
                        table = column.table,
                        column = column.column,
                        row_id = id,
                        error = %e,
                        "unable to encrypt value; left unchanged"
                    );
                    self.report.failures += 1;
                }
            }
        }

        info!(table = column.table, column = column.column, rows = updated, "column scanned");
        self.report.record(column.table, updated);
        Ok(())
    }

    fn accounts(&mut self) -> Result<(), MigrationError> {
        const TABLE: &str = "accounts";
        let select = format!("SELECT id, name, balance, {ACCOUNT_NAME_INDEX} FROM accounts");
        let rows = {
            let Some(mut stmt) = prepare_optional(self.conn, &select, TABLE)? else {
                self.report.record(TABLE, 0);
                return Ok(());
            };
            let mapped = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Value>(1)?,
                    row.get::<_, Value>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?;
            mapped.collect::<Result<Vec<_>, _>>()?
        };

        let mut updated = 0;
        for (id, name, balance, name_index) in rows {
            let mut sets: Vec<(&str, String)> = Vec::new();

            let plaintext_name = match to_field(name, LogicalType::Text) {
                Some(FieldValue::Text(stored)) if !stored.is_empty() => {
                    if is_ciphertext(&stored) {
                        self.codec
                            .decrypt_value(Some(&stored), LogicalType::Text)
                            .ok()
                            .flatten()
                            .and_then(|v| v.as_str().map(str::to_owned))
                    } else {
                        match self.codec.encrypt_value(Some(&FieldValue::Text(stored.clone())), LogicalType::Text) {
                            Ok(Some(encrypted)) => sets.push(("name", encrypted)),
                            Ok(None) => {}
                            Err(e) => {
                                warn!(table = TABLE, column = "name", row_id = id, error = %e, "unable to encrypt value");
                                self.report.failures += 1;
                            }
                        }
                        Some(stored)
                    }
                }
                _ => None,
            };

            let balance = to_field(balance, LogicalType::Numeric);
            if needs_encryption(balance.as_ref()) {
                match self.codec.encrypt_value(balance.as_ref(), LogicalType::Numeric) {
                    Ok(Some(encrypted)) => sets.push(("balance", encrypted)),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(table = TABLE, column = "balance", row_id = id, error = %e, "unable to encrypt value");
                        self.report.failures += 1;
                    }
                }
            }

            if name_index.as_deref().map_or(true, str::is_empty) {
                if let Some(token) = derive_search_token(self.key, plaintext_name.as_deref()) {
                    sets.push((ACCOUNT_NAME_INDEX, token));
                }
            }

            if sets.is_empty() {
                continue;
            }
            let assignments: Vec<String> = sets
                .iter()
                .enumerate()
                .map(|(i, (column, _))| format!("{column} = ?{}", i + 1))
                .collect();
            let sql = format!(
                "UPDATE accounts SET {} WHERE id = ?{}",
                assignments.join(", "),
                sets.len() + 1
            );
            let mut values: Vec<&dyn ToSql> = sets.iter().map(|(_, v)| v as &dyn ToSql).collect();
            values.push(&id);

            debug!(table = TABLE, row_id = id, columns = sets.len(), "updating account");
            self.execute(&sql, &values)?;
            updated += 1;
        }

        info!(table = TABLE, rows = updated, "table scanned");
        self.report.record(TABLE, updated);
        Ok(())
    }
}

/// Interpret a raw cell as a plaintext candidate of type `ty`.
fn to_field(raw: Value, ty: LogicalType) -> Option<FieldValue> {
    match (raw, ty) {
        (Value::Null, _) => None,
        (Value::Integer(i), LogicalType::Numeric) => Some(FieldValue::Number(i as f64)),
        (Value::Integer(i), LogicalType::Text) => Some(FieldValue::Text(i.to_string())),
        (Value::Real(f), LogicalType::Numeric) => Some(FieldValue::Number(f)),
        (Value::Real(f), LogicalType::Text) => Some(FieldValue::Text(format!("{f:?}"))),
        (Value::Text(s), _) => Some(FieldValue::Text(s)),
        (Value::Blob(bytes), _) => String::from_utf8(bytes).ok().map(FieldValue::Text),
    }
}

/// Non-null, non-empty, and not already ciphertext.
fn needs_encryption(value: Option<&FieldValue>) -> bool {
    match value {
        None => false,
        Some(FieldValue::Number(_)) => true,
        Some(FieldValue::Text(s)) => !s.is_empty() && !is_ciphertext(s),
    }
}

/// The normalized form of a text timestamp, if it differs from the stored one.
fn normalized(raw: &Value) -> Option<String> {
    let Value::Text(stored) = raw else {
        return None;
    };
    normalize_timestamp(stored).filter(|n| n != stored)
}
