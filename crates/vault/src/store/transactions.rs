use chrono::{SecondsFormat, Utc};
use common::FieldValue;
use rusqlite::{params, Connection, Row};

use super::column::{
    EncryptedColumn, TRANSACTION_ACCOUNT, TRANSACTION_AMOUNT, TRANSACTION_CATEGORY,
    TRANSACTION_DESCRIPTION, TRANSACTION_SOURCE_FILE,
};
use super::StoreError;
use crate::codec::FieldCodec;
use crate::keys::KeyBytes;

/// A transaction as the application sees it: every field decrypted.
///
/// Encrypted fields are `Option` because a value that fails verification
/// reads as absent.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: i64,
    pub date: String,
    pub description: Option<String>,
    pub amount: Option<f64>,
    pub category: Option<String>,
    pub account: Option<String>,
    pub account_id: Option<i64>,
    pub source_file: Option<String>,
    pub import_timestamp: String,
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub date: String,
    pub description: String,
    pub amount: f64,
    pub category: Option<String>,
    pub account: Option<String>,
    pub account_id: Option<i64>,
    pub source_file: String,
}

const SELECT_COLUMNS: &str =
    "id, date, description, amount, category, account, account_id, source_file, import_timestamp";

fn text(column: &EncryptedColumn, key: &KeyBytes, row: &Row, name: &str) -> rusqlite::Result<Option<String>> {
    Ok(column.read(key, row.get_ref(name)?).and_then(|v| match v {
        FieldValue::Text(s) => Some(s),
        FieldValue::Number(n) => Some(format!("{n:?}")),
    }))
}

fn row_to_transaction(key: &KeyBytes, row: &Row) -> rusqlite::Result<Transaction> {
    Ok(Transaction {
        id: row.get("id")?,
        date: row.get("date")?,
        description: text(&TRANSACTION_DESCRIPTION, key, row, "description")?,
        amount: TRANSACTION_AMOUNT
            .read(key, row.get_ref("amount")?)
            .and_then(|v| v.as_f64()),
        category: text(&TRANSACTION_CATEGORY, key, row, "category")?,
        account: text(&TRANSACTION_ACCOUNT, key, row, "account")?,
        account_id: row.get("account_id")?,
        source_file: text(&TRANSACTION_SOURCE_FILE, key, row, "source_file")?,
        import_timestamp: row.get("import_timestamp")?,
    })
}

fn bind_text(column: &EncryptedColumn, codec: &FieldCodec, value: Option<&str>) -> Result<Option<String>, StoreError> {
    let value = value.map(FieldValue::from);
    Ok(column.bind(codec, value.as_ref())?)
}

/// Insert a transaction, encrypting every sensitive field. Returns the row id.
pub fn insert(conn: &Connection, codec: &FieldCodec, input: &NewTransaction) -> Result<i64, StoreError> {
    if input.description.trim().is_empty() {
        return Err(StoreError::Invalid("description cannot be empty".into()));
    }
    if !input.amount.is_finite() {
        return Err(StoreError::Invalid("amount must be a finite number".into()));
    }

    let description = bind_text(&TRANSACTION_DESCRIPTION, codec, Some(&input.description))?;
    let amount = TRANSACTION_AMOUNT.bind(codec, Some(&FieldValue::Number(input.amount)))?;
    let category = bind_text(&TRANSACTION_CATEGORY, codec, input.category.as_deref())?;
    let account = bind_text(&TRANSACTION_ACCOUNT, codec, input.account.as_deref())?;
    let source_file = bind_text(&TRANSACTION_SOURCE_FILE, codec, Some(&input.source_file))?;
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, false);

    let mut stmt = conn.prepare_cached(
        "INSERT INTO transactions
         (date, description, amount, category, account, account_id, source_file, import_timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    stmt.execute(params![
        input.date,
        description,
        amount,
        category,
        account,
        input.account_id,
        source_file,
        now,
    ])?;
    Ok(conn.last_insert_rowid())
}

pub fn get(conn: &Connection, codec: &FieldCodec, id: i64) -> Result<Transaction, StoreError> {
    let key = codec.key()?;
    let sql = format!("SELECT {SELECT_COLUMNS} FROM transactions WHERE id = ?1");
    conn.query_row(&sql, params![id], |row| row_to_transaction(&key, row))
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("Transaction {id}")),
            other => StoreError::Database(other),
        })
}

/// Transactions whose decrypted category equals `category`, oldest first.
///
/// The comparison runs inside SQLite on `decrypt_text(category)`.
pub fn find_by_category(conn: &Connection, codec: &FieldCodec, category: &str) -> Result<Vec<Transaction>, StoreError> {
    let key = codec.key()?;
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM transactions WHERE {} = ?1 ORDER BY date, id",
        TRANSACTION_CATEGORY.decrypted_expr()
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![category], |row| row_to_transaction(&key, row))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Up to `limit` transactions ordered by decrypted amount.
///
/// Rows whose amount cannot be recovered sort first, as SQLite orders `NULL`.
pub fn list_by_amount(
    conn: &Connection,
    codec: &FieldCodec,
    descending: bool,
    limit: u32,
) -> Result<Vec<Transaction>, StoreError> {
    let key = codec.key()?;
    let direction = if descending { "DESC" } else { "ASC" };
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM transactions ORDER BY {} {direction}, id LIMIT ?1",
        TRANSACTION_AMOUNT.decrypted_expr()
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![limit], |row| row_to_transaction(&key, row))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Sum of decrypted amounts per decrypted category, ordered by category.
///
/// Uncategorized rows are grouped under `None`.
pub fn totals_by_category(conn: &Connection) -> Result<Vec<(Option<String>, f64)>, StoreError> {
    let sql = format!(
        "SELECT {cat} AS plain_category, TOTAL({amt}) FROM transactions
         GROUP BY plain_category ORDER BY plain_category",
        cat = TRANSACTION_CATEGORY.decrypted_expr(),
        amt = TRANSACTION_AMOUNT.decrypted_expr(),
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
