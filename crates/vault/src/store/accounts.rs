use chrono::{SecondsFormat, Utc};
use common::FieldValue;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use super::column::{ACCOUNT_BALANCE, ACCOUNT_NAME, ACCOUNT_NAME_INDEX};
use super::StoreError;
use crate::codec::FieldCodec;
use crate::keys::KeyBytes;

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: i64,
    pub name: Option<String>,
    pub kind: String,
    pub balance: Option<f64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub name: String,
    pub kind: String,
    pub balance: f64,
}

const SELECT_COLUMNS: &str = "id, name, type, balance, created_at, updated_at";

fn row_to_account(key: &KeyBytes, row: &Row) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get("id")?,
        name: ACCOUNT_NAME
            .read(key, row.get_ref("name")?)
            .and_then(|v| v.as_str().map(str::to_owned)),
        kind: row.get("type")?,
        balance: ACCOUNT_BALANCE
            .read(key, row.get_ref("balance")?)
            .and_then(|v| v.as_f64()),
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Insert an account with its name encrypted and its search token set.
///
/// Names that normalize to the same token (`"Checking"`, `" checking"`) are
/// duplicates.
pub fn insert(conn: &Connection, codec: &FieldCodec, input: &NewAccount) -> Result<i64, StoreError> {
    let token = codec
        .search_token(Some(&input.name))?
        .ok_or_else(|| StoreError::Invalid("account name cannot be empty".into()))?;
    let name = ACCOUNT_NAME.bind(codec, Some(&FieldValue::from(input.name.trim())))?;
    let balance = ACCOUNT_BALANCE.bind(codec, Some(&FieldValue::Number(input.balance)))?;
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, false);

    let sql = format!(
        "INSERT INTO accounts (name, {ACCOUNT_NAME_INDEX}, type, balance, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)"
    );
    conn.execute(&sql, params![name, token, input.kind, balance, now])
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
                StoreError::Duplicate(format!("Account {:?}", input.name.trim()))
            }
            other => StoreError::Database(other),
        })?;
    Ok(conn.last_insert_rowid())
}

pub fn get(conn: &Connection, codec: &FieldCodec, id: i64) -> Result<Account, StoreError> {
    let key = codec.key()?;
    let sql = format!("SELECT {SELECT_COLUMNS} FROM accounts WHERE id = ?1");
    conn.query_row(&sql, params![id], |row| row_to_account(&key, row))
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("Account {id}")),
            other => StoreError::Database(other),
        })
}

/// Look an account up by name through its search token; no row is decrypted
/// to find it.
pub fn find_by_name(conn: &Connection, codec: &FieldCodec, name: &str) -> Result<Option<Account>, StoreError> {
    let Some(token) = codec.search_token(Some(name))? else {
        return Ok(None);
    };
    let key = codec.key()?;
    let sql = format!("SELECT {SELECT_COLUMNS} FROM accounts WHERE {ACCOUNT_NAME_INDEX} = ?1");
    Ok(conn
        .query_row(&sql, params![token], |row| row_to_account(&key, row))
        .optional()?)
}

/// All accounts ordered by decrypted name.
pub fn list(conn: &Connection, codec: &FieldCodec) -> Result<Vec<Account>, StoreError> {
    let key = codec.key()?;
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM accounts ORDER BY {} COLLATE NOCASE, id",
        ACCOUNT_NAME.decrypted_expr()
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map([], |row| row_to_account(&key, row))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
