//! The catalog of encrypted columns and their bind/read conversions.

use common::{EncryptionError, FieldValue, LogicalType};
use rusqlite::types::ValueRef;

use super::functions::{DECRYPT_NUMERIC, DECRYPT_TEXT};
use crate::codec::{read_with, FieldCodec};
use crate::keys::KeyBytes;

/// A column whose stored value is ciphertext of a given logical type.
///
/// The type is `Copy` and carries no key or cache, so SQL built from it is
/// identical across calls and safe for `prepare_cached`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptedColumn {
    pub table: &'static str,
    pub column: &'static str,
    pub logical_type: LogicalType,
}

impl EncryptedColumn {
    pub const fn new(table: &'static str, column: &'static str, logical_type: LogicalType) -> Self {
        Self {
            table,
            column,
            logical_type,
        }
    }

    /// Encrypt a value for writing to this column.
    ///
    /// # Errors
    ///
    /// Propagates key and encryption errors from the codec.
    pub fn bind(&self, codec: &FieldCodec, value: Option<&FieldValue>) -> Result<Option<String>, EncryptionError> {
        codec.encrypt_value(value, self.logical_type)
    }

    /// Decode a stored cell.
    ///
    /// Legacy plaintext passes through, ciphertext is decrypted, and a value
    /// that fails verification reads as `None`.
    pub fn read(&self, key: &KeyBytes, raw: ValueRef<'_>) -> Option<FieldValue> {
        decode_stored(key, raw, self.logical_type)
    }

    /// SQL expression yielding the decrypted value, for use in `WHERE`,
    /// `ORDER BY` and aggregates on a connection with the functions registered.
    pub fn decrypted_expr(&self) -> String {
        let function = match self.logical_type {
            LogicalType::Text => DECRYPT_TEXT,
            LogicalType::Numeric => DECRYPT_NUMERIC,
        };
        format!("{function}({})", self.column)
    }
}

/// Decode a raw SQLite value of any storage class.
pub(crate) fn decode_stored(key: &KeyBytes, raw: ValueRef<'_>, ty: LogicalType) -> Option<FieldValue> {
    match (raw, ty) {
        (ValueRef::Null, _) => None,
        (ValueRef::Integer(i), LogicalType::Numeric) => Some(FieldValue::Number(i as f64)),
        (ValueRef::Integer(i), LogicalType::Text) => Some(FieldValue::Text(i.to_string())),
        (ValueRef::Real(f), LogicalType::Numeric) => Some(FieldValue::Number(f)),
        (ValueRef::Real(f), LogicalType::Text) => Some(FieldValue::Text(format!("{f:?}"))),
        (ValueRef::Text(bytes), _) | (ValueRef::Blob(bytes), _) => {
            let text = std::str::from_utf8(bytes).ok()?;
            read_with(key, Some(text), ty)
        }
    }
}

pub const TRANSACTION_DESCRIPTION: EncryptedColumn =
    EncryptedColumn::new("transactions", "description", LogicalType::Text);
pub const TRANSACTION_AMOUNT: EncryptedColumn =
    EncryptedColumn::new("transactions", "amount", LogicalType::Numeric);
pub const TRANSACTION_CATEGORY: EncryptedColumn =
    EncryptedColumn::new("transactions", "category", LogicalType::Text);
pub const TRANSACTION_ACCOUNT: EncryptedColumn =
    EncryptedColumn::new("transactions", "account", LogicalType::Text);
pub const TRANSACTION_SOURCE_FILE: EncryptedColumn =
    EncryptedColumn::new("transactions", "source_file", LogicalType::Text);

pub const BUDGET_CATEGORY: EncryptedColumn = EncryptedColumn::new("budgets", "category", LogicalType::Text);
pub const BUDGET_ALLOCATED_AMOUNT: EncryptedColumn =
    EncryptedColumn::new("budgets", "allocated_amount", LogicalType::Numeric);
pub const INCOME_OVERRIDE_AMOUNT: EncryptedColumn =
    EncryptedColumn::new("income_overrides", "override_amount", LogicalType::Numeric);
pub const BALANCE_HISTORY_BALANCE: EncryptedColumn =
    EncryptedColumn::new("balance_history", "balance", LogicalType::Numeric);
pub const BALANCE_OVERRIDE_BALANCE: EncryptedColumn =
    EncryptedColumn::new("balance_overrides", "override_balance", LogicalType::Numeric);

pub const ACCOUNT_NAME: EncryptedColumn = EncryptedColumn::new("accounts", "name", LogicalType::Text);
pub const ACCOUNT_BALANCE: EncryptedColumn = EncryptedColumn::new("accounts", "balance", LogicalType::Numeric);

/// Search-token column paired with [`ACCOUNT_NAME`].
pub const ACCOUNT_NAME_INDEX: &str = "name_index";

/// Every encrypted column in the store.
pub const GOVERNED_COLUMNS: &[EncryptedColumn] = &[
    TRANSACTION_DESCRIPTION,
    TRANSACTION_AMOUNT,
    TRANSACTION_CATEGORY,
    TRANSACTION_ACCOUNT,
    TRANSACTION_SOURCE_FILE,
    BUDGET_CATEGORY,
    BUDGET_ALLOCATED_AMOUNT,
    INCOME_OVERRIDE_AMOUNT,
    BALANCE_HISTORY_BALANCE,
    BALANCE_OVERRIDE_BALANCE,
    ACCOUNT_NAME,
    ACCOUNT_BALANCE,
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests::test_codec;
    use common::SENSITIVE_TRANSACTION_FIELDS;

    #[test]
    fn catalog_covers_transaction_fields() {
        for (field, ty) in SENSITIVE_TRANSACTION_FIELDS {
            let column = GOVERNED_COLUMNS
                .iter()
                .find(|c| c.table == "transactions" && c.column == *field)
                .unwrap();
            assert_eq!(column.logical_type, *ty);
        }
        assert_eq!(GOVERNED_COLUMNS.len(), 12);
    }

    #[test]
    fn decrypted_expr_uses_type_specific_function() {
        assert_eq!(TRANSACTION_CATEGORY.decrypted_expr(), "decrypt_text(category)");
        assert_eq!(ACCOUNT_BALANCE.decrypted_expr(), "decrypt_numeric(balance)");
    }

    #[test]
    fn bind_then_read_round_trips() {
        let codec = test_codec();
        let key = codec.key().unwrap();
        let stored = TRANSACTION_AMOUNT
            .bind(&codec, Some(&FieldValue::Number(-42.5)))
            .unwrap()
            .unwrap();
        let back = TRANSACTION_AMOUNT.read(&key, ValueRef::Text(stored.as_bytes()));
        assert_eq!(back, Some(FieldValue::Number(-42.5)));
    }

    #[test]
    fn read_accepts_legacy_storage_classes() {
        let codec = test_codec();
        let key = codec.key().unwrap();
        assert_eq!(TRANSACTION_AMOUNT.read(&key, ValueRef::Real(3.5)), Some(FieldValue::Number(3.5)));
        assert_eq!(TRANSACTION_AMOUNT.read(&key, ValueRef::Integer(7)), Some(FieldValue::Number(7.0)));
        assert_eq!(
            TRANSACTION_CATEGORY.read(&key, ValueRef::Text(b"Groceries")),
            Some(FieldValue::from("Groceries"))
        );
        assert_eq!(TRANSACTION_CATEGORY.read(&key, ValueRef::Null), None);
    }
}
