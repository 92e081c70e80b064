//! Logical field types and the values that flow through the field codec.
//!
//! These types describe plaintext only. Ciphertext is always an opaque
//! `String` owned by the storage layer.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The semantic type a sensitive column is interpreted as, independent of
/// how it is stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalType {
    /// Free-form UTF-8 text.
    Text,
    /// A floating-point number; integer views truncate.
    Numeric,
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalType::Text => f.write_str("text"),
            LogicalType::Numeric => f.write_str("numeric"),
        }
    }
}

/// A plaintext value of one of the two supported logical types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    /// Borrow the text of a [`FieldValue::Text`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            FieldValue::Number(_) => None,
        }
    }

    /// Numeric view. Text values are parsed after trimming.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Integer view, truncating toward zero.
    pub fn as_i64(&self) -> Option<i64> {
        self.as_f64()
            .filter(|n| n.is_finite())
            .map(|n| n.trunc() as i64)
    }

    /// Returns `true` for the empty string, which is stored unencrypted.
    pub fn is_empty_text(&self) -> bool {
        matches!(self, FieldValue::Text(s) if s.is_empty())
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Number(value as f64)
    }
}

/// The sensitive fields of a transaction row and their logical types.
pub const SENSITIVE_TRANSACTION_FIELDS: &[(&str, LogicalType)] = &[
    ("description", LogicalType::Text),
    ("amount", LogicalType::Numeric),
    ("category", LogicalType::Text),
    ("account", LogicalType::Text),
    ("source_file", LogicalType::Text),
];

/// One row's fields before or after transformation.
///
/// A key mapped to `None` is present but null; a missing key is simply not
/// part of the payload. Never persisted directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionPayload {
    fields: BTreeMap<String, Option<FieldValue>>,
}

impl TransactionPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` to `value`, returning `self` for chaining.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(name, Some(value.into()));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Option<FieldValue>) {
        self.fields.insert(name.into(), value);
    }

    /// The value of `name`, or `None` when absent or null.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name).and_then(Option::as_ref)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }
}
