//! Common error types and field value definitions shared across the ledger vault crates.

pub mod error;
pub mod field;

pub use error::EncryptionError;
pub use field::{FieldValue, LogicalType, TransactionPayload, SENSITIVE_TRANSACTION_FIELDS};
