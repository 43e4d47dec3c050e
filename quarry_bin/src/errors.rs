use gneiss::error::{StorageError, TransactionAbort};
use thiserror::Error;

/// Everything that can go wrong while running a statement. Schema and type
/// errors abort the statement only; a `TransactionAbort` (possibly buried
/// inside a storage error) additionally rolls the transaction back.
#[derive(Debug, Error)]
pub enum QueryError {
    // Schema
    #[error("table `{0}` already exists")]
    TableExists(String),
    #[error("table `{0}` not found")]
    TableNotFound(String),
    #[error("index on {0}({1}) already exists")]
    IndexExists(String, String),
    #[error("index on {0}({1}) not found")]
    IndexNotFound(String, String),
    #[error("column `{0}` not found")]
    ColumnNotFound(String),
    #[error("column `{0}` is ambiguous")]
    AmbiguousColumn(String),
    #[error("expected {expected} values, got {got}")]
    InvalidValueCount { expected: usize, got: usize },

    // Types
    #[error("incompatible types: {lhs} vs {rhs}")]
    IncompatibleType { lhs: String, rhs: String },
    #[error("string of {len} bytes overflows CHAR({cap})")]
    StringOverflow { len: usize, cap: usize },
    #[error("`{0}` is not a valid datetime")]
    InvalidDatetime(String),

    // Integrity
    #[error("unique constraint violated on index {0}")]
    UniqueViolation(String),

    // Front end
    #[error("parse error: {0}")]
    Parse(String),

    // Storage and concurrency
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Abort(#[from] TransactionAbort),

    #[error("internal error: {0}")]
    Internal(String),
}

impl QueryError {
    /// Whether this error means the transaction has to be rolled back.
    pub fn is_abort(&self) -> bool {
        match self {
            QueryError::Abort(_) => true,
            QueryError::Storage(e) => e.is_abort(),
            _ => false,
        }
    }
}
