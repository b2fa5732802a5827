//! Error types for allowance-engine operations.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    /// An interval tag that is not one of the known schedule kinds.
    #[error("Invalid schedule kind: {0}")]
    InvalidScheduleKind(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientFunds { requested: String, available: String },

    /// A write batch guard no longer matched the stored state.
    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        LedgerError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// True when the error means another writer already applied a competing change.
    pub fn is_conflict(&self) -> bool {
        matches!(self, LedgerError::Conflict(_))
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
