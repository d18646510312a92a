use sled::transaction::UnabortableTransactionError;

#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },
    #[error(
        "insufficient stock for {sku} at {warehouse}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        sku: String,
        warehouse: String,
        requested: u64,
        available: u64,
    },
    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("status mismatch: expected {expected}, found {actual}")]
    StatusMismatch { expected: String, actual: String },
    #[error("transaction id already exists: {0}")]
    DuplicateId(String),
    #[error("source and destination warehouse are both {0}")]
    SameWarehouse(String),
    #[error("order {id} cannot be edited while {status}")]
    NotEditable { id: String, status: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unit of work gave up after {attempts} conflicting attempts")]
    Contention { attempts: u32 },
    #[error("read issued after the first write of a unit of work")]
    ReadAfterWrite,
    #[error("transaction conflict")]
    Conflict,
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("failed to encode record: {0}")]
    Encode(String),
    #[error("failed to decode record: {0}")]
    Decode(#[from] minicbor::decode::Error),
}

impl LedgerError {
    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        LedgerError::NotFound {
            kind,
            key: key.into(),
        }
    }

    /// Failures caused by the request itself. These are never retried.
    pub fn is_business_rule(&self) -> bool {
        matches!(
            self,
            LedgerError::NotFound { .. }
                | LedgerError::InsufficientStock { .. }
                | LedgerError::InvalidTransition { .. }
                | LedgerError::StatusMismatch { .. }
                | LedgerError::DuplicateId(_)
                | LedgerError::SameWarehouse(_)
                | LedgerError::NotEditable { .. }
                | LedgerError::InvalidInput(_)
        )
    }

    /// Store-level conflicts a caller may safely re-issue.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Conflict | LedgerError::Contention { .. })
    }
}

impl From<UnabortableTransactionError> for LedgerError {
    fn from(err: UnabortableTransactionError) -> Self {
        match err {
            UnabortableTransactionError::Conflict => LedgerError::Conflict,
            UnabortableTransactionError::Storage(e) => LedgerError::Storage(e),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_failures() {
        let short = LedgerError::InsufficientStock {
            sku: "P2".into(),
            warehouse: "WH1".into(),
            requested: 5,
            available: 3,
        };
        assert!(short.is_business_rule());
        assert!(!short.is_retryable());
        assert_eq!(
            short.to_string(),
            "insufficient stock for P2 at WH1: requested 5, available 3"
        );

        let busy = LedgerError::Contention { attempts: 4 };
        assert!(busy.is_retryable());
        assert!(!busy.is_business_rule());
    }
}
