//! Error types for the point ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Ledger errors
///
/// Business variants are raised by the engine before or inside a unit of
/// work; in the latter case the unit of work is discarded and nothing it wrote
/// becomes visible.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// Malformed or out-of-range input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Wallet, project, task or referral code absent
    #[error("{0} not found")]
    NotFound(String),

    /// Idempotency key, transaction hash or claim already recorded
    #[error("Duplicate request: {0}")]
    Duplicate(String),

    /// Operation not allowed in the current lifecycle state
    #[error("Invalid state: {0}")]
    State(String),

    /// Spendable balance below the requested amount
    #[error("Insufficient STAR balance: have {available}, need {required}")]
    InsufficientBalance {
        /// Amount requested
        required: String,
        /// Balance observed under lock
        available: String,
    },

    /// Lock wait, statement timeout or serialization failure; safe to retry
    #[error("Retryable storage conflict: {0}")]
    Retryable(String),

    /// Unexpected storage or connectivity failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    /// Stable machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::Validation(_) => "validation_error",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::Duplicate(_) => "duplicate",
            LedgerError::State(_) => "invalid_state",
            LedgerError::InsufficientBalance { .. } => "insufficient_balance",
            LedgerError::Retryable(_) => "retryable",
            LedgerError::Storage(_) => "storage_error",
        }
    }

    /// Whether the caller may resubmit the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Retryable(_))
    }

    /// Business rejection as opposed to an infrastructure failure
    pub fn is_rejection(&self) -> bool {
        !matches!(self, LedgerError::Retryable(_) | LedgerError::Storage(_))
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        LedgerError::NotFound(what.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_stable() {
        assert_eq!(LedgerError::Validation("x".into()).kind(), "validation_error");
        assert_eq!(LedgerError::Duplicate("x".into()).kind(), "duplicate");
        assert_eq!(
            LedgerError::InsufficientBalance {
                required: "60.00".into(),
                available: "40.00".into()
            }
            .kind(),
            "insufficient_balance"
        );
    }

    #[test]
    fn test_rejection_vs_infrastructure() {
        assert!(LedgerError::State("ended".into()).is_rejection());
        assert!(!LedgerError::Storage("down".into()).is_rejection());
        assert!(LedgerError::Retryable("lock timeout".into()).is_retryable());
    }

    #[test]
    fn test_insufficient_balance_message() {
        let err = LedgerError::InsufficientBalance {
            required: "60.00".into(),
            available: "40.00".into(),
        };
        assert_eq!(err.to_string(), "Insufficient STAR balance: have 40.00, need 60.00");
    }
}
