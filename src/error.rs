//! Ledger Error Types
//!
//! One error enum for every synchronous entry point. Validation variants are
//! surfaced to the caller untouched and never retried; store conflicts are
//! the only retryable class.

use thiserror::Error;

use crate::core_types::{Amount, BalanceId, BulkId, TransactionCode};
use crate::gateway::GatewayError;
use crate::store::StoreError;

/// Ledger error types
///
/// Error codes are stable: the transport layer forwards them to clients.
#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    // === Validation Errors ===
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Amount is below the minimum of {min}")]
    AmountTooSmall { min: Amount },

    #[error("Amount exceeds the maximum of {max}")]
    AmountTooLarge { max: Amount },

    #[error("Amount would cause overflow")]
    Overflow,

    #[error("Insufficient balance on {balance_id}: available {available}, requested {requested}")]
    InsufficientBalance {
        balance_id: BalanceId,
        available: Amount,
        requested: Amount,
    },

    #[error("Currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch { expected: String, actual: String },

    #[error("Source and destination balance cannot be the same")]
    SameBalance,

    #[error("Actor has no access to balance {0}")]
    BalanceAccessDenied(BalanceId),

    #[error("Actor is not verified")]
    UnverifiedActor,

    #[error("Invalid PIN")]
    InvalidPin,

    #[error("Fee exceeds the transaction amount")]
    FeeExceedsAmount,

    #[error("Batch has no items")]
    EmptyBatch,

    #[error("Invalid statement: {0}")]
    InvalidStatement(String),

    // === Lookup Errors ===
    #[error("Balance not found: {0}")]
    BalanceNotFound(BalanceId),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Bulk batch not found: {0}")]
    BulkNotFound(BulkId),

    // === State Errors ===
    #[error("Duplicate request: {0}")]
    DuplicateRequest(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Transaction {0} has already been compensated")]
    AlreadyCompensated(TransactionCode),

    // === System Errors ===
    #[error("Fee configuration error: {0}")]
    FeeConfiguration(String),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal system error: {0}")]
    SystemError(String),
}

impl LedgerError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidRequest(_) => "INVALID_REQUEST",
            LedgerError::InvalidAmount => "INVALID_AMOUNT",
            LedgerError::AmountTooSmall { .. } => "AMOUNT_TOO_SMALL",
            LedgerError::AmountTooLarge { .. } => "AMOUNT_TOO_LARGE",
            LedgerError::Overflow => "OVERFLOW",
            LedgerError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            LedgerError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            LedgerError::SameBalance => "SAME_BALANCE",
            LedgerError::BalanceAccessDenied(_) => "BALANCE_ACCESS_DENIED",
            LedgerError::UnverifiedActor => "UNVERIFIED_ACTOR",
            LedgerError::InvalidPin => "INVALID_PIN",
            LedgerError::FeeExceedsAmount => "FEE_EXCEEDS_AMOUNT",
            LedgerError::EmptyBatch => "EMPTY_BATCH",
            LedgerError::InvalidStatement(_) => "INVALID_STATEMENT",
            LedgerError::BalanceNotFound(_) => "BALANCE_NOT_FOUND",
            LedgerError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            LedgerError::BulkNotFound(_) => "BULK_NOT_FOUND",
            LedgerError::DuplicateRequest(_) => "DUPLICATE_REQUEST",
            LedgerError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            LedgerError::AlreadyCompensated(_) => "ALREADY_COMPENSATED",
            LedgerError::FeeConfiguration(_) => "FEE_CONFIGURATION",
            LedgerError::Gateway(_) => "GATEWAY_ERROR",
            LedgerError::Store(_) => "STORE_ERROR",
            LedgerError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            LedgerError::SystemError(_) => "SYSTEM_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            LedgerError::InvalidPin => 401,
            LedgerError::BalanceAccessDenied(_) | LedgerError::UnverifiedActor => 403,
            LedgerError::InvalidRequest(_)
            | LedgerError::InvalidAmount
            | LedgerError::AmountTooSmall { .. }
            | LedgerError::AmountTooLarge { .. }
            | LedgerError::Overflow
            | LedgerError::SameBalance
            | LedgerError::EmptyBatch
            | LedgerError::InvalidStatement(_)
            | LedgerError::DuplicateRequest(_) => 400,
            LedgerError::InsufficientBalance { .. }
            | LedgerError::CurrencyMismatch { .. }
            | LedgerError::FeeExceedsAmount => 422,
            LedgerError::BalanceNotFound(_)
            | LedgerError::TransactionNotFound(_)
            | LedgerError::BulkNotFound(_) => 404,
            LedgerError::InvalidStateTransition(_) | LedgerError::AlreadyCompensated(_) => 409,
            LedgerError::FeeConfiguration(_)
            | LedgerError::Gateway(_)
            | LedgerError::Store(_)
            | LedgerError::SystemError(_) => 500,
            LedgerError::ServiceUnavailable(_) => 503,
        }
    }

    /// True when the whole unit of work should be re-run from a fresh read.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Store(e) if e.is_conflict())
    }
}

impl From<validator::ValidationErrors> for LedgerError {
    fn from(e: validator::ValidationErrors) -> Self {
        LedgerError::InvalidRequest(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(LedgerError::SameBalance.code(), "SAME_BALANCE");
        assert_eq!(LedgerError::InvalidPin.code(), "INVALID_PIN");
        let err = LedgerError::InsufficientBalance {
            balance_id: BalanceId::new("a"),
            available: 1,
            requested: 2,
        };
        assert_eq!(err.code(), "INSUFFICIENT_BALANCE");
    }

    #[test]
    fn test_http_status() {
        assert_eq!(LedgerError::InvalidPin.http_status(), 401);
        assert_eq!(LedgerError::UnverifiedActor.http_status(), 403);
        assert_eq!(LedgerError::InvalidAmount.http_status(), 400);
        assert_eq!(
            LedgerError::TransactionNotFound("x".into()).http_status(),
            404
        );
        assert_eq!(LedgerError::SystemError("test".into()).http_status(), 500);
    }

    #[test]
    fn test_only_conflicts_are_retryable() {
        assert!(LedgerError::Store(StoreError::Conflict("v".into())).is_retryable());
        assert!(!LedgerError::Store(StoreError::Unavailable("down".into())).is_retryable());
        assert!(!LedgerError::InvalidAmount.is_retryable());
        let insufficient = LedgerError::InsufficientBalance {
            balance_id: BalanceId::new("a"),
            available: 0,
            requested: 1,
        };
        assert!(!insufficient.is_retryable());
    }
}
