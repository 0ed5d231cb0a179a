//! Ledger Error Types
//!
//! Every mutating operation returns either the committed entity or one of
//! these errors. A failed call never leaves a partially applied mutation.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::money::MoneyError;

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger error kinds
///
/// Codes are stable and safe to surface to API clients.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    // === Input Errors (raised before any mutation) ===
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Withdrawal amount {amount} is below the minimum of {minimum}")]
    BelowMinimum { amount: Decimal, minimum: Decimal },

    #[error("Withdrawal method not available: {0}")]
    InvalidMethod(String),

    // === Ledger Errors ===
    #[error("Insufficient funds in account {account_id}: required {required}, available {available}")]
    InsufficientFunds {
        account_id: i64,
        required: Decimal,
        available: Decimal,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Fee configuration error: {0}")]
    FeeConfiguration(String),

    // === System Errors ===
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Ledger store unavailable: {0}")]
    Unavailable(String),
}

impl LedgerError {
    pub fn transition(from: impl ToString, to: impl ToString) -> Self {
        LedgerError::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Stable error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Validation(_) => "VALIDATION_ERROR",
            LedgerError::BelowMinimum { .. } => "BELOW_MINIMUM",
            LedgerError::InvalidMethod(_) => "INVALID_METHOD",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::NotFound(_) => "NOT_FOUND",
            LedgerError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            LedgerError::FeeConfiguration(_) => "FEE_CONFIGURATION_ERROR",
            LedgerError::Conflict(_) => "CONFLICT",
            LedgerError::Unavailable(_) => "UNAVAILABLE",
        }
    }

    /// HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            LedgerError::Validation(_)
            | LedgerError::BelowMinimum { .. }
            | LedgerError::InvalidMethod(_) => 400,
            LedgerError::NotFound(_) => 404,
            LedgerError::Conflict(_) | LedgerError::InvalidStateTransition { .. } => 409,
            LedgerError::InsufficientFunds { .. } | LedgerError::FeeConfiguration(_) => 422,
            LedgerError::Unavailable(_) => 503,
        }
    }

    /// Only store contention/timeouts are worth retrying with the same input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_))
    }
}

/// Log a failed ledger call. Storage failures go out at `error!`, rejected
/// requests at `warn!`; both carry the error code.
macro_rules! log_failure {
    ($err:expr, $($field:tt)+) => {{
        let err: &$crate::error::LedgerError = $err;
        if err.is_retryable() {
            tracing::error!(code = err.code(), error = %err, $($field)+)
        } else {
            tracing::warn!(code = err.code(), error = %err, $($field)+)
        }
    }};
}
pub(crate) use log_failure;

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::Unavailable(e.to_string())
    }
}

impl From<MoneyError> for LedgerError {
    fn from(e: MoneyError) -> Self {
        LedgerError::Validation(e.to_string())
    }
}
