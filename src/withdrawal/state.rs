//! Withdrawal lifecycle states
//!
//! ```text
//! PENDING ──process──▶ PROCESSING ──finalize──▶ COMPLETED
//!    │                     │
//!    ├──────finalize───────┼──────────────────▶ COMPLETED
//!    │                     │
//!    └──fail / cancel──────┴──────────────────▶ FAILED | CANCELLED  (reservation refunded)
//! ```
//!
//! Terminal: COMPLETED, FAILED, CANCELLED.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::transaction::TransactionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    /// Funds reserved, waiting for an operator
    Pending,
    /// Operator picked it up; funds still reserved
    Processing,
    /// Terminal: net amount left the platform
    Completed,
    /// Terminal: payout failed, reservation refunded
    Failed,
    /// Terminal: cancelled, reservation refunded
    Cancelled,
}

impl WithdrawalStatus {
    pub const ALL: [WithdrawalStatus; 5] = [
        WithdrawalStatus::Pending,
        WithdrawalStatus::Processing,
        WithdrawalStatus::Completed,
        WithdrawalStatus::Failed,
        WithdrawalStatus::Cancelled,
    ];

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WithdrawalStatus::Completed | WithdrawalStatus::Failed | WithdrawalStatus::Cancelled
        )
    }

    /// Entering this state hands the reserved amount back to the account
    #[inline]
    pub fn refunds_reservation(&self) -> bool {
        matches!(self, WithdrawalStatus::Failed | WithdrawalStatus::Cancelled)
    }

    /// Allowed moves between *different* states. Same-state updates are no-ops
    /// and never reach this check.
    pub fn can_transition_to(&self, next: WithdrawalStatus) -> bool {
        use WithdrawalStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Completed)
                | (Processing, Completed)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Processing, Failed)
                | (Processing, Cancelled)
        )
    }

    /// Status carried by the shadow Transaction
    pub fn mirror_status(&self) -> TransactionStatus {
        match self {
            WithdrawalStatus::Pending | WithdrawalStatus::Processing => TransactionStatus::Pending,
            WithdrawalStatus::Completed => TransactionStatus::Completed,
            WithdrawalStatus::Failed => TransactionStatus::Failed,
            WithdrawalStatus::Cancelled => TransactionStatus::Cancelled,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Processing => "processing",
            WithdrawalStatus::Completed => "completed",
            WithdrawalStatus::Failed => "failed",
            WithdrawalStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WithdrawalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(WithdrawalStatus::Pending),
            "processing" => Ok(WithdrawalStatus::Processing),
            "completed" => Ok(WithdrawalStatus::Completed),
            "failed" => Ok(WithdrawalStatus::Failed),
            "cancelled" => Ok(WithdrawalStatus::Cancelled),
            _ => Err(format!("Invalid withdrawal status: {}", s)),
        }
    }
}
