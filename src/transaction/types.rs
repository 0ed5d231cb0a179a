//! Transaction Types
//!
//! A Transaction mirrors one ledger movement. Once written, only `status`,
//! `completed_at` and (for withdrawal mirrors) the fee split may change.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::account::AccountId;

/// Transaction type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Payment,
    Request,
    AdminCredit,
    AdminDebit,
    /// Shadow record of a withdrawal reservation
    Withdrawal,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Payment => "payment",
            TransactionType::Request => "request",
            TransactionType::AdminCredit => "admin_credit",
            TransactionType::AdminDebit => "admin_debit",
            TransactionType::Withdrawal => "withdrawal",
        }
    }

    /// Reference-id tag; every type gets its own so ids never collide across types
    pub fn reference_prefix(&self) -> &'static str {
        match self {
            TransactionType::Payment => "PP",
            TransactionType::Request => "PPR",
            TransactionType::AdminCredit | TransactionType::AdminDebit => "ADM",
            TransactionType::Withdrawal => "WD",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "payment" => Ok(TransactionType::Payment),
            "request" => Ok(TransactionType::Request),
            "admin_credit" => Ok(TransactionType::AdminCredit),
            "admin_debit" => Ok(TransactionType::AdminDebit),
            "withdrawal" => Ok(TransactionType::Withdrawal),
            _ => Err(format!("Invalid transaction type: {}", s)),
        }
    }
}

/// Transaction status
///
/// Forward only: `pending` may move to any terminal state; terminal states never move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    /// Strict transition check (same-status is handled by callers as a no-op)
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        matches!(self, TransactionStatus::Pending) && next.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            "cancelled" => Ok(TransactionStatus::Cancelled),
            _ => Err(format!("Invalid transaction status: {}", s)),
        }
    }
}

/// Persisted transaction
///
/// Invariant: `amount == fee + net_amount`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub reference_id: String,
    /// None for system-origin credits
    pub sender_id: Option<AccountId>,
    /// None for system debits and withdrawals leaving the platform
    pub receiver_id: Option<AccountId>,
    pub amount: Decimal,
    pub fee: Decimal,
    pub net_amount: Decimal,
    pub currency: String,
    #[serde(rename = "type")]
    pub txn_type: TransactionType,
    pub status: TransactionStatus,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Everything the recorder needs except the reference id and timestamps
#[derive(Debug, Clone)]
pub struct TransactionDraft {
    pub sender_id: Option<AccountId>,
    pub receiver_id: Option<AccountId>,
    pub amount: Decimal,
    pub fee: Decimal,
    pub currency: String,
    pub txn_type: TransactionType,
    pub status: TransactionStatus,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl TransactionDraft {
    /// Net amount derived from the gross/fee split
    #[inline]
    pub fn net_amount(&self) -> Decimal {
        self.amount - self.fee
    }

    pub(crate) fn into_transaction(self, reference_id: String) -> Transaction {
        let now = Utc::now();
        let net_amount = self.net_amount();
        Transaction {
            reference_id,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            amount: self.amount,
            fee: self.fee,
            net_amount,
            currency: self.currency,
            txn_type: self.txn_type,
            completed_at: (self.status == TransactionStatus::Completed).then_some(now),
            status: self.status,
            description: self.description,
            metadata: self.metadata,
            created_at: now,
        }
    }
}
