//! Withdrawal Types

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

use super::state::WithdrawalStatus;
use crate::account::AccountId;
use crate::error::{LedgerError, LedgerResult};

pub type WithdrawalId = i64;

/// Payout rail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalMethod {
    BankTransfer,
    WireTransfer,
    Paypal,
    Crypto,
}

impl WithdrawalMethod {
    pub const ALL: [WithdrawalMethod; 4] = [
        WithdrawalMethod::BankTransfer,
        WithdrawalMethod::WireTransfer,
        WithdrawalMethod::Paypal,
        WithdrawalMethod::Crypto,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalMethod::BankTransfer => "bank_transfer",
            WithdrawalMethod::WireTransfer => "wire_transfer",
            WithdrawalMethod::Paypal => "paypal",
            WithdrawalMethod::Crypto => "crypto",
        }
    }
}

impl fmt::Display for WithdrawalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WithdrawalMethod {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bank_transfer" => Ok(WithdrawalMethod::BankTransfer),
            "wire_transfer" => Ok(WithdrawalMethod::WireTransfer),
            "paypal" => Ok(WithdrawalMethod::Paypal),
            "crypto" => Ok(WithdrawalMethod::Crypto),
            _ => Err(LedgerError::InvalidMethod(s.to_string())),
        }
    }
}

// ============================================================================
// Destinations (one shape per rail)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct BankDetails {
    #[validate(length(min = 1, max = 255))]
    pub bank_name: String,
    #[validate(length(min = 4, max = 50))]
    pub account_number: String,
    #[validate(length(min = 1, max = 50))]
    pub routing_number: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub account_holder_name: String,
    #[validate(length(min = 2, max = 56))]
    pub bank_country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct WireDetails {
    #[validate(length(min = 1, max = 255))]
    pub bank_name: String,
    #[validate(length(min = 4, max = 50))]
    pub account_number: String,
    #[validate(length(min = 8, max = 11))]
    pub swift_code: String,
    #[validate(length(min = 15, max = 34))]
    pub iban: Option<String>,
    #[validate(length(min = 2, max = 56))]
    pub bank_country: String,
    #[validate(length(min = 1, max = 255))]
    pub account_holder_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct PaypalDetails {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 255))]
    pub account_holder_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct CryptoDetails {
    #[validate(length(min = 20, max = 128))]
    pub address: String,
    #[validate(length(min = 1, max = 32))]
    pub network: String,
    #[validate(length(min = 1, max = 255))]
    pub account_holder_name: String,
}

/// Where a withdrawal is paid out; opaque to the ledger beyond validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Destination {
    BankTransfer(BankDetails),
    WireTransfer(WireDetails),
    Paypal(PaypalDetails),
    Crypto(CryptoDetails),
}

impl Destination {
    pub fn method(&self) -> WithdrawalMethod {
        match self {
            Destination::BankTransfer(_) => WithdrawalMethod::BankTransfer,
            Destination::WireTransfer(_) => WithdrawalMethod::WireTransfer,
            Destination::Paypal(_) => WithdrawalMethod::Paypal,
            Destination::Crypto(_) => WithdrawalMethod::Crypto,
        }
    }

    pub fn account_holder_name(&self) -> &str {
        match self {
            Destination::BankTransfer(d) => &d.account_holder_name,
            Destination::WireTransfer(d) => &d.account_holder_name,
            Destination::Paypal(d) => &d.account_holder_name,
            Destination::Crypto(d) => &d.account_holder_name,
        }
    }

    /// Boundary validation of the rail-specific fields
    pub fn validate(&self) -> LedgerResult<()> {
        let result = match self {
            Destination::BankTransfer(d) => d.validate(),
            Destination::WireTransfer(d) => {
                if !d.swift_code.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err(LedgerError::Validation(
                        "swift_code must be alphanumeric".into(),
                    ));
                }
                d.validate()
            }
            Destination::Paypal(d) => d.validate(),
            Destination::Crypto(d) => d.validate(),
        };
        result.map_err(|e| LedgerError::Validation(format!("destination: {}", e)))
    }
}

// ============================================================================
// Withdrawal record
// ============================================================================

/// Persisted withdrawal
///
/// Invariant: `net_amount = amount - fee - clearance_fee >= 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: WithdrawalId,
    pub account_id: AccountId,
    pub amount: Decimal,
    pub fee: Decimal,
    pub clearance_fee: Decimal,
    pub net_amount: Decimal,
    pub currency: String,
    pub destination: Destination,
    pub status: WithdrawalStatus,
    /// Shared with the shadow Transaction
    pub reference_id: String,
    pub admin_id: Option<i64>,
    pub admin_notes: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Withdrawal {
    #[inline]
    pub fn method(&self) -> WithdrawalMethod {
        self.destination.method()
    }

    #[inline]
    pub fn total_fees(&self) -> Decimal {
        self.fee + self.clearance_fee
    }

    /// Net amount for a fee split; rejects splits that exceed the gross amount
    pub fn net_for(&self, fee: Decimal, clearance_fee: Decimal) -> LedgerResult<Decimal> {
        net_amount(self.amount, fee, clearance_fee)
    }
}

/// `amount - fee - clearance_fee`, rejected when negative
pub fn net_amount(amount: Decimal, fee: Decimal, clearance_fee: Decimal) -> LedgerResult<Decimal> {
    let net = amount - fee - clearance_fee;
    if net < Decimal::ZERO {
        return Err(LedgerError::FeeConfiguration(format!(
            "fees {} + {} exceed withdrawal amount {}",
            fee, clearance_fee, amount
        )));
    }
    Ok(net)
}

/// Insert payload; the store assigns `id` and timestamps
#[derive(Debug, Clone)]
pub struct NewWithdrawal {
    pub account_id: AccountId,
    pub amount: Decimal,
    pub fee: Decimal,
    pub clearance_fee: Decimal,
    pub net_amount: Decimal,
    pub currency: String,
    pub destination: Destination,
    pub reference_id: String,
}

impl NewWithdrawal {
    pub(crate) fn into_withdrawal(self, id: WithdrawalId, now: DateTime<Utc>) -> Withdrawal {
        Withdrawal {
            id,
            account_id: self.account_id,
            amount: self.amount,
            fee: self.fee,
            clearance_fee: self.clearance_fee,
            net_amount: self.net_amount,
            currency: self.currency,
            destination: self.destination,
            status: WithdrawalStatus::Pending,
            reference_id: self.reference_id,
            admin_id: None,
            admin_notes: None,
            processed_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Operator edit; every field optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WithdrawalUpdate {
    pub status: Option<WithdrawalStatus>,
    pub fee: Option<Decimal>,
    pub clearance_fee: Option<Decimal>,
    pub admin_notes: Option<String>,
}

impl WithdrawalUpdate {
    pub fn status(status: WithdrawalStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn fees(fee: Decimal, clearance_fee: Decimal) -> Self {
        Self {
            fee: Some(fee),
            clearance_fee: Some(clearance_fee),
            ..Default::default()
        }
    }

    #[inline]
    pub fn touches_fees(&self) -> bool {
        self.fee.is_some() || self.clearance_fee.is_some()
    }
}

/// Query filter for back-office listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WithdrawalFilter {
    pub status: Option<WithdrawalStatus>,
    pub method: Option<WithdrawalMethod>,
    pub account_id: Option<AccountId>,
    pub limit: Option<usize>,
}

impl WithdrawalFilter {
    pub fn matches(&self, w: &Withdrawal) -> bool {
        self.status.is_none_or(|s| s == w.status)
            && self.method.is_none_or(|m| m == w.method())
            && self.account_id.is_none_or(|a| a == w.account_id)
    }
}

/// Aggregate counters for the operator dashboard
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalStats {
    pub total_withdrawals: u64,
    pub pending_withdrawals: u64,
    pub processing_withdrawals: u64,
    pub completed_withdrawals: u64,
    pub failed_withdrawals: u64,
    pub cancelled_withdrawals: u64,
    pub total_withdrawal_amount: Decimal,
    pub total_fees: Decimal,
    pub total_clearance_fees: Decimal,
    /// Requested on the current UTC day, any status
    pub today_withdrawals: u64,
    pub today_withdrawal_amount: Decimal,
}

impl WithdrawalStats {
    pub fn add(&mut self, w: &Withdrawal, today: NaiveDate) {
        self.total_withdrawals += 1;
        if w.created_at.date_naive() == today {
            self.today_withdrawals += 1;
            self.today_withdrawal_amount += w.amount;
        }
        match w.status {
            WithdrawalStatus::Pending => self.pending_withdrawals += 1,
            WithdrawalStatus::Processing => self.processing_withdrawals += 1,
            WithdrawalStatus::Completed => self.completed_withdrawals += 1,
            WithdrawalStatus::Failed => self.failed_withdrawals += 1,
            WithdrawalStatus::Cancelled => self.cancelled_withdrawals += 1,
        }
        self.total_withdrawal_amount += w.amount;
        self.total_fees += w.fee;
        self.total_clearance_fees += w.clearance_fee;
    }
}
