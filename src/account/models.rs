//! Account model
//!
//! The balance field is private: the only way to move it is through
//! [`Account::deposit`] / [`Account::withdraw`], which the ledger calls while
//! holding the account's row lock.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

pub type AccountId = i64;

/// Customer account holding a single-currency balance
///
/// # Invariants
/// - `balance >= 0` in every committed state
/// - `currency` is an upper-case ISO 4217 code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: AccountId,
    pub currency: String,
    balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Rebuild an account from storage
    pub(crate) fn restore(
        account_id: AccountId,
        currency: String,
        balance: Decimal,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            account_id,
            currency,
            balance,
            created_at,
            updated_at,
        }
    }

    #[inline]
    pub fn balance(&self) -> Decimal {
        self.balance
    }

    /// Add funds. Amount must already be validated as positive.
    pub(crate) fn deposit(&mut self, amount: Decimal) -> LedgerResult<()> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::Validation(
                "credit amount must be positive".into(),
            ));
        }
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Validation("balance overflow".into()))?;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Remove funds, never going below zero.
    pub(crate) fn withdraw(&mut self, amount: Decimal) -> LedgerResult<()> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::Validation(
                "debit amount must be positive".into(),
            ));
        }
        if self.balance < amount {
            return Err(LedgerError::InsufficientFunds {
                account_id: self.account_id,
                required: amount,
                available: self.balance,
            });
        }
        self.balance -= amount;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Validate an ISO 4217 style currency code
pub fn validate_currency(code: &str) -> LedgerResult<String> {
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(code.to_ascii_uppercase())
    } else {
        Err(LedgerError::Validation(format!(
            "invalid currency code: {}",
            code
        )))
    }
}
