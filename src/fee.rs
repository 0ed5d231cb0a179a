//! Fee calculation
//!
//! Pure functions of `(amount, method, schedule)`: no clock, no balances,
//! no I/O. Every result is rounded to cents half away from zero.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::{LedgerError, LedgerResult};
use crate::money::{percent_of, round_money};
use crate::settings::{ClearanceFeeRule, FeeSchedule};
use crate::withdrawal::WithdrawalMethod;

/// Gross / fee / net split of a peer payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransferSplit {
    pub fee: Decimal,
    pub net_amount: Decimal,
}

/// Withdrawal fee quote, as shown to operators before finalizing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeeBreakdown {
    pub amount: Decimal,
    pub method: WithdrawalMethod,
    pub fee: Decimal,
    pub clearance_fee: Decimal,
    pub total_fees: Decimal,
    pub net_amount: Decimal,
    pub clearance_percentage: Decimal,
    pub clearance_minimum: Decimal,
    pub clearance_maximum: Decimal,
}

pub struct FeeCalculator<'a> {
    schedule: &'a FeeSchedule,
}

impl<'a> FeeCalculator<'a> {
    pub fn new(schedule: &'a FeeSchedule) -> Self {
        Self { schedule }
    }

    /// Peer payment fee: `amount * pct / 100 + fixed`
    ///
    /// # Example
    /// ```
    /// use payledger::fee::FeeCalculator;
    /// use payledger::settings::{ClearanceFeeRule, FeeSchedule, TransferFeeRule};
    /// use rust_decimal::Decimal;
    ///
    /// let schedule = FeeSchedule::new(Decimal::TEN, TransferFeeRule::default(), ClearanceFeeRule::default());
    /// let fee = FeeCalculator::new(&schedule).transfer_fee(Decimal::new(3000, 2));
    /// assert_eq!(fee, Decimal::new(117, 2));
    /// ```
    pub fn transfer_fee(&self, amount: Decimal) -> Decimal {
        let rule = &self.schedule.transfer;
        round_money(percent_of(amount, rule.percentage) + rule.fixed)
    }

    /// Fee plus the amount the receiver actually gets.
    ///
    /// # Errors
    /// `FeeConfiguration` when the fee is negative or would swallow the
    /// whole payment.
    pub fn transfer_split(&self, amount: Decimal) -> LedgerResult<TransferSplit> {
        let fee = non_negative("transfer fee", self.transfer_fee(amount))?;
        let net_amount = amount - fee;
        if net_amount <= Decimal::ZERO {
            return Err(LedgerError::FeeConfiguration(format!(
                "transfer fee {} leaves nothing of {} for the receiver",
                fee, amount
            )));
        }
        Ok(TransferSplit { fee, net_amount })
    }

    /// Method fee for a payout rail
    ///
    /// # Errors
    /// `InvalidMethod` when the rail is not in the schedule.
    pub fn method_fee(&self, amount: Decimal, method: WithdrawalMethod) -> LedgerResult<Decimal> {
        let rule = self
            .schedule
            .method_fee(method)
            .ok_or_else(|| LedgerError::InvalidMethod(method.to_string()))?;
        non_negative(
            "withdrawal fee",
            round_money(percent_of(amount, rule.percentage) + rule.fixed),
        )
    }

    /// Clearance fee with bounds applied only when they are > 0
    pub fn clearance_fee(&self, amount: Decimal) -> LedgerResult<Decimal> {
        clamp_clearance(amount, &self.schedule.clearance)
    }

    /// `(fee, clearance_fee)` for a withdrawal
    pub fn withdrawal_fee(
        &self,
        amount: Decimal,
        method: WithdrawalMethod,
    ) -> LedgerResult<(Decimal, Decimal)> {
        Ok((self.method_fee(amount, method)?, self.clearance_fee(amount)?))
    }

    /// Full quote. `net_amount` may come out negative for tiny amounts; the
    /// quote reports it as is and the withdrawal engine rejects it.
    pub fn breakdown(&self, amount: Decimal, method: WithdrawalMethod) -> LedgerResult<FeeBreakdown> {
        let (fee, clearance_fee) = self.withdrawal_fee(amount, method)?;
        let clearance = &self.schedule.clearance;
        Ok(FeeBreakdown {
            amount,
            method,
            fee,
            clearance_fee,
            total_fees: fee + clearance_fee,
            net_amount: amount - fee - clearance_fee,
            clearance_percentage: clearance.percentage,
            clearance_minimum: clearance.minimum,
            clearance_maximum: clearance.maximum,
        })
    }
}

fn non_negative(what: &str, fee: Decimal) -> LedgerResult<Decimal> {
    if fee < Decimal::ZERO {
        return Err(LedgerError::FeeConfiguration(format!(
            "{} comes out negative: {}",
            what, fee
        )));
    }
    Ok(fee)
}

fn clamp_clearance(amount: Decimal, rule: &ClearanceFeeRule) -> LedgerResult<Decimal> {
    if !rule.enabled {
        return Ok(round_money(Decimal::ZERO));
    }

    let mut fee = percent_of(amount, rule.percentage);
    if rule.minimum > Decimal::ZERO && fee < rule.minimum {
        fee = rule.minimum;
    }
    if rule.maximum > Decimal::ZERO && fee > rule.maximum {
        fee = rule.maximum;
    }
    non_negative("clearance fee", round_money(fee))
}
