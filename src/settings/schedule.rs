//! Fee schedule snapshot
//!
//! Loaded from the settings store at the start of each operation so that
//! an operator's change applies to the next request without a restart.

use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use serde::Serialize;

use super::{SettingsStore, get_amount, get_flag, get_percentage, keys};
use crate::error::LedgerResult;
use crate::withdrawal::WithdrawalMethod;

/// Percentage + flat fee applied to a payout rail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MethodFee {
    /// Percent of the gross amount (2.90 = 2.9%)
    pub percentage: Decimal,
    pub fixed: Decimal,
}

/// Percentage + flat fee charged on peer payments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransferFeeRule {
    pub percentage: Decimal,
    pub fixed: Decimal,
}

impl Default for TransferFeeRule {
    fn default() -> Self {
        // 2.9% + 0.30
        Self {
            percentage: Decimal::new(290, 2),
            fixed: Decimal::new(30, 2),
        }
    }
}

/// Clearance fee: `clamp(amount * percentage / 100, minimum, maximum)`.
/// A bound of zero means "no bound".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ClearanceFeeRule {
    pub enabled: bool,
    pub percentage: Decimal,
    pub minimum: Decimal,
    pub maximum: Decimal,
    /// Pre-fill the clearance fee when the withdrawal is requested
    pub auto_apply: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeeSchedule {
    pub min_withdrawal: Decimal,
    pub transfer: TransferFeeRule,
    pub clearance: ClearanceFeeRule,
    methods: FxHashMap<WithdrawalMethod, MethodFee>,
}

impl FeeSchedule {
    pub fn new(
        min_withdrawal: Decimal,
        transfer: TransferFeeRule,
        clearance: ClearanceFeeRule,
    ) -> Self {
        Self {
            min_withdrawal,
            transfer,
            clearance,
            methods: FxHashMap::default(),
        }
    }

    pub fn with_method(mut self, method: WithdrawalMethod, fee: MethodFee) -> Self {
        self.methods.insert(method, fee);
        self
    }

    /// `None` when the rail is switched off or was never configured
    #[inline]
    pub fn method_fee(&self, method: WithdrawalMethod) -> Option<MethodFee> {
        self.methods.get(&method).copied()
    }

    /// Build the schedule from the settings store, applying defaults.
    /// Negative values and percentages above 100 are `FeeConfiguration`
    /// errors naming the key.
    ///
    /// - bank_transfer: base% + base fixed
    /// - wire_transfer: base% + base fixed + wire surcharge
    /// - paypal: paypal% + paypal fixed
    /// - crypto: crypto%
    pub async fn load(store: &dyn SettingsStore) -> LedgerResult<Self> {
        let base_pct = get_percentage(store, keys::BASE_FEE_PERCENTAGE).await?;
        let base_fixed = get_amount(store, keys::BASE_FEE_FIXED).await?;
        let wire_extra = get_amount(store, keys::WIRE_FEE_ADDITIONAL).await?;

        let candidates = [
            (
                WithdrawalMethod::BankTransfer,
                MethodFee {
                    percentage: base_pct,
                    fixed: base_fixed,
                },
            ),
            (
                WithdrawalMethod::WireTransfer,
                MethodFee {
                    percentage: base_pct,
                    fixed: base_fixed + wire_extra,
                },
            ),
            (
                WithdrawalMethod::Paypal,
                MethodFee {
                    percentage: get_percentage(store, keys::PAYPAL_FEE_PERCENTAGE).await?,
                    fixed: get_amount(store, keys::PAYPAL_FEE_FIXED).await?,
                },
            ),
            (
                WithdrawalMethod::Crypto,
                MethodFee {
                    percentage: get_percentage(store, keys::CRYPTO_FEE_PERCENTAGE).await?,
                    fixed: Decimal::ZERO,
                },
            ),
        ];

        let mut schedule = FeeSchedule::new(
            get_amount(store, keys::WITHDRAWAL_MIN_AMOUNT).await?,
            TransferFeeRule {
                percentage: get_percentage(store, keys::TRANSFER_FEE_PERCENTAGE).await?,
                fixed: get_amount(store, keys::TRANSFER_FEE_FIXED).await?,
            },
            ClearanceFeeRule {
                enabled: get_flag(store, keys::CLEARANCE_FEE_ENABLED, true).await?,
                percentage: get_percentage(store, keys::CLEARANCE_FEE_PERCENTAGE).await?,
                minimum: get_amount(store, keys::CLEARANCE_FEE_MINIMUM).await?,
                maximum: get_amount(store, keys::CLEARANCE_FEE_MAXIMUM).await?,
                auto_apply: get_flag(store, keys::AUTO_CLEARANCE_FEE, false).await?,
            },
        );

        for (method, fee) in candidates {
            if get_flag(store, &keys::method_enabled(method.as_str()), true).await? {
                schedule = schedule.with_method(method, fee);
            } else {
                tracing::debug!(method = %method, "Withdrawal method disabled by settings");
            }
        }

        Ok(schedule)
    }
}
