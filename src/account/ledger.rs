//! Account Ledger
//!
//! Three primitives: credit, debit, transfer. Each comes in two shapes:
//! - `*_in` runs inside a caller-owned [`StoreTx`] so other writes (a
//!   transaction row, a withdrawal) commit together with the balance change
//! - the plain form opens its own unit of work and commits it
//!
//! Balance reads happen under the account's row lock, in the same unit of
//! work as the write that depends on them.

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use super::models::{Account, AccountId, validate_currency};
use crate::error::{LedgerError, LedgerResult};
use crate::fee::FeeCalculator;
use crate::money::validate_amount;
use crate::store::{LedgerStore, StoreTx};

/// Result of a committed transfer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferOutcome {
    pub fee: Decimal,
    pub net_amount: Decimal,
    pub sender: Account,
    pub receiver: Account,
}

/// Currency of accounts opened without an explicit one
pub const DEFAULT_CURRENCY: &str = "USD";

#[derive(Clone)]
pub struct AccountLedger {
    store: Arc<dyn LedgerStore>,
    default_currency: String,
}

impl AccountLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            default_currency: DEFAULT_CURRENCY.to_string(),
        }
    }

    pub fn with_default_currency(mut self, currency: impl Into<String>) -> Self {
        self.default_currency = currency.into();
        self
    }

    pub fn default_currency(&self) -> &str {
        &self.default_currency
    }

    /// Open an empty account in the configured default currency
    pub async fn open_default_account(&self) -> LedgerResult<Account> {
        self.open_account(&self.default_currency).await
    }

    pub async fn open_account(&self, currency: &str) -> LedgerResult<Account> {
        let currency = validate_currency(currency)?;
        let account = self.store.create_account(&currency, Decimal::ZERO).await?;
        info!(account_id = account.account_id, currency = %account.currency, "Account opened");
        Ok(account)
    }

    pub async fn get_account(&self, account_id: AccountId) -> LedgerResult<Account> {
        self.store
            .get_account(account_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("account {}", account_id)))
    }

    // ------------------------------------------------------------------------
    // Inside a caller's unit of work
    // ------------------------------------------------------------------------

    pub async fn credit_in(
        &self,
        tx: &mut dyn StoreTx,
        account_id: AccountId,
        amount: Decimal,
    ) -> LedgerResult<Account> {
        let amount = validate_amount(amount)?;
        let mut account = lock_one(tx, account_id).await?;
        account.deposit(amount)?;
        tx.put_account(&account).await?;
        debug!(account_id, %amount, balance = %account.balance(), "Credit staged");
        Ok(account)
    }

    pub async fn debit_in(
        &self,
        tx: &mut dyn StoreTx,
        account_id: AccountId,
        amount: Decimal,
    ) -> LedgerResult<Account> {
        let amount = validate_amount(amount)?;
        let mut account = lock_one(tx, account_id).await?;
        account.withdraw(amount)?;
        tx.put_account(&account).await?;
        debug!(account_id, %amount, balance = %account.balance(), "Debit staged");
        Ok(account)
    }

    /// Debit `amount` from the sender and credit the net to the receiver.
    /// Both rows are locked in one call, lowest id first.
    pub async fn transfer_in(
        &self,
        tx: &mut dyn StoreTx,
        sender_id: AccountId,
        receiver_id: AccountId,
        amount: Decimal,
        fees: &FeeCalculator<'_>,
    ) -> LedgerResult<TransferOutcome> {
        if sender_id == receiver_id {
            return Err(LedgerError::Validation(
                "cannot transfer to the same account".into(),
            ));
        }
        let amount = validate_amount(amount)?;
        let split = fees.transfer_split(amount)?;

        let mut locked = tx.lock_accounts(&[sender_id, receiver_id]).await?;
        let (Some(mut receiver), Some(mut sender)) = (locked.pop(), locked.pop()) else {
            return Err(LedgerError::Unavailable(
                "store returned fewer accounts than locked".into(),
            ));
        };

        if sender.currency != receiver.currency {
            return Err(LedgerError::Validation(format!(
                "currency mismatch: {} -> {}",
                sender.currency, receiver.currency
            )));
        }

        sender.withdraw(amount)?;
        receiver.deposit(split.net_amount)?;
        tx.put_account(&sender).await?;
        tx.put_account(&receiver).await?;

        Ok(TransferOutcome {
            fee: split.fee,
            net_amount: split.net_amount,
            sender,
            receiver,
        })
    }

    // ------------------------------------------------------------------------
    // Self-committing
    // ------------------------------------------------------------------------

    pub async fn credit(&self, account_id: AccountId, amount: Decimal) -> LedgerResult<Account> {
        let mut tx = self.store.begin().await?;
        let account = self.credit_in(tx.as_mut(), account_id, amount).await?;
        tx.commit().await?;
        info!(account_id, %amount, balance = %account.balance(), "Account credited");
        Ok(account)
    }

    pub async fn debit(&self, account_id: AccountId, amount: Decimal) -> LedgerResult<Account> {
        let mut tx = self.store.begin().await?;
        let account = self.debit_in(tx.as_mut(), account_id, amount).await?;
        tx.commit().await?;
        info!(account_id, %amount, balance = %account.balance(), "Account debited");
        Ok(account)
    }

    pub async fn transfer(
        &self,
        sender_id: AccountId,
        receiver_id: AccountId,
        amount: Decimal,
        fees: &FeeCalculator<'_>,
    ) -> LedgerResult<TransferOutcome> {
        let mut tx = self.store.begin().await?;
        let outcome = self
            .transfer_in(tx.as_mut(), sender_id, receiver_id, amount, fees)
            .await?;
        tx.commit().await?;
        info!(
            sender_id,
            receiver_id,
            %amount,
            fee = %outcome.fee,
            net_amount = %outcome.net_amount,
            "Transfer committed"
        );
        Ok(outcome)
    }
}

async fn lock_one(tx: &mut dyn StoreTx, account_id: AccountId) -> LedgerResult<Account> {
    tx.lock_accounts(&[account_id])
        .await?
        .pop()
        .ok_or_else(|| LedgerError::NotFound(format!("account {}", account_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{ClearanceFeeRule, FeeSchedule, TransferFeeRule};
    use crate::store::MemoryStore;

    async fn funded(store: &Arc<MemoryStore>, ledger: &AccountLedger, balance: i64) -> Account {
        let acc = store.create_account("USD", Decimal::ZERO).await.unwrap();
        if balance > 0 {
            ledger.credit(acc.account_id, Decimal::from(balance)).await.unwrap();
        }
        ledger.get_account(acc.account_id).await.unwrap()
    }

    fn setup() -> (Arc<MemoryStore>, AccountLedger) {
        let store = Arc::new(MemoryStore::default());
        (store.clone(), AccountLedger::new(store))
    }

    fn schedule() -> FeeSchedule {
        FeeSchedule::new(
            Decimal::TEN,
            TransferFeeRule::default(),
            ClearanceFeeRule::default(),
        )
    }

    #[tokio::test]
    async fn test_open_default_account_uses_configured_currency() {
        let (_, ledger) = setup();
        assert_eq!(ledger.open_default_account().await.unwrap().currency, "USD");

        let eur = ledger.clone().with_default_currency("eur");
        let acc = eur.open_default_account().await.unwrap();
        assert_eq!(acc.currency, "EUR");
        assert_eq!(acc.balance(), Decimal::ZERO);

        let broken = ledger.with_default_currency("EURO");
        assert_eq!(broken.open_default_account().await.unwrap_err().code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_credit_and_debit() {
        let (store, ledger) = setup();
        let acc = funded(&store, &ledger, 100).await;
        let after = ledger.debit(acc.account_id, Decimal::new(2550, 2)).await.unwrap();
        assert_eq!(after.balance(), Decimal::new(7450, 2));
    }

    #[tokio::test]
    async fn test_debit_insufficient_leaves_balance() {
        let (store, ledger) = setup();
        let acc = funded(&store, &ledger, 10).await;
        let err = ledger.debit(acc.account_id, Decimal::from(50)).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(
            ledger.get_account(acc.account_id).await.unwrap().balance(),
            Decimal::from(10)
        );
    }

    #[tokio::test]
    async fn test_transfer_conserves_money() {
        let (store, ledger) = setup();
        let sender = funded(&store, &ledger, 100).await;
        let receiver = funded(&store, &ledger, 5).await;
        let schedule = schedule();

        let out = ledger
            .transfer(
                sender.account_id,
                receiver.account_id,
                Decimal::new(3000, 2),
                &FeeCalculator::new(&schedule),
            )
            .await
            .unwrap();

        assert_eq!(out.fee + out.net_amount, Decimal::from(30));
        assert_eq!(out.sender.balance(), Decimal::from(70));
        assert_eq!(out.receiver.balance(), Decimal::new(3383, 2));
    }

    #[tokio::test]
    async fn test_transfer_to_self_rejected() {
        let (store, ledger) = setup();
        let acc = funded(&store, &ledger, 100).await;
        let schedule = schedule();
        let err = ledger
            .transfer(acc.account_id, acc.account_id, Decimal::ONE, &FeeCalculator::new(&schedule))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_transfer_currency_mismatch_rejected() {
        let (store, ledger) = setup();
        let usd = funded(&store, &ledger, 100).await;
        let eur = store.create_account("EUR", Decimal::ZERO).await.unwrap();
        let schedule = schedule();
        let err = ledger
            .transfer(usd.account_id, eur.account_id, Decimal::TEN, &FeeCalculator::new(&schedule))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert_eq!(store.total_balance().unwrap(), Decimal::from(100));
    }

    #[tokio::test]
    async fn test_rejects_sub_cent_amount() {
        let (store, ledger) = setup();
        let acc = funded(&store, &ledger, 1).await;
        assert!(ledger.credit(acc.account_id, Decimal::new(1, 3)).await.is_err());
    }

    #[tokio::test]
    async fn test_open_account_normalizes_currency() {
        let (_store, ledger) = setup();
        let acc = ledger.open_account("eur").await.unwrap();
        assert_eq!(acc.currency, "EUR");
        assert!(acc.balance().is_zero());
        assert!(ledger.open_account("euro").await.is_err());
    }
}
