//! Peer payments and back-office balance adjustments
//!
//! Each mutating call is one unit of work: balance change(s) and the
//! transaction row commit together or not at all. Notifications go out
//! after the commit.

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::account::{AccountId, AccountLedger};
use crate::actor::Actor;
use crate::error::{LedgerError, LedgerResult, log_failure};
use crate::fee::FeeCalculator;
use crate::money::validate_amount;
use crate::notify::{Notifier, deliver};
use crate::settings::{FeeSchedule, SettingsStore};
use crate::store::LedgerStore;
use crate::transaction::{
    Transaction, TransactionDraft, TransactionRecorder, TransactionStatus, TransactionType,
};

pub const MAX_DESCRIPTION_LEN: usize = 500;

/// Committed transaction plus the balances it left behind
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentReceipt {
    pub transaction: Transaction,
    /// None when the movement has no sender account
    pub sender_balance: Option<Decimal>,
    pub receiver_balance: Option<Decimal>,
}

#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn LedgerStore>,
    settings: Arc<dyn SettingsStore>,
    ledger: AccountLedger,
    recorder: TransactionRecorder,
    notifier: Arc<dyn Notifier>,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        settings: Arc<dyn SettingsStore>,
        recorder: TransactionRecorder,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            ledger: AccountLedger::new(store.clone()),
            store,
            settings,
            recorder,
            notifier,
        }
    }

    /// Move `amount` from sender to receiver, charging the transfer fee to
    /// the receiver's side: sender loses `amount`, receiver gains the net.
    pub async fn send_payment(
        &self,
        actor: Actor,
        sender_id: AccountId,
        receiver_id: AccountId,
        amount: Decimal,
        description: Option<&str>,
    ) -> LedgerResult<PaymentReceipt> {
        let receipt = self
            .send_payment_inner(actor, sender_id, receiver_id, amount, description)
            .await
            .inspect_err(|e| {
                log_failure!(e, %actor, sender_id, receiver_id, %amount, "Payment failed")
            })?;

        let txn = &receipt.transaction;
        info!(
            %actor,
            reference_id = %txn.reference_id,
            sender_id,
            receiver_id,
            amount = %txn.amount,
            fee = %txn.fee,
            net_amount = %txn.net_amount,
            "Payment committed"
        );

        deliver("payment_sent", &txn.reference_id, self.notifier.payment_sent(txn)).await;
        deliver("payment_received", &txn.reference_id, self.notifier.payment_received(txn)).await;
        Ok(receipt)
    }

    async fn send_payment_inner(
        &self,
        actor: Actor,
        sender_id: AccountId,
        receiver_id: AccountId,
        amount: Decimal,
        description: Option<&str>,
    ) -> LedgerResult<PaymentReceipt> {
        actor.ensure_owner(sender_id)?;
        let amount = validate_amount(amount)?;
        let description = clean_text("description", description, MAX_DESCRIPTION_LEN)?;

        let schedule = FeeSchedule::load(self.settings.as_ref()).await?;
        let fees = FeeCalculator::new(&schedule);

        let mut tx = self.store.begin().await?;
        let outcome = self
            .ledger
            .transfer_in(tx.as_mut(), sender_id, receiver_id, amount, &fees)
            .await?;
        let transaction = self
            .recorder
            .record(
                tx.as_mut(),
                TransactionDraft {
                    sender_id: Some(sender_id),
                    receiver_id: Some(receiver_id),
                    amount,
                    fee: outcome.fee,
                    currency: outcome.sender.currency.clone(),
                    txn_type: TransactionType::Payment,
                    status: TransactionStatus::Completed,
                    description,
                    metadata: Some(actor.attribution()),
                },
            )
            .await?;
        tx.commit().await?;

        Ok(PaymentReceipt {
            transaction,
            sender_balance: Some(outcome.sender.balance()),
            receiver_balance: Some(outcome.receiver.balance()),
        })
    }

    /// Ask each payer for `amount`. Creates one pending `request` row per
    /// payer; no balance moves until a payer actually pays.
    pub async fn request_payment(
        &self,
        actor: Actor,
        requester_id: AccountId,
        payer_ids: &[AccountId],
        amount: Decimal,
        description: Option<&str>,
    ) -> LedgerResult<Vec<Transaction>> {
        actor.ensure_owner(requester_id)?;
        let amount = validate_amount(amount)?;
        let description = clean_text("description", description, MAX_DESCRIPTION_LEN)?;
        if payer_ids.is_empty() {
            return Err(LedgerError::Validation("at least one payer is required".into()));
        }
        if payer_ids.contains(&requester_id) {
            return Err(LedgerError::Validation("cannot request money from yourself".into()));
        }

        let mut tx = self.store.begin().await?;
        let mut ids = Vec::with_capacity(payer_ids.len() + 1);
        ids.push(requester_id);
        ids.extend_from_slice(payer_ids);
        let accounts = tx.lock_accounts(&ids).await?;
        let currency = accounts[0].currency.clone();

        let mut requests = Vec::with_capacity(payer_ids.len());
        for &payer_id in payer_ids {
            let txn = self
                .recorder
                .record(
                    tx.as_mut(),
                    TransactionDraft {
                        sender_id: Some(requester_id),
                        receiver_id: Some(payer_id),
                        amount,
                        fee: Decimal::ZERO,
                        currency: currency.clone(),
                        txn_type: TransactionType::Request,
                        status: TransactionStatus::Pending,
                        description: description.clone(),
                        metadata: Some(actor.attribution()),
                    },
                )
                .await?;
            requests.push(txn);
        }
        tx.commit().await?;

        info!(%actor, requester_id, payers = payer_ids.len(), %amount, "Payment requested");
        Ok(requests)
    }

    /// Operator credit from outside the ledger (deposit, correction)
    pub async fn admin_credit(
        &self,
        actor: Actor,
        account_id: AccountId,
        amount: Decimal,
        description: Option<&str>,
    ) -> LedgerResult<PaymentReceipt> {
        self.admin_adjust(actor, account_id, amount, description, TransactionType::AdminCredit)
            .await
    }

    /// Operator debit; a description is mandatory
    pub async fn admin_debit(
        &self,
        actor: Actor,
        account_id: AccountId,
        amount: Decimal,
        description: &str,
    ) -> LedgerResult<PaymentReceipt> {
        if description.trim().is_empty() {
            return Err(LedgerError::Validation(
                "a description is required for admin debits".into(),
            ));
        }
        self.admin_adjust(actor, account_id, amount, Some(description), TransactionType::AdminDebit)
            .await
    }

    async fn admin_adjust(
        &self,
        actor: Actor,
        account_id: AccountId,
        amount: Decimal,
        description: Option<&str>,
        txn_type: TransactionType,
    ) -> LedgerResult<PaymentReceipt> {
        actor.ensure_operator()?;
        let amount = validate_amount(amount)?;
        let description = clean_text("description", description, MAX_DESCRIPTION_LEN)?;

        let mut tx = self.store.begin().await?;
        let (account, sender_id, receiver_id) = if txn_type == TransactionType::AdminCredit {
            let account = self.ledger.credit_in(tx.as_mut(), account_id, amount).await?;
            (account, None, Some(account_id))
        } else {
            let account = self
                .ledger
                .debit_in(tx.as_mut(), account_id, amount)
                .await
                .inspect_err(|e| log_failure!(e, %actor, account_id, %amount, "Admin debit failed"))?;
            (account, Some(account_id), None)
        };

        let transaction = self
            .recorder
            .record(
                tx.as_mut(),
                TransactionDraft {
                    sender_id,
                    receiver_id,
                    amount,
                    fee: Decimal::ZERO,
                    currency: account.currency.clone(),
                    txn_type,
                    status: TransactionStatus::Completed,
                    description,
                    metadata: Some(actor.attribution()),
                },
            )
            .await?;
        tx.commit().await?;

        info!(
            %actor,
            account_id,
            reference_id = %transaction.reference_id,
            txn_type = %txn_type,
            %amount,
            balance = %account.balance(),
            "Admin balance adjustment committed"
        );

        let balance = Some(account.balance());
        Ok(PaymentReceipt {
            sender_balance: sender_id.and(balance),
            receiver_balance: receiver_id.and(balance),
            transaction,
        })
    }

    /// Operator status change on a peer transaction (pending requests).
    /// Withdrawal mirrors follow their withdrawal and are refused here.
    pub async fn update_transaction_status(
        &self,
        actor: Actor,
        reference_id: &str,
        status: TransactionStatus,
    ) -> LedgerResult<Transaction> {
        actor.ensure_operator()?;

        let mut tx = self.store.begin().await?;
        let current = tx
            .lock_transaction(reference_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {}", reference_id)))?;
        if current.txn_type == TransactionType::Withdrawal {
            return Err(LedgerError::Validation(format!(
                "{} mirrors a withdrawal; update the withdrawal instead",
                reference_id
            )));
        }

        let updated = self
            .recorder
            .mark_status(tx.as_mut(), reference_id, status)
            .await
            .inspect_err(|e| log_failure!(e, %actor, reference_id, "Transaction status update failed"))?;
        tx.commit().await?;

        if current.status != updated.status {
            info!(%actor, reference_id, from = %current.status, to = %updated.status, "Transaction status updated");
        }
        Ok(updated)
    }

    pub async fn get_transaction(&self, reference_id: &str) -> LedgerResult<Transaction> {
        self.recorder.find_by_reference_id(reference_id).await
    }

    pub async fn list_account_transactions(
        &self,
        account_id: AccountId,
        limit: usize,
    ) -> LedgerResult<Vec<Transaction>> {
        self.ledger.get_account(account_id).await?;
        self.store.list_account_transactions(account_id, limit).await
    }
}

/// Trim free text; blank becomes `None`, too long is a `Validation` error
pub(crate) fn clean_text(
    field: &str,
    value: Option<&str>,
    max_len: usize,
) -> LedgerResult<Option<String>> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    if value.chars().count() > max_len {
        return Err(LedgerError::Validation(format!(
            "{} exceeds {} characters",
            field, max_len
        )));
    }
    Ok(Some(value.to_string()))
}
