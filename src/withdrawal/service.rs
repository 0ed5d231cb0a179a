//! Withdrawal Service
//!
//! Every mutation locks the withdrawal row first, then its mirror
//! transaction, then the account, and commits all three together.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use super::state::WithdrawalStatus;
use super::types::{
    Destination, NewWithdrawal, Withdrawal, WithdrawalFilter, WithdrawalId, WithdrawalMethod,
    WithdrawalStats, WithdrawalUpdate, net_amount,
};
use crate::account::{AccountId, AccountLedger};
use crate::actor::Actor;
use crate::error::{LedgerError, LedgerResult, log_failure};
use crate::fee::{FeeBreakdown, FeeCalculator};
use crate::money::{validate_amount, validate_fee};
use crate::notify::{Notifier, deliver};
use crate::payment::clean_text;
use crate::settings::{FeeSchedule, SettingsStore};
use crate::store::{LedgerStore, StoreTx};
use crate::transaction::{TransactionDraft, TransactionRecorder, TransactionStatus, TransactionType};

pub const MAX_ADMIN_NOTES_LEN: usize = 1000;

#[derive(Clone)]
pub struct WithdrawalService {
    store: Arc<dyn LedgerStore>,
    settings: Arc<dyn SettingsStore>,
    ledger: AccountLedger,
    recorder: TransactionRecorder,
    notifier: Arc<dyn Notifier>,
}

impl WithdrawalService {
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

    /// Reserve `amount` and open a pending withdrawal with its mirror
    /// transaction. The method fee is pre-filled; the clearance fee only when
    /// auto-apply is switched on.
    pub async fn request_withdrawal(
        &self,
        actor: Actor,
        account_id: AccountId,
        amount: Decimal,
        destination: Destination,
    ) -> LedgerResult<Withdrawal> {
        let withdrawal = self
            .request_inner(actor, account_id, amount, destination)
            .await
            .inspect_err(|e| {
                log_failure!(e, %actor, account_id, %amount, "Withdrawal request failed")
            })?;

        info!(
            %actor,
            withdrawal_id = withdrawal.id,
            account_id,
            reference_id = %withdrawal.reference_id,
            method = %withdrawal.method(),
            amount = %withdrawal.amount,
            "Withdrawal requested, funds reserved"
        );
        Ok(withdrawal)
    }

    async fn request_inner(
        &self,
        actor: Actor,
        account_id: AccountId,
        amount: Decimal,
        destination: Destination,
    ) -> LedgerResult<Withdrawal> {
        actor.ensure_owner(account_id)?;
        let amount = validate_amount(amount)?;
        destination.validate()?;
        let method = destination.method();

        let schedule = FeeSchedule::load(self.settings.as_ref()).await?;
        if amount < schedule.min_withdrawal {
            return Err(LedgerError::BelowMinimum {
                amount,
                minimum: schedule.min_withdrawal,
            });
        }
        let fees = FeeCalculator::new(&schedule);
        let fee = fees.method_fee(amount, method)?;
        let clearance_fee = if schedule.clearance.auto_apply {
            fees.clearance_fee(amount)?
        } else {
            Decimal::ZERO
        };
        let net = net_amount(amount, fee, clearance_fee)?;

        let mut tx = self.store.begin().await?;
        let account = self.ledger.debit_in(tx.as_mut(), account_id, amount).await?;

        let mut metadata = actor.attribution();
        metadata["method"] = serde_json::Value::from(method.as_str());
        let mirror = self
            .recorder
            .record(
                tx.as_mut(),
                TransactionDraft {
                    sender_id: Some(account_id),
                    receiver_id: None,
                    amount,
                    fee: fee + clearance_fee,
                    currency: account.currency.clone(),
                    txn_type: TransactionType::Withdrawal,
                    status: TransactionStatus::Pending,
                    description: Some(format!("Withdrawal via {}", method)),
                    metadata: Some(metadata),
                },
            )
            .await?;

        let withdrawal = tx
            .insert_withdrawal(NewWithdrawal {
                account_id,
                amount,
                fee,
                clearance_fee,
                net_amount: net,
                currency: account.currency,
                destination,
                reference_id: mirror.reference_id,
            })
            .await?;
        tx.commit().await?;
        Ok(withdrawal)
    }

    /// General operator edit: optional status, fee split and notes.
    ///
    /// - same status as now: status untouched, no refund
    /// - fees are only editable before a terminal state
    /// - entering failed/cancelled refunds the full `amount`
    pub async fn update_withdrawal(
        &self,
        actor: Actor,
        id: WithdrawalId,
        update: WithdrawalUpdate,
    ) -> LedgerResult<Withdrawal> {
        let (withdrawal, previous) = self
            .update_inner(actor, id, &update)
            .await
            .inspect_err(|e| {
                log_failure!(e, %actor, withdrawal_id = id, "Withdrawal update failed")
            })?;

        let status_changed = withdrawal.status != previous.status;
        let fees_changed = withdrawal.fee != previous.fee
            || withdrawal.clearance_fee != previous.clearance_fee;

        if status_changed {
            info!(
                %actor,
                withdrawal_id = id,
                account_id = withdrawal.account_id,
                reference_id = %withdrawal.reference_id,
                from = %previous.status,
                to = %withdrawal.status,
                refunded = withdrawal.status.refunds_reservation(),
                "Withdrawal status updated"
            );
            deliver(
                "withdrawal_status_changed",
                &withdrawal.reference_id,
                self.notifier
                    .withdrawal_status_changed(&withdrawal, previous.status),
            )
            .await;
        }
        if fees_changed {
            info!(
                %actor,
                withdrawal_id = id,
                fee = %withdrawal.fee,
                clearance_fee = %withdrawal.clearance_fee,
                net_amount = %withdrawal.net_amount,
                "Withdrawal fees updated"
            );
            deliver(
                "withdrawal_fees_updated",
                &withdrawal.reference_id,
                self.notifier.withdrawal_fees_updated(&withdrawal),
            )
            .await;
        }
        Ok(withdrawal)
    }

    pub async fn update_withdrawal_status(
        &self,
        actor: Actor,
        id: WithdrawalId,
        status: WithdrawalStatus,
    ) -> LedgerResult<Withdrawal> {
        self.update_withdrawal(actor, id, WithdrawalUpdate::status(status))
            .await
    }

    /// Change the fee split without touching status
    pub async fn update_withdrawal_fees(
        &self,
        actor: Actor,
        id: WithdrawalId,
        fee: Decimal,
        clearance_fee: Decimal,
    ) -> LedgerResult<Withdrawal> {
        self.update_withdrawal(actor, id, WithdrawalUpdate::fees(fee, clearance_fee))
            .await
    }

    /// Returns `(updated, before)`
    async fn update_inner(
        &self,
        actor: Actor,
        id: WithdrawalId,
        update: &WithdrawalUpdate,
    ) -> LedgerResult<(Withdrawal, Withdrawal)> {
        actor.ensure_operator()?;
        let fee = update.fee.map(validate_fee).transpose()?;
        let clearance_fee = update.clearance_fee.map(validate_fee).transpose()?;
        let notes = clean_text("admin_notes", update.admin_notes.as_deref(), MAX_ADMIN_NOTES_LEN)?;

        let mut tx = self.store.begin().await?;
        let before = lock_withdrawal(tx.as_mut(), id).await?;
        let mut w = before.clone();
        let now = Utc::now();

        if update.touches_fees() {
            if w.status.is_terminal() {
                return Err(LedgerError::transition(w.status, "fee update"));
            }
            w.fee = fee.unwrap_or(w.fee);
            w.clearance_fee = clearance_fee.unwrap_or(w.clearance_fee);
            w.net_amount = w.net_for(w.fee, w.clearance_fee)?;
            self.sync_mirror_fees(tx.as_mut(), &w).await?;
        }

        if let Some(next) = update.status.filter(|s| *s != w.status) {
            if !w.status.can_transition_to(next) {
                return Err(LedgerError::transition(w.status, next));
            }
            match next {
                WithdrawalStatus::Processing => w.processed_at = Some(now),
                WithdrawalStatus::Completed => w.completed_at = Some(now),
                _ => {}
            }
            w.status = next;
            if let Some(admin_id) = actor.admin_id() {
                w.admin_id = Some(admin_id);
            }

            let synced = self
                .recorder
                .sync_status(tx.as_mut(), &w.reference_id, next.mirror_status())
                .await?;
            if synced.is_none() {
                warn!(withdrawal_id = id, reference_id = %w.reference_id, "Mirror transaction missing, status not synced");
            }

            if next.refunds_reservation() {
                self.ledger.credit_in(tx.as_mut(), w.account_id, w.amount).await?;
            }
        }

        if notes.is_some() {
            w.admin_notes = notes;
        }
        w.updated_at = now;
        tx.put_withdrawal(&w).await?;
        tx.commit().await?;
        Ok((w, before))
    }

    async fn sync_mirror_fees(&self, tx: &mut dyn StoreTx, w: &Withdrawal) -> LedgerResult<()> {
        let synced = self
            .recorder
            .sync_fees(tx, &w.reference_id, w.total_fees(), w.net_amount)
            .await?;
        if synced.is_none() {
            warn!(withdrawal_id = w.id, reference_id = %w.reference_id, "Mirror transaction missing, fees not synced");
        }
        Ok(())
    }

    /// Remove a pending withdrawal: refund the reservation, drop the mirror
    /// transaction, then the withdrawal itself
    pub async fn delete_withdrawal(&self, actor: Actor, id: WithdrawalId) -> LedgerResult<()> {
        let w = self
            .delete_inner(actor, id)
            .await
            .inspect_err(|e| {
                log_failure!(e, %actor, withdrawal_id = id, "Withdrawal delete failed")
            })?;

        info!(
            %actor,
            withdrawal_id = id,
            account_id = w.account_id,
            reference_id = %w.reference_id,
            refunded = %w.amount,
            "Withdrawal deleted, reservation refunded"
        );
        Ok(())
    }

    async fn delete_inner(&self, actor: Actor, id: WithdrawalId) -> LedgerResult<Withdrawal> {
        actor.ensure_operator()?;

        let mut tx = self.store.begin().await?;
        let w = lock_withdrawal(tx.as_mut(), id).await?;
        if w.status != WithdrawalStatus::Pending {
            return Err(LedgerError::transition(w.status, "deleted"));
        }

        if !self.recorder.remove(tx.as_mut(), &w.reference_id).await? {
            warn!(withdrawal_id = id, reference_id = %w.reference_id, "Mirror transaction already gone");
        }
        self.ledger.credit_in(tx.as_mut(), w.account_id, w.amount).await?;
        tx.delete_withdrawal(id).await?;
        tx.commit().await?;
        Ok(w)
    }

    /// Fee quote for an amount and rail; no side effects
    pub async fn calculate_clearance_fee(
        &self,
        amount: Decimal,
        method: WithdrawalMethod,
    ) -> LedgerResult<FeeBreakdown> {
        let amount = validate_amount(amount)?;
        let schedule = FeeSchedule::load(self.settings.as_ref()).await?;
        FeeCalculator::new(&schedule).breakdown(amount, method)
    }

    pub async fn get_withdrawal(&self, id: WithdrawalId) -> LedgerResult<Withdrawal> {
        self.store
            .get_withdrawal(id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("withdrawal {}", id)))
    }

    pub async fn list_withdrawals(&self, filter: &WithdrawalFilter) -> LedgerResult<Vec<Withdrawal>> {
        self.store.list_withdrawals(filter).await
    }

    pub async fn withdrawal_stats(&self) -> LedgerResult<WithdrawalStats> {
        self.store.withdrawal_stats().await
    }
}

async fn lock_withdrawal(tx: &mut dyn StoreTx, id: WithdrawalId) -> LedgerResult<Withdrawal> {
    tx.lock_withdrawal(id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("withdrawal {}", id)))
}
