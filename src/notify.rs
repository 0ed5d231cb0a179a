//! Outbound notifications
//!
//! Fired after a commit. Delivery is best effort: a failure is logged by the
//! caller and never undoes the ledger change that triggered it.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::money::format_money;
use crate::transaction::Transaction;
use crate::withdrawal::{Withdrawal, WithdrawalStatus};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn payment_sent(&self, txn: &Transaction) -> anyhow::Result<()>;

    async fn payment_received(&self, txn: &Transaction) -> anyhow::Result<()>;

    async fn withdrawal_fees_updated(&self, withdrawal: &Withdrawal) -> anyhow::Result<()>;

    async fn withdrawal_status_changed(
        &self,
        withdrawal: &Withdrawal,
        previous: WithdrawalStatus,
    ) -> anyhow::Result<()>;
}

/// Writes notifications to the log instead of delivering them
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn payment_sent(&self, txn: &Transaction) -> anyhow::Result<()> {
        info!(
            reference_id = %txn.reference_id,
            account_id = ?txn.sender_id,
            "Notify: you sent {}",
            format_money(txn.amount, &txn.currency)
        );
        Ok(())
    }

    async fn payment_received(&self, txn: &Transaction) -> anyhow::Result<()> {
        info!(
            reference_id = %txn.reference_id,
            account_id = ?txn.receiver_id,
            "Notify: you received {}",
            format_money(txn.net_amount, &txn.currency)
        );
        Ok(())
    }

    async fn withdrawal_fees_updated(&self, w: &Withdrawal) -> anyhow::Result<()> {
        info!(
            withdrawal_id = w.id,
            account_id = w.account_id,
            "Notify: withdrawal fees now {}, you will receive {}",
            format_money(w.total_fees(), &w.currency),
            format_money(w.net_amount, &w.currency)
        );
        Ok(())
    }

    async fn withdrawal_status_changed(
        &self,
        w: &Withdrawal,
        previous: WithdrawalStatus,
    ) -> anyhow::Result<()> {
        info!(
            withdrawal_id = w.id,
            account_id = w.account_id,
            from = %previous,
            to = %w.status,
            "Notify: withdrawal status changed"
        );
        Ok(())
    }
}

/// Await a notification and swallow its error with a warning
pub(crate) async fn deliver<F>(what: &'static str, reference_id: &str, send: F)
where
    F: std::future::Future<Output = anyhow::Result<()>>,
{
    if let Err(e) = send.await {
        warn!(notification = what, reference_id, error = %e, "Notification failed");
    }
}
