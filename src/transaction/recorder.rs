//! Transaction Recorder
//!
//! Writes transaction rows inside the caller's unit of work, so a row exists
//! if and only if the balance movement it describes was committed.

use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

use super::types::{Transaction, TransactionDraft, TransactionStatus};
use crate::error::{LedgerError, LedgerResult};
use crate::store::{LedgerStore, StoreTx};

/// Random characters after the type prefix
pub const REFERENCE_LEN: usize = 12;

const REFERENCE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// `prefix` followed by [`REFERENCE_LEN`] random upper-case alphanumerics
pub fn generate_reference(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let mut reference = String::with_capacity(prefix.len() + REFERENCE_LEN);
    reference.push_str(prefix);
    for _ in 0..REFERENCE_LEN {
        let idx = rng.gen_range(0..REFERENCE_CHARSET.len());
        reference.push(REFERENCE_CHARSET[idx] as char);
    }
    reference
}

#[derive(Clone)]
pub struct TransactionRecorder {
    store: Arc<dyn LedgerStore>,
    retry_limit: u32,
}

impl TransactionRecorder {
    pub fn new(store: Arc<dyn LedgerStore>, retry_limit: u32) -> Self {
        Self {
            store,
            retry_limit: retry_limit.max(1),
        }
    }

    /// Insert a new row with a fresh reference id.
    ///
    /// A reference collision regenerates the id; `Conflict` only after
    /// `retry_limit` attempts all collide.
    pub async fn record(
        &self,
        tx: &mut dyn StoreTx,
        draft: TransactionDraft,
    ) -> LedgerResult<Transaction> {
        let prefix = draft.txn_type.reference_prefix();
        let mut txn = draft.into_transaction(generate_reference(prefix));

        for attempt in 1..=self.retry_limit {
            if tx.insert_transaction(&txn).await? {
                debug!(
                    reference_id = %txn.reference_id,
                    txn_type = %txn.txn_type,
                    attempt,
                    "Transaction recorded"
                );
                return Ok(txn);
            }
            warn!(reference_id = %txn.reference_id, attempt, "Reference id collision, regenerating");
            txn.reference_id = generate_reference(prefix);
        }

        Err(LedgerError::Conflict(format!(
            "could not allocate a unique {} reference after {} attempts",
            prefix, self.retry_limit
        )))
    }

    pub async fn mark_completed(
        &self,
        tx: &mut dyn StoreTx,
        reference_id: &str,
    ) -> LedgerResult<Transaction> {
        self.mark_status(tx, reference_id, TransactionStatus::Completed)
            .await
    }

    /// Forward-only status change; setting the current status again is a no-op.
    pub async fn mark_status(
        &self,
        tx: &mut dyn StoreTx,
        reference_id: &str,
        status: TransactionStatus,
    ) -> LedgerResult<Transaction> {
        self.sync_status(tx, reference_id, status)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {}", reference_id)))
    }

    /// Like [`mark_status`](Self::mark_status) but `None` when the row is gone
    pub(crate) async fn sync_status(
        &self,
        tx: &mut dyn StoreTx,
        reference_id: &str,
        status: TransactionStatus,
    ) -> LedgerResult<Option<Transaction>> {
        let Some(mut txn) = tx.lock_transaction(reference_id).await? else {
            return Ok(None);
        };

        if txn.status == status {
            return Ok(Some(txn));
        }
        if !txn.status.can_transition_to(status) {
            return Err(LedgerError::transition(txn.status, status));
        }

        txn.status = status;
        if status == TransactionStatus::Completed {
            txn.completed_at = Some(Utc::now());
        }
        tx.put_transaction(&txn).await?;
        Ok(Some(txn))
    }

    /// Rewrite the fee split of a row, keeping `amount = fee + net_amount`.
    /// `None` when the row is gone.
    pub async fn sync_fees(
        &self,
        tx: &mut dyn StoreTx,
        reference_id: &str,
        fee: Decimal,
        net_amount: Decimal,
    ) -> LedgerResult<Option<Transaction>> {
        let Some(mut txn) = tx.lock_transaction(reference_id).await? else {
            return Ok(None);
        };

        if fee + net_amount != txn.amount {
            return Err(LedgerError::FeeConfiguration(format!(
                "fee {} + net {} does not add up to {} on {}",
                fee, net_amount, txn.amount, reference_id
            )));
        }

        txn.fee = fee;
        txn.net_amount = net_amount;
        tx.put_transaction(&txn).await?;
        Ok(Some(txn))
    }

    /// Delete a row; `false` when it was already gone
    pub async fn remove(&self, tx: &mut dyn StoreTx, reference_id: &str) -> LedgerResult<bool> {
        if tx.lock_transaction(reference_id).await?.is_none() {
            return Ok(false);
        }
        tx.delete_transaction(reference_id).await?;
        Ok(true)
    }

    pub async fn find_by_reference_id(&self, reference_id: &str) -> LedgerResult<Transaction> {
        self.store
            .get_transaction(reference_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {}", reference_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::transaction::TransactionType;

    fn draft(status: TransactionStatus) -> TransactionDraft {
        TransactionDraft {
            sender_id: Some(1),
            receiver_id: Some(2),
            amount: Decimal::new(2500, 2),
            fee: Decimal::ZERO,
            currency: "USD".into(),
            txn_type: TransactionType::Request,
            status,
            description: Some("dinner".into()),
            metadata: None,
        }
    }

    fn recorder() -> (Arc<MemoryStore>, TransactionRecorder) {
        let store = Arc::new(MemoryStore::default());
        let recorder = TransactionRecorder::new(store.clone(), 5);
        (store, recorder)
    }

    #[test]
    fn test_reference_shape() {
        let r = generate_reference("PP");
        assert_eq!(r.len(), 2 + REFERENCE_LEN);
        assert!(r.starts_with("PP"));
        assert!(r[2..].bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));
    }

    #[tokio::test]
    async fn test_record_then_find() {
        let (store, recorder) = recorder();
        let mut tx = store.begin().await.unwrap();
        let txn = recorder
            .record(tx.as_mut(), draft(TransactionStatus::Pending))
            .await
            .unwrap();
        assert!(txn.reference_id.starts_with("PPR"));
        tx.commit().await.unwrap();

        let found = recorder.find_by_reference_id(&txn.reference_id).await.unwrap();
        assert_eq!(found, txn);
        assert_eq!(
            recorder.find_by_reference_id("PPRNOPE").await.unwrap_err().code(),
            "NOT_FOUND"
        );
    }

    #[tokio::test]
    async fn test_mark_status_idempotent_and_forward_only() {
        let (store, recorder) = recorder();
        let mut tx = store.begin().await.unwrap();
        let txn = recorder
            .record(tx.as_mut(), draft(TransactionStatus::Pending))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let done = recorder.mark_completed(tx.as_mut(), &txn.reference_id).await.unwrap();
        assert!(done.completed_at.is_some());
        let again = recorder.mark_completed(tx.as_mut(), &txn.reference_id).await.unwrap();
        assert_eq!(again.completed_at, done.completed_at);

        let err = recorder
            .mark_status(tx.as_mut(), &txn.reference_id, TransactionStatus::Cancelled)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE_TRANSITION");
    }

    #[tokio::test]
    async fn test_sync_fees_keeps_split_consistent() {
        let (store, recorder) = recorder();
        let mut tx = store.begin().await.unwrap();
        let txn = recorder
            .record(tx.as_mut(), draft(TransactionStatus::Pending))
            .await
            .unwrap();

        let synced = recorder
            .sync_fees(tx.as_mut(), &txn.reference_id, Decimal::new(150, 2), Decimal::new(2350, 2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(synced.amount, synced.fee + synced.net_amount);

        assert!(
            recorder
                .sync_fees(tx.as_mut(), &txn.reference_id, Decimal::ONE, Decimal::ONE)
                .await
                .is_err()
        );
        assert!(
            recorder
                .sync_fees(tx.as_mut(), "WDMISSING", Decimal::ONE, Decimal::ONE)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_remove() {
        let (store, recorder) = recorder();
        let mut tx = store.begin().await.unwrap();
        let txn = recorder
            .record(tx.as_mut(), draft(TransactionStatus::Pending))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(recorder.remove(tx.as_mut(), &txn.reference_id).await.unwrap());
        tx.commit().await.unwrap();
        assert!(store.get_transaction(&txn.reference_id).await.unwrap().is_none());
    }
}
