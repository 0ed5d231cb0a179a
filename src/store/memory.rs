//! In-process ledger store
//!
//! Row locks are per-key async mutexes kept in a `DashMap`; a unit of work
//! holds the owned guards until it commits or drops. Committed rows live
//! behind one `std::sync::Mutex` that is only taken for short, non-awaiting
//! sections. Writes are staged per unit of work and applied in one go at
//! commit.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};

use super::{DEFAULT_LIST_LIMIT, LedgerStore, StoreTx};
use crate::account::{Account, AccountId};
use crate::error::{LedgerError, LedgerResult};
use crate::transaction::Transaction;
use crate::withdrawal::{
    NewWithdrawal, Withdrawal, WithdrawalFilter, WithdrawalId, WithdrawalStats,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LockKey {
    Account(AccountId),
    Withdrawal(WithdrawalId),
    Transaction(String),
}

struct StoredTransaction {
    /// Commit order, used for newest-first listings
    seq: u64,
    txn: Transaction,
}

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    transactions: FxHashMap<String, StoredTransaction>,
    withdrawals: BTreeMap<WithdrawalId, Withdrawal>,
    /// References claimed by units of work that have not finished yet
    claimed: FxHashSet<String>,
    next_seq: u64,
}

struct Shared {
    tables: Mutex<Tables>,
    locks: DashMap<LockKey, Arc<RowLock<()>>>,
    next_account_id: AtomicI64,
    next_withdrawal_id: AtomicI64,
    lock_timeout: Duration,
}

impl Shared {
    fn tables(&self) -> LedgerResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| LedgerError::Unavailable("memory store poisoned".into()))
    }
}

/// Ledger store for tests and single-process deployments
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables::default()),
                locks: DashMap::new(),
                next_account_id: AtomicI64::new(1),
                next_withdrawal_id: AtomicI64::new(1),
                lock_timeout,
            }),
        }
    }

    /// Sum of all committed balances
    pub fn total_balance(&self) -> LedgerResult<Decimal> {
        let tables = self.shared.tables()?;
        Ok(tables.accounts.values().map(Account::balance).sum())
    }

    pub fn transaction_count(&self) -> LedgerResult<usize> {
        Ok(self.shared.tables()?.transactions.len())
    }

    /// Row-lock entries currently allocated
    pub fn lock_entries(&self) -> usize {
        self.shared.locks.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn begin(&self) -> LedgerResult<Box<dyn StoreTx>> {
        Ok(Box::new(MemoryTx::new(Arc::clone(&self.shared))))
    }

    async fn create_account(
        &self,
        currency: &str,
        opening_balance: Decimal,
    ) -> LedgerResult<Account> {
        let id = self.shared.next_account_id.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();
        let account = Account::restore(id, currency.to_string(), opening_balance, now, now);
        self.shared.tables()?.accounts.insert(id, account.clone());
        Ok(account)
    }

    async fn get_account(&self, account_id: AccountId) -> LedgerResult<Option<Account>> {
        Ok(self.shared.tables()?.accounts.get(&account_id).cloned())
    }

    async fn get_transaction(&self, reference_id: &str) -> LedgerResult<Option<Transaction>> {
        let tables = self.shared.tables()?;
        Ok(tables.transactions.get(reference_id).map(|s| s.txn.clone()))
    }

    async fn list_account_transactions(
        &self,
        account_id: AccountId,
        limit: usize,
    ) -> LedgerResult<Vec<Transaction>> {
        let tables = self.shared.tables()?;
        let mut rows: Vec<&StoredTransaction> = tables
            .transactions
            .values()
            .filter(|s| s.txn.sender_id == Some(account_id) || s.txn.receiver_id == Some(account_id))
            .collect();
        rows.sort_unstable_by(|a, b| b.seq.cmp(&a.seq));
        Ok(rows.into_iter().take(limit).map(|s| s.txn.clone()).collect())
    }

    async fn get_withdrawal(&self, id: WithdrawalId) -> LedgerResult<Option<Withdrawal>> {
        Ok(self.shared.tables()?.withdrawals.get(&id).cloned())
    }

    async fn list_withdrawals(&self, filter: &WithdrawalFilter) -> LedgerResult<Vec<Withdrawal>> {
        let tables = self.shared.tables()?;
        Ok(tables
            .withdrawals
            .values()
            .rev()
            .filter(|w| filter.matches(w))
            .take(filter.limit.unwrap_or(DEFAULT_LIST_LIMIT))
            .cloned()
            .collect())
    }

    async fn withdrawal_stats(&self) -> LedgerResult<WithdrawalStats> {
        let tables = self.shared.tables()?;
        let today = Utc::now().date_naive();
        let mut stats = WithdrawalStats::default();
        for w in tables.withdrawals.values() {
            stats.add(w, today);
        }
        Ok(stats)
    }
}

/// One open unit of work against a [`MemoryStore`]
pub struct MemoryTx {
    shared: Arc<Shared>,
    guards: Vec<OwnedMutexGuard<()>>,
    held: FxHashSet<LockKey>,
    accounts: FxHashMap<AccountId, Account>,
    // None = delete at commit
    transactions: FxHashMap<String, Option<Transaction>>,
    withdrawals: FxHashMap<WithdrawalId, Option<Withdrawal>>,
    claimed: Vec<String>,
    // lock entries for rows that will not exist once this unit of work ends
    stale_locks: Vec<LockKey>,
}

impl MemoryTx {
    fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            guards: Vec::new(),
            held: FxHashSet::default(),
            accounts: FxHashMap::default(),
            transactions: FxHashMap::default(),
            withdrawals: FxHashMap::default(),
            claimed: Vec::new(),
            stale_locks: Vec::new(),
        }
    }

    async fn acquire(&mut self, key: LockKey) -> LedgerResult<()> {
        if self.held.contains(&key) {
            return Ok(());
        }

        let row = Arc::clone(&self.shared.locks.entry(key.clone()).or_default());
        let guard = tokio::time::timeout(self.shared.lock_timeout, row.lock_owned())
            .await
            .map_err(|_| {
                tracing::warn!(?key, "Row lock wait timed out");
                LedgerError::Unavailable(format!("lock wait timed out on {:?}", key))
            })?;

        self.guards.push(guard);
        self.held.insert(key);
        Ok(())
    }

    fn release_claims(&mut self, tables: &mut Tables) {
        for reference_id in self.claimed.drain(..) {
            tables.claimed.remove(&reference_id);
        }
    }

    /// Let go of every row lock, then drop the map entries of rows that are
    /// gone. An entry another unit of work is still waiting on stays; that
    /// waiter finds the row missing once it gets the lock.
    fn release_locks(&mut self) {
        self.guards.clear();
        for key in self.stale_locks.drain(..) {
            self.shared
                .locks
                .remove_if(&key, |_, row| Arc::strong_count(row) == 1);
        }
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if !self.claimed.is_empty() {
            let shared = Arc::clone(&self.shared);
            if let Ok(mut tables) = shared.tables.lock() {
                self.release_claims(&mut tables);
            }
        }
        self.release_locks();
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn lock_accounts(&mut self, ids: &[AccountId]) -> LedgerResult<Vec<Account>> {
        let mut order = ids.to_vec();
        order.sort_unstable();
        order.dedup();

        // accounts are never deleted, so a missing id needs no lock entry
        {
            let tables = self.shared.tables()?;
            if let Some(missing) = order
                .iter()
                .find(|id| !self.accounts.contains_key(id) && !tables.accounts.contains_key(id))
            {
                return Err(LedgerError::NotFound(format!("account {}", missing)));
            }
        }

        for id in order {
            self.acquire(LockKey::Account(id)).await?;
        }

        let tables = self.shared.tables()?;
        ids.iter()
            .map(|id| {
                self.accounts
                    .get(id)
                    .or_else(|| tables.accounts.get(id))
                    .cloned()
                    .ok_or_else(|| LedgerError::NotFound(format!("account {}", id)))
            })
            .collect()
    }

    async fn put_account(&mut self, account: &Account) -> LedgerResult<()> {
        debug_assert!(self.held.contains(&LockKey::Account(account.account_id)));
        self.accounts.insert(account.account_id, account.clone());
        Ok(())
    }

    async fn insert_transaction(&mut self, txn: &Transaction) -> LedgerResult<bool> {
        {
            let mut tables = self.shared.tables()?;
            if tables.transactions.contains_key(&txn.reference_id)
                || tables.claimed.contains(&txn.reference_id)
            {
                return Ok(false);
            }
            tables.claimed.insert(txn.reference_id.clone());
        }
        self.claimed.push(txn.reference_id.clone());
        self.transactions
            .insert(txn.reference_id.clone(), Some(txn.clone()));
        Ok(true)
    }

    async fn lock_transaction(&mut self, reference_id: &str) -> LedgerResult<Option<Transaction>> {
        let known = self.transactions.contains_key(reference_id)
            || self.shared.tables()?.transactions.contains_key(reference_id);
        if !known {
            return Ok(None);
        }
        self.acquire(LockKey::Transaction(reference_id.to_string()))
            .await?;
        if let Some(staged) = self.transactions.get(reference_id) {
            return Ok(staged.clone());
        }
        let tables = self.shared.tables()?;
        Ok(tables.transactions.get(reference_id).map(|s| s.txn.clone()))
    }

    async fn put_transaction(&mut self, txn: &Transaction) -> LedgerResult<()> {
        self.transactions
            .insert(txn.reference_id.clone(), Some(txn.clone()));
        Ok(())
    }

    async fn delete_transaction(&mut self, reference_id: &str) -> LedgerResult<()> {
        self.transactions.insert(reference_id.to_string(), None);
        Ok(())
    }

    async fn insert_withdrawal(&mut self, new: NewWithdrawal) -> LedgerResult<Withdrawal> {
        {
            let tables = self.shared.tables()?;
            let taken = tables
                .withdrawals
                .values()
                .chain(self.withdrawals.values().flatten())
                .any(|w| w.reference_id == new.reference_id);
            if taken {
                return Err(LedgerError::Conflict(format!(
                    "withdrawal reference {} already exists",
                    new.reference_id
                )));
            }
        }

        let id = self.shared.next_withdrawal_id.fetch_add(1, Ordering::Relaxed);
        self.acquire(LockKey::Withdrawal(id)).await?;
        // stale unless the insert commits
        self.stale_locks.push(LockKey::Withdrawal(id));
        let withdrawal = new.into_withdrawal(id, Utc::now());
        self.withdrawals.insert(id, Some(withdrawal.clone()));
        Ok(withdrawal)
    }

    async fn lock_withdrawal(&mut self, id: WithdrawalId) -> LedgerResult<Option<Withdrawal>> {
        let known = self.withdrawals.contains_key(&id)
            || self.shared.tables()?.withdrawals.contains_key(&id);
        if !known {
            return Ok(None);
        }
        self.acquire(LockKey::Withdrawal(id)).await?;
        if let Some(staged) = self.withdrawals.get(&id) {
            return Ok(staged.clone());
        }
        Ok(self.shared.tables()?.withdrawals.get(&id).cloned())
    }

    async fn put_withdrawal(&mut self, withdrawal: &Withdrawal) -> LedgerResult<()> {
        debug_assert!(self.held.contains(&LockKey::Withdrawal(withdrawal.id)));
        self.withdrawals.insert(withdrawal.id, Some(withdrawal.clone()));
        Ok(())
    }

    async fn delete_withdrawal(&mut self, id: WithdrawalId) -> LedgerResult<()> {
        self.withdrawals.insert(id, None);
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> LedgerResult<()> {
        let shared = Arc::clone(&self.shared);
        let mut tables = shared.tables()?;
        let mut stale = Vec::new();

        for (id, account) in self.accounts.drain() {
            tables.accounts.insert(id, account);
        }

        for (reference_id, row) in self.transactions.drain() {
            match row {
                Some(txn) => {
                    if let Some(existing) = tables.transactions.get_mut(&reference_id) {
                        existing.txn = txn;
                    } else {
                        tables.next_seq += 1;
                        let seq = tables.next_seq;
                        tables
                            .transactions
                            .insert(reference_id, StoredTransaction { seq, txn });
                    }
                }
                None => {
                    tables.transactions.remove(&reference_id);
                    stale.push(LockKey::Transaction(reference_id));
                }
            }
        }

        for (id, row) in self.withdrawals.drain() {
            match row {
                Some(w) => {
                    tables.withdrawals.insert(id, w);
                }
                None => {
                    tables.withdrawals.remove(&id);
                    stale.push(LockKey::Withdrawal(id));
                }
            }
        }

        self.release_claims(&mut tables);
        drop(tables);
        self.stale_locks = stale;
        self.release_locks();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{TransactionDraft, TransactionStatus, TransactionType};

    fn draft_txn(reference_id: &str, sender: AccountId) -> Transaction {
        TransactionDraft {
            sender_id: Some(sender),
            receiver_id: None,
            amount: Decimal::from(5),
            fee: Decimal::ZERO,
            currency: "USD".into(),
            txn_type: TransactionType::AdminDebit,
            status: TransactionStatus::Completed,
            description: None,
            metadata: None,
        }
        .into_transaction(reference_id.into())
    }

    #[tokio::test]
    async fn test_drop_rolls_back() {
        let store = MemoryStore::default();
        let acc = store.create_account("USD", Decimal::from(10)).await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            let mut locked = tx.lock_accounts(&[acc.account_id]).await.unwrap();
            locked[0].withdraw(Decimal::from(4)).unwrap();
            tx.put_account(&locked[0]).await.unwrap();
            assert!(tx.insert_transaction(&draft_txn("ADMAAA", acc.account_id)).await.unwrap());
        }

        let after = store.get_account(acc.account_id).await.unwrap().unwrap();
        assert_eq!(after.balance(), Decimal::from(10));
        assert!(store.get_transaction("ADMAAA").await.unwrap().is_none());

        // the claim was released with the rollback
        let mut tx = store.begin().await.unwrap();
        assert!(tx.insert_transaction(&draft_txn("ADMAAA", acc.account_id)).await.unwrap());
    }

    #[tokio::test]
    async fn test_commit_applies_all_writes() {
        let store = MemoryStore::default();
        let acc = store.create_account("USD", Decimal::from(10)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let mut locked = tx.lock_accounts(&[acc.account_id]).await.unwrap();
        locked[0].withdraw(Decimal::from(5)).unwrap();
        tx.put_account(&locked[0]).await.unwrap();
        tx.insert_transaction(&draft_txn("ADMBBB", acc.account_id)).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.total_balance().unwrap(), Decimal::from(5));
        let listed = store.list_account_transactions(acc.account_id, 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].reference_id, "ADMBBB");
    }

    #[tokio::test]
    async fn test_open_claim_blocks_duplicate_reference() {
        let store = MemoryStore::default();
        let mut a = store.begin().await.unwrap();
        let mut b = store.begin().await.unwrap();
        assert!(a.insert_transaction(&draft_txn("PPDUP", 1)).await.unwrap());
        assert!(!b.insert_transaction(&draft_txn("PPDUP", 1)).await.unwrap());
        a.commit().await.unwrap();
        assert!(!b.insert_transaction(&draft_txn("PPDUP", 1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_accounts_returns_requested_order() {
        let store = MemoryStore::default();
        let a = store.create_account("USD", Decimal::ONE).await.unwrap();
        let b = store.create_account("USD", Decimal::TWO).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let locked = tx.lock_accounts(&[b.account_id, a.account_id]).await.unwrap();
        assert_eq!(locked[0].account_id, b.account_id);
        assert_eq!(locked[1].account_id, a.account_id);

        let err = tx.lock_accounts(&[999]).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    fn new_withdrawal(account_id: AccountId, reference_id: &str) -> NewWithdrawal {
        use crate::withdrawal::{CryptoDetails, Destination};
        NewWithdrawal {
            account_id,
            amount: Decimal::from(20),
            fee: Decimal::ONE,
            clearance_fee: Decimal::ZERO,
            net_amount: Decimal::from(19),
            currency: "USD".into(),
            destination: Destination::Crypto(CryptoDetails {
                address: "bc1qxy2kgdygjrsqtzq2n0yrf2493p83kkfjhx0wlh".into(),
                network: "bitcoin".into(),
                account_holder_name: "Ada".into(),
            }),
            reference_id: reference_id.into(),
        }
    }

    #[tokio::test]
    async fn test_missing_rows_allocate_no_lock_entries() {
        let store = MemoryStore::default();
        let mut tx = store.begin().await.unwrap();

        assert_eq!(tx.lock_accounts(&[404]).await.unwrap_err().code(), "NOT_FOUND");
        assert!(tx.lock_withdrawal(404).await.unwrap().is_none());
        assert!(tx.lock_transaction("WDNOPE").await.unwrap().is_none());
        assert_eq!(store.lock_entries(), 0);
    }

    #[tokio::test]
    async fn test_lock_entries_of_deleted_rows_are_dropped() {
        let store = MemoryStore::default();
        let acc = store.create_account("USD", Decimal::from(50)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let w = tx.insert_withdrawal(new_withdrawal(acc.account_id, "WDKEEP")).await.unwrap();
        tx.insert_transaction(&draft_txn("WDKEEP", acc.account_id)).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.lock_entries(), 1);

        let mut tx = store.begin().await.unwrap();
        assert!(tx.lock_withdrawal(w.id).await.unwrap().is_some());
        assert!(tx.lock_transaction("WDKEEP").await.unwrap().is_some());
        tx.delete_transaction("WDKEEP").await.unwrap();
        tx.delete_withdrawal(w.id).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.lock_entries(), 0);
        assert!(store.get_withdrawal(w.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rolled_back_insert_drops_its_lock_entry() {
        let store = MemoryStore::default();
        let acc = store.create_account("USD", Decimal::from(50)).await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_withdrawal(new_withdrawal(acc.account_id, "WDGONE")).await.unwrap();
            assert_eq!(store.lock_entries(), 1);
        }
        assert_eq!(store.lock_entries(), 0);
    }

    #[tokio::test]
    async fn test_lock_wait_times_out_as_unavailable() {
        let store = MemoryStore::new(Duration::from_millis(20));
        let acc = store.create_account("USD", Decimal::ONE).await.unwrap();

        let mut holder = store.begin().await.unwrap();
        holder.lock_accounts(&[acc.account_id]).await.unwrap();

        let mut waiter = store.begin().await.unwrap();
        let err = waiter.lock_accounts(&[acc.account_id]).await.unwrap_err();
        assert!(err.is_retryable());

        drop(holder);
        assert!(waiter.lock_accounts(&[acc.account_id]).await.is_ok());
    }
}
