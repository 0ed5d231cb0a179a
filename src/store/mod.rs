//! Ledger storage
//!
//! A [`StoreTx`] is the unit of atomicity: every row it locks stays locked
//! until `commit` or drop, every write it stages becomes visible at `commit`
//! or never. Dropping an uncommitted `StoreTx` rolls it back.
//!
//! Lock order inside one unit of work: withdrawal row, then its mirror
//! transaction, then account rows. Accounts are always locked through
//! [`StoreTx::lock_accounts`], which takes them in ascending id order.

pub mod memory;
pub mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::account::{Account, AccountId};
use crate::error::LedgerResult;
use crate::transaction::Transaction;
use crate::withdrawal::{
    NewWithdrawal, Withdrawal, WithdrawalFilter, WithdrawalId, WithdrawalStats,
};

/// Default page size for listings
pub const DEFAULT_LIST_LIMIT: usize = 100;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a unit of work
    async fn begin(&self) -> LedgerResult<Box<dyn StoreTx>>;

    async fn create_account(&self, currency: &str, opening_balance: Decimal)
    -> LedgerResult<Account>;

    async fn get_account(&self, account_id: AccountId) -> LedgerResult<Option<Account>>;

    async fn get_transaction(&self, reference_id: &str) -> LedgerResult<Option<Transaction>>;

    /// Newest first, as sender or receiver
    async fn list_account_transactions(
        &self,
        account_id: AccountId,
        limit: usize,
    ) -> LedgerResult<Vec<Transaction>>;

    async fn get_withdrawal(&self, id: WithdrawalId) -> LedgerResult<Option<Withdrawal>>;

    /// Newest first
    async fn list_withdrawals(&self, filter: &WithdrawalFilter) -> LedgerResult<Vec<Withdrawal>>;

    async fn withdrawal_stats(&self) -> LedgerResult<WithdrawalStats>;
}

#[async_trait]
pub trait StoreTx: Send {
    /// Lock accounts (ascending id, duplicates ignored) and return them in
    /// the order requested. `NotFound` if any is missing.
    async fn lock_accounts(&mut self, ids: &[AccountId]) -> LedgerResult<Vec<Account>>;

    async fn put_account(&mut self, account: &Account) -> LedgerResult<()>;

    /// Claim `reference_id` and stage the row. `Ok(false)` when the reference
    /// is already taken (committed or claimed by another open unit of work).
    async fn insert_transaction(&mut self, txn: &Transaction) -> LedgerResult<bool>;

    async fn lock_transaction(&mut self, reference_id: &str) -> LedgerResult<Option<Transaction>>;

    async fn put_transaction(&mut self, txn: &Transaction) -> LedgerResult<()>;

    async fn delete_transaction(&mut self, reference_id: &str) -> LedgerResult<()>;

    /// Assign an id and stage the row. `Conflict` on a duplicate reference.
    async fn insert_withdrawal(&mut self, new: NewWithdrawal) -> LedgerResult<Withdrawal>;

    async fn lock_withdrawal(&mut self, id: WithdrawalId) -> LedgerResult<Option<Withdrawal>>;

    async fn put_withdrawal(&mut self, withdrawal: &Withdrawal) -> LedgerResult<()>;

    async fn delete_withdrawal(&mut self, id: WithdrawalId) -> LedgerResult<()>;

    async fn commit(self: Box<Self>) -> LedgerResult<()>;
}
