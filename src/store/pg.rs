//! PostgreSQL ledger store
//!
//! One `sqlx::Transaction` per unit of work. Row locks are `FOR UPDATE`,
//! bounded by `SET LOCAL lock_timeout`; a lock timeout comes back from the
//! server as an error and surfaces as `Unavailable`.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row};

use super::{DEFAULT_LIST_LIMIT, LedgerStore, StoreTx};
use crate::account::{Account, AccountId};
use crate::error::{LedgerError, LedgerResult};
use crate::transaction::{Transaction, TransactionStatus, TransactionType};
use crate::withdrawal::{
    Destination, NewWithdrawal, Withdrawal, WithdrawalFilter, WithdrawalId, WithdrawalStats,
    WithdrawalStatus,
};

const ACCOUNT_COLUMNS: &str = "account_id, currency, balance, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "reference_id, sender_id, receiver_id, amount, fee, net_amount, \
     currency, type, status, description, metadata, created_at, completed_at";

const WITHDRAWAL_COLUMNS: &str = "id, account_id, amount, fee, clearance_fee, net_amount, currency, \
     destination, status, reference_id, admin_id, admin_notes, processed_at, completed_at, \
     created_at, updated_at";

pub struct PgStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn begin(&self) -> LedgerResult<Box<dyn StoreTx>> {
        let mut tx = self.pool.begin().await?;
        // SET does not take bind parameters
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn create_account(
        &self,
        currency: &str,
        opening_balance: Decimal,
    ) -> LedgerResult<Account> {
        let row = sqlx::query(&format!(
            "INSERT INTO accounts (currency, balance) VALUES ($1, $2) RETURNING {}",
            ACCOUNT_COLUMNS
        ))
        .bind(currency)
        .bind(opening_balance)
        .fetch_one(&self.pool)
        .await?;
        account_from_row(&row)
    }

    async fn get_account(&self, account_id: AccountId) -> LedgerResult<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE account_id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn get_transaction(&self, reference_id: &str) -> LedgerResult<Option<Transaction>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE reference_id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(reference_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn list_account_transactions(
        &self,
        account_id: AccountId,
        limit: usize,
    ) -> LedgerResult<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            r#"SELECT {} FROM transactions
               WHERE sender_id = $1 OR receiver_id = $1
               ORDER BY id DESC LIMIT $2"#,
            TRANSACTION_COLUMNS
        ))
        .bind(account_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn get_withdrawal(&self, id: WithdrawalId) -> LedgerResult<Option<Withdrawal>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM withdrawals WHERE id = $1",
            WITHDRAWAL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(withdrawal_from_row).transpose()
    }

    async fn list_withdrawals(&self, filter: &WithdrawalFilter) -> LedgerResult<Vec<Withdrawal>> {
        let rows = sqlx::query(&format!(
            r#"SELECT {} FROM withdrawals
               WHERE ($1::text IS NULL OR status = $1)
                 AND ($2::text IS NULL OR method = $2)
                 AND ($3::bigint IS NULL OR account_id = $3)
               ORDER BY id DESC LIMIT $4"#,
            WITHDRAWAL_COLUMNS
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.method.map(|m| m.as_str()))
        .bind(filter.account_id)
        .bind(filter.limit.unwrap_or(DEFAULT_LIST_LIMIT) as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(withdrawal_from_row).collect()
    }

    async fn withdrawal_stats(&self) -> LedgerResult<WithdrawalStats> {
        let rows = sqlx::query(
            r#"SELECT status,
                      COUNT(*) AS n,
                      COALESCE(SUM(amount), 0) AS amount,
                      COALESCE(SUM(fee), 0) AS fee,
                      COALESCE(SUM(clearance_fee), 0) AS clearance_fee,
                      COUNT(*) FILTER (WHERE created_at >= date_trunc('day', NOW() AT TIME ZONE 'UTC') AT TIME ZONE 'UTC') AS today_n,
                      COALESCE(SUM(amount) FILTER (WHERE created_at >= date_trunc('day', NOW() AT TIME ZONE 'UTC') AT TIME ZONE 'UTC'), 0) AS today_amount
               FROM withdrawals GROUP BY status"#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = WithdrawalStats::default();
        for row in &rows {
            let status = parse_column::<WithdrawalStatus>(row, "status")?;
            let n = row.try_get::<i64, _>("n")? as u64;
            match status {
                WithdrawalStatus::Pending => stats.pending_withdrawals = n,
                WithdrawalStatus::Processing => stats.processing_withdrawals = n,
                WithdrawalStatus::Completed => stats.completed_withdrawals = n,
                WithdrawalStatus::Failed => stats.failed_withdrawals = n,
                WithdrawalStatus::Cancelled => stats.cancelled_withdrawals = n,
            }
            stats.total_withdrawals += n;
            stats.total_withdrawal_amount += row.try_get::<Decimal, _>("amount")?;
            stats.total_fees += row.try_get::<Decimal, _>("fee")?;
            stats.total_clearance_fees += row.try_get::<Decimal, _>("clearance_fee")?;
            stats.today_withdrawals += row.try_get::<i64, _>("today_n")? as u64;
            stats.today_withdrawal_amount += row.try_get::<Decimal, _>("today_amount")?;
        }
        Ok(stats)
    }
}

pub struct PgTx {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn lock_accounts(&mut self, ids: &[AccountId]) -> LedgerResult<Vec<Account>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE account_id = ANY($1) ORDER BY account_id FOR UPDATE",
            ACCOUNT_COLUMNS
        ))
        .bind(ids)
        .fetch_all(&mut *self.tx)
        .await?;

        let locked: Vec<Account> = rows.iter().map(account_from_row).collect::<LedgerResult<_>>()?;
        ids.iter()
            .map(|id| {
                locked
                    .iter()
                    .find(|a| a.account_id == *id)
                    .cloned()
                    .ok_or_else(|| LedgerError::NotFound(format!("account {}", id)))
            })
            .collect()
    }

    async fn put_account(&mut self, account: &Account) -> LedgerResult<()> {
        sqlx::query("UPDATE accounts SET balance = $1, updated_at = $2 WHERE account_id = $3")
            .bind(account.balance())
            .bind(account.updated_at)
            .bind(account.account_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_transaction(&mut self, txn: &Transaction) -> LedgerResult<bool> {
        let result = sqlx::query(&format!(
            r#"INSERT INTO transactions ({})
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
               ON CONFLICT (reference_id) DO NOTHING"#,
            TRANSACTION_COLUMNS
        ))
        .bind(&txn.reference_id)
        .bind(txn.sender_id)
        .bind(txn.receiver_id)
        .bind(txn.amount)
        .bind(txn.fee)
        .bind(txn.net_amount)
        .bind(&txn.currency)
        .bind(txn.txn_type.as_str())
        .bind(txn.status.as_str())
        .bind(&txn.description)
        .bind(&txn.metadata)
        .bind(txn.created_at)
        .bind(txn.completed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn lock_transaction(&mut self, reference_id: &str) -> LedgerResult<Option<Transaction>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE reference_id = $1 FOR UPDATE",
            TRANSACTION_COLUMNS
        ))
        .bind(reference_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn put_transaction(&mut self, txn: &Transaction) -> LedgerResult<()> {
        sqlx::query(
            r#"UPDATE transactions
               SET fee = $1, net_amount = $2, status = $3, completed_at = $4
               WHERE reference_id = $5"#,
        )
        .bind(txn.fee)
        .bind(txn.net_amount)
        .bind(txn.status.as_str())
        .bind(txn.completed_at)
        .bind(&txn.reference_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_transaction(&mut self, reference_id: &str) -> LedgerResult<()> {
        sqlx::query("DELETE FROM transactions WHERE reference_id = $1")
            .bind(reference_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_withdrawal(&mut self, new: NewWithdrawal) -> LedgerResult<Withdrawal> {
        let destination = serde_json::to_value(&new.destination)
            .map_err(|e| LedgerError::Validation(format!("destination: {}", e)))?;
        let now = Utc::now();
        let id: Option<i64> = sqlx::query_scalar(
            r#"INSERT INTO withdrawals
                   (account_id, amount, fee, clearance_fee, net_amount, currency, method,
                    destination, status, reference_id, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', $9, $10, $10)
               ON CONFLICT (reference_id) DO NOTHING
               RETURNING id"#,
        )
        .bind(new.account_id)
        .bind(new.amount)
        .bind(new.fee)
        .bind(new.clearance_fee)
        .bind(new.net_amount)
        .bind(&new.currency)
        .bind(new.destination.method().as_str())
        .bind(destination)
        .bind(&new.reference_id)
        .bind(now)
        .fetch_optional(&mut *self.tx)
        .await?;

        match id {
            Some(id) => Ok(new.into_withdrawal(id, now)),
            None => Err(LedgerError::Conflict(format!(
                "withdrawal reference {} already exists",
                new.reference_id
            ))),
        }
    }

    async fn lock_withdrawal(&mut self, id: WithdrawalId) -> LedgerResult<Option<Withdrawal>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM withdrawals WHERE id = $1 FOR UPDATE",
            WITHDRAWAL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(withdrawal_from_row).transpose()
    }

    async fn put_withdrawal(&mut self, w: &Withdrawal) -> LedgerResult<()> {
        sqlx::query(
            r#"UPDATE withdrawals
               SET fee = $1, clearance_fee = $2, net_amount = $3, status = $4, admin_id = $5,
                   admin_notes = $6, processed_at = $7, completed_at = $8, updated_at = $9
               WHERE id = $10"#,
        )
        .bind(w.fee)
        .bind(w.clearance_fee)
        .bind(w.net_amount)
        .bind(w.status.as_str())
        .bind(w.admin_id)
        .bind(&w.admin_notes)
        .bind(w.processed_at)
        .bind(w.completed_at)
        .bind(w.updated_at)
        .bind(w.id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_withdrawal(&mut self, id: WithdrawalId) -> LedgerResult<()> {
        sqlx::query("DELETE FROM withdrawals WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> LedgerResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn parse_column<T: FromStr>(row: &PgRow, column: &str) -> LedgerResult<T> {
    let raw: String = row.try_get(column)?;
    raw.parse::<T>().map_err(|_| {
        tracing::error!(column, value = %raw, "Unrecognized value in ledger row");
        LedgerError::Unavailable(format!("corrupt {} value: {}", column, raw))
    })
}

fn account_from_row(row: &PgRow) -> LedgerResult<Account> {
    Ok(Account::restore(
        row.try_get("account_id")?,
        row.try_get::<String, _>("currency")?.trim().to_string(),
        row.try_get("balance")?,
        row.try_get("created_at")?,
        row.try_get("updated_at")?,
    ))
}

fn transaction_from_row(row: &PgRow) -> LedgerResult<Transaction> {
    Ok(Transaction {
        reference_id: row.try_get("reference_id")?,
        sender_id: row.try_get("sender_id")?,
        receiver_id: row.try_get("receiver_id")?,
        amount: row.try_get("amount")?,
        fee: row.try_get("fee")?,
        net_amount: row.try_get("net_amount")?,
        currency: row.try_get::<String, _>("currency")?.trim().to_string(),
        txn_type: parse_column::<TransactionType>(row, "type")?,
        status: parse_column::<TransactionStatus>(row, "status")?,
        description: row.try_get("description")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn withdrawal_from_row(row: &PgRow) -> LedgerResult<Withdrawal> {
    let destination: serde_json::Value = row.try_get("destination")?;
    let destination: Destination = serde_json::from_value(destination)
        .map_err(|e| LedgerError::Unavailable(format!("corrupt destination: {}", e)))?;
    let processed_at: Option<DateTime<Utc>> = row.try_get("processed_at")?;

    Ok(Withdrawal {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        amount: row.try_get("amount")?,
        fee: row.try_get("fee")?,
        clearance_fee: row.try_get("clearance_fee")?,
        net_amount: row.try_get("net_amount")?,
        currency: row.try_get::<String, _>("currency")?.trim().to_string(),
        destination,
        status: parse_column::<WithdrawalStatus>(row, "status")?,
        reference_id: row.try_get("reference_id")?,
        admin_id: row.try_get("admin_id")?,
        admin_notes: row.try_get("admin_notes")?,
        processed_at,
        completed_at: row.try_get("completed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
