//! Ledger engine wiring
//!
//! Builds the store, settings source and services once and hands out shared
//! handles. All services share the same store, so a balance change made
//! through one is visible to the others on commit.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::account::AccountLedger;
use crate::config::{AppConfig, LedgerConfig};
use crate::db::Database;
use crate::notify::{LogNotifier, Notifier};
use crate::payment::PaymentService;
use crate::settings::{MemorySettings, PgSettingsStore, SettingsStore};
use crate::store::{LedgerStore, MemoryStore, PgStore};
use crate::transaction::TransactionRecorder;
use crate::withdrawal::WithdrawalService;

#[derive(Clone)]
pub struct LedgerEngine {
    store: Arc<dyn LedgerStore>,
    settings: Arc<dyn SettingsStore>,
    ledger: AccountLedger,
    payments: PaymentService,
    withdrawals: WithdrawalService,
}

impl LedgerEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        settings: Arc<dyn SettingsStore>,
        notifier: Arc<dyn Notifier>,
        config: &LedgerConfig,
    ) -> Self {
        let recorder = TransactionRecorder::new(store.clone(), config.reference_retry_limit);
        Self {
            ledger: AccountLedger::new(store.clone()).with_default_currency(&config.currency),
            payments: PaymentService::new(
                store.clone(),
                settings.clone(),
                recorder.clone(),
                notifier.clone(),
            ),
            withdrawals: WithdrawalService::new(store.clone(), settings.clone(), recorder, notifier),
            store,
            settings,
        }
    }

    /// In-memory store and settings, log notifier
    pub fn in_memory(config: &LedgerConfig) -> Self {
        Self::new(
            Arc::new(MemoryStore::new(config.lock_timeout())),
            Arc::new(MemorySettings::new()),
            Arc::new(LogNotifier),
            config,
        )
    }

    /// Postgres when `postgres_url` is set, in-memory otherwise
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let ledger = &config.ledger;
        let Some(url) = config.postgres_url.as_deref() else {
            tracing::warn!("No postgres_url configured, using the in-memory ledger store");
            return Ok(Self::in_memory(ledger));
        };

        let db = Database::connect(url, ledger.max_connections)
            .await
            .context("Failed to connect to PostgreSQL")?;
        db.health_check().await.context("PostgreSQL health check failed")?;
        let missing = db.missing_tables().await?;
        if !missing.is_empty() {
            anyhow::bail!("ledger tables missing ({}); run `payledger migrate`", missing.join(", "));
        }

        let pool = db.pool().clone();
        Ok(Self::new(
            Arc::new(PgStore::new(pool.clone(), ledger.lock_timeout())),
            Arc::new(PgSettingsStore::new(pool)),
            Arc::new(LogNotifier),
            ledger,
        ))
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    pub fn ledger(&self) -> &AccountLedger {
        &self.ledger
    }

    pub fn payments(&self) -> &PaymentService {
        &self.payments
    }

    pub fn withdrawals(&self) -> &WithdrawalService {
        &self.withdrawals
    }
}
