//! PostgreSQL-backed settings (`system_settings` table)

use async_trait::async_trait;
use sqlx::PgPool;

use super::SettingsStore;
use crate::error::LedgerResult;

pub struct PgSettingsStore {
    pool: PgPool,
}

impl PgSettingsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsStore for PgSettingsStore {
    async fn get(&self, key: &str) -> LedgerResult<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM system_settings WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }
}
