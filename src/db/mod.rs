//! PostgreSQL pool for the ledger store and settings

pub mod schema;

use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Tables the ledger store reads and writes
pub const LEDGER_TABLES: [&str; 4] = ["accounts", "transactions", "withdrawals", "system_settings"];

pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        tracing::info!(max_connections, "Ledger database pool ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Ledger tables absent from the current schema (empty once `migrate` ran)
    pub async fn missing_tables(&self) -> Result<Vec<String>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT table_name::text AS table_name FROM information_schema.tables
             WHERE table_schema = current_schema() AND table_name = ANY($1)",
        )
        .bind(LEDGER_TABLES.iter().map(|t| t.to_string()).collect::<Vec<_>>())
        .fetch_all(&self.pool)
        .await?;

        let present: Vec<String> = rows
            .iter()
            .map(|row| row.try_get::<String, _>("table_name"))
            .collect::<Result<_, _>>()?;

        Ok(LEDGER_TABLES
            .iter()
            .filter(|t| !present.iter().any(|p| p == *t))
            .map(|t| t.to_string())
            .collect())
    }
}
