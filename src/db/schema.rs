use anyhow::{Context, Result};
use sqlx::PgPool;

/// Create ledger tables if they do not exist
pub async fn init_schema(pool: &PgPool) -> Result<()> {
    tracing::info!("Initializing ledger schema...");

    for (name, ddl) in [
        ("accounts", CREATE_ACCOUNTS_TABLE),
        ("transactions", CREATE_TRANSACTIONS_TABLE),
        ("transactions indexes", CREATE_TRANSACTIONS_INDEXES),
        ("withdrawals", CREATE_WITHDRAWALS_TABLE),
        ("withdrawals indexes", CREATE_WITHDRAWALS_INDEXES),
        ("system_settings", CREATE_SYSTEM_SETTINGS_TABLE),
    ] {
        sqlx::raw_sql(ddl)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to create {}", name))?;
    }

    tracing::info!("Ledger schema initialized successfully");
    Ok(())
}

const CREATE_ACCOUNTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    account_id BIGSERIAL PRIMARY KEY,
    currency CHAR(3) NOT NULL DEFAULT 'USD',
    balance NUMERIC(15,2) NOT NULL DEFAULT 0 CHECK (balance >= 0),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    id BIGSERIAL PRIMARY KEY,
    reference_id VARCHAR(32) NOT NULL UNIQUE,
    sender_id BIGINT REFERENCES accounts(account_id),
    receiver_id BIGINT REFERENCES accounts(account_id),
    amount NUMERIC(15,2) NOT NULL CHECK (amount > 0),
    fee NUMERIC(15,2) NOT NULL DEFAULT 0 CHECK (fee >= 0),
    net_amount NUMERIC(15,2) NOT NULL,
    currency CHAR(3) NOT NULL,
    type VARCHAR(20) NOT NULL,
    status VARCHAR(20) NOT NULL,
    description TEXT,
    metadata JSONB,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    completed_at TIMESTAMPTZ,
    CHECK (amount = fee + net_amount)
)
"#;

const CREATE_TRANSACTIONS_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_transactions_sender ON transactions(sender_id);
CREATE INDEX IF NOT EXISTS idx_transactions_receiver ON transactions(receiver_id);
"#;

const CREATE_WITHDRAWALS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS withdrawals (
    id BIGSERIAL PRIMARY KEY,
    account_id BIGINT NOT NULL REFERENCES accounts(account_id),
    amount NUMERIC(15,2) NOT NULL CHECK (amount > 0),
    fee NUMERIC(15,2) NOT NULL DEFAULT 0,
    clearance_fee NUMERIC(15,2) NOT NULL DEFAULT 0,
    net_amount NUMERIC(15,2) NOT NULL CHECK (net_amount >= 0),
    currency CHAR(3) NOT NULL,
    method VARCHAR(20) NOT NULL,
    destination JSONB NOT NULL,
    status VARCHAR(20) NOT NULL DEFAULT 'pending',
    reference_id VARCHAR(32) NOT NULL UNIQUE,
    admin_id BIGINT,
    admin_notes TEXT,
    processed_at TIMESTAMPTZ,
    completed_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CHECK (net_amount = amount - fee - clearance_fee)
)
"#;

const CREATE_WITHDRAWALS_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_withdrawals_account ON withdrawals(account_id);
CREATE INDEX IF NOT EXISTS idx_withdrawals_status ON withdrawals(status);
"#;

const CREATE_SYSTEM_SETTINGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS system_settings (
    key VARCHAR(100) PRIMARY KEY,
    value TEXT NOT NULL,
    description TEXT,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;
