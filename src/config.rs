use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::account::DEFAULT_CURRENCY;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// PostgreSQL connection URL; absent means the in-memory store
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub ledger: LedgerConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LedgerConfig {
    /// Currency of accounts opened without an explicit one
    pub currency: String,
    /// Row lock wait before a mutation gives up with `Unavailable`
    pub lock_timeout_ms: u64,
    /// Reference id regeneration attempts before `Conflict`
    pub reference_retry_limit: u32,
    pub max_connections: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            currency: DEFAULT_CURRENCY.to_string(),
            lock_timeout_ms: 5000,
            reference_retry_limit: 5,
            max_connections: 20,
        }
    }
}

impl LedgerConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "payledger.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            postgres_url: None,
            ledger: LedgerConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_section_defaults() {
        let cfg = AppConfig::from_yaml(
            r#"
log_level: debug
log_dir: ./logs
log_file: test.log
use_json: true
rotation: never
"#,
        )
        .unwrap();
        assert!(cfg.postgres_url.is_none());
        assert_eq!(cfg.ledger.currency, "USD");
        assert_eq!(cfg.ledger.lock_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_ledger_section_override() {
        let cfg = AppConfig::from_yaml(
            r#"
log_level: info
log_dir: ./logs
log_file: test.log
use_json: false
rotation: daily
postgres_url: postgresql://ledger@localhost/ledger
ledger:
  currency: EUR
  lock_timeout_ms: 250
  reference_retry_limit: 8
  max_connections: 4
"#,
        )
        .unwrap();
        assert_eq!(cfg.ledger.currency, "EUR");
        assert_eq!(cfg.ledger.reference_retry_limit, 8);
        assert_eq!(cfg.ledger.lock_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(AppConfig::load("does-not-exist").is_err());
    }
}
