//! Fee settings
//!
//! Key/value configuration owned by the back office. The ledger only reads
//! it; every key has a documented default so a fresh install works without
//! any rows in `system_settings`.

pub mod db;
pub mod schedule;

pub use db::PgSettingsStore;
pub use schedule::{ClearanceFeeRule, FeeSchedule, MethodFee, TransferFeeRule};

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::RwLock;

use crate::error::{LedgerError, LedgerResult};

/// Setting keys and their defaults
pub mod keys {
    pub const WITHDRAWAL_MIN_AMOUNT: &str = "withdrawal_min_amount";
    pub const BASE_FEE_PERCENTAGE: &str = "withdrawal_base_fee_percentage";
    pub const BASE_FEE_FIXED: &str = "withdrawal_base_fee_fixed";
    pub const WIRE_FEE_ADDITIONAL: &str = "withdrawal_wire_fee_additional";
    pub const PAYPAL_FEE_PERCENTAGE: &str = "withdrawal_paypal_fee_percentage";
    pub const PAYPAL_FEE_FIXED: &str = "withdrawal_paypal_fee_fixed";
    pub const CRYPTO_FEE_PERCENTAGE: &str = "withdrawal_crypto_fee_percentage";
    pub const CLEARANCE_FEE_ENABLED: &str = "withdrawal_clearance_fee_enabled";
    pub const CLEARANCE_FEE_PERCENTAGE: &str = "withdrawal_clearance_fee_percentage";
    pub const CLEARANCE_FEE_MINIMUM: &str = "withdrawal_clearance_fee_minimum";
    pub const CLEARANCE_FEE_MAXIMUM: &str = "withdrawal_clearance_fee_maximum";
    pub const AUTO_CLEARANCE_FEE: &str = "withdrawal_auto_clearance_fee";
    pub const TRANSFER_FEE_PERCENTAGE: &str = "transfer_fee_percentage";
    pub const TRANSFER_FEE_FIXED: &str = "transfer_fee_fixed";

    /// `(key, default)` pairs
    pub const DEFAULTS: &[(&str, &str)] = &[
        (WITHDRAWAL_MIN_AMOUNT, "10.00"),
        (BASE_FEE_PERCENTAGE, "1.00"),
        (BASE_FEE_FIXED, "1.00"),
        (WIRE_FEE_ADDITIONAL, "25.00"),
        (PAYPAL_FEE_PERCENTAGE, "2.90"),
        (PAYPAL_FEE_FIXED, "0.30"),
        (CRYPTO_FEE_PERCENTAGE, "1.50"),
        (CLEARANCE_FEE_ENABLED, "true"),
        (CLEARANCE_FEE_PERCENTAGE, "0.00"),
        (CLEARANCE_FEE_MINIMUM, "0.00"),
        (CLEARANCE_FEE_MAXIMUM, "0.00"),
        (AUTO_CLEARANCE_FEE, "false"),
        (TRANSFER_FEE_PERCENTAGE, "2.90"),
        (TRANSFER_FEE_FIXED, "0.30"),
    ];

    /// Feature flag that switches a payout rail on or off (default on)
    pub fn method_enabled(method: &str) -> String {
        format!("withdrawal_{}_enabled", method)
    }

    pub fn default_for(key: &str) -> Option<&'static str> {
        DEFAULTS.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }
}

/// Read-only settings source
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Raw stored value, `None` when the key was never set
    async fn get(&self, key: &str) -> LedgerResult<Option<String>>;
}

/// Decimal setting with its documented default
pub async fn get_decimal(store: &dyn SettingsStore, key: &str) -> LedgerResult<Decimal> {
    let raw = value_or_default(store, key, "0").await?;
    Decimal::from_str(raw.trim()).map_err(|_| {
        LedgerError::FeeConfiguration(format!("setting {} is not a decimal: {:?}", key, raw))
    })
}

/// Money setting that may not go below zero (flat fees, bounds, minimums)
pub async fn get_amount(store: &dyn SettingsStore, key: &str) -> LedgerResult<Decimal> {
    let value = get_decimal(store, key).await?;
    if value < Decimal::ZERO {
        return Err(LedgerError::FeeConfiguration(format!(
            "setting {} must not be negative: {}",
            key, value
        )));
    }
    Ok(value)
}

/// Percentage setting in `0..=100`
pub async fn get_percentage(store: &dyn SettingsStore, key: &str) -> LedgerResult<Decimal> {
    let value = get_amount(store, key).await?;
    if value > Decimal::ONE_HUNDRED {
        return Err(LedgerError::FeeConfiguration(format!(
            "setting {} must be at most 100: {}",
            key, value
        )));
    }
    Ok(value)
}

/// Boolean setting with its documented default (`true/false/1/0`)
pub async fn get_flag(store: &dyn SettingsStore, key: &str, fallback: bool) -> LedgerResult<bool> {
    let raw = value_or_default(store, key, if fallback { "true" } else { "false" }).await?;
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(LedgerError::FeeConfiguration(format!(
            "setting {} is not a boolean: {:?}",
            key, raw
        ))),
    }
}

async fn value_or_default(
    store: &dyn SettingsStore,
    key: &str,
    fallback: &str,
) -> LedgerResult<String> {
    Ok(match store.get(key).await? {
        Some(v) => v,
        None => keys::default_for(key).unwrap_or(fallback).to_string(),
    })
}

/// In-process settings for tests and single-node deployments
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: RwLock<HashMap<String, String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(pairs: &[(&str, &str)]) -> Self {
        let settings = Self::new();
        for (k, v) in pairs {
            settings.set(k, v);
        }
        settings
    }

    pub fn set(&self, key: &str, value: &str) {
        if let Ok(mut values) = self.values.write() {
            values.insert(key.to_string(), value.to_string());
        }
    }
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn get(&self, key: &str) -> LedgerResult<Option<String>> {
        let values = self
            .values
            .read()
            .map_err(|_| LedgerError::Unavailable("settings lock poisoned".into()))?;
        Ok(values.get(key).cloned())
    }
}
