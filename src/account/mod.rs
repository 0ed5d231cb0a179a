//! Account management module
//!
//! Balances and the atomic primitives that move them.

pub mod ledger;
pub mod models;

pub use ledger::{AccountLedger, DEFAULT_CURRENCY, TransferOutcome};
pub use models::{Account, AccountId, validate_currency};
