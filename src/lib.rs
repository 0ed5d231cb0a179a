//! payledger - Custodial P2P Payment Ledger
//!
//! Account balances, peer payments and the withdrawal lifecycle, with every
//! balance change committed atomically together with the records that
//! describe it.
//!
//! # Modules
//!
//! - [`money`] - Decimal amounts, parsing and rounding
//! - [`error`] - Ledger error taxonomy
//! - [`actor`] - Caller identity threaded through every mutation
//! - [`settings`] - Fee settings and the derived fee schedule
//! - [`fee`] - Transfer and withdrawal fee calculation
//! - [`store`] - Atomic unit of work (in-memory and PostgreSQL)
//! - [`account`] - Accounts and the credit/debit/transfer primitives
//! - [`transaction`] - Transaction records and the recorder
//! - [`payment`] - Payments, requests and admin adjustments
//! - [`withdrawal`] - Withdrawal state machine
//! - [`notify`] - Post-commit notifications
//! - [`engine`] - Wiring

// Core types - must be first!
pub mod error;
pub mod money;

pub mod actor;
pub mod settings;

// Ledger components
pub mod account;
pub mod fee;
pub mod payment;
pub mod store;
pub mod transaction;
pub mod withdrawal;

pub mod notify;

// Service plumbing
pub mod config;
pub mod db;
pub mod engine;
pub mod logging;

// Convenient re-exports at crate root
pub use account::{Account, AccountId, AccountLedger, TransferOutcome};
pub use actor::Actor;
pub use engine::LedgerEngine;
pub use error::{LedgerError, LedgerResult};
pub use fee::{FeeBreakdown, FeeCalculator, TransferSplit};
pub use notify::{LogNotifier, Notifier};
pub use payment::{PaymentReceipt, PaymentService};
pub use settings::{FeeSchedule, MemorySettings, SettingsStore};
pub use store::{LedgerStore, MemoryStore, PgStore, StoreTx};
pub use transaction::{
    Transaction, TransactionRecorder, TransactionStatus, TransactionType,
};
pub use withdrawal::{
    Destination, Withdrawal, WithdrawalFilter, WithdrawalMethod, WithdrawalService,
    WithdrawalStats, WithdrawalStatus, WithdrawalUpdate,
};
