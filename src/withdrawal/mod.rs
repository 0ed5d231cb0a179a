//! Withdrawal lifecycle
//!
//! Funds are reserved (debited) when the withdrawal is requested. Operators
//! then move it through processing to completion, or fail/cancel it, which
//! refunds the full reserved amount exactly once.

pub mod service;
pub mod state;
pub mod types;

pub use service::{MAX_ADMIN_NOTES_LEN, WithdrawalService};
pub use state::WithdrawalStatus;
pub use types::{
    BankDetails, CryptoDetails, Destination, NewWithdrawal, PaypalDetails, WireDetails,
    Withdrawal, WithdrawalFilter, WithdrawalId, WithdrawalMethod, WithdrawalStats,
    WithdrawalUpdate, net_amount,
};
