//! Transaction records mirroring ledger movements

pub mod recorder;
pub mod types;

pub use recorder::{REFERENCE_LEN, TransactionRecorder, generate_reference};
pub use types::{Transaction, TransactionDraft, TransactionStatus, TransactionType};
