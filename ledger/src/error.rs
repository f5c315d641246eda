//! Ledger error types.
//!
//! Every assignment operation returns a typed failure recovered at the call
//! boundary; none of these are fatal to the process.

use thiserror::Error;

use crib_store::StoreError;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The requested quantity exceeds what the depot holds. The whole
    /// multi-item request is rejected, never partially applied.
    #[error("Insufficient stock for '{tool_name}': requested {requested}, available {available}")]
    InsufficientStock {
        tool_name: String,
        requested: u32,
        available: u32,
    },

    /// The instance is no longer at the claimed owner, typically because a
    /// concurrent operation already moved it. Refresh and retry.
    #[error("Tool instance not found: {0}")]
    InstanceNotFound(String),

    /// A required person receiver is missing or does not resolve to a person.
    #[error("Invalid receiver: {0}")]
    InvalidReceiver(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Optimistic-concurrency contention persisted past the retry budget.
    #[error("Commit conflict after {attempts} attempts")]
    Conflict { attempts: usize },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
