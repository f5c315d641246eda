//! Data model and storage backends for the tool crib ledger.
//!
//! Three persisted collections:
//! - Tools (catalog rows with the depot stock counter)
//! - Owners (machines and personnel with their current holdings)
//! - Ledger entries (append-only audit trail)
//!
//! All three are written through a single [`CommitBatch`] so that every
//! assignment operation is atomic with respect to concurrent callers.

mod core;
mod memory;

pub use crate::core::{
    CommitBatch, DateRange, EntryFilter, EntryId, EntryKind, InstanceId, LedgerEntry, LedgerStore,
    OwnerId, OwnerKind, OwnerRecord, StoreError, StoreResult, ToolId, ToolInstance, ToolRecord,
};

pub use crate::memory::MemoryLedgerStore;
