//! In-memory store backend.
//!
//! Reference backend used by tests and single-process deployments. A single
//! `RwLock` guards all three collections, so a commit validates every
//! expected version and applies every write under one critical section.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use super::core::{
    CommitBatch, EntryFilter, LedgerEntry, LedgerStore, OwnerId, OwnerRecord, StoreError,
    StoreResult, ToolId, ToolRecord,
};

#[derive(Debug, Default)]
struct Inner {
    tools: HashMap<ToolId, ToolRecord>,
    owners: HashMap<OwnerId, OwnerRecord>,
    entries: Vec<LedgerEntry>,
}

/// In-memory implementation of [`LedgerStore`].
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    inner: RwLock<Inner>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn get_tool(&self, id: &ToolId) -> StoreResult<Option<ToolRecord>> {
        Ok(self.inner.read().tools.get(id).cloned())
    }

    async fn list_tools(&self) -> StoreResult<Vec<ToolRecord>> {
        let inner = self.inner.read();
        let mut tools: Vec<ToolRecord> = inner.tools.values().cloned().collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tools)
    }

    async fn put_tool(&self, record: ToolRecord) -> StoreResult<()> {
        self.inner.write().tools.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get_owner(&self, id: &OwnerId) -> StoreResult<Option<OwnerRecord>> {
        Ok(self.inner.read().owners.get(id).cloned())
    }

    async fn list_owners(&self) -> StoreResult<Vec<OwnerRecord>> {
        let inner = self.inner.read();
        let mut owners: Vec<OwnerRecord> = inner.owners.values().cloned().collect();
        owners.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(owners)
    }

    async fn put_owner(&self, record: OwnerRecord) -> StoreResult<()> {
        self.inner.write().owners.insert(record.id.clone(), record);
        Ok(())
    }

    async fn entries(&self, filter: EntryFilter) -> StoreResult<Vec<LedgerEntry>> {
        let inner = self.inner.read();
        let mut matched: Vec<LedgerEntry> = inner
            .entries
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        matched.sort_by_key(|e| e.date);
        Ok(matched)
    }

    async fn commit(&self, batch: CommitBatch) -> StoreResult<()> {
        let mut inner = self.inner.write();

        // Validate every expected version before applying anything.
        for tool in &batch.tools {
            let current = inner
                .tools
                .get(&tool.id)
                .ok_or_else(|| StoreError::ToolNotFound(tool.id.to_string()))?;
            if current.version != tool.version {
                return Err(StoreError::VersionConflict {
                    collection: "tools",
                    key: tool.id.to_string(),
                });
            }
        }
        for owner in &batch.owners {
            let current = inner
                .owners
                .get(&owner.id)
                .ok_or_else(|| StoreError::OwnerNotFound(owner.id.to_string()))?;
            if current.version != owner.version {
                return Err(StoreError::VersionConflict {
                    collection: "owners",
                    key: owner.id.to_string(),
                });
            }
        }

        debug!(
            tools = batch.tools.len(),
            owners = batch.owners.len(),
            entries = batch.entries.len(),
            "committing ledger batch"
        );

        for mut tool in batch.tools {
            tool.version += 1;
            inner.tools.insert(tool.id.clone(), tool);
        }
        for mut owner in batch.owners {
            owner.version += 1;
            inner.owners.insert(owner.id.clone(), owner);
        }
        inner.entries.extend(batch.entries);

        Ok(())
    }
}
