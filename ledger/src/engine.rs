//! Assignment engine.
//!
//! Implements Issue, Transfer, Return, and Stock-Entry as compound operations
//! over the catalog, the owner registry, and the audit log. Each operation
//! reads the records it needs, validates, and writes one [`CommitBatch`]; the
//! store rejects the batch if any record moved underneath, and the engine
//! retries with fresh reads up to a bounded attempt budget. Business-rule
//! failures are never retried.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crib_store::{
    CommitBatch, EntryFilter, EntryKind, InstanceId, LedgerEntry, LedgerStore, OwnerId, OwnerKind,
    OwnerRecord, StoreError, ToolId, ToolInstance, ToolRecord,
};

use crate::error::{LedgerError, LedgerResult};

const DEFAULT_MAX_COMMIT_ATTEMPTS: usize = 4;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Commit attempts per operation before surfacing [`LedgerError::Conflict`].
    pub max_commit_attempts: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_commit_attempts: DEFAULT_MAX_COMMIT_ATTEMPTS,
        }
    }
}

/// How a unit comes back to the depot. Wear is expected end-of-life and stays
/// off the operator's record; damage counts against the responsible operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Disposition {
    Healthy,
    ScrapWear,
    ScrapDamage,
}

impl Disposition {
    pub fn entry_kind(&self) -> EntryKind {
        match self {
            Disposition::Healthy => EntryKind::ReturnHealthy,
            Disposition::ScrapWear => EntryKind::ReturnScrapWear,
            Disposition::ScrapDamage => EntryKind::ReturnScrapDamage,
        }
    }
}

/// One line of a (possibly multi-tool) issue request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueItem {
    pub tool_id: ToolId,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueRequest {
    pub owner_id: OwnerId,
    pub items: Vec<IssueItem>,
    /// Person of record. Defaults to the owner when the owner is a person;
    /// required when issuing to a machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<OwnerId>,
    pub issued_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssueReceipt {
    pub owner_id: OwnerId,
    pub receiver: String,
    pub instances: Vec<ToolInstance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub source_owner_id: OwnerId,
    pub instance_id: InstanceId,
    pub target_owner_id: OwnerId,
    /// Required when the target is a machine; ignored when the target is a
    /// person (the receiver is that person).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<OwnerId>,
    pub moved_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnRequest {
    pub owner_id: OwnerId,
    pub instance_id: InstanceId,
    pub disposition: Disposition,
    pub returned_by: String,
    /// Scrap reason collected at return time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Depot replenishment. Owned by the external stock intake flow; recorded
/// here so analytics can count the added mass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockEntryRequest {
    pub tool_id: ToolId,
    pub quantity: u32,
    pub entered_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// The assignment engine. Cheap to clone; all state lives behind the store.
#[derive(Clone)]
pub struct AssignmentEngine {
    store: Arc<dyn LedgerStore>,
    config: EngineConfig,
}

impl AssignmentEngine {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: Arc<dyn LedgerStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Issue units from the depot to an owner. All items succeed together or
    /// the whole request is rejected.
    pub async fn issue(&self, req: IssueRequest) -> LedgerResult<IssueReceipt> {
        if req.items.is_empty() {
            return Err(LedgerError::Validation(
                "at least one tool must be selected".to_string(),
            ));
        }
        if let Some(item) = req.items.iter().find(|i| i.quantity == 0) {
            return Err(LedgerError::Validation(format!(
                "quantity for tool '{}' must be positive",
                item.tool_id
            )));
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.try_issue(&req).await {
                Ok(receipt) => {
                    debug!(
                        owner = %req.owner_id,
                        receiver = %receipt.receiver,
                        instances = receipt.instances.len(),
                        "issued tools"
                    );
                    return Ok(receipt);
                }
                Err(LedgerError::Store(StoreError::VersionConflict { collection, key }))
                    if attempts < self.config.max_commit_attempts =>
                {
                    warn!(attempt = attempts, collection, key = %key, "issue conflicted, retrying");
                }
                Err(LedgerError::Store(StoreError::VersionConflict { .. })) => {
                    return Err(LedgerError::Conflict { attempts });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Move one instance between owners. The catalog is untouched and the
    /// instance keeps its id.
    pub async fn transfer(&self, req: TransferRequest) -> LedgerResult<ToolInstance> {
        if req.source_owner_id == req.target_owner_id {
            return Err(LedgerError::Validation(
                "transfer source and target must differ".to_string(),
            ));
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.try_transfer(&req).await {
                Ok(instance) => {
                    debug!(
                        instance = %instance.instance_id,
                        from = %req.source_owner_id,
                        to = %req.target_owner_id,
                        "transferred instance"
                    );
                    return Ok(instance);
                }
                Err(LedgerError::Store(StoreError::VersionConflict { collection, key }))
                    if attempts < self.config.max_commit_attempts =>
                {
                    warn!(attempt = attempts, collection, key = %key, "transfer conflicted, retrying");
                }
                Err(LedgerError::Store(StoreError::VersionConflict { .. })) => {
                    return Err(LedgerError::Conflict { attempts });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Take one instance back from an owner. Healthy returns restock the
    /// depot; scrap returns retire the unit permanently.
    pub async fn return_instance(&self, req: ReturnRequest) -> LedgerResult<ToolInstance> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.try_return(&req).await {
                Ok(instance) => {
                    debug!(
                        instance = %instance.instance_id,
                        owner = %req.owner_id,
                        disposition = ?req.disposition,
                        "returned instance"
                    );
                    return Ok(instance);
                }
                Err(LedgerError::Store(StoreError::VersionConflict { collection, key }))
                    if attempts < self.config.max_commit_attempts =>
                {
                    warn!(attempt = attempts, collection, key = %key, "return conflicted, retrying");
                }
                Err(LedgerError::Store(StoreError::VersionConflict { .. })) => {
                    return Err(LedgerError::Conflict { attempts });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Record a depot replenishment.
    pub async fn stock_entry(&self, req: StockEntryRequest) -> LedgerResult<()> {
        if req.quantity == 0 {
            return Err(LedgerError::Validation(
                "stock entry quantity must be positive".to_string(),
            ));
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.try_stock_entry(&req).await {
                Ok(()) => {
                    debug!(tool = %req.tool_id, quantity = req.quantity, "recorded stock entry");
                    return Ok(());
                }
                Err(LedgerError::Store(StoreError::VersionConflict { collection, key }))
                    if attempts < self.config.max_commit_attempts =>
                {
                    warn!(attempt = attempts, collection, key = %key, "stock entry conflicted, retrying");
                }
                Err(LedgerError::Store(StoreError::VersionConflict { .. })) => {
                    return Err(LedgerError::Conflict { attempts });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Current holdings of an owner, read from the registry (never
    /// reconstructed from the log).
    pub async fn current_holdings(&self, owner_id: &OwnerId) -> LedgerResult<Vec<ToolInstance>> {
        let owner = self.fetch_owner(owner_id).await?;
        Ok(owner.holdings)
    }

    /// Every ledger entry naming the owner as holder, source, or target,
    /// date ascending.
    pub async fn owner_history(&self, owner_id: &OwnerId) -> LedgerResult<Vec<LedgerEntry>> {
        let owner = self.fetch_owner(owner_id).await?;
        Ok(self
            .store
            .entries(EntryFilter::all().involving(owner.name))
            .await?)
    }

    async fn fetch_owner(&self, owner_id: &OwnerId) -> LedgerResult<OwnerRecord> {
        let owner = self
            .store
            .get_owner(owner_id)
            .await?
            .ok_or_else(|| StoreError::OwnerNotFound(owner_id.to_string()))?;
        Ok(owner)
    }

    async fn fetch_tool(&self, tool_id: &ToolId) -> LedgerResult<ToolRecord> {
        let tool = self
            .store
            .get_tool(tool_id)
            .await?
            .ok_or_else(|| StoreError::ToolNotFound(tool_id.to_string()))?;
        Ok(tool)
    }

    /// Resolve an explicit receiver id to a known person's display name.
    async fn lookup_person(&self, id: &OwnerId) -> LedgerResult<String> {
        let record = self
            .store
            .get_owner(id)
            .await?
            .ok_or_else(|| LedgerError::InvalidReceiver(format!("unknown receiver: {id}")))?;
        if record.kind != OwnerKind::Person {
            return Err(LedgerError::InvalidReceiver(format!(
                "receiver '{}' is not a person",
                record.name
            )));
        }
        Ok(record.name)
    }

    async fn resolve_receiver(
        &self,
        owner: &OwnerRecord,
        receiver_id: Option<&OwnerId>,
    ) -> LedgerResult<String> {
        match receiver_id {
            Some(id) => self.lookup_person(id).await,
            None if owner.kind == OwnerKind::Person => Ok(owner.name.clone()),
            None => Err(LedgerError::InvalidReceiver(format!(
                "a person receiver is required when issuing to machine '{}'",
                owner.name
            ))),
        }
    }

    async fn try_issue(&self, req: &IssueRequest) -> LedgerResult<IssueReceipt> {
        let mut owner = self.fetch_owner(&req.owner_id).await?;
        let receiver = self.resolve_receiver(&owner, req.receiver_id.as_ref()).await?;
        let now = Utc::now();

        // Each tool is read once even if it appears on several lines, so the
        // batch carries a single versioned write per catalog row.
        let mut tools: Vec<ToolRecord> = Vec::with_capacity(req.items.len());
        let mut entries: Vec<LedgerEntry> = Vec::with_capacity(req.items.len());
        let mut issued: Vec<ToolInstance> = Vec::new();

        for item in &req.items {
            let idx = match tools.iter().position(|t| t.id == item.tool_id) {
                Some(idx) => idx,
                None => {
                    tools.push(self.fetch_tool(&item.tool_id).await?);
                    tools.len() - 1
                }
            };
            let tool = &mut tools[idx];

            if item.quantity > tool.total_stock {
                return Err(LedgerError::InsufficientStock {
                    tool_name: tool.name.clone(),
                    requested: item.quantity,
                    available: tool.total_stock,
                });
            }
            tool.total_stock -= item.quantity;

            for _ in 0..item.quantity {
                let instance = ToolInstance {
                    instance_id: InstanceId::new(),
                    tool_id: tool.id.clone(),
                    tool_name: tool.name.clone(),
                    product_code: tool.product_code.clone(),
                    given_date: now,
                    given_by: req.issued_by.clone(),
                    received_by: receiver.clone(),
                    transferred_from: None,
                };
                owner.holdings.push(instance.clone());
                issued.push(instance);
            }

            let mut entry = LedgerEntry::new(
                EntryKind::Issue,
                &tool.name,
                item.quantity,
                &req.issued_by,
                &receiver,
            )
            .with_owner(&owner.name)
            .with_date(now);
            if let Some(notes) = &req.notes {
                entry = entry.with_notes(notes);
            }
            entries.push(entry);
        }

        let mut batch = CommitBatch::new();
        for tool in tools {
            batch.push_tool(tool);
        }
        batch.push_owner(owner);
        for entry in entries {
            batch.push_entry(entry);
        }
        self.store.commit(batch).await?;

        Ok(IssueReceipt {
            owner_id: req.owner_id.clone(),
            receiver,
            instances: issued,
        })
    }

    async fn try_transfer(&self, req: &TransferRequest) -> LedgerResult<ToolInstance> {
        let mut source = self.fetch_owner(&req.source_owner_id).await?;
        let mut target = self.fetch_owner(&req.target_owner_id).await?;

        let pos = source
            .position_of(&req.instance_id)
            .ok_or_else(|| LedgerError::InstanceNotFound(req.instance_id.to_string()))?;

        let receiver = match target.kind {
            OwnerKind::Person => target.name.clone(),
            OwnerKind::Machine => {
                let id = req.receiver_id.as_ref().ok_or_else(|| {
                    LedgerError::InvalidReceiver(format!(
                        "a person receiver is required when transferring to machine '{}'",
                        target.name
                    ))
                })?;
                self.lookup_person(id).await?
            }
        };

        let now = Utc::now();
        let mut instance = source.holdings.remove(pos);
        instance.given_date = now;
        instance.received_by = receiver.clone();
        instance.transferred_from = Some(source.name.clone());
        target.holdings.push(instance.clone());

        let entry = LedgerEntry::new(
            EntryKind::Transfer,
            &instance.tool_name,
            1,
            &req.moved_by,
            &receiver,
        )
        .with_route(&source.name, &target.name)
        .with_date(now);

        let mut batch = CommitBatch::new();
        batch.push_owner(source);
        batch.push_owner(target);
        batch.push_entry(entry);
        self.store.commit(batch).await?;

        Ok(instance)
    }

    async fn try_return(&self, req: &ReturnRequest) -> LedgerResult<ToolInstance> {
        let mut owner = self.fetch_owner(&req.owner_id).await?;
        let pos = owner
            .position_of(&req.instance_id)
            .ok_or_else(|| LedgerError::InstanceNotFound(req.instance_id.to_string()))?;
        let instance = owner.holdings.remove(pos);
        let now = Utc::now();

        let mut batch = CommitBatch::new();
        if req.disposition == Disposition::Healthy {
            let mut tool = self.fetch_tool(&instance.tool_id).await?;
            tool.total_stock += 1;
            batch.push_tool(tool);
        }

        let mut entry = LedgerEntry::new(
            req.disposition.entry_kind(),
            &instance.tool_name,
            1,
            &req.returned_by,
            &instance.received_by,
        )
        .with_owner(&owner.name)
        .with_date(now);
        if let Some(note) = &req.note {
            entry = entry.with_notes(note);
        }

        batch.push_owner(owner);
        batch.push_entry(entry);
        self.store.commit(batch).await?;

        Ok(instance)
    }

    async fn try_stock_entry(&self, req: &StockEntryRequest) -> LedgerResult<()> {
        let mut tool = self.fetch_tool(&req.tool_id).await?;
        tool.total_stock += req.quantity;

        let mut entry = LedgerEntry::new(
            EntryKind::StockEntry,
            &tool.name,
            req.quantity,
            &req.entered_by,
            &req.entered_by,
        );
        if let Some(note) = &req.note {
            entry = entry.with_notes(note);
        }

        let mut batch = CommitBatch::new();
        batch.push_tool(tool);
        batch.push_entry(entry);
        self.store.commit(batch).await?;

        Ok(())
    }
}
