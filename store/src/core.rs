// core.rs
//
// Core types for the tool crib store.
// Contains the persisted records, identifiers, the append-only ledger entry
// shape, and the `LedgerStore` trait implemented by all backends.

use std::fmt::{Display, Formatter, Write};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

// ============================================================================
// PART 1: Identifiers
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ToolId(pub String);

impl ToolId {
    pub fn new() -> Self {
        let mut rng = rand::rng();
        let mut bytes = [0u8; 20];
        rng.fill_bytes(&mut bytes);
        let mut hex_string = String::with_capacity(40);
        for b in &bytes {
            // Writing to a String is infallible; discard the always-Ok result.
            let _ = write!(hex_string, "{b:02x}");
        }
        Self(format!("tool_{hex_string}"))
    }
}

impl Default for ToolId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for ToolId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ToolId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Display for ToolId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Owner identifier. Owners are created by the (out-of-scope) machine and
/// personnel catalogs, so there is no generator here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct OwnerId(pub String);

impl From<String> for OwnerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for OwnerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Display for OwnerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one physical tool unit while it is out of the depot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for InstanceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for InstanceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Display for InstanceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ledger entry identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub String);

impl EntryId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for EntryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// PART 2: Catalog and owner records
// ============================================================================

/// Catalog row for one tool type. `total_stock` is the depot-available count
/// and is mutated only through [`LedgerStore::commit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRecord {
    pub id: ToolId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_code: Option<String>,
    pub category: String,
    pub total_stock: u32,
    pub critical_stock: u32,
    /// Bumped by the store on every committed write; carried back by readers
    /// for optimistic concurrency.
    pub version: u64,
}

impl ToolRecord {
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        total_stock: u32,
        critical_stock: u32,
    ) -> Self {
        Self {
            id: ToolId::new(),
            name: name.into(),
            product_code: None,
            category: category.into(),
            total_stock,
            critical_stock,
            version: 0,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<ToolId>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn with_product_code(mut self, code: impl Into<String>) -> Self {
        self.product_code = Some(code.into());
        self
    }

    pub fn is_critical(&self) -> bool {
        self.total_stock <= self.critical_stock
    }
}

/// Kind of holder an owner record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerKind {
    Machine,
    Person,
}

/// One physical unit currently out of the depot. The denormalized
/// `tool_name`/`product_code` are a snapshot taken at issue time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInstance {
    pub instance_id: InstanceId,
    pub tool_id: ToolId,
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_code: Option<String>,
    pub given_date: DateTime<Utc>,
    pub given_by: String,
    pub received_by: String,
    /// Display name of the prior owner; set only by Transfer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transferred_from: Option<String>,
}

/// A machine or person together with its ordered current holdings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnerRecord {
    pub id: OwnerId,
    pub name: String,
    pub kind: OwnerKind,
    pub holdings: Vec<ToolInstance>,
    pub version: u64,
}

impl OwnerRecord {
    pub fn new(id: impl Into<OwnerId>, name: impl Into<String>, kind: OwnerKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            holdings: Vec::new(),
            version: 0,
        }
    }

    pub fn holds(&self, instance_id: &InstanceId) -> bool {
        self.holdings.iter().any(|i| &i.instance_id == instance_id)
    }

    pub fn position_of(&self, instance_id: &InstanceId) -> Option<usize> {
        self.holdings
            .iter()
            .position(|i| &i.instance_id == instance_id)
    }
}

// ============================================================================
// PART 3: Ledger entries
// ============================================================================

/// Kind of state change an entry records. Serialized as the historical wire
/// strings (`ISSUE`, `RETURN_SCRAP_DAMAGE`, ...). `ReturnScrap` is the legacy
/// undifferentiated scrap kind found in logs predating the wear/damage split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    Issue,
    Transfer,
    ReturnHealthy,
    ReturnScrapDamage,
    ReturnScrapWear,
    ReturnScrap,
    StockEntry,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Issue => "ISSUE",
            EntryKind::Transfer => "TRANSFER",
            EntryKind::ReturnHealthy => "RETURN_HEALTHY",
            EntryKind::ReturnScrapDamage => "RETURN_SCRAP_DAMAGE",
            EntryKind::ReturnScrapWear => "RETURN_SCRAP_WEAR",
            EntryKind::ReturnScrap => "RETURN_SCRAP",
            EntryKind::StockEntry => "STOCK_ENTRY",
        }
    }

    /// True for every kind that permanently retires a unit.
    pub fn is_scrap(&self) -> bool {
        matches!(
            self,
            EntryKind::ReturnScrapDamage | EntryKind::ReturnScrapWear | EntryKind::ReturnScrap
        )
    }
}

impl Display for EntryKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable audit record. Appended exactly once per state change, never
/// updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub tool_name: String,
    pub quantity: u32,
    /// Holding owner for issues and returns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_name: Option<String>,
    /// Source owner; transfers only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_owner: Option<String>,
    /// Target owner; transfers only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_owner: Option<String>,
    /// Actor performing the action.
    pub user: String,
    /// Person of record holding the unit(s).
    pub receiver: String,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl LedgerEntry {
    pub fn new(
        kind: EntryKind,
        tool_name: impl Into<String>,
        quantity: u32,
        user: impl Into<String>,
        receiver: impl Into<String>,
    ) -> Self {
        Self {
            id: EntryId::new(),
            kind,
            tool_name: tool_name.into(),
            quantity,
            owner_name: None,
            from_owner: None,
            to_owner: None,
            user: user.into(),
            receiver: receiver.into(),
            date: Utc::now(),
            notes: None,
        }
    }

    #[must_use]
    pub fn with_owner(mut self, owner_name: impl Into<String>) -> Self {
        self.owner_name = Some(owner_name.into());
        self
    }

    #[must_use]
    pub fn with_route(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.from_owner = Some(from.into());
        self.to_owner = Some(to.into());
        self
    }

    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    #[must_use]
    pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
        self.date = date;
        self
    }

    /// Whether the entry names the given owner as holder, source, or target.
    pub fn involves(&self, owner_name: &str) -> bool {
        self.owner_name.as_deref() == Some(owner_name)
            || self.from_owner.as_deref() == Some(owner_name)
            || self.to_owner.as_deref() == Some(owner_name)
    }
}

// ============================================================================
// PART 4: Query filters
// ============================================================================

/// Inclusive date window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// Whole calendar year, midnight January 1 through 23:59:59 December 31.
    pub fn year(year: i32) -> Self {
        let from = Utc
            .with_ymd_and_hms(year, 1, 1, 0, 0, 0)
            .single()
            .expect("start of year is a valid timestamp");
        let to = Utc
            .with_ymd_and_hms(year, 12, 31, 23, 59, 59)
            .single()
            .expect("end of year is a valid timestamp");
        Self { from, to }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.from && at <= self.to
    }
}

/// Filter for ledger entry scans. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryFilter {
    /// Owner display name that must appear as holder, source, or target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub involving: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<EntryKind>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<DateRange>,
}

impl EntryFilter {
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn involving(mut self, owner_name: impl Into<String>) -> Self {
        self.involving = Some(owner_name.into());
        self
    }

    #[must_use]
    pub fn kinds(mut self, kinds: impl Into<Vec<EntryKind>>) -> Self {
        self.kinds = Some(kinds.into());
        self
    }

    #[must_use]
    pub fn tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    #[must_use]
    pub fn within(mut self, range: DateRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        if let Some(owner) = &self.involving {
            if !entry.involves(owner) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&entry.kind) {
                return false;
            }
        }
        if let Some(tool) = &self.tool_name {
            if &entry.tool_name != tool {
                return false;
            }
        }
        if let Some(range) = &self.range {
            if !range.contains(entry.date) {
                return false;
            }
        }
        true
    }
}

// ============================================================================
// PART 5: Commit batches and the store trait
// ============================================================================

/// One atomic write: versioned catalog/owner upserts plus appended entries.
///
/// Tool and owner records carry the `version` the caller read them at; the
/// store rejects the whole batch with [`StoreError::VersionConflict`] if any
/// record has since moved on, and bumps every written version on success.
#[derive(Debug, Clone, Default)]
pub struct CommitBatch {
    pub tools: Vec<ToolRecord>,
    pub owners: Vec<OwnerRecord>,
    pub entries: Vec<LedgerEntry>,
}

impl CommitBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_tool(&mut self, record: ToolRecord) {
        self.tools.push(record);
    }

    pub fn push_owner(&mut self, record: OwnerRecord) {
        self.owners.push(record);
    }

    pub fn push_entry(&mut self, entry: LedgerEntry) {
        self.entries.push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty() && self.owners.is_empty() && self.entries.is_empty()
    }
}

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Owner not found: {0}")]
    OwnerNotFound(String),

    #[error("Version conflict on {collection} '{key}'")]
    VersionConflict {
        collection: &'static str,
        key: String,
    },

    #[error("Storage error: {0}")]
    Backend(String),
}

/// Trait describing the storage interface for the tool crib ledger.
///
/// `put_tool`/`put_owner` are the shims the out-of-scope catalog CRUD calls;
/// they overwrite unconditionally. All assignment mutations go through
/// `commit`, which applies everything in the batch or nothing.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    async fn get_tool(&self, id: &ToolId) -> StoreResult<Option<ToolRecord>>;

    async fn list_tools(&self) -> StoreResult<Vec<ToolRecord>>;

    async fn put_tool(&self, record: ToolRecord) -> StoreResult<()>;

    async fn get_owner(&self, id: &OwnerId) -> StoreResult<Option<OwnerRecord>>;

    async fn list_owners(&self) -> StoreResult<Vec<OwnerRecord>>;

    async fn put_owner(&self, record: OwnerRecord) -> StoreResult<()>;

    /// Ledger entries matching the filter, ordered by event date ascending.
    async fn entries(&self, filter: EntryFilter) -> StoreResult<Vec<LedgerEntry>>;

    /// Apply the batch atomically, or nothing at all on version conflict.
    async fn commit(&self, batch: CommitBatch) -> StoreResult<()>;
}
