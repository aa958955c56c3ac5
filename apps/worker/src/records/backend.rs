use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::errors::Result;
use crate::records::model::{EntryStatus, StoredRow};

/// How rows of a partition are selected by sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortKeyCondition {
    Equals(String),
    BeginsWith(String),
}

impl SortKeyCondition {
    pub fn matches(&self, sort_key: &str) -> bool {
        match self {
            SortKeyCondition::Equals(key) => sort_key == key,
            SortKeyCondition::BeginsWith(prefix) => sort_key.starts_with(prefix.as_str()),
        }
    }
}

/// In-place changes to the live row, applied only while its version still matches.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveRowUpdate {
    pub partition_key: String,
    pub sort_key: String,
    pub expected_version: i64,
    pub new_version: i64,
    /// Attribute keys to overwrite (shallow merge).
    pub changes: Map<String, Value>,
    /// `None` leaves the stored value untouched (silent updates).
    pub update_date: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,
    pub entry_status: Option<EntryStatus>,
}

/// Raw row storage for the versioned record table.
///
/// Implementations must offer an atomic multi-row conditional write: the live row's
/// version check, its update and the snapshot insert commit together or not at all.
#[async_trait]
pub trait RecordBackend: Send + Sync {
    /// Rows of one partition whose sort key matches, optionally restricted by status.
    async fn query(
        &self,
        partition_key: &str,
        condition: &SortKeyCondition,
        status: Option<EntryStatus>,
    ) -> Result<Vec<StoredRow>>;

    /// Every row (live and snapshots, any status) of one entity id, lowest version first.
    async fn query_by_entity_id(
        &self,
        partition_key: &str,
        entity_id: &str,
    ) -> Result<Vec<StoredRow>>;

    /// Inserts a row that must not exist yet. Fails with `Conflict` on a duplicate key.
    async fn insert(&self, row: &StoredRow) -> Result<()>;

    /// Unconditional upsert of a whole row.
    async fn put(&self, row: &StoredRow) -> Result<()>;

    /// Overwrites an existing row only while its stored version is `expected_version`.
    /// Fails with `Conflict` when the version moved or the row is missing.
    async fn put_if_version(&self, row: &StoredRow, expected_version: i64) -> Result<()>;

    /// Atomically applies `update` and inserts `snapshot`.
    ///
    /// Fails with `Conflict` when the live row's version no longer equals
    /// `update.expected_version` or the snapshot key is already taken; nothing is
    /// written in that case.
    async fn transact_update(&self, update: &LiveRowUpdate, snapshot: &StoredRow) -> Result<()>;
}
