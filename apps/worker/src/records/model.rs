use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{AppError, Result};

/// Version marker of the live row.
pub const LIVE_VERSION: i64 = 0;

/// Soft-delete flag. Rows are never physically removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    Active,
    Deleted,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Active => "ACTIVE",
            EntryStatus::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ACTIVE" => Ok(EntryStatus::Active),
            "DELETED" => Ok(EntryStatus::Deleted),
            other => Err(AppError::Query(format!("Unknown entry status '{other}'"))),
        }
    }
}

/// Composite sort key `v{version}#{entityId}`.
///
/// `v0#id` is the live row; `v{K}#id` (K ≥ 1) is the snapshot written by the mutation
/// that produced version K.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortKey {
    pub version: i64,
    pub entity_id: String,
}

impl SortKey {
    pub fn live(entity_id: impl Into<String>) -> Self {
        Self {
            version: LIVE_VERSION,
            entity_id: entity_id.into(),
        }
    }

    pub fn snapshot(entity_id: impl Into<String>, version: i64) -> Self {
        Self {
            version,
            entity_id: entity_id.into(),
        }
    }

    pub fn is_live(&self) -> bool {
        self.version == LIVE_VERSION
    }

    /// Range-key prefix shared by every live row of a partition.
    pub fn live_prefix() -> String {
        format!("v{LIVE_VERSION}#")
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}#{}", self.version, self.entity_id)
    }
}

impl FromStr for SortKey {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = || AppError::Query(format!("Malformed sort key '{s}'"));
        let (marker, entity_id) = s.split_once('#').ok_or_else(malformed)?;
        let version = marker
            .strip_prefix('v')
            .and_then(|n| n.parse::<i64>().ok())
            .filter(|n| *n >= 0)
            .ok_or_else(malformed)?;
        if entity_id.is_empty() {
            return Err(malformed());
        }
        Ok(Self {
            version,
            entity_id: entity_id.to_string(),
        })
    }
}

/// An entity schema stored in the versioned record table.
///
/// The entity's fields serialize to a flat JSON object; `Patch` serializes to the subset
/// of those keys a caller wants to change (unset fields must be skipped, not nulled).
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Entity type name; doubles as the partition key of the collection.
    const ENTITY_TYPE: &'static str;

    type Patch: Serialize + Send + Sync;
}

/// Storage-level row: what the backend reads and writes, with entity fields kept as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRow {
    pub partition_key: String,
    pub sort_key: String,
    pub entity_id: String,
    pub latest_version: i64,
    pub entry_status: EntryStatus,
    pub create_date: Option<DateTime<Utc>>,
    pub update_date: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,
    pub attributes: Map<String, Value>,
}

/// Typed view of a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedRecord<T> {
    pub partition_key: String,
    pub sort_key: String,
    pub entity_id: String,
    pub latest_version: i64,
    pub entry_status: EntryStatus,
    pub create_date: Option<DateTime<Utc>>,
    pub update_date: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,
    #[serde(flatten)]
    pub fields: T,
}

impl<T: Entity> VersionedRecord<T> {
    pub fn from_row(row: StoredRow) -> Result<Self> {
        let fields = serde_json::from_value(Value::Object(row.attributes))?;
        Ok(Self {
            partition_key: row.partition_key,
            sort_key: row.sort_key,
            entity_id: row.entity_id,
            latest_version: row.latest_version,
            entry_status: row.entry_status,
            create_date: row.create_date,
            update_date: row.update_date,
            updated_by: row.updated_by,
            fields,
        })
    }

    pub fn to_row(&self) -> Result<StoredRow> {
        Ok(StoredRow {
            partition_key: self.partition_key.clone(),
            sort_key: self.sort_key.clone(),
            entity_id: self.entity_id.clone(),
            latest_version: self.latest_version,
            entry_status: self.entry_status,
            create_date: self.create_date,
            update_date: self.update_date,
            updated_by: self.updated_by.clone(),
            attributes: fields_to_map(&self.fields)?,
        })
    }

    pub fn is_active(&self) -> bool {
        self.entry_status == EntryStatus::Active
    }

    pub fn is_live(&self) -> bool {
        self.sort_key
            .parse::<SortKey>()
            .map(|key| key.is_live())
            .unwrap_or(false)
    }
}

/// Serializes an entity or patch into a flat attribute map.
pub fn fields_to_map<S: Serialize>(fields: &S) -> Result<Map<String, Value>> {
    match serde_json::to_value(fields)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(AppError::Validation(format!(
            "Entity fields must serialize to an object, got {other}"
        ))),
    }
}
