use std::marker::PhantomData;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::errors::{AppError, Result};
use crate::records::backend::{LiveRowUpdate, RecordBackend, SortKeyCondition};
use crate::records::diff::diff_fields;
use crate::records::model::{
    fields_to_map, Entity, EntryStatus, SortKey, StoredRow, VersionedRecord, LIVE_VERSION,
};

/// Result of an update call. A proposal equal to the stored state is not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome<T> {
    Updated(VersionedRecord<T>),
    Unchanged(VersionedRecord<T>),
}

impl<T> UpdateOutcome<T> {
    pub fn is_noop(&self) -> bool {
        matches!(self, UpdateOutcome::Unchanged(_))
    }

    pub fn record(&self) -> &VersionedRecord<T> {
        match self {
            UpdateOutcome::Updated(r) | UpdateOutcome::Unchanged(r) => r,
        }
    }

    pub fn into_record(self) -> VersionedRecord<T> {
        match self {
            UpdateOutcome::Updated(r) | UpdateOutcome::Unchanged(r) => r,
        }
    }
}

/// Whether a mutation stamps `updateDate`/`updatedBy` onto the live row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Audit {
    Stamp,
    Silent,
}

/// Repository over one partition of the versioned record table.
///
/// Every mutation first preserves the pre-mutation state as an immutable snapshot row
/// (`v{newVersion}#id`, carrying the old `latestVersion`) and then changes the live row
/// (`v0#id`) in place, bumping `latestVersion` by exactly one.
pub struct RecordStore<T: Entity> {
    backend: Arc<dyn RecordBackend>,
    partition_key: String,
    actor: String,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Clone for RecordStore<T> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            partition_key: self.partition_key.clone(),
            actor: self.actor.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> RecordStore<T> {
    /// Store over the whole collection of `T`, partitioned by its entity type name.
    pub fn new(backend: Arc<dyn RecordBackend>, actor: impl Into<String>) -> Self {
        Self {
            backend,
            partition_key: T::ENTITY_TYPE.to_string(),
            actor: actor.into(),
            _entity: PhantomData,
        }
    }

    /// Store over the sub-collection of `T` owned by `scope` (e.g. one event's registrations).
    pub fn scoped(backend: Arc<dyn RecordBackend>, actor: impl Into<String>, scope: &str) -> Self {
        Self {
            backend,
            partition_key: format!("{}#{}", T::ENTITY_TYPE, scope),
            actor: actor.into(),
            _entity: PhantomData,
        }
    }

    /// Same backend and actor, different scope.
    pub fn rescoped<U: Entity>(&self, scope: &str) -> RecordStore<U> {
        RecordStore::scoped(self.backend.clone(), self.actor.clone(), scope)
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    fn decode(rows: Vec<StoredRow>) -> Result<Vec<VersionedRecord<T>>> {
        rows.into_iter().map(VersionedRecord::from_row).collect()
    }

    /// Writes the live row of a new entity at version 0.
    pub async fn create(&self, entity_id: &str, fields: T) -> Result<VersionedRecord<T>> {
        if entity_id.is_empty() {
            return Err(AppError::Validation(format!(
                "{} id must not be empty",
                T::ENTITY_TYPE
            )));
        }
        let now = Utc::now();
        let record = VersionedRecord {
            partition_key: self.partition_key.clone(),
            sort_key: SortKey::live(entity_id).to_string(),
            entity_id: entity_id.to_string(),
            latest_version: LIVE_VERSION,
            entry_status: EntryStatus::Active,
            create_date: Some(now),
            update_date: Some(now),
            updated_by: Some(self.actor.clone()),
            fields,
        };

        self.backend.insert(&record.to_row()?).await.map_err(|e| {
            error!("[{}={entity_id}] Failed to create: {e}", T::ENTITY_TYPE);
            match e {
                AppError::Conflict(_) => AppError::Conflict(format!(
                    "{} with ID={entity_id} already exists",
                    T::ENTITY_TYPE
                )),
                other => other,
            }
        })?;

        info!("[{}={entity_id}] Create {} data successful", T::ENTITY_TYPE, T::ENTITY_TYPE);
        Ok(record)
    }

    /// All live rows of the partition. An empty result is `NotFound`.
    pub async fn query_all(&self, only_active: bool) -> Result<Vec<VersionedRecord<T>>> {
        let status = only_active.then_some(EntryStatus::Active);
        let rows = self
            .backend
            .query(
                &self.partition_key,
                &SortKeyCondition::BeginsWith(SortKey::live_prefix()),
                status,
            )
            .await
            .map_err(|e| {
                error!("[{}] Failed to query: {e}", self.partition_key);
                e
            })?;

        if rows.is_empty() {
            let message = format!("No {} entries found", T::ENTITY_TYPE);
            error!("[{}] {message}", self.partition_key);
            return Err(AppError::NotFound(message));
        }

        info!("[{}] Fetch {} data successful", self.partition_key, T::ENTITY_TYPE);
        Self::decode(rows)
    }

    /// The active live row of `entity_id`.
    pub async fn query_one(&self, entity_id: &str) -> Result<VersionedRecord<T>> {
        self.fetch_live(entity_id, Some(EntryStatus::Active)).await
    }

    /// The live row of `entity_id` whatever its entry status.
    pub async fn query_one_any_status(&self, entity_id: &str) -> Result<VersionedRecord<T>> {
        self.fetch_live(entity_id, None).await
    }

    async fn fetch_live(
        &self,
        entity_id: &str,
        status: Option<EntryStatus>,
    ) -> Result<VersionedRecord<T>> {
        let condition = SortKeyCondition::Equals(SortKey::live(entity_id).to_string());
        let rows = self
            .backend
            .query(&self.partition_key, &condition, status)
            .await
            .map_err(|e| {
                error!("[{}={entity_id}] Failed to query: {e}", T::ENTITY_TYPE);
                e
            })?;

        let Some(row) = rows.into_iter().next() else {
            let message = format!("{} with ID={entity_id} not found", T::ENTITY_TYPE);
            error!("[{}={entity_id}] {message}", T::ENTITY_TYPE);
            return Err(AppError::NotFound(message));
        };

        VersionedRecord::from_row(row)
    }

    /// Every row ever written for `entity_id` (live row and snapshots, any status),
    /// lowest `latestVersion` first.
    pub async fn history(&self, entity_id: &str) -> Result<Vec<VersionedRecord<T>>> {
        let rows = self
            .backend
            .query_by_entity_id(&self.partition_key, entity_id)
            .await?;
        if rows.is_empty() {
            return Err(AppError::NotFound(format!(
                "{} with ID={entity_id} not found",
                T::ENTITY_TYPE
            )));
        }
        Self::decode(rows)
    }

    /// Applies `patch` to the live row, stamping audit metadata.
    ///
    /// A stale `existing` fails with `Conflict`; re-read and retry. A record left behind
    /// by an interrupted [`soft_delete`](Self::soft_delete) fails with `DeletePending`.
    pub async fn update(
        &self,
        existing: &VersionedRecord<T>,
        patch: &T::Patch,
    ) -> Result<UpdateOutcome<T>> {
        self.apply_update(existing, patch, Audit::Stamp).await
    }

    /// Same diff-and-write as [`update`](Self::update) without touching `updateDate` or
    /// `updatedBy` on the live row. Used for system-driven writes such as attaching
    /// generated artifacts.
    pub async fn update_silent(
        &self,
        existing: &VersionedRecord<T>,
        patch: &T::Patch,
    ) -> Result<UpdateOutcome<T>> {
        self.apply_update(existing, patch, Audit::Silent).await
    }

    fn ensure_live(&self, existing: &VersionedRecord<T>) -> Result<SortKey> {
        if existing.partition_key != self.partition_key {
            return Err(AppError::Validation(format!(
                "Record {} belongs to partition {}, not {}",
                existing.sort_key, existing.partition_key, self.partition_key
            )));
        }
        let key: SortKey = existing.sort_key.parse()?;
        if !key.is_live() {
            return Err(AppError::Validation(format!(
                "Historical snapshot {} is immutable",
                existing.sort_key
            )));
        }
        Ok(key)
    }

    /// Pre-mutation copy of `existing`, keyed by the version the mutation produces.
    fn snapshot_of(&self, existing: &VersionedRecord<T>, new_version: i64) -> Result<StoredRow> {
        let mut snapshot = existing.to_row()?;
        snapshot.sort_key = SortKey::snapshot(&existing.entity_id, new_version).to_string();
        snapshot.latest_version = existing.latest_version;
        snapshot.updated_by = existing
            .updated_by
            .clone()
            .or_else(|| Some(self.actor.clone()));
        Ok(snapshot)
    }

    async fn apply_update(
        &self,
        existing: &VersionedRecord<T>,
        patch: &T::Patch,
        audit: Audit,
    ) -> Result<UpdateOutcome<T>> {
        let key = self.ensure_live(existing)?;

        let current = fields_to_map(&existing.fields)?;
        let proposed = fields_to_map(patch)?;
        let diff = diff_fields(&current, &proposed);
        if !diff.has_update {
            info!("[{}] No update", existing.sort_key);
            return Ok(UpdateOutcome::Unchanged(existing.clone()));
        }

        // Reject patches that would not decode back into the entity before writing.
        let mut merged = current;
        merged.extend(diff.changes.clone());
        serde_json::from_value::<T>(serde_json::Value::Object(merged)).map_err(|e| {
            AppError::Validation(format!("Invalid {} update: {e}", T::ENTITY_TYPE))
        })?;

        let current_version = existing.latest_version;
        let new_version = current_version + 1;
        let stamp = audit == Audit::Stamp;

        let update = LiveRowUpdate {
            partition_key: self.partition_key.clone(),
            sort_key: existing.sort_key.clone(),
            expected_version: current_version,
            new_version,
            changes: diff.changes,
            update_date: stamp.then(Utc::now),
            updated_by: stamp.then(|| self.actor.clone()),
            entry_status: None,
        };
        let snapshot = self.snapshot_of(existing, new_version)?;

        if let Err(e) = self.backend.transact_update(&update, &snapshot).await {
            let e = match e {
                AppError::Conflict(reason) => self.explain_conflict(existing, new_version, reason).await,
                other => other,
            };
            error!(
                "[{}] Failed to update {} data: {e}",
                existing.sort_key,
                T::ENTITY_TYPE
            );
            return Err(e);
        }

        let refreshed = self.fetch_live(&key.entity_id, None).await?;
        info!(
            "[{}] Update {} data successful (v{current_version} -> v{new_version})",
            existing.sort_key,
            T::ENTITY_TYPE
        );
        Ok(UpdateOutcome::Updated(refreshed))
    }

    /// A rejected update whose snapshot key is taken while the live row has not moved
    /// ran into an interrupted delete, which no amount of retrying resolves.
    async fn explain_conflict(
        &self,
        existing: &VersionedRecord<T>,
        new_version: i64,
        reason: String,
    ) -> AppError {
        let snapshot_key = SortKey::snapshot(&existing.entity_id, new_version).to_string();
        let snapshot_taken = self
            .backend
            .query(&self.partition_key, &SortKeyCondition::Equals(snapshot_key), None)
            .await
            .map(|rows| !rows.is_empty())
            .unwrap_or(false);
        if !snapshot_taken {
            return AppError::Conflict(reason);
        }

        match self.fetch_live(&existing.entity_id, None).await {
            Ok(live) if live.latest_version == existing.latest_version && live.is_active() => {
                AppError::DeletePending(format!(
                    "{} has snapshot v{new_version} but its live row is still at v{}; \
                     repeat the delete",
                    existing.sort_key, existing.latest_version
                ))
            }
            _ => AppError::Conflict(reason),
        }
    }

    /// Marks the live row DELETED after preserving it as a snapshot.
    ///
    /// The live row is re-read first and `existing` must still match its version, so a
    /// stale copy cannot overwrite a newer update; a mismatch is `Conflict`. The live-row
    /// write is conditional on that version as well.
    ///
    /// The two writes are not atomic. A failure after the snapshot write leaves the live
    /// row ACTIVE with a snapshot already at `v{version+1}`. Until the delete is repeated,
    /// updates of that record fail with `DeletePending`; calling this again with the same
    /// record rewrites the identical snapshot and completes the delete. Deleting an
    /// already deleted row is a no-op.
    pub async fn soft_delete(&self, existing: &VersionedRecord<T>) -> Result<()> {
        let key = self.ensure_live(existing)?;

        if !existing.is_active() {
            warn!("[{}] Already deleted", existing.sort_key);
            return Ok(());
        }

        let stored = self.fetch_live(&key.entity_id, None).await?;
        if !stored.is_active() {
            warn!("[{}] Already deleted", existing.sort_key);
            return Ok(());
        }
        if stored.latest_version != existing.latest_version {
            let message = format!(
                "Record {} is at version {}, not {}",
                existing.sort_key, stored.latest_version, existing.latest_version
            );
            error!("[{}] Failed to delete {} data: {message}", existing.sort_key, T::ENTITY_TYPE);
            return Err(AppError::Conflict(message));
        }

        let current_version = existing.latest_version;
        let new_version = current_version + 1;

        let snapshot = self.snapshot_of(existing, new_version)?;
        self.backend.put(&snapshot).await.map_err(|e| {
            error!(
                "[{}] Failed to delete {} data: {e}",
                existing.sort_key,
                T::ENTITY_TYPE
            );
            e
        })?;

        let mut live = existing.to_row()?;
        live.update_date = Some(Utc::now());
        live.updated_by = Some(self.actor.clone());
        live.latest_version = new_version;
        live.entry_status = EntryStatus::Deleted;
        self.backend.put_if_version(&live, current_version).await.map_err(|e| {
            error!(
                "[{}] Failed to delete {} data after writing snapshot v{new_version}: {e}",
                existing.sort_key,
                T::ENTITY_TYPE
            );
            e
        })?;

        info!("[{}] Delete {} data successful", existing.sort_key, T::ENTITY_TYPE);
        Ok(())
    }
}
