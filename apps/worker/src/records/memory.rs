//! In-memory `RecordBackend` with fault injection, for tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::{AppError, Result};
use crate::records::backend::{LiveRowUpdate, RecordBackend, SortKeyCondition};
use crate::records::model::{EntryStatus, StoredRow};

type Key = (String, String);

#[derive(Default)]
pub struct MemoryRecordBackend {
    rows: Mutex<BTreeMap<Key, StoredRow>>,
    writes: AtomicUsize,
    unavailable: AtomicBool,
    fail_next_transaction: AtomicBool,
    puts_before_failure: Mutex<Option<usize>>,
}

impl MemoryRecordBackend {
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Rejects the next `transact_update` as if another writer got there first.
    pub fn fail_next_transaction(&self) {
        self.fail_next_transaction.store(true, Ordering::SeqCst);
    }

    /// Lets `n` more puts (plain or versioned) through, then fails exactly one.
    pub fn fail_puts_after(&self, n: usize) {
        *self.puts_before_failure.lock().unwrap() = Some(n);
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn row(&self, partition_key: &str, sort_key: &str) -> Option<StoredRow> {
        self.rows
            .lock()
            .unwrap()
            .get(&(partition_key.to_string(), sort_key.to_string()))
            .cloned()
    }

    pub fn rows_for(&self, partition_key: &str, entity_id: &str) -> Vec<StoredRow> {
        self.rows
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.partition_key == partition_key && r.entity_id == entity_id)
            .cloned()
            .collect()
    }

    fn take_put_budget(&self) -> Result<()> {
        let mut budget = self.puts_before_failure.lock().unwrap();
        match *budget {
            Some(0) => {
                *budget = None;
                Err(AppError::Unavailable("injected put failure".to_string()))
            }
            Some(n) => {
                *budget = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Unavailable("memory backend switched off".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordBackend for MemoryRecordBackend {
    async fn query(
        &self,
        partition_key: &str,
        condition: &SortKeyCondition,
        status: Option<EntryStatus>,
    ) -> Result<Vec<StoredRow>> {
        self.check_available()?;
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.partition_key == partition_key && condition.matches(&r.sort_key))
            .filter(|r| status.map_or(true, |s| r.entry_status == s))
            .cloned()
            .collect())
    }

    async fn query_by_entity_id(
        &self,
        partition_key: &str,
        entity_id: &str,
    ) -> Result<Vec<StoredRow>> {
        self.check_available()?;
        let mut rows = self.rows_for(partition_key, entity_id);
        rows.sort_by_key(|r| r.latest_version);
        Ok(rows)
    }

    async fn insert(&self, row: &StoredRow) -> Result<()> {
        self.check_available()?;
        let mut rows = self.rows.lock().unwrap();
        let key = (row.partition_key.clone(), row.sort_key.clone());
        if rows.contains_key(&key) {
            return Err(AppError::Conflict(format!("duplicate key {}", row.sort_key)));
        }
        rows.insert(key, row.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn put(&self, row: &StoredRow) -> Result<()> {
        self.check_available()?;
        self.take_put_budget()?;
        self.rows.lock().unwrap().insert(
            (row.partition_key.clone(), row.sort_key.clone()),
            row.clone(),
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn put_if_version(&self, row: &StoredRow, expected_version: i64) -> Result<()> {
        self.check_available()?;
        self.take_put_budget()?;
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&(row.partition_key.clone(), row.sort_key.clone())) {
            Some(stored) if stored.latest_version == expected_version => {
                *stored = row.clone();
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            _ => Err(AppError::Conflict(format!(
                "{} is not at version {expected_version}",
                row.sort_key
            ))),
        }
    }

    async fn transact_update(&self, update: &LiveRowUpdate, snapshot: &StoredRow) -> Result<()> {
        self.check_available()?;
        if self.fail_next_transaction.swap(false, Ordering::SeqCst) {
            return Err(AppError::Conflict("injected transaction failure".to_string()));
        }

        let mut rows = self.rows.lock().unwrap();
        let live_key = (update.partition_key.clone(), update.sort_key.clone());
        let snapshot_key = (snapshot.partition_key.clone(), snapshot.sort_key.clone());

        match rows.get(&live_key) {
            Some(live) if live.latest_version == update.expected_version => {}
            _ => {
                return Err(AppError::Conflict(format!(
                    "{} is not at version {}",
                    update.sort_key, update.expected_version
                )))
            }
        }
        if rows.contains_key(&snapshot_key) {
            return Err(AppError::Conflict(format!("duplicate key {}", snapshot.sort_key)));
        }

        if let Some(live) = rows.get_mut(&live_key) {
            live.attributes.extend(update.changes.clone());
            live.latest_version = update.new_version;
            if let Some(date) = update.update_date {
                live.update_date = Some(date);
            }
            if let Some(by) = &update.updated_by {
                live.updated_by = Some(by.clone());
            }
            if let Some(status) = update.entry_status {
                live.entry_status = status;
            }
        }
        rows.insert(snapshot_key, snapshot.clone());
        self.writes.fetch_add(2, Ordering::SeqCst);
        Ok(())
    }
}
