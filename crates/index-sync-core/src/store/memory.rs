//! In-memory [`RecordStore`] for tests and embedding.
//!
//! Rows are kept in insertion order behind a `std::sync::Mutex`. The store
//! lives in one process only, so it cannot serve worker-process rebuilds.

use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{RecordFilter, RecordStore};
use crate::models::{Record, RecordIdentity};

/// In-memory record store.
#[derive(Default)]
pub struct MemoryRecordStore {
    rows: Mutex<Vec<Record>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-filled with `records`, marked as persisted.
    pub fn with_records(records: impl IntoIterator<Item = Record>) -> Self {
        let rows = records
            .into_iter()
            .map(|mut r| {
                r.mark_persisted();
                r
            })
            .collect();
        Self {
            rows: Mutex::new(rows),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<Record>>> {
        self.rows
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    fn driver(&self) -> &str {
        "memory"
    }

    async fn count(&self, filter: &RecordFilter) -> Result<u64> {
        Ok(self.lock()?.iter().filter(|r| filter.matches(r)).count() as u64)
    }

    async fn fetch_page(&self, filter: &RecordFilter, offset: u64, limit: u64) -> Result<Vec<Record>> {
        Ok(self
            .lock()?
            .iter()
            .filter(|r| filter.matches(r))
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn find(&self, identity: &RecordIdentity) -> Result<Option<Record>> {
        Ok(self
            .lock()?
            .iter()
            .find(|r| r.model == identity.model && r.key == identity.key)
            .cloned())
    }

    async fn write(&self, record: &Record) -> Result<()> {
        let mut rows = self.lock()?;
        let mut stored = record.clone();
        stored.mark_persisted();
        match rows.iter_mut().find(|r| r.identity() == stored.identity()) {
            Some(existing) => *existing = stored,
            None => rows.push(stored),
        }
        Ok(())
    }

    async fn remove(&self, identity: &RecordIdentity) -> Result<bool> {
        let mut rows = self.lock()?;
        let before = rows.len();
        rows.retain(|r| &r.identity() != identity);
        Ok(rows.len() != before)
    }
}
