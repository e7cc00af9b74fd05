//! Backing-store abstraction.
//!
//! The [`RecordStore`] trait covers the two ways the sync machinery touches
//! the authoritative store: paged reads for batch rebuilds, and writes that
//! run [`LifecycleHooks`] around them for live synchronization.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::dispatcher::{LifecycleHooks, SyncOutcome};
use crate::models::{Record, RecordIdentity};

/// Restricts counts and page fetches to a set of concrete types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub types: Vec<String>,
}

impl RecordFilter {
    pub fn types(types: Vec<String>) -> Self {
        Self { types }
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.types.iter().any(|t| t == &record.model)
    }
}

/// Abstract backing store.
///
/// Page fetches must return records in a stable order (insertion order for
/// the bundled stores) so that consecutive pages neither skip nor repeat.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Driver name, as configured under `[store] driver`.
    fn driver(&self) -> &str;

    /// Whether a separate worker process can open this store and page
    /// through the same data.
    fn supports_worker_rebuild(&self) -> bool {
        false
    }

    async fn count(&self, filter: &RecordFilter) -> Result<u64>;

    async fn fetch_page(&self, filter: &RecordFilter, offset: u64, limit: u64) -> Result<Vec<Record>>;

    async fn find(&self, identity: &RecordIdentity) -> Result<Option<Record>>;

    /// Insert or replace the row for `record`.
    async fn write(&self, record: &Record) -> Result<()>;

    /// Delete the row. Returns whether it existed.
    async fn remove(&self, identity: &RecordIdentity) -> Result<bool>;

    /// Save with lifecycle hooks: `before_save`, write, `after_save`.
    ///
    /// The write is committed before `after_save` runs; a hook error is
    /// returned to the caller but never rolls the write back.
    async fn save(&self, record: &mut Record, hooks: &mut dyn LifecycleHooks) -> Result<SyncOutcome> {
        hooks.before_save(record).await?;
        self.write(record).await?;
        record.mark_persisted();
        Ok(hooks.after_save(record).await?)
    }

    /// Delete with lifecycle hooks: `before_delete`, remove, `after_delete`.
    async fn delete(&self, record: &Record, hooks: &mut dyn LifecycleHooks) -> Result<SyncOutcome> {
        hooks.before_delete(record).await?;
        self.remove(&record.identity()).await?;
        Ok(hooks.after_delete(record).await?)
    }
}
