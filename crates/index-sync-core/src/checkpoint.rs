//! Resume positions for batch rebuilds, one per model.
//!
//! A checkpoint holds the last page whose documents were fully committed,
//! together with the target and page size that page number was computed
//! for. A page number alone is meaningless once the page size changes, so
//! resuming always goes through [`Checkpoint::next_page`], which converts
//! the committed prefix to the caller's page size without skipping records.
//! Absent means nothing has been committed yet and paging starts at page 0.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::IndexTarget;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub index: String,
    pub culture: String,
    pub page_size: u64,
    /// Last page committed at `page_size`.
    pub page: u64,
}

impl Checkpoint {
    pub fn new(target: &IndexTarget, page_size: u64, page: u64) -> Self {
        Self {
            index: target.index.clone(),
            culture: target.culture.clone(),
            page_size,
            page,
        }
    }

    pub fn target(&self) -> IndexTarget {
        IndexTarget::new(&self.index, &self.culture)
    }

    pub fn belongs_to(&self, target: &IndexTarget) -> bool {
        self.index == target.index && self.culture == target.culture
    }

    /// Records in the committed prefix.
    pub fn records_done(&self) -> u64 {
        (self.page + 1).saturating_mul(self.page_size)
    }

    /// First page to process when paging at `page_size`.
    ///
    /// Rounds down, so with a different page size the first resumed page may
    /// overlap the committed prefix; it never starts past it.
    pub fn next_page(&self, page_size: u64) -> u64 {
        if page_size == self.page_size {
            self.page + 1
        } else {
            self.records_done() / page_size.max(1)
        }
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn read(&self, model: &str) -> Result<Option<Checkpoint>>;

    async fn write(&self, model: &str, checkpoint: &Checkpoint) -> Result<()>;

    /// Remove the checkpoint. Clearing a missing checkpoint is a no-op.
    async fn clear(&self, model: &str) -> Result<()>;
}

/// In-memory checkpoints, keyed by model name.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
    writes: Mutex<Vec<(String, Checkpoint)>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write in call order.
    pub fn writes(&self) -> Vec<(String, Checkpoint)> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn read(&self, model: &str) -> Result<Option<Checkpoint>> {
        let checkpoints = self
            .checkpoints
            .lock()
            .map_err(|_| anyhow!("checkpoint lock poisoned"))?;
        Ok(checkpoints.get(model).cloned())
    }

    async fn write(&self, model: &str, checkpoint: &Checkpoint) -> Result<()> {
        self.checkpoints
            .lock()
            .map_err(|_| anyhow!("checkpoint lock poisoned"))?
            .insert(model.to_string(), checkpoint.clone());
        self.writes
            .lock()
            .map_err(|_| anyhow!("checkpoint lock poisoned"))?
            .push((model.to_string(), checkpoint.clone()));
        Ok(())
    }

    async fn clear(&self, model: &str) -> Result<()> {
        self.checkpoints
            .lock()
            .map_err(|_| anyhow!("checkpoint lock poisoned"))?
            .remove(model);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn en() -> IndexTarget {
        IndexTarget::new("catalog", "en")
    }

    #[test]
    fn test_next_page_same_size() {
        assert_eq!(Checkpoint::new(&en(), 50, 0).next_page(50), 1);
        assert_eq!(Checkpoint::new(&en(), 50, 6).next_page(50), 7);
    }

    #[test]
    fn test_next_page_never_skips_when_size_changes() {
        // pages 0..=1 at size 10 cover records [0, 20)
        let cp = Checkpoint::new(&en(), 10, 1);
        assert_eq!(cp.records_done(), 20);
        // at size 50, page 0 is [0, 50) and must be redone
        assert_eq!(cp.next_page(50), 0);
        // at size 5, pages 0..=3 are already covered
        assert_eq!(cp.next_page(5), 4);
        // at size 15, page 1 is [15, 30) and overlaps the prefix
        assert_eq!(cp.next_page(15), 1);
        for size in 1..=60 {
            assert!(cp.next_page(size) * size <= cp.records_done());
        }
    }

    #[test]
    fn test_belongs_to_target() {
        let cp = Checkpoint::new(&en(), 10, 1);
        assert!(cp.belongs_to(&en()));
        assert!(!cp.belongs_to(&IndexTarget::new("catalog", "fr")));
        assert!(!cp.belongs_to(&IndexTarget::new("archive", "en")));
        assert_eq!(cp.target(), en());
    }

    #[tokio::test]
    async fn test_memory_roundtrip_and_clear() {
        let store = MemoryCheckpointStore::new();
        let cp = Checkpoint::new(&en(), 50, 3);
        assert_eq!(store.read("Article").await.unwrap(), None);
        store.write("Article", &cp).await.unwrap();
        assert_eq!(store.read("Article").await.unwrap(), Some(cp.clone()));
        store.clear("Article").await.unwrap();
        store.clear("Article").await.unwrap();
        assert_eq!(store.read("Article").await.unwrap(), None);
        assert_eq!(store.writes(), vec![("Article".to_string(), cp)]);
    }
}
