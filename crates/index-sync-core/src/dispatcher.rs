//! Live synchronization: pairs pre/post lifecycle hooks into index writes.
//!
//! ```text
//!  before_save ──▶ enqueue_save ─┐             ┌─▶ delete_index ─┐
//!                                ├─ queue ─────┤                  ├─▶ backend
//!  after_save  ──▶ complete_save ┘             └─▶ insert_index ─┘
//! ```
//!
//! A record is synced only when its `after_*` hook finds the identity queued
//! by the matching `before_*` hook. Syncing is always delete-then-insert so
//! a document moves cleanly when fields that affect routing change.
//!
//! Backend failures are best-effort: they are logged at error level and
//! reported as [`SyncOutcome::Failed`], never propagated, because the store
//! write they follow is already committed. Routing failures are
//! configuration errors and are returned to the caller.

use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::SearchBackend;
use crate::error::{Result, SyncError};
use crate::models::{Document, IndexTarget, Record};
use crate::queue::{MutationQueue, Phase};
use crate::routing::RouteTable;

/// Hooks a [`RecordStore`](crate::store::RecordStore) runs around its writes.
#[async_trait]
pub trait LifecycleHooks: Send {
    async fn before_save(&mut self, record: &Record) -> Result<SyncOutcome>;
    async fn after_save(&mut self, record: &Record) -> Result<SyncOutcome>;
    async fn before_delete(&mut self, record: &Record) -> Result<SyncOutcome>;
    async fn after_delete(&mut self, record: &Record) -> Result<SyncOutcome>;
}

/// What a hook did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Added to the pending queue.
    Queued,
    /// Not queued: unchanged, never persisted, or already pending.
    Skipped,
    /// Index writes issued and committed.
    Synced,
    /// No matching `before_*` hook was seen; nothing written.
    NotQueued,
    /// Live indexing is disabled; nothing written.
    Suppressed,
    /// The backend rejected a write; logged and swallowed.
    Failed,
}

/// Options threaded into the dispatcher at construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Short-circuit all index writes (bulk external imports).
    pub suppress: bool,
}

/// Owns the mutation queue and drives index writes for live mutations.
pub struct SyncDispatcher {
    queue: MutationQueue,
    routes: Arc<RouteTable>,
    backend: Arc<dyn SearchBackend>,
    options: SyncOptions,
}

impl SyncDispatcher {
    pub fn new(routes: Arc<RouteTable>, backend: Arc<dyn SearchBackend>, options: SyncOptions) -> Self {
        Self {
            queue: MutationQueue::new(),
            routes,
            backend,
            options,
        }
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    pub fn enqueue_save(&mut self, record: &Record) -> SyncOutcome {
        if record.needs_save_sync() && self.queue.enqueue(Phase::Save, record.identity()) {
            SyncOutcome::Queued
        } else {
            SyncOutcome::Skipped
        }
    }

    pub async fn complete_save(&mut self, record: &Record) -> Result<SyncOutcome> {
        if !self.queue.take(Phase::Save, &record.identity()) {
            return Ok(SyncOutcome::NotQueued);
        }
        self.guard(record, "save", self.sync_index(record).await)
    }

    pub fn enqueue_delete(&mut self, record: &Record) -> SyncOutcome {
        if !record.is_new && self.queue.enqueue(Phase::Delete, record.identity()) {
            SyncOutcome::Queued
        } else {
            SyncOutcome::Skipped
        }
    }

    pub async fn complete_delete(&mut self, record: &Record) -> Result<SyncOutcome> {
        if !self.queue.take(Phase::Delete, &record.identity()) {
            return Ok(SyncOutcome::NotQueued);
        }
        self.guard(record, "delete", self.delete_index(record).await)
    }

    /// Delete then re-insert the record's documents in every routed target.
    pub async fn sync_index(&self, record: &Record) -> Result<SyncOutcome> {
        self.delete_index(record).await?;
        self.insert_index(record).await
    }

    /// Delete the record's document from every routed target and commit.
    pub async fn delete_index(&self, record: &Record) -> Result<SyncOutcome> {
        if self.options.suppress {
            return Ok(SyncOutcome::Suppressed);
        }
        let identity = record.identity();
        tracing::debug!(record = %identity, "deleting document");

        let key = identity.document_key();
        let routes = self.routes.resolve(&record.model)?;
        for route in routes {
            self.backend
                .delete(&route.target, &key)
                .await
                .map_err(SyncError::Backend)?;
        }
        self.commit(routes.iter().map(|r| &r.target)).await?;
        Ok(SyncOutcome::Synced)
    }

    /// Upsert the record's document into every routed target and commit.
    pub async fn insert_index(&self, record: &Record) -> Result<SyncOutcome> {
        if self.options.suppress {
            return Ok(SyncOutcome::Suppressed);
        }
        tracing::debug!(record = %record.identity(), "indexing document");

        let routes = self.routes.resolve(&record.model)?;
        for route in routes {
            let options = self.routes.model_options(&route.target.index, &route.model)?;
            let doc = Document::build(record, &route.model, options, &route.target.culture);
            self.backend
                .upsert(&route.target, &doc)
                .await
                .map_err(SyncError::Backend)?;
        }
        self.commit(routes.iter().map(|r| &r.target)).await?;
        Ok(SyncOutcome::Synced)
    }

    async fn commit<'a>(&self, targets: impl Iterator<Item = &'a IndexTarget>) -> Result<()> {
        for target in targets {
            self.backend.commit(target).await.map_err(SyncError::Backend)?;
        }
        Ok(())
    }

    /// Swallow backend failures; pass configuration errors through.
    fn guard(&self, record: &Record, op: &str, result: Result<SyncOutcome>) -> Result<SyncOutcome> {
        match result {
            Err(SyncError::Backend(err)) => {
                tracing::error!(
                    record = %record.identity(),
                    op,
                    error = %format!("{err:#}"),
                    "error while writing document to search index"
                );
                Ok(SyncOutcome::Failed)
            }
            other => other,
        }
    }
}

#[async_trait]
impl LifecycleHooks for SyncDispatcher {
    async fn before_save(&mut self, record: &Record) -> Result<SyncOutcome> {
        Ok(self.enqueue_save(record))
    }

    async fn after_save(&mut self, record: &Record) -> Result<SyncOutcome> {
        self.complete_save(record).await
    }

    async fn before_delete(&mut self, record: &Record) -> Result<SyncOutcome> {
        Ok(self.enqueue_delete(record))
    }

    async fn after_delete(&mut self, record: &Record) -> Result<SyncOutcome> {
        self.complete_delete(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemorySearchBackend;
    use crate::routing::{IndexDefinition, ModelOptions, TypeHierarchy};
    use crate::store::memory::MemoryRecordStore;
    use crate::store::{RecordFilter, RecordStore};

    fn routes() -> Arc<RouteTable> {
        let indexes = vec![IndexDefinition {
            name: "catalog".into(),
            cultures: vec!["en".into(), "fr".into()],
            rebuild_page_size: 50,
            models: vec![ModelOptions {
                name: "Content".into(),
                fields: vec!["title".into()],
                title: Some("title".into()),
            }],
        }];
        let hierarchy = TypeHierarchy::new([("Article".to_string(), "Content".to_string())].into()).unwrap();
        Arc::new(RouteTable::build(indexes, hierarchy).unwrap())
    }

    fn setup(suppress: bool) -> (SyncDispatcher, Arc<MemorySearchBackend>) {
        let backend = Arc::new(MemorySearchBackend::new());
        let dispatcher = SyncDispatcher::new(routes(), backend.clone(), SyncOptions { suppress });
        (dispatcher, backend)
    }

    fn article(key: &str) -> Record {
        let mut r = Record::new("Article", vec![key.to_string()]);
        r.set("title", format!("Article {key}"));
        r
    }

    #[tokio::test]
    async fn test_one_delete_insert_pair_per_cycle() {
        let (mut d, backend) = setup(false);
        let r = article("1");

        assert_eq!(d.enqueue_save(&r), SyncOutcome::Queued);
        assert_eq!(d.complete_save(&r).await.unwrap(), SyncOutcome::Synced);

        // Two cultures: one delete and one upsert in each.
        let calls = backend.calls();
        assert_eq!(calls.deletes, 2);
        assert_eq!(calls.upserts, 2);
        assert!(d.queue().is_empty());

        let ops: Vec<&str> = backend.log().iter().map(|(op, _, _)| *op).collect();
        assert_eq!(ops, vec!["delete", "delete", "upsert", "upsert"]);
    }

    #[tokio::test]
    async fn test_complete_without_enqueue_writes_nothing() {
        let (mut d, backend) = setup(false);
        let r = article("1");
        assert_eq!(d.complete_save(&r).await.unwrap(), SyncOutcome::NotQueued);
        assert_eq!(d.complete_delete(&r).await.unwrap(), SyncOutcome::NotQueued);
        assert_eq!(backend.calls().total(), 0);
    }

    #[tokio::test]
    async fn test_double_enqueue_then_complete_syncs_once() {
        let (mut d, backend) = setup(false);
        let r = article("1");
        let same_row = article("1");

        d.enqueue_save(&r);
        assert_eq!(d.enqueue_save(&same_row), SyncOutcome::Skipped);
        assert_eq!(d.queue().len(Phase::Save), 1);

        d.complete_save(&same_row).await.unwrap();
        assert_eq!(d.complete_save(&r).await.unwrap(), SyncOutcome::NotQueued);
        assert_eq!(backend.calls().upserts, 2);
    }

    #[tokio::test]
    async fn test_unmodified_record_not_queued() {
        let (mut d, _) = setup(false);
        let r = Record::persisted("Article", vec!["1".into()], Default::default());
        assert_eq!(d.enqueue_save(&r), SyncOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_new_record_never_queued_for_delete() {
        let (mut d, backend) = setup(false);
        let r = article("1");
        assert_eq!(d.enqueue_delete(&r), SyncOutcome::Skipped);
        assert_eq!(d.complete_delete(&r).await.unwrap(), SyncOutcome::NotQueued);
        assert_eq!(backend.calls().total(), 0);
    }

    #[tokio::test]
    async fn test_delete_cycle_removes_documents() {
        let (mut d, backend) = setup(false);
        let mut r = article("1");
        d.enqueue_save(&r);
        d.complete_save(&r).await.unwrap();
        r.mark_persisted();

        assert_eq!(d.enqueue_delete(&r), SyncOutcome::Queued);
        assert_eq!(d.complete_delete(&r).await.unwrap(), SyncOutcome::Synced);
        assert!(backend.documents(&IndexTarget::new("catalog", "en")).is_empty());
        assert!(backend.documents(&IndexTarget::new("catalog", "fr")).is_empty());
    }

    #[tokio::test]
    async fn test_suppression_issues_no_backend_calls_but_store_write_succeeds() {
        let (mut d, backend) = setup(true);
        let store = MemoryRecordStore::new();
        let mut r = article("1");

        let outcome = store.save(&mut r, &mut d).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Suppressed);
        assert_eq!(backend.calls().total(), 0);
        assert_eq!(store.count(&RecordFilter::types(vec!["Article".into()])).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_backend_failure_swallowed_and_store_write_kept() {
        let (mut d, backend) = setup(false);
        backend.set_failing(true);
        let store = MemoryRecordStore::new();
        let mut r = article("1");

        let outcome = store.save(&mut r, &mut d).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Failed);
        assert!(store.find(&r.identity()).await.unwrap().is_some());
        assert!(d.queue().is_empty());
    }

    #[tokio::test]
    async fn test_unrouted_record_rejects_live_sync_but_keeps_write() {
        let (mut d, backend) = setup(false);
        let store = MemoryRecordStore::new();
        let mut r = Record::new("Invoice", vec!["1".into()]);
        r.set("total", 10);

        let err = store.save(&mut r, &mut d).await.unwrap_err();
        assert!(err.to_string().contains("no index route"));
        assert!(store.find(&r.identity()).await.unwrap().is_some());
        assert_eq!(backend.calls().total(), 0);
    }

    #[tokio::test]
    async fn test_resync_replaces_document() {
        let (mut d, backend) = setup(false);
        let store = MemoryRecordStore::new();
        let mut r = article("1");
        store.save(&mut r, &mut d).await.unwrap();

        r.set("title", "Renamed");
        store.save(&mut r, &mut d).await.unwrap();

        let docs = backend.documents(&IndexTarget::new("catalog", "fr"));
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].title.as_deref(), Some("Renamed"));
        assert_eq!(docs[0].tag, "Content");
    }
}
