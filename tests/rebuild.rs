//! Coordinator tests with in-memory collaborators.
//!
//! Workers run in-process through `InProcessLauncher`, wrapped in launchers
//! that record every job or script misbehaving workers, so each scenario can
//! assert exactly which attempts were made and from which page.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use index_sync::progress::NoProgress;
use index_sync::rebuild::{Coordinator, RebuildError, RebuildRequest};
use index_sync::supervisor::{InProcessLauncher, Supervisor, WorkerExit, WorkerLauncher};
use index_sync::worker::{ResourceCeiling, WorkerContext, WorkerJob, WorkerReport, WorkerStatus};
use index_sync_core::backend::memory::MemorySearchBackend;
use index_sync_core::backend::SearchBackend;
use index_sync_core::checkpoint::{Checkpoint, CheckpointStore, MemoryCheckpointStore};
use index_sync_core::models::{Document, IndexTarget, Record};
use index_sync_core::routing::{IndexDefinition, ModelOptions, RouteTable, TypeHierarchy};
use index_sync_core::store::memory::MemoryRecordStore;

// ─── Fixtures ───────────────────────────────────────────────────────

struct Fixture {
    ctx: WorkerContext,
    backend: Arc<MemorySearchBackend>,
    checkpoints: Arc<MemoryCheckpointStore>,
}

fn model(name: &str) -> ModelOptions {
    ModelOptions {
        name: name.to_string(),
        fields: vec!["title".to_string()],
        title: Some("title".to_string()),
    }
}

fn fixture(articles: u32, pages: u32) -> Fixture {
    let mut records = Vec::new();
    for i in 0..articles {
        let mut r = Record::new("Article", vec![i.to_string()]);
        r.set("title", format!("article {i}"));
        records.push(r);
    }
    for i in 0..pages {
        let mut r = Record::new("Page", vec![i.to_string()]);
        r.set("title", format!("page {i}"));
        records.push(r);
    }

    let routes = RouteTable::build(
        vec![IndexDefinition {
            name: "catalog".into(),
            cultures: vec!["en".into(), "fr".into()],
            rebuild_page_size: 50,
            models: vec![model("Content"), model("Page")],
        }],
        TypeHierarchy::new([("Article".to_string(), "Content".to_string())].into()).unwrap(),
    )
    .unwrap();

    let backend = Arc::new(MemorySearchBackend::new());
    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let ctx = WorkerContext {
        store: Arc::new(MemoryRecordStore::with_records(records)),
        backend: backend.clone(),
        checkpoints: checkpoints.clone(),
        routes: Arc::new(routes),
    };
    Fixture {
        ctx,
        backend,
        checkpoints,
    }
}

fn request(model: &str, page_size: u64) -> RebuildRequest {
    RebuildRequest {
        index: "catalog".into(),
        culture: "en".into(),
        model: model.into(),
        page_size,
        purge: false,
        resume: false,
    }
}

fn en() -> IndexTarget {
    IndexTarget::new("catalog", "en")
}

/// Records the start page of every job before delegating.
struct Recording<L> {
    inner: L,
    starts: Arc<Mutex<Vec<u64>>>,
}

#[async_trait]
impl<L: WorkerLauncher> WorkerLauncher for Recording<L> {
    async fn launch(&self, job: &WorkerJob) -> Result<WorkerExit> {
        self.starts.lock().unwrap().push(job.start_page);
        self.inner.launch(job).await
    }
}

fn recording_coordinator<L: WorkerLauncher + 'static>(ctx: WorkerContext, launcher: L) -> (Coordinator, Arc<Mutex<Vec<u64>>>) {
    let starts = Arc::new(Mutex::new(Vec::new()));
    let launcher = Recording {
        inner: launcher,
        starts: starts.clone(),
    };
    let coordinator = Coordinator::new(ctx, Supervisor::new(Box::new(launcher)), Box::new(NoProgress));
    (coordinator, starts)
}

// ─── Scenarios ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_exhausted_worker_is_replaced_once_from_next_page() {
    // 120 records at page size 10 → 12 pages; the first worker stops after 7.
    let f = fixture(120, 0);
    let launcher = InProcessLauncher::new(f.ctx.clone(), ResourceCeiling::pages(7));
    let (mut coordinator, starts) = recording_coordinator(f.ctx.clone(), launcher);

    let summary = coordinator.rebuild_model(&request("Content", 10)).await.unwrap();

    assert_eq!(*starts.lock().unwrap(), vec![0, 7]);
    assert_eq!(summary.attempts, 2);
    assert_eq!(summary.pages, 12);
    assert_eq!(summary.records, 120);
    assert_eq!(f.backend.documents(&en()).len(), 120);
    assert_eq!(f.checkpoints.read("Content").await.unwrap(), None);
}

#[tokio::test]
async fn test_resumed_attempts_cover_every_record_once() {
    let f = fixture(23, 0);
    let launcher = InProcessLauncher::new(f.ctx.clone(), ResourceCeiling::pages(1));
    let (mut coordinator, starts) = recording_coordinator(f.ctx.clone(), launcher);

    coordinator.rebuild_model(&request("Content", 5)).await.unwrap();

    assert_eq!(*starts.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    let docs = f.backend.documents(&en());
    assert_eq!(docs.len(), 23);
    assert!(docs.iter().all(|d: &Document| d.tag == "Content" && d.model == "Article"));
    // 23 upserts plus one commit per page
    assert_eq!(f.backend.calls().upserts, 23);
    assert_eq!(f.backend.calls().commits, 5);
}

#[tokio::test]
async fn test_zero_records_spawns_no_worker() {
    let f = fixture(0, 3);
    let launcher = InProcessLauncher::new(f.ctx.clone(), ResourceCeiling::default());
    let (mut coordinator, starts) = recording_coordinator(f.ctx.clone(), launcher);

    let summary = coordinator.rebuild_model(&request("Content", 10)).await.unwrap();

    assert_eq!(summary.pages, 0);
    assert_eq!(summary.attempts, 0);
    assert!(starts.lock().unwrap().is_empty());
}

/// Claims exhaustion without ever advancing the checkpoint.
struct Stuck;

#[async_trait]
impl WorkerLauncher for Stuck {
    async fn launch(&self, job: &WorkerJob) -> Result<WorkerExit> {
        Ok(WorkerExit {
            code: Some(75),
            report: Some(WorkerReport {
                status: WorkerStatus::Exhausted,
                model: job.model.clone(),
                first_page: job.start_page,
                next_page: job.start_page + 1,
                pages: 3,
                records: 0,
            }),
            diagnostic: None,
        })
    }
}

#[tokio::test]
async fn test_worker_without_progress_is_detected() {
    let f = fixture(30, 0);
    let (mut coordinator, starts) = recording_coordinator(f.ctx.clone(), Stuck);

    let err = coordinator.rebuild_model(&request("Content", 10)).await.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<RebuildError>(),
        Some(RebuildError::NoProgress { page: 0, .. })
    ));
    assert_eq!(*starts.lock().unwrap(), vec![0]);
}

/// Runs real workers until `fail_at_attempt`, then crashes.
struct CrashesOn {
    inner: InProcessLauncher,
    fail_at_attempt: usize,
    attempts: Mutex<usize>,
}

#[async_trait]
impl WorkerLauncher for CrashesOn {
    async fn launch(&self, job: &WorkerJob) -> Result<WorkerExit> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            *attempts += 1;
            *attempts
        };
        if attempt == self.fail_at_attempt {
            return Ok(WorkerExit {
                code: None,
                report: None,
                diagnostic: None,
            });
        }
        self.inner.launch(job).await
    }
}

#[tokio::test]
async fn test_fatal_worker_keeps_checkpoint_and_resume_continues() {
    let f = fixture(40, 0);
    let crashing = CrashesOn {
        inner: InProcessLauncher::new(f.ctx.clone(), ResourceCeiling::pages(2)),
        fail_at_attempt: 2,
        attempts: Mutex::new(0),
    };
    let (mut coordinator, _) = recording_coordinator(f.ctx.clone(), crashing);

    let err = coordinator.rebuild_model(&request("Content", 10)).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RebuildError>(),
        Some(RebuildError::WorkerFailed { .. })
    ));
    assert_eq!(f.checkpoints.read("Content").await.unwrap(), Some(Checkpoint::new(&en(), 10, 1)));
    assert_eq!(f.backend.documents(&en()).len(), 20);

    let launcher = InProcessLauncher::new(f.ctx.clone(), ResourceCeiling::default());
    let (mut coordinator, starts) = recording_coordinator(f.ctx.clone(), launcher);
    let mut resume = request("Content", 10);
    resume.resume = true;
    coordinator.rebuild_model(&resume).await.unwrap();

    assert_eq!(*starts.lock().unwrap(), vec![2]);
    assert_eq!(f.backend.documents(&en()).len(), 40);
    assert_eq!(f.checkpoints.read("Content").await.unwrap(), None);
}

#[tokio::test]
async fn test_resume_with_larger_page_size_indexes_every_record() {
    // An interrupted run at page size 10 committed pages 0 and 1.
    let f = fixture(120, 0);
    let crashing = CrashesOn {
        inner: InProcessLauncher::new(f.ctx.clone(), ResourceCeiling::pages(2)),
        fail_at_attempt: 2,
        attempts: Mutex::new(0),
    };
    let (mut coordinator, _) = recording_coordinator(f.ctx.clone(), crashing);
    assert!(coordinator.rebuild_model(&request("Content", 10)).await.is_err());
    assert_eq!(f.backend.documents(&en()).len(), 20);

    let launcher = InProcessLauncher::new(f.ctx.clone(), ResourceCeiling::default());
    let (mut coordinator, starts) = recording_coordinator(f.ctx.clone(), launcher);
    let mut resume = request("Content", 50);
    resume.resume = true;
    let summary = coordinator.rebuild_model(&resume).await.unwrap();

    // Records [0, 20) sit inside page 0 at size 50, so paging restarts there.
    assert_eq!(*starts.lock().unwrap(), vec![0]);
    assert_eq!(summary.pages, 3);
    assert_eq!(f.backend.documents(&en()).len(), 120);
    assert_eq!(f.checkpoints.read("Content").await.unwrap(), None);
}

#[tokio::test]
async fn test_resume_with_smaller_page_size_continues_after_committed_records() {
    let f = fixture(60, 0);
    // Pages 0..=1 at size 20 cover records [0, 40).
    f.checkpoints.write("Content", &Checkpoint::new(&en(), 20, 1)).await.unwrap();
    let launcher = InProcessLauncher::new(f.ctx.clone(), ResourceCeiling::default());
    let (mut coordinator, starts) = recording_coordinator(f.ctx.clone(), launcher);

    let mut resume = request("Content", 10);
    resume.resume = true;
    coordinator.rebuild_model(&resume).await.unwrap();

    assert_eq!(*starts.lock().unwrap(), vec![4]);
    assert_eq!(f.backend.documents(&en()).len(), 20);
    assert!(f.backend.document(&en(), "Article:40").is_some());
    assert!(f.backend.document(&en(), "Article:39").is_none());
}

#[tokio::test]
async fn test_resume_rejects_checkpoint_of_another_culture() {
    let f = fixture(30, 0);
    let fr = IndexTarget::new("catalog", "fr");
    f.checkpoints.write("Content", &Checkpoint::new(&fr, 10, 1)).await.unwrap();
    let launcher = InProcessLauncher::new(f.ctx.clone(), ResourceCeiling::default());
    let (mut coordinator, starts) = recording_coordinator(f.ctx.clone(), launcher);

    let mut resume = request("Content", 10);
    resume.resume = true;
    resume.purge = true;
    let err = coordinator.rebuild_model(&resume).await.unwrap_err();

    match err.downcast_ref::<RebuildError>() {
        Some(RebuildError::CheckpointMismatch { found, expected, .. }) => {
            assert_eq!(found, &fr);
            assert_eq!(expected, &en());
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(starts.lock().unwrap().is_empty());
    assert_eq!(f.backend.calls().total(), 0);
    // The foreign checkpoint survives for the run it belongs to.
    assert_eq!(f.checkpoints.read("Content").await.unwrap(), Some(Checkpoint::new(&fr, 10, 1)));
}

#[tokio::test]
async fn test_fresh_run_ignores_stale_checkpoint() {
    let f = fixture(30, 0);
    f.checkpoints.write("Content", &Checkpoint::new(&en(), 10, 1)).await.unwrap();
    let launcher = InProcessLauncher::new(f.ctx.clone(), ResourceCeiling::default());
    let (mut coordinator, starts) = recording_coordinator(f.ctx.clone(), launcher);

    coordinator.rebuild_model(&request("Content", 10)).await.unwrap();

    assert_eq!(*starts.lock().unwrap(), vec![0]);
    assert_eq!(f.backend.documents(&en()).len(), 30);
}

#[tokio::test]
async fn test_purge_removes_only_the_models_tag() {
    let f = fixture(5, 4);
    let stale = Document {
        key: "Article:99".into(),
        tag: "Content".into(),
        model: "Article".into(),
        title: None,
        fields: Default::default(),
    };
    f.backend.upsert(&en(), &stale).await.unwrap();
    f.backend.commit(&en()).await.unwrap();

    let launcher = InProcessLauncher::new(f.ctx.clone(), ResourceCeiling::default());
    let (mut coordinator, _) = recording_coordinator(f.ctx.clone(), launcher);
    coordinator.rebuild_model(&request("Page", 10)).await.unwrap();

    let mut purge = request("Content", 10);
    purge.purge = true;
    coordinator.rebuild_model(&purge).await.unwrap();

    let docs = f.backend.documents(&en());
    assert!(f.backend.document(&en(), "Article:99").is_none());
    assert_eq!(docs.iter().filter(|d| d.tag == "Page").count(), 4);
    assert_eq!(docs.iter().filter(|d| d.tag == "Content").count(), 5);
}

#[tokio::test]
async fn test_invalid_job_fails_before_any_worker() {
    let f = fixture(5, 0);
    let launcher = InProcessLauncher::new(f.ctx.clone(), ResourceCeiling::default());
    let (mut coordinator, starts) = recording_coordinator(f.ctx.clone(), launcher);

    let mut req = request("Content", 10);
    req.culture = "de".into();
    assert!(coordinator.rebuild_model(&req).await.is_err());

    // Article is only indexed through Content
    assert!(coordinator.rebuild_model(&request("Article", 10)).await.is_err());

    assert!(starts.lock().unwrap().is_empty());
    assert_eq!(f.backend.calls().total(), 0);
}
