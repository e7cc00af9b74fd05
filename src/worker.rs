//! Rebuild worker: one bounded execution unit of a batch rebuild.
//!
//! A worker pages through a model's records from `start_page`, indexing every
//! record into one target. After a page's documents are committed it writes
//! the checkpoint, then checks its resource ceiling; if the ceiling is
//! exceeded and pages remain, it stops and reports [`WorkerStatus::Exhausted`]
//! so the supervisor can continue in a fresh process. Checking only after a
//! completed page means every attempt advances the checkpoint by at least one.
//!
//! In a worker process the outcome leaves as an exit code plus one JSON
//! [`WorkerReport`] line on stdout; see [`run_worker_process`].

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use index_sync_core::backend::SearchBackend;
use index_sync_core::checkpoint::{Checkpoint, CheckpointStore};
use index_sync_core::models::Document;
use index_sync_core::paging::PagePlan;
use index_sync_core::routing::RouteTable;
use index_sync_core::store::{RecordFilter, RecordStore};

use crate::checkpoint::FileCheckpointStore;
use crate::config::{Config, RebuildConfig};
use crate::db;
use crate::sqlite_backend::SqliteSearchBackend;
use crate::sqlite_store::SqliteRecordStore;

/// Exit code a worker process uses to signal resource exhaustion (EX_TEMPFAIL).
pub const EXIT_RESOURCE_EXHAUSTED: i32 = 75;

/// What one worker attempt should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerJob {
    pub index: String,
    pub culture: String,
    pub model: String,
    pub page_size: u64,
    pub start_page: u64,
}

/// Limits after which a worker hands over to a fresh one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceCeiling {
    pub memory_limit_bytes: Option<u64>,
    pub max_pages: Option<u64>,
}

impl ResourceCeiling {
    pub fn from_config(rebuild: &RebuildConfig) -> Self {
        Self {
            memory_limit_bytes: Some(rebuild.worker_memory_limit_mb.saturating_mul(1024 * 1024)),
            max_pages: rebuild.worker_max_pages,
        }
    }

    pub fn pages(max_pages: u64) -> Self {
        Self {
            memory_limit_bytes: None,
            max_pages: Some(max_pages),
        }
    }

    /// Whether a worker that has completed `pages_done` pages, with resident
    /// memory `rss_bytes`, must stop.
    pub fn exceeded(&self, pages_done: u64, rss_bytes: Option<u64>) -> bool {
        let over_pages = self.max_pages.is_some_and(|max| pages_done >= max);
        let over_memory = match (self.memory_limit_bytes, rss_bytes) {
            (Some(limit), Some(rss)) => rss >= limit,
            _ => false,
        };
        over_pages || over_memory
    }
}

/// Resident set size of this process, where the platform exposes it.
pub fn resident_memory_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss(&status)
}

fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: u64 = line
        .trim_start_matches("VmRSS:")
        .trim()
        .trim_end_matches("kB")
        .trim()
        .parse()
        .ok()?;
    Some(kb * 1024)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Completed,
    Exhausted,
}

/// Result of one worker attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub status: WorkerStatus,
    pub model: String,
    pub first_page: u64,
    /// First page not yet processed.
    pub next_page: u64,
    pub pages: u64,
    pub records: u64,
}

/// Collaborators a worker reads from and writes to.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<dyn RecordStore>,
    pub backend: Arc<dyn SearchBackend>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub routes: Arc<RouteTable>,
}

impl WorkerContext {
    /// Open the SQLite collaborators and checkpoint files named by `config`.
    pub async fn open(config: &Config) -> Result<Self> {
        let store = SqliteRecordStore::new(db::connect_store(config).await?);
        let backend = SqliteSearchBackend::new(db::connect_search(config).await?);
        Ok(Self {
            store: Arc::new(store),
            backend: Arc::new(backend),
            checkpoints: Arc::new(FileCheckpointStore::new(&config.state.dir)),
            routes: Arc::new(config.route_table()?),
        })
    }
}

/// Index pages from `job.start_page` until done or the ceiling is hit.
pub async fn run_worker(ctx: &WorkerContext, job: &WorkerJob, ceiling: &ResourceCeiling) -> Result<WorkerReport> {
    let target = ctx.routes.validate_job(&job.index, &job.culture, &job.model)?;
    let filter = RecordFilter::types(ctx.routes.types_satisfying(&job.model));

    let total = ctx.store.count(&filter).await?;
    let plan = PagePlan::new(total, job.page_size);
    let pages = plan.page_count();

    let mut report = WorkerReport {
        status: WorkerStatus::Completed,
        model: job.model.clone(),
        first_page: job.start_page,
        next_page: job.start_page,
        pages,
        records: 0,
    };

    tracing::info!(
        model = %job.model,
        target = %target,
        start_page = job.start_page,
        pages,
        "worker started"
    );

    let mut pages_done = 0u64;
    for page in job.start_page..pages {
        let range = plan.range(page);
        let records = ctx
            .store
            .fetch_page(&filter, range.start, range.end - range.start)
            .await
            .with_context(|| format!("Failed to fetch page {} of {}", page, job.model))?;

        for record in &records {
            let route = ctx.routes.route_in(&record.model, &target)?;
            let options = ctx.routes.model_options(&target.index, &route.model)?;
            let doc = Document::build(record, &route.model, options, &target.culture);
            ctx.backend.upsert(&target, &doc).await?;
        }
        ctx.backend.commit(&target).await?;
        ctx.checkpoints
            .write(&job.model, &Checkpoint::new(&target, plan.page_size(), page))
            .await?;

        pages_done += 1;
        report.records += records.len() as u64;
        report.next_page = page + 1;
        tracing::debug!(model = %job.model, page, records = records.len(), "page indexed");

        if !plan.is_last(page) && ceiling.exceeded(pages_done, resident_memory_bytes()) {
            report.status = WorkerStatus::Exhausted;
            tracing::info!(model = %job.model, next_page = report.next_page, "resource ceiling reached");
            break;
        }
    }

    Ok(report)
}

/// Entry point of the hidden `worker` subcommand.
///
/// Prints the report as one JSON line on stdout and returns the process
/// exit code: `0` when completed, [`EXIT_RESOURCE_EXHAUSTED`] when the
/// ceiling was hit. Errors propagate and exit non-zero through `main`.
pub async fn run_worker_process(config: &Config, job: &WorkerJob, ceiling: &ResourceCeiling) -> Result<i32> {
    let ctx = WorkerContext::open(config).await?;
    let report = run_worker(&ctx, job, ceiling).await?;
    println!("{}", serde_json::to_string(&report)?);

    Ok(match report.status {
        WorkerStatus::Completed => 0,
        WorkerStatus::Exhausted => EXIT_RESOURCE_EXHAUSTED,
    })
}
