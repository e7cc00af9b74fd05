//! Batch rebuild orchestration.
//!
//! Rebuilds the documents of one (index, culture, model) from the record
//! store. The [`Coordinator`] optionally purges the model's existing
//! documents, plans pages, then drives workers through the [`Supervisor`]
//! until every page is indexed. Progress between workers lives in the
//! checkpoint store, so a rebuild interrupted for any reason can be resumed
//! with `--resume`.
//!
//! Per model the flow is `Start → [Purge] → Paging → Completed | Failed`.
//! A worker that hits its resource ceiling is replaced by a fresh one that
//! starts after the last checkpointed page; a replacement that would start
//! where its predecessor started is treated as [`RebuildError::NoProgress`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use thiserror::Error;

use index_sync_core::backend::SearchBackend;
use index_sync_core::checkpoint::CheckpointStore;
use index_sync_core::models::IndexTarget;
use index_sync_core::paging::PagePlan;
use index_sync_core::routing::RouteTable;
use index_sync_core::store::{RecordFilter, RecordStore};

use crate::config::{Config, StoreDriver};
use crate::progress::{ProgressMode, RebuildProgressEvent, RebuildProgressReporter};
use crate::supervisor::{ProcessLauncher, Supervisor, WorkerOutcome};
use crate::worker::{ResourceCeiling, WorkerContext, WorkerJob};

#[derive(Debug, Error)]
pub enum RebuildError {
    #[error("store driver \"{driver}\" cannot be rebuilt by worker processes; use the sqlite driver")]
    UnsupportedBackend { driver: String },

    #[error("rebuild of {model} failed: {message}")]
    WorkerFailed { model: String, message: String },

    #[error("rebuild of {model} made no progress from page {page}")]
    NoProgress { model: String, page: u64 },

    #[error("checkpoint of {model} belongs to {found}, not {expected}; rerun without --resume")]
    CheckpointMismatch {
        model: String,
        found: IndexTarget,
        expected: IndexTarget,
    },
}

/// One model to rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildRequest {
    pub index: String,
    pub culture: String,
    pub model: String,
    pub page_size: u64,
    /// Delete the model's existing documents before paging.
    pub purge: bool,
    /// Continue from an existing checkpoint instead of starting over.
    pub resume: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildSummary {
    pub model: String,
    pub records: u64,
    pub pages: u64,
    /// Workers spawned for this model.
    pub attempts: u64,
    pub elapsed: Duration,
}

pub struct Coordinator {
    routes: Arc<RouteTable>,
    store: Arc<dyn RecordStore>,
    backend: Arc<dyn SearchBackend>,
    checkpoints: Arc<dyn CheckpointStore>,
    supervisor: Supervisor,
    progress: Box<dyn RebuildProgressReporter>,
}

impl Coordinator {
    pub fn new(ctx: WorkerContext, supervisor: Supervisor, progress: Box<dyn RebuildProgressReporter>) -> Self {
        Self {
            routes: ctx.routes,
            store: ctx.store,
            backend: ctx.backend,
            checkpoints: ctx.checkpoints,
            supervisor,
            progress,
        }
    }

    /// Workers spawned across all models so far.
    pub fn spawned(&self) -> u64 {
        self.supervisor.spawned()
    }

    pub async fn rebuild_model(&mut self, request: &RebuildRequest) -> Result<RebuildSummary> {
        let started = Instant::now();
        let model = request.model.as_str();
        let target = self
            .routes
            .validate_job(&request.index, &request.culture, model)?;

        let checkpoint = if request.resume {
            self.checkpoints.read(model).await?
        } else {
            self.checkpoints.clear(model).await?;
            None
        };
        if let Some(cp) = &checkpoint {
            if !cp.belongs_to(&target) {
                return Err(RebuildError::CheckpointMismatch {
                    model: model.to_string(),
                    found: cp.target(),
                    expected: target,
                }
                .into());
            }
        }

        if request.purge {
            if checkpoint.is_some() {
                tracing::warn!(model, "resuming from a checkpoint, existing documents are kept");
            } else {
                self.backend.delete_by_tag(&target, model).await?;
                self.backend.commit(&target).await?;
                self.progress.report(RebuildProgressEvent::Purged {
                    model: model.to_string(),
                });
            }
        }

        let filter = RecordFilter::types(self.routes.types_satisfying(model));
        let records = self.store.count(&filter).await?;
        let plan = PagePlan::new(records, request.page_size);
        let pages = plan.page_count();
        self.progress.report(RebuildProgressEvent::Discovered {
            model: model.to_string(),
            records,
            pages,
        });

        tracing::info!(model, target = %target, records, pages, "rebuild started");

        let mut start = match &checkpoint {
            Some(cp) => {
                if cp.page_size != plan.page_size() {
                    tracing::warn!(
                        model,
                        checkpoint_page_size = cp.page_size,
                        page_size = plan.page_size(),
                        "page size changed since checkpoint, resuming from record {}",
                        cp.next_page(plan.page_size()) * plan.page_size()
                    );
                }
                cp.next_page(plan.page_size())
            }
            None => 0,
        };
        let mut attempts = 0u64;
        while start < pages {
            attempts += 1;
            self.progress.report(RebuildProgressEvent::Attempt {
                model: model.to_string(),
                attempt: attempts,
                start_page: start,
                pages,
            });

            let job = WorkerJob {
                index: request.index.clone(),
                culture: request.culture.clone(),
                model: model.to_string(),
                page_size: plan.page_size(),
                start_page: start,
            };

            match self.supervisor.run_once(&job).await {
                WorkerOutcome::Success { .. } => break,
                WorkerOutcome::ResourceExhausted { next_page } => {
                    self.progress.report(RebuildProgressEvent::Exhausted {
                        model: model.to_string(),
                        next_page,
                    });
                    let next = self
                        .checkpoints
                        .read(model)
                        .await?
                        .map(|cp| cp.next_page(plan.page_size()))
                        .unwrap_or(0);
                    if next <= start {
                        return Err(RebuildError::NoProgress {
                            model: model.to_string(),
                            page: start,
                        }
                        .into());
                    }
                    if next != next_page {
                        tracing::warn!(model, reported = next_page, checkpoint = next, "worker report disagrees with checkpoint");
                    }
                    start = next;
                }
                WorkerOutcome::Fatal(e) => {
                    return Err(RebuildError::WorkerFailed {
                        model: model.to_string(),
                        message: format!("{:#}", e),
                    }
                    .into());
                }
            }
        }

        self.checkpoints.clear(model).await?;
        self.progress.report(RebuildProgressEvent::Completed {
            model: model.to_string(),
            attempts,
        });

        Ok(RebuildSummary {
            model: model.to_string(),
            records,
            pages,
            attempts,
            elapsed: started.elapsed(),
        })
    }
}

/// Options of the `rebuild` command.
#[derive(Debug, Clone)]
pub struct RebuildOptions {
    pub config_dir: PathBuf,
    pub index: String,
    pub culture: String,
    pub model: Option<String>,
    pub page_size: Option<u64>,
    pub delete: bool,
    pub resume: bool,
    pub keep_going: bool,
    pub progress: ProgressMode,
    pub worker_max_pages: Option<u64>,
    pub worker_memory_mb: Option<u64>,
}

/// Ceiling for rebuild workers: config values, overridden by CLI flags.
pub fn worker_ceiling(config: &Config, max_pages: Option<u64>, memory_mb: Option<u64>) -> ResourceCeiling {
    let mut ceiling = ResourceCeiling::from_config(&config.rebuild);
    if let Some(mb) = memory_mb {
        ceiling.memory_limit_bytes = Some(mb.saturating_mul(1024 * 1024));
    }
    if max_pages.is_some() {
        ceiling.max_pages = max_pages;
    }
    ceiling
}

/// Run the `rebuild` command for one index and culture.
pub async fn run_rebuild(config: &Config, opts: &RebuildOptions) -> Result<()> {
    let started = Instant::now();

    if config.store.driver != StoreDriver::Sqlite {
        return Err(RebuildError::UnsupportedBackend {
            driver: config.store.driver.as_str().to_string(),
        }
        .into());
    }
    if opts.page_size == Some(0) {
        bail!("--page-size must be > 0");
    }
    if opts.worker_max_pages == Some(0) || opts.worker_memory_mb == Some(0) {
        bail!("worker limits must be > 0");
    }

    let ctx = WorkerContext::open(config).await?;
    if !ctx.store.supports_worker_rebuild() {
        return Err(RebuildError::UnsupportedBackend {
            driver: ctx.store.driver().to_string(),
        }
        .into());
    }

    let index = ctx.routes.index(&opts.index)?.clone();
    let models: Vec<String> = match &opts.model {
        Some(model) => vec![model.clone()],
        None => index.models.iter().map(|m| m.name.clone()).collect(),
    };
    let page_size = opts.page_size.unwrap_or(index.rebuild_page_size);

    let launcher = ProcessLauncher::current_exe(
        opts.config_dir.clone(),
        &config.application,
        &config.environment,
        worker_ceiling(config, opts.worker_max_pages, opts.worker_memory_mb),
    )?;
    let mut coordinator = Coordinator::new(ctx, Supervisor::new(Box::new(launcher)), opts.progress.reporter());

    let mut failed: Vec<String> = Vec::new();
    for model in &models {
        let request = RebuildRequest {
            index: opts.index.clone(),
            culture: opts.culture.clone(),
            model: model.clone(),
            page_size,
            purge: opts.delete,
            resume: opts.resume,
        };
        match coordinator.rebuild_model(&request).await {
            Ok(summary) => println!(
                "rebuild {}: {} records in {} pages ({} worker(s), {:.3}s)",
                summary.model,
                summary.records,
                summary.pages,
                summary.attempts,
                summary.elapsed.as_secs_f64()
            ),
            Err(e) if opts.keep_going => {
                tracing::error!(model = %model, "{:#}", e);
                failed.push(model.clone());
            }
            Err(e) => return Err(e),
        }
    }

    if !failed.is_empty() {
        bail!("rebuild failed for {} model(s): {}", failed.len(), failed.join(", "));
    }

    println!("rebuild done in {:.5} seconds", started.elapsed().as_secs_f64());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    const CONFIG: &str = r#"
[store]
path = "./store.sqlite"

[search]
path = "./search.sqlite"

[rebuild]
worker_memory_limit_mb = 128
worker_max_pages = 10
"#;

    #[test]
    fn test_worker_ceiling_overrides() {
        let cfg = parse_config(CONFIG, "frontend", "search").unwrap();

        let ceiling = worker_ceiling(&cfg, None, None);
        assert_eq!(ceiling.memory_limit_bytes, Some(128 * 1024 * 1024));
        assert_eq!(ceiling.max_pages, Some(10));

        let ceiling = worker_ceiling(&cfg, Some(2), Some(32));
        assert_eq!(ceiling.memory_limit_bytes, Some(32 * 1024 * 1024));
        assert_eq!(ceiling.max_pages, Some(2));
    }

    #[tokio::test]
    async fn test_memory_driver_refused_before_any_work() {
        let content = CONFIG.replace("[store]\n", "[store]\ndriver = \"memory\"\n");
        let cfg = parse_config(&content, "frontend", "search").unwrap();
        let opts = RebuildOptions {
            config_dir: PathBuf::from("./config"),
            index: "catalog".into(),
            culture: "en".into(),
            model: None,
            page_size: None,
            delete: false,
            resume: false,
            keep_going: false,
            progress: ProgressMode::Off,
            worker_max_pages: None,
            worker_memory_mb: None,
        };
        let err = run_rebuild(&cfg, &opts).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RebuildError>(),
            Some(RebuildError::UnsupportedBackend { driver }) if driver == "memory"
        ));
    }
}
