//! # index-sync CLI (`isync`)
//!
//! The `isync` binary initializes the store and index schemas, performs live
//! record mutations through the sync dispatcher, inspects routing and index
//! state, and runs checkpointed batch rebuilds.
//!
//! ## Usage
//!
//! ```bash
//! isync --config-dir ./config --env search <command> <application> ...
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `isync init <app>` | Create the record store and search index schemas |
//! | `isync routes <app>` | Print the type → (index, culture) route table |
//! | `isync status <app>` | Record counts, document counts, and pending checkpoints |
//! | `isync record put <app> <model> <key>` | Save a record and sync its documents |
//! | `isync record delete <app> <model> <key>` | Delete a record and its documents |
//! | `isync rebuild <app> <index> <culture>` | Rebuild documents from the store |
//!
//! ## Examples
//!
//! ```bash
//! # Rebuild every model of the "catalog" index in English, purging first
//! isync rebuild frontend catalog en --delete
//!
//! # Continue an interrupted rebuild of one model
//! isync rebuild frontend catalog en --model Article --resume
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use index_sync::config;
use index_sync::logging;
use index_sync::migrate;
use index_sync::progress::ProgressMode;
use index_sync::rebuild::{self, RebuildOptions};
use index_sync::records;
use index_sync::routes;
use index_sync::status;
use index_sync::worker::{self, WorkerJob};

/// index-sync: keep a search index consistent with a record store.
#[derive(Parser)]
#[command(
    name = "isync",
    about = "index-sync: keep a search index consistent with a relational record store",
    version,
    long_about = "index-sync mirrors record mutations into a search index as they happen, \
    and rebuilds whole models from the store in resumable, memory-bounded worker processes."
)]
struct Cli {
    /// Directory holding one `<application>.toml` per application.
    #[arg(long, global = true, default_value = "./config")]
    config_dir: PathBuf,

    /// Environment whose `[environments.<env>]` overrides apply.
    #[arg(long, global = true, default_value = "search")]
    env: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the record store and search index schemas.
    ///
    /// Idempotent: running it on an initialized application is safe.
    Init { application: String },

    /// Print the route table.
    Routes { application: String },

    /// Show record counts, document counts, and rebuild checkpoints.
    Status { application: String },

    /// Save or delete single records with live index sync.
    Record {
        #[command(subcommand)]
        action: RecordAction,
    },

    /// Rebuild an index's documents from the record store.
    ///
    /// Each model is paged through by worker processes with a bounded memory
    /// footprint. A worker that reaches its ceiling hands over to a fresh
    /// one, which continues after the last checkpointed page.
    Rebuild {
        application: String,
        index: String,
        culture: String,

        /// Rebuild only this model (default: every model of the index).
        #[arg(long)]
        model: Option<String>,

        /// Records per page (default: the index's rebuild_page_size).
        #[arg(long)]
        page_size: Option<u64>,

        /// Delete the model's existing documents before rebuilding.
        #[arg(long)]
        delete: bool,

        /// Continue from an existing checkpoint instead of starting over.
        #[arg(long)]
        resume: bool,

        /// Continue with the remaining models after one fails.
        #[arg(long)]
        keep_going: bool,

        /// Progress output on stderr (default: human on a TTY, off otherwise).
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,

        /// Pages each worker may index before handing over.
        #[arg(long)]
        worker_max_pages: Option<u64>,

        /// Resident memory limit for each worker, in MB.
        #[arg(long)]
        worker_memory_mb: Option<u64>,
    },

    /// Run one rebuild worker (spawned by `rebuild`).
    #[command(hide = true)]
    Worker {
        application: String,
        index: String,
        culture: String,
        model: String,
        #[arg(long)]
        page_size: u64,
        #[arg(long, default_value_t = 0)]
        start_page: u64,
        #[arg(long)]
        max_pages: Option<u64>,
        #[arg(long)]
        memory_mb: Option<u64>,
    },
}

#[derive(Subcommand)]
enum RecordAction {
    /// Create or update a record.
    Put {
        application: String,
        model: String,
        /// Primary key; comma-separated for composite keys.
        key: String,
        /// Field assignment `name=value`; JSON values keep their type.
        #[arg(long = "field", short = 'f')]
        fields: Vec<String>,
    },
    /// Delete a record.
    Delete {
        application: String,
        model: String,
        key: String,
    },
}

impl Commands {
    fn application(&self) -> &str {
        match self {
            Commands::Init { application }
            | Commands::Routes { application }
            | Commands::Status { application }
            | Commands::Rebuild { application, .. }
            | Commands::Worker { application, .. } => application,
            Commands::Record { action } => match action {
                RecordAction::Put { application, .. } | RecordAction::Delete { application, .. } => application,
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config_dir, cli.command.application(), &cli.env)?;
    logging::init(Some(&cfg.logging.level));

    match cli.command {
        Commands::Init { .. } => {
            migrate::run_migrations(&cfg).await?;
            println!("Application {} initialized.", cfg.application);
        }
        Commands::Routes { .. } => {
            routes::list_routes(&cfg)?;
        }
        Commands::Status { .. } => {
            status::run_status(&cfg).await?;
        }
        Commands::Record { action } => match action {
            RecordAction::Put {
                model, key, fields, ..
            } => {
                records::run_put(&cfg, &model, &key, &fields).await?;
            }
            RecordAction::Delete { model, key, .. } => {
                records::run_delete(&cfg, &model, &key).await?;
            }
        },
        Commands::Rebuild {
            index,
            culture,
            model,
            page_size,
            delete,
            resume,
            keep_going,
            progress,
            worker_max_pages,
            worker_memory_mb,
            ..
        } => {
            let opts = RebuildOptions {
                config_dir: cli.config_dir.clone(),
                index,
                culture,
                model,
                page_size,
                delete,
                resume,
                keep_going,
                progress: progress.unwrap_or_else(ProgressMode::default_for_tty),
                worker_max_pages,
                worker_memory_mb,
            };
            rebuild::run_rebuild(&cfg, &opts).await?;
        }
        Commands::Worker {
            index,
            culture,
            model,
            page_size,
            start_page,
            max_pages,
            memory_mb,
            ..
        } => {
            let job = WorkerJob {
                index,
                culture,
                model,
                page_size,
                start_page,
            };
            let ceiling = rebuild::worker_ceiling(&cfg, max_pages, memory_mb);
            let code = worker::run_worker_process(&cfg, &job, &ceiling).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
    }

    Ok(())
}
