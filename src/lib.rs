//! # index-sync
//!
//! Keeps a search index consistent with a relational record store.
//!
//! Two paths write to the index:
//!
//! - **Live sync.** Record saves and deletes pass through lifecycle hooks.
//!   The [`SyncDispatcher`](index_sync_core::dispatcher::SyncDispatcher)
//!   queues the identity before the write and, once the store write has
//!   happened, replaces the record's documents in every routed
//!   (index, culture) target.
//! - **Batch rebuild.** The [`rebuild`] coordinator pages through a model's
//!   records in worker processes with a resource ceiling. Each worker
//!   checkpoints every committed page so a replacement worker, or a later
//!   `--resume`, continues where it stopped.
//!
//! ## Architecture
//!
//! ```text
//!   record save/delete                     isync rebuild
//!          │                                     │
//!          ▼                                     ▼
//!  ┌───────────────┐   routes   ┌──────────┐  ┌─────────────┐  spawn  ┌──────────┐
//!  │ SyncDispatcher│──────────▶│RouteTable│◀─│ Coordinator │───────▶│  worker  │
//!  └──────┬────────┘           └──────────┘  └──────┬──────┘        └────┬─────┘
//!         │                                         │ checkpoint         │ page, commit,
//!         ▼                                         ▼                    ▼ checkpoint
//!  ┌────────────────────────────────────┐   ┌───────────────┐   ┌──────────────┐
//!  │ SearchBackend (search_documents)   │◀──│ state/*.state │◀──│ RecordStore  │
//!  └────────────────────────────────────┘   └───────────────┘   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Per-application TOML configuration |
//! | [`db`] | SQLite connection pools |
//! | [`migrate`] | Store and index schemas |
//! | [`sqlite_store`] | SQLite [`RecordStore`](index_sync_core::store::RecordStore) |
//! | [`sqlite_backend`] | SQLite [`SearchBackend`](index_sync_core::backend::SearchBackend) |
//! | [`checkpoint`] | File-backed rebuild checkpoints |
//! | [`worker`] | One bounded rebuild worker |
//! | [`supervisor`] | Worker launch and exit classification |
//! | [`rebuild`] | Rebuild coordinator and the `rebuild` command |
//! | [`records`] | `record put` / `record delete` |
//! | [`routes`] | `routes` command |
//! | [`status`] | `status` command |
//! | [`progress`] | Rebuild progress reporting |
//! | [`logging`] | tracing subscriber setup |

pub mod checkpoint;
pub mod config;
pub mod db;
pub mod logging;
pub mod migrate;
pub mod progress;
pub mod rebuild;
pub mod records;
pub mod routes;
pub mod sqlite_backend;
pub mod sqlite_store;
pub mod status;
pub mod supervisor;
pub mod worker;
