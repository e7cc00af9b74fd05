//! # index-sync core
//!
//! Runtime-agnostic logic for keeping a search index in step with a record
//! store: data models, index routing, the per-phase mutation queue, the live
//! sync dispatcher, page arithmetic, and the store, backend, and checkpoint
//! abstractions.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. The `index-sync`
//! crate supplies the SQLite collaborators, the checkpoint files, and the
//! worker process machinery on top of it.

pub mod backend;
pub mod checkpoint;
pub mod dispatcher;
pub mod error;
pub mod models;
pub mod paging;
pub mod queue;
pub mod routing;
pub mod store;
