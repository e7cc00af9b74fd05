//! Search backend abstraction.
//!
//! The [`SearchBackend`] trait is the whole contract the sync and rebuild
//! paths need from a search engine: upsert, delete by key, delete by tag, and
//! commit. Writes issued for a target become visible on [`commit`].
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! [`commit`]: SearchBackend::commit

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Document, IndexTarget};

/// Abstract search-index backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](SearchBackend::upsert) | Insert or replace a document by key |
/// | [`delete`](SearchBackend::delete) | Delete one document by key |
/// | [`delete_by_tag`](SearchBackend::delete_by_tag) | Delete every document with a tag |
/// | [`commit`](SearchBackend::commit) | Make staged writes for a target visible |
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Stage an upsert. Upserting the same key twice leaves one document.
    async fn upsert(&self, target: &IndexTarget, doc: &Document) -> Result<()>;

    /// Stage a delete. Deleting a missing key is not an error.
    async fn delete(&self, target: &IndexTarget, key: &str) -> Result<()>;

    /// Stage a delete of all documents tagged `tag`.
    async fn delete_by_tag(&self, target: &IndexTarget, tag: &str) -> Result<()>;

    /// Apply staged writes for `target`. Returns how many were applied.
    async fn commit(&self, target: &IndexTarget) -> Result<u64>;
}

/// A staged write awaiting commit.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingWrite {
    Upsert(Document),
    Delete(String),
    DeleteByTag(String),
}
