//! In-memory [`SearchBackend`] for tests and embedding.
//!
//! Committed documents live in a `BTreeMap` per target; writes are staged
//! until [`SearchBackend::commit`]. Every call is counted so callers can
//! assert exactly which backend operations a code path issued.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use super::{PendingWrite, SearchBackend};
use crate::models::{Document, IndexTarget};

/// Counts of backend calls, by operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendCalls {
    pub upserts: u64,
    pub deletes: u64,
    pub tag_deletes: u64,
    pub commits: u64,
}

impl BackendCalls {
    pub fn total(&self) -> u64 {
        self.upserts + self.deletes + self.tag_deletes + self.commits
    }
}

#[derive(Default)]
struct State {
    committed: HashMap<IndexTarget, BTreeMap<String, Document>>,
    staged: HashMap<IndexTarget, Vec<PendingWrite>>,
    /// Write log in call order: (operation, target, key or tag).
    log: Vec<(&'static str, IndexTarget, String)>,
}

/// In-memory search backend.
#[derive(Default)]
pub struct MemorySearchBackend {
    state: Mutex<State>,
    upserts: AtomicU64,
    deletes: AtomicU64,
    tag_deletes: AtomicU64,
    commits: AtomicU64,
    failing: AtomicBool,
}

impl MemorySearchBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> BackendCalls {
        BackendCalls {
            upserts: self.upserts.load(Ordering::SeqCst),
            deletes: self.deletes.load(Ordering::SeqCst),
            tag_deletes: self.tag_deletes.load(Ordering::SeqCst),
            commits: self.commits.load(Ordering::SeqCst),
        }
    }

    /// Committed documents of a target, ordered by key.
    pub fn documents(&self, target: &IndexTarget) -> Vec<Document> {
        self.lock()
            .map(|s| {
                s.committed
                    .get(target)
                    .map(|docs| docs.values().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    pub fn document(&self, target: &IndexTarget, key: &str) -> Option<Document> {
        self.lock()
            .ok()
            .and_then(|s| s.committed.get(target).and_then(|d| d.get(key).cloned()))
    }

    /// Operations in call order, as `(op, target, key-or-tag)`.
    pub fn log(&self) -> Vec<(&'static str, IndexTarget, String)> {
        self.lock().map(|s| s.log.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("memory backend lock poisoned"))
    }

    fn stage(&self, op: &'static str, target: &IndexTarget, label: &str, write: PendingWrite) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("injected failure on {} {} in {}", op, label, target);
        }
        let mut state = self.lock()?;
        state.log.push((op, target.clone(), label.to_string()));
        state.staged.entry(target.clone()).or_default().push(write);
        Ok(())
    }
}

#[async_trait]
impl SearchBackend for MemorySearchBackend {
    async fn upsert(&self, target: &IndexTarget, doc: &Document) -> Result<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.stage("upsert", target, &doc.key, PendingWrite::Upsert(doc.clone()))
    }

    async fn delete(&self, target: &IndexTarget, key: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.stage("delete", target, key, PendingWrite::Delete(key.to_string()))
    }

    async fn delete_by_tag(&self, target: &IndexTarget, tag: &str) -> Result<()> {
        self.tag_deletes.fetch_add(1, Ordering::SeqCst);
        self.stage("delete_by_tag", target, tag, PendingWrite::DeleteByTag(tag.to_string()))
    }

    async fn commit(&self, target: &IndexTarget) -> Result<u64> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            bail!("injected failure on commit in {}", target);
        }
        let mut state = self.lock()?;
        let staged = state.staged.remove(target).unwrap_or_default();
        let applied = staged.len() as u64;
        let docs = state.committed.entry(target.clone()).or_default();
        for write in staged {
            match write {
                PendingWrite::Upsert(doc) => {
                    docs.insert(doc.key.clone(), doc);
                }
                PendingWrite::Delete(key) => {
                    docs.remove(&key);
                }
                PendingWrite::DeleteByTag(tag) => docs.retain(|_, d| d.tag != tag),
            }
        }
        Ok(applied)
    }
}
