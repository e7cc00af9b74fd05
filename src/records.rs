//! Live record mutations from the command line.
//!
//! `isync record put` and `isync record delete` save or delete one record
//! through the record store's lifecycle hooks, with a [`SyncDispatcher`]
//! attached, exactly as an application would. The index follows the store:
//! one delete + insert pair per saved record, one delete per deleted record,
//! unless live indexing is disabled for the environment.
//!
//! Each command is its own process, so the in-memory store driver would
//! lose the record on exit while its documents stay indexed. Only the
//! sqlite driver is accepted here.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::Value;

use index_sync_core::dispatcher::{SyncDispatcher, SyncOptions, SyncOutcome};
use index_sync_core::models::{Record, RecordIdentity};
use index_sync_core::store::RecordStore;

use crate::config::{Config, StoreDriver};
use crate::db;
use crate::sqlite_backend::SqliteSearchBackend;
use crate::sqlite_store::SqliteRecordStore;

/// Open the configured record store for a one-shot mutation.
pub async fn open_store(config: &Config) -> Result<Arc<dyn RecordStore>> {
    if config.store.driver == StoreDriver::Memory {
        bail!(
            "store driver \"{}\" keeps records only inside one process; record commands need the sqlite driver",
            config.store.driver.as_str()
        );
    }
    let store: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::new(db::connect_store(config).await?));
    Ok(store)
}

async fn dispatcher(config: &Config) -> Result<SyncDispatcher> {
    let backend = SqliteSearchBackend::new(db::connect_search(config).await?);
    Ok(SyncDispatcher::new(
        Arc::new(config.route_table()?),
        Arc::new(backend),
        SyncOptions {
            suppress: config.sync.disable_live_indexing,
        },
    ))
}

/// Split a comma-separated key into its components.
pub fn parse_key(key: &str) -> Result<Vec<String>> {
    let parts: Vec<String> = key.split(',').map(|p| p.trim().to_string()).collect();
    if parts.iter().any(|p| p.is_empty()) {
        bail!("Invalid record key '{}': components must be non-empty", key);
    }
    Ok(parts)
}

/// Parse `name=value`. Values that parse as JSON keep their JSON type, so
/// `title={"en":"Hi","fr":"Salut"}` sets a per-culture field; anything else
/// is a string.
pub fn parse_field(field: &str) -> Result<(String, Value)> {
    let Some((name, raw)) = field.split_once('=') else {
        bail!("Invalid field '{}': expected name=value", field);
    };
    if name.is_empty() {
        bail!("Invalid field '{}': empty name", field);
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((name.to_string(), value))
}

fn describe(outcome: SyncOutcome) -> &'static str {
    match outcome {
        SyncOutcome::Synced => "index updated",
        SyncOutcome::Suppressed => "live indexing disabled",
        SyncOutcome::Failed => "index update failed, see log",
        SyncOutcome::Skipped | SyncOutcome::NotQueued | SyncOutcome::Queued => "index unchanged",
    }
}

pub async fn run_put(config: &Config, model: &str, key: &str, fields: &[String]) -> Result<()> {
    let store = open_store(config).await?;
    let mut hooks = dispatcher(config).await?;

    let identity = RecordIdentity::new(model, parse_key(key)?);
    let mut record = match store.find(&identity).await? {
        Some(existing) => existing,
        None => Record::new(model, identity.key.clone()),
    };
    for field in fields {
        let (name, value) = parse_field(field)?;
        record.set(name, value);
    }

    let outcome = store
        .save(&mut record, &mut hooks)
        .await
        .with_context(|| format!("Failed to save {}", identity))?;
    println!("saved {} ({})", identity, describe(outcome));
    Ok(())
}

pub async fn run_delete(config: &Config, model: &str, key: &str) -> Result<()> {
    let store = open_store(config).await?;
    let mut hooks = dispatcher(config).await?;

    let identity = RecordIdentity::new(model, parse_key(key)?);
    let Some(record) = store.find(&identity).await? else {
        bail!("Record {} does not exist", identity);
    };

    let outcome = store
        .delete(&record, &mut hooks)
        .await
        .with_context(|| format!("Failed to delete {}", identity))?;
    println!("deleted {} ({})", identity, describe(outcome));
    Ok(())
}
