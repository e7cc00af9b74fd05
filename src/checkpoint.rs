//! File-backed [`CheckpointStore`].
//!
//! One file per model at `{state_dir}/update_{model_snake_case}.state`
//! holding the [`Checkpoint`] as JSON: target, page size, and last completed
//! page. Writes go to a temporary file first and are renamed into place, so
//! a worker killed mid-write leaves either the old or the new checkpoint,
//! never a torn file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

use index_sync_core::checkpoint::{Checkpoint, CheckpointStore};
use index_sync_core::models::underscore;

const STATE_PREFIX: &str = "update_";
const STATE_SUFFIX: &str = ".state";

pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic checkpoint path for a model.
    pub fn path_for(&self, model: &str) -> PathBuf {
        self.dir
            .join(format!("{}{}{}", STATE_PREFIX, underscore(model), STATE_SUFFIX))
    }

    /// All readable checkpoint files present, as (file stem, checkpoint).
    pub fn list(&self) -> Result<Vec<(String, Checkpoint)>> {
        let mut out = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(model) = name
                .strip_prefix(STATE_PREFIX)
                .and_then(|n| n.strip_suffix(STATE_SUFFIX))
            else {
                continue;
            };
            let text = std::fs::read_to_string(&path)?;
            if let Ok(checkpoint) = serde_json::from_str::<Checkpoint>(&text) {
                out.push((model.to_string(), checkpoint));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn read(&self, model: &str) -> Result<Option<Checkpoint>> {
        let path = self.path_for(model);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read checkpoint {}", path.display()))
            }
        };
        let checkpoint = serde_json::from_str(&text)
            .with_context(|| format!("Corrupt checkpoint {}: {:?}", path.display(), text))?;
        Ok(Some(checkpoint))
    }

    async fn write(&self, model: &str, checkpoint: &Checkpoint) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create state dir {}", self.dir.display()))?;
        let path = self.path_for(model);
        let tmp = path.with_extension("state.tmp");
        tokio::fs::write(&tmp, serde_json::to_string(checkpoint)?).await?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to write checkpoint {}", path.display()))?;
        Ok(())
    }

    async fn clear(&self, model: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(model)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
