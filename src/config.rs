//! Application configuration.
//!
//! Each application has one TOML file, `{config_dir}/{application}.toml`.
//! An optional `[environments.<env>]` table overrides selected settings for
//! the environment chosen with `--env`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use index_sync_core::routing::{IndexDefinition, RouteTable, TypeHierarchy};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub search: SearchConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub rebuild: RebuildConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Record type hierarchy: child type → parent type.
    #[serde(default)]
    pub types: HashMap<String, String>,
    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,
    #[serde(default)]
    pub environments: HashMap<String, EnvironmentOverrides>,

    #[serde(skip)]
    pub application: String,
    #[serde(skip)]
    pub environment: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreDriver {
    Sqlite,
    Memory,
}

impl StoreDriver {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreDriver::Sqlite => "sqlite",
            StoreDriver::Memory => "memory",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_driver")]
    pub driver: StoreDriver,
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_driver() -> StoreDriver {
    StoreDriver::Sqlite
}
fn default_store_path() -> PathBuf {
    PathBuf::from("./data/store.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_state_dir")]
    pub dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("./data/search_state")
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SyncConfig {
    /// Disable all live (hook-driven) index writes.
    #[serde(default)]
    pub disable_live_indexing: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RebuildConfig {
    #[serde(default = "default_worker_memory_limit_mb")]
    pub worker_memory_limit_mb: u64,
    /// Pages a single worker may process before it must hand over.
    #[serde(default)]
    pub worker_max_pages: Option<u64>,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            worker_memory_limit_mb: default_worker_memory_limit_mb(),
            worker_max_pages: None,
        }
    }
}

fn default_worker_memory_limit_mb() -> u64 {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct EnvironmentOverrides {
    #[serde(default)]
    pub disable_live_indexing: Option<bool>,
    #[serde(default)]
    pub log_level: Option<String>,
}

impl Config {
    /// Build the route table for this configuration.
    pub fn route_table(&self) -> Result<RouteTable> {
        let hierarchy = TypeHierarchy::new(self.types.clone())?;
        Ok(RouteTable::build(self.indexes.clone(), hierarchy)?)
    }

    fn apply_environment(&mut self, environment: &str) {
        if let Some(overrides) = self.environments.get(environment).cloned() {
            if let Some(disable) = overrides.disable_live_indexing {
                self.sync.disable_live_indexing = disable;
            }
            if let Some(level) = overrides.log_level {
                self.logging.level = level;
            }
        }
        self.environment = environment.to_string();
    }
}

/// Location of an application's configuration file.
pub fn config_path(config_dir: &Path, application: &str) -> PathBuf {
    config_dir.join(format!("{}.toml", application))
}

pub fn load_config(config_dir: &Path, application: &str, environment: &str) -> Result<Config> {
    let path = config_path(config_dir, application);
    if !path.is_file() {
        bail!(
            "Application \"{}\" does not exist (no config file at {})",
            application,
            path.display()
        );
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content, application, environment)
        .with_context(|| format!("Invalid config file: {}", path.display()))
}

pub fn parse_config(content: &str, application: &str, environment: &str) -> Result<Config> {
    let mut config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.application = application.to_string();
    config.apply_environment(environment);

    for index in &config.indexes {
        if index.cultures.is_empty() {
            bail!("indexes.{}.cultures must list at least one culture", index.name);
        }
        if index.rebuild_page_size == 0 {
            bail!("indexes.{}.rebuild_page_size must be > 0", index.name);
        }
        if index.models.is_empty() {
            tracing::warn!(index = %index.name, "index has no configured models");
        }
    }

    if config.rebuild.worker_memory_limit_mb == 0 {
        bail!("rebuild.worker_memory_limit_mb must be > 0");
    }
    if config.rebuild.worker_max_pages == Some(0) {
        bail!("rebuild.worker_max_pages must be > 0 when set");
    }

    // Surfaces hierarchy cycles and duplicate index names at load time.
    config.route_table()?;

    Ok(config)
}
