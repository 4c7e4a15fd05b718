//! CLI subcommands and the wiring they share

pub mod config;
pub mod history;
pub mod plan;
pub mod sync;

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;

use tidesync_cache::{DatabasePool, SqliteHistoryStore};
use tidesync_core::config::Config;
use tidesync_core::domain::SyncKey;
use tidesync_sync::filesystem::LocalFileSystemAdapter;
use tidesync_sync::remote_dir::DirectoryRemoteStore;
use tidesync_sync::SyncEngine;

/// Loads the configuration and refuses to run on an invalid one
pub fn load_valid_config(config_path: &Path) -> Result<Config> {
    let config = if config_path.exists() {
        Config::load(config_path)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?
    } else {
        Config::default()
    };
    info!(config_path = %config_path.display(), "Loaded configuration");

    let errors = config.validate();
    if let Some(first) = errors.first() {
        bail!(
            "invalid configuration ({} error(s)), first: {}; run 'tidesync config validate'",
            errors.len(),
            first
        );
    }
    Ok(config)
}

pub async fn open_history(config: &Config) -> Result<Arc<SqliteHistoryStore>> {
    let pool = DatabasePool::new(&config.storage.database)
        .await
        .context("Failed to open history database")?;
    Ok(Arc::new(SqliteHistoryStore::new(pool.pool().clone())))
}

/// Builds an engine over the configured local tree and directory remote
pub async fn build_engine(config: &Config) -> Result<SyncEngine> {
    let local = LocalFileSystemAdapter::new(&config.sync.local_root)
        .with_trash(config.sync.use_trash);
    let remote = DirectoryRemoteStore::new(&config.sync.remote_root);
    let history = open_history(config).await?;
    Ok(SyncEngine::new(
        config.clone(),
        Arc::new(remote),
        Arc::new(local),
        history,
    ))
}

/// Parses a `--folder` argument into a folder key
pub fn parse_folder(folder: Option<&str>) -> Result<Option<SyncKey>> {
    folder
        .map(|raw| {
            let trimmed = raw.trim_start_matches("./").trim_end_matches('/');
            SyncKey::folder(trimmed).with_context(|| format!("Invalid folder '{raw}'"))
        })
        .transpose()
}
