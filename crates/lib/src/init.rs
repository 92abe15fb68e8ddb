//! Initialize the configuration directory: create ~/.advisor, a default config and the
//! storage directory for session state.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config;

/// Ensure `advisor init` has been run (config file and storage directory exist).
pub fn require_initialized(config_path: &Path, config: &config::Config) -> Result<()> {
    if !config_path.exists() {
        anyhow::bail!(
            "configuration not initialized; run `advisor init` first (config file not found: {})",
            config_path.display()
        );
    }
    let storage = config::resolve_storage_dir(config, config_path);
    if !storage.exists() {
        anyhow::bail!(
            "configuration not initialized; run `advisor init` first (storage directory not found: {})",
            storage.display()
        );
    }
    Ok(())
}

/// Create the config directory and default files if they do not exist.
/// - Writes `config.json` with `{}` if missing.
/// - Creates the storage directory named by the config (default `storage`).
///
/// Returns the storage directory.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        std::fs::write(config_path, b"{}")
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    let (config, _) = config::load_config(Some(config_path.to_path_buf()))?;
    let storage = config::resolve_storage_dir(&config, config_path);
    if !storage.exists() {
        std::fs::create_dir_all(&storage)
            .with_context(|| format!("creating storage directory {}", storage.display()))?;
        log::info!("created storage directory at {}", storage.display());
    } else {
        log::debug!("storage directory already exists at {}, skipping", storage.display());
    }

    Ok(storage)
}
