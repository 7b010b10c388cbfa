//! Configuration loading.
//!
//! A missing or unreadable config file never stops the CLI: it falls back to
//! defaults and says so in the log.

use chrono::Utc;
use duplex_types::config::default_config_path;
use duplex_types::NodeConfig;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Where the effective configuration came from.
#[derive(Debug)]
pub enum ConfigSource {
    File(PathBuf),
    Missing(PathBuf),
    Invalid { path: PathBuf, error: String },
}

/// Read the config at `path` (or the default location) without logging.
///
/// Split from [`report`] so the caller can install tracing with the
/// configured log level before anything is logged.
pub fn read_config(path: Option<&Path>) -> (NodeConfig, ConfigSource) {
    let path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !path.exists() {
        return (NodeConfig::default(), ConfigSource::Missing(path));
    }

    let parsed = std::fs::read_to_string(&path)
        .map_err(|e| e.to_string())
        .and_then(|contents| NodeConfig::from_toml(&contents).map_err(|e| e.to_string()));
    match parsed {
        Ok(config) => (config, ConfigSource::File(path)),
        Err(error) => (NodeConfig::default(), ConfigSource::Invalid { path, error }),
    }
}

/// Log where the configuration came from.
pub fn report(source: &ConfigSource) {
    match source {
        ConfigSource::File(path) => info!(path = %path.display(), "Loaded configuration"),
        ConfigSource::Missing(path) => {
            info!(path = %path.display(), "Config file not found, using defaults")
        }
        ConfigSource::Invalid { path, error } => warn!(
            path = %path.display(),
            error = %error,
            "Failed to load config, using defaults"
        ),
    }
}

/// Rename an existing config file to a timestamped backup.
pub fn backup_existing_config(config_path: &Path) -> std::io::Result<Option<PathBuf>> {
    if !config_path.exists() {
        return Ok(None);
    }

    let file_name = config_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("config.toml");
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let backup_path = config_path.with_file_name(format!("{file_name}.backup-{timestamp}"));

    std::fs::rename(config_path, &backup_path)?;
    Ok(Some(backup_path))
}

/// Write `config` to `path`, creating parent directories.
pub fn write_config(path: &Path, config: &NodeConfig) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let text = config
        .to_toml()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, text)
}
