//! `duplex config` commands.

use crate::config::{backup_existing_config, read_config, write_config, ConfigSource};
use crate::ui;
use duplex_types::config::default_config_path;
use duplex_types::NodeConfig;
use std::path::{Path, PathBuf};

pub fn cmd_config_show(path: Option<&Path>) {
    let (config, source) = read_config(path);
    match &source {
        ConfigSource::File(path) => ui::kv_ok("Config", &path.display().to_string()),
        ConfigSource::Missing(path) => {
            ui::kv("Config", &format!("{} (not found, showing defaults)", path.display()));
            ui::hint("run `duplex config init` to create it");
        }
        ConfigSource::Invalid { path, error } => {
            ui::error(&format!("{} is invalid: {error}", path.display()));
            ui::hint("showing defaults");
        }
    }
    ui::blank();

    match config.to_toml() {
        Ok(text) => println!("{text}"),
        Err(e) => {
            ui::error(&format!("Failed to render config: {e}"));
            std::process::exit(1);
        }
    }
}

pub fn cmd_config_init(path: Option<&Path>, force: bool) {
    let path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    match init_config(&path, force) {
        Ok(backup) => {
            if let Some(backup) = backup {
                ui::kv("Backup", &backup.display().to_string());
            }
            ui::success(&format!("Wrote {}", path.display()));
        }
        Err(InitError::Exists) => {
            ui::error_with_fix(
                &format!("{} already exists", path.display()),
                "pass --force to replace it",
            );
            std::process::exit(1);
        }
        Err(InitError::Io(e)) => {
            ui::error(&format!("Failed to write {}: {e}", path.display()));
            std::process::exit(1);
        }
    }
}

#[derive(Debug)]
enum InitError {
    Exists,
    Io(std::io::Error),
}

/// Write a default config to `path`, backing up any file it replaces.
fn init_config(path: &Path, force: bool) -> Result<Option<PathBuf>, InitError> {
    if path.exists() && !force {
        return Err(InitError::Exists);
    }
    let backup = backup_existing_config(path).map_err(InitError::Io)?;
    write_config(path, &NodeConfig::default()).map_err(InitError::Io)?;
    Ok(backup)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert!(init_config(&path, false).unwrap().is_none());

        let (config, source) = read_config(Some(&path));
        assert!(matches!(source, ConfigSource::File(_)));
        assert_eq!(config.listen_addr.port(), 7700);
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "node_id = \"keep\"\n").unwrap();

        assert!(matches!(init_config(&path, false), Err(InitError::Exists)));
        let (config, _) = read_config(Some(&path));
        assert_eq!(config.node_id, "keep");
    }

    #[test]
    fn test_force_keeps_a_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "node_id = \"old\"\n").unwrap();

        let backup = init_config(&path, true).unwrap().unwrap();
        assert!(std::fs::read_to_string(backup).unwrap().contains("old"));
        let (config, _) = read_config(Some(&path));
        assert_ne!(config.node_id, "old");
    }
}
