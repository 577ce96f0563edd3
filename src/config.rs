// src/config.rs

//! Configuration loading utilities.
//!
//! The config file lives in the data directory next to the state files.
//! A missing file means defaults; a malformed or invalid one aborts startup.

use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::models::Config;

/// Config file name inside the data directory.
pub const CONFIG_FILE: &str = "config.toml";

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE)
}

/// Load the TOML config, falling back to defaults only when the file is absent.
pub fn load_config_file(path: &Path) -> Result<Config> {
    match Config::load(path) {
        Ok(config) => {
            log::info!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        Err(AppError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            log::warn!("No config at {}; using defaults", path.display());
            Ok(Config::default())
        }
        Err(e) => Err(AppError::config(format!(
            "Failed to load {}: {e}",
            path.display()
        ))),
    }
}

/// Load config from `data_dir`, apply environment overrides and validate.
pub fn load_config(data_dir: &Path) -> Result<Config> {
    let mut config = load_config_file(&config_path(data_dir))?;
    config.apply_env();
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = load_config_file(&config_path(tmp.path())).unwrap();
        assert_eq!(config.schedule.staleness_hours, 24);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(config_path(tmp.path()), "[schedule\nstaleness_hours = ").unwrap();
        assert!(matches!(
            load_config_file(&config_path(tmp.path())),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn reads_sections_from_file() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            config_path(tmp.path()),
            r#"
            [sources]
            lenders = [{ id = 12, name = "Acme" }]

            [dispatch]
            privileged_recipients = ["100"]
            "#,
        )
        .unwrap();

        let config = load_config_file(&config_path(tmp.path())).unwrap();
        assert_eq!(config.sources.lenders[0].id, 12);
        assert!(config.dispatch.is_privileged("100"));
        assert!(config.validate().is_ok());
    }
}
