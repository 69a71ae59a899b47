//! Configuration for backlog.
//!
//! Two KDL files share one schema (see [`schema`]):
//!
//! - System: `~/.config/backlog/config.kdl`
//! - Team: `<data_dir>/<team>/config.kdl`
//!
//! ## Precedence
//!
//! CLI flag > environment > team config > system config > defaults.
//!
//! Use the [`resolver`] module for precedence resolution.

pub mod resolver;
pub mod schema;

pub use resolver::{
    ConfigEntry, ConfigOverrides, ConfigPaths, Resolved, ResolvedConfig, SYNC_ENDPOINT_ENV,
    TEAM_ENV, ValueSource, resolve_config,
};
pub use schema::{BacklogConfig, CONFIG_KEYS};

use kdl::KdlDocument;
use std::fs;
use std::path::{Path, PathBuf};

use crate::storage::{TEAM_CONFIG_FILE, get_storage_dir};
use crate::{Error, Result};

/// Directory name under the platform config dir.
pub const CONFIG_DIR_NAME: &str = "backlog";

/// Path of the system config, under `config_dir` or the platform default.
pub fn system_config_path(config_dir: Option<&Path>) -> Option<PathBuf> {
    let base = match config_dir {
        Some(dir) => dir.to_path_buf(),
        None => dirs::config_dir()?,
    };
    Some(base.join(CONFIG_DIR_NAME).join(TEAM_CONFIG_FILE))
}

/// Path of a team's config file.
pub fn team_config_path(data_dir: &Path, team: &str) -> Result<PathBuf> {
    Ok(get_storage_dir(data_dir, team)?.join(TEAM_CONFIG_FILE))
}

/// Load a config file. A missing file is an empty config.
pub fn load_config(path: &Path) -> Result<BacklogConfig> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BacklogConfig::new()),
        Err(e) => return Err(e.into()),
    };
    let doc: KdlDocument = content
        .parse()
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    let config = BacklogConfig::from_kdl(&doc);
    config
        .validate()
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    Ok(config)
}

/// Write a config file, creating its directory.
pub fn save_config(path: &Path, config: &BacklogConfig) -> Result<()> {
    config.validate().map_err(Error::Config)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, config.to_kdl().to_string())?;
    Ok(())
}
