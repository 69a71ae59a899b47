//! Command implementations for the `bl` CLI.
//!
//! Each command runs one storage read or update and returns a result that
//! renders as compact JSON (default) or human text (`-H`). Commands are
//! organized by area:
//! - `items` - items, subitems, blockers and workspaces
//! - `sessions` - the session ("window") registry
//! - `planning` - epics and releases
//! - this module - init, doctor, export and config

mod items;
mod planning;
mod sessions;

pub use items::*;
pub use planning::*;
pub use sessions::*;

use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::{self, BacklogConfig, ConfigEntry, ResolvedConfig};
use crate::models::Document;
use crate::models::doctor::{self, Issue};
use crate::storage::Storage;
use crate::sync::TeamRegistration;
use crate::{Error, Result};

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to a single-line JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

/// Compact JSON for any serializable result.
pub(crate) fn json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!(r#"{{"error":"{}"}}"#, e))
}

// === Init ===

#[derive(Serialize)]
pub struct InitResult {
    pub initialized: bool,
    pub team: String,
    pub id_prefix: String,
    pub path: PathBuf,
}

impl Output for InitResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.initialized {
            format!(
                "Initialized backlog for team {} ({}) at {}",
                self.team,
                self.id_prefix,
                self.path.display()
            )
        } else {
            format!(
                "Backlog for team {} already initialized at {}",
                self.team,
                self.path.display()
            )
        }
    }
}

/// Create the team backlog if needed and announce the team to the dashboard.
pub fn init(storage: &Storage, created: bool, config: &ResolvedConfig) -> Result<InitResult> {
    let registration = TeamRegistration::new(config.team(), config.id_prefix(), Utc::now());
    storage.register_team(&registration);

    Ok(InitResult {
        initialized: created,
        team: config.team().to_string(),
        id_prefix: config.id_prefix().to_string(),
        path: storage.document_path().to_path_buf(),
    })
}

// === Export ===

pub struct ExportResult {
    pub document: Document,
}

impl Output for ExportResult {
    fn to_json(&self) -> String {
        json(&self.document)
    }

    fn to_human(&self) -> String {
        serde_json::to_string_pretty(&self.document).unwrap_or_default()
    }
}

/// The whole document, as stored.
pub fn export(storage: &Storage) -> Result<ExportResult> {
    let document = storage.read(|doc| doc.clone())?;
    Ok(ExportResult { document })
}

// === Doctor ===

#[derive(Serialize)]
pub struct DoctorResult {
    pub healthy: bool,
    pub issues: Vec<Issue>,
    /// Issues repaired by `--fix`
    pub fixed: usize,
}

impl Output for DoctorResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.issues.is_empty() {
            return "No issues found.".to_string();
        }
        let mut lines = vec![format!("{} issue(s):", self.issues.len())];
        for issue in &self.issues {
            let mark = if issue.fixable { "" } else { " (manual)" };
            lines.push(format!("  {}{}", issue.message, mark));
        }
        if self.fixed > 0 {
            lines.push(format!("Fixed {} issue(s).", self.fixed));
        }
        lines.join("\n")
    }
}

/// Report invariant violations; with `fix`, repair the mechanical ones.
pub fn doctor(storage: &Storage, prefix: &str, fix: bool) -> Result<DoctorResult> {
    if !fix {
        let issues = storage.read(|doc| doctor::diagnose(doc, prefix))?;
        return Ok(DoctorResult {
            healthy: issues.is_empty(),
            issues,
            fixed: 0,
        });
    }

    let (issues, fixed) = storage.update(|doc| {
        let issues = doctor::diagnose(doc, prefix);
        let fixed = doctor::repair(doc, prefix, Utc::now());
        Ok((issues, fixed))
    })?;
    if fixed > 0 {
        tracing::info!(fixed, "Repaired document issues");
    }
    Ok(DoctorResult {
        healthy: issues.len() == fixed,
        issues,
        fixed,
    })
}

// === Config ===

#[derive(Serialize)]
pub struct ConfigShowResult {
    pub entries: Vec<ConfigEntry>,
    pub team_config: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_config: Option<PathBuf>,
}

impl Output for ConfigShowResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut lines: Vec<String> = self
            .entries
            .iter()
            .map(|e| {
                format!(
                    "{:<18} {:<28} ({})",
                    e.key,
                    e.value.as_deref().unwrap_or("-"),
                    e.source
                )
            })
            .collect();
        lines.push(format!("team config:   {}", self.team_config.display()));
        if let Some(path) = &self.system_config {
            lines.push(format!("system config: {}", path.display()));
        }
        lines.join("\n")
    }
}

pub fn config_show(config: &ResolvedConfig) -> ConfigShowResult {
    ConfigShowResult {
        entries: config.entries(),
        team_config: config.team_config_path.clone(),
        system_config: config.system_config_path.clone(),
    }
}

#[derive(Serialize)]
pub struct ConfigSetResult {
    pub key: String,
    pub value: Option<String>,
    pub path: PathBuf,
}

impl Output for ConfigSetResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        match &self.value {
            Some(v) => format!("Set {} = {} in {}", self.key, v, self.path.display()),
            None => format!("Unset {} in {}", self.key, self.path.display()),
        }
    }
}

/// Write one key. `team` goes to the system file, everything else to the team file.
pub fn config_set(
    config: &ResolvedConfig,
    key: &str,
    value: &str,
) -> Result<ConfigSetResult> {
    let path = if key == "team" {
        config.system_config_path.clone().ok_or_else(|| {
            Error::Config("No system config directory on this platform".to_string())
        })?
    } else {
        config.team_config_path.clone()
    };

    let mut file = config::load_config(&path)?;
    file.set(key, value).map_err(Error::Config)?;
    config::save_config(&path, &file)?;

    Ok(ConfigSetResult {
        key: key.to_string(),
        value: stored_value(&file, key),
        path,
    })
}

fn stored_value(config: &BacklogConfig, key: &str) -> Option<String> {
    match key {
        "team" => config.team.clone(),
        "id-prefix" => config.id_prefix.clone(),
        "default-priority" => config.default_priority.map(|p| p.to_string()),
        "sync-endpoint" => config.sync_endpoint.clone(),
        "sync-timeout-ms" => config.sync_timeout_ms.map(|ms| ms.to_string()),
        _ => None,
    }
}

/// Path for human output, `-` when unset.
pub(crate) fn show_path(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "-".to_string())
}
