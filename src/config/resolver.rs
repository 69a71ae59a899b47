//! Precedence resolution for configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags
//! 2. Environment (`BL_TEAM`, `BL_SYNC_ENDPOINT`)
//! 3. Team config.kdl (`<data_dir>/<team>/config.kdl`)
//! 4. System config.kdl (`~/.config/backlog/config.kdl`)
//! 5. Built-in defaults
//!
//! The team has to be known before the team file can be read, so it is
//! resolved from flags, environment and the system file only.

use serde::Serialize;
use std::path::PathBuf;

use super::schema::BacklogConfig;
use super::{load_config, team_config_path};
use crate::Result;
use crate::models::Priority;
use crate::storage::ids;
use crate::sync::DEFAULT_TIMEOUT_MS;

pub const TEAM_ENV: &str = "BL_TEAM";
pub const SYNC_ENDPOINT_ENV: &str = "BL_SYNC_ENDPOINT";

/// Team used when none is configured anywhere.
pub const DEFAULT_TEAM: &str = "default";

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    CliFlag,
    EnvVar(String),
    /// Team-level config.kdl
    Team,
    /// System-level config.kdl
    System,
    /// Derived from another resolved value (id prefix from team name)
    Derived,
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::Team => write!(f, "team"),
            ValueSource::System => write!(f, "system"),
            ValueSource::Derived => write!(f, "derived"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone)]
pub struct Resolved<T> {
    pub value: T,
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// One line of `bl config show`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigEntry {
    pub key: &'static str,
    pub value: Option<String>,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub team: Resolved<String>,
    pub id_prefix: Resolved<String>,
    pub default_priority: Resolved<Priority>,
    pub sync_endpoint: Option<Resolved<String>>,
    pub sync_timeout_ms: Resolved<u64>,
    /// Team config file consulted during resolution
    pub team_config_path: PathBuf,
    pub system_config_path: Option<PathBuf>,
}

impl ResolvedConfig {
    pub fn team(&self) -> &str {
        &self.team.value
    }

    pub fn id_prefix(&self) -> &str {
        &self.id_prefix.value
    }

    pub fn default_priority(&self) -> Priority {
        self.default_priority.value
    }

    pub fn sync_endpoint(&self) -> Option<&str> {
        self.sync_endpoint.as_ref().map(|r| r.value.as_str())
    }

    pub fn sync_timeout_ms(&self) -> u64 {
        self.sync_timeout_ms.value
    }

    /// Every key with its value and source, in `CONFIG_KEYS` order.
    pub fn entries(&self) -> Vec<ConfigEntry> {
        let unset = || ("unset".to_string(), None);
        let (endpoint_source, endpoint) = match &self.sync_endpoint {
            Some(r) => (r.source.to_string(), Some(r.value.clone())),
            None => unset(),
        };
        vec![
            ConfigEntry {
                key: "team",
                value: Some(self.team.value.clone()),
                source: self.team.source.to_string(),
            },
            ConfigEntry {
                key: "id-prefix",
                value: Some(self.id_prefix.value.clone()),
                source: self.id_prefix.source.to_string(),
            },
            ConfigEntry {
                key: "default-priority",
                value: Some(self.default_priority.value.to_string()),
                source: self.default_priority.source.to_string(),
            },
            ConfigEntry {
                key: "sync-endpoint",
                value: endpoint,
                source: endpoint_source,
            },
            ConfigEntry {
                key: "sync-timeout-ms",
                value: Some(self.sync_timeout_ms.value.to_string()),
                source: self.sync_timeout_ms.source.to_string(),
            },
        ]
    }
}

/// Where config files live.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub data_dir: PathBuf,
    /// `None` when the platform has no config directory
    pub system_config: Option<PathBuf>,
}

/// Flag and environment overrides.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub team: Option<String>,
    pub sync_endpoint: Option<String>,
    pub env_team: Option<String>,
    pub env_sync_endpoint: Option<String>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the environment overrides. Empty variables count as unset.
    pub fn from_env() -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            env_team: read(TEAM_ENV),
            env_sync_endpoint: read(SYNC_ENDPOINT_ENV),
            ..Self::default()
        }
    }

    pub fn with_team(mut self, team: Option<String>) -> Self {
        if team.is_some() {
            self.team = team;
        }
        self
    }

    pub fn with_sync_endpoint(mut self, endpoint: Option<String>) -> Self {
        if endpoint.is_some() {
            self.sync_endpoint = endpoint;
        }
        self
    }
}

fn pick<T: Clone>(
    flag: Option<&T>,
    env: Option<(&T, &str)>,
    team: Option<&T>,
    system: Option<&T>,
) -> Option<Resolved<T>> {
    if let Some(v) = flag {
        return Some(Resolved::new(v.clone(), ValueSource::CliFlag));
    }
    if let Some((v, name)) = env {
        return Some(Resolved::new(v.clone(), ValueSource::EnvVar(name.to_string())));
    }
    if let Some(v) = team {
        return Some(Resolved::new(v.clone(), ValueSource::Team));
    }
    system.map(|v| Resolved::new(v.clone(), ValueSource::System))
}

/// Resolve configuration with the full precedence chain.
pub fn resolve_config(paths: &ConfigPaths, overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    let system = match &paths.system_config {
        Some(path) => load_config(path)?,
        None => BacklogConfig::new(),
    };

    let team = pick(
        overrides.team.as_ref(),
        overrides.env_team.as_ref().map(|v| (v, TEAM_ENV)),
        None,
        system.team.as_ref(),
    )
    .unwrap_or_else(|| Resolved::new(DEFAULT_TEAM.to_string(), ValueSource::Default));
    crate::storage::validate_team(&team.value)?;

    let team_config_path = team_config_path(&paths.data_dir, &team.value)?;
    let team_config = load_config(&team_config_path)?;

    let id_prefix = pick(
        None,
        None,
        team_config.id_prefix.as_ref(),
        system.id_prefix.as_ref(),
    )
    .unwrap_or_else(|| Resolved::new(ids::team_prefix(&team.value), ValueSource::Derived));

    let default_priority = pick(
        None,
        None,
        team_config.default_priority.as_ref(),
        system.default_priority.as_ref(),
    )
    .unwrap_or_else(|| Resolved::new(Priority::default(), ValueSource::Default));

    let sync_endpoint = pick(
        overrides.sync_endpoint.as_ref(),
        overrides
            .env_sync_endpoint
            .as_ref()
            .map(|v| (v, SYNC_ENDPOINT_ENV)),
        team_config.sync_endpoint.as_ref(),
        system.sync_endpoint.as_ref(),
    );

    let sync_timeout_ms = pick(
        None,
        None,
        team_config.sync_timeout_ms.as_ref(),
        system.sync_timeout_ms.as_ref(),
    )
    .unwrap_or_else(|| Resolved::new(DEFAULT_TIMEOUT_MS, ValueSource::Default));

    Ok(ResolvedConfig {
        team,
        id_prefix,
        default_priority,
        sync_endpoint,
        sync_timeout_ms,
        team_config_path,
        system_config_path: paths.system_config.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::save_config;
    use tempfile::TempDir;

    struct Dirs {
        _tmp: TempDir,
        paths: ConfigPaths,
    }

    fn dirs() -> Dirs {
        let tmp = TempDir::new().unwrap();
        let paths = ConfigPaths {
            data_dir: tmp.path().join("data"),
            system_config: Some(tmp.path().join("config").join("backlog").join("config.kdl")),
        };
        Dirs { _tmp: tmp, paths }
    }

    fn write_system(d: &Dirs, config: BacklogConfig) {
        save_config(d.paths.system_config.as_ref().unwrap(), &config).unwrap();
    }

    fn write_team(d: &Dirs, team: &str, config: BacklogConfig) {
        save_config(&team_config_path(&d.paths.data_dir, team).unwrap(), &config).unwrap();
    }

    #[test]
    fn test_defaults() {
        let d = dirs();
        let config = resolve_config(&d.paths, &ConfigOverrides::new()).unwrap();
        assert_eq!(config.team(), DEFAULT_TEAM);
        assert_eq!(config.team.source, ValueSource::Default);
        assert_eq!(config.id_prefix(), "DEFA");
        assert_eq!(config.id_prefix.source, ValueSource::Derived);
        assert_eq!(config.default_priority(), Priority::Medium);
        assert!(config.sync_endpoint().is_none());
        assert_eq!(config.sync_timeout_ms(), DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn test_team_precedence() {
        let d = dirs();
        write_system(
            &d,
            BacklogConfig {
                team: Some("system-team".to_string()),
                ..Default::default()
            },
        );

        let config = resolve_config(&d.paths, &ConfigOverrides::new()).unwrap();
        assert_eq!(config.team(), "system-team");
        assert_eq!(config.team.source, ValueSource::System);

        let env = ConfigOverrides {
            env_team: Some("env-team".to_string()),
            ..Default::default()
        };
        let config = resolve_config(&d.paths, &env).unwrap();
        assert_eq!(config.team(), "env-team");
        assert_eq!(config.team.source, ValueSource::EnvVar(TEAM_ENV.to_string()));

        let flag = env.with_team(Some("flag-team".to_string()));
        let config = resolve_config(&d.paths, &flag).unwrap();
        assert_eq!(config.team(), "flag-team");
        assert_eq!(config.team.source, ValueSource::CliFlag);
    }

    #[test]
    fn test_team_config_beats_system() {
        let d = dirs();
        write_system(
            &d,
            BacklogConfig {
                team: Some("platform".to_string()),
                default_priority: Some(Priority::Low),
                sync_timeout_ms: Some(500),
                ..Default::default()
            },
        );
        write_team(
            &d,
            "platform",
            BacklogConfig {
                default_priority: Some(Priority::High),
                id_prefix: Some("PLTF".to_string()),
                ..Default::default()
            },
        );

        let config = resolve_config(&d.paths, &ConfigOverrides::new()).unwrap();
        assert_eq!(config.default_priority(), Priority::High);
        assert_eq!(config.default_priority.source, ValueSource::Team);
        assert_eq!(config.id_prefix(), "PLTF");
        assert_eq!(config.sync_timeout_ms(), 500);
        assert_eq!(config.sync_timeout_ms.source, ValueSource::System);
    }

    #[test]
    fn test_sync_endpoint_precedence() {
        let d = dirs();
        write_team(
            &d,
            DEFAULT_TEAM,
            BacklogConfig {
                sync_endpoint: Some("http://team".to_string()),
                ..Default::default()
            },
        );

        let config = resolve_config(&d.paths, &ConfigOverrides::new()).unwrap();
        assert_eq!(config.sync_endpoint(), Some("http://team"));

        let overrides = ConfigOverrides {
            env_sync_endpoint: Some("http://env".to_string()),
            ..Default::default()
        };
        let config = resolve_config(&d.paths, &overrides).unwrap();
        assert_eq!(config.sync_endpoint(), Some("http://env"));

        let overrides = overrides.with_sync_endpoint(Some("http://flag".to_string()));
        let config = resolve_config(&d.paths, &overrides).unwrap();
        assert_eq!(config.sync_endpoint(), Some("http://flag"));
    }

    #[test]
    fn test_invalid_team_flag() {
        let d = dirs();
        let overrides = ConfigOverrides::new().with_team(Some("../x".to_string()));
        assert!(resolve_config(&d.paths, &overrides).is_err());
    }

    #[test]
    fn test_entries_lists_every_key() {
        let d = dirs();
        let config = resolve_config(&d.paths, &ConfigOverrides::new()).unwrap();
        let entries = config.entries();
        let keys: Vec<_> = entries.iter().map(|e| e.key).collect();
        assert_eq!(keys, crate::config::CONFIG_KEYS);
        assert_eq!(entries[3].value, None);
        assert_eq!(entries[3].source, "unset");
    }
}
