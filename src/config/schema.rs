//! KDL schema for config.kdl.
//!
//! The same schema is used at both levels; `team` is only honoured in the
//! system file since the team file already lives inside a team directory.
//!
//! ```kdl
//! team "platform"
//! id-prefix "PLAT"
//! default-priority "high"
//! sync-endpoint "http://localhost:4310"
//! sync-timeout-ms 2000
//! ```

use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use serde::Serialize;

use crate::models::Priority;
use crate::storage::{ids, validate_team};

/// Keys accepted by `bl config set`.
pub const CONFIG_KEYS: &[&str] = &[
    "team",
    "id-prefix",
    "default-priority",
    "sync-endpoint",
    "sync-timeout-ms",
];

/// Longest sync timeout accepted, so a hung endpoint cannot stall a command.
pub const MAX_SYNC_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BacklogConfig {
    pub team: Option<String>,

    /// Four-character id prefix overriding the one derived from the team name
    pub id_prefix: Option<String>,

    pub default_priority: Option<Priority>,

    /// Base URL of the dashboard receiving sync notifications
    pub sync_endpoint: Option<String>,

    pub sync_timeout_ms: Option<u64>,
}

fn first_string(doc: &KdlDocument, key: &str) -> Option<String> {
    let entry = doc.get(key)?.entries().first()?;
    entry.value().as_string().map(str::to_string)
}

fn first_integer(doc: &KdlDocument, key: &str) -> Option<i128> {
    let entry = doc.get(key)?.entries().first()?;
    entry.value().as_integer()
}

fn string_node(key: &str, value: &str) -> KdlNode {
    let mut node = KdlNode::new(key);
    node.push(KdlEntry::new(KdlValue::String(value.to_string())));
    node
}

impl BacklogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the config values.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(team) = &self.team {
            validate_team(team).map_err(|e| e.to_string())?;
        }
        if let Some(prefix) = &self.id_prefix {
            ids::validate_prefix(prefix).map_err(|e| e.to_string())?;
        }
        if let Some(ms) = self.sync_timeout_ms {
            if ms == 0 || ms > MAX_SYNC_TIMEOUT_MS {
                return Err(format!(
                    "sync-timeout-ms must be 1-{}, got {}",
                    MAX_SYNC_TIMEOUT_MS, ms
                ));
            }
        }
        Ok(())
    }

    /// Parse config from a KDL document.
    ///
    /// Values of the wrong type are ignored; `validate` catches the rest.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        Self {
            team: first_string(doc, "team"),
            id_prefix: first_string(doc, "id-prefix"),
            default_priority: first_string(doc, "default-priority")
                .and_then(|s| Priority::parse(&s).ok()),
            sync_endpoint: first_string(doc, "sync-endpoint"),
            sync_timeout_ms: first_integer(doc, "sync-timeout-ms")
                .and_then(|i| u64::try_from(i).ok()),
        }
    }

    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();

        if let Some(team) = &self.team {
            doc.nodes_mut().push(string_node("team", team));
        }
        if let Some(prefix) = &self.id_prefix {
            doc.nodes_mut().push(string_node("id-prefix", prefix));
        }
        if let Some(priority) = self.default_priority {
            doc.nodes_mut()
                .push(string_node("default-priority", priority.as_str()));
        }
        if let Some(endpoint) = &self.sync_endpoint {
            doc.nodes_mut().push(string_node("sync-endpoint", endpoint));
        }
        if let Some(ms) = self.sync_timeout_ms {
            let mut node = KdlNode::new("sync-timeout-ms");
            node.push(KdlEntry::new(KdlValue::Integer(ms as i128)));
            doc.nodes_mut().push(node);
        }

        doc.autoformat();
        doc
    }

    /// Values from `other` override values in `self` if they are Some.
    pub fn merge(&mut self, other: &BacklogConfig) {
        if other.team.is_some() {
            self.team = other.team.clone();
        }
        if other.id_prefix.is_some() {
            self.id_prefix = other.id_prefix.clone();
        }
        if other.default_priority.is_some() {
            self.default_priority = other.default_priority;
        }
        if other.sync_endpoint.is_some() {
            self.sync_endpoint = other.sync_endpoint.clone();
        }
        if other.sync_timeout_ms.is_some() {
            self.sync_timeout_ms = other.sync_timeout_ms;
        }
    }

    /// Set one key from its string form. An empty value unsets the key.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        let value = value.trim();
        let text = if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        };

        match key {
            "team" => self.team = text,
            "id-prefix" => self.id_prefix = text.map(|s| s.to_ascii_uppercase()),
            "default-priority" => {
                self.default_priority = text
                    .map(|s| Priority::parse(&s))
                    .transpose()
                    .map_err(|e| e.to_string())?;
            }
            "sync-endpoint" => self.sync_endpoint = text,
            "sync-timeout-ms" => {
                self.sync_timeout_ms = text
                    .map(|s| s.parse::<u64>())
                    .transpose()
                    .map_err(|_| format!("sync-timeout-ms must be a number, got {}", value))?;
            }
            other => {
                return Err(format!(
                    "Unknown config key: {} (expected one of: {})",
                    other,
                    CONFIG_KEYS.join(", ")
                ));
            }
        }
        self.validate()
    }
}
