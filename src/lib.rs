//! Backlog - A concurrency-safe task store shared by AI agent sessions.
//!
//! This library provides the core functionality for the `bl` CLI tool:
//! one JSON document per team, guarded by advisory file locks and written
//! with a temp-file-then-rename protocol, plus the state machine, dependency
//! graph and session registry that operate on it.

pub mod cli;
pub mod commands;
pub mod config;
pub mod models;
pub mod storage;
pub mod sync;
pub mod sys;


/// Library-level error type for backlog operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cannot lock {path}: {source}")]
    Lock {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Write aborted, document left untouched: {0}")]
    WriteIntegrity(String),

    #[error("Not initialized: run `bl init` first")]
    NotInitialized,

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Invalid ID format: {0}")]
    InvalidId(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{message}")]
    Precondition { message: String, hint: String },

    #[error("{id} has unresolved subitems: {}", subitems.join(", "))]
    UnresolvedSubitems { id: String, subitems: Vec<String> },

    #[error("Cycle detected in blockers")]
    CycleDetected,

    #[error("Config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a precondition error with a remediation hint.
    pub fn precondition(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Error::Precondition {
            message: message.into(),
            hint: hint.into(),
        }
    }

    /// Remediation hint for errors the caller can fix by retrying differently.
    pub fn hint(&self) -> Option<String> {
        match self {
            Error::Precondition { hint, .. } => Some(hint.clone()),
            Error::UnresolvedSubitems { .. } => {
                Some("complete or cancel the subitems first, or pass --force".to_string())
            }
            Error::NotInitialized => Some("run `bl init` to create the team backlog".to_string()),
            Error::CycleDetected => {
                Some("the blocker already waits on the target, directly or transitively".to_string())
            }
            _ => None,
        }
    }
}

/// Result type alias for backlog operations.
pub type Result<T> = std::result::Result<T, Error>;
