//! Common test utilities for backlog integration tests.
//!
//! Provides `TestEnv` for isolated test environments that don't pollute
//! the user's `~/.local/share/backlog/` directory or system config.

#![allow(dead_code)]

use assert_cmd::Command;
use serde_json::Value;
use std::path::Path;
pub use tempfile::TempDir;

/// Team every test backlog belongs to.
pub const TEAM: &str = "platform";

/// A test environment with isolated data storage.
///
/// Each `TestEnv` creates three temporary directories:
/// - `repo_dir`: working directory of every command
/// - `data_dir`: backlog data (via `BL_DATA_DIR`)
/// - `config_dir`: system config base (via `BL_CONFIG_DIR`)
///
/// The `bl()` method sets these per-invocation, making tests parallel-safe.
pub struct TestEnv {
    pub repo_dir: TempDir,
    pub data_dir: TempDir,
    pub config_dir: TempDir,
}

impl TestEnv {
    /// Create a new test environment with isolated directories.
    pub fn new() -> Self {
        Self {
            repo_dir: TempDir::new().unwrap(),
            data_dir: TempDir::new().unwrap(),
            config_dir: TempDir::new().unwrap(),
        }
    }

    /// Create a new test environment and initialize the team backlog.
    pub fn init() -> Self {
        let env = Self::new();
        env.bl().arg("init").assert().success();
        env
    }

    /// Get a Command for the bl binary scoped to this environment's team.
    pub fn bl(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_bl"));
        cmd.current_dir(self.repo_dir.path());
        cmd.env("BL_DATA_DIR", self.data_dir.path());
        cmd.env("BL_CONFIG_DIR", self.config_dir.path());
        cmd.env("BL_TEAM", TEAM);
        cmd.env_remove("BL_SESSION");
        cmd.env_remove("BL_SYNC_ENDPOINT");
        cmd.env_remove("BL_LOG");
        cmd
    }

    /// Same as `bl()` with a session id set.
    pub fn bl_as(&self, session: &str) -> Command {
        let mut cmd = self.bl();
        cmd.env("BL_SESSION", session);
        cmd
    }

    /// Run a command expected to succeed and parse its JSON output.
    pub fn json(&self, args: &[&str]) -> Value {
        let output = self.bl().args(args).output().unwrap();
        assert!(
            output.status.success(),
            "bl {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        parse_json(&output.stdout)
    }

    /// Add an item and return its id.
    pub fn add_item(&self, title: &str) -> String {
        let result = self.json(&["item", "add", title]);
        result["id"].as_str().unwrap().to_string()
    }

    /// Get the path to the repo directory.
    pub fn repo_path(&self) -> &Path {
        self.repo_dir.path()
    }

    /// Get the path to the data directory.
    pub fn data_path(&self) -> &Path {
        self.data_dir.path()
    }

    /// Path of the team's backlog document.
    pub fn document_path(&self) -> std::path::PathBuf {
        self.data_dir.path().join(TEAM).join("backlog.json")
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a command's stdout as JSON.
pub fn parse_json(stdout: &[u8]) -> Value {
    serde_json::from_slice(stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({}): {}",
            e,
            String::from_utf8_lossy(stdout)
        )
    })
}
