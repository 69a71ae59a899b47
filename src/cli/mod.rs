//! CLI argument definitions for backlog.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Version with the commit and build time injected by `build.rs`.
const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("BL_GIT_COMMIT"),
    ", built ",
    env!("BL_BUILD_TIMESTAMP"),
    ")"
);

const PRIORITIES: [&str; 5] = ["low", "medium", "high", "critical", "blocked"];
const ITEM_STATUSES: [&str; 6] = [
    "todo",
    "in_progress",
    "blocked",
    "paused",
    "completed",
    "cancelled",
];
const SESSION_STATUSES: [&str; 5] = ["planning", "coding", "testing", "commit", "pr_review"];

/// Backlog - A shared task store for AI agent sessions.
///
/// Every command reads or updates one JSON document per team, safely across
/// concurrent processes. Start with `bl init --team <name>`.
#[derive(Parser, Debug)]
#[command(name = "bl")]
#[command(author, version, about = "A concurrency-safe task backlog shared by AI agent sessions", long_about = None)]
#[command(long_version = LONG_VERSION)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Team whose backlog to use (also BL_TEAM)
    #[arg(long, global = true)]
    pub team: Option<String>,

    /// Calling session, as <terminal>:<window>
    #[arg(long, global = true, env = "BL_SESSION")]
    pub session: Option<String>,

    /// Workspace (worktree) path; defaults to the git root of the current directory
    #[arg(long, global = true)]
    pub workspace: Option<PathBuf>,

    /// Branch name; detected with git when omitted
    #[arg(long, global = true)]
    pub branch: Option<String>,

    /// Dashboard base URL for change notifications (also BL_SYNC_ENDPOINT)
    #[arg(long, global = true)]
    pub sync_endpoint: Option<String>,

    /// Data directory holding one folder per team
    #[arg(long, global = true, env = "BL_DATA_DIR", hide = true)]
    pub data_dir: Option<PathBuf>,

    /// Base directory for the system config
    #[arg(long, global = true, env = "BL_CONFIG_DIR", hide = true)]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the team backlog (safe to re-run)
    Init,

    /// Item management commands
    Item {
        #[command(subcommand)]
        command: ItemCommands,
    },

    /// Subitem commands
    Sub {
        #[command(subcommand)]
        command: SubCommands,
    },

    /// Make <target> wait on <blocker>
    Block {
        /// Entry that waits (id or number)
        target: String,
        /// Entry it waits on
        blocker: String,
    },

    /// Remove a blocker from <target>
    Unblock {
        /// Entry that waits (id or number)
        target: String,
        /// Blocker to remove
        blocker: String,
    },

    /// Workspace binding commands
    Workspace {
        #[command(subcommand)]
        command: WorkspaceCommands,
    },

    /// Session registry commands
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// Epic commands
    Epic {
        #[command(subcommand)]
        command: EpicCommands,
    },

    /// Release commands
    Release {
        #[command(subcommand)]
        command: ReleaseCommands,
    },

    /// Check the document for invariant violations
    Doctor {
        /// Repair the mechanical issues
        #[arg(long)]
        fix: bool,
    },

    /// Print the whole document
    Export,

    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Item subcommands
#[derive(Subcommand, Debug)]
pub enum ItemCommands {
    /// Add a new item
    Add {
        /// Item title
        title: String,

        /// Item description
        #[arg(short, long)]
        description: Option<String>,

        /// Priority (defaults to the configured default-priority)
        #[arg(short, long, value_parser = PRIORITIES)]
        priority: Option<String>,

        /// Tags for the item
        #[arg(short, long)]
        tag: Vec<String>,

        /// External ticket reference
        #[arg(long)]
        ticket: Option<String>,

        /// Epic id to file the item under
        #[arg(long)]
        epic: Option<String>,
    },

    /// List items (resolved items are hidden unless --all or --status)
    List {
        /// Filter by status
        #[arg(long, value_parser = ITEM_STATUSES)]
        status: Option<String>,

        /// Filter by priority
        #[arg(long, value_parser = PRIORITIES)]
        priority: Option<String>,

        /// Filter by tag
        #[arg(long)]
        tag: Option<String>,

        /// Filter by epic id
        #[arg(long)]
        epic: Option<String>,

        /// Include completed and cancelled items
        #[arg(long)]
        all: bool,
    },

    /// Show an item or subitem
    Show {
        /// Id (e.g. PLAT-0012, PLAT-0012-001) or item number
        id: String,
    },

    /// Edit item fields (status changes through start/complete/cancel/pause)
    Update {
        /// Id or item number
        id: String,

        /// New title
        #[arg(long)]
        title: Option<String>,

        /// New description (empty clears)
        #[arg(long)]
        description: Option<String>,

        /// New priority
        #[arg(long, value_parser = PRIORITIES)]
        priority: Option<String>,

        /// Add a tag
        #[arg(long)]
        add_tag: Vec<String>,

        /// Remove a tag
        #[arg(long)]
        remove_tag: Vec<String>,

        /// External ticket reference (empty clears)
        #[arg(long)]
        ticket: Option<String>,

        /// Epic id (empty clears)
        #[arg(long)]
        epic: Option<String>,
    },

    /// Start work in the current workspace
    Start {
        /// Id or item number
        id: String,
    },

    /// Mark as completed
    Complete {
        /// Id or item number
        id: String,

        /// Complete even with open subitems
        #[arg(long)]
        force: bool,
    },

    /// Mark as cancelled
    Cancel {
        /// Id or item number
        id: String,

        /// Why it was cancelled
        #[arg(long)]
        reason: Option<String>,

        /// Cancel even with open subitems
        #[arg(long)]
        force: bool,
    },

    /// Pause work on an in-progress entry
    Pause {
        /// Id or item number
        id: String,

        /// Why work stopped
        #[arg(long)]
        reason: String,
    },

    /// Resume a paused entry
    Resume {
        /// Id or item number
        id: String,
    },

    /// Delete an item (with its subitems) or a subitem
    Remove {
        /// Id or item number
        id: String,
    },
}

/// Subitem subcommands
#[derive(Subcommand, Debug)]
pub enum SubCommands {
    /// Add a subitem under an item
    Add {
        /// Parent item id or number
        parent: String,

        /// Subitem title
        title: String,

        /// Subitem description
        #[arg(short, long)]
        description: Option<String>,

        /// Priority (defaults to the configured default-priority)
        #[arg(short, long, value_parser = PRIORITIES)]
        priority: Option<String>,

        /// Tags for the subitem
        #[arg(short, long)]
        tag: Vec<String>,
    },
}

/// Workspace subcommands
#[derive(Subcommand, Debug)]
pub enum WorkspaceCommands {
    /// Bind an entry to a workspace
    Link {
        /// Id or item number
        id: String,

        /// Workspace path (defaults to --workspace or the git root)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Drop an entry's workspace binding
    Unlink {
        /// Id or item number
        id: String,
    },

    /// Report which entry is active in a workspace
    Check {
        /// Entry that would start there (others only are reported)
        id: Option<String>,

        /// Workspace path (defaults to --workspace or the git root)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

/// Session subcommands
#[derive(Subcommand, Debug)]
pub enum SessionCommands {
    /// Report this session's status (registers it on first report)
    Status {
        /// New status
        #[arg(value_parser = SESSION_STATUSES)]
        status: String,

        /// Short description of the current task
        #[arg(long)]
        task: Option<String>,
    },

    /// Pause this session and the item it is working on
    Pause {
        /// Why the session stopped
        #[arg(long)]
        reason: String,
    },

    /// Resume this session with its previous status
    Resume,

    /// Remove a session (defaults to this one)
    Remove {
        /// Session id
        id: Option<String>,
    },

    /// Point this session at an entry
    WorkingOn {
        /// Id or item number
        #[arg(required_unless_present = "clear")]
        id: Option<String>,

        /// Clear the current pointer
        #[arg(long, conflicts_with = "id")]
        clear: bool,
    },

    /// List registered sessions
    List,

    /// Release bindings held by sessions that are gone
    Reconcile {
        /// Session ids still alive (defaults to the registered sessions)
        #[arg(long = "live")]
        live: Vec<String>,
    },
}

/// Epic subcommands
#[derive(Subcommand, Debug)]
pub enum EpicCommands {
    /// Create an epic
    Add {
        /// Epic title
        title: String,

        /// Epic description
        #[arg(short, long)]
        description: Option<String>,
    },

    /// List epics with their items
    List,
}

/// Release subcommands
#[derive(Subcommand, Debug)]
pub enum ReleaseCommands {
    /// Create a release over existing items
    Add {
        /// Release name (unique per team)
        name: String,

        /// Items in the release
        items: Vec<String>,
    },

    /// List releases
    List,
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show resolved values and where each came from
    Show,

    /// Set a configuration value (empty value unsets)
    Set {
        /// Configuration key
        key: String,
        /// Configuration value
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_long_version_carries_build_stamp() {
        assert!(LONG_VERSION.starts_with(env!("CARGO_PKG_VERSION")));
        assert!(!env!("BL_GIT_COMMIT").is_empty());
        let stamp = LONG_VERSION.rsplit("built ").next().unwrap().trim_end_matches(')');
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
    }

    #[test]
    fn test_working_on_needs_id_or_clear() {
        assert!(Cli::try_parse_from(["bl", "session", "working-on"]).is_err());
        assert!(Cli::try_parse_from(["bl", "session", "working-on", "--clear"]).is_ok());
        assert!(Cli::try_parse_from(["bl", "session", "working-on", "3"]).is_ok());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["bl", "item", "list", "-H", "--team", "platform"]).unwrap();
        assert!(cli.human_readable);
        assert_eq!(cli.team.as_deref(), Some("platform"));
    }

    #[test]
    fn test_paused_is_not_a_reportable_status() {
        assert!(Cli::try_parse_from(["bl", "session", "status", "paused"]).is_err());
    }
}
