//! Data models for backlog entities.
//!
//! This module defines the core data structures:
//! - `Document` - The whole per-team backlog, persisted as one JSON file
//! - `Item` - Top-level work item with optional subitems
//! - `Entry` - Lifecycle fields shared by items and subitems
//! - `Session` - A logical agent slot ("window") and what it works on
//! - `Epic` / `Release` - Auxiliary grouping records
//! - `SessionContext` - Explicit caller identity passed into every operation
//!
//! Behaviour lives in the submodules: `state` (lifecycle transitions),
//! `graph` (blocker edges), `sessions` (registry), `workspace` (conflict
//! detection), `ops` (one transform per public operation) and `doctor`.

pub mod doctor;
pub mod graph;
pub mod ops;
pub mod sessions;
pub mod state;
pub mod workspace;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::{Error, Result};

/// Current on-disk schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Priority of an item or subitem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
    /// Marker priority for work parked behind something external
    Blocked,
}

impl Priority {
    /// Parse from string, case-insensitive.
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" | "med" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" | "crit" => Ok(Priority::Critical),
            "blocked" => Ok(Priority::Blocked),
            _ => Err(Error::InvalidInput(format!(
                "Invalid priority: {} (expected low, medium, high, critical or blocked)",
                s
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
            Priority::Blocked => "blocked",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of an item or subitem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Todo,
    InProgress,
    /// Waiting on at least one entry in `blocked_by`
    Blocked,
    /// Explicitly paused; `previous_status` holds the state to resume into
    Paused,
    Completed,
    Cancelled,
}

impl ItemStatus {
    /// Parse from string, case-insensitive.
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "todo" | "pending" => Ok(ItemStatus::Todo),
            "in_progress" | "in-progress" | "inprogress" => Ok(ItemStatus::InProgress),
            "blocked" => Ok(ItemStatus::Blocked),
            "paused" => Ok(ItemStatus::Paused),
            "completed" | "done" => Ok(ItemStatus::Completed),
            "cancelled" | "canceled" => Ok(ItemStatus::Cancelled),
            _ => Err(Error::InvalidInput(format!("Invalid status: {}", s))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Todo => "todo",
            ItemStatus::InProgress => "in_progress",
            ItemStatus::Blocked => "blocked",
            ItemStatus::Paused => "paused",
            ItemStatus::Completed => "completed",
            ItemStatus::Cancelled => "cancelled",
        }
    }

    /// Completed and cancelled are terminal.
    pub fn is_resolved(&self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Cancelled)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a session is currently doing. Distinct from `ItemStatus`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Planning,
    Coding,
    Testing,
    Commit,
    PrReview,
    Paused,
}

impl SessionStatus {
    /// Parse from string, case-insensitive.
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "planning" => Ok(SessionStatus::Planning),
            "coding" => Ok(SessionStatus::Coding),
            "testing" => Ok(SessionStatus::Testing),
            "commit" => Ok(SessionStatus::Commit),
            "pr_review" | "pr-review" | "review" => Ok(SessionStatus::PrReview),
            "paused" => Ok(SessionStatus::Paused),
            _ => Err(Error::InvalidInput(format!(
                "Invalid session status: {} (expected planning, coding, testing, commit or pr_review)",
                s
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Planning => "planning",
            SessionStatus::Coding => "coding",
            SessionStatus::Testing => "testing",
            SessionStatus::Commit => "commit",
            SessionStatus::PrReview => "pr_review",
            SessionStatus::Paused => "paused",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether an id names a top-level item or a subitem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Item,
    Subitem,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Item => write!(f, "item"),
            EntryKind::Subitem => write!(f, "subitem"),
        }
    }
}

/// Lifecycle, dependency and workspace fields shared by items and subitems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Unique identifier (e.g., "PLAT-0012" or "PLAT-0012-003")
    pub id: String,

    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub status: ItemStatus,

    /// Ids this entry cannot proceed without. Non-empty iff status is blocked.
    #[serde(default)]
    pub blocked_by: Vec<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Ticket id in an external tracker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    pub added_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,

    /// When the last blocker went away
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unblocked_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_reason: Option<String>,

    /// Status to restore on resume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<ItemStatus>,

    /// Accumulated work time in seconds, flushed on every stop
    #[serde(default)]
    pub work_seconds: u64,

    /// Start of the currently running work interval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_started_at: Option<DateTime<Utc>>,

    /// Bound workspace (e.g. a git worktree)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Session that owns the workspace binding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default)]
    pub actively_working: bool,
}

impl Entry {
    /// Create a new todo entry with the given ID and title.
    pub fn new(id: String, title: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title,
            description: None,
            priority: Priority::default(),
            status: ItemStatus::default(),
            blocked_by: Vec::new(),
            tags: Vec::new(),
            external_id: None,
            added_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            cancel_reason: None,
            unblocked_at: None,
            paused_reason: None,
            previous_status: None,
            work_seconds: 0,
            last_started_at: None,
            worktree: None,
            branch: None,
            session_id: None,
            actively_working: false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.status.is_resolved()
    }
}

/// Subitems share the entry shape but never nest further.
pub type Subitem = Entry;

/// A top-level work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    #[serde(flatten)]
    pub entry: Entry,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epic: Option<String>,

    #[serde(default)]
    pub subitems: Vec<Subitem>,

    /// Next subitem sequence number; never reused
    #[serde(default = "default_counter")]
    pub next_subitem_seq: u64,
}

impl Item {
    pub fn new(id: String, title: String, now: DateTime<Utc>) -> Self {
        Self {
            entry: Entry::new(id, title, now),
            epic: None,
            subitems: Vec::new(),
            next_subitem_seq: 1,
        }
    }

    /// Subitems that are neither completed nor cancelled.
    pub fn open_subitems(&self) -> Vec<String> {
        self.subitems
            .iter()
            .filter(|s| !s.is_resolved())
            .map(|s| s.id.clone())
            .collect()
    }
}

/// One finished period in a session's status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// A logical agent slot, identified by `<terminal>:<windowName>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,

    #[serde(default)]
    pub status: SessionStatus,

    /// Free-text label of the current task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_on_id: Option<String>,

    pub started_at: DateTime<Utc>,

    pub status_changed_at: DateTime<Utc>,

    #[serde(default)]
    pub status_history: Vec<StatusChange>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<SessionStatus>,

    /// Entry paused together with the session, resumed with it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_item_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl Session {
    pub fn new(id: String, status: SessionStatus, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status,
            task: None,
            working_on_id: None,
            started_at: now,
            status_changed_at: now,
            status_history: Vec::new(),
            paused_reason: None,
            previous_status: None,
            paused_item_id: None,
            worktree: None,
            branch: None,
        }
    }
}

/// A group of related items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Epic {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A named release bundling item ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub name: String,
    #[serde(default)]
    pub items: Vec<String>,
    pub created_at: DateTime<Utc>,
}

fn default_counter() -> u64 {
    1
}

/// The per-team backlog document.
///
/// Every collection and counter carries a serde default so documents written
/// by older versions (or edited by hand) load without ambiguity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// 0 for documents written before versioning
    #[serde(default)]
    pub schema_version: u32,

    #[serde(default)]
    pub team: String,

    #[serde(default)]
    pub items: Vec<Item>,

    #[serde(default)]
    pub active_sessions: Vec<Session>,

    #[serde(default)]
    pub epics: Vec<Epic>,

    #[serde(default)]
    pub releases: Vec<Release>,

    #[serde(default = "default_counter")]
    pub next_id: u64,

    #[serde(default = "default_counter")]
    pub next_epic_id: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Document {
    /// Create an empty document for a team.
    pub fn new(team: &str) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            team: team.to_string(),
            items: Vec::new(),
            active_sessions: Vec::new(),
            epics: Vec::new(),
            releases: Vec::new(),
            next_id: 1,
            next_epic_id: 1,
            last_updated: None,
        }
    }

    /// Bring a freshly loaded document up to the current schema version.
    pub fn upgrade(&mut self, team: &str) -> Result<()> {
        if self.schema_version > SCHEMA_VERSION {
            return Err(Error::InvalidInput(format!(
                "Document schema version {} is newer than supported version {}",
                self.schema_version, SCHEMA_VERSION
            )));
        }
        if self.team.is_empty() {
            self.team = team.to_string();
        }
        self.schema_version = SCHEMA_VERSION;
        Ok(())
    }

    pub fn item(&self, id: &str) -> Option<&Item> {
        self.items.iter().find(|i| i.entry.id == id)
    }

    pub fn item_mut(&mut self, id: &str) -> Option<&mut Item> {
        self.items.iter_mut().find(|i| i.entry.id == id)
    }

    /// All items and subitems, in display order.
    pub fn entries(&self) -> impl Iterator<Item = (&Entry, EntryKind)> {
        self.items.iter().flat_map(|item| {
            std::iter::once((&item.entry, EntryKind::Item))
                .chain(item.subitems.iter().map(|s| (s, EntryKind::Subitem)))
        })
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut Entry> {
        self.items.iter_mut().flat_map(|item| {
            let Item {
                entry, subitems, ..
            } = item;
            std::iter::once(entry).chain(subitems.iter_mut())
        })
    }

    pub fn find_entry(&self, id: &str) -> Option<(&Entry, EntryKind)> {
        self.entries().find(|(e, _)| e.id == id)
    }

    pub fn find_entry_mut(&mut self, id: &str) -> Option<&mut Entry> {
        self.entries_mut().find(|e| e.id == id)
    }

    /// Look up an entry or fail with `NotFound`.
    pub fn entry(&self, id: &str) -> Result<(&Entry, EntryKind)> {
        self.find_entry(id)
            .ok_or_else(|| Error::NotFound(format!("Item not found: {}", id)))
    }

    pub fn entry_mut(&mut self, id: &str) -> Result<&mut Entry> {
        self.find_entry_mut(id)
            .ok_or_else(|| Error::NotFound(format!("Item not found: {}", id)))
    }

    /// The item owning a subitem id.
    pub fn parent_of(&self, subitem_id: &str) -> Option<&Item> {
        self.items
            .iter()
            .find(|i| i.subitems.iter().any(|s| s.id == subitem_id))
    }

    pub fn session(&self, id: &str) -> Option<&Session> {
        self.active_sessions.iter().find(|s| s.id == id)
    }

    pub fn session_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.active_sessions.iter_mut().find(|s| s.id == id)
    }
}

/// Caller identity, built by the CLI layer and passed into every operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub team: String,
    /// `<terminal>:<windowName>` of the calling agent slot
    pub session_id: Option<String>,
    /// Workspace the caller is running in
    pub workspace: Option<PathBuf>,
    pub branch: Option<String>,
}

impl SessionContext {
    pub fn new(team: impl Into<String>) -> Self {
        Self {
            team: team.into(),
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// The session id, or a precondition error telling the caller how to set it.
    pub fn require_session(&self) -> Result<&str> {
        self.session_id.as_deref().ok_or_else(|| {
            Error::precondition(
                "No session id for this operation",
                "pass --session <terminal>:<window> or set BL_SESSION",
            )
        })
    }
}
