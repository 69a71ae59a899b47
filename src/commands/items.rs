//! Item, subitem, blocker and workspace commands.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

use super::{Output, json, show_path};
use crate::models::ops::{self, Created, ItemPatch, NewItem, RemoveOutcome, ResolveOutcome};
use crate::models::workspace::{self, WorkspaceConflict};
use crate::models::{Entry, EntryKind, Item, ItemStatus, Priority, SessionContext, graph};
use crate::storage::{Storage, ids};
use crate::{Error, Result};

fn conflict_warning(conflict: &Option<WorkspaceConflict>) -> Option<String> {
    conflict
        .as_ref()
        .map(|c| format!("Warning: {}", c.message()))
}

// === Create ===

#[derive(Serialize)]
pub struct ItemCreated {
    pub id: String,
    pub title: String,
    pub kind: EntryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repaired_counter: Option<u64>,
}

impl Output for ItemCreated {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut out = format!("Created {} {} \"{}\"", self.kind, self.id, self.title);
        if let Some(parent) = &self.parent {
            out.push_str(&format!(" under {}", parent));
        }
        if let Some(old) = self.repaired_counter {
            out.push_str(&format!(
                "\nWarning: id counter was behind existing ids (was {}); repaired",
                old
            ));
        }
        out
    }
}

/// Add a top-level item.
pub fn item_add(storage: &Storage, prefix: &str, new: NewItem) -> Result<ItemCreated> {
    let title = new.title.trim().to_string();
    let Created {
        id,
        repaired_counter,
    } = storage.update(|doc| ops::create_item(doc, prefix, new, Utc::now()))?;
    storage.notify_item(&id);

    Ok(ItemCreated {
        id,
        title,
        kind: EntryKind::Item,
        parent: None,
        repaired_counter,
    })
}

/// Add a subitem under an item.
pub fn sub_add(
    storage: &Storage,
    prefix: &str,
    parent: &str,
    new: NewItem,
) -> Result<ItemCreated> {
    let title = new.title.trim().to_string();
    let (parent_id, created) = storage.update(|doc| {
        let parent_id = ids::resolve_selector(doc, prefix, parent)?;
        let created = ops::create_subitem(doc, &parent_id, new, Utc::now())?;
        Ok((parent_id, created))
    })?;
    storage.notify_item(&parent_id);

    Ok(ItemCreated {
        id: created.id,
        title,
        kind: EntryKind::Subitem,
        parent: Some(parent_id),
        repaired_counter: created.repaired_counter,
    })
}

// === List / Show ===

/// Filters for `item list`. Resolved items are hidden unless `all` or a status is given.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<ItemStatus>,
    pub priority: Option<Priority>,
    pub tag: Option<String>,
    pub epic: Option<String>,
    pub all: bool,
}

impl ListFilter {
    fn matches(&self, item: &Item) -> bool {
        let e = &item.entry;
        match self.status {
            Some(status) if e.status != status => return false,
            None if !self.all && e.is_resolved() => return false,
            _ => {}
        }
        if self.priority.is_some_and(|p| p != e.priority) {
            return false;
        }
        if let Some(tag) = &self.tag {
            if !e.tags.contains(tag) {
                return false;
            }
        }
        if let Some(epic) = &self.epic {
            if item.epic.as_deref() != Some(epic.as_str()) {
                return false;
            }
        }
        true
    }
}

#[derive(Serialize)]
pub struct ItemSummary {
    pub id: String,
    pub title: String,
    pub status: ItemStatus,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epic: Option<String>,
    pub subitems_open: usize,
    pub subitems_total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree: Option<PathBuf>,
}

impl From<&Item> for ItemSummary {
    fn from(item: &Item) -> Self {
        let e = &item.entry;
        Self {
            id: e.id.clone(),
            title: e.title.clone(),
            status: e.status,
            priority: e.priority,
            blocked_by: e.blocked_by.clone(),
            tags: e.tags.clone(),
            epic: item.epic.clone(),
            subitems_open: item.open_subitems().len(),
            subitems_total: item.subitems.len(),
            worktree: e.worktree.clone(),
        }
    }
}

#[derive(Serialize)]
pub struct ItemList {
    pub items: Vec<ItemSummary>,
    pub count: usize,
}

impl Output for ItemList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.items.is_empty() {
            return "No items.".to_string();
        }
        let mut lines = Vec::with_capacity(self.items.len() + 1);
        for item in &self.items {
            let mut line = format!(
                "{} [{}] {:<8} {}",
                item.id, item.status, item.priority, item.title
            );
            if item.subitems_total > 0 {
                line.push_str(&format!(
                    " ({}/{} subitems open)",
                    item.subitems_open, item.subitems_total
                ));
            }
            if !item.blocked_by.is_empty() {
                line.push_str(&format!(" blocked by {}", item.blocked_by.join(", ")));
            }
            lines.push(line);
        }
        lines.push(format!("{} item(s)", self.count));
        lines.join("\n")
    }
}

pub fn item_list(storage: &Storage, filter: &ListFilter) -> Result<ItemList> {
    let items: Vec<ItemSummary> = storage.read(|doc| {
        doc.items
            .iter()
            .filter(|i| filter.matches(i))
            .map(ItemSummary::from)
            .collect()
    })?;
    Ok(ItemList {
        count: items.len(),
        items,
    })
}

#[derive(Serialize)]
pub struct ItemShow {
    pub kind: EntryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(flatten)]
    pub entry: Entry,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epic: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subitems: Vec<Entry>,
    /// Entries waiting on this one
    pub dependents: Vec<String>,
}

fn format_duration(seconds: u64) -> String {
    let (h, m) = (seconds / 3600, (seconds % 3600) / 60);
    if h > 0 {
        format!("{}h{:02}m", h, m)
    } else {
        format!("{}m", m)
    }
}

fn format_time(t: Option<DateTime<Utc>>) -> String {
    t.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

impl Output for ItemShow {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let e = &self.entry;
        let mut lines = vec![
            format!("{} {}: {}", self.kind, e.id, e.title),
            format!("  status:    {}", e.status),
            format!("  priority:  {}", e.priority),
        ];
        if let Some(parent) = &self.parent {
            lines.push(format!("  parent:    {}", parent));
        }
        if let Some(epic) = &self.epic {
            lines.push(format!("  epic:      {}", epic));
        }
        if let Some(desc) = &e.description {
            lines.push(format!("  about:     {}", desc));
        }
        if !e.tags.is_empty() {
            lines.push(format!("  tags:      {}", e.tags.join(", ")));
        }
        if let Some(ticket) = &e.external_id {
            lines.push(format!("  ticket:    {}", ticket));
        }
        if !e.blocked_by.is_empty() {
            lines.push(format!("  blocked by {}", e.blocked_by.join(", ")));
        }
        if !self.dependents.is_empty() {
            lines.push(format!("  blocking   {}", self.dependents.join(", ")));
        }
        if let Some(reason) = &e.paused_reason {
            lines.push(format!("  paused:    {}", reason));
        }
        lines.push(format!("  workspace: {}", show_path(e.worktree.as_deref())));
        if let Some(branch) = &e.branch {
            lines.push(format!("  branch:    {}", branch));
        }
        lines.push(format!("  started:   {}", format_time(e.started_at)));
        lines.push(format!("  worked:    {}", format_duration(e.work_seconds)));
        for sub in &self.subitems {
            lines.push(format!("  - {} [{}] {}", sub.id, sub.status, sub.title));
        }
        lines.join("\n")
    }
}

pub fn item_show(storage: &Storage, prefix: &str, selector: &str) -> Result<ItemShow> {
    storage.read(|doc| -> Result<ItemShow> {
        let id = ids::resolve_selector(doc, prefix, selector)?;
        let (entry, kind) = doc.entry(&id)?;
        let dependents = graph::dependents(doc, &id);

        let show = match kind {
            EntryKind::Item => {
                let item = doc
                    .item(&id)
                    .ok_or_else(|| Error::NotFound(format!("Item not found: {}", id)))?;
                ItemShow {
                    kind,
                    parent: None,
                    entry: entry.clone(),
                    epic: item.epic.clone(),
                    subitems: item.subitems.clone(),
                    dependents,
                }
            }
            EntryKind::Subitem => {
                let parent = doc.parent_of(&id);
                ItemShow {
                    kind,
                    parent: parent.map(|p| p.entry.id.clone()),
                    entry: entry.clone(),
                    epic: parent.and_then(|p| p.epic.clone()),
                    subitems: Vec::new(),
                    dependents,
                }
            }
        };
        Ok(show)
    })?
}

// === Update ===

#[derive(Serialize)]
pub struct ItemUpdated {
    pub id: String,
    pub updated: bool,
}

impl Output for ItemUpdated {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("Updated {}", self.id)
    }
}

pub fn item_update(
    storage: &Storage,
    prefix: &str,
    selector: &str,
    patch: ItemPatch,
) -> Result<ItemUpdated> {
    let id = storage.update(|doc| {
        let id = ids::resolve_selector(doc, prefix, selector)?;
        ops::update_item(doc, &id, patch, Utc::now())?;
        Ok(id)
    })?;
    storage.notify_item(&id);
    Ok(ItemUpdated { id, updated: true })
}

// === Lifecycle ===

#[derive(Serialize)]
pub struct ItemStarted {
    pub id: String,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict: Option<WorkspaceConflict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promoted_parent: Option<String>,
    pub session_linked: bool,
}

impl Output for ItemStarted {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut out = format!("Started {}", self.id);
        if let Some(ws) = &self.worktree {
            out.push_str(&format!(" in {}", ws.display()));
        }
        if let Some(parent) = &self.promoted_parent {
            out.push_str(&format!("\nParent {} is now in progress", parent));
        }
        if let Some(warning) = conflict_warning(&self.conflict) {
            out.push('\n');
            out.push_str(&warning);
        }
        out
    }
}

/// Start work on an entry in the caller's workspace.
///
/// A workspace conflict never stops the start; it comes back in the result.
pub fn item_start(
    storage: &Storage,
    prefix: &str,
    selector: &str,
    ctx: &SessionContext,
) -> Result<ItemStarted> {
    let outcome = storage.update(|doc| {
        let id = ids::resolve_selector(doc, prefix, selector)?;
        ops::start(doc, &id, ctx, Utc::now())
    })?;
    storage.notify_item(&outcome.id);

    Ok(ItemStarted {
        id: outcome.id,
        status: ItemStatus::InProgress,
        worktree: ctx.workspace.clone(),
        conflict: outcome.conflict,
        promoted_parent: outcome.promoted_parent,
        session_linked: outcome.session_linked,
    })
}

impl Output for ResolveOutcome {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let verb = match self.status {
            ItemStatus::Cancelled => "Cancelled",
            _ => "Completed",
        };
        let mut lines = vec![format!("{} {}", verb, self.id)];
        if !self.unblocked.is_empty() {
            lines.push(format!("Unblocked: {}", self.unblocked.join(", ")));
        }
        if !self.forced_open_subitems.is_empty() {
            lines.push(format!(
                "Warning: left open subitems untouched: {}",
                self.forced_open_subitems.join(", ")
            ));
        }
        lines.join("\n")
    }
}

pub fn item_complete(
    storage: &Storage,
    prefix: &str,
    selector: &str,
    force: bool,
) -> Result<ResolveOutcome> {
    let outcome = storage.update(|doc| {
        let id = ids::resolve_selector(doc, prefix, selector)?;
        ops::complete(doc, &id, force, Utc::now())
    })?;
    storage.notify_item(&outcome.id);
    Ok(outcome)
}

pub fn item_cancel(
    storage: &Storage,
    prefix: &str,
    selector: &str,
    reason: Option<String>,
    force: bool,
) -> Result<ResolveOutcome> {
    let outcome = storage.update(|doc| {
        let id = ids::resolve_selector(doc, prefix, selector)?;
        ops::cancel(doc, &id, reason, force, Utc::now())
    })?;
    storage.notify_item(&outcome.id);
    Ok(outcome)
}

#[derive(Serialize)]
pub struct ItemStatusChanged {
    pub id: String,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Output for ItemStatusChanged {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        match &self.reason {
            Some(reason) => format!("{} is now {} ({})", self.id, self.status, reason),
            None => format!("{} is now {}", self.id, self.status),
        }
    }
}

pub fn item_pause(
    storage: &Storage,
    prefix: &str,
    selector: &str,
    reason: &str,
) -> Result<ItemStatusChanged> {
    let id = storage.update(|doc| {
        let id = ids::resolve_selector(doc, prefix, selector)?;
        ops::pause_item(doc, &id, reason, Utc::now())?;
        Ok(id)
    })?;
    storage.notify_item(&id);
    Ok(ItemStatusChanged {
        id,
        status: ItemStatus::Paused,
        reason: Some(reason.to_string()),
    })
}

pub fn item_resume(storage: &Storage, prefix: &str, selector: &str) -> Result<ItemStatusChanged> {
    let (id, status) = storage.update(|doc| {
        let id = ids::resolve_selector(doc, prefix, selector)?;
        let status = ops::resume_item(doc, &id, Utc::now())?;
        Ok((id, status))
    })?;
    storage.notify_item(&id);
    Ok(ItemStatusChanged {
        id,
        status,
        reason: None,
    })
}

impl Output for RemoveOutcome {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!("Removed {}", self.removed.join(", "))];
        if !self.unblocked.is_empty() {
            lines.push(format!("Unblocked: {}", self.unblocked.join(", ")));
        }
        lines.join("\n")
    }
}

pub fn item_remove(storage: &Storage, prefix: &str, selector: &str) -> Result<RemoveOutcome> {
    let outcome = storage.update(|doc| {
        let id = ids::resolve_selector(doc, prefix, selector)?;
        ops::remove(doc, &id, Utc::now())
    })?;
    if let Some(id) = outcome.removed.first() {
        storage.notify_item(id);
    }
    Ok(outcome)
}

// === Blockers ===

#[derive(Serialize)]
pub struct BlockResult {
    pub target: String,
    pub blocker: String,
    /// False when the edge already existed
    pub added: bool,
    pub status: ItemStatus,
}

impl Output for BlockResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.added {
            format!("{} is now blocked by {}", self.target, self.blocker)
        } else {
            format!("{} was already blocked by {}", self.target, self.blocker)
        }
    }
}

pub fn block(storage: &Storage, prefix: &str, target: &str, blocker: &str) -> Result<BlockResult> {
    let result = storage.update(|doc| {
        let target = ids::resolve_selector(doc, prefix, target)?;
        let blocker = ids::resolve_selector(doc, prefix, blocker)?;
        let added = graph::add_blocker(doc, &target, &blocker, Utc::now())?;
        let status = doc.entry(&target)?.0.status;
        Ok(BlockResult {
            target,
            blocker,
            added,
            status,
        })
    })?;
    storage.notify_item(&result.target);
    Ok(result)
}

#[derive(Serialize)]
pub struct UnblockResult {
    pub target: String,
    pub blocker: String,
    /// The target has no blockers left
    pub unblocked: bool,
    pub status: ItemStatus,
}

impl Output for UnblockResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.unblocked {
            format!("{} is no longer blocked (now {})", self.target, self.status)
        } else {
            format!("Removed {} from {}'s blockers", self.blocker, self.target)
        }
    }
}

pub fn unblock(
    storage: &Storage,
    prefix: &str,
    target: &str,
    blocker: &str,
) -> Result<UnblockResult> {
    let result = storage.update(|doc| {
        let target = ids::resolve_selector(doc, prefix, target)?;
        // The blocker may have been removed since; match the raw id then.
        let blocker = ids::resolve_selector(doc, prefix, blocker).unwrap_or_else(|_| blocker.to_string());
        let unblocked = graph::remove_blocker(doc, &target, &blocker, Utc::now())?;
        let status = doc.entry(&target)?.0.status;
        Ok(UnblockResult {
            target,
            blocker,
            unblocked,
            status,
        })
    })?;
    storage.notify_item(&result.target);
    Ok(result)
}

// === Workspaces ===

#[derive(Serialize)]
pub struct WorkspaceResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub worktree: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub conflict: Option<WorkspaceConflict>,
}

impl Output for WorkspaceResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let head = match (&self.id, &self.worktree) {
            (Some(id), Some(ws)) => format!("{} bound to {}", id, ws.display()),
            (Some(id), None) => format!("{} has no workspace", id),
            (None, Some(ws)) => format!("{} is free", ws.display()),
            (None, None) => "No workspace".to_string(),
        };
        match conflict_warning(&self.conflict) {
            Some(warning) if self.id.is_some() => format!("{}\n{}", head, warning),
            Some(warning) => warning,
            None => head,
        }
    }
}

fn require_workspace(path: Option<&Path>) -> Result<&Path> {
    path.ok_or_else(|| {
        Error::precondition(
            "No workspace to use",
            "pass a path or --workspace, or run inside a git checkout",
        )
    })
}

/// Bind `path` (or the caller's workspace) to an entry, warning on conflict.
pub fn workspace_link(
    storage: &Storage,
    prefix: &str,
    selector: &str,
    path: Option<&Path>,
    ctx: &SessionContext,
) -> Result<WorkspaceResult> {
    let path = require_workspace(path.or(ctx.workspace.as_deref()))?;
    let (id, conflict) = storage.update(|doc| {
        let id = ids::resolve_selector(doc, prefix, selector)?;
        let conflict = workspace::link(doc, &id, path, ctx.branch.clone(), Utc::now())?;
        Ok((id, conflict))
    })?;
    if let Some(c) = &conflict {
        tracing::warn!(id = %id, other = %c.id, "Workspace conflict");
    }
    storage.notify_item(&id);

    Ok(WorkspaceResult {
        id: Some(id),
        worktree: Some(path.to_path_buf()),
        branch: ctx.branch.clone(),
        conflict,
    })
}

pub fn workspace_unlink(storage: &Storage, prefix: &str, selector: &str) -> Result<WorkspaceResult> {
    let id = storage.update(|doc| {
        let id = ids::resolve_selector(doc, prefix, selector)?;
        workspace::unlink(doc, &id, Utc::now())?;
        Ok(id)
    })?;
    storage.notify_item(&id);

    Ok(WorkspaceResult {
        id: Some(id),
        worktree: None,
        branch: None,
        conflict: None,
    })
}

/// Report who, if anyone, is actively working in a workspace.
pub fn workspace_check(
    storage: &Storage,
    prefix: &str,
    selector: Option<&str>,
    path: Option<&Path>,
    ctx: &SessionContext,
) -> Result<WorkspaceResult> {
    let path = require_workspace(path.or(ctx.workspace.as_deref()))?;
    let (id, conflict) = storage.read(|doc| -> Result<_> {
        let id = selector
            .map(|s| ids::resolve_selector(doc, prefix, s))
            .transpose()?;
        let conflict = workspace::check(doc, id.as_deref().unwrap_or(""), path);
        Ok((id, conflict))
    })??;

    Ok(WorkspaceResult {
        id,
        worktree: Some(path.to_path_buf()),
        branch: None,
        conflict,
    })
}
