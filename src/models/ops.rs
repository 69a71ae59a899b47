//! Typed document transforms, one per public operation.
//!
//! Each function takes the loaded document and mutates it in place; the
//! storage layer runs it inside an exclusive-lock update. Nothing here does
//! I/O or reads the process environment.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::state::{self, Resolution};
use super::workspace::{self, WorkspaceConflict};
use super::{Document, Entry, EntryKind, Epic, Item, ItemStatus, Priority, Release, SessionContext};
use super::{graph, sessions};
use crate::storage::ids;
use crate::{Error, Result};

/// Fields for a new item or subitem.
#[derive(Debug, Clone, Default)]
pub struct NewItem {
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub tags: Vec<String>,
    pub external_id: Option<String>,
    pub epic: Option<String>,
}

/// Result of an allocation-backed create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Created {
    pub id: String,
    /// Counter value that was behind and got repaired
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repaired_counter: Option<u64>,
}

impl From<ids::Allocation> for Created {
    fn from(alloc: ids::Allocation) -> Self {
        Self {
            id: alloc.id,
            repaired_counter: alloc.repaired_from,
        }
    }
}

fn validate_title(title: &str) -> Result<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(Error::InvalidInput("Title cannot be empty".to_string()));
    }
    Ok(title.to_string())
}

fn require_epic(doc: &Document, epic_id: &str) -> Result<()> {
    if doc.epics.iter().any(|e| e.id == epic_id) {
        Ok(())
    } else {
        Err(Error::NotFound(format!("Epic not found: {}", epic_id)))
    }
}

fn fill_entry(entry: &mut Entry, new: NewItem) {
    entry.description = new.description.filter(|d| !d.trim().is_empty());
    entry.priority = new.priority;
    entry.external_id = new.external_id;
    for tag in new.tags {
        if !entry.tags.contains(&tag) {
            entry.tags.push(tag);
        }
    }
}

/// Append a new todo item.
pub fn create_item(
    doc: &mut Document,
    prefix: &str,
    mut new: NewItem,
    now: DateTime<Utc>,
) -> Result<Created> {
    let title = validate_title(&new.title)?;
    let epic = new.epic.take();
    if let Some(epic_id) = &epic {
        require_epic(doc, epic_id)?;
    }

    let alloc = ids::next_item_id(doc, prefix);
    let mut item = Item::new(alloc.id.clone(), title, now);
    fill_entry(&mut item.entry, new);
    item.epic = epic;
    doc.items.push(item);
    Ok(alloc.into())
}

/// Append a subitem under an open item.
pub fn create_subitem(
    doc: &mut Document,
    parent_id: &str,
    new: NewItem,
    now: DateTime<Utc>,
) -> Result<Created> {
    let title = validate_title(&new.title)?;
    if new.epic.is_some() {
        return Err(Error::InvalidInput(
            "Subitems inherit their parent's epic".to_string(),
        ));
    }

    let Some(parent) = doc.item_mut(parent_id) else {
        return match doc.find_entry(parent_id) {
            Some((_, EntryKind::Subitem)) => Err(Error::InvalidInput(format!(
                "{} is a subitem; subitems cannot have subitems",
                parent_id
            ))),
            _ => Err(Error::NotFound(format!("Item not found: {}", parent_id))),
        };
    };
    if parent.entry.is_resolved() {
        return Err(Error::precondition(
            format!("{} is already {}", parent_id, parent.entry.status),
            "add subitems to open items only",
        ));
    }

    let alloc = ids::next_subitem_id(parent);
    let mut sub = Entry::new(alloc.id.clone(), title, now);
    fill_entry(&mut sub, new);
    parent.subitems.push(sub);
    parent.entry.updated_at = now;
    Ok(alloc.into())
}

/// Field edits for `update_item`. Status is deliberately absent.
#[derive(Debug, Clone, Default)]
pub struct ItemPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub add_tags: Vec<String>,
    pub remove_tags: Vec<String>,
    pub external_id: Option<String>,
    /// `Some("")` clears the epic
    pub epic: Option<String>,
}

impl ItemPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.add_tags.is_empty()
            && self.remove_tags.is_empty()
            && self.external_id.is_none()
            && self.epic.is_none()
    }
}

/// Edit descriptive fields of an item or subitem.
pub fn update_item(doc: &mut Document, id: &str, patch: ItemPatch, now: DateTime<Utc>) -> Result<()> {
    if patch.is_empty() {
        return Err(Error::InvalidInput("Nothing to update".to_string()));
    }
    let (_, kind) = doc.entry(id)?;
    let title = patch.title.as_deref().map(validate_title).transpose()?;

    if let Some(epic) = &patch.epic {
        if kind == EntryKind::Subitem {
            return Err(Error::InvalidInput(
                "Subitems inherit their parent's epic".to_string(),
            ));
        }
        if !epic.is_empty() {
            require_epic(doc, epic)?;
        }
    }

    if let Some(epic) = patch.epic {
        if let Some(item) = doc.item_mut(id) {
            item.epic = if epic.is_empty() { None } else { Some(epic) };
        }
    }

    let entry = doc.entry_mut(id)?;
    if let Some(title) = title {
        entry.title = title;
    }
    if let Some(description) = patch.description {
        entry.description = if description.is_empty() {
            None
        } else {
            Some(description)
        };
    }
    if let Some(priority) = patch.priority {
        entry.priority = priority;
    }
    if let Some(external_id) = patch.external_id {
        entry.external_id = if external_id.is_empty() {
            None
        } else {
            Some(external_id)
        };
    }
    for tag in patch.add_tags {
        if !entry.tags.contains(&tag) {
            entry.tags.push(tag);
        }
    }
    entry.tags.retain(|t| !patch.remove_tags.contains(t));
    entry.updated_at = now;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartOutcome {
    pub id: String,
    /// Another entry already active in the same workspace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict: Option<WorkspaceConflict>,
    /// Parent item moved from todo to in_progress
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promoted_parent: Option<String>,
    /// The caller's session now points at this entry
    pub session_linked: bool,
}

/// `todo → in_progress`, binding the caller's workspace and session.
///
/// A workspace conflict is reported, never enforced.
pub fn start(
    doc: &mut Document,
    id: &str,
    ctx: &SessionContext,
    now: DateTime<Utc>,
) -> Result<StartOutcome> {
    let (_, kind) = doc.entry(id)?;
    let conflict = ctx
        .workspace
        .as_deref()
        .and_then(|ws| workspace::check(doc, id, ws));
    if let Some(c) = &conflict {
        tracing::warn!(id, other = %c.id, worktree = %c.worktree.display(), "Workspace conflict");
    }

    state::start(doc.entry_mut(id)?, ctx, now)?;

    let mut promoted_parent = None;
    if kind == EntryKind::Subitem {
        let parent_id = doc.parent_of(id).map(|p| p.entry.id.clone());
        if let Some(parent_id) = parent_id {
            let parent = doc.entry_mut(&parent_id)?;
            if parent.status == ItemStatus::Todo {
                parent.status = ItemStatus::InProgress;
                parent.started_at.get_or_insert(now);
                parent.last_started_at.get_or_insert(now);
                parent.updated_at = now;
                promoted_parent = Some(parent_id);
            }
        }
    }

    let mut session_linked = false;
    if let Some(sid) = ctx.session_id.as_deref() {
        if doc.session(sid).is_some() {
            sessions::set_working_on(doc, sid, id)?;
            session_linked = true;
        }
    }

    Ok(StartOutcome {
        id: id.to_string(),
        conflict,
        promoted_parent,
        session_linked,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolveOutcome {
    pub id: String,
    pub status: ItemStatus,
    /// Dependents whose last blocker was this entry
    pub unblocked: Vec<String>,
    /// Open subitems left as they were by a forced resolution
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub forced_open_subitems: Vec<String>,
    /// Sessions whose `workingOnId` pointed here
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cleared_sessions: Vec<String>,
}

fn resolve(
    doc: &mut Document,
    id: &str,
    resolution: Resolution,
    force: bool,
    now: DateTime<Utc>,
) -> Result<ResolveOutcome> {
    let (entry, kind) = doc.entry(id)?;
    if entry.is_resolved() {
        return Err(Error::precondition(
            format!("{} is already {}", id, entry.status),
            "completed and cancelled items cannot change state; create a new item instead",
        ));
    }

    let open = match kind {
        EntryKind::Item => doc.item(id).map(Item::open_subitems).unwrap_or_default(),
        EntryKind::Subitem => Vec::new(),
    };
    if !open.is_empty() && !force {
        return Err(Error::UnresolvedSubitems {
            id: id.to_string(),
            subitems: open,
        });
    }
    if !open.is_empty() {
        tracing::warn!(id, subitems = ?open, "Resolving with open subitems");
    }

    let entry = doc.entry_mut(id)?;
    state::resolve(entry, resolution, now)?;
    let status = entry.status;

    // Open subitems keep their status and their own blockers.
    let unblocked = graph::on_resolved(doc, id, now);
    let cleared_sessions = sessions::release_entry(doc, id);

    Ok(ResolveOutcome {
        id: id.to_string(),
        status,
        unblocked,
        forced_open_subitems: if force { open } else { Vec::new() },
        cleared_sessions,
    })
}

/// Mark an entry completed and cascade-unblock its dependents.
pub fn complete(doc: &mut Document, id: &str, force: bool, now: DateTime<Utc>) -> Result<ResolveOutcome> {
    resolve(doc, id, Resolution::Completed, force, now)
}

/// Mark an entry cancelled and cascade-unblock its dependents.
pub fn cancel(
    doc: &mut Document,
    id: &str,
    reason: Option<String>,
    force: bool,
    now: DateTime<Utc>,
) -> Result<ResolveOutcome> {
    resolve(doc, id, Resolution::Cancelled { reason }, force, now)
}

pub fn pause_item(doc: &mut Document, id: &str, reason: &str, now: DateTime<Utc>) -> Result<()> {
    state::pause(doc.entry_mut(id)?, reason, now)
}

pub fn resume_item(doc: &mut Document, id: &str, now: DateTime<Utc>) -> Result<ItemStatus> {
    state::resume(doc.entry_mut(id)?, now)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoveOutcome {
    /// The entry and, for items, every subitem removed with it
    pub removed: Vec<String>,
    pub unblocked: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cleared_sessions: Vec<String>,
}

/// Physically delete an item (with its subitems) or a single subitem.
///
/// Removed ids vanish from every `blockedBy`, session and release, the same
/// cascade a resolution triggers.
pub fn remove(doc: &mut Document, id: &str, now: DateTime<Utc>) -> Result<RemoveOutcome> {
    let (_, kind) = doc.entry(id)?;

    let removed = match kind {
        EntryKind::Item => {
            let idx = doc
                .items
                .iter()
                .position(|i| i.entry.id == id)
                .ok_or_else(|| Error::NotFound(format!("Item not found: {}", id)))?;
            let item = doc.items.remove(idx);
            std::iter::once(item.entry.id)
                .chain(item.subitems.into_iter().map(|s| s.id))
                .collect::<Vec<_>>()
        }
        EntryKind::Subitem => {
            for item in &mut doc.items {
                if item.subitems.iter().any(|s| s.id == id) {
                    item.subitems.retain(|s| s.id != id);
                    item.entry.updated_at = now;
                }
            }
            vec![id.to_string()]
        }
    };

    let mut unblocked = Vec::new();
    let mut cleared_sessions = Vec::new();
    for gone in &removed {
        unblocked.extend(graph::on_resolved(doc, gone, now));
        cleared_sessions.extend(sessions::release_entry(doc, gone));
        for release in &mut doc.releases {
            release.items.retain(|i| i != gone);
        }
    }
    unblocked.retain(|u| !removed.contains(u));

    Ok(RemoveOutcome {
        removed,
        unblocked,
        cleared_sessions,
    })
}

/// Create an epic under the team prefix.
pub fn create_epic(
    doc: &mut Document,
    prefix: &str,
    title: &str,
    description: Option<String>,
    now: DateTime<Utc>,
) -> Result<Created> {
    let title = validate_title(title)?;
    let alloc = ids::next_epic_id(doc, prefix);
    doc.epics.push(Epic {
        id: alloc.id.clone(),
        title,
        description,
        created_at: now,
    });
    Ok(alloc.into())
}

/// Create a named release over existing items.
pub fn create_release(
    doc: &mut Document,
    name: &str,
    items: Vec<String>,
    now: DateTime<Utc>,
) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidInput("Release name cannot be empty".to_string()));
    }
    if doc.releases.iter().any(|r| r.name == name) {
        return Err(Error::precondition(
            format!("Release {} already exists", name),
            "pick a different release name",
        ));
    }
    for id in &items {
        doc.entry(id)?;
    }

    let mut unique = Vec::with_capacity(items.len());
    for id in items {
        if !unique.contains(&id) {
            unique.push(id);
        }
    }
    doc.releases.push(Release {
        name: name.to_string(),
        items: unique,
        created_at: now,
    });
    Ok(())
}
