//! Document health checks.
//!
//! `diagnose` reports invariant violations left behind by hand edits or older
//! writers. `repair` fixes the mechanical ones; duplicate ids need a human.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;

use super::{Document, ItemStatus, state};
use crate::storage::ids;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueKind {
    /// `status == blocked` disagrees with `blockedBy` being non-empty
    BlockedMismatch,
    /// A blocker id that names no entry
    DanglingBlocker,
    /// A blocker that is already completed or cancelled
    ResolvedBlocker,
    /// An id counter not ahead of the highest id in use
    CounterBehind,
    /// A session pointing at an entry that no longer exists
    DanglingWorkingOn,
    DuplicateId,
}

impl IssueKind {
    pub fn fixable(&self) -> bool {
        !matches!(self, IssueKind::DuplicateId)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub id: String,
    pub message: String,
    pub fixable: bool,
}

impl Issue {
    fn new(kind: IssueKind, id: impl Into<String>, message: String) -> Self {
        Self {
            kind,
            id: id.into(),
            message,
            fixable: kind.fixable(),
        }
    }
}

/// List every invariant violation in the document.
pub fn diagnose(doc: &Document, prefix: &str) -> Vec<Issue> {
    let mut issues = Vec::new();

    let mut seen = HashSet::new();
    for (entry, _) in doc.entries() {
        if !seen.insert(entry.id.as_str()) {
            issues.push(Issue::new(
                IssueKind::DuplicateId,
                &entry.id,
                format!("{} appears more than once", entry.id),
            ));
        }
    }

    for (entry, _) in doc.entries() {
        for blocker in &entry.blocked_by {
            match doc.find_entry(blocker) {
                None => issues.push(Issue::new(
                    IssueKind::DanglingBlocker,
                    &entry.id,
                    format!("{} is blocked by missing {}", entry.id, blocker),
                )),
                Some((b, _)) if b.is_resolved() => issues.push(Issue::new(
                    IssueKind::ResolvedBlocker,
                    &entry.id,
                    format!("{} is blocked by {} which is {}", entry.id, blocker, b.status),
                )),
                Some(_) => {}
            }
        }

        let blocked = entry.status == ItemStatus::Blocked;
        if blocked != !entry.blocked_by.is_empty() {
            issues.push(Issue::new(
                IssueKind::BlockedMismatch,
                &entry.id,
                format!(
                    "{} has status {} with {} blocker(s)",
                    entry.id,
                    entry.status,
                    entry.blocked_by.len()
                ),
            ));
        }
    }

    if let Some(max) = max_item_number(doc, prefix) {
        if doc.next_id <= max {
            issues.push(Issue::new(
                IssueKind::CounterBehind,
                "nextId",
                format!("nextId is {} but {} is in use", doc.next_id, ids::format_item_id(prefix, max)),
            ));
        }
    }
    if let Some(max) = max_epic_number(doc, prefix) {
        if doc.next_epic_id <= max {
            issues.push(Issue::new(
                IssueKind::CounterBehind,
                "nextEpicId",
                format!("nextEpicId is {} but {} is in use", doc.next_epic_id, ids::format_epic_id(prefix, max)),
            ));
        }
    }
    for item in &doc.items {
        let max = item
            .subitems
            .iter()
            .filter_map(|s| ids::parse_subitem_seq(&s.id, &item.entry.id))
            .max();
        if let Some(max) = max {
            if item.next_subitem_seq <= max {
                issues.push(Issue::new(
                    IssueKind::CounterBehind,
                    &item.entry.id,
                    format!(
                        "{} nextSubitemSeq is {} but {} is in use",
                        item.entry.id,
                        item.next_subitem_seq,
                        ids::format_subitem_id(&item.entry.id, max)
                    ),
                ));
            }
        }
    }

    for session in &doc.active_sessions {
        if let Some(target) = &session.working_on_id {
            if doc.find_entry(target).is_none() {
                issues.push(Issue::new(
                    IssueKind::DanglingWorkingOn,
                    &session.id,
                    format!("session {} works on missing {}", session.id, target),
                ));
            }
        }
    }

    issues
}

/// Fix every fixable issue in place. Returns how many issues were fixed.
pub fn repair(doc: &mut Document, prefix: &str, now: DateTime<Utc>) -> usize {
    let before = diagnose(doc, prefix);
    if before.iter().all(|i| !i.fixable) {
        return 0;
    }

    // Edges first, so status fixes see the final blocker sets.
    let open: HashSet<String> = doc
        .entries()
        .filter(|(e, _)| !e.is_resolved())
        .map(|(e, _)| e.id.clone())
        .collect();
    for entry in doc.entries_mut() {
        entry.blocked_by.retain(|b| open.contains(b));
    }

    for entry in doc.entries_mut() {
        let blocked = entry.status == ItemStatus::Blocked;
        if blocked && entry.blocked_by.is_empty() {
            state::leave_blocked(entry, now);
        } else if !blocked && !entry.blocked_by.is_empty() {
            if entry.is_resolved() {
                entry.blocked_by.clear();
                entry.updated_at = now;
            } else {
                state::enter_blocked(entry, now);
            }
        }
    }

    if let Some(max) = max_item_number(doc, prefix) {
        doc.next_id = doc.next_id.max(max + 1);
    }
    if let Some(max) = max_epic_number(doc, prefix) {
        doc.next_epic_id = doc.next_epic_id.max(max + 1);
    }
    for item in &mut doc.items {
        let parent_id = item.entry.id.clone();
        if let Some(max) = item
            .subitems
            .iter()
            .filter_map(|s| ids::parse_subitem_seq(&s.id, &parent_id))
            .max()
        {
            item.next_subitem_seq = item.next_subitem_seq.max(max + 1);
        }
    }

    let known: HashSet<String> = doc.entries().map(|(e, _)| e.id.clone()).collect();
    for session in &mut doc.active_sessions {
        if session
            .working_on_id
            .as_ref()
            .is_some_and(|id| !known.contains(id))
        {
            session.working_on_id = None;
        }
    }

    let after = diagnose(doc, prefix);
    before.len().saturating_sub(after.len())
}

fn max_item_number(doc: &Document, prefix: &str) -> Option<u64> {
    doc.items
        .iter()
        .filter_map(|i| ids::parse_item_number(&i.entry.id, prefix))
        .max()
}

fn max_epic_number(doc: &Document, prefix: &str) -> Option<u64> {
    doc.epics
        .iter()
        .filter_map(|e| ids::parse_epic_number(&e.id, prefix))
        .max()
}
