//! Blocker edges between items and subitems.
//!
//! An edge `target -> blocker` lives in `target.blocked_by`. The graph keeps
//! the invariant that an entry is `blocked` exactly when its `blocked_by` is
//! non-empty, and cascades unblocking when a blocker resolves or disappears.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use super::{Document, state};
use crate::{Error, Result};

/// Add `blocker_id` to `target_id.blocked_by` and force the target into `blocked`.
///
/// Returns `false` when the edge already existed (a no-op).
pub fn add_blocker(
    doc: &mut Document,
    target_id: &str,
    blocker_id: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    if target_id == blocker_id {
        return Err(Error::InvalidInput(format!(
            "{} cannot block on itself",
            target_id
        )));
    }

    let (blocker, _) = doc.entry(blocker_id)?;
    if blocker.is_resolved() {
        return Err(Error::precondition(
            format!("Blocker {} is already {}", blocker_id, blocker.status),
            "only open items can block other work",
        ));
    }

    let (target, _) = doc.entry(target_id)?;
    if target.is_resolved() {
        return Err(Error::precondition(
            format!("{} is already {}", target_id, target.status),
            "resolved items cannot be blocked",
        ));
    }
    if target.blocked_by.iter().any(|id| id == blocker_id) {
        return Ok(false);
    }

    if would_create_cycle(doc, target_id, blocker_id) {
        return Err(Error::CycleDetected);
    }

    let target = doc.entry_mut(target_id)?;
    target.blocked_by.push(blocker_id.to_string());
    state::enter_blocked(target, now);
    Ok(true)
}

/// Remove one edge. Returns `true` when the target became unblocked.
pub fn remove_blocker(
    doc: &mut Document,
    target_id: &str,
    blocker_id: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let target = doc.entry_mut(target_id)?;
    if !target.blocked_by.iter().any(|id| id == blocker_id) {
        return Err(Error::NotFound(format!(
            "Blocker not found: {} -> {}",
            target_id, blocker_id
        )));
    }

    target.blocked_by.retain(|id| id != blocker_id);
    if target.blocked_by.is_empty() {
        state::leave_blocked(target, now);
        return Ok(true);
    }
    target.updated_at = now;
    Ok(false)
}

/// Drop every edge pointing at `resolved_id`.
///
/// Called once per completion, cancellation or removal. Returns the ids that
/// became unblocked so the caller can report them.
pub fn on_resolved(doc: &mut Document, resolved_id: &str, now: DateTime<Utc>) -> Vec<String> {
    let mut unblocked = Vec::new();

    for entry in doc.entries_mut() {
        if !entry.blocked_by.iter().any(|id| id == resolved_id) {
            continue;
        }
        entry.blocked_by.retain(|id| id != resolved_id);
        if entry.blocked_by.is_empty() {
            state::leave_blocked(entry, now);
            unblocked.push(entry.id.clone());
        } else {
            entry.updated_at = now;
        }
    }

    unblocked
}

/// Ids of every entry waiting on `id`.
pub fn dependents(doc: &Document, id: &str) -> Vec<String> {
    doc.entries()
        .filter(|(e, _)| e.blocked_by.iter().any(|b| b == id))
        .map(|(e, _)| e.id.clone())
        .collect()
}

/// Check if adding `target -> blocker` would close a cycle.
///
/// DFS from the blocker along `blocked_by` edges; reaching the target means
/// the blocker already (transitively) waits on it.
fn would_create_cycle(doc: &Document, target_id: &str, blocker_id: &str) -> bool {
    let mut visited = HashSet::new();
    let mut stack = vec![blocker_id.to_string()];

    while let Some(current) = stack.pop() {
        if current == target_id {
            return true;
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        if let Some((entry, _)) = doc.find_entry(&current) {
            for dep in &entry.blocked_by {
                if !visited.contains(dep) {
                    stack.push(dep.clone());
                }
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Entry, Item, ItemStatus};

    fn doc_with(ids: &[&str]) -> Document {
        let now = Utc::now();
        let mut doc = Document::new("platform");
        for id in ids {
            doc.items
                .push(Item::new(id.to_string(), format!("Task {}", id), now));
        }
        doc
    }

    fn status(doc: &Document, id: &str) -> ItemStatus {
        doc.find_entry(id).unwrap().0.status
    }

    fn assert_invariant(doc: &Document) {
        for (e, _) in doc.entries() {
            assert_eq!(
                e.status == ItemStatus::Blocked,
                !e.blocked_by.is_empty(),
                "blocked/blockedBy mismatch on {}",
                e.id
            );
        }
    }

    #[test]
    fn test_add_blocker_sets_blocked() {
        let mut doc = doc_with(&["PLAT-0001", "PLAT-0002"]);
        assert!(add_blocker(&mut doc, "PLAT-0002", "PLAT-0001", Utc::now()).unwrap());

        assert_eq!(status(&doc, "PLAT-0002"), ItemStatus::Blocked);
        assert_eq!(dependents(&doc, "PLAT-0001"), vec!["PLAT-0002"]);
        assert_invariant(&doc);
    }

    #[test]
    fn test_add_blocker_is_idempotent() {
        let mut doc = doc_with(&["PLAT-0001", "PLAT-0002"]);
        add_blocker(&mut doc, "PLAT-0002", "PLAT-0001", Utc::now()).unwrap();
        assert!(!add_blocker(&mut doc, "PLAT-0002", "PLAT-0001", Utc::now()).unwrap());

        let (e, _) = doc.find_entry("PLAT-0002").unwrap();
        assert_eq!(e.blocked_by, vec!["PLAT-0001"]);
    }

    #[test]
    fn test_add_blocker_rejects_resolved_blocker() {
        let mut doc = doc_with(&["PLAT-0001", "PLAT-0002"]);
        doc.entry_mut("PLAT-0001").unwrap().status = ItemStatus::Completed;

        let result = add_blocker(&mut doc, "PLAT-0002", "PLAT-0001", Utc::now());
        assert!(matches!(result, Err(Error::Precondition { .. })));
        assert_eq!(status(&doc, "PLAT-0002"), ItemStatus::Todo);
    }

    #[test]
    fn test_add_blocker_self_and_unknown() {
        let mut doc = doc_with(&["PLAT-0001"]);
        assert!(add_blocker(&mut doc, "PLAT-0001", "PLAT-0001", Utc::now()).is_err());
        assert!(matches!(
            add_blocker(&mut doc, "PLAT-0001", "PLAT-0099", Utc::now()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_cycle_detection_transitive() {
        let mut doc = doc_with(&["PLAT-0001", "PLAT-0002", "PLAT-0003"]);
        add_blocker(&mut doc, "PLAT-0002", "PLAT-0001", Utc::now()).unwrap();
        add_blocker(&mut doc, "PLAT-0003", "PLAT-0002", Utc::now()).unwrap();

        let result = add_blocker(&mut doc, "PLAT-0001", "PLAT-0003", Utc::now());
        assert!(matches!(result, Err(Error::CycleDetected)));
        assert_eq!(status(&doc, "PLAT-0001"), ItemStatus::Todo);
    }

    #[test]
    fn test_blocking_stops_running_work() {
        let mut doc = doc_with(&["PLAT-0001", "PLAT-0002"]);
        let t0 = Utc::now();
        {
            let e = doc.entry_mut("PLAT-0002").unwrap();
            e.status = ItemStatus::InProgress;
            e.last_started_at = Some(t0);
            e.worktree = Some("/work/a".into());
            e.actively_working = true;
        }
        add_blocker(&mut doc, "PLAT-0002", "PLAT-0001", t0 + chrono::Duration::seconds(5)).unwrap();

        let (e, _) = doc.find_entry("PLAT-0002").unwrap();
        assert_eq!(e.work_seconds, 5);
        assert!(e.worktree.is_none());
        assert!(!e.actively_working);
    }

    #[test]
    fn test_remove_last_blocker_returns_to_todo() {
        let mut doc = doc_with(&["PLAT-0001", "PLAT-0002", "PLAT-0003"]);
        add_blocker(&mut doc, "PLAT-0003", "PLAT-0001", Utc::now()).unwrap();
        add_blocker(&mut doc, "PLAT-0003", "PLAT-0002", Utc::now()).unwrap();

        assert!(!remove_blocker(&mut doc, "PLAT-0003", "PLAT-0001", Utc::now()).unwrap());
        assert_eq!(status(&doc, "PLAT-0003"), ItemStatus::Blocked);

        assert!(remove_blocker(&mut doc, "PLAT-0003", "PLAT-0002", Utc::now()).unwrap());
        assert_eq!(status(&doc, "PLAT-0003"), ItemStatus::Todo);
        assert!(doc.find_entry("PLAT-0003").unwrap().0.unblocked_at.is_some());
        assert_invariant(&doc);
    }

    #[test]
    fn test_remove_nonexistent_blocker() {
        let mut doc = doc_with(&["PLAT-0001", "PLAT-0002"]);
        let result = remove_blocker(&mut doc, "PLAT-0002", "PLAT-0001", Utc::now());
        assert!(result.unwrap_err().to_string().contains("not found"));
    }

    #[test]
    fn test_on_resolved_cascades_to_items_and_subitems() {
        let now = Utc::now();
        let mut doc = doc_with(&["PLAT-0001", "PLAT-0002", "PLAT-0003"]);
        doc.item_mut("PLAT-0003")
            .unwrap()
            .subitems
            .push(Entry::new("PLAT-0003-001".to_string(), "Sub".to_string(), now));

        add_blocker(&mut doc, "PLAT-0002", "PLAT-0001", now).unwrap();
        add_blocker(&mut doc, "PLAT-0003-001", "PLAT-0001", now).unwrap();
        add_blocker(&mut doc, "PLAT-0003", "PLAT-0001", now).unwrap();
        add_blocker(&mut doc, "PLAT-0003", "PLAT-0002", now).unwrap();

        let unblocked = on_resolved(&mut doc, "PLAT-0001", now);
        assert_eq!(unblocked, vec!["PLAT-0002", "PLAT-0003-001"]);

        // PLAT-0003 still waits on PLAT-0002
        let (e, _) = doc.find_entry("PLAT-0003").unwrap();
        assert_eq!(e.blocked_by, vec!["PLAT-0002"]);
        assert_eq!(e.status, ItemStatus::Blocked);
        assert!(dependents(&doc, "PLAT-0001").is_empty());
        assert_invariant(&doc);
    }
}
