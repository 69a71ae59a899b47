//! Session ("window") registry.
//!
//! Sessions are created implicitly on their first status report and merged on
//! every later one, so session-scoped history survives repeated updates from
//! hooks that only know the new status.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

use super::{Document, ItemStatus, Session, SessionStatus, StatusChange, state};
use crate::{Error, Result};

/// Status report from a session.
#[derive(Debug, Clone, Default)]
pub struct StatusReport {
    pub status: SessionStatus,
    pub task: Option<String>,
    pub worktree: Option<PathBuf>,
    pub branch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpsertOutcome {
    pub created: bool,
    /// Status after the report; stays `paused` while the session is paused
    pub status: SessionStatus,
    /// Status before this report, when it changed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<SessionStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PauseOutcome {
    pub previous_status: SessionStatus,
    /// Work item paused along with the session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused_item: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResumeOutcome {
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resumed_item: Option<String>,
}

fn not_found(session_id: &str) -> Error {
    Error::NotFound(format!("Session not found: {}", session_id))
}

fn change_status(session: &mut Session, status: SessionStatus, now: DateTime<Utc>) {
    session.status_history.push(StatusChange {
        status: session.status,
        started_at: session.status_changed_at,
        ended_at: now,
    });
    session.status = status;
    session.status_changed_at = now;
}

/// Create or merge a session entry.
///
/// Existing `started_at`, history, `working_on_id` and workspace fields are
/// kept unless the report carries new values. A report on a paused session
/// leaves the pause in place and only retargets the status `resume` restores.
pub fn upsert(
    doc: &mut Document,
    session_id: &str,
    report: StatusReport,
    now: DateTime<Utc>,
) -> Result<UpsertOutcome> {
    if report.status == SessionStatus::Paused {
        return Err(Error::precondition(
            "Sessions are paused with a reason, not by status report",
            "use `bl session pause --reason <why>`",
        ));
    }
    if session_id.trim().is_empty() {
        return Err(Error::InvalidInput("Session id cannot be empty".to_string()));
    }

    let created = doc.session(session_id).is_none();
    if created {
        doc.active_sessions
            .push(Session::new(session_id.to_string(), report.status, now));
    }
    let session = doc
        .session_mut(session_id)
        .ok_or_else(|| not_found(session_id))?;

    let mut previous_status = None;
    if session.status == SessionStatus::Paused {
        session.previous_status = Some(report.status);
    } else if !created && session.status != report.status {
        previous_status = Some(session.status);
        change_status(session, report.status, now);
    }
    if report.task.is_some() {
        session.task = report.task;
    }
    if report.worktree.is_some() {
        session.worktree = report.worktree;
    }
    if report.branch.is_some() {
        session.branch = report.branch;
    }

    Ok(UpsertOutcome {
        created,
        status: session.status,
        previous_status,
    })
}

/// Delete a session entry entirely.
pub fn remove(doc: &mut Document, session_id: &str) -> Result<Session> {
    let idx = doc
        .active_sessions
        .iter()
        .position(|s| s.id == session_id)
        .ok_or_else(|| not_found(session_id))?;
    Ok(doc.active_sessions.remove(idx))
}

/// Point a session at an item or subitem.
pub fn set_working_on(doc: &mut Document, session_id: &str, entry_id: &str) -> Result<()> {
    doc.entry(entry_id)?;
    let session = doc.session_mut(session_id).ok_or_else(|| {
        Error::precondition(
            format!("Session not found: {}", session_id),
            "report a status first with `bl session status <status>`",
        )
    })?;
    session.working_on_id = Some(entry_id.to_string());
    Ok(())
}

/// Clear `working_on_id`, returning what it pointed at.
pub fn clear_working_on(doc: &mut Document, session_id: &str) -> Result<Option<String>> {
    let session = doc
        .session_mut(session_id)
        .ok_or_else(|| not_found(session_id))?;
    Ok(session.working_on_id.take())
}

/// Clear `working_on_id` on every session pointing at `entry_id`.
pub fn release_entry(doc: &mut Document, entry_id: &str) -> Vec<String> {
    let mut cleared = Vec::new();
    for session in &mut doc.active_sessions {
        if session.working_on_id.as_deref() == Some(entry_id) {
            session.working_on_id = None;
            cleared.push(session.id.clone());
        }
    }
    cleared
}

/// Pause a session, and the item it is working on if that item is running.
pub fn pause(
    doc: &mut Document,
    session_id: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<PauseOutcome> {
    let session = doc.session(session_id).ok_or_else(|| not_found(session_id))?;
    if session.status == SessionStatus::Paused {
        return Err(Error::precondition(
            format!("Session {} is already paused", session_id),
            "resume it with `bl session resume` first",
        ));
    }
    let previous_status = session.status;
    let working_on = session.working_on_id.clone();

    let mut paused_item = None;
    if let Some(id) = working_on {
        if let Some(entry) = doc.find_entry_mut(&id) {
            if entry.status == ItemStatus::InProgress {
                state::pause(entry, reason, now)?;
                paused_item = Some(id);
            }
        }
    }

    let session = doc
        .session_mut(session_id)
        .ok_or_else(|| not_found(session_id))?;
    change_status(session, SessionStatus::Paused, now);
    session.previous_status = Some(previous_status);
    session.paused_reason = Some(reason.to_string());
    session.paused_item_id = paused_item.clone();

    Ok(PauseOutcome {
        previous_status,
        paused_item,
    })
}

/// Resume a paused session, restoring its exact prior status.
pub fn resume(doc: &mut Document, session_id: &str, now: DateTime<Utc>) -> Result<ResumeOutcome> {
    let session = doc.session(session_id).ok_or_else(|| not_found(session_id))?;
    if session.status != SessionStatus::Paused {
        return Err(Error::precondition(
            format!("Session {} is not paused (status: {})", session_id, session.status),
            "only paused sessions can be resumed",
        ));
    }
    let restored = session.previous_status.unwrap_or_default();
    let paused_item = session.paused_item_id.clone();

    let mut resumed_item = None;
    if let Some(id) = paused_item {
        if let Some(entry) = doc.find_entry_mut(&id) {
            if entry.status == ItemStatus::Paused {
                state::resume(entry, now)?;
                resumed_item = Some(id);
            }
        }
    }

    let session = doc
        .session_mut(session_id)
        .ok_or_else(|| not_found(session_id))?;
    change_status(session, restored, now);
    session.previous_status = None;
    session.paused_reason = None;
    session.paused_item_id = None;

    Ok(ResumeOutcome {
        status: restored,
        resumed_item,
    })
}

/// Drop workspace bindings owned by sessions that are no longer alive.
///
/// Used for orphan cleanup after a session died without releasing its work.
/// Entry status is left alone; only the binding and the running work
/// interval are cleared. Returns the ids of the cleaned entries.
pub fn reconcile(doc: &mut Document, live_sessions: &[String], now: DateTime<Utc>) -> Vec<String> {
    let mut cleaned = Vec::new();
    for entry in doc.entries_mut() {
        let Some(owner) = entry.session_id.as_deref() else {
            continue;
        };
        if live_sessions.iter().any(|s| s == owner) {
            continue;
        }
        state::flush_work_time(entry, now);
        state::clear_workspace(entry);
        entry.updated_at = now;
        cleaned.push(entry.id.clone());
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Item, SessionContext};

    const SID: &str = "term1:agent";

    fn report(status: SessionStatus) -> StatusReport {
        StatusReport {
            status,
            ..Default::default()
        }
    }

    fn doc_with_item() -> Document {
        let mut doc = Document::new("platform");
        doc.items
            .push(Item::new("PLAT-0001".to_string(), "Task".to_string(), Utc::now()));
        doc
    }

    #[test]
    fn test_upsert_creates_then_merges() {
        let mut doc = Document::new("platform");
        let t0 = Utc::now();
        let out = upsert(
            &mut doc,
            SID,
            StatusReport {
                status: SessionStatus::Planning,
                task: Some("reading code".to_string()),
                worktree: Some("/work/a".into()),
                branch: Some("main".to_string()),
            },
            t0,
        )
        .unwrap();
        assert!(out.created);

        doc.session_mut(SID).unwrap().working_on_id = Some("PLAT-0001".to_string());

        let t1 = t0 + chrono::Duration::seconds(10);
        let out = upsert(&mut doc, SID, report(SessionStatus::Coding), t1).unwrap();
        assert!(!out.created);
        assert_eq!(out.previous_status, Some(SessionStatus::Planning));

        let s = doc.session(SID).unwrap();
        assert_eq!(s.started_at, t0);
        assert_eq!(s.status_changed_at, t1);
        assert_eq!(s.task.as_deref(), Some("reading code"));
        assert_eq!(s.working_on_id.as_deref(), Some("PLAT-0001"));
        assert_eq!(s.branch.as_deref(), Some("main"));
        assert_eq!(s.status_history.len(), 1);
        assert_eq!(s.status_history[0].status, SessionStatus::Planning);
    }

    #[test]
    fn test_upsert_same_status_does_not_grow_history() {
        let mut doc = Document::new("platform");
        upsert(&mut doc, SID, report(SessionStatus::Coding), Utc::now()).unwrap();
        upsert(&mut doc, SID, report(SessionStatus::Coding), Utc::now()).unwrap();
        assert!(doc.session(SID).unwrap().status_history.is_empty());
    }

    #[test]
    fn test_upsert_rejects_paused_status() {
        let mut doc = Document::new("platform");
        assert!(upsert(&mut doc, SID, report(SessionStatus::Paused), Utc::now()).is_err());
        assert!(doc.active_sessions.is_empty());
    }

    #[test]
    fn test_pause_resume_restores_prior_status_and_item() {
        let mut doc = doc_with_item();
        let now = Utc::now();
        upsert(&mut doc, SID, report(SessionStatus::Testing), now).unwrap();
        let ctx = SessionContext::new("platform").with_session(SID);
        state::start(doc.entry_mut("PLAT-0001").unwrap(), &ctx, now).unwrap();
        set_working_on(&mut doc, SID, "PLAT-0001").unwrap();

        let out = pause(&mut doc, SID, "meeting", now).unwrap();
        assert_eq!(out.previous_status, SessionStatus::Testing);
        assert_eq!(out.paused_item.as_deref(), Some("PLAT-0001"));
        assert_eq!(doc.find_entry("PLAT-0001").unwrap().0.status, ItemStatus::Paused);

        let err = pause(&mut doc, SID, "again", now).unwrap_err();
        assert!(err.to_string().contains("already paused"));

        let out = resume(&mut doc, SID, now).unwrap();
        assert_eq!(out.status, SessionStatus::Testing);
        assert_eq!(out.resumed_item.as_deref(), Some("PLAT-0001"));

        let s = doc.session(SID).unwrap();
        assert_eq!(s.status, SessionStatus::Testing);
        assert!(s.paused_reason.is_none());
        assert!(s.previous_status.is_none());
        assert_eq!(
            doc.find_entry("PLAT-0001").unwrap().0.status,
            ItemStatus::InProgress
        );
    }

    #[test]
    fn test_status_report_while_paused_keeps_pause_and_item() {
        let mut doc = doc_with_item();
        let now = Utc::now();
        upsert(&mut doc, SID, report(SessionStatus::Coding), now).unwrap();
        let ctx = SessionContext::new("platform").with_session(SID);
        state::start(doc.entry_mut("PLAT-0001").unwrap(), &ctx, now).unwrap();
        set_working_on(&mut doc, SID, "PLAT-0001").unwrap();
        pause(&mut doc, SID, "lunch", now).unwrap();

        let out = upsert(&mut doc, SID, report(SessionStatus::Testing), now).unwrap();
        assert_eq!(out.status, SessionStatus::Paused);
        assert!(out.previous_status.is_none());

        let s = doc.session(SID).unwrap();
        assert_eq!(s.status, SessionStatus::Paused);
        assert_eq!(s.paused_reason.as_deref(), Some("lunch"));
        assert_eq!(s.previous_status, Some(SessionStatus::Testing));
        assert_eq!(s.paused_item_id.as_deref(), Some("PLAT-0001"));
        assert_eq!(doc.find_entry("PLAT-0001").unwrap().0.status, ItemStatus::Paused);

        let out = resume(&mut doc, SID, now).unwrap();
        assert_eq!(out.status, SessionStatus::Testing);
        assert_eq!(out.resumed_item.as_deref(), Some("PLAT-0001"));
        assert_eq!(
            doc.find_entry("PLAT-0001").unwrap().0.status,
            ItemStatus::InProgress
        );
    }

    #[test]
    fn test_resume_not_paused_rejected() {
        let mut doc = Document::new("platform");
        upsert(&mut doc, SID, report(SessionStatus::Coding), Utc::now()).unwrap();
        assert!(resume(&mut doc, SID, Utc::now()).is_err());
    }

    #[test]
    fn test_working_on_requires_session_and_entry() {
        let mut doc = doc_with_item();
        assert!(set_working_on(&mut doc, SID, "PLAT-0001").is_err());

        upsert(&mut doc, SID, report(SessionStatus::Coding), Utc::now()).unwrap();
        assert!(set_working_on(&mut doc, SID, "PLAT-0042").is_err());
        set_working_on(&mut doc, SID, "PLAT-0001").unwrap();
        assert_eq!(
            clear_working_on(&mut doc, SID).unwrap().as_deref(),
            Some("PLAT-0001")
        );
        assert!(doc.session(SID).unwrap().working_on_id.is_none());
    }

    #[test]
    fn test_remove_session() {
        let mut doc = Document::new("platform");
        upsert(&mut doc, SID, report(SessionStatus::Coding), Utc::now()).unwrap();
        remove(&mut doc, SID).unwrap();
        assert!(doc.session(SID).is_none());
        assert!(remove(&mut doc, SID).is_err());
    }

    #[test]
    fn test_reconcile_clears_orphaned_bindings() {
        let mut doc = doc_with_item();
        doc.items
            .push(Item::new("PLAT-0002".to_string(), "Other".to_string(), Utc::now()));
        let now = Utc::now();
        let dead = SessionContext::new("platform")
            .with_session("term9:gone")
            .with_workspace("/work/a");
        let live = SessionContext::new("platform")
            .with_session(SID)
            .with_workspace("/work/b");
        state::start(doc.entry_mut("PLAT-0001").unwrap(), &dead, now).unwrap();
        state::start(doc.entry_mut("PLAT-0002").unwrap(), &live, now).unwrap();

        let cleaned = reconcile(&mut doc, &[SID.to_string()], now);
        assert_eq!(cleaned, vec!["PLAT-0001"]);

        let (orphan, _) = doc.find_entry("PLAT-0001").unwrap();
        assert!(orphan.session_id.is_none());
        assert!(!orphan.actively_working);
        assert_eq!(orphan.status, ItemStatus::InProgress);
        assert!(doc.find_entry("PLAT-0002").unwrap().0.actively_working);
    }
}
