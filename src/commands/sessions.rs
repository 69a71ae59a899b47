//! Session ("window") registry commands.

use chrono::Utc;
use serde::Serialize;

use super::{Output, json, show_path};
use crate::models::sessions::{self, PauseOutcome, ResumeOutcome, StatusReport};
use crate::models::{Session, SessionContext, SessionStatus};
use crate::storage::{Storage, ids};
use crate::Result;

#[derive(Serialize)]
pub struct SessionStatusResult {
    pub session: String,
    pub status: SessionStatus,
    pub created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<SessionStatus>,
}

impl Output for SessionStatusResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        match self.previous_status {
            Some(prev) => format!("{}: {} -> {}", self.session, prev, self.status),
            None if self.created => format!("{}: registered as {}", self.session, self.status),
            None => format!("{}: {}", self.session, self.status),
        }
    }
}

/// Report the caller's session status, creating the session on first report.
pub fn session_status(
    storage: &Storage,
    ctx: &SessionContext,
    status: SessionStatus,
    task: Option<String>,
) -> Result<SessionStatusResult> {
    let session_id = ctx.require_session()?;
    let report = StatusReport {
        status,
        task,
        worktree: ctx.workspace.clone(),
        branch: ctx.branch.clone(),
    };
    let outcome = storage.update(|doc| sessions::upsert(doc, session_id, report, Utc::now()))?;

    Ok(SessionStatusResult {
        session: session_id.to_string(),
        status: outcome.status,
        created: outcome.created,
        previous_status: outcome.previous_status,
    })
}

#[derive(Serialize)]
pub struct SessionPauseResult {
    pub session: String,
    pub status: SessionStatus,
    #[serde(flatten)]
    pub outcome: PauseOutcome,
}

impl Output for SessionPauseResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut out = format!(
            "Paused {} (was {})",
            self.session, self.outcome.previous_status
        );
        if let Some(item) = &self.outcome.paused_item {
            out.push_str(&format!("\nPaused {} with it", item));
        }
        out
    }
}

pub fn session_pause(
    storage: &Storage,
    ctx: &SessionContext,
    reason: &str,
) -> Result<SessionPauseResult> {
    let session_id = ctx.require_session()?;
    let outcome = storage.update(|doc| sessions::pause(doc, session_id, reason, Utc::now()))?;
    if let Some(item) = &outcome.paused_item {
        storage.notify_item(item);
    }

    Ok(SessionPauseResult {
        session: session_id.to_string(),
        status: SessionStatus::Paused,
        outcome,
    })
}

#[derive(Serialize)]
pub struct SessionResumeResult {
    pub session: String,
    #[serde(flatten)]
    pub outcome: ResumeOutcome,
}

impl Output for SessionResumeResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut out = format!("Resumed {} as {}", self.session, self.outcome.status);
        if let Some(item) = &self.outcome.resumed_item {
            out.push_str(&format!("\nResumed {} with it", item));
        }
        out
    }
}

pub fn session_resume(storage: &Storage, ctx: &SessionContext) -> Result<SessionResumeResult> {
    let session_id = ctx.require_session()?;
    let outcome = storage.update(|doc| sessions::resume(doc, session_id, Utc::now()))?;
    if let Some(item) = &outcome.resumed_item {
        storage.notify_item(item);
    }

    Ok(SessionResumeResult {
        session: session_id.to_string(),
        outcome,
    })
}

#[derive(Serialize)]
pub struct SessionRemoveResult {
    pub session: String,
    pub removed: bool,
}

impl Output for SessionRemoveResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!("Removed session {}", self.session)
    }
}

/// Remove a session: the one named, or the caller's.
pub fn session_remove(
    storage: &Storage,
    ctx: &SessionContext,
    session: Option<&str>,
) -> Result<SessionRemoveResult> {
    let session_id = match session {
        Some(s) => s,
        None => ctx.require_session()?,
    };
    storage.update(|doc| sessions::remove(doc, session_id))?;
    Ok(SessionRemoveResult {
        session: session_id.to_string(),
        removed: true,
    })
}

#[derive(Serialize)]
pub struct WorkingOnResult {
    pub session: String,
    pub working_on: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<String>,
}

impl Output for WorkingOnResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        match &self.working_on {
            Some(id) => format!("{} is working on {}", self.session, id),
            None => format!("{} is not working on anything", self.session),
        }
    }
}

/// Point the caller's session at an entry, or clear it when `selector` is `None`.
pub fn session_working_on(
    storage: &Storage,
    prefix: &str,
    ctx: &SessionContext,
    selector: Option<&str>,
) -> Result<WorkingOnResult> {
    let session_id = ctx.require_session()?;
    let (working_on, previous) = storage.update(|doc| match selector {
        Some(selector) => {
            let id = ids::resolve_selector(doc, prefix, selector)?;
            let previous = doc.session(session_id).and_then(|s| s.working_on_id.clone());
            sessions::set_working_on(doc, session_id, &id)?;
            Ok((Some(id), previous))
        }
        None => {
            let previous = sessions::clear_working_on(doc, session_id)?;
            Ok((None, previous))
        }
    })?;

    Ok(WorkingOnResult {
        session: session_id.to_string(),
        working_on,
        previous,
    })
}

#[derive(Serialize)]
pub struct SessionList {
    pub sessions: Vec<Session>,
    pub count: usize,
}

impl Output for SessionList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.sessions.is_empty() {
            return "No active sessions.".to_string();
        }
        let mut lines: Vec<String> = self
            .sessions
            .iter()
            .map(|s| {
                let mut line = format!(
                    "{} [{}] on {} in {}",
                    s.id,
                    s.status,
                    s.working_on_id.as_deref().unwrap_or("-"),
                    show_path(s.worktree.as_deref())
                );
                if let Some(task) = &s.task {
                    line.push_str(&format!(" \"{}\"", task));
                }
                if let Some(reason) = &s.paused_reason {
                    line.push_str(&format!(" (paused: {})", reason));
                }
                line
            })
            .collect();
        lines.push(format!("{} session(s)", self.count));
        lines.join("\n")
    }
}

pub fn session_list(storage: &Storage) -> Result<SessionList> {
    let sessions = storage.read(|doc| doc.active_sessions.clone())?;
    Ok(SessionList {
        count: sessions.len(),
        sessions,
    })
}

#[derive(Serialize)]
pub struct ReconcileResult {
    /// Entries whose workspace binding was dropped
    pub cleaned: Vec<String>,
}

impl Output for ReconcileResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.cleaned.is_empty() {
            "No orphaned bindings.".to_string()
        } else {
            format!("Released orphaned bindings: {}", self.cleaned.join(", "))
        }
    }
}

/// Drop bindings owned by sessions outside `live`. With no list, the
/// registered sessions count as live.
pub fn session_reconcile(storage: &Storage, live: Vec<String>) -> Result<ReconcileResult> {
    let cleaned = storage.update(|doc| {
        let live = if live.is_empty() {
            doc.active_sessions.iter().map(|s| s.id.clone()).collect()
        } else {
            live
        };
        Ok(sessions::reconcile(doc, &live, Utc::now()))
    })?;
    if !cleaned.is_empty() {
        tracing::info!(count = cleaned.len(), "Released orphaned workspace bindings");
    }
    for id in &cleaned {
        storage.notify_item(id);
    }
    Ok(ReconcileResult { cleaned })
}
