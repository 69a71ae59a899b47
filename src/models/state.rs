//! Lifecycle transitions for items and subitems.
//!
//! ```text
//! todo ──start──▶ in_progress ──complete/cancel──▶ completed | cancelled
//!                  │      ▲
//!            pause │      │ resume (restores previous_status)
//!                  ▼      │
//!                  paused
//! ```
//!
//! `blocked` is entered and left by the dependency graph (see `graph`), never
//! directly from here. Completed and cancelled are terminal.

use chrono::{DateTime, Utc};

use super::{Entry, ItemStatus, SessionContext};
use crate::{Error, Result};

/// Terminal outcome for `resolve`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Completed,
    Cancelled { reason: Option<String> },
}

fn terminal_error(entry: &Entry) -> Error {
    Error::precondition(
        format!("{} is already {}", entry.id, entry.status),
        "completed and cancelled items cannot change state; create a new item instead",
    )
}

/// Add the running work interval (if any) to the accumulated total.
pub fn flush_work_time(entry: &mut Entry, now: DateTime<Utc>) {
    if let Some(started) = entry.last_started_at.take() {
        let elapsed = (now - started).num_seconds().max(0) as u64;
        entry.work_seconds += elapsed;
    }
}

/// Drop the workspace binding entirely.
pub fn clear_workspace(entry: &mut Entry) {
    entry.worktree = None;
    entry.branch = None;
    entry.session_id = None;
    entry.actively_working = false;
}

fn clear_pause(entry: &mut Entry) {
    entry.paused_reason = None;
    entry.previous_status = None;
}

/// `todo → in_progress`, binding the caller's workspace.
///
/// Starting an entry that is already in progress rebinds it to the caller
/// without resetting its work interval.
pub fn start(entry: &mut Entry, ctx: &SessionContext, now: DateTime<Utc>) -> Result<()> {
    match entry.status {
        ItemStatus::Todo | ItemStatus::InProgress => {}
        ItemStatus::Blocked => {
            return Err(Error::precondition(
                format!(
                    "{} is blocked by {}",
                    entry.id,
                    entry.blocked_by.join(", ")
                ),
                "resolve the blockers or remove them with `bl unblock`",
            ));
        }
        ItemStatus::Paused => {
            return Err(Error::precondition(
                format!("{} is paused", entry.id),
                "resume it with `bl item resume`",
            ));
        }
        ItemStatus::Completed | ItemStatus::Cancelled => return Err(terminal_error(entry)),
    }

    if entry.started_at.is_none() {
        entry.started_at = Some(now);
    }
    if entry.last_started_at.is_none() {
        entry.last_started_at = Some(now);
    }
    entry.status = ItemStatus::InProgress;

    if ctx.workspace.is_some() {
        entry.worktree = ctx.workspace.clone();
        entry.branch = ctx.branch.clone();
    }
    entry.session_id = ctx.session_id.clone();
    entry.actively_working = entry.worktree.is_some();
    entry.updated_at = now;
    Ok(())
}

/// `in_progress → paused`, remembering the status to restore.
pub fn pause(entry: &mut Entry, reason: &str, now: DateTime<Utc>) -> Result<()> {
    match entry.status {
        ItemStatus::InProgress => {}
        ItemStatus::Paused => {
            return Err(Error::precondition(
                format!("{} is already paused", entry.id),
                "resume it before pausing again",
            ));
        }
        ItemStatus::Completed | ItemStatus::Cancelled => return Err(terminal_error(entry)),
        other => {
            return Err(Error::precondition(
                format!("{} is {}; only in-progress work can be paused", entry.id, other),
                "start the item first",
            ));
        }
    }

    flush_work_time(entry, now);
    entry.previous_status = Some(entry.status);
    entry.paused_reason = Some(reason.to_string());
    entry.status = ItemStatus::Paused;
    entry.actively_working = false;
    entry.updated_at = now;
    Ok(())
}

/// `paused → <previous>`.
pub fn resume(entry: &mut Entry, now: DateTime<Utc>) -> Result<ItemStatus> {
    if entry.status != ItemStatus::Paused {
        return Err(Error::precondition(
            format!("{} is not paused (status: {})", entry.id, entry.status),
            "only paused items can be resumed",
        ));
    }

    let restored = entry.previous_status.unwrap_or(ItemStatus::Todo);
    entry.status = restored;
    clear_pause(entry);
    if restored == ItemStatus::InProgress {
        entry.last_started_at = Some(now);
        entry.actively_working = entry.worktree.is_some();
    }
    entry.updated_at = now;
    Ok(restored)
}

/// Move an entry into a terminal state.
///
/// Subitem preconditions are checked by the caller; this only touches the
/// entry itself. Remaining blocker edges are dropped so a resolved entry is
/// never left looking blocked.
pub fn resolve(entry: &mut Entry, resolution: Resolution, now: DateTime<Utc>) -> Result<()> {
    if entry.is_resolved() {
        return Err(terminal_error(entry));
    }

    flush_work_time(entry, now);
    clear_workspace(entry);
    clear_pause(entry);
    entry.blocked_by.clear();

    match resolution {
        Resolution::Completed => {
            entry.status = ItemStatus::Completed;
            entry.completed_at = Some(now);
        }
        Resolution::Cancelled { reason } => {
            entry.status = ItemStatus::Cancelled;
            entry.cancelled_at = Some(now);
            entry.cancel_reason = reason;
        }
    }
    entry.updated_at = now;
    Ok(())
}

/// Put an entry into `blocked`, stopping any running work on it.
pub(crate) fn enter_blocked(entry: &mut Entry, now: DateTime<Utc>) {
    flush_work_time(entry, now);
    clear_workspace(entry);
    clear_pause(entry);
    entry.status = ItemStatus::Blocked;
    entry.updated_at = now;
}

/// Leave `blocked` once the last blocker is gone.
pub(crate) fn leave_blocked(entry: &mut Entry, now: DateTime<Utc>) {
    if entry.status == ItemStatus::Blocked {
        entry.status = ItemStatus::Todo;
        entry.unblocked_at = Some(now);
    }
    entry.updated_at = now;
}
