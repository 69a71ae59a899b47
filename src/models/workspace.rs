//! Workspace conflict detection and binding.
//!
//! Two entries actively working in the same workspace will step on each
//! other's files. This is never enforced: callers warn and proceed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

use super::{Document, EntryKind, state};
use crate::Result;

/// Another entry already actively working in the requested workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceConflict {
    pub id: String,
    pub kind: EntryKind,
    pub title: String,
    pub worktree: PathBuf,
}

impl WorkspaceConflict {
    pub fn message(&self) -> String {
        format!(
            "{} {} (\"{}\") is already active in {}",
            self.kind,
            self.id,
            self.title,
            self.worktree.display()
        )
    }
}

/// Find an entry other than `candidate_id` actively working in `workspace`.
pub fn check(doc: &Document, candidate_id: &str, workspace: &Path) -> Option<WorkspaceConflict> {
    doc.entries()
        .find(|(e, _)| {
            e.id != candidate_id
                && e.actively_working
                && e.worktree.as_deref() == Some(workspace)
        })
        .map(|(e, kind)| WorkspaceConflict {
            id: e.id.clone(),
            kind,
            title: e.title.clone(),
            worktree: workspace.to_path_buf(),
        })
}

/// Bind a workspace to an entry and report any conflict.
///
/// The binding is recorded even when a conflict is found.
pub fn link(
    doc: &mut Document,
    entry_id: &str,
    workspace: &Path,
    branch: Option<String>,
    now: DateTime<Utc>,
) -> Result<Option<WorkspaceConflict>> {
    doc.entry(entry_id)?;
    let conflict = check(doc, entry_id, workspace);

    let entry = doc.entry_mut(entry_id)?;
    entry.worktree = Some(workspace.to_path_buf());
    if branch.is_some() {
        entry.branch = branch;
    }
    entry.updated_at = now;
    Ok(conflict)
}

/// Clear an entry's workspace binding.
pub fn unlink(doc: &mut Document, entry_id: &str, now: DateTime<Utc>) -> Result<()> {
    // The work clock keeps running; only the binding goes away.
    let entry = doc.entry_mut(entry_id)?;
    state::clear_workspace(entry);
    entry.updated_at = now;
    Ok(())
}
