//! Workspace discovery helpers used by the CLI layer.
//!
//! The core never calls these: the binary resolves the caller's workspace and
//! branch once and passes them in through `SessionContext`.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

/// Upper bound for `git` subprocesses.
pub const GIT_TIMEOUT: Duration = Duration::from_millis(1500);

/// Walk up from `start` to the nearest directory containing `.git`.
///
/// A `.git` file (linked worktrees, submodules) counts as well, so each
/// worktree resolves to its own root.
pub fn find_git_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
}

/// Current branch of the repository at `dir`, or `None` when detached, not a
/// repository, `git` is missing, or it does not answer within `timeout`.
pub fn detect_branch(dir: &Path, timeout: Duration) -> Option<String> {
    let mut child = Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .ok()?;

    match child.wait_timeout(timeout) {
        Ok(Some(status)) if status.success() => {
            let mut out = String::new();
            child.stdout.take()?.read_to_string(&mut out).ok()?;
            let branch = out.trim();
            if branch.is_empty() || branch == "HEAD" {
                None
            } else {
                Some(branch.to_string())
            }
        }
        Ok(Some(_)) => None,
        Ok(None) => {
            tracing::debug!(dir = %dir.display(), "git rev-parse timed out");
            let _ = child.kill();
            let _ = child.wait();
            None
        }
        Err(e) => {
            tracing::debug!(error = %e, "Could not wait for git");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_find_git_root_from_nested_dir() {
        let tmp = TempDir::new().unwrap();
        let repo = tmp.path().join("repo");
        let nested = repo.join("src").join("deep");
        fs::create_dir_all(&nested).unwrap();
        fs::create_dir(repo.join(".git")).unwrap();

        assert_eq!(find_git_root(&nested), Some(repo));
    }

    #[test]
    fn test_find_git_root_accepts_git_file() {
        let tmp = TempDir::new().unwrap();
        let worktree = tmp.path().join("wt");
        fs::create_dir_all(&worktree).unwrap();
        fs::write(worktree.join(".git"), "gitdir: /elsewhere").unwrap();

        assert_eq!(find_git_root(&worktree), Some(worktree));
    }

    #[test]
    fn test_detect_branch_outside_repo() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("plain");
        fs::create_dir(&dir).unwrap();
        // The temp dir may itself sit inside a checkout.
        if let Some(branch) = detect_branch(&dir, GIT_TIMEOUT) {
            assert!(!branch.is_empty());
        }
    }
}
