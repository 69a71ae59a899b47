//! Advisory locks scoped to one document file.
//!
//! The lock lives on a side-car file (`<document>.lock`) created on demand.
//! Its existence and content mean nothing; only the lock state does, so the
//! file is never deleted. Acquisition blocks without a timeout and the lock is
//! released when the guard is dropped.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Suffix appended to the document path to form the lock file path.
pub const LOCK_SUFFIX: &str = ".lock";

/// Lock flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Many readers at once
    Shared,
    /// One writer, no readers
    Exclusive,
}

/// A held lock, released on drop.
#[derive(Debug)]
pub struct DocumentLock {
    file: File,
    path: PathBuf,
}

/// Path of the lock file paired with a document.
pub fn lock_path(document: &Path) -> PathBuf {
    let mut name = document.as_os_str().to_os_string();
    name.push(LOCK_SUFFIX);
    PathBuf::from(name)
}

impl DocumentLock {
    /// Block until the lock on `document` can be taken in `mode`.
    ///
    /// Failing to open or create the lock file aborts the operation.
    pub fn acquire(document: &Path, mode: LockMode) -> Result<Self> {
        let path = lock_path(document);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| Error::Lock {
                path: path.clone(),
                source,
            })?;

        let locked = match mode {
            LockMode::Shared => FileExt::lock_shared(&file),
            LockMode::Exclusive => FileExt::lock_exclusive(&file),
        };
        locked.map_err(|source| Error::Lock {
            path: path.clone(),
            source,
        })?;

        tracing::debug!(path = %path.display(), ?mode, "Acquired document lock");
        Ok(Self { file, path })
    }
}

impl Drop for DocumentLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        tracing::debug!(path = %self.path.display(), "Released document lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_lock_path_appends_suffix() {
        assert_eq!(
            lock_path(Path::new("/data/team/backlog.json")),
            PathBuf::from("/data/team/backlog.json.lock")
        );
    }

    #[test]
    fn test_lock_file_created_on_demand() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("backlog.json");
        let lock = DocumentLock::acquire(&doc, LockMode::Shared).unwrap();
        assert!(lock_path(&doc).exists());
        drop(lock);
        // The lock file stays behind
        assert!(lock_path(&doc).exists());
    }

    #[test]
    fn test_shared_locks_coexist() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("backlog.json");
        let first = DocumentLock::acquire(&doc, LockMode::Shared).unwrap();

        let other = File::open(lock_path(&doc)).unwrap();
        assert!(FileExt::try_lock_shared(&other).is_ok());
        FileExt::unlock(&other).unwrap();
        drop(first);
    }

    #[test]
    fn test_exclusive_excludes_others() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("backlog.json");
        let writer = DocumentLock::acquire(&doc, LockMode::Exclusive).unwrap();

        let other = File::open(lock_path(&doc)).unwrap();
        assert!(FileExt::try_lock_shared(&other).is_err());
        drop(writer);
        assert!(FileExt::try_lock_shared(&other).is_ok());
    }

    #[test]
    fn test_exclusive_blocks_until_released() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("backlog.json");
        let writer = DocumentLock::acquire(&doc, LockMode::Exclusive).unwrap();

        let acquired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&acquired);
        let doc_clone = doc.clone();
        let handle = thread::spawn(move || {
            let _reader = DocumentLock::acquire(&doc_clone, LockMode::Shared).unwrap();
            flag.store(true, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(100));
        assert!(!acquired.load(Ordering::SeqCst));
        drop(writer);
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_unopenable_lock_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("missing-dir").join("backlog.json");
        let result = DocumentLock::acquire(&doc, LockMode::Exclusive);
        assert!(matches!(result, Err(Error::Lock { .. })));
    }
}
