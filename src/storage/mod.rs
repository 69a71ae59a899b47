//! Storage layer for backlog documents.
//!
//! Each team owns exactly one JSON document plus its lock file:
//!
//! ```text
//! <data_dir>/<team>/backlog.json       the document
//! <data_dir>/<team>/backlog.json.lock  advisory lock (content meaningless)
//! <data_dir>/<team>/config.kdl         team configuration
//! ```
//!
//! Reads take a shared lock; updates take an exclusive lock for the whole
//! load-transform-serialize-rename sequence. New content is written to a
//! temporary file in the same directory, verified, and renamed over the
//! document, so a reader sees either the old or the new document and never a
//! mixture. Transforms must be short and free of side effects beyond the
//! in-memory document.

pub mod ids;
pub mod lock;

pub use lock::{DocumentLock, LockMode, lock_path};

use chrono::Utc;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

use crate::models::Document;
use crate::sync::{SyncHandle, SyncNotifier, TeamRegistration};
use crate::{Error, Result};

/// File name of the per-team document.
pub const DOCUMENT_FILE: &str = "backlog.json";

/// File name of the per-team configuration.
pub const TEAM_CONFIG_FILE: &str = "config.kdl";

/// Environment variable overriding the data directory (read by the CLI only).
pub const DATA_DIR_ENV: &str = "BL_DATA_DIR";

/// Storage manager for a single team document.
pub struct Storage {
    /// Team directory
    root: PathBuf,
    /// Path of the JSON document
    doc_path: PathBuf,
    team: String,
    sync: Option<SyncNotifier>,
    pending_sync: Mutex<Vec<SyncHandle>>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("root", &self.root)
            .field("team", &self.team)
            .finish()
    }
}

impl Storage {
    fn new(root: PathBuf, team: &str) -> Self {
        let doc_path = root.join(DOCUMENT_FILE);
        Self {
            root,
            doc_path,
            team: team.to_string(),
            sync: None,
            pending_sync: Mutex::new(Vec::new()),
        }
    }

    /// Open an existing team document.
    pub fn open_with_data_dir(data_dir: &Path, team: &str) -> Result<Self> {
        let root = get_storage_dir(data_dir, team)?;
        let storage = Self::new(root, team);
        if !storage.doc_path.exists() {
            return Err(Error::NotInitialized);
        }
        Ok(storage)
    }

    /// Create the team directory and an empty document if none exists.
    ///
    /// Returns the storage and whether a new document was written.
    pub fn init_with_data_dir(data_dir: &Path, team: &str) -> Result<(Self, bool)> {
        let root = get_storage_dir(data_dir, team)?;
        fs::create_dir_all(&root)?;
        let storage = Self::new(root, team);

        let _lock = DocumentLock::acquire(&storage.doc_path, LockMode::Exclusive)?;
        if storage.doc_path.exists() {
            return Ok((storage, false));
        }

        let mut doc = Document::new(team);
        doc.last_updated = Some(Utc::now());
        let bytes = serde_json::to_vec_pretty(&doc)?;
        storage.commit(&bytes)?;
        tracing::info!(team, path = %storage.doc_path.display(), "Initialized team backlog");
        Ok((storage, true))
    }

    /// Attach a sync notifier fired after successful updates.
    pub fn with_sync(mut self, notifier: Option<SyncNotifier>) -> Self {
        self.sync = notifier;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn document_path(&self) -> &Path {
        &self.doc_path
    }

    pub fn team(&self) -> &str {
        &self.team
    }

    /// Run a read-only query against the document under a shared lock.
    pub fn read<T>(&self, query: impl FnOnce(&Document) -> T) -> Result<T> {
        let _lock = DocumentLock::acquire(&self.doc_path, LockMode::Shared)?;
        let doc = self.load()?;
        Ok(query(&doc))
    }

    /// Apply a transform under an exclusive lock and atomically persist the result.
    ///
    /// If the transform fails nothing is written.
    pub fn update<T>(&self, transform: impl FnOnce(&mut Document) -> Result<T>) -> Result<T> {
        let _lock = DocumentLock::acquire(&self.doc_path, LockMode::Exclusive)?;
        let mut doc = self.load()?;
        let out = transform(&mut doc)?;
        doc.last_updated = Some(Utc::now());
        let bytes = serde_json::to_vec_pretty(&doc)?;
        self.commit(&bytes)?;
        Ok(out)
    }

    /// Apply a transform over the raw JSON value.
    ///
    /// For collaborators that edit fields this crate does not model. The
    /// output must still be a non-empty document or the write is aborted.
    pub fn update_raw(
        &self,
        transform: impl FnOnce(serde_json::Value) -> Result<serde_json::Value>,
    ) -> Result<()> {
        let _lock = DocumentLock::acquire(&self.doc_path, LockMode::Exclusive)?;
        let raw = fs::read(&self.doc_path)?;
        let value: serde_json::Value = serde_json::from_slice(&raw)?;
        let out = transform(value)?;

        let empty = match &out {
            serde_json::Value::Null => true,
            serde_json::Value::Object(map) => map.is_empty(),
            _ => false,
        };
        if empty {
            return Err(self.integrity_error("transform produced an empty document".to_string()));
        }
        let bytes = serde_json::to_vec_pretty(&out)?;
        self.commit(&bytes)
    }

    /// Load and upgrade the document. Caller must hold a lock.
    fn load(&self) -> Result<Document> {
        let raw = match fs::read(&self.doc_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotInitialized);
            }
            Err(e) => return Err(e.into()),
        };
        let mut doc: Document = serde_json::from_slice(&raw)?;
        doc.upgrade(&self.team)?;
        Ok(doc)
    }

    fn integrity_error(&self, reason: String) -> Error {
        tracing::warn!(path = %self.doc_path.display(), %reason, "Aborted document write");
        Error::WriteIntegrity(reason)
    }

    /// Write serialized content via temp file + rename. Caller must hold the exclusive lock.
    fn commit(&self, bytes: &[u8]) -> Result<()> {
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(self.integrity_error("serialized document is empty".to_string()));
        }
        if let Err(e) = serde_json::from_slice::<Document>(bytes) {
            return Err(self.integrity_error(format!("serialized document does not parse: {}", e)));
        }

        let dir = self.doc_path.parent().unwrap_or(&self.root);
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;

        if tmp.as_file().metadata()?.len() == 0 {
            return Err(self.integrity_error("temporary file is empty".to_string()));
        }

        tmp.persist(&self.doc_path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    /// Fire a best-effort sync for an item. Never blocks on the network.
    pub fn notify_item(&self, item_id: &str) {
        if let Some(sync) = &self.sync {
            let handle = sync.notify_item(item_id);
            self.track(handle);
        }
    }

    /// Fire a best-effort team registration.
    pub fn register_team(&self, registration: &TeamRegistration) {
        if let Some(sync) = &self.sync {
            let handle = sync.register_team(registration);
            self.track(handle);
        }
    }

    fn track(&self, handle: SyncHandle) {
        if let Ok(mut pending) = self.pending_sync.lock() {
            pending.push(handle);
        }
    }

    /// Wait for outstanding sync requests. Each is bounded by its own timeout.
    ///
    /// Call after the command result has been delivered to the user.
    pub fn finish_sync(&self) {
        let handles = match self.pending_sync.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(_) => return,
        };
        for handle in handles {
            handle.wait();
        }
    }
}

/// Validate a team name for use as a directory name.
pub fn validate_team(team: &str) -> Result<()> {
    if team.is_empty()
        || !team
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::InvalidInput(format!(
            "Team name must be non-empty and contain only letters, digits, '-' or '_', got: {:?}",
            team
        )));
    }
    Ok(())
}

/// Directory holding a team's document.
pub fn get_storage_dir(data_dir: &Path, team: &str) -> Result<PathBuf> {
    validate_team(team)?;
    Ok(data_dir.join(team))
}

/// Default data directory: `~/.local/share/backlog` on Linux.
pub fn default_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| Error::Other("Could not determine data directory".to_string()))?;
    Ok(data_dir.join("backlog"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Item;
    use crate::test_utils::{TEST_TEAM, TestEnv};
    use std::thread;

    #[test]
    fn test_storage_init() {
        let env = TestEnv::new();
        let (storage, created) = Storage::init_with_data_dir(env.data_path(), TEST_TEAM).unwrap();

        assert!(created);
        assert!(storage.document_path().exists());
        let doc = storage.read(|d| d.clone()).unwrap();
        assert_eq!(doc.team, TEST_TEAM);
        assert_eq!(doc.next_id, 1);
    }

    #[test]
    fn test_storage_init_is_idempotent() {
        let env = TestEnv::new();
        let storage = env.init_storage();
        storage
            .update(|d| {
                d.next_id = 42;
                Ok(())
            })
            .unwrap();

        let (_, created) = Storage::init_with_data_dir(env.data_path(), TEST_TEAM).unwrap();
        assert!(!created);
        assert_eq!(env.open_storage().read(|d| d.next_id).unwrap(), 42);
    }

    #[test]
    fn test_open_uninitialized() {
        let env = TestEnv::new();
        assert!(matches!(
            Storage::open_with_data_dir(env.data_path(), TEST_TEAM),
            Err(Error::NotInitialized)
        ));
        assert!(!env.data_path().join(TEST_TEAM).join(DOCUMENT_FILE).exists());
    }

    #[test]
    fn test_invalid_team_name() {
        let env = TestEnv::new();
        assert!(Storage::init_with_data_dir(env.data_path(), "../escape").is_err());
        assert!(Storage::init_with_data_dir(env.data_path(), "").is_err());
    }

    #[test]
    fn test_update_persists_and_stamps() {
        let env = TestEnv::new();
        let storage = env.init_storage();
        let before = storage.read(|d| d.last_updated).unwrap();

        storage
            .update(|d| {
                d.items
                    .push(Item::new("PLAT-0001".to_string(), "One".to_string(), Utc::now()));
                Ok(())
            })
            .unwrap();

        let reopened = env.open_storage();
        let (count, after) = reopened.read(|d| (d.items.len(), d.last_updated)).unwrap();
        assert_eq!(count, 1);
        assert!(after >= before);
    }

    #[test]
    fn test_failed_transform_leaves_document_untouched() {
        let env = TestEnv::new();
        let storage = env.init_storage();
        let before = fs::read(storage.document_path()).unwrap();

        let result: Result<()> = storage.update(|d| {
            d.next_id = 999;
            Err(Error::InvalidInput("nope".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(fs::read(storage.document_path()).unwrap(), before);
    }

    #[test]
    fn test_empty_raw_transform_is_rejected() {
        let env = TestEnv::new();
        let storage = env.init_storage();
        let before = fs::read(storage.document_path()).unwrap();

        let result = storage.update_raw(|_| Ok(serde_json::Value::Null));
        assert!(matches!(result, Err(Error::WriteIntegrity(_))));
        let result = storage.update_raw(|_| Ok(serde_json::json!({})));
        assert!(matches!(result, Err(Error::WriteIntegrity(_))));

        assert_eq!(fs::read(storage.document_path()).unwrap(), before);
    }

    #[test]
    fn test_unparseable_raw_transform_is_rejected() {
        let env = TestEnv::new();
        let storage = env.init_storage();
        let before = fs::read(storage.document_path()).unwrap();

        let result = storage.update_raw(|_| Ok(serde_json::json!({"items": "not a list"})));
        assert!(matches!(result, Err(Error::WriteIntegrity(_))));
        assert_eq!(fs::read(storage.document_path()).unwrap(), before);
    }

    #[test]
    fn test_raw_transform_keeps_unknown_fields() {
        let env = TestEnv::new();
        let storage = env.init_storage();
        storage
            .update_raw(|mut v| {
                v["dashboardTheme"] = serde_json::json!("dark");
                Ok(v)
            })
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&fs::read(storage.document_path()).unwrap()).unwrap();
        assert_eq!(raw["dashboardTheme"], "dark");
    }

    #[test]
    fn test_commit_rejects_empty_bytes() {
        let env = TestEnv::new();
        let storage = env.init_storage();
        let before = fs::read(storage.document_path()).unwrap();

        let _lock = DocumentLock::acquire(storage.document_path(), LockMode::Exclusive).unwrap();
        assert!(matches!(storage.commit(b""), Err(Error::WriteIntegrity(_))));
        assert!(matches!(storage.commit(b"  \n"), Err(Error::WriteIntegrity(_))));
        assert_eq!(fs::read(storage.document_path()).unwrap(), before);
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let env = TestEnv::new();
        let storage = env.init_storage();
        let _ = storage.update_raw(|_| Ok(serde_json::Value::Null));
        for _ in 0..3 {
            storage.update(|d| {
                d.next_id += 1;
                Ok(())
            })
            .unwrap();
        }

        let mut names: Vec<String> = fs::read_dir(storage.root())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["backlog.json", "backlog.json.lock"]);
    }

    #[test]
    fn test_legacy_document_is_upgraded() {
        let env = TestEnv::new();
        let storage = env.init_storage();
        fs::write(storage.document_path(), r#"{"items": [], "nextId": 5}"#).unwrap();

        let doc = storage.read(|d| d.clone()).unwrap();
        assert_eq!(doc.schema_version, crate::models::SCHEMA_VERSION);
        assert_eq!(doc.team, TEST_TEAM);
        assert_eq!(doc.next_id, 5);
        assert!(doc.active_sessions.is_empty());
    }

    #[test]
    fn test_concurrent_writers_serialize() {
        let env = TestEnv::new();
        env.init_storage();
        let data_dir = env.data_path().to_path_buf();

        let writers: Vec<_> = (0..8)
            .map(|_| {
                let data_dir = data_dir.clone();
                thread::spawn(move || {
                    let storage = Storage::open_with_data_dir(&data_dir, TEST_TEAM).unwrap();
                    for _ in 0..10 {
                        storage
                            .update(|d| {
                                let alloc = ids::next_item_id(d, "PLAT");
                                d.items.push(Item::new(alloc.id, "t".to_string(), Utc::now()));
                                Ok(())
                            })
                            .unwrap();
                    }
                })
            })
            .collect();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let data_dir = data_dir.clone();
                thread::spawn(move || {
                    let storage = Storage::open_with_data_dir(&data_dir, TEST_TEAM).unwrap();
                    for _ in 0..50 {
                        // Every read must parse and carry the required fields
                        let team = storage.read(|d| d.team.clone()).unwrap();
                        assert_eq!(team, TEST_TEAM);
                        let raw = fs::read(storage.document_path()).unwrap();
                        let doc: Document = serde_json::from_slice(&raw).unwrap();
                        assert!(doc.next_id >= 1);
                    }
                })
            })
            .collect();

        for h in writers.into_iter().chain(readers) {
            h.join().unwrap();
        }

        let doc = env.open_storage().read(|d| d.clone()).unwrap();
        assert_eq!(doc.items.len(), 80);
        let mut ids: Vec<_> = doc.items.iter().map(|i| i.entry.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 80);
        assert_eq!(doc.next_id, 81);
    }
}
