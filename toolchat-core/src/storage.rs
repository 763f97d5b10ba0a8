//! # Transcript storage
//!
//! Snapshot documents are stored by name through a [`SnapshotBackend`].
//! [`TranscriptStore`] layers the naming scheme on top:
//!
//! - `<prefix>_<YYYYmmdd_HHMMSS>.json` for saved sessions
//! - `<prefix>_history.json` for the rolling history rewritten at session end

use crate::error::{self, Error, ErrorKind, Result};
use crate::transcript::Transcript;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

// =============================================================================
// Backend trait
// =============================================================================

/// Named blob storage for snapshot documents.
pub trait SnapshotBackend: Send + Sync {
    /// Write (or overwrite) a document
    fn write(&self, name: &str, bytes: &[u8]) -> Result<()>;

    /// Read a document. A missing document is `FileNotFound`.
    fn read(&self, name: &str) -> Result<Vec<u8>>;

    /// Names of all stored documents
    fn list(&self) -> Result<Vec<String>>;

    fn exists(&self, name: &str) -> bool {
        self.read(name).is_ok()
    }

    /// Where a name lives, for display
    fn locate(&self, name: &str) -> String {
        name.to_string()
    }

    /// Get backend name for debugging
    fn backend_name(&self) -> &'static str;
}

// =============================================================================
// File-based Backend
// =============================================================================

/// Stores each document as a file in one directory.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash mid-write never leaves a truncated snapshot behind.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| {
            error::storage_failed(dir.display().to_string(), format!("cannot create directory: {}", e))
                .with_operation("storage::new")
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Absolute paths are used as-is; bare names resolve inside the store
    /// directory, other relative paths against the working directory.
    fn resolve(&self, name: &str) -> PathBuf {
        let path = Path::new(name);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        let inside = self.dir.join(path);
        if inside.exists() || path.components().count() == 1 {
            inside
        } else {
            path.to_path_buf()
        }
    }
}

impl SnapshotBackend for FileStore {
    fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.resolve(name);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)
            .and_then(|_| std::fs::rename(&tmp, &path))
            .map_err(|e| {
                error::storage_failed(path.display().to_string(), e.to_string())
                    .with_operation("storage::write")
            })
    }

    fn read(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.resolve(name);
        std::fs::read(&path).map_err(|e| {
            Error::from(e)
                .with_operation("storage::read")
                .with_context("path", path.display().to_string())
        })
    }

    fn list(&self) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            error::storage_failed(self.dir.display().to_string(), e.to_string())
                .with_operation("storage::list")
        })?;
        Ok(entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect())
    }

    fn exists(&self, name: &str) -> bool {
        self.resolve(name).is_file()
    }

    fn locate(&self, name: &str) -> String {
        self.resolve(name).display().to_string()
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}

// =============================================================================
// In-memory Backend
// =============================================================================

/// Volatile backend for tests and throwaway sessions
#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> Error {
    Error::unexpected("memory store lock poisoned").with_operation("storage::memory")
}

impl SnapshotBackend for MemoryStore {
    fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let mut docs = self.docs.write().map_err(|_| poisoned())?;
        docs.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn read(&self, name: &str) -> Result<Vec<u8>> {
        let docs = self.docs.read().map_err(|_| poisoned())?;
        docs.get(name).cloned().ok_or_else(|| {
            Error::new(ErrorKind::FileNotFound, format!("no snapshot named '{}'", name))
                .with_operation("storage::read")
        })
    }

    fn list(&self) -> Result<Vec<String>> {
        let docs = self.docs.read().map_err(|_| poisoned())?;
        Ok(docs.keys().cloned().collect())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

// =============================================================================
// Transcript store
// =============================================================================

pub struct TranscriptStore {
    backend: Box<dyn SnapshotBackend>,
    prefix: String,
}

impl TranscriptStore {
    pub fn with_backend(backend: impl SnapshotBackend + 'static, prefix: impl Into<String>) -> Self {
        Self {
            backend: Box::new(backend),
            prefix: prefix.into(),
        }
    }

    /// File-backed store rooted at `dir`
    pub fn open(dir: impl AsRef<Path>, prefix: impl Into<String>) -> Result<Self> {
        Ok(Self::with_backend(FileStore::new(dir)?, prefix))
    }

    pub fn in_memory(prefix: impl Into<String>) -> Self {
        Self::with_backend(MemoryStore::new(), prefix)
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    pub fn history_name(&self) -> String {
        format!("{}_history.json", self.prefix)
    }

    /// A fresh timestamped name that no stored document uses yet
    pub fn new_session_name(&self) -> String {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let base = format!("{}_{}", self.prefix, stamp);
        let mut name = format!("{}.json", base);
        let mut n = 1;
        while self.backend.exists(&name) {
            name = format!("{}_{}.json", base, n);
            n += 1;
        }
        name
    }

    /// Write `transcript` under `name`; returns where it landed
    pub fn save_as(&self, name: &str, transcript: &Transcript) -> Result<String> {
        let bytes = transcript.snapshot()?;
        self.backend.write(name, &bytes)?;
        tracing::debug!(name, turns = transcript.len(), "saved transcript");
        Ok(self.backend.locate(name))
    }

    /// Write a fresh timestamped snapshot
    pub fn save_snapshot(&self, transcript: &Transcript) -> Result<String> {
        let name = self.new_session_name();
        self.save_as(&name, transcript)
    }

    /// Load a snapshot strictly: unreadable or corrupt documents are errors.
    pub fn load(&self, name: &str) -> Result<Transcript> {
        let bytes = self.backend.read(name)?;
        Transcript::restore(&bytes).map_err(|e| e.with_context("snapshot", name.to_string()))
    }

    pub fn save_history(&self, transcript: &Transcript) -> Result<String> {
        self.save_as(&self.history_name(), transcript)
    }

    /// Rolling history, empty when absent. A corrupt history is reported
    /// alongside an empty transcript.
    pub fn load_history(&self) -> (Transcript, Option<Error>) {
        match self.backend.read(&self.history_name()) {
            Ok(bytes) => Transcript::restore_or_empty(&bytes),
            Err(e) if e.kind() == ErrorKind::FileNotFound => (Transcript::new(), None),
            Err(e) => {
                tracing::warn!(error = %e, "cannot read history");
                (Transcript::new(), Some(e))
            }
        }
    }

    /// Saved session names, newest first. The history document is excluded.
    pub fn list(&self) -> Result<Vec<String>> {
        let history = self.history_name();
        let prefix = format!("{}_", self.prefix);
        let mut names: Vec<String> = self
            .backend
            .list()?
            .into_iter()
            .filter(|n| n.starts_with(&prefix) && n.ends_with(".json") && *n != history)
            .collect();
        names.sort_unstable_by(|a, b| {
            fn key<'a>(n: &'a str, prefix: &str) -> (&'a str, u64) {
                recency_key(&n[prefix.len()..n.len() - ".json".len()])
            }
            key(b, &prefix).cmp(&key(a, &prefix))
        });
        Ok(names)
    }
}

/// `YYYYmmdd_HHMMSS[_n]` orders by stamp, then by numeric collision suffix.
fn recency_key(stem: &str) -> (&str, u64) {
    const STAMP_LEN: usize = "YYYYmmdd_HHMMSS".len();
    let suffix = stem
        .get(STAMP_LEN..)
        .and_then(|rest| rest.strip_prefix('_'))
        .and_then(|n| n.parse().ok());
    match (stem.get(..STAMP_LEN), suffix) {
        (Some(stamp), Some(n)) => (stamp, n),
        _ => (stem, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::Turn;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    fn sample() -> Transcript {
        let mut t = Transcript::new();
        t.append(Turn::user("hello"));
        t.append(Turn::assistant_text("hi"));
        t
    }

    #[test]
    fn test_file_store_roundtrip_and_listing() {
        let dir = TempDir::new().unwrap();
        let store = TranscriptStore::open(dir.path(), "conversation").unwrap();

        let first = store.new_session_name();
        assert_ok!(store.save_as(&first, &sample()));
        let second = assert_ok!(store.save_snapshot(&sample()));
        assert_ok!(store.save_history(&sample()));
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let names = store.list().unwrap();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|n| n != "conversation_history.json"));
        // Same-second names get a numeric suffix that sorts newer
        assert!(second.ends_with(&names[0]));
        assert_eq!(store.load(&names[1]).unwrap(), sample());
    }

    #[test]
    fn test_load_by_path_outside_store() {
        let dir = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let path = other.path().join("exported.json");
        std::fs::write(&path, sample().snapshot().unwrap()).unwrap();

        let store = TranscriptStore::open(dir.path(), "conversation").unwrap();
        let loaded = store.load(&path.display().to_string()).unwrap();
        assert_eq!(loaded, sample());

        let err = assert_err!(store.load("missing.json"));
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
    }

    #[test]
    fn test_history_corrupt_and_absent() {
        let store = TranscriptStore::in_memory("conversation");
        let (t, diag) = store.load_history();
        assert!(t.is_empty());
        assert!(diag.is_none());

        let backend = MemoryStore::new();
        backend.write("conversation_history.json", b"{ not json").unwrap();
        let store = TranscriptStore::with_backend(backend, "conversation");
        let (t, diag) = store.load_history();
        assert!(t.is_empty());
        assert_eq!(diag.unwrap().kind(), ErrorKind::CorruptSnapshot);
    }

    #[test]
    fn test_strict_load_rejects_corrupt() {
        let backend = MemoryStore::new();
        backend.write("conversation_x.json", b"[]").unwrap();
        let store = TranscriptStore::with_backend(backend, "conversation");
        let err = assert_err!(store.load("conversation_x.json"));
        assert_eq!(err.kind(), ErrorKind::CorruptSnapshot);
        assert_eq!(store.backend_name(), "memory");
    }

    #[test]
    fn test_listing_orders_collision_suffixes_numerically() {
        let backend = MemoryStore::new();
        for name in [
            "conversation_20240101_090000.json",
            "conversation_20240102_090000.json",
            "conversation_20240102_090000_2.json",
            "conversation_20240102_090000_10.json",
            "conversation_20240102_090000_1.json",
        ] {
            backend.write(name, b"{}").unwrap();
        }
        let store = TranscriptStore::with_backend(backend, "conversation");
        assert_eq!(
            store.list().unwrap(),
            vec![
                "conversation_20240102_090000_10.json",
                "conversation_20240102_090000_2.json",
                "conversation_20240102_090000_1.json",
                "conversation_20240102_090000.json",
                "conversation_20240101_090000.json",
            ]
        );
    }
}
