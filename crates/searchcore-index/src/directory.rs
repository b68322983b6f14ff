//! Shared access to index directories.
//!
//! The factory hands out one `tantivy::Index` per path and counts how many
//! holders (the core, each open searcher) are using it. The entry is dropped
//! when the last holder releases it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tantivy::Index;
use tracing::{debug, info, warn};

use crate::error::IndexError;
use crate::schema::IndexSchema;

/// Name of Tantivy's writer lock file inside an index directory.
pub const WRITER_LOCK_FILE: &str = ".tantivy-writer.lock";

/// Where index files live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryKind {
    /// Memory-mapped files on disk
    Mmap,
    /// In-memory only; the path is just a name
    Ram,
}

/// Result of `DirectoryFactory::get`.
#[derive(Clone)]
pub struct OpenedIndex {
    pub index: Index,
    /// True the first time this path is opened by this factory
    pub first_open: bool,
}

struct DirectoryEntry {
    index: Index,
    refs: usize,
}

/// Reference-counted index directories keyed by path.
pub struct DirectoryFactory {
    kind: DirectoryKind,
    entries: Mutex<HashMap<PathBuf, DirectoryEntry>>,
    known: Mutex<Vec<PathBuf>>,
}

impl DirectoryFactory {
    pub fn new(kind: DirectoryKind) -> Self {
        Self {
            kind,
            entries: Mutex::new(HashMap::new()),
            known: Mutex::new(Vec::new()),
        }
    }

    pub fn mmap() -> Self {
        Self::new(DirectoryKind::Mmap)
    }

    pub fn ram() -> Self {
        Self::new(DirectoryKind::Ram)
    }

    pub fn kind(&self) -> DirectoryKind {
        self.kind
    }

    /// Open (or create) the index at `path` and take a reference to it.
    pub fn get(&self, path: &Path, schema: &IndexSchema) -> Result<OpenedIndex, IndexError> {
        let mut entries = self.lock_entries();

        if let Some(entry) = entries.get_mut(path) {
            entry.refs += 1;
            return Ok(OpenedIndex {
                index: entry.index.clone(),
                first_open: false,
            });
        }

        let index = match self.kind {
            DirectoryKind::Mmap => open_or_create_index(path, schema)?,
            DirectoryKind::Ram => Index::create_in_ram(schema.schema().clone()),
        };

        let first_open = {
            let mut known = match self.known.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if known.iter().any(|p| p == path) {
                false
            } else {
                known.push(path.to_path_buf());
                true
            }
        };

        entries.insert(
            path.to_path_buf(),
            DirectoryEntry {
                index: index.clone(),
                refs: 1,
            },
        );
        debug!(path = ?path, first_open, "Opened index directory");
        Ok(OpenedIndex { index, first_open })
    }

    /// Take another reference to an already open directory.
    pub fn acquire(&self, path: &Path) -> Result<Index, IndexError> {
        let mut entries = self.lock_entries();
        let entry = entries
            .get_mut(path)
            .ok_or_else(|| IndexError::IndexNotFound(path.display().to_string()))?;
        entry.refs += 1;
        Ok(entry.index.clone())
    }

    /// Give back one reference. Returns true when the directory was closed.
    pub fn release(&self, path: &Path) -> bool {
        let mut entries = self.lock_entries();
        let Some(entry) = entries.get_mut(path) else {
            warn!(path = ?path, "Release of a directory that is not open");
            return false;
        };
        entry.refs -= 1;
        if entry.refs > 0 {
            return false;
        }
        entries.remove(path);
        debug!(path = ?path, "Closed index directory");
        true
    }

    /// Outstanding references for `path`.
    pub fn open_count(&self, path: &Path) -> usize {
        self.lock_entries().get(path).map_or(0, |e| e.refs)
    }

    /// Check if an index exists at `path`.
    pub fn exists(&self, path: &Path) -> bool {
        match self.kind {
            DirectoryKind::Mmap => path.join("meta.json").exists(),
            DirectoryKind::Ram => self.lock_entries().contains_key(path),
        }
    }

    /// Check if a writer lock file is present.
    pub fn is_locked(&self, path: &Path) -> bool {
        match self.kind {
            DirectoryKind::Mmap => path.join(WRITER_LOCK_FILE).exists(),
            DirectoryKind::Ram => false,
        }
    }

    /// Delete a writer lock left behind by a dead process.
    pub fn remove_stale_lock(&self, path: &Path) -> Result<bool, IndexError> {
        if !self.is_locked(path) {
            return Ok(false);
        }
        std::fs::remove_file(path.join(WRITER_LOCK_FILE))?;
        warn!(path = ?path, "Removed stale index writer lock");
        Ok(true)
    }

    /// Drop every entry, warning about references still outstanding.
    pub fn close(&self) {
        let mut entries = self.lock_entries();
        for (path, entry) in entries.iter() {
            if entry.refs > 0 {
                warn!(path = ?path, refs = entry.refs, "Closing directory with open references");
            }
        }
        entries.clear();
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<PathBuf, DirectoryEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Open an existing index or create a new one.
///
/// Uses MmapDirectory for persistence.
fn open_or_create_index(path: &Path, schema: &IndexSchema) -> Result<Index, IndexError> {
    if path.join("meta.json").exists() {
        debug!(path = ?path, "Opening existing index");
        let index = Index::open_in_dir(path)?;
        schema.check_compatible(&index.schema())?;
        Ok(index)
    } else {
        info!(path = ?path, "Creating new index");
        std::fs::create_dir_all(path)?;
        let index = Index::create_in_dir(path, schema.schema().clone())?;
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldKind;
    use tempfile::TempDir;

    fn schema() -> IndexSchema {
        IndexSchema::builder("id")
            .add_field("id", FieldKind::String)
            .add_field("body", FieldKind::Text)
            .build()
            .unwrap()
    }

    #[test]
    fn test_create_and_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let factory = DirectoryFactory::mmap();

        let opened = factory.get(temp_dir.path(), &schema()).unwrap();
        assert!(opened.first_open);
        assert!(factory.exists(temp_dir.path()));

        let again = factory.get(temp_dir.path(), &schema()).unwrap();
        assert!(!again.first_open);
        assert_eq!(factory.open_count(temp_dir.path()), 2);
    }

    #[test]
    fn test_release_closes_at_zero() {
        let temp_dir = TempDir::new().unwrap();
        let factory = DirectoryFactory::mmap();
        factory.get(temp_dir.path(), &schema()).unwrap();
        factory.acquire(temp_dir.path()).unwrap();

        assert!(!factory.release(temp_dir.path()));
        assert!(factory.release(temp_dir.path()));
        assert_eq!(factory.open_count(temp_dir.path()), 0);
        assert!(factory.acquire(temp_dir.path()).is_err());

        // Files remain; reopening is not a first open.
        let reopened = factory.get(temp_dir.path(), &schema()).unwrap();
        assert!(!reopened.first_open);
    }

    #[test]
    fn test_schema_mismatch_on_reopen() {
        let temp_dir = TempDir::new().unwrap();
        DirectoryFactory::mmap()
            .get(temp_dir.path(), &schema())
            .unwrap();

        let other = IndexSchema::builder("id")
            .add_field("id", FieldKind::String)
            .add_field("body", FieldKind::U64)
            .build()
            .unwrap();
        let result = DirectoryFactory::mmap().get(temp_dir.path(), &other);
        assert!(matches!(result, Err(IndexError::SchemaMismatch(_))));
    }

    #[test]
    fn test_stale_lock_removal() {
        let temp_dir = TempDir::new().unwrap();
        let factory = DirectoryFactory::mmap();
        std::fs::write(temp_dir.path().join(WRITER_LOCK_FILE), b"").unwrap();

        assert!(factory.is_locked(temp_dir.path()));
        assert!(factory.remove_stale_lock(temp_dir.path()).unwrap());
        assert!(!factory.is_locked(temp_dir.path()));
        assert!(!factory.remove_stale_lock(temp_dir.path()).unwrap());
    }

    #[test]
    fn test_ram_directory() {
        let factory = DirectoryFactory::ram();
        let path = Path::new("ram-index");
        assert!(!factory.exists(path));
        factory.get(path, &schema()).unwrap();
        assert!(factory.exists(path));
        assert!(!factory.is_locked(path));
    }
}
