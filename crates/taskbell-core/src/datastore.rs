use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::task::Task;

pub const DEFAULT_KEY: &str = "tasks";

/// Key-value medium that holds the serialized task snapshot.
///
/// `load` never fails: a missing or unreadable entry is an empty list.
/// `save` overwrites the whole entry.
pub trait SnapshotStore: Send {
    fn load(&self) -> Vec<Task>;

    fn save(&self, tasks: &[Task]) -> Result<(), StorageError>;
}

/// Snapshot stored as `<data_dir>/<key>.json`.
#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
    pub entry_path: PathBuf,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path, key: &str) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let entry_path = data_dir.join(format!("{key}.json"));
        info!(
            data_dir = %data_dir.display(),
            entry = %entry_path.display(),
            "opened datastore"
        );

        Ok(Self {
            data_dir,
            entry_path,
        })
    }

    /// Like [`SnapshotStore::load`] but reports why nothing was loaded.
    #[tracing::instrument(skip(self))]
    pub fn try_load(&self) -> Result<Option<Vec<Task>>, StorageError> {
        let raw = match fs::read_to_string(&self.entry_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StorageError::Read {
                    path: self.entry_path.clone(),
                    source,
                });
            }
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }

        let tasks: Vec<Task> = serde_json::from_str(&raw).map_err(|source| StorageError::Parse {
            path: self.entry_path.clone(),
            source,
        })?;
        debug!(count = tasks.len(), "loaded snapshot");
        Ok(Some(tasks))
    }
}

impl SnapshotStore for DataStore {
    fn load(&self) -> Vec<Task> {
        match self.try_load() {
            Ok(tasks) => tasks.unwrap_or_default(),
            Err(err) => {
                warn!(error = %err, "discarding unreadable snapshot; starting empty");
                Vec::new()
            }
        }
    }

    #[tracing::instrument(skip(self, tasks), fields(count = tasks.len()))]
    fn save(&self, tasks: &[Task]) -> Result<(), StorageError> {
        let path = &self.entry_path;
        let payload = serde_json::to_vec(tasks).map_err(|source| StorageError::Encode {
            path: path.clone(),
            source,
        })?;
        let write_err = |source: io::Error| StorageError::Write {
            path: path.clone(),
            source,
        };

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(dir).map_err(write_err)?;
        temp.write_all(&payload).map_err(write_err)?;
        temp.flush().map_err(write_err)?;
        temp.persist(path).map_err(|err| write_err(err.error))?;

        debug!(file = %path.display(), "saved snapshot");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryEntry {
    raw: Option<String>,
    writes: usize,
    fail_writes: bool,
}

/// In-process snapshot entry. Clones share the same entry.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the entry with raw text, which need not be valid JSON.
    pub fn with_raw(raw: impl Into<String>) -> Self {
        let store = Self::default();
        store.inner.lock().raw = Some(raw.into());
        store
    }

    pub fn raw(&self) -> Option<String> {
        self.inner.lock().raw.clone()
    }

    pub fn writes(&self) -> usize {
        self.inner.lock().writes
    }

    /// Makes every following `save` fail, to exercise best-effort writes.
    pub fn fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self) -> Vec<Task> {
        let entry = self.inner.lock();
        let Some(raw) = entry.raw.as_deref() else {
            return Vec::new();
        };
        serde_json::from_str(raw).unwrap_or_else(|err| {
            warn!(error = %err, "discarding malformed in-memory snapshot");
            Vec::new()
        })
    }

    fn save(&self, tasks: &[Task]) -> Result<(), StorageError> {
        let path = PathBuf::from("memory");
        let mut entry = self.inner.lock();
        if entry.fail_writes {
            return Err(StorageError::Write {
                path,
                source: io::Error::other("writes disabled"),
            });
        }
        let raw = serde_json::to_string(tasks)
            .map_err(|source| StorageError::Encode { path, source })?;
        entry.raw = Some(raw);
        entry.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Priority;
    use tempfile::tempdir;

    fn sample() -> Vec<Task> {
        let mut done = Task::new("file taxes");
        done.completed = true;
        done.priority = Priority::High;
        vec![Task::new("buy milk"), done]
    }

    #[test]
    fn save_then_load_round_trips() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path(), DEFAULT_KEY).expect("open datastore");

        store.save(&sample()).expect("save");
        assert_eq!(store.load(), sample());
        assert!(temp.path().join("tasks.json").exists());
    }

    #[test]
    fn missing_entry_loads_empty() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path(), DEFAULT_KEY).expect("open datastore");

        assert!(store.try_load().expect("try_load").is_none());
        assert!(store.load().is_empty());
    }

    #[test]
    fn malformed_entry_loads_empty() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path(), "todo").expect("open datastore");
        fs::write(&store.entry_path, "{not json").expect("write garbage");

        assert!(matches!(store.try_load(), Err(StorageError::Parse { .. })));
        assert!(store.load().is_empty());
    }

    #[test]
    fn save_overwrites_previous_snapshot() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path(), DEFAULT_KEY).expect("open datastore");

        store.save(&sample()).expect("first save");
        store.save(&[Task::new("only")]).expect("second save");
        assert_eq!(store.load(), vec![Task::new("only")]);
    }

    #[test]
    fn snapshot_uses_documented_json_shape() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path(), DEFAULT_KEY).expect("open datastore");
        store.save(&sample()).expect("save");

        let raw = fs::read_to_string(&store.entry_path).expect("read");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(
            value,
            serde_json::json!([
                { "text": "buy milk", "completed": false, "priority": "low" },
                { "text": "file taxes", "completed": true, "priority": "high" }
            ])
        );
    }

    #[test]
    fn memory_store_counts_writes_and_can_fail() {
        let store = MemoryStore::new();
        store.save(&sample()).expect("save");
        assert_eq!(store.writes(), 1);
        assert_eq!(store.load(), sample());

        store.fail_writes(true);
        assert!(store.save(&[]).is_err());
        assert_eq!(store.writes(), 1);
        assert_eq!(store.load(), sample());
    }

    #[test]
    fn memory_store_with_garbage_loads_empty() {
        let store = MemoryStore::with_raw("null-ish");
        assert!(store.load().is_empty());
    }
}
