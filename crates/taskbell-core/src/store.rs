use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::datastore::SnapshotStore;
use crate::error::{StorageError, ValidationError};
use crate::task::{Priority, Task, TaskEntry, TaskId};

const CHANGE_CAPACITY: usize = 64;

/// Broadcast after every mutation with the full new collection.
#[derive(Debug, Clone)]
pub struct CollectionChanged {
    pub revision: u64,
    pub entries: Arc<[TaskEntry]>,
}

/// Owner of the canonical task collection.
///
/// Every successful mutation writes one full snapshot through the backend
/// and broadcasts one [`CollectionChanged`]. A failed write is logged and
/// kept for [`TaskStore::take_write_error`]; the in-memory change stands.
pub struct TaskStore {
    entries: Vec<TaskEntry>,
    backend: Box<dyn SnapshotStore>,
    changes: broadcast::Sender<CollectionChanged>,
    revision: u64,
    write_error: Option<StorageError>,
}

impl TaskStore {
    #[tracing::instrument(skip(backend))]
    pub fn open(backend: Box<dyn SnapshotStore>) -> Self {
        let entries: Vec<TaskEntry> = backend.load().into_iter().map(TaskEntry::new).collect();
        info!(count = entries.len(), "loaded task collection");

        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            entries,
            backend,
            changes,
            revision: 0,
            write_error: None,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CollectionChanged> {
        self.changes.subscribe()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TaskEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&TaskEntry> {
        self.entries.get(index)
    }

    pub fn id_at(&self, index: usize) -> Option<TaskId> {
        self.entries.get(index).map(|entry| entry.id)
    }

    pub fn index_of(&self, id: TaskId) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id == id)
    }

    pub fn get_by_id(&self, id: TaskId) -> Option<&TaskEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// Plain tasks in collection order, as persisted.
    pub fn snapshot(&self) -> Vec<Task> {
        self.entries.iter().map(|entry| entry.task.clone()).collect()
    }

    pub fn take_write_error(&mut self) -> Option<StorageError> {
        self.write_error.take()
    }

    /// Appends a new task. Blank text is ignored and returns `None`.
    #[tracing::instrument(skip(self, text), fields(len = text.len()))]
    pub fn add_task(&mut self, text: &str) -> Option<TaskId> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            debug!("ignoring blank task text");
            return None;
        }

        let entry = TaskEntry::new(Task::new(trimmed));
        let id = entry.id;
        self.entries.push(entry);
        self.commit();
        Some(id)
    }

    /// Removes the task at `index`; later tasks shift down by one.
    #[tracing::instrument(skip(self))]
    pub fn delete_task(&mut self, index: usize) -> Result<TaskEntry, ValidationError> {
        self.check_index(index)?;
        let removed = self.entries.remove(index);
        self.commit();
        Ok(removed)
    }

    /// Replaces the text at `index`. `None` (a cancelled prompt) changes
    /// nothing. Unlike `add_task`, the new text is taken verbatim.
    #[tracing::instrument(skip(self, new_text))]
    pub fn edit_task(
        &mut self,
        index: usize,
        new_text: Option<&str>,
    ) -> Result<bool, ValidationError> {
        self.check_index(index)?;
        let Some(new_text) = new_text else {
            debug!("edit cancelled");
            return Ok(false);
        };
        self.entries[index].task.text = new_text.to_string();
        self.commit();
        Ok(true)
    }

    /// Flips completion and returns the new state.
    #[tracing::instrument(skip(self))]
    pub fn toggle_task_completion(&mut self, index: usize) -> Result<bool, ValidationError> {
        self.check_index(index)?;
        let task = &mut self.entries[index].task;
        task.completed = !task.completed;
        let completed = task.completed;
        self.commit();
        Ok(completed)
    }

    #[tracing::instrument(skip(self))]
    pub fn set_task_priority(
        &mut self,
        index: usize,
        priority: Priority,
    ) -> Result<(), ValidationError> {
        self.check_index(index)?;
        self.entries[index].task.priority = priority;
        self.commit();
        Ok(())
    }

    fn check_index(&self, index: usize) -> Result<(), ValidationError> {
        if index < self.entries.len() {
            Ok(())
        } else {
            Err(ValidationError::IndexOutOfRange {
                index,
                len: self.entries.len(),
            })
        }
    }

    fn commit(&mut self) {
        self.revision += 1;

        if let Err(err) = self.backend.save(&self.snapshot()) {
            warn!(error = %err, revision = self.revision, "failed to persist task snapshot");
            self.write_error = Some(err);
        }

        let change = CollectionChanged {
            revision: self.revision,
            entries: Arc::from(self.entries.as_slice()),
        };
        // No subscribers is fine.
        let _ = self.changes.send(change);
        debug!(revision = self.revision, count = self.entries.len(), "collection changed");
    }
}
