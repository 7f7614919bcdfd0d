use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, instrument};

use crate::error::ValidationError;
use crate::filter::{self, ViewMode, Visible};
use crate::notify::{Level, NoticeKind, Notifier};
use crate::store::TaskStore;
use crate::task::{Priority, TaskEntry, TaskId};
use crate::timer::{Overdue, TimerCoordinator};

/// Longest accepted countdown, the same ceiling browsers put on
/// `setTimeout` (about 24.8 days).
pub const MAX_TIMER_MS: u64 = i32::MAX as u64;

/// Parses a timer duration typed by the user: a whole number of
/// milliseconds from 0 to [`MAX_TIMER_MS`].
pub fn parse_duration(raw: &str) -> Result<Duration, ValidationError> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|ms| *ms <= MAX_TIMER_MS)
        .map(Duration::from_millis)
        .ok_or_else(|| ValidationError::InvalidDuration(raw.to_string()))
}

/// The action surface used by front ends.
///
/// Owns the task store and the timers, takes raw user input, and reports
/// every outcome through the [`Notifier`]. Rejected input produces an error
/// notification and leaves all state untouched.
pub struct Tracker {
    store: TaskStore,
    timers: TimerCoordinator,
    view: ViewMode,
    notifier: Notifier,
}

impl Tracker {
    pub fn new(store: TaskStore, notifier: Notifier) -> Self {
        Self {
            store,
            timers: TimerCoordinator::new(),
            view: ViewMode::default(),
            notifier,
        }
    }

    pub fn with_view(mut self, view: ViewMode) -> Self {
        self.view = view;
        self
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn timers(&self) -> &TimerCoordinator {
        &self.timers
    }

    pub fn view_mode(&self) -> ViewMode {
        self.view
    }

    pub fn visible(&self) -> Vec<Visible<'_>> {
        filter::filter(self.store.entries(), self.view)
    }

    /// Adds a task. Blank text is silently ignored and reported as
    /// [`ValidationError::EmptyText`] without a notification.
    #[instrument(skip(self, text))]
    pub fn add_task(&mut self, text: &str) -> Result<TaskId, ValidationError> {
        let Some(id) = self.store.add_task(text) else {
            return Err(ValidationError::EmptyText);
        };
        let text = self.text_of(id);
        self.notifier.emit(
            Level::Info,
            NoticeKind::TaskAdded(id),
            format!("Task \"{text}\" added"),
        );
        self.flush_write_error();
        Ok(id)
    }

    /// Deletes a task and drops its timer. Timers of other tasks stay bound
    /// to their tasks.
    #[instrument(skip(self))]
    pub fn delete_task(&mut self, index: usize) -> Result<TaskEntry, ValidationError> {
        let removed = self
            .store
            .delete_task(index)
            .map_err(|err| self.reject(err))?;
        if self.timers.clear_timer(removed.id) {
            debug!(id = %removed.id, "dropped timer of deleted task");
        }
        self.notifier.emit(
            Level::Error,
            NoticeKind::TaskDeleted(removed.id),
            format!("Task \"{}\" deleted", removed.task.text),
        );
        self.flush_write_error();
        Ok(removed)
    }

    /// Replaces a task's text. `None` means the edit prompt was cancelled.
    ///
    /// A pending timer keeps the text it captured when it was set.
    #[instrument(skip(self, new_text))]
    pub fn edit_task(
        &mut self,
        index: usize,
        new_text: Option<&str>,
    ) -> Result<bool, ValidationError> {
        let changed = self
            .store
            .edit_task(index, new_text)
            .map_err(|err| self.reject(err))?;
        if changed {
            let id = self.id_at(index)?;
            let text = self.text_of(id);
            self.notifier.emit(
                Level::Info,
                NoticeKind::TaskEdited(id),
                format!("Task \"{text}\" updated"),
            );
            self.flush_write_error();
        }
        Ok(changed)
    }

    /// Flips completion. Completing a task cancels its pending timer.
    #[instrument(skip(self))]
    pub fn toggle_task_completion(&mut self, index: usize) -> Result<bool, ValidationError> {
        let id = self.id_at(index)?;
        let completed = self
            .store
            .toggle_task_completion(index)
            .map_err(|err| self.reject(err))?;
        let text = self.text_of(id);

        if completed {
            if self.timers.clear_timer(id) {
                self.notifier.emit(
                    Level::Success,
                    NoticeKind::TimerCleared(id),
                    format!("Timer cleared for task \"{text}\""),
                );
            }
            self.notifier.emit(
                Level::Success,
                NoticeKind::TaskCompleted(id),
                format!("Task \"{text}\" completed!"),
            );
        } else {
            self.notifier.emit(
                Level::Info,
                NoticeKind::TaskReopened(id),
                format!("Task \"{text}\" marked incomplete"),
            );
        }
        self.flush_write_error();
        Ok(completed)
    }

    #[instrument(skip(self))]
    pub fn set_task_priority(&mut self, index: usize, raw: &str) -> Result<Priority, ValidationError> {
        let priority = raw.parse::<Priority>().map_err(|err| self.reject(err))?;
        self.store
            .set_task_priority(index, priority)
            .map_err(|err| self.reject(err))?;

        let id = self.id_at(index)?;
        let text = self.text_of(id);
        self.notifier.emit(
            Level::Success,
            NoticeKind::PriorityChanged(id),
            format!("Priority updated for task \"{text}\""),
        );
        self.flush_write_error();
        Ok(priority)
    }

    /// Starts a countdown on an incomplete task with no timer running.
    #[instrument(skip(self))]
    pub fn start_timer(&mut self, index: usize, raw_ms: &str) -> Result<Instant, ValidationError> {
        let (id, duration) = self.timer_target(index, raw_ms)?;
        if self.timers.is_pending(id) {
            return Err(self.reject(ValidationError::TimerPending { index }));
        }

        let text = self.text_of(id);
        let deadline = self.timers.start_timer(id, text.clone(), duration);
        self.notifier.emit(
            Level::Info,
            NoticeKind::TimerSet(id),
            format!("Timer set for task \"{text}\""),
        );
        Ok(deadline)
    }

    /// Replaces any running countdown on the task with a new one.
    #[instrument(skip(self))]
    pub fn edit_timer(&mut self, index: usize, raw_ms: &str) -> Result<Instant, ValidationError> {
        let (id, duration) = self.timer_target(index, raw_ms)?;

        let text = self.text_of(id);
        let deadline = self.timers.re_arm(id, text.clone(), duration);
        self.notifier.emit(
            Level::Info,
            NoticeKind::TimerUpdated(id),
            format!("Timer updated for task \"{text}\""),
        );
        Ok(deadline)
    }

    /// Cancels the task's countdown. Returns `false` if none was running.
    #[instrument(skip(self))]
    pub fn clear_timer(&mut self, index: usize) -> Result<bool, ValidationError> {
        let id = self.id_at(index)?;
        if !self.timers.clear_timer(id) {
            debug!(index, "no timer to clear");
            return Ok(false);
        }

        let text = self.text_of(id);
        self.notifier.emit(
            Level::Success,
            NoticeKind::TimerCleared(id),
            format!("Timer cleared for task \"{text}\""),
        );
        Ok(true)
    }

    #[instrument(skip(self))]
    pub fn set_view_mode(&mut self, raw: &str) -> Result<ViewMode, ValidationError> {
        let mode = raw.parse::<ViewMode>().map_err(|err| self.reject(err))?;
        info!(mode = %mode, "view changed");
        self.view = mode;
        Ok(mode)
    }

    /// Waits for the next timer to run out and announces it.
    ///
    /// Cancel safe, so it can sit in a `select!` next to user input.
    pub async fn next_overdue(&mut self) -> Overdue {
        let overdue = self.timers.next_expiry().await;
        self.notifier.emit(
            Level::Warning,
            NoticeKind::Overdue(overdue.id),
            format!("Task \"{}\" is overdue!", overdue.text),
        );
        overdue
    }

    pub fn shutdown(&mut self) {
        let pending = self.timers.pending_count();
        self.timers.clear_all();
        info!(pending, "tracker shut down");
    }

    fn timer_target(
        &self,
        index: usize,
        raw_ms: &str,
    ) -> Result<(TaskId, Duration), ValidationError> {
        let id = self.id_at(index)?;
        let duration = parse_duration(raw_ms).map_err(|err| self.reject(err))?;
        if self.store.get(index).is_some_and(|entry| entry.task.completed) {
            return Err(self.reject(ValidationError::TimerOnCompletedTask { index }));
        }
        Ok((id, duration))
    }

    fn id_at(&self, index: usize) -> Result<TaskId, ValidationError> {
        self.store.id_at(index).ok_or_else(|| {
            self.reject(ValidationError::IndexOutOfRange {
                index,
                len: self.store.len(),
            })
        })
    }

    fn text_of(&self, id: TaskId) -> String {
        self.store
            .get_by_id(id)
            .map(|entry| entry.task.text.clone())
            .unwrap_or_default()
    }

    fn reject(&self, err: ValidationError) -> ValidationError {
        debug!(error = %err, "rejected input");
        self.notifier
            .emit(Level::Error, NoticeKind::InvalidInput, err.to_string());
        err
    }

    fn flush_write_error(&mut self) {
        if let Some(err) = self.store.take_write_error() {
            self.notifier.emit(
                Level::Warning,
                NoticeKind::StorageFailed,
                format!("Changes could not be saved: {err}"),
            );
        }
    }
}
