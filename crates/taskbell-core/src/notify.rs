use std::fmt;

use tokio::sync::mpsc;
use tracing::trace;

use crate::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Level::Info => "info",
            Level::Success => "success",
            Level::Warning => "warning",
            Level::Error => "error",
        };
        f.write_str(label)
    }
}

/// What a notification is about, so consumers need not parse messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeKind {
    TaskAdded(TaskId),
    TaskDeleted(TaskId),
    TaskCompleted(TaskId),
    TaskReopened(TaskId),
    TaskEdited(TaskId),
    PriorityChanged(TaskId),
    TimerSet(TaskId),
    TimerCleared(TaskId),
    TimerUpdated(TaskId),
    Overdue(TaskId),
    InvalidInput,
    StorageFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: Level,
    pub kind: NoticeKind,
    pub message: String,
}

impl Notification {
    pub fn new(level: Level, kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            level,
            kind,
            message: message.into(),
        }
    }
}

/// Sending half handed to the engine. Delivery is fire-and-forget: a
/// dropped receiver only means nobody is displaying notifications.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl Notifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, notification: Notification) {
        trace!(level = %notification.level, message = %notification.message, "notify");
        let _ = self.tx.send(notification);
    }

    pub fn emit(&self, level: Level, kind: NoticeKind, message: impl Into<String>) {
        self.send(Notification::new(level, kind, message));
    }
}
