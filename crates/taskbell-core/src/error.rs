use std::path::PathBuf;

use thiserror::Error;

/// Bad user input. Always recovered locally and shown as a notification.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("task text cannot be empty")]
    EmptyText,

    #[error("Please enter a valid number for the timer (milliseconds).")]
    InvalidDuration(String),

    #[error("invalid priority '{0}': expected low, medium or high")]
    InvalidPriority(String),

    #[error("invalid view '{0}': expected incomplete, completed or all")]
    InvalidViewMode(String),

    #[error("no task at index {index} ({len} tasks)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("a timer is already running for task {index}")]
    TimerPending { index: usize },

    #[error("task {index} is already completed")]
    TimerOnCompletedTask { index: usize },
}

/// Durable storage failure. Never fatal: loads degrade to an empty
/// collection and failed writes leave the in-memory state in place.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode snapshot for {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
