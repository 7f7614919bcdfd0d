use std::fmt;
use std::str::FromStr;

use tracing::trace;

use crate::error::ValidationError;
use crate::task::TaskEntry;

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
)]
pub enum ViewMode {
  #[default]
  Incomplete,
  Completed,
  All
}

impl ViewMode {
  pub fn heading(
    self
  ) -> &'static str {
    match self {
      | ViewMode::Incomplete => {
        "Incomplete Tasks"
      }
      | ViewMode::Completed => {
        "Completed Tasks"
      }
      | ViewMode::All => "All Tasks"
    }
  }

  fn admits(
    self,
    entry: &TaskEntry
  ) -> bool {
    match self {
      | ViewMode::Incomplete => {
        !entry.task.completed
      }
      | ViewMode::Completed => {
        entry.task.completed
      }
      | ViewMode::All => true
    }
  }
}

impl fmt::Display for ViewMode {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    let label = match self {
      | ViewMode::Incomplete => {
        "incomplete"
      }
      | ViewMode::Completed => {
        "completed"
      }
      | ViewMode::All => "all"
    };
    f.write_str(label)
  }
}

impl FromStr for ViewMode {
  type Err = ValidationError;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "incomplete" | "pending"
      | "open" => {
        Ok(ViewMode::Incomplete)
      }
      | "completed" | "done" => {
        Ok(ViewMode::Completed)
      }
      | "all" => Ok(ViewMode::All),
      | _ => {
        Err(
          ValidationError::InvalidViewMode(
            s.to_string()
          )
        )
      }
    }
  }
}

/// A task admitted by the view, with its
/// position in the full collection.
#[derive(Debug, Clone, Copy)]
pub struct Visible<'a> {
  pub index: usize,
  pub entry: &'a TaskEntry
}

/// Visible subsequence of `entries` for
/// `mode`, in collection order.
pub fn filter(
  entries: &[TaskEntry],
  mode: ViewMode
) -> Vec<Visible<'_>> {
  let visible: Vec<Visible<'_>> =
    entries
      .iter()
      .enumerate()
      .filter(|(_, entry)| {
        mode.admits(entry)
      })
      .map(|(index, entry)| {
        Visible {
          index,
          entry
        }
      })
      .collect();

  trace!(
    mode = %mode,
    total = entries.len(),
    visible = visible.len(),
    "filtered view"
  );
  visible
}
