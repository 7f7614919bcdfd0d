use std::io::{self, Write};

use anyhow::{Context, anyhow};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, instrument};

use crate::error::ValidationError;
use crate::notify::Notification;
use crate::render::Renderer;
use crate::tracker::Tracker;

const HELP: &str = "\
commands (unique prefixes work):
  add <text>                  add a task
  delete <n>                  delete task n
  edit <n> [text]             replace the text of task n (\"\" clears it)
  done <n>                    toggle completion of task n
  priority <n> <low|medium|high>
  timer <n> <ms>              start a countdown on task n
  retimer <n> <ms>            replace the countdown on task n
  untimer <n>                 clear the countdown on task n
  view <incomplete|completed|all>
  list                        show the current view
  help
  quit";

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "add", "delete", "edit", "done", "priority", "timer", "retimer", "untimer", "view",
        "list", "help", "quit",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Add(String),
    Delete(usize),
    Edit { index: usize, text: Option<String> },
    Toggle(usize),
    Priority { index: usize, raw: String },
    StartTimer { index: usize, raw_ms: String },
    EditTimer { index: usize, raw_ms: String },
    ClearTimer(usize),
    View(String),
    List,
    Help,
    Quit,
}

impl Action {
    /// Parses one shell line. Blank lines yield `None`.
    pub fn parse(line: &str) -> anyhow::Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let (head, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(head, rest)| (head, rest.trim()));
        let command = expand_command_abbrev(head, &known_command_names())
            .ok_or_else(|| anyhow!("unknown or ambiguous command: {head}"))?;

        let action = match command {
            "add" => Action::Add(rest.to_string()),
            "delete" => Action::Delete(parse_index(rest)?),
            "edit" => {
                let (index, text) = split_index(rest)?;
                Action::Edit {
                    index,
                    text: text.map(edit_text),
                }
            }
            "done" => Action::Toggle(parse_index(rest)?),
            "priority" => {
                let (index, raw) = split_index(rest)?;
                Action::Priority {
                    index,
                    raw: raw.unwrap_or_default().to_string(),
                }
            }
            "timer" => {
                let (index, raw) = split_index(rest)?;
                Action::StartTimer {
                    index,
                    raw_ms: raw.unwrap_or_default().to_string(),
                }
            }
            "retimer" => {
                let (index, raw) = split_index(rest)?;
                Action::EditTimer {
                    index,
                    raw_ms: raw.unwrap_or_default().to_string(),
                }
            }
            "untimer" => Action::ClearTimer(parse_index(rest)?),
            "view" => Action::View(rest.to_string()),
            "list" => Action::List,
            "help" => Action::Help,
            "quit" => Action::Quit,
            other => return Err(anyhow!("unhandled command: {other}")),
        };
        Ok(Some(action))
    }
}

fn parse_index(raw: &str) -> anyhow::Result<usize> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(anyhow!("missing task number"));
    }
    raw.parse::<usize>()
        .with_context(|| format!("invalid task number: {raw}"))
}

/// A bare `""` stands for empty text, which a trimmed line cannot carry.
fn edit_text(raw: &str) -> String {
    if raw == "\"\"" {
        String::new()
    } else {
        raw.to_string()
    }
}

fn split_index(rest: &str) -> anyhow::Result<(usize, Option<&str>)> {
    match rest.split_once(char::is_whitespace) {
        Some((index, tail)) => Ok((parse_index(index)?, Some(tail.trim()))),
        None => Ok((parse_index(rest)?, None)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// State changed; show the view again.
    Render,
    Continue,
    Quit,
}

/// Applies one action. Validation failures were already announced as
/// notifications, so they only shape the returned flow.
#[instrument(skip(tracker))]
pub fn apply(tracker: &mut Tracker, action: Action) -> Flow {
    let outcome: Result<(), ValidationError> = match action {
        Action::Add(text) => tracker.add_task(&text).map(drop),
        Action::Delete(index) => tracker.delete_task(index).map(drop),
        Action::Edit { index, text } => tracker.edit_task(index, text.as_deref()).map(drop),
        Action::Toggle(index) => tracker.toggle_task_completion(index).map(drop),
        Action::Priority { index, raw } => tracker.set_task_priority(index, &raw).map(drop),
        Action::StartTimer { index, raw_ms } => tracker.start_timer(index, &raw_ms).map(drop),
        Action::EditTimer { index, raw_ms } => tracker.edit_timer(index, &raw_ms).map(drop),
        Action::ClearTimer(index) => tracker.clear_timer(index).map(drop),
        Action::View(raw) => tracker.set_view_mode(&raw).map(drop),
        Action::List => return Flow::Render,
        Action::Help => {
            println!("{HELP}");
            return Flow::Continue;
        }
        Action::Quit => return Flow::Quit,
    };

    match outcome {
        Ok(()) => Flow::Render,
        Err(err) => {
            debug!(error = %err, "action rejected");
            Flow::Continue
        }
    }
}

fn drain_notifications(
    renderer: &Renderer,
    notices: &mut UnboundedReceiver<Notification>,
) -> anyhow::Result<()> {
    while let Ok(notification) = notices.try_recv() {
        renderer.print_notification(&notification)?;
    }
    Ok(())
}

fn execute_line(
    tracker: &mut Tracker,
    renderer: &Renderer,
    notices: &mut UnboundedReceiver<Notification>,
    line: &str,
) -> anyhow::Result<Flow> {
    let flow = match Action::parse(line)? {
        Some(action) => apply(tracker, action),
        None => Flow::Continue,
    };
    drain_notifications(renderer, notices)?;
    if flow == Flow::Render {
        renderer.print_view(tracker)?;
    }
    Ok(flow)
}

fn prompt() -> anyhow::Result<()> {
    let mut out = io::stdout().lock();
    write!(out, "> ")?;
    out.flush()?;
    Ok(())
}

/// Runs a single command, then stays alive until any timer it started
/// has fired.
#[instrument(skip_all)]
pub async fn run_once(
    tracker: &mut Tracker,
    renderer: &Renderer,
    notices: &mut UnboundedReceiver<Notification>,
    line: &str,
) -> anyhow::Result<()> {
    execute_line(tracker, renderer, notices, line)?;

    while tracker.timers().pending_count() > 0 {
        info!(
            pending = tracker.timers().pending_count(),
            "waiting for timers"
        );
        tracker.next_overdue().await;
        drain_notifications(renderer, notices)?;
    }
    Ok(())
}

/// Interactive loop. Overdue notices are printed as they fire, even while
/// waiting for input.
#[instrument(skip_all)]
pub async fn run_shell(
    tracker: &mut Tracker,
    renderer: &Renderer,
    notices: &mut UnboundedReceiver<Notification>,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    renderer.print_view(tracker)?;
    prompt()?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read input")? else {
                    debug!("input closed");
                    break;
                };
                match execute_line(tracker, renderer, notices, &line) {
                    Ok(Flow::Quit) => break,
                    Ok(_) => {}
                    Err(err) => eprintln!("error: {err:#}"),
                }
                prompt()?;
            }
            overdue = tracker.next_overdue() => {
                debug!(id = %overdue.id, "timer fired while idle");
                println!();
                drain_notifications(renderer, notices)?;
                prompt()?;
            }
        }
    }

    tracker.shutdown();
    Ok(())
}
