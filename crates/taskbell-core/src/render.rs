use std::io::{self, IsTerminal, Write};
use std::time::Duration;

use chrono::Local;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::notify::{Level, Notification};
use crate::task::Priority;
use crate::tracker::Tracker;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color = cfg.get_bool("color")?.unwrap_or(true);

        Ok(Self {
            color: color && io::stdout().is_terminal(),
        })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    pub fn print_view(&self, tracker: &Tracker) -> anyhow::Result<()> {
        self.write_view(io::stdout().lock(), tracker)
    }

    pub fn print_notification(&self, notification: &Notification) -> anyhow::Result<()> {
        self.write_notification(io::stdout().lock(), notification)
    }

    /// Heading plus one row per visible task. The `#` column is the
    /// collection index that commands take.
    #[tracing::instrument(skip_all)]
    pub fn write_view<W: Write>(&self, mut out: W, tracker: &Tracker) -> anyhow::Result<()> {
        let mode = tracker.view_mode();
        writeln!(out, "{}", self.paint(mode.heading(), "1"))?;

        let visible = tracker.visible();
        if visible.is_empty() {
            writeln!(out, "(no tasks)")?;
            return Ok(());
        }

        let headers = vec![
            "#".to_string(),
            "Done".to_string(),
            "Priority".to_string(),
            "Timer".to_string(),
            "Task".to_string(),
        ];

        let now = tokio::time::Instant::now();
        let mut rows = Vec::with_capacity(visible.len());
        for row in visible {
            let task = &row.entry.task;
            let done = if task.completed { "[x]" } else { "[ ]" };

            let priority = self.paint(task.priority.as_str(), priority_color(task.priority));

            let timer = tracker
                .timers()
                .deadline(row.entry.id)
                .map(|deadline| {
                    let remaining = deadline.saturating_duration_since(now);
                    format!("{:.1}s ({})", remaining.as_secs_f64(), fire_time(remaining))
                })
                .unwrap_or_default();

            let text = if task.completed {
                self.paint(&task.text, "9")
            } else {
                task.text.clone()
            };

            rows.push(vec![
                self.paint(&row.index.to_string(), "33"),
                done.to_string(),
                priority,
                timer,
                text,
            ]);
        }

        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    pub fn write_notification<W: Write>(
        &self,
        mut out: W,
        notification: &Notification,
    ) -> anyhow::Result<()> {
        let code = match notification.level {
            Level::Info => "34",
            Level::Success => "32",
            Level::Warning => "33",
            Level::Error => "31",
        };
        let label = self.paint(&format!("[{}]", notification.level), code);
        writeln!(out, "{label} {}", notification.message)?;
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn priority_color(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "31",
        Priority::Medium => "33",
        Priority::Low => "32",
    }
}

/// Local wall-clock time at which `remaining` runs out, or `--:--:--`
/// when that lies past what the calendar can represent.
fn fire_time(remaining: Duration) -> String {
    chrono::TimeDelta::from_std(remaining)
        .ok()
        .and_then(|left| Local::now().checked_add_signed(left))
        .map(|at| at.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string())
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(header.as_str()))
        .collect();

    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    let header_line: Vec<String> = headers
        .iter()
        .zip(&widths)
        .map(|(header, &width)| format!("{header:width$}"))
        .collect();
    writeln!(writer, "{}", header_line.join(" ").trim_end())?;

    let rule: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
    writeln!(writer, "{}", rule.join(" "))?;

    for row in rows {
        let mut line = String::new();
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            if idx > 0 {
                line.push(' ');
            }
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            line.push_str(cell);
            line.push_str(&" ".repeat(widths[idx].saturating_sub(visible_width)));
        }
        writeln!(writer, "{}", line.trim_end())?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
