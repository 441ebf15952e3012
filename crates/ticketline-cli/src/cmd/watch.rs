//! `tl watch`: drive the change feed from stdin.
//!
//! Input is one notification per line: `<table> <record_id>`, where table is
//! one of `tickets`, `audit_logs`, `threads`, `thread_notes`. A line reading
//! `flush` processes everything queued so far. Blank lines and `#` comments
//! are ignored. Each outcome is printed as the worker produces it.

use crate::cmd::open_project;
use crate::output::OutputMode;
use crossbeam::channel::{self, Receiver};
use clap::Args;
use serde::Serialize;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use ticketline_core::source::EntityTable;
use ticketline_core::{ChangeFeed, FeedOutcome};
use tracing::warn;

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Override `feed.debounce_ms` from the project config.
    #[arg(long)]
    pub debounce_ms: Option<u64>,

    /// Override `feed.max_delay_ms` from the project config.
    #[arg(long)]
    pub max_delay_ms: Option<u64>,
}

#[derive(Debug, PartialEq, Eq)]
enum Line {
    Change(EntityTable, String),
    Flush,
    Skip,
}

fn parse_line(line: &str) -> Result<Line, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(Line::Skip);
    }
    if line.eq_ignore_ascii_case("flush") {
        return Ok(Line::Flush);
    }

    let mut parts = line.split_whitespace();
    let (Some(table), Some(record_id), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(format!("expected `<table> <record_id>`, got '{line}'"));
    };
    let table = table.parse::<EntityTable>().map_err(|e| e.to_string())?;
    Ok(Line::Change(table, record_id.to_string()))
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum OutcomeView {
    Recomputed {
        ticket_id: String,
        version: u64,
        changed: bool,
    },
    TimelineInvalidated {
        ticket_id: String,
    },
    Failed {
        ticket_id: String,
        error_code: &'static str,
        message: String,
    },
    Unresolved {
        table: &'static str,
        record_id: String,
    },
}

impl From<FeedOutcome> for OutcomeView {
    fn from(outcome: FeedOutcome) -> Self {
        match outcome {
            FeedOutcome::Recomputed {
                ticket_id,
                version,
                changed,
            } => Self::Recomputed {
                ticket_id,
                version,
                changed,
            },
            FeedOutcome::TimelineInvalidated { ticket_id } => Self::TimelineInvalidated { ticket_id },
            FeedOutcome::Failed {
                ticket_id,
                code,
                error,
            } => Self::Failed {
                ticket_id,
                error_code: code,
                message: error,
            },
            FeedOutcome::Unresolved { table, record_id } => Self::Unresolved {
                table: table.as_str(),
                record_id,
            },
        }
    }
}

fn write_outcome(w: &mut dyn Write, mode: OutputMode, view: &OutcomeView) -> anyhow::Result<()> {
    if mode.is_json() {
        // One object per line so the stream can be consumed incrementally.
        serde_json::to_writer(&mut *w, view)?;
        writeln!(w)?;
        return Ok(());
    }

    match view {
        OutcomeView::Recomputed {
            ticket_id,
            version,
            changed,
        } => {
            let what = if *changed { "updated" } else { "unchanged" };
            writeln!(w, "{what}\t{ticket_id}\tv{version}")?;
        }
        OutcomeView::TimelineInvalidated { ticket_id } => {
            writeln!(w, "timeline\t{ticket_id}")?;
        }
        OutcomeView::Failed {
            ticket_id,
            error_code,
            message,
        } => writeln!(w, "failed\t{ticket_id}\t{error_code}\t{message}")?,
        OutcomeView::Unresolved { table, record_id } => {
            writeln!(w, "unresolved\t{table}\t{record_id}")?;
        }
    }
    Ok(())
}

/// Print outcomes until the feed hangs up. Returns the number of failures.
fn print_outcomes(rx: &Receiver<FeedOutcome>, mode: OutputMode) -> anyhow::Result<usize> {
    let stdout = io::stdout();
    let mut failures = 0;
    for outcome in rx {
        if matches!(outcome, FeedOutcome::Failed { .. }) {
            failures += 1;
        }
        let mut out = stdout.lock();
        write_outcome(&mut out, mode, &OutcomeView::from(outcome))?;
        out.flush()?;
    }
    Ok(failures)
}

/// Execute `tl watch`.
///
/// # Errors
///
/// Returns an error if the project cannot be opened, stdin cannot be read,
/// or any recompute failed.
pub fn run_watch(args: &WatchArgs, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let project = open_project(project_root, output)?;

    let mut settings = project.config.feed.clone();
    if let Some(ms) = args.debounce_ms {
        settings.debounce_ms = ms;
    }
    if let Some(ms) = args.max_delay_ms {
        settings.max_delay_ms = ms;
    }

    let engine = Arc::new(project.engine);
    let (tx, rx) = channel::unbounded();
    let feed = ChangeFeed::spawn(Arc::clone(&engine), &settings, Some(tx));
    let printer = std::thread::spawn(move || print_outcomes(&rx, output));

    let stdin = io::stdin();
    for (index, line) in stdin.lock().lines().enumerate() {
        let line = line?;
        match parse_line(&line) {
            Ok(Line::Change(table, record_id)) => feed.on_entity_changed(table, &record_id),
            Ok(Line::Flush) => feed.flush(),
            Ok(Line::Skip) => {}
            Err(reason) => warn!(line = index + 1, %reason, "ignoring notification"),
        }
    }

    // Shutdown drains the queue; the worker then drops its outcome sender,
    // which ends the printer.
    feed.shutdown();
    let failures = printer
        .join()
        .map_err(|_| anyhow::anyhow!("outcome printer panicked"))??;

    if failures > 0 {
        anyhow::bail!("{failures} recomputes failed");
    }
    Ok(())
}
