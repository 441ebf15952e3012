//! `tl rebuild`: recompute metadata for some or all tickets.

use crate::cmd::open_project;
use crate::output::{OutputMode, fail, pretty_kv, pretty_section, render_mode};
use clap::Args;
use serde::Serialize;
use std::io::{self, Write};
use std::path::Path;
use ticketline_core::BatchReport;

#[derive(Args, Debug)]
pub struct RebuildArgs {
    /// Ticket ids to rebuild. Rebuilds every live ticket when empty.
    pub tickets: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct FailureView {
    pub ticket_id: String,
    pub error_code: &'static str,
    pub message: String,
}

/// Serializable form of a [`BatchReport`].
#[derive(Debug, Serialize)]
pub struct BatchView {
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
    pub failures: Vec<FailureView>,
    pub warnings: usize,
}

impl From<&BatchReport> for BatchView {
    fn from(report: &BatchReport) -> Self {
        Self {
            updated: report.updated.clone(),
            unchanged: report.unchanged.clone(),
            failures: report
                .failures
                .iter()
                .map(|failure| FailureView {
                    ticket_id: failure.ticket_id.clone(),
                    error_code: failure.error.code().code(),
                    message: failure.error.to_string(),
                })
                .collect(),
            warnings: report.warnings,
        }
    }
}

pub fn write_batch_text(view: &BatchView, w: &mut dyn Write) -> io::Result<()> {
    writeln!(
        w,
        "updated={} unchanged={} failed={} warnings={}",
        view.updated.len(),
        view.unchanged.len(),
        view.failures.len(),
        view.warnings
    )?;
    for failure in &view.failures {
        writeln!(w, "failed\t{}\t{}\t{}", failure.ticket_id, failure.error_code, failure.message)?;
    }
    Ok(())
}

pub fn write_batch_pretty(view: &BatchView, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "Rebuild")?;
    pretty_kv(w, "Updated", view.updated.len().to_string())?;
    pretty_kv(w, "Unchanged", view.unchanged.len().to_string())?;
    pretty_kv(w, "Failed", view.failures.len().to_string())?;
    pretty_kv(w, "Warnings", view.warnings.to_string())?;
    if !view.failures.is_empty() {
        writeln!(w)?;
        pretty_section(w, "Failures")?;
        for failure in &view.failures {
            writeln!(w, "  {} [{}] {}", failure.ticket_id, failure.error_code, failure.message)?;
        }
    }
    Ok(())
}

/// Execute `tl rebuild [TICKET...]`.
///
/// # Errors
///
/// Returns an error if the project cannot be opened, the ticket list cannot
/// be read, or any ticket failed. Every ticket is attempted either way.
pub fn run_rebuild(args: &RebuildArgs, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let project = open_project(project_root, output)?;

    let report = if args.tickets.is_empty() {
        project
            .engine
            .rebuild_all()
            .map_err(|err| fail(output, &err))?
    } else {
        project.engine.rebuild(&args.tickets)
    };

    let view = BatchView::from(&report);
    render_mode(output, &view, write_batch_text, write_batch_pretty)?;

    if !report.is_complete_success() {
        anyhow::bail!("{} of {} tickets failed to rebuild", report.failures.len(), report.total());
    }
    Ok(())
}
