//! `tl import`: load a JSON bundle and rebuild what it touched.

use crate::cmd::open_project;
use crate::cmd::rebuild::{BatchView, write_batch_pretty, write_batch_text};
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use clap::Args;
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use ticketline_core::db::import::{ImportBundle, ImportSummary};

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Path to the JSON bundle (`actors`, `tickets`, `threads`, `notes`, `audit_logs`).
    pub file: PathBuf,

    /// Skip rebuilding metadata for the affected tickets.
    #[arg(long)]
    pub no_rebuild: bool,
}

#[derive(Debug, Serialize)]
struct ImportReport {
    imported: ImportSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    rebuild: Option<BatchView>,
}

fn write_text(report: &ImportReport, w: &mut dyn Write) -> io::Result<()> {
    let s = &report.imported;
    writeln!(
        w,
        "imported tickets={} threads={} notes={} audit_entries={} duplicates={}",
        s.tickets, s.threads, s.notes, s.audit_entries, s.audit_duplicates
    )?;
    if let Some(rebuild) = &report.rebuild {
        write_batch_text(rebuild, w)?;
    }
    Ok(())
}

fn write_pretty(report: &ImportReport, w: &mut dyn Write) -> io::Result<()> {
    let s = &report.imported;
    pretty_section(w, "Import")?;
    pretty_kv(w, "Actors", s.actors.to_string())?;
    pretty_kv(w, "Tickets", s.tickets.to_string())?;
    pretty_kv(w, "Threads", s.threads.to_string())?;
    pretty_kv(w, "Notes", s.notes.to_string())?;
    pretty_kv(w, "Audit entries", s.audit_entries.to_string())?;
    pretty_kv(w, "Duplicates", s.audit_duplicates.to_string())?;
    if let Some(rebuild) = &report.rebuild {
        writeln!(w)?;
        write_batch_pretty(rebuild, w)?;
    }
    Ok(())
}

/// Execute `tl import <FILE>`.
///
/// # Errors
///
/// Returns an error if the bundle cannot be read or written (nothing is
/// imported in that case), or if any affected ticket fails to rebuild.
pub fn run_import(args: &ImportArgs, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let project = open_project(project_root, output)?;
    let bundle = ImportBundle::read(&args.file)?;
    let imported = project.engine.backend().import(&bundle)?;

    let batch = if args.no_rebuild {
        None
    } else {
        let ids: Vec<&String> = imported.affected_tickets.iter().collect();
        Some(project.engine.rebuild(&ids))
    };

    let report = ImportReport {
        rebuild: batch.as_ref().map(BatchView::from),
        imported,
    };
    render_mode(output, &report, write_text, write_pretty)?;

    if let Some(batch) = batch {
        if !batch.is_complete_success() {
            anyhow::bail!("{} imported tickets failed to rebuild", batch.failures.len());
        }
    }
    Ok(())
}
