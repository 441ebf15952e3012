//! `tl show`: display a ticket's reconstructed metadata.

use crate::cmd::{format_time, open_project};
use crate::output::{OutputMode, fail, pretty_kv, pretty_rule, pretty_section, render_mode};
use clap::Args;
use std::io::{self, Write};
use std::path::Path;
use ticketline_core::model::metadata::StoredMetadata;
use ticketline_core::source::MetadataStore;

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Ticket id.
    pub id: String,

    /// Recompute from the audit log before showing.
    #[arg(long)]
    pub refresh: bool,
}

fn write_text(stored: &StoredMetadata, w: &mut dyn Write) -> io::Result<()> {
    let m = &stored.metadata;
    writeln!(
        w,
        "{}\t{}\t{}\t{}\tv{}",
        stored.ticket_id,
        m.current_state.name,
        format_time(&m.current_state.entered_at),
        m.sla_level,
        stored.version
    )?;
    for t in &m.state_transitions {
        writeln!(
            w,
            "transition\t{}\t{}\t{}\t{}",
            format_time(&t.timestamp),
            t.from_state,
            t.to_state,
            t.user_id
        )?;
    }
    for a in &m.assignment_history {
        writeln!(
            w,
            "assignment\t{}\t{}\t{}\t{}",
            format_time(&a.timestamp),
            a.from.as_deref().unwrap_or("-"),
            a.to.as_deref().unwrap_or("-"),
            a.user_id
        )?;
    }
    Ok(())
}

fn write_pretty(stored: &StoredMetadata, w: &mut dyn Write) -> io::Result<()> {
    let m = &stored.metadata;
    pretty_section(w, &format!("Ticket {}", stored.ticket_id))?;
    pretty_kv(w, "Status", m.current_state.name.as_str())?;
    pretty_kv(w, "Since", format_time(&m.current_state.entered_at))?;
    pretty_kv(w, "Updated by", &m.last_updated_by)?;
    pretty_kv(w, "SLA", m.sla_level.as_str())?;
    if let Some(level) = m.security_level {
        pretty_kv(w, "Security", level.as_str())?;
    }
    if let Some(class) = m.security_classification {
        pretty_kv(w, "Classification", class.as_str())?;
    }
    pretty_kv(w, "Version", stored.version.to_string())?;

    writeln!(w)?;
    pretty_section(w, "Transitions")?;
    for t in &m.state_transitions {
        writeln!(
            w,
            "  {}  {:<11} -> {:<11}  {}",
            format_time(&t.timestamp),
            t.from_state.as_str(),
            t.to_state.as_str(),
            t.user_id
        )?;
    }

    if !m.assignment_history.is_empty() {
        writeln!(w)?;
        pretty_section(w, "Assignments")?;
        for a in &m.assignment_history {
            writeln!(
                w,
                "  {}  {} -> {}  {}",
                format_time(&a.timestamp),
                a.from.as_deref().unwrap_or("unassigned"),
                a.to.as_deref().unwrap_or("unassigned"),
                a.user_id
            )?;
        }
    }
    pretty_rule(w)
}

/// Execute `tl show <ID>`. Reconstructs first when nothing is stored yet.
///
/// # Errors
///
/// Returns an error if the ticket is unknown or cannot be reconstructed.
pub fn run_show(args: &ShowArgs, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let project = open_project(project_root, output)?;
    let engine = &project.engine;

    let cached = if args.refresh {
        None
    } else {
        engine.backend().load_metadata(&args.id)?
    };

    let stored = match cached {
        Some(stored) => stored,
        None => {
            engine
                .reconstruct_metadata(&args.id)
                .map_err(|err| fail(output, &err))?
                .stored
        }
    };

    render_mode(output, &stored, write_text, write_pretty)
}
