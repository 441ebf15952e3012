//! `tl timeline`: merged lifecycle and conversation history for one ticket.

use crate::cmd::{format_time, open_project};
use crate::output::{OutputMode, fail, pretty_rule, pretty_section, render_mode};
use clap::Args;
use std::io::{self, Write};
use std::path::Path;
use ticketline_core::model::ticket::Role;
use ticketline_core::{Timeline, Viewer};

#[derive(Args, Debug)]
pub struct TimelineArgs {
    /// Ticket id.
    pub id: String,

    /// Id of the person viewing the timeline.
    #[arg(long)]
    pub viewer: String,

    /// Viewer role: customer, agent, or admin.
    #[arg(long, default_value = "agent")]
    pub role: Role,
}

fn write_text(timeline: &Timeline, w: &mut dyn Write) -> io::Result<()> {
    for event in timeline {
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{}",
            format_time(&event.event_time),
            event.event_type,
            event.actor_id,
            event.thread_context,
            event.event_description
        )?;
    }
    Ok(())
}

fn write_pretty(timeline: &Timeline, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, &format!("Timeline ({} events)", timeline.len()))?;
    for event in timeline {
        writeln!(
            w,
            "{}  {:<17}  {:<16}  {}",
            format_time(&event.event_time),
            event.event_type.as_str(),
            event.actor_name,
            event.event_description
        )?;
    }
    pretty_rule(w)
}

/// Execute `tl timeline <ID> --viewer <VIEWER>`.
///
/// # Errors
///
/// Returns an error if the viewer may not see the ticket, the ticket is
/// unknown, or a read fails.
pub fn run_timeline(args: &TimelineArgs, output: OutputMode, project_root: &Path) -> anyhow::Result<()> {
    let project = open_project(project_root, output)?;
    let viewer = Viewer::new(args.viewer.clone(), args.role);

    let timeline = project
        .engine
        .build_timeline(&args.id, &viewer)
        .map_err(|err| fail(output, &err))?;

    render_mode(output, &timeline, write_text, write_pretty)
}
