#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{Parser, Subcommand};
use output::{CliError, OutputMode, render_error};
use std::env;
use ticketline_core::ErrorCode;
use ticketline_core::config::resolve_config;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "ticketline: rebuild ticket lifecycles from the audit log",
    long_about = None
)]
struct Cli {
    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Output format. Overrides `--json`, `FORMAT`, and the user config.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Initialize a ticketline project",
        long_about = "Create .ticketline/ with a default config and an empty database.",
        after_help = "EXAMPLES:\n    # Initialize in the current directory\n    tl init\n\n    # Start over with a fresh config\n    tl init --force"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        about = "Load tickets, threads, notes, and audit entries from a JSON bundle",
        long_about = "Import a JSON bundle in one transaction, then rebuild metadata for every ticket it touched.",
        after_help = "EXAMPLES:\n    # Import and rebuild affected tickets\n    tl import export.json\n\n    # Import only\n    tl import export.json --no-rebuild"
    )]
    Import(cmd::import::ImportArgs),

    #[command(
        about = "Recompute ticket metadata from the audit log",
        long_about = "Recompute metadata for the given tickets, or for every live ticket when none are named. Failures are reported per ticket.",
        after_help = "EXAMPLES:\n    # Rebuild everything\n    tl rebuild\n\n    # Rebuild two tickets and emit JSON\n    tl rebuild t-1 t-2 --json"
    )]
    Rebuild(cmd::rebuild::RebuildArgs),

    #[command(
        about = "Show a ticket's reconstructed metadata",
        after_help = "EXAMPLES:\n    tl show t-1\n    tl show t-1 --refresh --json"
    )]
    Show(cmd::show::ShowArgs),

    #[command(
        about = "Show a ticket's merged timeline",
        long_about = "Merge lifecycle events with conversation threads. Only the owner, the assignee, or an admin may view it.",
        after_help = "EXAMPLES:\n    tl timeline t-1 --viewer a-7 --role agent\n    tl timeline t-1 --viewer root --role admin --json"
    )]
    Timeline(cmd::timeline::TimelineArgs),

    #[command(
        about = "Recompute tickets from a stream of change notifications",
        long_about = "Read `<table> <record_id>` lines from stdin and feed them to the debounced change feed. Bursts for one ticket coalesce into one recompute.",
        after_help = "EXAMPLES:\n    printf 'audit_logs a-17\\nthreads th-3\\n' | tl watch"
    )]
    Watch(cmd::watch::WatchArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("TICKETLINE_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "ticketline=debug,info"
        } else {
            "ticketline=info,warn"
        })
    });

    let format = env::var("TICKETLINE_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    // Logs go to stderr so stdout stays parseable.
    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let project_root = env::current_dir()?;

    let output = match cli.format {
        Some(mode) => mode,
        None => match resolve_config(&project_root, cli.json) {
            Ok(config) => OutputMode::from_config_name(&config.resolved_output),
            Err(err) => {
                let fallback = if cli.json {
                    OutputMode::Json
                } else {
                    OutputMode::Text
                };
                let code = ErrorCode::ConfigParseError;
                render_error(
                    fallback,
                    &CliError::with_details(
                        format!("{err:#}"),
                        code.hint().unwrap_or_default(),
                        code.code(),
                    ),
                )?;
                return Err(err);
            }
        },
    };

    match cli.command {
        Commands::Init(args) => cmd::init::run_init(&args, output, &project_root),
        Commands::Import(args) => cmd::import::run_import(&args, output, &project_root),
        Commands::Rebuild(args) => cmd::rebuild::run_rebuild(&args, output, &project_root),
        Commands::Show(args) => cmd::show::run_show(&args, output, &project_root),
        Commands::Timeline(args) => cmd::timeline::run_timeline(&args, output, &project_root),
        Commands::Watch(args) => cmd::watch::run_watch(&args, output, &project_root),
    }
}
