//! `tl init`: create the project skeleton.

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use anyhow::{Context as _, Result};
use clap::Args;
use serde::Serialize;
use std::path::Path;
use ticketline_core::config::{PROJECT_DIR, load_project_config};
use ticketline_core::db::store::SqliteStore;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Rewrite the config even if `.ticketline/` already exists. The database
    /// is kept.
    #[arg(long)]
    pub force: bool,
}

const CONFIG_TOML: &str = "[engine]\n\
    max_write_retries = 3\n\
    lease_timeout_ms = 5000\n\
    \n\
    [feed]\n\
    debounce_ms = 250\n\
    max_delay_ms = 2000\n\
    \n\
    [store]\n\
    path = \".ticketline/ticketline.db\"\n";

const GITIGNORE: &str = "ticketline.db\nticketline.db-wal\nticketline.db-shm\n";

#[derive(Debug, Serialize)]
struct InitReport {
    project_dir: String,
    database: String,
    reinitialized: bool,
}

/// Execute `tl init`:
///
/// ```text
/// .ticketline/
///   config.toml     (default project config)
///   .gitignore      (database files)
///   ticketline.db   (migrated, empty)
/// ```
///
/// # Errors
///
/// Returns an error if `.ticketline/` already exists and `--force` is not
/// set, or if any filesystem or database operation fails.
pub fn run_init(args: &InitArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let project_dir = project_root.join(PROJECT_DIR);
    let existed = project_dir.exists();

    if existed && !args.force {
        anyhow::bail!("{PROJECT_DIR}/ already exists. Use `tl init --force` to reinitialize.");
    }

    std::fs::create_dir_all(&project_dir)
        .with_context(|| format!("Failed to create {}", project_dir.display()))?;

    let config_path = project_dir.join("config.toml");
    std::fs::write(&config_path, CONFIG_TOML)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    let gitignore_path = project_dir.join(".gitignore");
    std::fs::write(&gitignore_path, GITIGNORE)
        .with_context(|| format!("Failed to write {}", gitignore_path.display()))?;

    let config = load_project_config(project_root)?;
    let db_path = config.store.resolve_path(project_root);
    SqliteStore::open(&db_path)
        .with_context(|| format!("Failed to create database {}", db_path.display()))?;

    tracing::info!(path = %project_dir.display(), "project initialized");

    let report = InitReport {
        project_dir: project_dir.display().to_string(),
        database: db_path.display().to_string(),
        reinitialized: existed,
    };
    render_mode(
        output,
        &report,
        |r, w| writeln!(w, "initialized {}", r.project_dir),
        |r, w| {
            pretty_section(w, "Initialized ticketline project")?;
            pretty_kv(w, "Directory", &r.project_dir)?;
            pretty_kv(w, "Database", &r.database)
        },
    )
}
