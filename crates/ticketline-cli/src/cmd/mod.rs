pub mod import;
pub mod init;
pub mod rebuild;
pub mod show;
pub mod timeline;
pub mod watch;

use crate::output::{CliError, OutputMode, render_error};
use chrono::{DateTime, Utc};
use std::path::Path;
use ticketline_core::config::{ProjectConfig, load_project_config};
use ticketline_core::db::store::SqliteStore;
use ticketline_core::{Engine, EngineConfig};

/// Everything a command needs to talk to the project database.
pub struct Project {
    pub config: ProjectConfig,
    pub engine: Engine<SqliteStore>,
}

/// Open the project rooted at `project_root`.
///
/// # Errors
///
/// Renders a `project_missing` error and fails when the database does not
/// exist yet, or fails when the config or database cannot be opened.
pub fn open_project(project_root: &Path, output: OutputMode) -> anyhow::Result<Project> {
    let config = load_project_config(project_root)?;
    let db_path = config.store.resolve_path(project_root);

    if !db_path.exists() {
        render_error(
            output,
            &CliError::with_details(
                format!("database not found at {}", db_path.display()),
                "run `tl init` to create the project",
                "project_missing",
            ),
        )?;
        anyhow::bail!("database not found at {}", db_path.display());
    }

    let store = SqliteStore::open(&db_path)?;
    let engine = Engine::new(store, EngineConfig::from(&config.engine));
    Ok(Project { config, engine })
}

pub fn format_time(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}
