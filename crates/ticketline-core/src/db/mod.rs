//! SQLite-backed system of record and metadata store.
//!
//! Connections run with WAL journaling, a busy timeout, and foreign keys on.

pub mod import;
pub mod migrations;
pub mod schema;
pub mod store;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::{path::Path, time::Duration};

pub use store::SqliteStore;

/// Busy timeout used for store connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (or create) the database at `path`, apply pragmas, and migrate to
/// the latest schema.
///
/// # Errors
///
/// Returns an error if opening, configuring, or migrating fails.
pub fn open_store(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create store directory {}", parent.display()))?;
    }

    let mut conn = Connection::open(path)
        .with_context(|| format!("open ticketline database {}", path.display()))?;

    configure_connection(&conn).context("configure sqlite pragmas")?;
    migrations::migrate(&mut conn).context("apply store migrations")?;

    Ok(conn)
}

/// In-memory database with the full schema.
///
/// # Errors
///
/// Returns an error if configuring or migrating fails.
pub fn open_in_memory() -> Result<Connection> {
    let mut conn = Connection::open_in_memory().context("open in-memory database")?;
    enforce_foreign_keys(&conn).context("enable foreign keys")?;
    migrations::migrate(&mut conn).context("apply store migrations")?;
    Ok(conn)
}

fn enforce_foreign_keys(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    enforce_foreign_keys(conn)?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    // journal_mode answers with the mode actually in effect.
    let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    tracing::debug!(journal_mode = %mode, "store connection configured");
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)
}

#[cfg(test)]
mod tests {
    use super::{DEFAULT_BUSY_TIMEOUT, open_store};
    use crate::db::migrations;

    fn pragma_i64(conn: &rusqlite::Connection, name: &str) -> i64 {
        conn.pragma_query_value(None, name, |row| row.get(0))
            .unwrap_or_else(|e| panic!("read pragma {name}: {e}"))
    }

    #[test]
    fn store_file_is_created_with_pragmas_and_schema() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("deep/er/ticketline.db");
        let conn = open_store(&path).expect("open store");
        assert!(path.exists());

        let mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("journal_mode");
        assert!(mode.eq_ignore_ascii_case("wal"));
        assert_eq!(
            u128::try_from(pragma_i64(&conn, "busy_timeout")).expect("non-negative"),
            DEFAULT_BUSY_TIMEOUT.as_millis()
        );
        assert_eq!(pragma_i64(&conn, "foreign_keys"), 1);
        assert_eq!(
            migrations::current_schema_version(&conn).expect("version"),
            migrations::LATEST_SCHEMA_VERSION
        );
    }

    #[test]
    fn in_memory_store_enforces_foreign_keys() {
        let conn = super::open_in_memory().expect("open");
        let orphan = conn.execute(
            "INSERT INTO threads (thread_id, ticket_id, status, thread_type, created_by, created_at)
             VALUES ('th-1', 'nope', 'active', 'customer', 'u-1', '2024-03-01T09:00:00Z')",
            [],
        );
        assert!(orphan.is_err());
    }
}
