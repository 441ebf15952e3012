//! SQLite schema for the ticketline store.
//!
//! - `tickets`, `ticket_tags`, `audit_logs`, `threads`, `thread_notes` and
//!   `actors` mirror the system of record the engine reads from
//! - `ticket_metadata` holds the one derived, versioned document per ticket
//! - `store_meta` tracks the schema version alongside `PRAGMA user_version`
//!
//! Timestamps are stored as RFC 3339 text. Audit timestamps are kept verbatim
//! because a malformed value must only disqualify its own entry.

/// Migration v1: system-of-record tables.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS tickets (
    ticket_id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT,
    status TEXT NOT NULL CHECK (status IN ('open', 'in_progress', 'resolved', 'closed')),
    priority TEXT NOT NULL DEFAULT 'medium' CHECK (priority IN ('low', 'medium', 'high', 'urgent')),
    user_id TEXT NOT NULL CHECK (length(trim(user_id)) > 0),
    assigned_to TEXT,
    is_deleted INTEGER NOT NULL DEFAULT 0 CHECK (is_deleted IN (0, 1)),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ticket_tags (
    ticket_id TEXT NOT NULL REFERENCES tickets(ticket_id) ON DELETE CASCADE,
    tag TEXT NOT NULL CHECK (length(trim(tag)) > 0),
    PRIMARY KEY (ticket_id, tag)
);

CREATE TABLE IF NOT EXISTS audit_logs (
    entry_id TEXT PRIMARY KEY,
    table_name TEXT NOT NULL,
    record_id TEXT NOT NULL,
    user_id TEXT,
    old_data TEXT NOT NULL DEFAULT 'null',
    new_data TEXT NOT NULL DEFAULT 'null',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS threads (
    thread_id TEXT PRIMARY KEY,
    ticket_id TEXT NOT NULL REFERENCES tickets(ticket_id) ON DELETE CASCADE,
    status TEXT NOT NULL DEFAULT 'active',
    thread_type TEXT NOT NULL,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS thread_notes (
    note_id TEXT PRIMARY KEY,
    thread_id TEXT NOT NULL REFERENCES threads(thread_id) ON DELETE CASCADE,
    content TEXT NOT NULL,
    created_by TEXT NOT NULL,
    message_type TEXT NOT NULL CHECK (message_type IN ('message', 'note')),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS actors (
    actor_id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL
);

INSERT OR IGNORE INTO store_meta (id, schema_version) VALUES (1, 0);

CREATE INDEX IF NOT EXISTS idx_tickets_deleted
    ON tickets(is_deleted, ticket_id);

CREATE INDEX IF NOT EXISTS idx_audit_logs_record
    ON audit_logs(table_name, record_id, created_at);

CREATE INDEX IF NOT EXISTS idx_threads_ticket_created
    ON threads(ticket_id, created_at);

CREATE INDEX IF NOT EXISTS idx_thread_notes_thread_created
    ON thread_notes(thread_id, created_at);
";

/// Migration v2: derived metadata documents.
pub const MIGRATION_V2_SQL: &str = r"
CREATE TABLE IF NOT EXISTS ticket_metadata (
    ticket_id TEXT PRIMARY KEY REFERENCES tickets(ticket_id) ON DELETE CASCADE,
    version INTEGER NOT NULL CHECK (version > 0),
    digest TEXT NOT NULL,
    document TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ticket_metadata_updated
    ON ticket_metadata(updated_at);
";

pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_tickets_deleted",
    "idx_audit_logs_record",
    "idx_threads_ticket_created",
    "idx_thread_notes_thread_created",
    "idx_ticket_metadata_updated",
];
