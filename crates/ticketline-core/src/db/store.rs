//! [`SqliteStore`]: every collaborator trait over one SQLite connection.
//!
//! Metadata writes are a compare-and-swap on `ticket_metadata.version` inside
//! an immediate transaction, so concurrent writers from other processes see
//! a [`SourceError::Conflict`] rather than a lost update.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{
    Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params, params_from_iter,
};
use tracing::warn;

use crate::error::SourceError;
use crate::model::audit::{AuditLogEntry, TICKETS_TABLE, parse_timestamp};
use crate::model::metadata::{StoredMetadata, TicketMetadata};
use crate::model::thread::{MessageType, Thread, ThreadNote};
use crate::model::ticket::{Priority, Status, Ticket, normalize_tags};
use crate::source::{ActorDirectory, AuditTrailReader, EntityTable, MetadataStore, TicketSource};

/// Actor ids per `IN (...)` lookup.
const ACTOR_LOOKUP_CHUNK: usize = 500;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open the store at `path`, creating and migrating it as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self> {
        super::open_store(path).map(Self::new)
    }

    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn in_memory() -> Result<Self> {
        super::open_in_memory().map(Self::new)
    }

    #[must_use]
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Insert or replace a ticket and its tags.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn upsert_ticket(&self, ticket: &Ticket) -> Result<()> {
        self.with_transaction(|tx| write_ticket(tx, ticket))
    }

    /// Append an audit entry. Returns false if an entry with the same id is
    /// already recorded; the log is append-only.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn append_audit(&self, entry: &AuditLogEntry) -> Result<bool> {
        write_audit(&self.conn(), entry)
    }

    /// # Errors
    ///
    /// Returns an error if the write fails (e.g. unknown ticket).
    pub fn upsert_thread(&self, thread: &Thread) -> Result<()> {
        write_thread(&self.conn(), thread)
    }

    /// # Errors
    ///
    /// Returns an error if the write fails (e.g. unknown thread).
    pub fn upsert_note(&self, note: &ThreadNote) -> Result<()> {
        write_note(&self.conn(), note)
    }

    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn upsert_actor(&self, actor_id: &str, display_name: &str) -> Result<()> {
        write_actor(&self.conn(), actor_id, display_name)
    }

    /// Flag a ticket deleted. Returns false for an unknown id.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn soft_delete_ticket(&self, ticket_id: &str) -> Result<bool> {
        let changed = self
            .conn()
            .execute(
                "UPDATE tickets SET is_deleted = 1 WHERE ticket_id = ?1",
                [ticket_id],
            )
            .with_context(|| format!("soft-delete ticket {ticket_id}"))?;
        Ok(changed > 0)
    }

    /// Run `f` inside one transaction, committing only if it succeeds.
    pub(crate) fn with_transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("begin transaction")?;
        let value = f(&tx)?;
        tx.commit().context("commit transaction")?;
        Ok(value)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) fn write_ticket(conn: &Connection, ticket: &Ticket) -> Result<()> {
    conn.execute(
        "INSERT INTO tickets (
            ticket_id, title, description, status, priority,
            user_id, assigned_to, is_deleted, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(ticket_id) DO UPDATE SET
            title = excluded.title,
            description = excluded.description,
            status = excluded.status,
            priority = excluded.priority,
            user_id = excluded.user_id,
            assigned_to = excluded.assigned_to,
            is_deleted = excluded.is_deleted,
            created_at = excluded.created_at",
        params![
            ticket.id,
            ticket.title,
            ticket.description,
            ticket.status.as_str(),
            ticket.priority.as_str(),
            ticket.user_id,
            ticket.assigned_to,
            ticket.deleted,
            format_ts(ticket.created_at),
        ],
    )
    .with_context(|| format!("write ticket {}", ticket.id))?;

    conn.execute("DELETE FROM ticket_tags WHERE ticket_id = ?1", [&ticket.id])
        .with_context(|| format!("clear tags for {}", ticket.id))?;
    for tag in normalize_tags(ticket.tags.iter().map(String::as_str)) {
        conn.execute(
            "INSERT INTO ticket_tags (ticket_id, tag) VALUES (?1, ?2)",
            params![ticket.id, tag],
        )
        .with_context(|| format!("write tag {tag} for {}", ticket.id))?;
    }
    Ok(())
}

pub(crate) fn write_audit(conn: &Connection, entry: &AuditLogEntry) -> Result<bool> {
    let old_data = serde_json::to_string(&entry.old_data).context("serialize old_data")?;
    let new_data = serde_json::to_string(&entry.new_data).context("serialize new_data")?;
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO audit_logs (
                entry_id, table_name, record_id, user_id, old_data, new_data, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.id,
                entry.table_name,
                entry.record_id,
                entry.user_id,
                old_data,
                new_data,
                entry.created_at,
            ],
        )
        .with_context(|| format!("append audit entry {}", entry.id))?;
    Ok(inserted > 0)
}

pub(crate) fn write_thread(conn: &Connection, thread: &Thread) -> Result<()> {
    conn.execute(
        "INSERT INTO threads (thread_id, ticket_id, status, thread_type, created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(thread_id) DO UPDATE SET
            ticket_id = excluded.ticket_id,
            status = excluded.status,
            thread_type = excluded.thread_type,
            created_by = excluded.created_by,
            created_at = excluded.created_at",
        params![
            thread.id,
            thread.ticket_id,
            thread.status,
            thread.thread_type,
            thread.created_by,
            format_ts(thread.created_at),
        ],
    )
    .with_context(|| format!("write thread {}", thread.id))?;
    Ok(())
}

pub(crate) fn write_note(conn: &Connection, note: &ThreadNote) -> Result<()> {
    conn.execute(
        "INSERT INTO thread_notes (note_id, thread_id, content, created_by, message_type, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(note_id) DO UPDATE SET
            thread_id = excluded.thread_id,
            content = excluded.content,
            created_by = excluded.created_by,
            message_type = excluded.message_type,
            created_at = excluded.created_at",
        params![
            note.id,
            note.thread_id,
            note.content,
            note.created_by,
            note.message_type.as_str(),
            format_ts(note.created_at),
        ],
    )
    .with_context(|| format!("write note {}", note.id))?;
    Ok(())
}

pub(crate) fn write_actor(conn: &Connection, actor_id: &str, display_name: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO actors (actor_id, display_name) VALUES (?1, ?2)
         ON CONFLICT(actor_id) DO UPDATE SET display_name = excluded.display_name",
        params![actor_id, display_name],
    )
    .with_context(|| format!("write actor {actor_id}"))?;
    Ok(())
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str, what: &str) -> Result<DateTime<Utc>> {
    parse_timestamp(raw).ok_or_else(|| anyhow!("invalid {what} timestamp {raw:?}"))
}

struct TicketRow {
    id: String,
    title: String,
    description: Option<String>,
    status: String,
    priority: String,
    user_id: String,
    assigned_to: Option<String>,
    deleted: bool,
    created_at: String,
}

impl TicketRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            status: row.get(3)?,
            priority: row.get(4)?,
            user_id: row.get(5)?,
            assigned_to: row.get(6)?,
            deleted: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    fn into_ticket(self, tags: BTreeSet<String>) -> Result<Ticket> {
        Ok(Ticket {
            status: Status::from_str(&self.status)
                .with_context(|| format!("ticket {} status", self.id))?,
            priority: Priority::from_str(&self.priority)
                .with_context(|| format!("ticket {} priority", self.id))?,
            created_at: parse_ts(&self.created_at, "ticket")?,
            id: self.id,
            title: self.title,
            description: self.description,
            user_id: self.user_id,
            assigned_to: self.assigned_to,
            tags,
            deleted: self.deleted,
        })
    }
}

fn audit_from_row(row: &Row<'_>) -> rusqlite::Result<(AuditLogEntry, String, String)> {
    let entry = AuditLogEntry {
        id: row.get(0)?,
        table_name: row.get(1)?,
        record_id: row.get(2)?,
        user_id: row.get(3)?,
        created_at: row.get(6)?,
        old_data: serde_json::Value::Null,
        new_data: serde_json::Value::Null,
    };
    Ok((entry, row.get(4)?, row.get(5)?))
}

/// Decode a stored snapshot. Text that is not JSON becomes a string value,
/// which reconstruction rejects as a bad snapshot for this entry alone.
fn decode_snapshot(entry_id: &str, field: &str, text: &str) -> serde_json::Value {
    serde_json::from_str(text).unwrap_or_else(|error| {
        warn!(entry_id, field, %error, "audit snapshot is not valid JSON");
        serde_json::Value::String(format!("undecodable {field}: {error}"))
    })
}

impl AuditTrailReader for SqliteStore {
    fn read_audit_log(
        &self,
        table: &str,
        record_id: &str,
    ) -> Result<Vec<AuditLogEntry>, SourceError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT entry_id, table_name, record_id, user_id, old_data, new_data, created_at
                 FROM audit_logs
                 WHERE table_name = ?1 AND record_id = ?2
                 ORDER BY rowid",
            )
            .context("prepare audit log query")?;
        let rows = stmt
            .query_map(params![table, record_id], audit_from_row)
            .context("query audit log")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("read audit log rows")?;

        let mut entries = Vec::with_capacity(rows.len());
        for (mut entry, old_data, new_data) in rows {
            entry.old_data = decode_snapshot(&entry.id, "old_data", &old_data);
            entry.new_data = decode_snapshot(&entry.id, "new_data", &new_data);
            entries.push(entry);
        }
        // Timestamps may mix formats, so order on the parsed value.
        entries.sort_by_key(AuditLogEntry::parsed_timestamp);
        Ok(entries)
    }
}

impl TicketSource for SqliteStore {
    fn read_ticket(&self, ticket_id: &str) -> Result<Ticket, SourceError> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT ticket_id, title, description, status, priority,
                        user_id, assigned_to, is_deleted, created_at
                 FROM tickets WHERE ticket_id = ?1",
                [ticket_id],
                TicketRow::from_row,
            )
            .optional()
            .with_context(|| format!("read ticket {ticket_id}"))?;
        let Some(row) = row else {
            return Err(SourceError::NotFound {
                entity: "ticket",
                id: ticket_id.to_string(),
            });
        };

        let mut stmt = conn
            .prepare("SELECT tag FROM ticket_tags WHERE ticket_id = ?1 ORDER BY tag")
            .context("prepare tag query")?;
        let tags = stmt
            .query_map([ticket_id], |row| row.get::<_, String>(0))
            .context("query tags")?
            .collect::<rusqlite::Result<BTreeSet<_>>>()
            .context("read tag rows")?;

        Ok(row.into_ticket(tags)?)
    }

    fn read_threads(&self, ticket_id: &str) -> Result<Vec<Thread>, SourceError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT thread_id, ticket_id, status, thread_type, created_by, created_at
                 FROM threads WHERE ticket_id = ?1
                 ORDER BY created_at, rowid",
            )
            .context("prepare thread query")?;
        let rows = stmt
            .query_map([ticket_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .context("query threads")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("read thread rows")?;

        let mut threads = Vec::with_capacity(rows.len());
        for (id, ticket_id, status, thread_type, created_by, created_at) in rows {
            threads.push(Thread {
                created_at: parse_ts(&created_at, "thread")?,
                id,
                ticket_id,
                status,
                thread_type,
                created_by,
            });
        }
        Ok(threads)
    }

    fn read_notes(&self, thread_id: &str) -> Result<Vec<ThreadNote>, SourceError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT note_id, thread_id, content, created_by, message_type, created_at
                 FROM thread_notes WHERE thread_id = ?1
                 ORDER BY created_at, rowid",
            )
            .context("prepare note query")?;
        let rows = stmt
            .query_map([thread_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .context("query notes")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("read note rows")?;

        let mut notes = Vec::with_capacity(rows.len());
        for (id, thread_id, content, created_by, message_type, created_at) in rows {
            notes.push(ThreadNote {
                message_type: MessageType::from_str(&message_type)
                    .with_context(|| format!("note {id} message type"))?,
                created_at: parse_ts(&created_at, "note")?,
                id,
                thread_id,
                content,
                created_by,
            });
        }
        Ok(notes)
    }

    fn list_ticket_ids(&self) -> Result<Vec<String>, SourceError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT ticket_id FROM tickets WHERE is_deleted = 0 ORDER BY ticket_id")
            .context("prepare ticket list query")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("query ticket ids")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("read ticket id rows")?;
        Ok(ids)
    }

    fn ticket_for_entity(
        &self,
        table: EntityTable,
        record_id: &str,
    ) -> Result<Option<String>, SourceError> {
        let conn = self.conn();
        let ticket_id = match table {
            EntityTable::Tickets => conn
                .query_row(
                    "SELECT ticket_id FROM tickets WHERE ticket_id = ?1",
                    [record_id],
                    |row| row.get::<_, String>(0),
                )
                .optional(),
            EntityTable::AuditLogs => conn
                .query_row(
                    "SELECT record_id FROM audit_logs WHERE entry_id = ?1 AND table_name = ?2",
                    params![record_id, TICKETS_TABLE],
                    |row| row.get::<_, String>(0),
                )
                .optional(),
            EntityTable::Threads => conn
                .query_row(
                    "SELECT ticket_id FROM threads WHERE thread_id = ?1",
                    [record_id],
                    |row| row.get::<_, String>(0),
                )
                .optional(),
            EntityTable::ThreadNotes => conn
                .query_row(
                    "SELECT t.ticket_id
                     FROM thread_notes n
                     JOIN threads t ON t.thread_id = n.thread_id
                     WHERE n.note_id = ?1",
                    [record_id],
                    |row| row.get::<_, String>(0),
                )
                .optional(),
        }
        .with_context(|| format!("resolve {table} {record_id}"))?;
        Ok(ticket_id)
    }
}

impl ActorDirectory for SqliteStore {
    fn resolve_actor_names(
        &self,
        ids: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, String>, SourceError> {
        let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
        let conn = self.conn();
        let mut names = BTreeMap::new();

        for chunk in ids.chunks(ACTOR_LOOKUP_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT actor_id, display_name FROM actors WHERE actor_id IN ({placeholders})"
            );
            let mut stmt = conn.prepare(&sql).context("prepare actor lookup")?;
            let rows = stmt
                .query_map(params_from_iter(chunk.iter().copied()), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .context("query actors")?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("read actor rows")?;
            names.extend(rows);
        }

        Ok(names)
    }
}

impl MetadataStore for SqliteStore {
    fn load_metadata(&self, ticket_id: &str) -> Result<Option<StoredMetadata>, SourceError> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT version, digest, document FROM ticket_metadata WHERE ticket_id = ?1",
                [ticket_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .with_context(|| format!("read metadata for {ticket_id}"))?;

        let Some((version, digest, document)) = row else {
            return Ok(None);
        };
        let metadata: TicketMetadata = serde_json::from_str(&document)
            .with_context(|| format!("decode metadata document for {ticket_id}"))?;
        Ok(Some(StoredMetadata {
            ticket_id: ticket_id.to_string(),
            version: u64::try_from(version).context("stored metadata version out of range")?,
            digest,
            metadata,
        }))
    }

    fn store_metadata(
        &self,
        ticket_id: &str,
        expected_version: u64,
        digest: &str,
        metadata: &TicketMetadata,
    ) -> Result<StoredMetadata, SourceError> {
        let document = serde_json::to_string(metadata).context("serialize metadata")?;

        let mut conn = self.conn();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("begin metadata write")?;

        let found = tx
            .query_row(
                "SELECT version FROM ticket_metadata WHERE ticket_id = ?1",
                [ticket_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .context("read metadata version")?
            .map(u64::try_from)
            .transpose()
            .context("stored metadata version out of range")?
            .unwrap_or(0);

        if found != expected_version {
            return Err(SourceError::Conflict {
                id: ticket_id.to_string(),
                expected: expected_version,
                found,
            });
        }

        let version = found + 1;
        tx.execute(
            "INSERT INTO ticket_metadata (ticket_id, version, digest, document, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(ticket_id) DO UPDATE SET
                version = excluded.version,
                digest = excluded.digest,
                document = excluded.document,
                updated_at = excluded.updated_at",
            params![
                ticket_id,
                i64::try_from(version).context("metadata version out of range")?,
                digest,
                document,
                format_ts(Utc::now()),
            ],
        )
        .with_context(|| format!("write metadata for {ticket_id}"))?;
        tx.commit().context("commit metadata write")?;

        Ok(StoredMetadata {
            ticket_id: ticket_id.to_string(),
            version,
            digest: digest.to_string(),
            metadata: metadata.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::metadata::METADATA_SOURCE;
    use crate::reconstruct::reconstruct;
    use chrono::TimeZone;
    use serde_json::json;

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).single().expect("valid ts")
            + chrono::Duration::minutes(minutes)
    }

    fn ticket() -> Ticket {
        Ticket {
            id: "t-1".into(),
            title: "Invoice export fails".into(),
            description: Some("CSV is empty".into()),
            status: Status::Open,
            priority: Priority::High,
            created_at: t(0),
            user_id: "u-1".into(),
            assigned_to: None,
            tags: [" Billing ", "COMPLIANCE"].into_iter().map(String::from).collect(),
            deleted: false,
        }
    }

    fn store() -> SqliteStore {
        let store = SqliteStore::in_memory().expect("in-memory store");
        store.upsert_ticket(&ticket()).expect("seed ticket");
        store
    }

    #[test]
    fn ticket_round_trips_with_normalized_tags() {
        let store = store();
        let read = store.read_ticket("t-1").expect("read ticket");
        assert_eq!(read.title, "Invoice export fails");
        assert_eq!(read.created_at, t(0));
        assert_eq!(
            read.tags.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["billing", "compliance"]
        );
    }

    #[test]
    fn unknown_ticket_is_not_found() {
        let store = store();
        assert!(matches!(
            store.read_ticket("nope"),
            Err(SourceError::NotFound { entity: "ticket", .. })
        ));
    }

    #[test]
    fn audit_log_is_append_only_and_ordered_by_parsed_time() {
        let store = store();
        let entry = |id: &str, at: &str| AuditLogEntry {
            id: id.into(),
            table_name: TICKETS_TABLE.into(),
            record_id: "t-1".into(),
            created_at: at.into(),
            user_id: Some("a-1".into()),
            old_data: json!({"status": "open"}),
            new_data: json!({"status": "in_progress"}),
        };
        assert!(store.append_audit(&entry("late", "2024-03-01T10:00:00Z")).expect("append"));
        assert!(store.append_audit(&entry("early", "2024-03-01 09:30:00")).expect("append"));
        assert!(!store.append_audit(&entry("late", "2024-03-01T11:00:00Z")).expect("append"));

        let log = store.read_audit_log(TICKETS_TABLE, "t-1").expect("read log");
        let ids: Vec<_> = log.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
        assert_eq!(log[1].created_at, "2024-03-01T10:00:00Z");
        assert_eq!(log[0].new_data, json!({"status": "in_progress"}));
    }

    #[test]
    fn store_metadata_is_compare_and_swap() {
        let store = store();
        let ticket = store.read_ticket("t-1").expect("read ticket");
        let metadata = reconstruct(&ticket, &[]).metadata;
        assert_eq!(metadata.source, METADATA_SOURCE);

        let first = store
            .store_metadata("t-1", 0, "blake3:aa", &metadata)
            .expect("first write");
        assert_eq!(first.version, 1);

        let stale = store.store_metadata("t-1", 0, "blake3:bb", &metadata);
        assert!(matches!(
            stale,
            Err(SourceError::Conflict { expected: 0, found: 1, .. })
        ));

        let second = store
            .store_metadata("t-1", 1, "blake3:bb", &metadata)
            .expect("second write");
        assert_eq!(second.version, 2);

        let loaded = store.load_metadata("t-1").expect("load").expect("present");
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.digest, "blake3:bb");
        assert_eq!(loaded.metadata, metadata);
    }

    #[test]
    fn entities_resolve_to_their_ticket() {
        let store = store();
        store
            .upsert_thread(&Thread {
                id: "th-1".into(),
                ticket_id: "t-1".into(),
                status: "active".into(),
                thread_type: "customer".into(),
                created_by: "u-1".into(),
                created_at: t(1),
            })
            .expect("thread");
        store
            .upsert_note(&ThreadNote {
                id: "n-1".into(),
                thread_id: "th-1".into(),
                content: "Still broken".into(),
                created_by: "u-1".into(),
                message_type: MessageType::Message,
                created_at: t(2),
            })
            .expect("note");

        let resolve = |table, id| store.ticket_for_entity(table, id).expect("resolve");
        assert_eq!(resolve(EntityTable::Tickets, "t-1").as_deref(), Some("t-1"));
        assert_eq!(resolve(EntityTable::Threads, "th-1").as_deref(), Some("t-1"));
        assert_eq!(resolve(EntityTable::ThreadNotes, "n-1").as_deref(), Some("t-1"));
        assert_eq!(resolve(EntityTable::ThreadNotes, "n-404"), None);

        let notes = store.read_notes("th-1").expect("notes");
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].created_at, t(2));
    }

    #[test]
    fn soft_deleted_tickets_leave_the_listing() {
        let store = store();
        let mut other = ticket();
        other.id = "t-2".into();
        store.upsert_ticket(&other).expect("second ticket");

        assert!(store.soft_delete_ticket("t-1").expect("delete"));
        assert!(!store.soft_delete_ticket("t-404").expect("delete"));
        assert_eq!(store.list_ticket_ids().expect("list"), vec!["t-2"]);
        assert!(store.read_ticket("t-1").expect("still readable").deleted);
    }

    #[test]
    fn actor_lookup_skips_unknown_ids() {
        let store = store();
        store.upsert_actor("u-1", "Uma User").expect("actor");
        let ids: BTreeSet<String> = ["u-1", "ghost"].into_iter().map(String::from).collect();
        let names = store.resolve_actor_names(&ids).expect("lookup");
        assert_eq!(names.len(), 1);
        assert_eq!(names["u-1"], "Uma User");
        assert!(store.resolve_actor_names(&BTreeSet::new()).expect("empty").is_empty());
    }
}
