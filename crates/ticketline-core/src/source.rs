//! Collaborator contracts at the storage/transport boundary.
//!
//! The engine never owns storage. Everything it reads or writes goes through
//! these traits, which are the only places a call may block. Implementations
//! live in [`crate::memory`] (in-process) and [`crate::db::store`] (SQLite).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::SourceError;
use crate::model::audit::AuditLogEntry;
use crate::model::metadata::{StoredMetadata, TicketMetadata};
use crate::model::thread::{Thread, ThreadNote};
use crate::model::ticket::{ParseEnumError, Ticket};

/// Entity tables whose changes are reported through the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityTable {
    Tickets,
    AuditLogs,
    Threads,
    ThreadNotes,
}

impl EntityTable {
    pub const ALL: [Self; 4] = [Self::Tickets, Self::AuditLogs, Self::Threads, Self::ThreadNotes];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tickets => "tickets",
            Self::AuditLogs => "audit_logs",
            Self::Threads => "threads",
            Self::ThreadNotes => "thread_notes",
        }
    }

    /// Whether a change in this table can alter persisted ticket metadata.
    #[must_use]
    pub const fn affects_metadata(self) -> bool {
        matches!(self, Self::Tickets | Self::AuditLogs)
    }
}

impl fmt::Display for EntityTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityTable {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tickets" => Ok(Self::Tickets),
            "audit_logs" => Ok(Self::AuditLogs),
            "threads" => Ok(Self::Threads),
            "thread_notes" => Ok(Self::ThreadNotes),
            _ => Err(ParseEnumError {
                expected: "entity table",
                got: s.to_string(),
            }),
        }
    }
}

/// Reads the ordered change history of one entity.
pub trait AuditTrailReader {
    /// All audit entries for `(table, record_id)`, ascending by `created_at`.
    /// An entity with no history yields an empty list, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the read fails.
    fn read_audit_log(&self, table: &str, record_id: &str)
    -> Result<Vec<AuditLogEntry>, SourceError>;
}

/// Reads tickets and their conversations from the system of record.
pub trait TicketSource {
    /// # Errors
    ///
    /// Returns [`SourceError::NotFound`] for an unknown id.
    fn read_ticket(&self, ticket_id: &str) -> Result<Ticket, SourceError>;

    /// # Errors
    ///
    /// Returns [`SourceError`] if the read fails.
    fn read_threads(&self, ticket_id: &str) -> Result<Vec<Thread>, SourceError>;

    /// # Errors
    ///
    /// Returns [`SourceError`] if the read fails.
    fn read_notes(&self, thread_id: &str) -> Result<Vec<ThreadNote>, SourceError>;

    /// Ids of all tickets that are not soft-deleted, in stable order.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the read fails.
    fn list_ticket_ids(&self) -> Result<Vec<String>, SourceError>;

    /// Map a changed record to the ticket it belongs to. `None` means the
    /// record is unknown (e.g. deleted before the notification arrived).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the lookup fails.
    fn ticket_for_entity(
        &self,
        table: EntityTable,
        record_id: &str,
    ) -> Result<Option<String>, SourceError>;
}

/// Resolves actor ids to display names.
pub trait ActorDirectory {
    /// Names for the given ids. Ids with no known name are simply missing
    /// from the result.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the lookup fails.
    fn resolve_actor_names(
        &self,
        ids: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, String>, SourceError>;
}

/// Holds the one derived metadata document per ticket.
pub trait MetadataStore {
    /// # Errors
    ///
    /// Returns [`SourceError`] if the read fails.
    fn load_metadata(&self, ticket_id: &str) -> Result<Option<StoredMetadata>, SourceError>;

    /// Write `metadata` only if the stored version still equals
    /// `expected_version` (`0` meaning "no document yet"). Returns the new
    /// stored document.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Conflict`] if the version moved, or another
    /// [`SourceError`] if the write fails.
    fn store_metadata(
        &self,
        ticket_id: &str,
        expected_version: u64,
        digest: &str,
        metadata: &TicketMetadata,
    ) -> Result<StoredMetadata, SourceError>;
}

/// Everything the engine needs from its environment.
pub trait Backend:
    AuditTrailReader + TicketSource + ActorDirectory + MetadataStore + Send + Sync
{
}

impl<T> Backend for T where
    T: AuditTrailReader + TicketSource + ActorDirectory + MetadataStore + Send + Sync
{
}

#[cfg(test)]
mod tests {
    use super::EntityTable;

    #[test]
    fn entity_table_roundtrip() {
        for table in EntityTable::ALL {
            assert_eq!(table.as_str().parse::<EntityTable>(), Ok(table));
        }
        assert!("users".parse::<EntityTable>().is_err());
    }

    #[test]
    fn only_ticket_and_audit_changes_touch_metadata() {
        assert!(EntityTable::Tickets.affects_metadata());
        assert!(EntityTable::AuditLogs.affects_metadata());
        assert!(!EntityTable::Threads.affects_metadata());
        assert!(!EntityTable::ThreadNotes.affects_metadata());
    }
}
