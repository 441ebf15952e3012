//! Bulk loading of system-of-record data from a JSON bundle.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::store::{SqliteStore, write_actor, write_audit, write_note, write_thread, write_ticket};
use crate::model::audit::{AuditLogEntry, TICKETS_TABLE};
use crate::model::thread::{Thread, ThreadNote};
use crate::model::ticket::Ticket;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub name: String,
}

/// Everything one import writes. Missing sections are empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportBundle {
    #[serde(default)]
    pub actors: Vec<Actor>,
    #[serde(default)]
    pub tickets: Vec<Ticket>,
    #[serde(default)]
    pub threads: Vec<Thread>,
    #[serde(default)]
    pub notes: Vec<ThreadNote>,
    #[serde(default)]
    pub audit_logs: Vec<AuditLogEntry>,
}

impl ImportBundle {
    /// # Errors
    ///
    /// Returns an error if `json` is not a valid bundle.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("parse import bundle")
    }

    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_json(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub actors: usize,
    pub tickets: usize,
    pub threads: usize,
    pub notes: usize,
    pub audit_entries: usize,
    /// Audit entries whose id was already recorded.
    pub audit_duplicates: usize,
    /// Tickets whose metadata may now be stale.
    pub affected_tickets: BTreeSet<String>,
}

impl SqliteStore {
    /// Write a bundle in one transaction: all of it lands, or none of it.
    ///
    /// # Errors
    ///
    /// Returns an error if any row fails to write (e.g. a thread for an
    /// unknown ticket).
    pub fn import(&self, bundle: &ImportBundle) -> Result<ImportSummary> {
        let summary = self.with_transaction(|tx| {
            let mut summary = ImportSummary::default();

            for actor in &bundle.actors {
                write_actor(tx, &actor.id, &actor.name)?;
                summary.actors += 1;
            }
            for ticket in &bundle.tickets {
                write_ticket(tx, ticket)?;
                summary.tickets += 1;
                summary.affected_tickets.insert(ticket.id.clone());
            }
            for thread in &bundle.threads {
                write_thread(tx, thread)?;
                summary.threads += 1;
            }
            for note in &bundle.notes {
                write_note(tx, note)?;
                summary.notes += 1;
            }
            for entry in &bundle.audit_logs {
                if write_audit(tx, entry)? {
                    summary.audit_entries += 1;
                    if entry.table_name == TICKETS_TABLE {
                        summary.affected_tickets.insert(entry.record_id.clone());
                    }
                } else {
                    summary.audit_duplicates += 1;
                }
            }

            Ok(summary)
        })?;

        info!(
            tickets = summary.tickets,
            threads = summary.threads,
            notes = summary.notes,
            audit_entries = summary.audit_entries,
            audit_duplicates = summary.audit_duplicates,
            "import finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{AuditTrailReader, TicketSource};

    const BUNDLE: &str = r#"{
        "actors": [{"id": "u-1", "name": "Uma User"}],
        "tickets": [{
            "id": "t-1",
            "title": "Export broken",
            "status": "open",
            "priority": "high",
            "created_at": "2024-03-01T09:00:00Z",
            "user_id": "u-1",
            "tags": ["billing"]
        }],
        "threads": [{
            "id": "th-1",
            "ticket_id": "t-1",
            "status": "active",
            "thread_type": "customer",
            "created_by": "u-1",
            "created_at": "2024-03-01T09:05:00Z"
        }],
        "notes": [{
            "id": "n-1",
            "thread_id": "th-1",
            "content": "Any news?",
            "created_by": "u-1",
            "message_type": "message",
            "created_at": "2024-03-01T09:06:00Z"
        }],
        "audit_logs": [{
            "id": "a-1",
            "table_name": "tickets",
            "record_id": "t-1",
            "created_at": "2024-03-01T10:00:00Z",
            "user_id": "agent-7",
            "old_data": {"status": "open"},
            "new_data": {"status": "in_progress"}
        }]
    }"#;

    #[test]
    fn import_writes_every_section() {
        let store = SqliteStore::in_memory().expect("store");
        let bundle = ImportBundle::from_json(BUNDLE).expect("bundle");

        let summary = store.import(&bundle).expect("import");
        assert_eq!(summary.tickets, 1);
        assert_eq!(summary.notes, 1);
        assert_eq!(summary.audit_entries, 1);
        assert_eq!(summary.affected_tickets.len(), 1);

        assert_eq!(store.read_threads("t-1").expect("threads").len(), 1);
        assert_eq!(store.read_audit_log(TICKETS_TABLE, "t-1").expect("log").len(), 1);
    }

    #[test]
    fn reimport_counts_duplicate_audit_entries() {
        let store = SqliteStore::in_memory().expect("store");
        let bundle = ImportBundle::from_json(BUNDLE).expect("bundle");
        store.import(&bundle).expect("first import");

        let again = store.import(&bundle).expect("second import");
        assert_eq!(again.audit_entries, 0);
        assert_eq!(again.audit_duplicates, 1);
        assert_eq!(store.read_audit_log(TICKETS_TABLE, "t-1").expect("log").len(), 1);
    }

    #[test]
    fn failed_import_writes_nothing() {
        let store = SqliteStore::in_memory().expect("store");
        let mut bundle = ImportBundle::from_json(BUNDLE).expect("bundle");
        bundle.threads[0].ticket_id = "missing".into();

        assert!(store.import(&bundle).is_err());
        assert!(store.list_ticket_ids().expect("list").is_empty());
    }
}
