//! In-process implementation of every collaborator trait.
//!
//! Useful for embedding the engine without a database and for tests. It can
//! inject read failures, write failures, and version conflicts per ticket,
//! and it counts boundary calls so callers can check batching behaviour.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::SourceError;
use crate::model::audit::{AuditLogEntry, TICKETS_TABLE};
use crate::model::metadata::{StoredMetadata, TicketMetadata};
use crate::model::thread::{Thread, ThreadNote};
use crate::model::ticket::Ticket;
use crate::source::{ActorDirectory, AuditTrailReader, EntityTable, MetadataStore, TicketSource};

#[derive(Debug, Default)]
struct State {
    tickets: BTreeMap<String, Ticket>,
    audit: Vec<AuditLogEntry>,
    threads: Vec<Thread>,
    notes: Vec<ThreadNote>,
    actors: BTreeMap<String, String>,
    metadata: BTreeMap<String, StoredMetadata>,
    failing_reads: HashSet<String>,
    failing_writes: HashSet<String>,
    forced_conflicts: HashMap<String, u32>,
    counters: CallCounters,
}

/// Boundary calls observed by a [`MemoryBackend`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounters {
    pub audit_reads: usize,
    pub thread_reads: usize,
    pub note_reads: usize,
    pub actor_lookups: usize,
    pub metadata_writes: usize,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_ticket(&self, mut ticket: Ticket) {
        ticket.normalize_tags();
        self.state().tickets.insert(ticket.id.clone(), ticket);
    }

    /// Apply `f` to a stored ticket. Returns false for an unknown id.
    pub fn update_ticket(&self, ticket_id: &str, f: impl FnOnce(&mut Ticket)) -> bool {
        self.state().tickets.get_mut(ticket_id).map(f).is_some()
    }

    pub fn append_audit(&self, entry: AuditLogEntry) {
        self.state().audit.push(entry);
    }

    pub fn insert_thread(&self, thread: Thread) {
        self.state().threads.push(thread);
    }

    pub fn insert_note(&self, note: ThreadNote) {
        self.state().notes.push(note);
    }

    pub fn insert_actor(&self, id: impl Into<String>, name: impl Into<String>) {
        self.state().actors.insert(id.into(), name.into());
    }

    /// Make every read touching `ticket_id` fail until cleared.
    pub fn fail_reads_for(&self, ticket_id: &str, failing: bool) {
        let mut state = self.state();
        if failing {
            state.failing_reads.insert(ticket_id.to_string());
        } else {
            state.failing_reads.remove(ticket_id);
        }
    }

    /// Make metadata writes for `ticket_id` fail until cleared.
    pub fn fail_writes_for(&self, ticket_id: &str, failing: bool) {
        let mut state = self.state();
        if failing {
            state.failing_writes.insert(ticket_id.to_string());
        } else {
            state.failing_writes.remove(ticket_id);
        }
    }

    /// Report a version conflict on the next `count` writes for `ticket_id`.
    pub fn force_conflicts(&self, ticket_id: &str, count: u32) {
        self.state()
            .forced_conflicts
            .insert(ticket_id.to_string(), count);
    }

    #[must_use]
    pub fn counters(&self) -> CallCounters {
        self.state().counters
    }

    #[must_use]
    pub fn stored(&self, ticket_id: &str) -> Option<StoredMetadata> {
        self.state().metadata.get(ticket_id).cloned()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl State {
    fn check_read(&self, ticket_id: &str) -> Result<(), SourceError> {
        if self.failing_reads.contains(ticket_id) {
            return Err(SourceError::Backend(anyhow::anyhow!(
                "injected read failure for {ticket_id}"
            )));
        }
        Ok(())
    }

    fn thread_ticket(&self, thread_id: &str) -> Option<&str> {
        self.threads
            .iter()
            .find(|t| t.id == thread_id)
            .map(|t| t.ticket_id.as_str())
    }
}

impl AuditTrailReader for MemoryBackend {
    fn read_audit_log(
        &self,
        table: &str,
        record_id: &str,
    ) -> Result<Vec<AuditLogEntry>, SourceError> {
        let mut state = self.state();
        state.counters.audit_reads += 1;
        if table == TICKETS_TABLE {
            state.check_read(record_id)?;
        }
        let mut entries: Vec<_> = state
            .audit
            .iter()
            .filter(|e| e.table_name == table && e.record_id == record_id)
            .cloned()
            .collect();
        entries.sort_by_key(AuditLogEntry::parsed_timestamp);
        Ok(entries)
    }
}

impl TicketSource for MemoryBackend {
    fn read_ticket(&self, ticket_id: &str) -> Result<Ticket, SourceError> {
        let state = self.state();
        state.check_read(ticket_id)?;
        state
            .tickets
            .get(ticket_id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound {
                entity: "ticket",
                id: ticket_id.to_string(),
            })
    }

    fn read_threads(&self, ticket_id: &str) -> Result<Vec<Thread>, SourceError> {
        let mut state = self.state();
        state.counters.thread_reads += 1;
        state.check_read(ticket_id)?;
        Ok(state
            .threads
            .iter()
            .filter(|t| t.ticket_id == ticket_id)
            .cloned()
            .collect())
    }

    fn read_notes(&self, thread_id: &str) -> Result<Vec<ThreadNote>, SourceError> {
        let mut state = self.state();
        state.counters.note_reads += 1;
        if let Some(ticket_id) = state.thread_ticket(thread_id) {
            state.check_read(ticket_id)?;
        }
        Ok(state
            .notes
            .iter()
            .filter(|n| n.thread_id == thread_id)
            .cloned()
            .collect())
    }

    fn list_ticket_ids(&self) -> Result<Vec<String>, SourceError> {
        Ok(self
            .state()
            .tickets
            .values()
            .filter(|t| !t.deleted)
            .map(|t| t.id.clone())
            .collect())
    }

    fn ticket_for_entity(
        &self,
        table: EntityTable,
        record_id: &str,
    ) -> Result<Option<String>, SourceError> {
        let state = self.state();
        let ticket_id = match table {
            EntityTable::Tickets => state.tickets.get(record_id).map(|t| t.id.as_str()),
            EntityTable::AuditLogs => state
                .audit
                .iter()
                .find(|e| e.id == record_id && e.table_name == TICKETS_TABLE)
                .map(|e| e.record_id.as_str()),
            EntityTable::Threads => state.thread_ticket(record_id),
            EntityTable::ThreadNotes => state
                .notes
                .iter()
                .find(|n| n.id == record_id)
                .and_then(|n| state.thread_ticket(&n.thread_id)),
        };
        Ok(ticket_id.map(str::to_string))
    }
}

impl ActorDirectory for MemoryBackend {
    fn resolve_actor_names(
        &self,
        ids: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, String>, SourceError> {
        let mut state = self.state();
        state.counters.actor_lookups += 1;
        Ok(ids
            .iter()
            .filter_map(|id| state.actors.get(id).map(|name| (id.clone(), name.clone())))
            .collect())
    }
}

impl MetadataStore for MemoryBackend {
    fn load_metadata(&self, ticket_id: &str) -> Result<Option<StoredMetadata>, SourceError> {
        let state = self.state();
        state.check_read(ticket_id)?;
        Ok(state.metadata.get(ticket_id).cloned())
    }

    fn store_metadata(
        &self,
        ticket_id: &str,
        expected_version: u64,
        digest: &str,
        metadata: &TicketMetadata,
    ) -> Result<StoredMetadata, SourceError> {
        let mut state = self.state();
        if state.failing_writes.contains(ticket_id) {
            return Err(SourceError::Backend(anyhow::anyhow!(
                "injected write failure for {ticket_id}"
            )));
        }

        let found = state.metadata.get(ticket_id).map_or(0, |m| m.version);
        if let Some(remaining) = state.forced_conflicts.get_mut(ticket_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SourceError::Conflict {
                    id: ticket_id.to_string(),
                    expected: expected_version,
                    found: found + 1,
                });
            }
        }
        if found != expected_version {
            return Err(SourceError::Conflict {
                id: ticket_id.to_string(),
                expected: expected_version,
                found,
            });
        }

        let stored = StoredMetadata {
            ticket_id: ticket_id.to_string(),
            version: found + 1,
            digest: digest.to_string(),
            metadata: metadata.clone(),
        };
        state.metadata.insert(ticket_id.to_string(), stored.clone());
        state.counters.metadata_writes += 1;
        Ok(stored)
    }
}
