//! Recompute engine: the operations exposed to collaborators.
//!
//! - [`Engine::reconstruct_metadata`] rebuilds and persists one ticket's
//!   metadata. Recomputes for one ticket id are serialized by a lease, and
//!   the write is a compare-and-swap on the stored version, retried with a
//!   fresh read on conflict.
//! - [`Engine::build_timeline`] gates the viewer, recomputes metadata, then
//!   merges it with the ticket's conversation threads.
//! - [`Engine::rebuild_all`] runs the first operation over every ticket,
//!   collecting failures instead of stopping.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::access::{Viewer, ensure_can_view};
use crate::config::EngineSettings;
use crate::error::{EngineError, SourceError};
use crate::lease::LeaseTable;
use crate::model::audit::TICKETS_TABLE;
use crate::model::metadata::StoredMetadata;
use crate::model::ticket::Ticket;
use crate::reconstruct::{EntryWarning, reconstruct};
use crate::source::Backend;
use crate::timeline::{ThreadActivity, Timeline, TimelineInput, actor_ids, merge};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Extra write attempts after a version conflict.
    pub max_write_retries: u32,
    pub lease_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&EngineSettings::default())
    }
}

impl From<&EngineSettings> for EngineConfig {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            max_write_retries: settings.max_write_retries,
            lease_timeout: settings.lease_timeout(),
        }
    }
}

/// Result of one successful [`Engine::reconstruct_metadata`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recomputed {
    pub stored: StoredMetadata,
    /// False when the recomputed document matched the stored one and no
    /// write happened.
    pub changed: bool,
    pub warnings: Vec<EntryWarning>,
}

#[derive(Debug)]
pub struct BatchFailure {
    pub ticket_id: String,
    pub error: EngineError,
}

/// Outcome of a batch rebuild. Every ticket appears in exactly one list.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
    pub failures: Vec<BatchFailure>,
    /// Malformed audit entries seen across the batch.
    pub warnings: usize,
}

impl BatchReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.updated.len() + self.unchanged.len() + self.failures.len()
    }

    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.updated.len() + self.unchanged.len()
    }

    #[must_use]
    pub fn is_complete_success(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Engine<B> {
    backend: B,
    leases: LeaseTable,
    config: EngineConfig,
}

impl<B: Backend> Engine<B> {
    pub fn new(backend: B, config: EngineConfig) -> Self {
        Self {
            backend,
            leases: LeaseTable::new(),
            config,
        }
    }

    pub const fn backend(&self) -> &B {
        &self.backend
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Rebuild one ticket's metadata from its audit log and persist it.
    ///
    /// # Errors
    ///
    /// - [`EngineError::TicketNotFound`] for an unknown ticket.
    /// - [`EngineError::ReadFailure`] if the ticket, audit log, or stored
    ///   metadata cannot be read.
    /// - [`EngineError::WriteConflict`] if every attempt lost a version race.
    /// - [`EngineError::PersistFailure`] if the write fails.
    /// - [`EngineError::Lease`] if another recompute holds the ticket too long.
    pub fn reconstruct_metadata(&self, ticket_id: &str) -> Result<Recomputed, EngineError> {
        let _lease = self.leases.acquire(ticket_id, self.config.lease_timeout)?;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;

            let current = self
                .backend
                .load_metadata(ticket_id)
                .map_err(|e| read_failure(ticket_id, "stored metadata", e))?;
            let ticket = self.read_ticket(ticket_id)?;
            let entries = self
                .backend
                .read_audit_log(TICKETS_TABLE, ticket_id)
                .map_err(|e| read_failure(ticket_id, "audit log", e))?;

            let rebuilt = reconstruct(&ticket, &entries);
            if attempts == 1 {
                for warning in &rebuilt.warnings {
                    warn!(
                        ticket_id,
                        entry_id = %warning.entry_id,
                        reason = %warning.reason,
                        "skipping malformed audit data"
                    );
                }
            }

            let digest = rebuilt
                .metadata
                .digest()
                .map_err(|e| EngineError::PersistFailure {
                    ticket_id: ticket_id.to_string(),
                    source: SourceError::Backend(e.into()),
                })?;

            let expected_version = current.as_ref().map_or(0, |stored| stored.version);
            if let Some(stored) = current.filter(|stored| stored.digest == digest) {
                debug!(ticket_id, version = stored.version, "metadata unchanged");
                return Ok(Recomputed {
                    stored,
                    changed: false,
                    warnings: rebuilt.warnings,
                });
            }

            match self
                .backend
                .store_metadata(ticket_id, expected_version, &digest, &rebuilt.metadata)
            {
                Ok(stored) => {
                    debug!(
                        ticket_id,
                        version = stored.version,
                        entries = rebuilt.entries_used,
                        "metadata written"
                    );
                    return Ok(Recomputed {
                        stored,
                        changed: true,
                        warnings: rebuilt.warnings,
                    });
                }
                Err(SourceError::Conflict { expected, found, .. }) => {
                    if attempts > self.config.max_write_retries {
                        return Err(EngineError::WriteConflict {
                            ticket_id: ticket_id.to_string(),
                            attempts,
                        });
                    }
                    debug!(ticket_id, expected, found, attempts, "version conflict; re-reading");
                }
                Err(source) => {
                    return Err(EngineError::PersistFailure {
                        ticket_id: ticket_id.to_string(),
                        source,
                    });
                }
            }
        }
    }

    /// Build the merged timeline for `viewer`. The full history is recomputed
    /// from the audit log on every call, so entries that arrived since the
    /// last recompute are included. The stored document is refreshed as a
    /// side effect, and left untouched when nothing changed.
    ///
    /// # Errors
    ///
    /// - [`EngineError::AccessDenied`] before any thread is read, when the
    ///   viewer is not owner, assignee, or admin.
    /// - [`EngineError::TicketNotFound`] / [`EngineError::ReadFailure`] for
    ///   failed reads.
    /// - Any error of [`Engine::reconstruct_metadata`].
    pub fn build_timeline(&self, ticket_id: &str, viewer: &Viewer) -> Result<Timeline, EngineError> {
        let ticket = self.read_ticket(ticket_id)?;
        ensure_can_view(viewer, &ticket)?;

        let metadata = self.reconstruct_metadata(ticket_id)?.stored.metadata;

        let threads = self
            .backend
            .read_threads(ticket_id)
            .map_err(|e| read_failure(ticket_id, "threads", e))?;
        let mut activity = Vec::with_capacity(threads.len());
        for thread in threads {
            let notes = self
                .backend
                .read_notes(&thread.id)
                .map_err(|e| read_failure(ticket_id, "thread notes", e))?;
            activity.push(ThreadActivity { thread, notes });
        }

        let input = TimelineInput {
            ticket: &ticket,
            metadata: &metadata,
            threads: &activity,
        };
        let names = self
            .backend
            .resolve_actor_names(&actor_ids(&input))
            .map_err(|e| read_failure(ticket_id, "actor names", e))?;

        Ok(merge(&input, &names))
    }

    /// Rebuild metadata for every live ticket.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ReadFailure`] only if the ticket list itself
    /// cannot be read. Per-ticket failures land in the report.
    pub fn rebuild_all(&self) -> Result<BatchReport, EngineError> {
        let ids = self
            .backend
            .list_ticket_ids()
            .map_err(|e| read_failure("*", "ticket list", e))?;
        Ok(self.rebuild(&ids))
    }

    /// Rebuild metadata for each id independently.
    pub fn rebuild<S: AsRef<str>>(&self, ticket_ids: &[S]) -> BatchReport {
        let mut report = BatchReport::default();

        for ticket_id in ticket_ids {
            let ticket_id = ticket_id.as_ref();
            match self.reconstruct_metadata(ticket_id) {
                Ok(done) => {
                    report.warnings += done.warnings.len();
                    if done.changed {
                        report.updated.push(ticket_id.to_string());
                    } else {
                        report.unchanged.push(ticket_id.to_string());
                    }
                }
                Err(error) => {
                    warn!(ticket_id, code = %error.code(), %error, "ticket rebuild failed");
                    report.failures.push(BatchFailure {
                        ticket_id: ticket_id.to_string(),
                        error,
                    });
                }
            }
        }

        info!(
            total = report.total(),
            updated = report.updated.len(),
            unchanged = report.unchanged.len(),
            failed = report.failures.len(),
            warnings = report.warnings,
            "metadata rebuild finished"
        );
        report
    }

    fn read_ticket(&self, ticket_id: &str) -> Result<Ticket, EngineError> {
        self.backend.read_ticket(ticket_id).map_err(|e| match e {
            SourceError::NotFound { .. } => EngineError::TicketNotFound(ticket_id.to_string()),
            other => read_failure(ticket_id, "ticket", other),
        })
    }
}

fn read_failure(ticket_id: &str, what: &'static str, source: SourceError) -> EngineError {
    EngineError::ReadFailure {
        ticket_id: ticket_id.to_string(),
        what,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::memory::MemoryBackend;
    use crate::model::audit::AuditLogEntry;
    use crate::model::thread::{MessageType, Thread, ThreadNote};
    use crate::model::ticket::{Priority, Role, Status};
    use crate::timeline::TimelineEventType;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;
    use std::collections::BTreeSet;

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).single().expect("valid ts")
            + chrono::Duration::minutes(minutes)
    }

    fn ticket(id: &str) -> Ticket {
        Ticket {
            id: id.into(),
            title: format!("Ticket {id}"),
            description: None,
            status: Status::Open,
            priority: Priority::Low,
            created_at: t(0),
            user_id: "owner".into(),
            assigned_to: Some("agent".into()),
            tags: BTreeSet::new(),
            deleted: false,
        }
    }

    fn move_to(id: &str, ticket_id: &str, minutes: i64, from: &str, to: &str) -> AuditLogEntry {
        AuditLogEntry {
            id: id.into(),
            table_name: TICKETS_TABLE.into(),
            record_id: ticket_id.into(),
            created_at: t(minutes).to_rfc3339(),
            user_id: Some("agent".into()),
            old_data: json!({"status": from}),
            new_data: json!({"status": to}),
        }
    }

    fn engine() -> Engine<MemoryBackend> {
        let backend = MemoryBackend::new();
        backend.insert_ticket(ticket("t-1"));
        backend.append_audit(move_to("a1", "t-1", 5, "open", "in_progress"));
        Engine::new(
            backend,
            EngineConfig {
                max_write_retries: 2,
                lease_timeout: Duration::from_millis(200),
            },
        )
    }

    #[test]
    fn first_run_writes_second_run_is_noop() {
        let engine = engine();
        let first = engine.reconstruct_metadata("t-1").expect("first run");
        assert!(first.changed);
        assert_eq!(first.stored.version, 1);

        let second = engine.reconstruct_metadata("t-1").expect("second run");
        assert!(!second.changed);
        assert_eq!(second.stored.version, 1);
        assert_eq!(second.stored.digest, first.stored.digest);
        assert_eq!(engine.backend().counters().metadata_writes, 1);
    }

    #[test]
    fn new_audit_entry_bumps_version() {
        let engine = engine();
        engine.reconstruct_metadata("t-1").expect("first run");
        engine
            .backend()
            .append_audit(move_to("a2", "t-1", 9, "in_progress", "resolved"));

        let next = engine.reconstruct_metadata("t-1").expect("second run");
        assert!(next.changed);
        assert_eq!(next.stored.version, 2);
        assert_eq!(next.stored.metadata.current_state.name, Status::Resolved);
    }

    #[test]
    fn conflicts_are_retried_then_reported() {
        let engine = engine();
        engine.backend().force_conflicts("t-1", 2);
        let ok = engine.reconstruct_metadata("t-1").expect("retries succeed");
        assert_eq!(ok.stored.version, 1);

        engine
            .backend()
            .append_audit(move_to("a2", "t-1", 9, "in_progress", "closed"));
        engine.backend().force_conflicts("t-1", 10);
        let err = engine.reconstruct_metadata("t-1").unwrap_err();
        assert!(matches!(err, EngineError::WriteConflict { attempts: 3, .. }));
        assert_eq!(err.code(), ErrorCode::WriteConflict);
    }

    #[test]
    fn write_failure_is_persist_failure() {
        let engine = engine();
        engine.backend().fail_writes_for("t-1", true);
        let err = engine.reconstruct_metadata("t-1").unwrap_err();
        assert!(matches!(err, EngineError::PersistFailure { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn unknown_ticket_is_not_found() {
        let engine = engine();
        let err = engine.reconstruct_metadata("nope").unwrap_err();
        assert!(matches!(err, EngineError::TicketNotFound(ref id) if id == "nope"));
    }

    #[test]
    fn batch_isolates_failures() {
        let engine = engine();
        engine.backend().insert_ticket(ticket("t-2"));
        engine.backend().insert_ticket(ticket("t-3"));
        engine.backend().fail_reads_for("t-2", true);

        let report = engine.rebuild_all().expect("batch runs");
        assert_eq!(report.total(), 3);
        assert_eq!(report.updated, vec!["t-1", "t-3"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].ticket_id, "t-2");
        assert_eq!(report.failures[0].error.code(), ErrorCode::ReadFailure);

        engine.backend().fail_reads_for("t-2", false);
        let again = engine.rebuild_all().expect("batch runs");
        assert_eq!(again.updated, vec!["t-2"]);
        assert_eq!(again.unchanged, vec!["t-1", "t-3"]);
        assert!(again.is_complete_success());
    }

    #[test]
    fn batch_counts_malformed_entries() {
        let engine = engine();
        let mut bad = move_to("bad", "t-1", 6, "in_progress", "closed");
        bad.created_at = "garbage".into();
        engine.backend().append_audit(bad);

        let report = engine.rebuild(&["t-1"]);
        assert_eq!(report.warnings, 1);
        assert_eq!(report.succeeded(), 1);
    }

    #[test]
    fn denied_viewer_triggers_no_thread_reads() {
        let engine = engine();
        let err = engine
            .build_timeline("t-1", &Viewer::new("stranger", Role::Agent))
            .unwrap_err();
        assert!(matches!(err, EngineError::AccessDenied { .. }));
        let counters = engine.backend().counters();
        assert_eq!(counters.thread_reads, 0);
        assert_eq!(counters.note_reads, 0);
        assert_eq!(counters.actor_lookups, 0);
    }

    #[test]
    fn timeline_resolves_actors_in_one_lookup() {
        let engine = engine();
        let backend = engine.backend();
        backend.insert_actor("owner", "Olive Owner");
        backend.insert_actor("agent", "Andy Agent");
        for (thread_id, minutes) in [("th-1", 6), ("th-2", 7)] {
            backend.insert_thread(Thread {
                id: thread_id.into(),
                ticket_id: "t-1".into(),
                status: "active".into(),
                thread_type: "customer".into(),
                created_by: "owner".into(),
                created_at: t(minutes),
            });
            backend.insert_note(ThreadNote {
                id: format!("{thread_id}-n"),
                thread_id: thread_id.into(),
                content: "any update?".into(),
                created_by: "owner".into(),
                message_type: MessageType::Message,
                created_at: t(minutes + 1),
            });
        }

        let timeline = engine
            .build_timeline("t-1", &Viewer::new("owner", Role::Customer))
            .expect("timeline");
        assert_eq!(backend.counters().actor_lookups, 1);
        assert_eq!(timeline.len(), 6);
        assert_eq!(timeline.as_slice()[0].actor_name, "Olive Owner");
        assert_eq!(timeline.as_slice()[1].event_type, TimelineEventType::StatusChange);
        assert_eq!(timeline.as_slice()[1].actor_name, "Andy Agent");

        // Metadata was missing, so the timeline read persisted it once.
        assert_eq!(backend.counters().metadata_writes, 1);

        engine
            .build_timeline("t-1", &Viewer::new("owner", Role::Customer))
            .expect("second read");
        assert_eq!(backend.counters().metadata_writes, 1);
    }

    #[test]
    fn timeline_includes_entries_appended_after_last_recompute() {
        let engine = engine();
        let first = engine.reconstruct_metadata("t-1").expect("recompute");
        assert_eq!(first.stored.version, 1);

        engine
            .backend()
            .append_audit(move_to("a2", "t-1", 10, "in_progress", "resolved"));

        let timeline = engine
            .build_timeline("t-1", &Viewer::new("owner", Role::Customer))
            .expect("timeline");
        let changes: Vec<&str> = timeline
            .iter()
            .filter(|event| event.event_type == TimelineEventType::StatusChange)
            .map(|event| event.event_description.as_str())
            .collect();
        assert_eq!(changes.len(), 2);

        let stored = engine.backend().stored("t-1").expect("stored");
        assert_eq!(stored.version, 2);
        assert_eq!(stored.metadata.current_state.name, Status::Resolved);
    }
}
