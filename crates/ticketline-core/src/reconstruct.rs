//! Audit log → canonical ticket metadata.
//!
//! # Algorithm
//!
//! 1. Seed one `none → open` transition and one `open` history entry at the
//!    ticket's creation time, credited to its creator. The log rarely holds an
//!    explicit creation record, so every lifecycle is assumed to start `open`.
//! 2. Validate each audit entry: it needs a parseable timestamp no earlier
//!    than creation, a non-blank actor, and snapshots of the right shape.
//!    Invalid entries are skipped and reported as [`EntryWarning`]s.
//! 3. Stable-sort the usable entries by timestamp and fold them. A status
//!    change is recorded when `new_data.status` holds a value that differs from
//!    `old_data.status`, or from the last known status when the old snapshot
//!    has none. Assignment changes follow the same rule on `assigned_to`,
//!    where an explicit `null` means "unassigned".
//! 4. Current state is the last history entry; `last_updated_by` is the actor
//!    of the last usable entry, else the assignee, else the owner.
//! 5. Security profile and SLA tier come from [`crate::classify`].
//!
//! The whole log is folded on every run. Equal inputs give equal output, and
//! a log that only grew yields a document whose transitions extend the
//! previous ones.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::classify::{classify, resolve_sla};
use crate::error::EngineError;
use crate::model::audit::{AuditLogEntry, Patch, TicketSnapshot};
use crate::model::metadata::{
    AssignmentChange, CurrentState, FromState, METADATA_SOURCE, StateTransition,
    StatusHistoryEntry, TicketMetadata,
};
use crate::model::ticket::{Status, Ticket};

/// Why an audit entry (or one of its fields) was not used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingTimestamp,
    UnparseableTimestamp(String),
    MissingActor,
    PredatesCreation {
        entry_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    },
    BadSnapshot(String),
    /// `new_data.status` was an explicit null. Only that field is ignored.
    NullStatus,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingTimestamp => f.write_str("missing timestamp"),
            Self::UnparseableTimestamp(raw) => write!(f, "unparseable timestamp '{raw}'"),
            Self::MissingActor => f.write_str("missing actor"),
            Self::PredatesCreation {
                entry_at,
                created_at,
            } => write!(
                f,
                "timestamp {} is before ticket creation {}",
                entry_at.to_rfc3339(),
                created_at.to_rfc3339()
            ),
            Self::BadSnapshot(detail) => write!(f, "malformed snapshot: {detail}"),
            Self::NullStatus => f.write_str("new status is null; status change ignored"),
        }
    }
}

/// A malformed audit entry noticed during reconstruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryWarning {
    pub entry_id: String,
    pub reason: SkipReason,
}

impl EntryWarning {
    /// Whether the whole entry was dropped (as opposed to one field).
    #[must_use]
    pub const fn skipped_entry(&self) -> bool {
        !matches!(self.reason, SkipReason::NullStatus)
    }
}

impl From<EntryWarning> for EngineError {
    fn from(warning: EntryWarning) -> Self {
        Self::MalformedEntry {
            entry_id: warning.entry_id,
            reason: warning.reason.to_string(),
        }
    }
}

/// Output of [`reconstruct`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconstruction {
    pub metadata: TicketMetadata,
    pub warnings: Vec<EntryWarning>,
    /// Number of audit entries that took part in the fold.
    pub entries_used: usize,
}

struct UsableEntry<'a> {
    at: DateTime<Utc>,
    actor: &'a str,
    old: TicketSnapshot,
    new: TicketSnapshot,
    id: &'a str,
}

/// Rebuild canonical metadata for `ticket` from its audit log.
#[must_use]
pub fn reconstruct(ticket: &Ticket, entries: &[AuditLogEntry]) -> Reconstruction {
    let mut warnings = Vec::new();
    let mut usable = validate_entries(ticket, entries, &mut warnings);
    usable.sort_by_key(|entry| entry.at);

    let mut state_transitions = vec![StateTransition {
        from_state: FromState::None,
        to_state: Status::Open,
        timestamp: ticket.created_at,
        user_id: ticket.user_id.clone(),
    }];
    let mut status_history = vec![StatusHistoryEntry {
        status: Status::Open,
        timestamp: ticket.created_at,
        user_id: ticket.user_id.clone(),
    }];
    let mut assignment_history = Vec::new();

    let mut last_status = Status::Open;
    let mut last_assignee: Option<String> = None;

    for entry in &usable {
        match entry.new.status {
            Patch::Value(to_state) => {
                let from = entry.old.status.value().copied().unwrap_or(last_status);
                if to_state != from {
                    state_transitions.push(StateTransition {
                        from_state: FromState::Status(from),
                        to_state,
                        timestamp: entry.at,
                        user_id: entry.actor.to_string(),
                    });
                    status_history.push(StatusHistoryEntry {
                        status: to_state,
                        timestamp: entry.at,
                        user_id: entry.actor.to_string(),
                    });
                    last_status = to_state;
                }
            }
            Patch::Null => warnings.push(EntryWarning {
                entry_id: entry.id.to_string(),
                reason: SkipReason::NullStatus,
            }),
            Patch::Absent => {}
        }

        if let Some(to) = entry.new.assigned_to.as_present() {
            let to = agent_id(to);
            let from = entry
                .old
                .assigned_to
                .as_present()
                .map_or_else(|| last_assignee.clone(), agent_id);
            if to != from {
                assignment_history.push(AssignmentChange {
                    from,
                    to: to.clone(),
                    timestamp: entry.at,
                    user_id: entry.actor.to_string(),
                });
                last_assignee = to;
            }
        }
    }

    let current_state = status_history
        .last()
        .map(|last| CurrentState {
            name: last.status,
            entered_at: last.timestamp,
            updated_by: last.user_id.clone(),
        })
        .unwrap_or_else(|| CurrentState {
            name: Status::Open,
            entered_at: ticket.created_at,
            updated_by: ticket.user_id.clone(),
        });

    let last_updated_by = usable
        .last()
        .map(|entry| entry.actor.to_string())
        .or_else(|| ticket.assigned_to.clone())
        .unwrap_or_else(|| ticket.user_id.clone());

    let profile = classify(ticket.priority, &ticket.tags);

    Reconstruction {
        metadata: TicketMetadata {
            current_state,
            state_transitions,
            status_history,
            assignment_history,
            last_updated_by,
            source: METADATA_SOURCE.to_string(),
            sla_level: resolve_sla(ticket.priority),
            security_level: profile.map(|p| p.level),
            security_classification: profile.map(|p| p.classification),
        },
        warnings,
        entries_used: usable.len(),
    }
}

fn validate_entries<'a>(
    ticket: &Ticket,
    entries: &'a [AuditLogEntry],
    warnings: &mut Vec<EntryWarning>,
) -> Vec<UsableEntry<'a>> {
    let mut usable = Vec::with_capacity(entries.len());

    for entry in entries {
        let mut skip = |reason| {
            warnings.push(EntryWarning {
                entry_id: entry.id.clone(),
                reason,
            });
        };

        let Some(at) = entry.parsed_timestamp() else {
            skip(if entry.created_at.trim().is_empty() {
                SkipReason::MissingTimestamp
            } else {
                SkipReason::UnparseableTimestamp(entry.created_at.clone())
            });
            continue;
        };
        let Some(actor) = entry.actor() else {
            skip(SkipReason::MissingActor);
            continue;
        };
        if at < ticket.created_at {
            skip(SkipReason::PredatesCreation {
                entry_at: at,
                created_at: ticket.created_at,
            });
            continue;
        }
        let snapshots = TicketSnapshot::from_value(&entry.old_data)
            .and_then(|old| TicketSnapshot::from_value(&entry.new_data).map(|new| (old, new)));
        let (old, new) = match snapshots {
            Ok(pair) => pair,
            Err(err) => {
                skip(SkipReason::BadSnapshot(err.to_string()));
                continue;
            }
        };

        usable.push(UsableEntry {
            at,
            actor,
            old,
            new,
            id: &entry.id,
        });
    }

    usable
}

fn agent_id(value: Option<&String>) -> Option<String> {
    value
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}
