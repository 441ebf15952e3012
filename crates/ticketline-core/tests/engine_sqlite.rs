use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use tempfile::TempDir;
use ticketline_core::db::SqliteStore;
use ticketline_core::db::import::{Actor, ImportBundle};
use ticketline_core::model::audit::{AuditLogEntry, TICKETS_TABLE};
use ticketline_core::model::metadata::{
    FromState, SecurityClassification, SecurityLevel, SlaLevel, StateTransition,
};
use ticketline_core::model::thread::{MessageType, Thread, ThreadNote};
use ticketline_core::model::ticket::{Priority, Role, Status, Ticket};
use ticketline_core::reconstruct::SkipReason;
use ticketline_core::source::MetadataStore;
use ticketline_core::{Engine, EngineConfig, EngineError, TimelineEventType, Viewer};

fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0)
        .single()
        .expect("valid ts")
        + chrono::Duration::minutes(minutes)
}

fn ticket(id: &str, priority: Priority, tags: &[&str]) -> Ticket {
    Ticket {
        id: id.to_string(),
        title: format!("Ticket {id}"),
        description: None,
        status: Status::Open,
        priority,
        created_at: at(0),
        user_id: "U1".to_string(),
        assigned_to: Some("A1".to_string()),
        tags: tags.iter().map(|t| (*t).to_string()).collect(),
        deleted: false,
    }
}

fn status_change(id: &str, ticket_id: &str, minutes: i64, from: Status, to: Status) -> AuditLogEntry {
    AuditLogEntry {
        id: id.to_string(),
        table_name: TICKETS_TABLE.to_string(),
        record_id: ticket_id.to_string(),
        created_at: at(minutes).to_rfc3339(),
        user_id: Some("A1".to_string()),
        old_data: json!({ "status": from.as_str() }),
        new_data: json!({ "status": to.as_str() }),
    }
}

fn config() -> EngineConfig {
    EngineConfig {
        max_write_retries: 10,
        lease_timeout: Duration::from_secs(10),
    }
}

fn open(dir: &TempDir) -> SqliteStore {
    SqliteStore::open(&dir.path().join("ticketline.db")).expect("open store")
}

fn reference_store(dir: &TempDir) -> SqliteStore {
    let store = open(dir);
    store
        .import(&ImportBundle {
            actors: vec![
                Actor {
                    id: "U1".into(),
                    name: "Una".into(),
                },
                Actor {
                    id: "A1".into(),
                    name: "Abe".into(),
                },
            ],
            tickets: vec![ticket("T-1", Priority::Urgent, &["Security"])],
            threads: Vec::new(),
            notes: Vec::new(),
            audit_logs: vec![
                status_change("e1", "T-1", 10, Status::Open, Status::InProgress),
                status_change("e2", "T-1", 20, Status::InProgress, Status::Resolved),
            ],
        })
        .expect("import reference data");
    store
}

#[test]
fn reference_scenario_end_to_end() {
    let dir = tempfile::tempdir().expect("temp dir");
    let engine = Engine::new(reference_store(&dir), config());

    let first = engine.reconstruct_metadata("T-1").expect("reconstruct");
    assert!(first.changed);
    assert_eq!(first.stored.version, 1);

    let metadata = &first.stored.metadata;
    assert_eq!(
        metadata.state_transitions,
        vec![
            StateTransition {
                from_state: FromState::None,
                to_state: Status::Open,
                timestamp: at(0),
                user_id: "U1".into(),
            },
            StateTransition {
                from_state: FromState::Status(Status::Open),
                to_state: Status::InProgress,
                timestamp: at(10),
                user_id: "A1".into(),
            },
            StateTransition {
                from_state: FromState::Status(Status::InProgress),
                to_state: Status::Resolved,
                timestamp: at(20),
                user_id: "A1".into(),
            },
        ]
    );
    assert_eq!(metadata.current_state.name, Status::Resolved);
    assert_eq!(metadata.current_state.entered_at, at(20));
    assert_eq!(metadata.current_state.updated_by, "A1");
    assert_eq!(metadata.security_level, Some(SecurityLevel::Critical));
    assert_eq!(
        metadata.security_classification,
        Some(SecurityClassification::General)
    );
    assert_eq!(metadata.sla_level, SlaLevel::High);

    let json = serde_json::to_value(metadata).expect("serialize");
    assert_eq!(json["state_transitions"][0]["from_state"], "none");
    assert_eq!(json["security_level"], "critical");

    let again = engine.reconstruct_metadata("T-1").expect("rerun");
    assert!(!again.changed);
    assert_eq!(again.stored, first.stored);
}

#[test]
fn undecodable_audit_payload_skips_only_that_entry() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = open(&dir);
    store
        .upsert_ticket(&ticket("T-1", Priority::Low, &[]))
        .expect("ticket");
    store
        .append_audit(&status_change("log-1", "T-1", 10, Status::Open, Status::InProgress))
        .expect("append");

    // Rows arriving from the system of record are not validated as JSON.
    let raw = rusqlite::Connection::open(dir.path().join("ticketline.db")).expect("raw connection");
    raw.execute(
        "INSERT INTO audit_logs (entry_id, table_name, record_id, user_id, old_data, new_data, created_at)
         VALUES ('log-2', 'tickets', 'T-1', 'A1', '{', '{\"status\": \"closed\"}', ?1)",
        [at(20).to_rfc3339()],
    )
    .expect("insert raw row");
    drop(raw);

    let engine = Engine::new(store, config());
    let done = engine.reconstruct_metadata("T-1").expect("bad row is skipped");

    assert_eq!(done.stored.metadata.current_state.name, Status::InProgress);
    assert_eq!(done.stored.metadata.state_transitions.len(), 2);
    assert_eq!(done.warnings.len(), 1);
    assert_eq!(done.warnings[0].entry_id, "log-2");
    assert!(matches!(done.warnings[0].reason, SkipReason::BadSnapshot(_)));
}

#[test]
fn metadata_survives_reopen() {
    let dir = tempfile::tempdir().expect("temp dir");
    let digest = {
        let engine = Engine::new(reference_store(&dir), config());
        engine.reconstruct_metadata("T-1").expect("reconstruct").stored.digest
    };

    let reopened = open(&dir);
    let stored = reopened
        .load_metadata("T-1")
        .expect("load")
        .expect("present after reopen");
    assert_eq!(stored.digest, digest);
    assert_eq!(stored.version, 1);
}

#[test]
fn timeline_merges_threads_with_names() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = reference_store(&dir);
    store
        .upsert_thread(&Thread {
            id: "th-1".into(),
            ticket_id: "T-1".into(),
            status: "active".into(),
            thread_type: "customer".into(),
            created_by: "U1".into(),
            created_at: at(10),
        })
        .expect("thread");
    for (id, minutes, kind, author) in [
        ("n-1", 10, MessageType::Message, "U1"),
        ("n-2", 15, MessageType::Note, "A1"),
    ] {
        store
            .upsert_note(&ThreadNote {
                id: id.into(),
                thread_id: "th-1".into(),
                content: format!("content of {id}"),
                created_by: author.into(),
                message_type: kind,
                created_at: at(minutes),
            })
            .expect("note");
    }

    let engine = Engine::new(store, config());
    let timeline = engine
        .build_timeline("T-1", &Viewer::new("A1", Role::Agent))
        .expect("timeline");

    let kinds: Vec<_> = timeline.iter().map(|e| e.event_type).collect();
    assert_eq!(
        kinds,
        vec![
            TimelineEventType::Created,
            TimelineEventType::StatusChange,
            TimelineEventType::ThreadCreated,
            TimelineEventType::MessageAdded,
            TimelineEventType::NoteAdded,
            TimelineEventType::StatusChange,
        ]
    );
    let first = &timeline.as_slice()[0];
    assert_eq!(first.actor_name, "Una");
    assert_eq!(first.event_description, "Ticket created: Ticket T-1");
    assert_eq!(timeline.as_slice()[4].event_description, "Internal note: content of n-2");
}

#[test]
fn strangers_are_denied() {
    let dir = tempfile::tempdir().expect("temp dir");
    let engine = Engine::new(reference_store(&dir), config());

    let err = engine
        .build_timeline("T-1", &Viewer::new("A9", Role::Agent))
        .unwrap_err();
    assert!(matches!(err, EngineError::AccessDenied { .. }));

    engine
        .build_timeline("T-1", &Viewer::new("boss", Role::Admin))
        .expect("admins see everything");
}

#[test]
fn batch_rebuild_skips_deleted_and_reports_each_ticket() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = reference_store(&dir);
    store
        .upsert_ticket(&ticket("T-2", Priority::Low, &[]))
        .expect("ticket");
    store
        .upsert_ticket(&ticket("T-3", Priority::High, &["compliance"]))
        .expect("ticket");
    assert!(store.soft_delete_ticket("T-3").expect("delete"));

    let engine = Engine::new(store, config());
    let report = engine.rebuild_all().expect("batch");
    assert_eq!(report.updated, vec!["T-1", "T-2"]);
    assert!(report.is_complete_success());

    let again = engine.rebuild_all().expect("batch");
    assert_eq!(again.unchanged, vec!["T-1", "T-2"]);
    assert!(again.updated.is_empty());
}

#[test]
fn concurrent_recomputes_do_not_lose_entries() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = open(&dir);
    store
        .upsert_ticket(&ticket("T-1", Priority::Medium, &[]))
        .expect("ticket");
    let engine = Arc::new(Engine::new(store, config()));

    let statuses = [Status::InProgress, Status::Resolved, Status::Closed, Status::Open];
    let handles: Vec<_> = (0..8_i64)
        .map(|i| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let index = usize::try_from(i).expect("small index");
                let to = statuses[index % statuses.len()];
                let entry = AuditLogEntry {
                    id: format!("e{i}"),
                    table_name: TICKETS_TABLE.into(),
                    record_id: "T-1".into(),
                    created_at: at(i + 1).to_rfc3339(),
                    user_id: Some(format!("agent-{i}")),
                    old_data: json!({}),
                    new_data: json!({ "status": to.as_str() }),
                };
                engine.backend().append_audit(&entry).expect("append");
                engine.reconstruct_metadata("T-1").expect("reconstruct")
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker");
    }

    let settled = engine.reconstruct_metadata("T-1").expect("final run");
    assert!(!settled.changed, "last recompute already saw every entry");
    assert_eq!(settled.stored.metadata.last_updated_by, "agent-7");
    assert_eq!(settled.stored.metadata.status_history.len(), 9);
}

#[test]
fn two_connections_race_through_version_checks() {
    let dir = tempfile::tempdir().expect("temp dir");
    reference_store(&dir);
    let left = Arc::new(Engine::new(open(&dir), config()));
    let right = Arc::new(Engine::new(open(&dir), config()));

    let handles: Vec<_> = [Arc::clone(&left), Arc::clone(&right)]
        .into_iter()
        .enumerate()
        .map(|(side, engine)| {
            thread::spawn(move || {
                for round in 0..5_i64 {
                    let minutes = 30 + round * 2 + i64::try_from(side).expect("side");
                    let entry = AuditLogEntry {
                        id: format!("race-{side}-{round}"),
                        table_name: TICKETS_TABLE.into(),
                        record_id: "T-1".into(),
                        created_at: at(minutes).to_rfc3339(),
                        user_id: Some("A1".into()),
                        old_data: json!({}),
                        new_data: json!({ "assigned_to": format!("agent-{side}-{round}") }),
                    };
                    engine.backend().append_audit(&entry).expect("append");
                    engine.reconstruct_metadata("T-1").expect("reconstruct");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker");
    }

    let settled = left.reconstruct_metadata("T-1").expect("settle");
    assert!(!settled.changed);
    assert_eq!(settled.stored.metadata.assignment_history.len(), 10);
    let seen_by_right = right
        .backend()
        .load_metadata("T-1")
        .expect("load")
        .expect("present");
    assert_eq!(seen_by_right.version, settled.stored.version);
}

#[test]
fn change_feed_coalesces_a_burst_into_one_write() {
    use crossbeam::channel;
    use ticketline_core::config::FeedSettings;
    use ticketline_core::source::EntityTable;
    use ticketline_core::{ChangeFeed, FeedOutcome};

    let dir = tempfile::tempdir().expect("temp dir");
    let engine = Arc::new(Engine::new(reference_store(&dir), config()));
    let (tx, rx) = channel::unbounded();
    let feed = ChangeFeed::spawn(
        Arc::clone(&engine),
        &FeedSettings {
            debounce_ms: 60_000,
            max_delay_ms: 120_000,
        },
        Some(tx),
    );

    feed.on_entity_changed(EntityTable::AuditLogs, "e1");
    feed.on_entity_changed(EntityTable::AuditLogs, "e2");
    feed.on_entity_changed(EntityTable::Tickets, "T-1");
    feed.shutdown();

    let outcomes: Vec<_> = rx.try_iter().collect();
    assert_eq!(
        outcomes,
        vec![FeedOutcome::Recomputed {
            ticket_id: "T-1".into(),
            version: 1,
            changed: true,
        }]
    );
}
