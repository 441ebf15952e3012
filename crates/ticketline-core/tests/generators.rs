#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use ticketline_core::model::audit::{AuditLogEntry, TICKETS_TABLE};
use ticketline_core::model::thread::{MessageType, Thread, ThreadNote};
use ticketline_core::model::ticket::{Priority, Status, Ticket};
use ticketline_core::timeline::ThreadActivity;

pub const ACTORS: [&str; 4] = ["u-1", "a-1", "a-2", "admin"];
pub const TAGS: [&str; 5] = ["security", "vulnerability", "compliance", "billing", "vpn"];

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0)
        .single()
        .expect("valid base time")
}

pub fn at(minutes: i64) -> DateTime<Utc> {
    base_time() + Duration::minutes(minutes)
}

pub fn arb_status() -> impl Strategy<Value = Status> {
    prop::sample::select(Status::ALL.to_vec())
}

pub fn arb_priority() -> impl Strategy<Value = Priority> {
    prop::sample::select(Priority::ALL.to_vec())
}

pub fn arb_actor() -> impl Strategy<Value = String> {
    prop::sample::select(ACTORS.to_vec()).prop_map(String::from)
}

pub fn arb_tags() -> impl Strategy<Value = BTreeSet<String>> {
    prop::sample::subsequence(TAGS.to_vec(), 0..=3)
        .prop_map(|tags| tags.into_iter().map(String::from).collect())
}

pub fn arb_ticket() -> impl Strategy<Value = Ticket> {
    (arb_priority(), arb_tags(), prop::option::of(arb_actor())).prop_map(
        |(priority, tags, assigned_to)| Ticket {
            id: "t-1".to_string(),
            title: "Generated ticket".to_string(),
            description: None,
            status: Status::Open,
            priority,
            created_at: base_time(),
            user_id: "u-1".to_string(),
            assigned_to,
            tags,
            deleted: false,
        },
    )
}

/// One generated audit record, positioned relative to the previous one.
#[derive(Debug, Clone)]
pub struct Step {
    pub gap_minutes: i64,
    pub old_status: Option<Status>,
    pub new_status: Option<Status>,
    /// `Some(None)` writes an explicit `null`.
    pub assignee: Option<Option<String>>,
    pub actor: Option<String>,
    pub garbled_time: bool,
}

pub fn arb_step() -> impl Strategy<Value = Step> {
    (
        0i64..=90,
        prop::option::weighted(0.3, arb_status()),
        prop::option::weighted(0.8, arb_status()),
        prop::option::weighted(0.3, prop::option::of(arb_actor())),
        prop::option::weighted(0.95, arb_actor()),
        prop::bool::weighted(0.05),
    )
        .prop_map(
            |(gap_minutes, old_status, new_status, assignee, actor, garbled_time)| Step {
                gap_minutes,
                old_status,
                new_status,
                assignee,
                actor,
                garbled_time,
            },
        )
}

pub fn arb_steps(max: usize) -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(arb_step(), 0..=max)
}

/// Audit entries for `ticket_id`, in non-decreasing time order.
pub fn build_entries(ticket_id: &str, steps: &[Step]) -> Vec<AuditLogEntry> {
    let mut minutes = 0;
    steps
        .iter()
        .enumerate()
        .map(|(index, step)| {
            minutes += step.gap_minutes;

            let mut old_data = Map::new();
            if let Some(status) = step.old_status {
                old_data.insert("status".into(), Value::from(status.as_str()));
            }
            let mut new_data = Map::new();
            if let Some(status) = step.new_status {
                new_data.insert("status".into(), Value::from(status.as_str()));
            }
            if let Some(assignee) = &step.assignee {
                new_data.insert(
                    "assigned_to".into(),
                    assignee.clone().map_or(Value::Null, Value::from),
                );
            }

            AuditLogEntry {
                id: format!("a-{index:03}"),
                table_name: TICKETS_TABLE.to_string(),
                record_id: ticket_id.to_string(),
                created_at: if step.garbled_time {
                    "not a timestamp".to_string()
                } else {
                    at(minutes).to_rfc3339()
                },
                user_id: step.actor.clone(),
                old_data: Value::Object(old_data),
                new_data: Value::Object(new_data),
            }
        })
        .collect()
}

/// Threads whose timestamps deliberately collide with each other.
pub fn arb_threads() -> impl Strategy<Value = Vec<ThreadActivity>> {
    prop::collection::vec(
        (
            0i64..6,
            arb_actor(),
            prop::collection::vec((0i64..6, arb_actor(), any::<bool>()), 0..4),
        ),
        0..4,
    )
    .prop_map(|threads| {
        threads
            .into_iter()
            .enumerate()
            .map(|(ti, (minute, created_by, notes))| {
                let thread_id = format!("th-{ti}");
                let notes = notes
                    .into_iter()
                    .enumerate()
                    .map(|(ni, (note_minute, author, internal))| ThreadNote {
                        id: format!("{thread_id}-n{ni}"),
                        thread_id: thread_id.clone(),
                        content: format!("note {ni}"),
                        created_by: author,
                        message_type: if internal {
                            MessageType::Note
                        } else {
                            MessageType::Message
                        },
                        created_at: at(minute + note_minute),
                    })
                    .collect();
                ThreadActivity {
                    thread: Thread {
                        id: thread_id,
                        ticket_id: "t-1".to_string(),
                        status: "active".to_string(),
                        thread_type: "customer".to_string(),
                        created_by,
                        created_at: at(minute),
                    },
                    notes,
                }
            })
            .collect()
    })
}
