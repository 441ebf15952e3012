//! Merge ticket metadata and conversation activity into one ordered timeline.
//!
//! Sources: ticket creation, status transitions and assignment changes from
//! [`TicketMetadata`], and thread creations, messages, and notes from the
//! conversation layer. Events sort by time; equal times sort by
//! [`TimelineEventType`] declaration order, then by the order the sources
//! were supplied (the sort is stable).
//!
//! Actor names are resolved by the caller in one batch over
//! [`actor_ids`], so lookup cost follows distinct actors, not events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::model::metadata::{AssignmentChange, StateTransition, TicketMetadata};
use crate::model::thread::{MessageType, Thread, ThreadNote};
use crate::model::ticket::Ticket;

/// `thread_context` value for events that belong to the ticket itself.
pub const TICKET_CONTEXT: &str = "ticket";

const PREVIEW_CHARS: usize = 80;

/// Kinds of timeline event, declared in tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEventType {
    Created,
    StatusChange,
    AssignmentChange,
    ThreadCreated,
    MessageAdded,
    NoteAdded,
}

impl TimelineEventType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::StatusChange => "status_change",
            Self::AssignmentChange => "assignment_change",
            Self::ThreadCreated => "thread_created",
            Self::MessageAdded => "message_added",
            Self::NoteAdded => "note_added",
        }
    }
}

impl fmt::Display for TimelineEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub event_time: DateTime<Utc>,
    pub event_type: TimelineEventType,
    pub event_description: String,
    pub actor_id: String,
    pub actor_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub thread_context: String,
}

/// A thread together with its entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadActivity {
    pub thread: Thread,
    pub notes: Vec<ThreadNote>,
}

/// Everything the merger reads for one ticket.
#[derive(Debug, Clone, Copy)]
pub struct TimelineInput<'a> {
    pub ticket: &'a Ticket,
    pub metadata: &'a TicketMetadata,
    pub threads: &'a [ThreadActivity],
}

/// An ordered, read-only sequence of timeline events.
///
/// Iterating does not consume it; every call to [`Timeline::iter`] starts
/// from the first event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Timeline {
    events: Vec<TimelineEvent>,
}

impl Timeline {
    pub fn iter(&self) -> std::slice::Iter<'_, TimelineEvent> {
        self.events.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[TimelineEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<TimelineEvent> {
        self.events
    }
}

impl<'a> IntoIterator for &'a Timeline {
    type Item = &'a TimelineEvent;
    type IntoIter = std::slice::Iter<'a, TimelineEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

impl IntoIterator for Timeline {
    type Item = TimelineEvent;
    type IntoIter = std::vec::IntoIter<TimelineEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

/// Distinct actor ids referenced by any event, including assignees named in
/// assignment changes.
#[must_use]
pub fn actor_ids(input: &TimelineInput<'_>) -> BTreeSet<String> {
    let mut ids = BTreeSet::new();
    ids.insert(input.ticket.user_id.clone());

    for transition in &input.metadata.state_transitions {
        ids.insert(transition.user_id.clone());
    }
    for change in &input.metadata.assignment_history {
        ids.insert(change.user_id.clone());
        ids.extend(change.from.iter().cloned());
        ids.extend(change.to.iter().cloned());
    }
    for activity in input.threads {
        ids.insert(activity.thread.created_by.clone());
        for note in &activity.notes {
            ids.insert(note.created_by.clone());
        }
    }

    ids
}

/// Build the ordered timeline. Unknown actors are shown by their raw id.
#[must_use]
pub fn merge(input: &TimelineInput<'_>, names: &BTreeMap<String, String>) -> Timeline {
    let name_of = |id: &str| names.get(id).cloned().unwrap_or_else(|| id.to_string());
    let mut events = Vec::new();

    let ticket = input.ticket;
    events.push(TimelineEvent {
        event_time: ticket.created_at,
        event_type: TimelineEventType::Created,
        event_description: format!("Ticket created: {}", ticket.title),
        actor_id: ticket.user_id.clone(),
        actor_name: name_of(&ticket.user_id),
        thread_id: None,
        thread_context: TICKET_CONTEXT.to_string(),
    });

    // The seed transition restates the creation event.
    for transition in input
        .metadata
        .state_transitions
        .iter()
        .filter(|tr| !tr.from_state.is_none())
    {
        events.push(TimelineEvent {
            event_time: transition.timestamp,
            event_type: TimelineEventType::StatusChange,
            event_description: describe_transition(transition),
            actor_id: transition.user_id.clone(),
            actor_name: name_of(&transition.user_id),
            thread_id: None,
            thread_context: TICKET_CONTEXT.to_string(),
        });
    }

    for change in &input.metadata.assignment_history {
        events.push(TimelineEvent {
            event_time: change.timestamp,
            event_type: TimelineEventType::AssignmentChange,
            event_description: describe_assignment(change, &name_of),
            actor_id: change.user_id.clone(),
            actor_name: name_of(&change.user_id),
            thread_id: None,
            thread_context: TICKET_CONTEXT.to_string(),
        });
    }

    for activity in input.threads {
        let thread = &activity.thread;
        events.push(TimelineEvent {
            event_time: thread.created_at,
            event_type: TimelineEventType::ThreadCreated,
            event_description: format!("Started {} thread", thread.thread_type),
            actor_id: thread.created_by.clone(),
            actor_name: name_of(&thread.created_by),
            thread_id: Some(thread.id.clone()),
            thread_context: thread.thread_type.clone(),
        });

        for note in &activity.notes {
            let (event_type, label) = match note.message_type {
                MessageType::Message => (TimelineEventType::MessageAdded, "Message"),
                MessageType::Note => (TimelineEventType::NoteAdded, "Internal note"),
            };
            events.push(TimelineEvent {
                event_time: note.created_at,
                event_type,
                event_description: format!("{label}: {}", preview(&note.content)),
                actor_id: note.created_by.clone(),
                actor_name: name_of(&note.created_by),
                thread_id: Some(thread.id.clone()),
                thread_context: thread.thread_type.clone(),
            });
        }
    }

    events.sort_by(|a, b| {
        a.event_time
            .cmp(&b.event_time)
            .then(a.event_type.cmp(&b.event_type))
    });

    Timeline { events }
}

fn describe_transition(transition: &StateTransition) -> String {
    format!(
        "Status changed from {} to {}",
        transition.from_state, transition.to_state
    )
}

fn describe_assignment(change: &AssignmentChange, name_of: &impl Fn(&str) -> String) -> String {
    match (change.from.as_deref(), change.to.as_deref()) {
        (None, Some(to)) => format!("Assigned to {}", name_of(to)),
        (Some(from), Some(to)) => format!("Reassigned from {} to {}", name_of(from), name_of(to)),
        (Some(from), None) => format!("Unassigned from {}", name_of(from)),
        (None, None) => "Assignment cleared".to_string(),
    }
}

fn preview(content: &str) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
    format!("{}…", cut.trim_end())
}
