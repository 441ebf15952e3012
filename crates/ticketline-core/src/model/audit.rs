//! Audit log records and typed field snapshots.
//!
//! An [`AuditLogEntry`] is the wire-level record handed over by the system of
//! record: its `old_data`/`new_data` payloads are loosely-typed JSON objects
//! holding only the fields that changed. [`TicketSnapshot`] is the typed view
//! of such a payload for the `tickets` table. Every field is a [`Patch`], so
//! "field absent" and "field explicitly null" stay distinguishable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::ticket::{Priority, Status};

/// Table name under which ticket rows are audited.
pub const TICKETS_TABLE: &str = "tickets";

/// One field of a partial snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch<T> {
    /// The key is not part of the snapshot.
    Absent,
    /// The key is present with an explicit `null`.
    Null,
    /// The key is present with a value.
    Value(T),
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Self::Absent
    }
}

impl<T> Patch<T> {
    #[must_use]
    pub const fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// The value, if one is present.
    #[must_use]
    pub const fn value(&self) -> Option<&T> {
        match self {
            Self::Value(v) => Some(v),
            Self::Absent | Self::Null => None,
        }
    }

    /// Present-ness as a nested option: `None` when absent, `Some(None)` for null.
    #[must_use]
    pub fn as_present(&self) -> Option<Option<&T>> {
        match self {
            Self::Absent => None,
            Self::Null => Some(None),
            Self::Value(v) => Some(Some(v)),
        }
    }
}

impl<T: Serialize> Serialize for Patch<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Absent | Self::Null => serializer.serialize_none(),
            Self::Value(v) => v.serialize(serializer),
        }
    }
}

// A key that reaches the deserializer is present; absent keys take the default.
impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Option::<T>::deserialize(deserializer)?.map_or(Self::Null, Self::Value))
    }
}

/// Typed partial snapshot of a ticket row.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TicketSnapshot {
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub status: Patch<Status>,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub priority: Patch<Priority>,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub assigned_to: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_absent")]
    pub title: Patch<String>,
}

impl TicketSnapshot {
    /// Interpret a raw payload. `null` or a missing payload is an empty snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not an object or a known field holds
    /// a value of the wrong shape (e.g. an unknown status).
    pub fn from_value(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        if value.is_null() {
            return Ok(Self::default());
        }
        Self::deserialize(value)
    }
}

/// An immutable, append-only record of one change to one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: String,
    pub table_name: String,
    pub record_id: String,
    /// Timestamp text exactly as recorded. Parsed during reconstruction so a
    /// bad value only disqualifies this entry.
    pub created_at: String,
    /// Actor who made the change.
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub old_data: serde_json::Value,
    #[serde(default)]
    pub new_data: serde_json::Value,
}

impl AuditLogEntry {
    /// Parse `created_at` as RFC 3339, falling back to SQLite's
    /// `YYYY-MM-DD HH:MM:SS[.fff]` form (assumed UTC).
    #[must_use]
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.created_at)
    }

    /// The actor id, if non-blank.
    #[must_use]
    pub fn actor(&self) -> Option<&str> {
        self.user_id
            .as_deref()
            .map(str::trim)
            .filter(|actor| !actor.is_empty())
    }
}

/// Parse a timestamp in any of the formats the system of record emits.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
