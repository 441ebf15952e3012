//! Derived ticket metadata: the single versioned document regenerated from a
//! ticket and its audit log.
//!
//! Field order here is the serialization order, and the serialized bytes are
//! what [`TicketMetadata::digest`] hashes. Reordering fields changes every
//! stored digest and forces one rewrite per ticket on the next rebuild.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use super::ticket::Status;

/// Value of [`TicketMetadata::source`] for documents built from the audit log.
pub const METADATA_SOURCE: &str = "audit_log";

/// Text form of the synthetic origin of the first transition.
pub const NO_STATE: &str = "none";

/// Origin of a state transition: either a real status, or nothing (the seed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FromState {
    None,
    Status(Status),
}

impl FromState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => NO_STATE,
            Self::Status(status) => status.as_str(),
        }
    }

    #[must_use]
    pub const fn is_none(self) -> bool {
        matches!(self, Self::None)
    }
}

impl fmt::Display for FromState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for FromState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FromState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s == NO_STATE {
            return Ok(Self::None);
        }
        s.parse::<Status>()
            .map(Self::Status)
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from_state: FromState,
    pub to_state: Status,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub status: Status,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
}

/// A change of assignee. `None` means unassigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentChange {
    pub from: Option<String>,
    pub to: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentState {
    pub name: Status,
    pub entered_at: DateTime<Utc>,
    pub updated_by: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlaLevel {
    Standard,
    Medium,
    High,
}

impl SlaLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Medium,
    High,
    Critical,
}

impl SecurityLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityClassification {
    General,
    Vulnerability,
    Compliance,
}

impl SecurityClassification {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Vulnerability => "vulnerability",
            Self::Compliance => "compliance",
        }
    }
}

impl fmt::Display for SlaLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for SecurityClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical derived state for one ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketMetadata {
    pub current_state: CurrentState,
    pub state_transitions: Vec<StateTransition>,
    pub status_history: Vec<StatusHistoryEntry>,
    #[serde(default)]
    pub assignment_history: Vec<AssignmentChange>,
    pub last_updated_by: String,
    pub source: String,
    pub sla_level: SlaLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_level: Option<SecurityLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_classification: Option<SecurityClassification>,
}

impl TicketMetadata {
    /// Canonical serialized form.
    ///
    /// # Errors
    ///
    /// Returns an error only if serialization itself fails.
    pub fn to_canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// `blake3:<hex>` digest of the canonical serialized form.
    ///
    /// # Errors
    ///
    /// Returns an error only if serialization itself fails.
    pub fn digest(&self) -> Result<String, serde_json::Error> {
        let json = self.to_canonical_json()?;
        Ok(format!("blake3:{}", blake3::hash(json.as_bytes()).to_hex()))
    }
}

/// A metadata document as held by a [`crate::source::MetadataStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMetadata {
    pub ticket_id: String,
    /// Starts at 1 and increments on every content-changing write.
    pub version: u64,
    pub digest: String,
    pub metadata: TicketMetadata,
}
