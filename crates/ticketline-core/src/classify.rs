//! Security classification and SLA tier: pure mappings from ticket priority
//! and tags. No inference happens here; the same inputs always give the same
//! output.

use std::collections::BTreeSet;

use crate::model::metadata::{SecurityClassification, SecurityLevel, SlaLevel};
use crate::model::ticket::Priority;

/// Tags that mark a ticket as security-relevant.
pub const SECURITY_TAGS: [&str; 3] = ["security", "vulnerability", "compliance"];

/// Security level and classification for a security-relevant ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityProfile {
    pub level: SecurityLevel,
    pub classification: SecurityClassification,
}

/// Classify a ticket. Returns `None` unless at least one of
/// [`SECURITY_TAGS`] is present.
///
/// Tags are expected in normalized (lowercase) form.
#[must_use]
pub fn classify(priority: Priority, tags: &BTreeSet<String>) -> Option<SecurityProfile> {
    if !SECURITY_TAGS.iter().any(|tag| tags.contains(*tag)) {
        return None;
    }

    let level = match priority {
        Priority::Urgent => SecurityLevel::Critical,
        Priority::High => SecurityLevel::High,
        Priority::Medium | Priority::Low => SecurityLevel::Medium,
    };

    let classification = if tags.contains("vulnerability") {
        SecurityClassification::Vulnerability
    } else if tags.contains("compliance") {
        SecurityClassification::Compliance
    } else {
        SecurityClassification::General
    };

    Some(SecurityProfile {
        level,
        classification,
    })
}

/// SLA tier for a priority.
#[must_use]
pub const fn resolve_sla(priority: Priority) -> SlaLevel {
    match priority {
        Priority::Urgent => SlaLevel::High,
        Priority::High => SlaLevel::Medium,
        Priority::Medium | Priority::Low => SlaLevel::Standard,
    }
}
