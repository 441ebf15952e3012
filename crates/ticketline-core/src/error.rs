use std::fmt;

use crate::lease::LeaseError;

/// Machine-readable error codes for operator and batch-report decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    TicketNotFound,
    ReadFailure,
    MalformedEntry,
    AccessDenied,
    WriteConflict,
    PersistFailure,
    LeaseContention,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1002",
            Self::TicketNotFound => "E2001",
            Self::ReadFailure => "E2101",
            Self::MalformedEntry => "E2102",
            Self::AccessDenied => "E4001",
            Self::WriteConflict => "E5003",
            Self::PersistFailure => "E5004",
            Self::LeaseContention => "E5002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::TicketNotFound => "Ticket not found",
            Self::ReadFailure => "Upstream read failed",
            Self::MalformedEntry => "Malformed audit entry",
            Self::AccessDenied => "Access denied",
            Self::WriteConflict => "Concurrent metadata write",
            Self::PersistFailure => "Metadata write failed",
            Self::LeaseContention => "Ticket lease contention",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in .ticketline/config.toml and retry."),
            Self::TicketNotFound => None,
            Self::ReadFailure => Some("Retry; the failure is isolated to this ticket."),
            Self::MalformedEntry => {
                Some("The entry was skipped. Check its timestamp and actor in the audit log.")
            }
            Self::AccessDenied => {
                Some("Only the ticket owner, the assignee, or an admin can view threads.")
            }
            Self::WriteConflict => Some("Another recompute won the race; retry with a fresh read."),
            Self::PersistFailure => Some("Check database availability, then `tl rebuild` the ticket."),
            Self::LeaseContention => Some("Retry after the in-flight recompute for this ticket ends."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Errors reported by collaborators at the storage/transport boundary.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// The write's expected version no longer matches the stored version.
    #[error("version conflict for {id}: expected {expected}, found {found}")]
    Conflict { id: String, expected: u64, found: u64 },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Errors from reconstruction, timeline building, and persistence.
///
/// Every variant is scoped to a single ticket; batch callers collect them
/// instead of aborting.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("ticket {0} not found")]
    TicketNotFound(String),

    #[error("failed to read {what} for ticket {ticket_id}: {source}")]
    ReadFailure {
        ticket_id: String,
        what: &'static str,
        #[source]
        source: SourceError,
    },

    #[error("audit entry {entry_id} skipped: {reason}")]
    MalformedEntry { entry_id: String, reason: String },

    #[error("viewer {viewer_id} may not view ticket {ticket_id}")]
    AccessDenied { ticket_id: String, viewer_id: String },

    #[error("metadata for ticket {ticket_id} kept changing after {attempts} attempts")]
    WriteConflict { ticket_id: String, attempts: u32 },

    #[error("failed to persist metadata for ticket {ticket_id}: {source}")]
    PersistFailure {
        ticket_id: String,
        #[source]
        source: SourceError,
    },

    #[error(transparent)]
    Lease(#[from] LeaseError),
}

impl EngineError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::TicketNotFound(_) => ErrorCode::TicketNotFound,
            Self::ReadFailure { .. } => ErrorCode::ReadFailure,
            Self::MalformedEntry { .. } => ErrorCode::MalformedEntry,
            Self::AccessDenied { .. } => ErrorCode::AccessDenied,
            Self::WriteConflict { .. } => ErrorCode::WriteConflict,
            Self::PersistFailure { .. } => ErrorCode::PersistFailure,
            Self::Lease(err) => err.code(),
        }
    }

    /// Whether retrying the same operation later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ReadFailure { .. }
                | Self::WriteConflict { .. }
                | Self::PersistFailure { .. }
                | Self::Lease(_)
        )
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}
