//! Per-ticket leases that serialize metadata recomputes.
//!
//! A [`LeaseTable`] admits at most one holder per ticket id. Waiters block on
//! a condition variable until the holder drops its [`TicketLease`] or the
//! timeout passes.

use crate::error::ErrorCode;
use std::{
    collections::HashSet,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

/// Lease errors for per-ticket recompute serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseError {
    Timeout { ticket_id: String, waited: Duration },
}

impl LeaseError {
    /// Machine-readable code associated with this lease error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::LeaseContention,
        }
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

impl std::fmt::Display for LeaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout { ticket_id, waited } => write!(
                f,
                "{}: lease on ticket {ticket_id} timed out after {waited:?}",
                self.code().code(),
            ),
        }
    }
}

impl std::error::Error for LeaseError {}

/// In-process table of held per-ticket leases.
///
/// At most one [`TicketLease`] exists per ticket id at a time. Leases for
/// different tickets never contend.
#[derive(Debug, Default)]
pub struct LeaseTable {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl LeaseTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lease for `ticket_id`, waiting up to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Timeout`] if another holder keeps the lease for
    /// the whole wait.
    pub fn acquire(&self, ticket_id: &str, timeout: Duration) -> Result<TicketLease<'_>, LeaseError> {
        let start = Instant::now();
        let mut held = self.lock_held();

        while held.contains(ticket_id) {
            let waited = start.elapsed();
            let Some(remaining) = timeout.checked_sub(waited).filter(|r| !r.is_zero()) else {
                return Err(LeaseError::Timeout {
                    ticket_id: ticket_id.to_string(),
                    waited,
                });
            };
            held = self
                .released
                .wait_timeout(held, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        held.insert(ticket_id.to_string());
        Ok(TicketLease {
            table: self,
            ticket_id: ticket_id.to_string(),
        })
    }

    /// Returns true when some holder has the lease for `ticket_id`.
    #[must_use]
    pub fn is_held(&self, ticket_id: &str) -> bool {
        self.lock_held().contains(ticket_id)
    }

    // The set holds plain ids, so it stays consistent even if a holder panicked.
    fn lock_held(&self) -> MutexGuard<'_, HashSet<String>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// RAII guard for one ticket's lease. Release also happens automatically on drop.
#[derive(Debug)]
pub struct TicketLease<'a> {
    table: &'a LeaseTable,
    ticket_id: String,
}

impl TicketLease<'_> {
    /// Return the ticket id this lease covers.
    #[must_use]
    pub fn ticket_id(&self) -> &str {
        &self.ticket_id
    }

    /// Explicitly release the lease.
    pub fn release(self) {}
}

impl Drop for TicketLease<'_> {
    fn drop(&mut self) {
        self.table.lock_held().remove(&self.ticket_id);
        self.table.released.notify_all();
    }
}
