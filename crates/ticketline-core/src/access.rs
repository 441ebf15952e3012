//! Who may see a ticket's conversation threads.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::model::ticket::{Role, Ticket};

/// The person asking for a view. Passed explicitly into every read; there is
/// no ambient session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewer {
    pub id: String,
    pub role: Role,
}

impl Viewer {
    #[must_use]
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }
}

/// True for the ticket owner, the current assignee, or any admin.
#[must_use]
pub fn can_view(viewer_id: &str, viewer_role: Role, owner_id: &str, assigned_to: Option<&str>) -> bool {
    viewer_role == Role::Admin || viewer_id == owner_id || assigned_to == Some(viewer_id)
}

/// Gate `viewer` on `ticket`.
///
/// # Errors
///
/// Returns [`EngineError::AccessDenied`] when [`can_view`] is false.
pub fn ensure_can_view(viewer: &Viewer, ticket: &Ticket) -> Result<(), EngineError> {
    if can_view(
        &viewer.id,
        viewer.role,
        &ticket.user_id,
        ticket.assigned_to.as_deref(),
    ) {
        Ok(())
    } else {
        Err(EngineError::AccessDenied {
            ticket_id: ticket.id.clone(),
            viewer_id: viewer.id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_assignee_and_admin_can_view() {
        assert!(can_view("u-1", Role::Customer, "u-1", Some("a-1")));
        assert!(can_view("a-1", Role::Agent, "u-1", Some("a-1")));
        assert!(can_view("boss", Role::Admin, "u-1", None));
    }

    #[test]
    fn everyone_else_is_denied() {
        assert!(!can_view("u-2", Role::Customer, "u-1", Some("a-1")));
        assert!(!can_view("a-2", Role::Agent, "u-1", Some("a-1")));
        assert!(!can_view("a-2", Role::Agent, "u-1", None));
    }

    #[test]
    fn empty_viewer_does_not_match_unassigned() {
        assert!(!can_view("", Role::Agent, "u-1", None));
    }
}
