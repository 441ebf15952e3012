use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::ticket::ParseEnumError;

/// A conversation attached to a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub ticket_id: String,
    /// Free-form lifecycle label owned by the conversation layer (e.g. `active`).
    pub status: String,
    /// Conversation channel, e.g. `customer` or `internal`.
    pub thread_type: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Whether a thread entry is a conversation message or an internal note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Message,
    Note,
}

impl MessageType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Note => "note",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "message" | "reply" => Ok(Self::Message),
            "note" | "internal_note" => Ok(Self::Note),
            _ => Err(ParseEnumError {
                expected: "message type",
                got: s.to_string(),
            }),
        }
    }
}

/// One entry in a [`Thread`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadNote {
    pub id: String,
    pub thread_id: String,
    pub content: String,
    pub created_by: String,
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_parse() {
        assert_eq!("Note".parse::<MessageType>(), Ok(MessageType::Note));
        assert_eq!("internal_note".parse::<MessageType>(), Ok(MessageType::Note));
        assert_eq!("reply".parse::<MessageType>(), Ok(MessageType::Message));
        assert!("sms".parse::<MessageType>().is_err());
    }
}
