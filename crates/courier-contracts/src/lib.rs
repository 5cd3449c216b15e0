use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod telegram;

/// Stable identifier of a conversation. Every persisted artifact is keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the account that authored an event or owns a shared contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One inbound chat event, alive for a single dispatch cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub chat_id: ChatId,
    pub author: Option<UserId>,
    /// Display name as received; sanitized by the dispatcher before use.
    pub sender: String,
    pub received_at: DateTime<Utc>,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    ContactShare {
        phone_number: String,
        contact_user_id: Option<UserId>,
    },
    VoiceRecording {
        file_id: String,
        duration_secs: u32,
        mime_type: Option<String>,
        file_size: Option<u64>,
    },
    TextMessage {
        text: String,
    },
    Command {
        name: String,
        args: String,
    },
    Unsupported {
        kind: String,
    },
}

impl EventPayload {
    pub fn kind(&self) -> &str {
        match self {
            EventPayload::ContactShare { .. } => "contact",
            EventPayload::VoiceRecording { .. } => "voice",
            EventPayload::TextMessage { .. } => "text",
            EventPayload::Command { .. } => "command",
            EventPayload::Unsupported { kind } => kind,
        }
    }

    pub fn is_contact_share(&self) -> bool {
        matches!(self, EventPayload::ContactShare { .. })
    }
}

/// Proof of consent for a chat, stored as `contacts/{chat_id}.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContactRecord {
    pub username: String,
    pub phone_number: String,
    pub timestamp: String,
}

/// Reply keyboard attached to an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keyboard {
    /// One-time keyboard with a single button that shares the user's own contact.
    RequestContact { button_text: String },
    /// Dismisses any keyboard previously shown in the chat.
    Remove,
}

/// Download handle for a file hosted by the messaging platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileRef {
    pub file_id: String,
    /// Platform-side path; its extension drives the file type check.
    pub path: String,
    pub size: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contact_record_uses_flat_json_shape() {
        let record = ContactRecord {
            username: "alice".to_string(),
            phone_number: "+15551234".to_string(),
            timestamp: "2026-02-14T00:00:00Z".to_string(),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "username": "alice",
                "phone_number": "+15551234",
                "timestamp": "2026-02-14T00:00:00Z"
            })
        );
    }

    #[test]
    fn unsupported_payload_reports_its_own_kind() {
        let payload = EventPayload::Unsupported {
            kind: "sticker".to_string(),
        };
        assert_eq!(payload.kind(), "sticker");
        assert!(!payload.is_contact_share());
    }
}
