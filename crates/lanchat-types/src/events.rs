use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{MessagePayload, Reactions};

/// Commands sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientCommand {
    SendMessage {
        recipients: String,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        file_id: Option<i64>,
        #[serde(default)]
        reply_to: Option<i64>,
    },
    ReactMessage {
        msg_id: i64,
        emoji: String,
    },
    RemoveReaction {
        msg_id: i64,
        emoji: String,
    },
    MessageRead {
        msg_id: i64,
    },
    Typing {
        to: String,
    },
    StopTyping {
        to: String,
    },
    Join {
        room: String,
    },
    Leave {
        room: String,
    },
}

/// Events sent FROM server TO clients over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    ReceiveMessage(MessagePayload),
    MessageDeleted {
        msg_id: i64,
        sender: String,
        recipients: String,
        group_id: Option<i64>,
        deleted_by: String,
    },
    UpdateReactions {
        msg_id: i64,
        reactions: Reactions,
    },
    MessageRead {
        msg_id: i64,
    },
    ShowTyping {
        from: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        room: Option<String>,
    },
    HideTyping {
        from: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        room: Option<String>,
    },
    UserList {
        users: Vec<String>,
    },
    MessagePinned {
        group_id: i64,
        msg_id: i64,
        pinned_by: String,
        pinned_at: Option<DateTime<Utc>>,
    },
    MessageUnpinned {
        group_id: i64,
        msg_id: i64,
        unpinned_by: String,
    },
    ChatCleared {
        cleared_by: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        other_user: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        group_id: Option<i64>,
        msg_ids: Vec<i64>,
    },
    /// Delivered only to the originating connection.
    Error {
        kind: ErrorKind,
        message: String,
    },
}

/// Wire-level error discriminator for originator-only error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Policy,
    NotFound,
    Persistence,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_use_snake_case_tags() {
        let raw = r#"{"type":"send_message","data":{"recipients":"Bob","content":"hi"}}"#;
        let cmd: ClientCommand = serde_json::from_str(raw).unwrap();
        match cmd {
            ClientCommand::SendMessage {
                recipients,
                content,
                file_id,
                reply_to,
            } => {
                assert_eq!(recipients, "Bob");
                assert_eq!(content.as_deref(), Some("hi"));
                assert!(file_id.is_none());
                assert!(reply_to.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn events_serialize_with_snake_case_tags() {
        let ev = ServerEvent::MessageRead { msg_id: 9 };
        let json = serde_json::to_string(&ev).unwrap();
        assert_eq!(json, r#"{"type":"message_read","data":{"msg_id":9}}"#);
    }
}
