use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sender name used for synthesized group activity messages.
pub const SYSTEM_SENDER: &str = "System";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub online: bool,
    pub is_admin: bool,
}

/// File metadata attached to a message payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub filename: String,
    pub original_name: String,
    pub mimetype: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Read => "read",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "read" => Self::Read,
            _ => Self::Sent,
        }
    }
}

/// Per-message reaction state: emoji -> users who reacted, in arrival order.
/// Serialized to JSON only at the storage boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reactions(pub BTreeMap<String, Vec<String>>);

impl Reactions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user's reaction. Returns false when the user already reacted
    /// with this emoji.
    pub fn add(&mut self, emoji: &str, username: &str) -> bool {
        let users = self.0.entry(emoji.to_string()).or_default();
        if users.iter().any(|u| u == username) {
            return false;
        }
        users.push(username.to_string());
        true
    }

    /// Remove a user's reaction. Removing the last user for an emoji drops
    /// the emoji key entirely. Returns false when there was nothing to remove.
    pub fn remove(&mut self, emoji: &str, username: &str) -> bool {
        let Some(users) = self.0.get_mut(emoji) else {
            return false;
        };
        let Some(pos) = users.iter().position(|u| u == username) else {
            return false;
        };
        users.remove(pos);
        if users.is_empty() {
            self.0.remove(emoji);
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Abbreviated view of the message a reply points at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyPreview {
    pub id: i64,
    pub sender: String,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// The full delivery payload for one message — the shape of both
/// `receive_message` events and `/history` entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: i64,
    pub sender: String,
    pub recipients: String,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub file: Option<FileInfo>,
    pub status: MessageStatus,
    pub reply_to: Option<ReplyPreview>,
    pub reactions: Reactions,
    pub group_id: Option<i64>,
}

/// Group member role. The admin flag tracks the role: `Admin` implies the
/// flag is set, the other two imply it is cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Moderator,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Moderator => "moderator",
            Self::Admin => "admin",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "member" => Some(Self::Member),
            "moderator" => Some(Self::Moderator),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn implies_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPreference {
    All,
    Mentions,
    None,
}

impl NotificationPreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Mentions => "mentions",
            Self::None => "none",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "all" => Some(Self::All),
            "mentions" => Some(Self::Mentions),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaction_add_is_idempotent_per_user() {
        let mut r = Reactions::new();
        assert!(r.add("👍", "Alice"));
        assert!(!r.add("👍", "Alice"));
        assert_eq!(r.0["👍"], vec!["Alice".to_string()]);
    }

    #[test]
    fn removing_last_user_drops_emoji_key() {
        let mut r = Reactions::new();
        r.add("🎉", "Alice");
        r.add("🎉", "Bob");
        assert!(r.remove("🎉", "Alice"));
        assert!(r.remove("🎉", "Bob"));
        assert!(r.is_empty());
    }

    #[test]
    fn removing_missing_reaction_is_a_noop() {
        let mut r = Reactions::new();
        assert!(!r.remove("👍", "Alice"));
        r.add("👍", "Bob");
        assert!(!r.remove("👍", "Alice"));
        assert!(!r.is_empty());
    }

    #[test]
    fn reactions_round_trip_as_plain_json_map() {
        let mut r = Reactions::new();
        r.add("👍", "Alice");
        r.add("👍", "Bob");
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, r#"{"👍":["Alice","Bob"]}"#);
        let back: Reactions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
