//! Database row types — these map directly to SQLite rows. Distinct from the
//! lanchat-types API models to keep the store layer independent.

use chrono::{DateTime, NaiveDateTime, Utc};

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub password: String,
    pub online: bool,
    pub is_admin: bool,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: i64,
    pub sender: String,
    pub recipients: String,
    pub content: Option<String>,
    pub file_id: Option<i64>,
    pub status: String,
    pub reply_to: Option<i64>,
    pub reactions: Option<String>,
    pub group_id: Option<i64>,
    pub created_at: String,
}

pub struct FileRow {
    pub id: i64,
    pub filename: String,
    pub original_name: String,
    pub uploader: String,
    pub mimetype: String,
    pub created_at: String,
}

pub struct GroupRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub created_by: String,
    pub admin_only: bool,
    pub created_at: String,
}

pub struct GroupMemberRow {
    pub id: i64,
    pub group_id: i64,
    pub username: String,
    pub is_admin: bool,
    pub role: String,
    pub notification_preference: String,
    pub joined_at: String,
}

pub struct PinnedRow {
    pub id: i64,
    pub group_id: i64,
    pub message_id: i64,
    pub pinned_by: String,
    pub pinned_at: String,
}

pub struct ActivityRow {
    pub id: i64,
    pub group_id: i64,
    pub action_type: String,
    pub actor: String,
    pub target: Option<String>,
    pub details: Option<String>,
    pub created_at: String,
}

/// A file shared in a group, joined with the message carrying it.
pub struct GroupFileRow {
    pub file: FileRow,
    pub message_id: i64,
    pub message_created_at: String,
}

/// Fields for a new message row; id and timestamp are assigned by the store.
pub struct NewMessage {
    pub sender: String,
    pub recipients: String,
    pub content: Option<String>,
    pub file_id: Option<i64>,
    pub reply_to: Option<i64>,
    pub group_id: Option<i64>,
}

/// SQLite stores timestamps as `YYYY-MM-DD HH:MM:SS` without timezone.
/// Parse as naive UTC; RFC 3339 accepted for robustness.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|ndt| ndt.and_utc())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sqlite_datetime_format() {
        let ts = parse_timestamp("2026-08-05 10:30:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-08-05T10:30:00+00:00");
    }

    #[test]
    fn parses_rfc3339_and_rejects_garbage() {
        assert!(parse_timestamp("2026-08-05T10:30:00Z").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }
}
