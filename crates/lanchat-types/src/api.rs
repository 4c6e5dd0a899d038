use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{NotificationPreference, Role};

// -- JWT Claims --

/// Session claims shared by the REST middleware and the WebSocket upgrade.
/// This is the `currentUser()` surface the core trusts: identity plus the
/// admin flag, nothing else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub is_admin: bool,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub username: String,
    pub is_admin: bool,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub username: String,
    pub is_admin: bool,
    pub token: String,
}

// -- History / read state --

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub user: Option<String>,
    pub group_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub user: Option<String>,
    pub group_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub marked: usize,
}

#[derive(Debug, Serialize)]
pub struct UnreadCounts {
    pub chats: usize,
    pub groups: usize,
    pub individual_badges: HashMap<String, usize>,
    pub group_badges: HashMap<String, usize>,
}

// -- Messages --

#[derive(Debug, Serialize)]
pub struct DeleteMessageResponse {
    pub mode: DeleteMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteMode {
    Hard,
    Soft,
}

#[derive(Debug, Deserialize)]
pub struct ClearChatRequest {
    pub user: String,
}

#[derive(Debug, Deserialize)]
pub struct ClearGroupChatRequest {
    pub group_id: i64,
}

// -- Files --

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub file_id: i64,
    pub filename: String,
    pub original_name: String,
    pub mimetype: String,
}

#[derive(Debug, Serialize)]
pub struct FileEntry {
    pub file_id: i64,
    pub filename: String,
    pub original_name: String,
    pub mimetype: String,
    pub uploader: String,
    pub timestamp: Option<DateTime<Utc>>,
}

// -- Groups --

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub members: Vec<String>,
    #[serde(default)]
    pub admins: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateGroupResponse {
    pub group_id: i64,
}

#[derive(Debug, Serialize)]
pub struct GroupSummary {
    pub id: i64,
    pub name: String,
    pub icon: Option<String>,
    pub created_by: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct GroupMemberInfo {
    pub username: String,
    pub is_admin: bool,
    pub role: Role,
    pub notification_preference: NotificationPreference,
}

#[derive(Debug, Serialize)]
pub struct GroupInfo {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub created_by: String,
    pub created_at: Option<DateTime<Utc>>,
    pub admin_only: bool,
    pub is_admin: bool,
    pub muted: bool,
    pub members: Vec<GroupMemberInfo>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateGroupRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub admin_only: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct MemberRequest {
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct SetAdminRequest {
    pub username: String,
    #[serde(default = "default_true")]
    pub is_admin: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct SetRoleRequest {
    pub username: String,
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct NotificationPreferenceRequest {
    pub preference: NotificationPreference,
}

#[derive(Debug, Deserialize)]
pub struct PinRequest {
    pub message_id: i64,
}

#[derive(Debug, Serialize)]
pub struct PinnedEntry {
    pub pin_id: i64,
    pub message_id: i64,
    pub message_sender: String,
    pub message_content: String,
    pub message_timestamp: Option<DateTime<Utc>>,
    pub pinned_by: String,
    pub pinned_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ActivityEntry {
    pub id: i64,
    pub action_type: String,
    pub actor: String,
    pub target: Option<String>,
    pub details: Option<serde_json::Value>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct GroupFileEntry {
    pub file_id: i64,
    pub original_name: String,
    pub mimetype: String,
    pub uploader: String,
    pub message_id: i64,
    pub message_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct MutedResponse {
    pub muted: bool,
}
