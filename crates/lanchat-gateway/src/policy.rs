use serde_json::json;
use tracing::warn;

use lanchat_db::models::{GroupMemberRow, GroupRow, NewMessage};
use lanchat_db::{ChatError, ChatResult, Database};
use lanchat_types::models::{Role, SYSTEM_SENDER};
use lanchat_types::room::RecipientSet;

use crate::{CoreState, messages};

/// Gate for posting into a group room, checked before anything persists.
/// The rejection reaches only the sender.
pub fn authorize_post(db: &Database, group_id: i64, sender: &str) -> ChatResult<GroupRow> {
    let group = db.get_group(group_id)?.ok_or(ChatError::NotFound("group"))?;
    if group.admin_only {
        let is_admin = db
            .get_member(group_id, sender)?
            .map(|m| m.is_admin)
            .unwrap_or(false);
        if !is_admin {
            return Err(ChatError::policy(
                "Only admins can send messages in this group.",
            ));
        }
    }
    Ok(group)
}

pub fn require_group(db: &Database, group_id: i64) -> ChatResult<GroupRow> {
    db.get_group(group_id)?.ok_or(ChatError::NotFound("group"))
}

pub fn require_member(db: &Database, group_id: i64, username: &str) -> ChatResult<GroupMemberRow> {
    require_group(db, group_id)?;
    db.get_member(group_id, username)?
        .ok_or_else(|| ChatError::policy("not a member of this group"))
}

/// The actor must be a member carrying the admin flag.
pub fn require_admin(db: &Database, group_id: i64, actor: &str) -> ChatResult<GroupMemberRow> {
    let member = require_member(db, group_id, actor)?;
    if !member.is_admin {
        return Err(ChatError::policy("only group admins may do this"));
    }
    Ok(member)
}

// -- Membership mutations --
// All of these run on the blocking pool; each returns the audit events the
// caller records afterwards.

pub fn create_group(
    db: &Database,
    actor: &str,
    name: &str,
    description: Option<&str>,
    members: &[String],
    admins: &[String],
) -> ChatResult<(i64, Vec<ActivityEvent>)> {
    if name.trim().is_empty() {
        return Err(ChatError::validation("group name required"));
    }
    if members.is_empty() {
        return Err(ChatError::validation("at least one member required"));
    }

    let mut member_set: Vec<String> = Vec::new();
    for member in members.iter().map(String::as_str).chain([actor]) {
        if !member.is_empty() && !member_set.iter().any(|m| m == member) {
            member_set.push(member.to_string());
        }
    }

    let group_id = db.create_group(name.trim(), description, None, actor)?;
    let mut events = vec![ActivityEvent {
        group_id,
        action: ActionType::GroupCreated,
        actor: actor.to_string(),
        target: None,
        details: Some(json!({ "members": &member_set, "admins": admins })),
    }];

    for member in &member_set {
        let is_admin = member == actor || admins.iter().any(|a| a == member);
        let role = if is_admin { Role::Admin } else { Role::Member };
        db.add_member(group_id, member, is_admin, role.as_str())?;
        if member != actor {
            events.push(ActivityEvent {
                group_id,
                action: ActionType::MemberAdded,
                actor: actor.to_string(),
                target: Some(member.clone()),
                details: Some(json!({ "is_admin": is_admin })),
            });
        }
    }

    Ok((group_id, events))
}

pub fn add_member(
    db: &Database,
    group_id: i64,
    actor: &str,
    username: &str,
) -> ChatResult<ActivityEvent> {
    require_admin(db, group_id, actor)?;
    if db.get_member(group_id, username)?.is_some() {
        return Err(ChatError::validation("user already in group"));
    }
    db.add_member(group_id, username, false, Role::Member.as_str())?;
    Ok(ActivityEvent {
        group_id,
        action: ActionType::MemberAdded,
        actor: actor.to_string(),
        target: Some(username.to_string()),
        details: None,
    })
}

pub fn remove_member(
    db: &Database,
    group_id: i64,
    actor: &str,
    username: &str,
) -> ChatResult<ActivityEvent> {
    require_admin(db, group_id, actor)?;
    let target = db
        .get_member(group_id, username)?
        .ok_or_else(|| ChatError::validation("user not in group"))?;
    if target.is_admin && db.admin_count(group_id)? <= 1 {
        return Err(ChatError::policy(
            "promote another admin before removing the last one",
        ));
    }
    db.remove_member(group_id, username)?;
    Ok(ActivityEvent {
        group_id,
        action: ActionType::MemberRemoved,
        actor: actor.to_string(),
        target: Some(username.to_string()),
        details: None,
    })
}

/// Grant or revoke the admin flag. The creator can never lose it, and the
/// last admin cannot be demoted.
pub fn set_admin(
    db: &Database,
    group_id: i64,
    actor: &str,
    username: &str,
    make_admin: bool,
) -> ChatResult<(GroupMemberRow, ActivityEvent)> {
    require_admin(db, group_id, actor)?;
    let group = require_group(db, group_id)?;
    let member = db
        .get_member(group_id, username)?
        .ok_or_else(|| ChatError::validation("user not in group"))?;

    if !make_admin {
        if username == group.created_by {
            return Err(ChatError::policy(
                "cannot remove admin status from the group creator",
            ));
        }
        if member.is_admin && db.admin_count(group_id)? <= 1 {
            return Err(ChatError::policy(
                "promote another admin before demoting the last one",
            ));
        }
    }

    // Role tracks the flag; a moderator keeps their role either way.
    let role = match (make_admin, member.role.as_str()) {
        (true, "member") => Role::Admin.as_str(),
        (false, "admin") => Role::Member.as_str(),
        (_, other) => other,
    }
    .to_string();
    db.set_member_flags(group_id, username, make_admin, &role)?;

    let updated = db
        .get_member(group_id, username)?
        .ok_or(ChatError::NotFound("group member"))?;
    let event = ActivityEvent {
        group_id,
        action: ActionType::AdminStatusChanged,
        actor: actor.to_string(),
        target: Some(username.to_string()),
        details: Some(json!({ "is_admin": make_admin })),
    };
    Ok((updated, event))
}

/// Assign a role; the admin flag follows it. The creator stays admin.
pub fn set_role(
    db: &Database,
    group_id: i64,
    actor: &str,
    username: &str,
    role: Role,
) -> ChatResult<(GroupMemberRow, ActivityEvent)> {
    require_admin(db, group_id, actor)?;
    let group = require_group(db, group_id)?;
    let member = db
        .get_member(group_id, username)?
        .ok_or_else(|| ChatError::validation("user not in group"))?;

    if username == group.created_by && role != Role::Admin {
        return Err(ChatError::policy("cannot change role of group creator"));
    }
    if member.is_admin && !role.implies_admin() && db.admin_count(group_id)? <= 1 {
        return Err(ChatError::policy(
            "promote another admin before demoting the last one",
        ));
    }

    db.set_member_flags(group_id, username, role.implies_admin(), role.as_str())?;
    let updated = db
        .get_member(group_id, username)?
        .ok_or(ChatError::NotFound("group member"))?;
    let event = ActivityEvent {
        group_id,
        action: ActionType::RoleChanged,
        actor: actor.to_string(),
        target: Some(username.to_string()),
        details: Some(json!({ "role": role.as_str() })),
    };
    Ok((updated, event))
}

/// Self-leave. The last admin must promote a replacement first.
pub fn leave_group(db: &Database, group_id: i64, actor: &str) -> ChatResult<ActivityEvent> {
    let member = require_member(db, group_id, actor)?;
    if member.is_admin && db.admin_count(group_id)? <= 1 {
        return Err(ChatError::policy("assign another admin before leaving"));
    }
    db.remove_member(group_id, actor)?;
    Ok(ActivityEvent {
        group_id,
        action: ActionType::MemberLeft,
        actor: actor.to_string(),
        target: None,
        details: None,
    })
}

/// Update name/description/icon/admin-only. Returns one audit event per
/// field that actually changed.
pub fn update_group(
    db: &Database,
    group_id: i64,
    actor: &str,
    name: Option<&str>,
    description: Option<&str>,
    icon: Option<&str>,
    admin_only: Option<bool>,
) -> ChatResult<Vec<ActivityEvent>> {
    require_admin(db, group_id, actor)?;
    let group = require_group(db, group_id)?;
    let mut events = Vec::new();

    if let Some(name) = name {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::validation("group name cannot be empty"));
        }
        if name != group.name {
            db.set_group_name(group_id, name)?;
            events.push(ActivityEvent {
                group_id,
                action: ActionType::NameChanged,
                actor: actor.to_string(),
                target: None,
                details: Some(json!({ "old_name": group.name, "new_name": name })),
            });
        }
    }

    if let Some(description) = description {
        let old = group.description.as_deref().unwrap_or("");
        if description != old {
            let action = if old.is_empty() {
                ActionType::DescriptionAdded
            } else if description.is_empty() {
                ActionType::DescriptionRemoved
            } else {
                ActionType::DescriptionChanged
            };
            let stored = if description.is_empty() {
                None
            } else {
                Some(description)
            };
            db.set_group_description(group_id, stored)?;
            events.push(ActivityEvent {
                group_id,
                action,
                actor: actor.to_string(),
                target: None,
                details: Some(json!({
                    "old_description": old,
                    "new_description": description,
                })),
            });
        }
    }

    if let Some(icon) = icon {
        db.set_group_icon(group_id, Some(icon))?;
    }

    if let Some(admin_only) = admin_only {
        if admin_only != group.admin_only {
            db.set_group_admin_only(group_id, admin_only)?;
            events.push(ActivityEvent {
                group_id,
                action: ActionType::AdminOnlyChanged,
                actor: actor.to_string(),
                target: None,
                details: Some(json!({ "admin_only": admin_only })),
            });
        }
    }

    Ok(events)
}

/// Delete a group and all room state. Admin members only.
pub fn delete_group(db: &Database, group_id: i64, actor: &str) -> ChatResult<ActivityEvent> {
    require_admin(db, group_id, actor)?;
    db.delete_group_cascade(group_id)?;
    Ok(ActivityEvent {
        group_id,
        action: ActionType::GroupDeleted,
        actor: actor.to_string(),
        target: None,
        details: None,
    })
}

// -- Audit trail --

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    GroupCreated,
    GroupDeleted,
    MemberAdded,
    MemberRemoved,
    MemberLeft,
    AdminStatusChanged,
    RoleChanged,
    NameChanged,
    DescriptionAdded,
    DescriptionChanged,
    DescriptionRemoved,
    AdminOnlyChanged,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GroupCreated => "group_created",
            Self::GroupDeleted => "group_deleted",
            Self::MemberAdded => "member_added",
            Self::MemberRemoved => "member_removed",
            Self::MemberLeft => "member_left",
            Self::AdminStatusChanged => "admin_status_changed",
            Self::RoleChanged => "role_changed",
            Self::NameChanged => "group_name_changed",
            Self::DescriptionAdded => "description_added",
            Self::DescriptionChanged => "description_changed",
            Self::DescriptionRemoved => "description_removed",
            Self::AdminOnlyChanged => "admin_only_changed",
        }
    }
}

/// One mutating group action, destined for the audit log and (for some
/// actions) a synthesized system message in the room.
#[derive(Debug, Clone)]
pub struct ActivityEvent {
    pub group_id: i64,
    pub action: ActionType,
    pub actor: String,
    pub target: Option<String>,
    pub details: Option<serde_json::Value>,
}

impl ActivityEvent {
    /// The chat-visible rendering, for the subset of actions shown in the
    /// room. `None` means audit-log only.
    pub fn system_text(&self) -> Option<String> {
        let actor = &self.actor;
        let target = self.target.as_deref().unwrap_or("");
        let detail = |key: &str| {
            self.details
                .as_ref()
                .and_then(|d| d.get(key))
                .cloned()
                .unwrap_or(serde_json::Value::Null)
        };

        match self.action {
            ActionType::GroupCreated => Some(format!("🎉 {actor} created this group")),
            ActionType::MemberAdded => {
                if detail("is_admin").as_bool().unwrap_or(false) {
                    Some(format!("👤 {actor} added {target} to the group as an admin"))
                } else {
                    Some(format!("👤 {actor} added {target} to the group"))
                }
            }
            ActionType::MemberRemoved => {
                Some(format!("👤 {actor} removed {target} from the group"))
            }
            ActionType::MemberLeft => Some(format!("👤 {actor} left the group")),
            ActionType::AdminStatusChanged => {
                if detail("is_admin").as_bool().unwrap_or(false) {
                    Some(format!("🛡️ {actor} made {target} an admin"))
                } else {
                    Some(format!("🛡️ {actor} removed admin status from {target}"))
                }
            }
            ActionType::NameChanged => Some(format!(
                "✏️ {actor} changed group name from \"{}\" to \"{}\"",
                detail("old_name").as_str().unwrap_or(""),
                detail("new_name").as_str().unwrap_or(""),
            )),
            ActionType::DescriptionAdded => Some(format!(
                "📝 {actor} added group description: \"{}\"",
                detail("new_description").as_str().unwrap_or(""),
            )),
            ActionType::DescriptionChanged => Some(format!(
                "📝 {actor} changed group description from \"{}\" to \"{}\"",
                detail("old_description").as_str().unwrap_or(""),
                detail("new_description").as_str().unwrap_or(""),
            )),
            ActionType::DescriptionRemoved => {
                Some(format!("📝 {actor} removed the group description"))
            }
            ActionType::AdminOnlyChanged => {
                if detail("admin_only").as_bool().unwrap_or(false) {
                    Some(format!("🔒 {actor} restricted messaging to admins only"))
                } else {
                    Some(format!("🔓 {actor} allowed all members to send messages"))
                }
            }
            ActionType::RoleChanged | ActionType::GroupDeleted => None,
        }
    }
}

/// Persist the audit row and, where defined, synthesize the system message
/// into the group room. Best-effort: failures are logged and never roll back
/// the mutation this describes.
pub async fn record_activity(state: &CoreState, event: ActivityEvent) {
    let core = state.clone();
    let audit = event.clone();
    let persisted = tokio::task::spawn_blocking(move || {
        let details = audit.details.as_ref().map(|d| d.to_string());
        core.db.insert_activity(
            audit.group_id,
            audit.action.as_str(),
            &audit.actor,
            audit.target.as_deref(),
            details.as_deref(),
        )
    })
    .await;
    match persisted {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!("audit write failed for group {}: {}", event.group_id, e),
        Err(e) => warn!("audit write task failed: {}", e),
    }

    let Some(text) = event.system_text() else {
        return;
    };
    let token = match state.cipher.encrypt(&text) {
        Ok(token) => token,
        Err(e) => {
            warn!("system message encryption failed: {}", e);
            return;
        }
    };
    let scope = RecipientSet::Group(event.group_id);
    let new = NewMessage {
        sender: SYSTEM_SENDER.to_string(),
        recipients: scope.descriptor(),
        content: Some(token),
        file_id: None,
        reply_to: None,
        group_id: Some(event.group_id),
    };
    if let Err(e) = messages::persist_and_fanout(state, scope, new).await {
        warn!(
            "system message synthesis failed for group {}: {}",
            event.group_id, e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanchat_db::Database;

    fn seeded() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let (gid, _) = create_group(
            &db,
            "Alice",
            "ops",
            None,
            &["Alice".into(), "Bob".into(), "Carol".into()],
            &[],
        )
        .unwrap();
        (db, gid)
    }

    #[test]
    fn creator_is_always_an_admin_member() {
        let (db, gid) = seeded();
        let creator = db.get_member(gid, "Alice").unwrap().unwrap();
        assert!(creator.is_admin);
        assert_eq!(creator.role, "admin");
        assert_eq!(db.admin_count(gid).unwrap(), 1);
    }

    #[test]
    fn admin_only_posting_rejects_plain_members() {
        let (db, gid) = seeded();
        db.set_group_admin_only(gid, true).unwrap();

        assert!(matches!(
            authorize_post(&db, gid, "Bob"),
            Err(ChatError::Policy(_))
        ));
        assert!(authorize_post(&db, gid, "Alice").is_ok());

        db.set_group_admin_only(gid, false).unwrap();
        assert!(authorize_post(&db, gid, "Bob").is_ok());
    }

    #[test]
    fn posting_to_missing_group_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            authorize_post(&db, 404, "Alice"),
            Err(ChatError::NotFound(_))
        ));
    }

    #[test]
    fn last_admin_cannot_leave_without_replacement() {
        let (db, gid) = seeded();

        assert!(matches!(
            leave_group(&db, gid, "Alice"),
            Err(ChatError::Policy(_))
        ));

        set_admin(&db, gid, "Alice", "Bob", true).unwrap();
        leave_group(&db, gid, "Alice").unwrap();
        assert!(db.get_member(gid, "Alice").unwrap().is_none());
        assert_eq!(db.admin_count(gid).unwrap(), 1);
    }

    #[test]
    fn creator_role_cannot_drop_below_admin() {
        let (db, gid) = seeded();
        set_admin(&db, gid, "Alice", "Bob", true).unwrap();

        assert!(matches!(
            set_admin(&db, gid, "Bob", "Alice", false),
            Err(ChatError::Policy(_))
        ));
        assert!(matches!(
            set_role(&db, gid, "Bob", "Alice", Role::Moderator),
            Err(ChatError::Policy(_))
        ));
    }

    #[test]
    fn role_and_admin_flag_stay_consistent() {
        let (db, gid) = seeded();

        let (bob, _) = set_role(&db, gid, "Alice", "Bob", Role::Admin).unwrap();
        assert!(bob.is_admin);
        assert_eq!(bob.role, "admin");

        let (bob, _) = set_role(&db, gid, "Alice", "Bob", Role::Moderator).unwrap();
        assert!(!bob.is_admin);
        assert_eq!(bob.role, "moderator");

        let (carol, _) = set_admin(&db, gid, "Alice", "Carol", true).unwrap();
        assert!(carol.is_admin);
        assert_eq!(carol.role, "admin");
    }

    #[test]
    fn non_admins_cannot_mutate_membership() {
        let (db, gid) = seeded();
        assert!(matches!(
            add_member(&db, gid, "Bob", "Dave"),
            Err(ChatError::Policy(_))
        ));
        assert!(matches!(
            remove_member(&db, gid, "Bob", "Carol"),
            Err(ChatError::Policy(_))
        ));
    }

    #[test]
    fn update_group_emits_one_event_per_changed_field() {
        let (db, gid) = seeded();

        let events = update_group(
            &db,
            gid,
            "Alice",
            Some("ops-2"),
            Some("the ops room"),
            None,
            Some(true),
        )
        .unwrap();
        let actions: Vec<&str> = events.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(
            actions,
            vec!["group_name_changed", "description_added", "admin_only_changed"]
        );

        // unchanged fields are silent
        let events = update_group(&db, gid, "Alice", Some("ops-2"), None, None, Some(true)).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn only_some_actions_render_in_chat() {
        let ev = ActivityEvent {
            group_id: 1,
            action: ActionType::RoleChanged,
            actor: "Alice".into(),
            target: Some("Bob".into()),
            details: None,
        };
        assert!(ev.system_text().is_none());

        let ev = ActivityEvent {
            group_id: 1,
            action: ActionType::AdminOnlyChanged,
            actor: "Alice".into(),
            target: None,
            details: Some(json!({ "admin_only": true })),
        };
        assert_eq!(
            ev.system_text().unwrap(),
            "🔒 Alice restricted messaging to admins only"
        );
    }
}
