use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};

use lanchat_db::models::parse_timestamp;
use lanchat_db::{ChatError, ChatResult};
use lanchat_gateway::{CoreState, policy};
use lanchat_types::api::{
    ActivityEntry, Claims, CreateGroupRequest, CreateGroupResponse, GroupFileEntry, GroupInfo,
    GroupMemberInfo, GroupSummary, MemberRequest, MutedResponse, NotificationPreferenceRequest,
    PinRequest, PinnedEntry, SetAdminRequest, SetRoleRequest, UpdateGroupRequest,
};
use lanchat_types::events::ServerEvent;
use lanchat_types::models::{NotificationPreference, Role};
use lanchat_types::room::RecipientSet;

use crate::blocking;
use crate::error::ApiResult;

pub async fn create_group(
    State(state): State<CoreState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateGroupRequest>,
) -> ApiResult<(StatusCode, Json<CreateGroupResponse>)> {
    let core = state.clone();
    let actor = claims.sub.clone();
    let (group_id, events) = blocking(move || {
        policy::create_group(
            &core.db,
            &actor,
            &req.name,
            req.description.as_deref(),
            &req.members,
            &req.admins,
        )
    })
    .await?;

    for event in events {
        policy::record_activity(&state, event).await;
    }
    Ok((StatusCode::CREATED, Json(CreateGroupResponse { group_id })))
}

/// Groups the caller belongs to.
pub async fn my_groups(
    State(state): State<CoreState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<GroupSummary>>> {
    let core = state.clone();
    let viewer = claims.sub;
    let groups = blocking(move || {
        let rows = core.db.groups_for(&viewer)?;
        Ok(rows
            .into_iter()
            .map(|g| GroupSummary {
                id: g.id,
                name: g.name,
                icon: g.icon,
                created_by: g.created_by,
                created_at: parse_timestamp(&g.created_at),
            })
            .collect())
    })
    .await?;
    Ok(Json(groups))
}

pub async fn group_info(
    State(state): State<CoreState>,
    Extension(claims): Extension<Claims>,
    Path(group_id): Path<i64>,
) -> ApiResult<Json<GroupInfo>> {
    let core = state.clone();
    let viewer = claims.sub;
    let info = blocking(move || {
        let group = policy::require_group(&core.db, group_id)?;
        let members = core.db.list_members(group_id)?;
        let is_admin = members
            .iter()
            .any(|m| m.username == viewer && m.is_admin);
        let muted = core.db.is_muted(group_id, &viewer)?;

        Ok(GroupInfo {
            id: group.id,
            name: group.name,
            description: group.description,
            icon: group.icon,
            created_by: group.created_by,
            created_at: parse_timestamp(&group.created_at),
            admin_only: group.admin_only,
            is_admin,
            muted,
            members: members
                .into_iter()
                .map(|m| GroupMemberInfo {
                    username: m.username,
                    is_admin: m.is_admin,
                    role: Role::parse(&m.role).unwrap_or(Role::Member),
                    notification_preference: NotificationPreference::parse(
                        &m.notification_preference,
                    )
                    .unwrap_or(NotificationPreference::All),
                })
                .collect(),
        })
    })
    .await?;
    Ok(Json(info))
}

pub async fn update_group(
    State(state): State<CoreState>,
    Extension(claims): Extension<Claims>,
    Path(group_id): Path<i64>,
    Json(req): Json<UpdateGroupRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let core = state.clone();
    let actor = claims.sub.clone();
    let events = blocking(move || {
        policy::update_group(
            &core.db,
            group_id,
            &actor,
            req.name.as_deref(),
            req.description.as_deref(),
            req.icon.as_deref(),
            req.admin_only,
        )
    })
    .await?;
    for event in events {
        policy::record_activity(&state, event).await;
    }

    let core = state.clone();
    let group = blocking(move || policy::require_group(&core.db, group_id)).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "name": group.name,
        "description": group.description,
        "admin_only": group.admin_only,
    })))
}

pub async fn add_member(
    State(state): State<CoreState>,
    Extension(claims): Extension<Claims>,
    Path(group_id): Path<i64>,
    Json(req): Json<MemberRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let core = state.clone();
    let actor = claims.sub.clone();
    let event =
        blocking(move || policy::add_member(&core.db, group_id, &actor, &req.username)).await?;
    policy::record_activity(&state, event).await;
    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn remove_member(
    State(state): State<CoreState>,
    Extension(claims): Extension<Claims>,
    Path(group_id): Path<i64>,
    Json(req): Json<MemberRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let core = state.clone();
    let actor = claims.sub.clone();
    let event =
        blocking(move || policy::remove_member(&core.db, group_id, &actor, &req.username)).await?;
    policy::record_activity(&state, event).await;
    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn set_admin(
    State(state): State<CoreState>,
    Extension(claims): Extension<Claims>,
    Path(group_id): Path<i64>,
    Json(req): Json<SetAdminRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let core = state.clone();
    let actor = claims.sub.clone();
    let (member, event) = blocking(move || {
        policy::set_admin(&core.db, group_id, &actor, &req.username, req.is_admin)
    })
    .await?;
    policy::record_activity(&state, event).await;
    Ok(Json(serde_json::json!({
        "success": true,
        "is_admin": member.is_admin,
        "role": member.role,
    })))
}

pub async fn set_role(
    State(state): State<CoreState>,
    Extension(claims): Extension<Claims>,
    Path(group_id): Path<i64>,
    Json(req): Json<SetRoleRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let core = state.clone();
    let actor = claims.sub.clone();
    let (member, event) =
        blocking(move || policy::set_role(&core.db, group_id, &actor, &req.username, req.role))
            .await?;
    policy::record_activity(&state, event).await;
    Ok(Json(serde_json::json!({
        "success": true,
        "role": member.role,
        "is_admin": member.is_admin,
    })))
}

/// Per-member notification preference; self-serve, no audit entry.
pub async fn set_notification_preference(
    State(state): State<CoreState>,
    Extension(claims): Extension<Claims>,
    Path(group_id): Path<i64>,
    Json(req): Json<NotificationPreferenceRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let core = state.clone();
    let actor = claims.sub;
    let preference = req.preference;
    blocking(move || {
        policy::require_member(&core.db, group_id, &actor)?;
        core.db
            .set_member_preference(group_id, &actor, preference.as_str())
    })
    .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "preference": preference,
    })))
}

pub async fn leave_group(
    State(state): State<CoreState>,
    Extension(claims): Extension<Claims>,
    Path(group_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let core = state.clone();
    let actor = claims.sub.clone();
    let event = blocking(move || policy::leave_group(&core.db, group_id, &actor)).await?;
    policy::record_activity(&state, event).await;
    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn delete_group(
    State(state): State<CoreState>,
    Extension(claims): Extension<Claims>,
    Path(group_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let core = state.clone();
    let actor = claims.sub.clone();
    let event = blocking(move || policy::delete_group(&core.db, group_id, &actor)).await?;
    policy::record_activity(&state, event).await;
    Ok(Json(serde_json::json!({ "success": true })))
}

// -- Mute (UI badge suppression; delivery is unaffected) --

pub async fn mute(
    State(state): State<CoreState>,
    Extension(claims): Extension<Claims>,
    Path(group_id): Path<i64>,
) -> ApiResult<Json<MutedResponse>> {
    let core = state.clone();
    let actor = claims.sub;
    blocking(move || {
        policy::require_group(&core.db, group_id)?;
        core.db.mute_group(group_id, &actor)
    })
    .await?;
    Ok(Json(MutedResponse { muted: true }))
}

pub async fn unmute(
    State(state): State<CoreState>,
    Extension(claims): Extension<Claims>,
    Path(group_id): Path<i64>,
) -> ApiResult<Json<MutedResponse>> {
    let core = state.clone();
    let actor = claims.sub;
    blocking(move || {
        policy::require_group(&core.db, group_id)?;
        core.db.unmute_group(group_id, &actor)
    })
    .await?;
    Ok(Json(MutedResponse { muted: false }))
}

// -- Pins --

fn require_pin_rights(
    db: &lanchat_db::Database,
    group_id: i64,
    actor: &str,
) -> ChatResult<()> {
    let member = policy::require_member(db, group_id, actor)?;
    if !member.is_admin && member.role != Role::Moderator.as_str() {
        return Err(ChatError::policy(
            "only admins and moderators can pin messages",
        ));
    }
    Ok(())
}

pub async fn pin_message(
    State(state): State<CoreState>,
    Extension(claims): Extension<Claims>,
    Path(group_id): Path<i64>,
    Json(req): Json<PinRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let core = state.clone();
    let actor = claims.sub.clone();
    let pin = blocking(move || {
        require_pin_rights(&core.db, group_id, &actor)?;
        let message = core
            .db
            .get_message(req.message_id)?
            .ok_or(ChatError::NotFound("message"))?;
        if message.group_id != Some(group_id) {
            return Err(ChatError::validation(
                "message does not belong to this group",
            ));
        }
        core.db.pin_message(group_id, req.message_id, &actor)
    })
    .await?;

    let pinned_at = parse_timestamp(&pin.pinned_at);
    let scope = RecipientSet::Group(group_id);
    let _guard = state.dispatcher.lock_room(&scope).await;
    state
        .dispatcher
        .deliver(
            &scope,
            None,
            ServerEvent::MessagePinned {
                group_id,
                msg_id: pin.message_id,
                pinned_by: claims.sub.clone(),
                pinned_at,
            },
        )
        .await;
    drop(_guard);

    Ok(Json(serde_json::json!({
        "success": true,
        "pin_id": pin.id,
        "message_id": pin.message_id,
        "pinned_by": pin.pinned_by,
        "pinned_at": pinned_at,
    })))
}

pub async fn unpin_message(
    State(state): State<CoreState>,
    Extension(claims): Extension<Claims>,
    Path(group_id): Path<i64>,
    Json(req): Json<PinRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let core = state.clone();
    let actor = claims.sub.clone();
    blocking(move || {
        require_pin_rights(&core.db, group_id, &actor)?;
        if !core.db.unpin_message(group_id, req.message_id)? {
            return Err(ChatError::NotFound("pinned message"));
        }
        Ok(())
    })
    .await?;

    let scope = RecipientSet::Group(group_id);
    let _guard = state.dispatcher.lock_room(&scope).await;
    state
        .dispatcher
        .deliver(
            &scope,
            None,
            ServerEvent::MessageUnpinned {
                group_id,
                msg_id: req.message_id,
                unpinned_by: claims.sub.clone(),
            },
        )
        .await;
    drop(_guard);

    Ok(Json(serde_json::json!({
        "success": true,
        "message_id": req.message_id,
        "unpinned_by": claims.sub,
    })))
}

pub async fn pinned_messages(
    State(state): State<CoreState>,
    Extension(claims): Extension<Claims>,
    Path(group_id): Path<i64>,
) -> ApiResult<Json<Vec<PinnedEntry>>> {
    let core = state.clone();
    let viewer = claims.sub;
    let entries = blocking(move || {
        policy::require_member(&core.db, group_id, &viewer)?;
        let pins = core.db.list_pins(group_id)?;
        let mut entries = Vec::with_capacity(pins.len());
        for pin in pins {
            let Some(message) = core.db.get_message(pin.message_id)? else {
                continue;
            };
            entries.push(PinnedEntry {
                pin_id: pin.id,
                message_id: pin.message_id,
                message_sender: message.sender,
                message_content: message
                    .content
                    .as_deref()
                    .map(|token| core.cipher.decrypt_or_fallback(token))
                    .unwrap_or_default(),
                message_timestamp: parse_timestamp(&message.created_at),
                pinned_by: pin.pinned_by,
                pinned_at: parse_timestamp(&pin.pinned_at),
            });
        }
        Ok(entries)
    })
    .await?;
    Ok(Json(entries))
}

// -- Audit & files --

pub async fn activity(
    State(state): State<CoreState>,
    Extension(claims): Extension<Claims>,
    Path(group_id): Path<i64>,
) -> ApiResult<Json<Vec<ActivityEntry>>> {
    let core = state.clone();
    let viewer = claims.sub;
    let entries = blocking(move || {
        policy::require_member(&core.db, group_id, &viewer)?;
        let rows = core.db.list_activity(group_id, 100)?;
        Ok(rows
            .into_iter()
            .map(|row| ActivityEntry {
                id: row.id,
                action_type: row.action_type,
                actor: row.actor,
                target: row.target,
                details: row.details.map(|raw| {
                    serde_json::from_str(&raw)
                        .unwrap_or(serde_json::Value::String(raw))
                }),
                timestamp: parse_timestamp(&row.created_at),
            })
            .collect())
    })
    .await?;
    Ok(Json(entries))
}

pub async fn group_files(
    State(state): State<CoreState>,
    Extension(claims): Extension<Claims>,
    Path(group_id): Path<i64>,
) -> ApiResult<Json<Vec<GroupFileEntry>>> {
    let core = state.clone();
    let viewer = claims.sub;
    let entries = blocking(move || {
        policy::require_member(&core.db, group_id, &viewer)?;
        let rows = core.db.group_files(group_id)?;
        Ok(rows
            .into_iter()
            .map(|row| GroupFileEntry {
                file_id: row.file.id,
                original_name: row.file.original_name,
                mimetype: row.file.mimetype,
                uploader: row.file.uploader,
                message_id: row.message_id,
                message_timestamp: parse_timestamp(&row.message_created_at),
            })
            .collect())
    })
    .await?;
    Ok(Json(entries))
}
