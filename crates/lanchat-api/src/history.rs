use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::{Extension, Json};

use lanchat_gateway::{CoreState, messages};
use lanchat_types::api::{Claims, HistoryQuery, MarkReadRequest, MarkReadResponse, UnreadCounts};
use lanchat_types::models::MessagePayload;
use lanchat_types::room::RoomKey;

use crate::blocking;
use crate::error::ApiResult;

/// Replayable history: up to 50 entries for a pair chat, self view, or group
/// room, oldest first, with the viewer's hidden messages excluded.
pub async fn history(
    State(state): State<CoreState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<MessagePayload>>> {
    const HISTORY_LIMIT: u32 = 50;

    let core = state.clone();
    let viewer = claims.sub;
    let payloads = blocking(move || {
        let rows = if let Some(group_id) = query.group_id {
            core.db.history_group(&viewer, group_id, HISTORY_LIMIT)?
        } else if let Some(user) = query.user.as_deref() {
            // "group-<id>" is accepted here too for room-style queries
            match RoomKey::parse(user) {
                Ok(RoomKey::Group(group_id)) => {
                    core.db.history_group(&viewer, group_id, HISTORY_LIMIT)?
                }
                _ if user == viewer => core.db.history_self(&viewer, HISTORY_LIMIT)?,
                _ => core.db.history_pair(&viewer, user, HISTORY_LIMIT)?,
            }
        } else {
            core.db.history_self(&viewer, HISTORY_LIMIT)?
        };

        // storage order is newest-first; display wants oldest-first
        let mut payloads = messages::hydrate_rows(&core.db, &core.cipher, &rows)?;
        payloads.reverse();
        Ok(payloads)
    })
    .await?;

    Ok(Json(payloads))
}

/// Bulk read transition for a whole pair chat or group room.
pub async fn mark_read(
    State(state): State<CoreState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MarkReadRequest>,
) -> ApiResult<Json<MarkReadResponse>> {
    let core = state.clone();
    let reader = claims.sub;
    let marked = blocking(move || {
        if let Some(other) = req.user.as_deref() {
            core.db.mark_read_pair(&reader, other)
        } else if let Some(group_id) = req.group_id {
            core.db.mark_read_group(&reader, group_id)
        } else {
            Err(lanchat_db::ChatError::validation(
                "no chat or group specified",
            ))
        }
    })
    .await?;
    Ok(Json(MarkReadResponse { marked }))
}

/// Per-peer and per-group unread badges, hidden-aware.
pub async fn unread_counts(
    State(state): State<CoreState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<UnreadCounts>> {
    let core = state.clone();
    let viewer = claims.sub;
    let counts = blocking(move || {
        let mut individual_badges: HashMap<String, usize> = HashMap::new();
        let unread = core.db.unread_private(&viewer)?;
        let chats = unread.len();
        for msg in &unread {
            *individual_badges.entry(msg.sender.clone()).or_default() += 1;
        }

        let group_ids = core.db.member_group_ids(&viewer)?;
        let mut group_badges: HashMap<String, usize> = HashMap::new();
        let mut groups = 0;
        for (group_id, count) in core.db.unread_group_counts(&viewer, &group_ids)? {
            groups += count;
            group_badges.insert(group_id.to_string(), count);
        }

        Ok(UnreadCounts {
            chats,
            groups,
            individual_badges,
            group_badges,
        })
    })
    .await?;
    Ok(Json(counts))
}
