use axum::extract::{Path, State};
use axum::{Extension, Json};

use lanchat_gateway::{CoreState, messages};
use lanchat_types::api::{Claims, ClearChatRequest, ClearGroupChatRequest, DeleteMessageResponse};

use crate::error::ApiResult;

/// Sender or admin: hard delete for everyone. Recipient: hide for self.
pub async fn delete_message(
    State(state): State<CoreState>,
    Extension(claims): Extension<Claims>,
    Path(msg_id): Path<i64>,
) -> ApiResult<Json<DeleteMessageResponse>> {
    let mode = messages::delete_message(&state, &claims.sub, claims.is_admin, msg_id).await?;
    Ok(Json(DeleteMessageResponse { mode }))
}

/// Soft-clear a pair chat for the caller only.
pub async fn clear_chat(
    State(state): State<CoreState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ClearChatRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let ids = messages::clear_pair_chat(&state, &claims.sub, &req.user).await?;
    Ok(Json(serde_json::json!({ "success": true, "cleared": ids.len() })))
}

/// Soft-clear a group room for the caller only (members only).
pub async fn clear_group_chat(
    State(state): State<CoreState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ClearGroupChatRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let ids = messages::clear_group_chat(&state, &claims.sub, req.group_id).await?;
    Ok(Json(serde_json::json!({ "success": true, "cleared": ids.len() })))
}
