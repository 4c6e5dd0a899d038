use axum::extract::{Path, State};
use axum::{Extension, Json};

use lanchat_gateway::CoreState;
use lanchat_types::api::Claims;
use lanchat_types::models::User;

use crate::auth::require_admin_claims;
use crate::blocking;
use crate::error::ApiResult;

/// Usernames currently online (persisted flag, maintained by the registry).
pub async fn online_users(State(state): State<CoreState>) -> ApiResult<Json<Vec<String>>> {
    let core = state.clone();
    let users = blocking(move || core.db.online_usernames()).await?;
    Ok(Json(users))
}

/// Every user with their online flag.
pub async fn users_status(State(state): State<CoreState>) -> ApiResult<Json<Vec<User>>> {
    let core = state.clone();
    let users = blocking(move || {
        let rows = core.db.list_users()?;
        Ok(rows
            .into_iter()
            .map(|u| User {
                username: u.username,
                online: u.online,
                is_admin: u.is_admin,
            })
            .collect())
    })
    .await?;
    Ok(Json(users))
}

// -- Server-admin user management --

pub async fn promote(
    State(state): State<CoreState>,
    Extension(claims): Extension<Claims>,
    Path(username): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    require_admin_claims(&claims)?;
    let core = state.clone();
    blocking(move || core.db.set_user_admin(&username, true)).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

/// Demote an admin; the last remaining admin is protected.
pub async fn demote(
    State(state): State<CoreState>,
    Extension(claims): Extension<Claims>,
    Path(username): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    require_admin_claims(&claims)?;
    let core = state.clone();
    blocking(move || core.db.set_user_admin(&username, false)).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

/// Delete a non-admin account. Admin accounts are never deletable.
pub async fn delete_user(
    State(state): State<CoreState>,
    Extension(claims): Extension<Claims>,
    Path(username): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    require_admin_claims(&claims)?;
    let core = state.clone();
    blocking(move || core.db.delete_user(&username)).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}
