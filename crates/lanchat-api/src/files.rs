use std::path::Path as FsPath;

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use tracing::warn;
use uuid::Uuid;

use lanchat_db::models::parse_timestamp;
use lanchat_db::{ChatError, ChatResult};
use lanchat_gateway::CoreState;
use lanchat_types::api::{Claims, FileEntry, UploadResponse};
use lanchat_types::events::ServerEvent;
use lanchat_types::room::RecipientSet;

use crate::blocking;
use crate::error::{ApiError, ApiResult};

/// Accept a multipart upload, store the blob on disk, record its metadata.
/// Messages reference the returned `file_id`.
pub async fn upload(
    State(state): State<CoreState>,
    Extension(claims): Extension<Claims>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let field = multipart
        .next_field()
        .await
        .map_err(|e| ApiError(ChatError::validation(format!("bad multipart body: {e}"))))?
        .ok_or_else(|| ApiError(ChatError::validation("no file part")))?;

    let original_name = field.file_name().unwrap_or("").to_string();
    if original_name.is_empty() {
        return Err(ApiError(ChatError::validation("no file selected")));
    }
    let mimetype = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();
    let bytes = field
        .bytes()
        .await
        .map_err(|e| ApiError(ChatError::validation(format!("upload read failed: {e}"))))?;
    if bytes.is_empty() {
        return Err(ApiError(ChatError::validation("empty file")));
    }

    let filename = unique_filename(&state.upload_dir, &original_name);
    tokio::fs::create_dir_all(&state.upload_dir)
        .await
        .map_err(|e| ApiError(ChatError::Persistence(format!("upload dir: {e}"))))?;
    tokio::fs::write(state.upload_dir.join(&filename), &bytes)
        .await
        .map_err(|e| ApiError(ChatError::Persistence(format!("upload write: {e}"))))?;

    let core = state.clone();
    let uploader = claims.sub.clone();
    let stored = filename.clone();
    let original = original_name.clone();
    let mime = mimetype.clone();
    let file_id =
        blocking(move || core.db.insert_file(&stored, &original, &uploader, &mime)).await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            file_id,
            filename,
            original_name,
            mimetype,
        }),
    ))
}

/// Sanitize the client-supplied name and dodge collisions with a short
/// random suffix.
fn unique_filename(dir: &FsPath, original: &str) -> String {
    let base = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original)
        .replace(
            |c: char| !(c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_'),
            "_",
        );
    if !dir.join(&base).exists() {
        return base;
    }
    let id = Uuid::new_v4().simple().to_string();
    let suffix = &id[..8];
    match base.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}_{suffix}.{ext}"),
        None => format!("{base}_{suffix}"),
    }
}

/// Files visible to the caller; admins see everything.
pub async fn list_files(
    State(state): State<CoreState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<FileEntry>>> {
    let core = state.clone();
    let entries = blocking(move || {
        let rows = if claims.is_admin {
            core.db.list_files()?
        } else {
            core.db.list_files_for(&claims.sub)?
        };
        Ok(rows
            .into_iter()
            .map(|f| FileEntry {
                file_id: f.id,
                filename: f.filename,
                original_name: f.original_name,
                mimetype: f.mimetype,
                uploader: f.uploader,
                timestamp: parse_timestamp(&f.created_at),
            })
            .collect())
    })
    .await?;
    Ok(Json(entries))
}

/// Delete a file and every message referencing it. Each affected message's
/// recipients get a `message_deleted` event, exactly once per connection.
pub async fn delete_file(
    State(state): State<CoreState>,
    Extension(claims): Extension<Claims>,
    Path(file_id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let core = state.clone();
    let actor = claims.sub.clone();
    let is_admin = claims.is_admin;

    let affected = blocking(move || {
        let file = core
            .db
            .get_file(file_id)?
            .ok_or(ChatError::NotFound("file"))?;
        let referencing = core.db.messages_with_file(file_id)?;
        ensure_file_delete_allowed(&core, &file.uploader, is_admin, &actor, &referencing)?;

        let path = core.upload_dir.join(&file.filename);
        if let Err(e) = std::fs::remove_file(&path) {
            warn!("failed to remove upload {}: {}", path.display(), e);
        }

        let affected: Vec<(i64, String, String, Option<i64>)> = referencing
            .iter()
            .map(|m| (m.id, m.sender.clone(), m.recipients.clone(), m.group_id))
            .collect();
        core.db.delete_messages_with_file(file_id)?;
        core.db.delete_file_row(file_id)?;
        Ok(affected)
    })
    .await?;

    for (msg_id, sender, recipients, group_id) in affected {
        let Ok(scope) = RecipientSet::parse(&recipients) else {
            continue;
        };
        let event = ServerEvent::MessageDeleted {
            msg_id,
            sender: sender.clone(),
            recipients,
            group_id,
            deleted_by: claims.sub.clone(),
        };
        let _guard = state.dispatcher.lock_room(&scope).await;
        state.dispatcher.deliver(&scope, Some(&sender), event).await;
    }

    Ok(Json(serde_json::json!({ "success": true })))
}

/// Uploader, admin, or anyone involved in a message carrying the file (for
/// group messages, any member of that group).
fn ensure_file_delete_allowed(
    core: &CoreState,
    uploader: &str,
    is_admin: bool,
    actor: &str,
    referencing: &[lanchat_db::models::MessageRow],
) -> ChatResult<()> {
    if is_admin || uploader == actor {
        return Ok(());
    }
    for msg in referencing {
        if msg.sender == actor {
            return Ok(());
        }
        match RecipientSet::parse(&msg.recipients) {
            Ok(RecipientSet::Group(group_id)) => {
                if core.db.get_member(group_id, actor)?.is_some() {
                    return Ok(());
                }
            }
            Ok(scope) if scope.names_user(actor) => return Ok(()),
            _ => {}
        }
    }
    Err(ChatError::policy("not allowed to delete this file"))
}
