use tracing::warn;

use lanchat_crypto::MessageCipher;
use lanchat_db::models::{MessageRow, NewMessage, parse_timestamp};
use lanchat_db::{ChatError, ChatResult, Database};
use lanchat_types::api::DeleteMode;
use lanchat_types::events::ServerEvent;
use lanchat_types::models::{FileInfo, MessagePayload, MessageStatus, Reactions, ReplyPreview};
use lanchat_types::room::RecipientSet;

use crate::{CoreState, join_err, policy};

/// Authorize, persist, and fan out a client message. Returns the payload
/// that was delivered.
pub async fn send_message(
    state: &CoreState,
    sender: &str,
    recipients: &str,
    content: Option<String>,
    file_id: Option<i64>,
    reply_to: Option<i64>,
) -> ChatResult<MessagePayload> {
    let scope = RecipientSet::parse(recipients).map_err(ChatError::Validation)?;

    if let RecipientSet::Group(group_id) = scope {
        let core = state.clone();
        let sender = sender.to_string();
        tokio::task::spawn_blocking(move || {
            policy::authorize_post(&core.db, group_id, &sender).map(|_| ())
        })
        .await
        .map_err(join_err)??;
    }

    let token = match content.as_deref().filter(|c| !c.is_empty()) {
        Some(plain) => Some(
            state
                .cipher
                .encrypt(plain)
                .map_err(|e| ChatError::Persistence(e.to_string()))?,
        ),
        None => None,
    };

    let new = NewMessage {
        sender: sender.to_string(),
        recipients: scope.descriptor(),
        content: token,
        file_id,
        reply_to,
        group_id: scope.group_id(),
    };
    persist_and_fanout(state, scope, new).await
}

/// Append under the room's ordering lock, then enqueue the
/// `receive_message` event while still holding it. Every subscriber of the
/// room observes events in persisted order.
pub(crate) async fn persist_and_fanout(
    state: &CoreState,
    scope: RecipientSet,
    new: NewMessage,
) -> ChatResult<MessagePayload> {
    let _guard = state.dispatcher.lock_room(&scope).await;

    let core = state.clone();
    let payload = tokio::task::spawn_blocking(move || -> ChatResult<MessagePayload> {
        let id = core.db.append_message(&new)?;
        let row = core
            .db
            .get_message(id)?
            .ok_or_else(|| ChatError::Persistence("appended message vanished".into()))?;
        hydrate_row(&core.db, &core.cipher, &row)
    })
    .await
    .map_err(join_err)??;

    state
        .dispatcher
        .deliver(
            &scope,
            Some(&payload.sender),
            ServerEvent::ReceiveMessage(payload.clone()),
        )
        .await;
    Ok(payload)
}

enum DeleteOutcome {
    Hard {
        scope: RecipientSet,
        sender: String,
        group_id: Option<i64>,
    },
    Soft {
        sender: String,
        recipients: String,
        group_id: Option<i64>,
    },
}

/// Sender or admin: hard-delete for everyone (file blob included).
/// A named recipient: hide for themselves only.
pub async fn delete_message(
    state: &CoreState,
    actor: &str,
    actor_is_admin: bool,
    msg_id: i64,
) -> ChatResult<DeleteMode> {
    let core = state.clone();
    let actor_owned = actor.to_string();
    let outcome = tokio::task::spawn_blocking(move || -> ChatResult<DeleteOutcome> {
        let row = core
            .db
            .get_message(msg_id)?
            .ok_or(ChatError::NotFound("message"))?;
        let scope = RecipientSet::parse(&row.recipients).map_err(ChatError::Validation)?;

        if actor_owned == row.sender || actor_is_admin {
            core.db.delete_message_cascade(msg_id)?;
            if let Some(file_id) = row.file_id {
                remove_file_if_unreferenced(&core, file_id);
            }
            return Ok(DeleteOutcome::Hard {
                scope,
                sender: row.sender,
                group_id: row.group_id,
            });
        }

        if scope.names_user(&actor_owned) {
            core.db.hide_message(msg_id, &actor_owned)?;
            return Ok(DeleteOutcome::Soft {
                sender: row.sender,
                recipients: row.recipients,
                group_id: row.group_id,
            });
        }

        Err(ChatError::policy("not allowed to delete this message"))
    })
    .await
    .map_err(join_err)??;

    match outcome {
        DeleteOutcome::Hard {
            scope,
            sender,
            group_id,
        } => {
            let event = ServerEvent::MessageDeleted {
                msg_id,
                sender: sender.clone(),
                recipients: scope.descriptor(),
                group_id,
                deleted_by: actor.to_string(),
            };
            let _guard = state.dispatcher.lock_room(&scope).await;
            state.dispatcher.deliver(&scope, Some(&sender), event).await;
            Ok(DeleteMode::Hard)
        }
        DeleteOutcome::Soft {
            sender,
            recipients,
            group_id,
        } => {
            // visibility change for this viewer only
            state
                .dispatcher
                .deliver_to_user(
                    actor,
                    ServerEvent::MessageDeleted {
                        msg_id,
                        sender,
                        recipients,
                        group_id,
                        deleted_by: actor.to_string(),
                    },
                )
                .await;
            Ok(DeleteMode::Soft)
        }
    }
}

/// Unlink the stored blob and drop the metadata row once nothing references
/// the file. Unlink failures are logged and swallowed; they never fail the
/// delete that triggered them.
fn remove_file_if_unreferenced(core: &CoreState, file_id: i64) {
    let still_referenced = match core.db.messages_with_file(file_id) {
        Ok(rows) => !rows.is_empty(),
        Err(e) => {
            warn!("file reference check failed for {}: {}", file_id, e);
            return;
        }
    };
    if still_referenced {
        return;
    }
    match core.db.get_file(file_id) {
        Ok(Some(file)) => {
            let path = core.upload_dir.join(&file.filename);
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("failed to remove upload {}: {}", path.display(), e);
            }
            if let Err(e) = core.db.delete_file_row(file_id) {
                warn!("failed to remove file row {}: {}", file_id, e);
            }
        }
        Ok(None) => {}
        Err(e) => warn!("file lookup failed for {}: {}", file_id, e),
    }
}

/// Soft-clear a pair chat for the caller and tell only them.
pub async fn clear_pair_chat(state: &CoreState, actor: &str, other: &str) -> ChatResult<Vec<i64>> {
    let core = state.clone();
    let actor_owned = actor.to_string();
    let other_owned = other.to_string();
    let ids = tokio::task::spawn_blocking(move || core.db.hide_pair_chat(&actor_owned, &other_owned))
        .await
        .map_err(join_err)??;

    state
        .dispatcher
        .deliver_to_user(
            actor,
            ServerEvent::ChatCleared {
                cleared_by: actor.to_string(),
                other_user: Some(other.to_string()),
                group_id: None,
                msg_ids: ids.clone(),
            },
        )
        .await;
    Ok(ids)
}

/// Soft-clear a group room for the caller (members only).
pub async fn clear_group_chat(state: &CoreState, actor: &str, group_id: i64) -> ChatResult<Vec<i64>> {
    let core = state.clone();
    let actor_owned = actor.to_string();
    let ids = tokio::task::spawn_blocking(move || {
        policy::require_member(&core.db, group_id, &actor_owned)?;
        core.db.hide_group_chat(&actor_owned, group_id)
    })
    .await
    .map_err(join_err)??;

    state
        .dispatcher
        .deliver_to_user(
            actor,
            ServerEvent::ChatCleared {
                cleared_by: actor.to_string(),
                other_user: None,
                group_id: Some(group_id),
                msg_ids: ids.clone(),
            },
        )
        .await;
    Ok(ids)
}

/// Build the delivery payload for a stored row: decrypt (placeholder on
/// corrupt records), resolve the file reference and reply preview, parse the
/// reaction map.
pub fn hydrate_row(db: &Database, cipher: &MessageCipher, row: &MessageRow) -> ChatResult<MessagePayload> {
    let content = match row.content.as_deref() {
        Some(token) => cipher.decrypt_or_fallback(token),
        None => String::new(),
    };

    let file = match row.file_id {
        Some(file_id) => db.get_file(file_id)?.map(|f| FileInfo {
            filename: f.filename,
            original_name: f.original_name,
            mimetype: f.mimetype,
        }),
        None => None,
    };

    let reply_to = match row.reply_to {
        Some(reply_id) => db.get_message(reply_id)?.map(|reply| ReplyPreview {
            id: reply.id,
            sender: reply.sender,
            content: match reply.content.as_deref() {
                Some(token) => cipher.decrypt_or_fallback(token),
                None => String::new(),
            },
            timestamp: parse_timestamp(&reply.created_at),
        }),
        None => None,
    };

    let reactions = parse_reactions(row.id, row.reactions.as_deref());

    Ok(MessagePayload {
        id: row.id,
        sender: row.sender.clone(),
        recipients: row.recipients.clone(),
        content,
        timestamp: parse_timestamp(&row.created_at),
        file,
        status: MessageStatus::parse(&row.status),
        reply_to,
        reactions,
        group_id: row.group_id,
    })
}

pub fn hydrate_rows(
    db: &Database,
    cipher: &MessageCipher,
    rows: &[MessageRow],
) -> ChatResult<Vec<MessagePayload>> {
    rows.iter().map(|row| hydrate_row(db, cipher, row)).collect()
}

/// Corrupt reaction JSON degrades to an empty map instead of failing the
/// whole payload.
pub(crate) fn parse_reactions(msg_id: i64, raw: Option<&str>) -> Reactions {
    match raw {
        Some(json) => serde_json::from_str(json).unwrap_or_else(|e| {
            warn!("corrupt reactions on message {}: {}", msg_id, e);
            Reactions::new()
        }),
        None => Reactions::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use lanchat_crypto::keys::generate_key;
    use lanchat_types::events::ServerEvent;
    use lanchat_types::room::RoomKey;

    use crate::CoreStateInner;
    use crate::dispatcher::Dispatcher;
    use crate::registry::Registry;

    fn test_state() -> CoreState {
        let registry = Registry::new();
        Arc::new(CoreStateInner {
            db: Database::open_in_memory().unwrap(),
            cipher: MessageCipher::new(&generate_key()),
            dispatcher: Dispatcher::new(registry),
            upload_dir: std::env::temp_dir(),
            jwt_secret: "test-secret".into(),
        })
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut out = vec![];
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn direct_send_echoes_to_sender_and_delivers_once() {
        let state = test_state();
        let registry = state.dispatcher.registry().clone();
        let (_a, mut alice_rx) = registry.register("Alice").await;
        let (_b, mut bob_rx) = registry.register("Bob").await;

        let payload = send_message(&state, "Alice", "Bob", Some("hi".into()), None, None)
            .await
            .unwrap();
        assert_eq!(payload.content, "hi");
        assert_eq!(payload.recipients, "Bob");

        let bob_events = drain(&mut bob_rx);
        assert_eq!(bob_events.len(), 1);
        match &bob_events[0] {
            ServerEvent::ReceiveMessage(p) => assert_eq!(p.content, "hi"),
            other => panic!("expected receive_message, got {other:?}"),
        }
        assert_eq!(drain(&mut alice_rx).len(), 1);
    }

    #[tokio::test]
    async fn group_send_reaches_joined_connections_once() {
        let state = test_state();
        let gid = state.db.create_group("ops", None, None, "Alice").unwrap();
        state.db.add_member(gid, "Alice", true, "admin").unwrap();
        state.db.add_member(gid, "Carol", false, "member").unwrap();

        let registry = state.dispatcher.registry().clone();
        let (carol, mut carol_rx) = registry.register("Carol").await;
        let (_dan, mut dan_rx) = registry.register("Dan").await;
        registry.join(carol, RoomKey::Group(gid)).await;

        let payload = send_message(
            &state,
            "Carol",
            &format!("group-{gid}"),
            Some("standup?".into()),
            None,
            None,
        )
        .await
        .unwrap();
        assert_eq!(payload.group_id, Some(gid));

        assert_eq!(drain(&mut carol_rx).len(), 1);
        assert!(drain(&mut dan_rx).is_empty());
    }

    #[tokio::test]
    async fn admin_only_group_rejects_member_without_persisting() {
        let state = test_state();
        let gid = state.db.create_group("ops", None, None, "Alice").unwrap();
        state.db.add_member(gid, "Alice", true, "admin").unwrap();
        state.db.add_member(gid, "Bob", false, "member").unwrap();
        state.db.set_group_admin_only(gid, true).unwrap();

        let err = send_message(
            &state,
            "Bob",
            &format!("group-{gid}"),
            Some("hello".into()),
            None,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ChatError::Policy(_)));
        assert!(state.db.history_group("Alice", gid, 50).unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_descriptor_is_a_validation_error() {
        let state = test_state();
        let err = send_message(&state, "Alice", "group-zzz", Some("x".into()), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }

    #[tokio::test]
    async fn content_is_stored_encrypted_and_delivered_decrypted() {
        let state = test_state();
        let payload = send_message(&state, "Alice", "Bob", Some("secret".into()), None, None)
            .await
            .unwrap();

        let row = state.db.get_message(payload.id).unwrap().unwrap();
        let stored = row.content.unwrap();
        assert_ne!(stored, "secret");
        assert_eq!(state.cipher.decrypt(&stored).unwrap(), "secret");
        assert_eq!(payload.content, "secret");
    }

    #[tokio::test]
    async fn sender_delete_is_hard_and_notifies_recipients() {
        let state = test_state();
        let registry = state.dispatcher.registry().clone();
        let (_b, mut bob_rx) = registry.register("Bob").await;

        let payload = send_message(&state, "Alice", "Bob", Some("oops".into()), None, None)
            .await
            .unwrap();
        drain(&mut bob_rx);

        let mode = delete_message(&state, "Alice", false, payload.id).await.unwrap();
        assert_eq!(mode, DeleteMode::Hard);
        assert!(state.db.get_message(payload.id).unwrap().is_none());

        let events = drain(&mut bob_rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ServerEvent::MessageDeleted { msg_id, deleted_by, .. } => {
                assert_eq!(*msg_id, payload.id);
                assert_eq!(deleted_by, "Alice");
            }
            other => panic!("expected message_deleted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn recipient_delete_is_a_private_hide() {
        let state = test_state();
        let payload = send_message(&state, "Alice", "Bob", Some("keep".into()), None, None)
            .await
            .unwrap();

        let mode = delete_message(&state, "Bob", false, payload.id).await.unwrap();
        assert_eq!(mode, DeleteMode::Soft);

        // still there for the sender
        assert!(state.db.get_message(payload.id).unwrap().is_some());
        assert_eq!(state.db.history_pair("Alice", "Bob", 50).unwrap().len(), 1);
        assert!(state.db.history_pair("Bob", "Alice", 50).unwrap().is_empty());
    }

    #[tokio::test]
    async fn outsiders_cannot_delete() {
        let state = test_state();
        let payload = send_message(&state, "Alice", "Bob", Some("private".into()), None, None)
            .await
            .unwrap();
        let err = delete_message(&state, "Mallory", false, payload.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Policy(_)));
    }

    #[tokio::test]
    async fn deleting_last_file_reference_removes_the_file() {
        let state = test_state();
        let upload_dir = std::env::temp_dir().join(format!("lanchat-del-{}", std::process::id()));
        std::fs::create_dir_all(&upload_dir).unwrap();
        let state = Arc::new(CoreStateInner {
            db: Database::open_in_memory().unwrap(),
            cipher: MessageCipher::new(&generate_key()),
            dispatcher: state.dispatcher.clone(),
            upload_dir: upload_dir.clone(),
            jwt_secret: "test-secret".into(),
        });

        let file_id = state
            .db
            .insert_file("notes.txt", "notes.txt", "Alice", "text/plain")
            .unwrap();
        std::fs::write(upload_dir.join("notes.txt"), b"hello").unwrap();

        let payload = send_message(&state, "Alice", "Bob", None, Some(file_id), None)
            .await
            .unwrap();
        assert_eq!(payload.file.as_ref().unwrap().filename, "notes.txt");

        delete_message(&state, "Alice", false, payload.id).await.unwrap();

        assert!(state.db.get_file(file_id).unwrap().is_none());
        assert!(!upload_dir.join("notes.txt").exists());
        let _ = std::fs::remove_dir_all(&upload_dir);
    }

    #[tokio::test]
    async fn clear_chat_notifies_only_the_caller() {
        let state = test_state();
        let registry = state.dispatcher.registry().clone();
        let (_a, mut alice_rx) = registry.register("Alice").await;
        let (_b, mut bob_rx) = registry.register("Bob").await;

        send_message(&state, "Alice", "Bob", Some("one".into()), None, None)
            .await
            .unwrap();
        send_message(&state, "Bob", "Alice", Some("two".into()), None, None)
            .await
            .unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        let ids = clear_pair_chat(&state, "Alice", "Bob").await.unwrap();
        assert_eq!(ids.len(), 2);

        let alice_events = drain(&mut alice_rx);
        assert_eq!(alice_events.len(), 1);
        assert!(matches!(alice_events[0], ServerEvent::ChatCleared { .. }));
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[tokio::test]
    async fn hydration_survives_corrupt_content() {
        let state = test_state();
        let id = state
            .db
            .append_message(&NewMessage {
                sender: "Alice".into(),
                recipients: "Bob".into(),
                content: Some("garbage-token".into()),
                file_id: None,
                reply_to: None,
                group_id: None,
            })
            .unwrap();
        let row = state.db.get_message(id).unwrap().unwrap();
        let payload = hydrate_row(&state.db, &state.cipher, &row).unwrap();
        assert_eq!(payload.content, lanchat_crypto::DECRYPT_FALLBACK);
    }
}
