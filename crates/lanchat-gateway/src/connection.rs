use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};

use lanchat_db::ChatError;
use lanchat_types::events::{ClientCommand, ErrorKind, ServerEvent};
use lanchat_types::room::RoomKey;

use crate::registry::ConnId;
use crate::{CoreState, messages, tracker};

/// Handle one pre-authenticated WebSocket connection. The session token was
/// validated at the HTTP upgrade, so the connection goes straight into the
/// event loop.
pub async fn handle_connection(socket: WebSocket, state: CoreState, username: String) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let registry = state.dispatcher.registry().clone();

    let (conn_id, mut event_rx) = registry.register(&username).await;
    info!("{} connected ({})", username, conn_id);

    set_online(&state, &username, true).await;
    state.dispatcher.broadcast_user_list().await;

    // Forward queued events to the socket.
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let text = serde_json::to_string(&event).unwrap();
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Read commands from the client.
    let recv_state = state.clone();
    let recv_username = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&recv_state, conn_id, &recv_username, cmd).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            recv_username,
                            e,
                            &text[..text.len().min(200)]
                        );
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Prompt cancellation: out of every room and the online set before
    // anyone can attempt another delivery.
    if let Some((name, last)) = registry.unregister(conn_id).await {
        if last {
            set_online(&state, &name, false).await;
        }
    }
    state.dispatcher.broadcast_user_list().await;
    info!("{} disconnected ({})", username, conn_id);
}

async fn handle_command(state: &CoreState, conn_id: ConnId, username: &str, cmd: ClientCommand) {
    match cmd {
        ClientCommand::SendMessage {
            recipients,
            content,
            file_id,
            reply_to,
        } => {
            if let Err(e) =
                messages::send_message(state, username, &recipients, content, file_id, reply_to)
                    .await
            {
                report(state, conn_id, username, e).await;
            }
        }

        ClientCommand::ReactMessage { msg_id, emoji } => {
            if let Err(e) = tracker::toggle_reaction(state, username, msg_id, &emoji, true).await {
                report(state, conn_id, username, e).await;
            }
        }

        ClientCommand::RemoveReaction { msg_id, emoji } => {
            if let Err(e) = tracker::toggle_reaction(state, username, msg_id, &emoji, false).await {
                report(state, conn_id, username, e).await;
            }
        }

        ClientCommand::MessageRead { msg_id } => {
            if let Err(e) = tracker::mark_read(state, username, msg_id).await {
                report(state, conn_id, username, e).await;
            }
        }

        ClientCommand::Typing { to } => typing(state, username, &to, true).await,
        ClientCommand::StopTyping { to } => typing(state, username, &to, false).await,

        ClientCommand::Join { room } => match RoomKey::parse(&room) {
            Ok(key) => state.dispatcher.registry().join(conn_id, key).await,
            Err(e) => report(state, conn_id, username, ChatError::Validation(e)).await,
        },

        ClientCommand::Leave { room } => match RoomKey::parse(&room) {
            Ok(key) => state.dispatcher.registry().leave(conn_id, &key).await,
            Err(e) => report(state, conn_id, username, ChatError::Validation(e)).await,
        },
    }
}

/// Typing indicators are ephemeral: resolved like any other scoped event but
/// never persisted. Group typing is not echoed back to the typist.
async fn typing(state: &CoreState, from: &str, to: &str, show: bool) {
    let Ok(key) = RoomKey::parse(to) else {
        return;
    };
    match key {
        RoomKey::Group(group_id) => {
            let room = format!("group-{group_id}");
            let event = if show {
                ServerEvent::ShowTyping {
                    from: from.to_string(),
                    room: Some(room),
                }
            } else {
                ServerEvent::HideTyping {
                    from: from.to_string(),
                    room: Some(room),
                }
            };
            state
                .dispatcher
                .deliver_to_room_except(&RoomKey::Group(group_id), from, event)
                .await;
        }
        RoomKey::Named(user) => {
            let event = if show {
                ServerEvent::ShowTyping {
                    from: from.to_string(),
                    room: None,
                }
            } else {
                ServerEvent::HideTyping {
                    from: from.to_string(),
                    room: None,
                }
            };
            state.dispatcher.deliver_to_user(&user, event).await;
        }
    }
}

/// Errors surface only on the originating connection.
async fn report(state: &CoreState, conn_id: ConnId, username: &str, err: ChatError) {
    let kind = match &err {
        ChatError::Validation(_) => ErrorKind::Validation,
        ChatError::Policy(_) => ErrorKind::Policy,
        ChatError::NotFound(_) => ErrorKind::NotFound,
        ChatError::Persistence(_) => ErrorKind::Persistence,
    };
    warn!("{}: {}", username, err);
    state
        .dispatcher
        .deliver_to_conn(
            conn_id,
            ServerEvent::Error {
                kind,
                message: err.to_string(),
            },
        )
        .await;
}

async fn set_online(state: &CoreState, username: &str, online: bool) {
    let core = state.clone();
    let name = username.to_string();
    let result = tokio::task::spawn_blocking(move || core.db.set_online(&name, online)).await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("online flag update failed for {}: {}", username, e),
        Err(e) => warn!("online flag task failed: {}", e),
    }
}
