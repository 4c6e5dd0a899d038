use lanchat_db::{ChatError, ChatResult};
use lanchat_types::events::ServerEvent;
use lanchat_types::models::Reactions;
use lanchat_types::room::RecipientSet;

use crate::messages::parse_reactions;
use crate::{CoreState, join_err};

/// Stateless coordinator over store mutations: apply the reaction or read
/// delta, then broadcast just the delta to the original message's recipient
/// set.
pub async fn toggle_reaction(
    state: &CoreState,
    actor: &str,
    msg_id: i64,
    emoji: &str,
    add: bool,
) -> ChatResult<()> {
    let core = state.clone();
    let actor_owned = actor.to_string();
    let emoji_owned = emoji.to_string();

    let delta = tokio::task::spawn_blocking(
        move || -> ChatResult<Option<(RecipientSet, String, Reactions)>> {
            let row = core
                .db
                .get_message(msg_id)?
                .ok_or(ChatError::NotFound("message"))?;
            let scope = RecipientSet::parse(&row.recipients).map_err(ChatError::Validation)?;

            let mut reactions = parse_reactions(row.id, row.reactions.as_deref());
            let changed = if add {
                reactions.add(&emoji_owned, &actor_owned)
            } else {
                reactions.remove(&emoji_owned, &actor_owned)
            };

            if changed {
                let json = if reactions.is_empty() {
                    None
                } else {
                    Some(serde_json::to_string(&reactions)?)
                };
                core.db.set_reactions(msg_id, json.as_deref())?;
            }

            // A duplicate add still echoes current state; a no-op remove
            // stays silent.
            if changed || add {
                Ok(Some((scope, row.sender, reactions)))
            } else {
                Ok(None)
            }
        },
    )
    .await
    .map_err(join_err)??;

    if let Some((scope, sender, reactions)) = delta {
        let _guard = state.dispatcher.lock_room(&scope).await;
        state
            .dispatcher
            .deliver(
                &scope,
                Some(&sender),
                ServerEvent::UpdateReactions { msg_id, reactions },
            )
            .await;
    }
    Ok(())
}

/// Mark a message read on behalf of `actor` and notify the message's
/// recipient set. Senders cannot read their own messages; repeat reads are
/// silent.
pub async fn mark_read(state: &CoreState, actor: &str, msg_id: i64) -> ChatResult<()> {
    let core = state.clone();
    let actor_owned = actor.to_string();

    let delta = tokio::task::spawn_blocking(move || -> ChatResult<Option<(RecipientSet, String)>> {
        let row = core
            .db
            .get_message(msg_id)?
            .ok_or(ChatError::NotFound("message"))?;
        let scope = RecipientSet::parse(&row.recipients).map_err(ChatError::Validation)?;
        if !scope.names_user(&actor_owned) {
            return Ok(None);
        }
        if core.db.mark_read(msg_id, &actor_owned)? {
            Ok(Some((scope, row.sender)))
        } else {
            Ok(None)
        }
    })
    .await
    .map_err(join_err)??;

    if let Some((scope, sender)) = delta {
        let _guard = state.dispatcher.lock_room(&scope).await;
        state
            .dispatcher
            .deliver(&scope, Some(&sender), ServerEvent::MessageRead { msg_id })
            .await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use lanchat_crypto::{MessageCipher, keys::generate_key};
    use lanchat_db::Database;
    use lanchat_types::models::MessageStatus;

    use crate::dispatcher::Dispatcher;
    use crate::registry::Registry;
    use crate::{CoreStateInner, messages};

    fn test_state() -> CoreState {
        Arc::new(CoreStateInner {
            db: Database::open_in_memory().unwrap(),
            cipher: MessageCipher::new(&generate_key()),
            dispatcher: Dispatcher::new(Registry::new()),
            upload_dir: std::env::temp_dir(),
            jwt_secret: "test-secret".into(),
        })
    }

    async fn seeded_message(state: &CoreState) -> i64 {
        messages::send_message(state, "Alice", "Bob", Some("hello".into()), None, None)
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn reaction_toggle_is_idempotent_per_user() {
        let state = test_state();
        let id = seeded_message(&state).await;

        toggle_reaction(&state, "Bob", id, "👍", true).await.unwrap();
        toggle_reaction(&state, "Bob", id, "👍", true).await.unwrap();

        let row = state.db.get_message(id).unwrap().unwrap();
        let reactions = parse_reactions(id, row.reactions.as_deref());
        assert_eq!(reactions.0["👍"], vec!["Bob".to_string()]);
    }

    #[tokio::test]
    async fn removing_last_reaction_clears_the_column() {
        let state = test_state();
        let id = seeded_message(&state).await;

        toggle_reaction(&state, "Bob", id, "🎉", true).await.unwrap();
        toggle_reaction(&state, "Bob", id, "🎉", false).await.unwrap();

        let row = state.db.get_message(id).unwrap().unwrap();
        assert!(row.reactions.is_none());
    }

    #[tokio::test]
    async fn removing_missing_reaction_is_silent() {
        let state = test_state();
        let registry = state.dispatcher.registry().clone();
        let id = seeded_message(&state).await;
        let (_b, mut bob_rx) = registry.register("Bob").await;

        toggle_reaction(&state, "Bob", id, "👍", false).await.unwrap();
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reaction_delta_reaches_the_original_recipients() {
        let state = test_state();
        let registry = state.dispatcher.registry().clone();
        let id = seeded_message(&state).await;
        let (_a, mut alice_rx) = registry.register("Alice").await;
        let (_b, mut bob_rx) = registry.register("Bob").await;
        let (_c, mut carol_rx) = registry.register("Carol").await;

        toggle_reaction(&state, "Bob", id, "👍", true).await.unwrap();

        // delta, not the whole message, to sender and recipient; no one else
        match alice_rx.try_recv().unwrap() {
            ServerEvent::UpdateReactions { msg_id, reactions } => {
                assert_eq!(msg_id, id);
                assert_eq!(reactions.0["👍"], vec!["Bob".to_string()]);
            }
            other => panic!("expected update_reactions, got {other:?}"),
        }
        assert!(matches!(
            bob_rx.try_recv().unwrap(),
            ServerEvent::UpdateReactions { .. }
        ));
        assert!(carol_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn read_receipt_flows_back_to_the_sender() {
        let state = test_state();
        let registry = state.dispatcher.registry().clone();
        let id = seeded_message(&state).await;
        let (_a, mut alice_rx) = registry.register("Alice").await;

        mark_read(&state, "Bob", id).await.unwrap();

        let row = state.db.get_message(id).unwrap().unwrap();
        assert_eq!(MessageStatus::parse(&row.status), MessageStatus::Read);
        assert!(matches!(
            alice_rx.try_recv().unwrap(),
            ServerEvent::MessageRead { msg_id } if msg_id == id
        ));

        // second read is silent
        mark_read(&state, "Bob", id).await.unwrap();
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn sender_cannot_mark_their_own_message_read() {
        let state = test_state();
        let id = seeded_message(&state).await;

        mark_read(&state, "Alice", id).await.unwrap();

        let row = state.db.get_message(id).unwrap().unwrap();
        assert_eq!(MessageStatus::parse(&row.status), MessageStatus::Sent);
    }
}
