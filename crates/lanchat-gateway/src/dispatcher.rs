use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

use lanchat_types::events::ServerEvent;
use lanchat_types::room::{RecipientSet, RoomKey};

use crate::registry::{ConnId, EventSender, Registry};

/// Fan-out dispatcher: resolves a persisted event's recipient set to live
/// connections through the registry and enqueues it at most once per
/// connection. It never mutates presence or room state itself.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    registry: Registry,
    /// Per-room ordering locks, keyed by recipient scope. Held across
    /// persist + enqueue so every subscriber of one room observes events in
    /// persisted order; rooms never wait on each other.
    sequencers: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Dispatcher {
    pub fn new(registry: Registry) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                registry,
                sequencers: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Acquire the ordering lock for one room scope.
    pub async fn lock_room(&self, scope: &RecipientSet) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.sequencers.lock().await;
            map.entry(scope.scope_key())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Resolve and deliver. `sender` is the author of the originating
    /// message; for direct scopes their connections receive an echo.
    pub async fn deliver(&self, scope: &RecipientSet, sender: Option<&str>, event: ServerEvent) {
        let registry = &self.inner.registry;
        let mut targets: HashMap<ConnId, EventSender> = HashMap::new();

        match scope {
            RecipientSet::Broadcast => {
                targets.extend(registry.all_senders().await);
            }
            RecipientSet::Group(id) => {
                targets.extend(registry.room_senders(&RoomKey::Group(*id)).await);
            }
            RecipientSet::Direct(names) => {
                for name in names {
                    targets.extend(registry.user_senders(name).await);
                }
                if let Some(sender) = sender {
                    targets.extend(registry.user_senders(sender).await);
                }
            }
        }

        send_all(targets, event);
    }

    pub async fn deliver_to_user(&self, username: &str, event: ServerEvent) {
        let targets: HashMap<ConnId, EventSender> =
            self.inner.registry.user_senders(username).await.into_iter().collect();
        send_all(targets, event);
    }

    pub async fn deliver_to_conn(&self, conn_id: ConnId, event: ServerEvent) {
        if let Some(tx) = self.inner.registry.conn_sender(conn_id).await {
            if tx.send(event).is_err() {
                trace!("connection {} gone before delivery", conn_id);
            }
        }
    }

    /// Room delivery excluding one user (typing indicators).
    pub async fn deliver_to_room_except(&self, room: &RoomKey, except: &str, event: ServerEvent) {
        let targets: HashMap<ConnId, EventSender> = self
            .inner
            .registry
            .room_senders_except(room, except)
            .await
            .into_iter()
            .collect();
        send_all(targets, event);
    }

    /// Push the full online-user list to every connection.
    pub async fn broadcast_user_list(&self) {
        let users = self.inner.registry.online_users().await;
        let targets: HashMap<ConnId, EventSender> =
            self.inner.registry.all_senders().await.into_iter().collect();
        send_all(targets, ServerEvent::UserList { users });
    }
}

/// One attempt per connection; a closed queue is skipped without affecting
/// the rest.
fn send_all(targets: HashMap<ConnId, EventSender>, event: ServerEvent) {
    for (conn_id, tx) in targets {
        if tx.send(event.clone()).is_err() {
            trace!("connection {} gone before delivery", conn_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut out = vec![];
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn direct_delivery_is_at_most_once_per_connection() {
        let registry = Registry::new();
        let dispatcher = Dispatcher::new(registry.clone());
        let (_a, mut alice_rx) = registry.register("Alice").await;
        let (_b, mut bob_rx) = registry.register("Bob").await;

        // Alice is both a named recipient and the sender: one copy only.
        let scope = RecipientSet::Direct(vec!["Bob".into(), "Alice".into()]);
        dispatcher
            .deliver(&scope, Some("Alice"), ServerEvent::MessageRead { msg_id: 1 })
            .await;

        assert_eq!(drain(&mut alice_rx).len(), 1);
        assert_eq!(drain(&mut bob_rx).len(), 1);
    }

    #[tokio::test]
    async fn group_delivery_is_gated_by_join_state_not_roster() {
        let registry = Registry::new();
        let dispatcher = Dispatcher::new(registry.clone());
        let (joined, mut joined_rx) = registry.register("Carol").await;
        let (_lurker, mut lurker_rx) = registry.register("Dan").await;
        registry.join(joined, RoomKey::Group(5)).await;

        dispatcher
            .deliver(
                &RecipientSet::Group(5),
                Some("Carol"),
                ServerEvent::MessageRead { msg_id: 2 },
            )
            .await;

        assert_eq!(drain(&mut joined_rx).len(), 1);
        assert!(drain(&mut lurker_rx).is_empty());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_connection() {
        let registry = Registry::new();
        let dispatcher = Dispatcher::new(registry.clone());
        let (_a, mut a_rx) = registry.register("Alice").await;
        let (_b, mut b_rx) = registry.register("Bob").await;

        dispatcher
            .deliver(
                &RecipientSet::Broadcast,
                Some("Alice"),
                ServerEvent::MessageRead { msg_id: 3 },
            )
            .await;

        assert_eq!(drain(&mut a_rx).len(), 1);
        assert_eq!(drain(&mut b_rx).len(), 1);
    }

    #[tokio::test]
    async fn closed_connection_does_not_block_the_rest() {
        let registry = Registry::new();
        let dispatcher = Dispatcher::new(registry.clone());
        let (_a, a_rx) = registry.register("Alice").await;
        let (_b, mut b_rx) = registry.register("Bob").await;
        drop(a_rx); // Alice's queue is gone but she is still registered

        dispatcher
            .deliver(
                &RecipientSet::Direct(vec!["Alice".into(), "Bob".into()]),
                Some("Carol"),
                ServerEvent::MessageRead { msg_id: 4 },
            )
            .await;

        assert_eq!(drain(&mut b_rx).len(), 1);
    }

    #[tokio::test]
    async fn user_list_broadcast_carries_current_presence() {
        let registry = Registry::new();
        let dispatcher = Dispatcher::new(registry.clone());
        let (_a, mut a_rx) = registry.register("Alice").await;
        let (_b, _b_rx) = registry.register("Bob").await;

        dispatcher.broadcast_user_list().await;

        match drain(&mut a_rx).pop() {
            Some(ServerEvent::UserList { users }) => {
                assert_eq!(users, vec!["Alice".to_string(), "Bob".to_string()]);
            }
            other => panic!("expected user_list, got {other:?}"),
        }
    }
}
