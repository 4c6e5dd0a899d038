use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use lanchat_types::events::ServerEvent;
use lanchat_types::room::RoomKey;

pub type ConnId = Uuid;
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

/// Room/presence registry. The single owner of the online-user set and the
/// room-membership maps; every other component reads them through this API.
/// All of it is in-memory — reconnecting clients re-join their rooms.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RwLock<RegistryInner>>,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnId, ConnectionHandle>,
    by_user: HashMap<String, HashSet<ConnId>>,
    rooms: HashMap<RoomKey, HashSet<ConnId>>,
}

struct ConnectionHandle {
    username: String,
    tx: EventSender,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner::default())),
        }
    }

    /// Register a live connection for `username`. Returns the connection id
    /// and the receiving end of its event queue.
    pub async fn register(&self, username: &str) -> (ConnId, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.write().await;
        inner.connections.insert(
            conn_id,
            ConnectionHandle {
                username: username.to_string(),
                tx,
            },
        );
        inner
            .by_user
            .entry(username.to_string())
            .or_default()
            .insert(conn_id);
        (conn_id, rx)
    }

    /// Drop a connection: removed from every room and from the user's
    /// connection set, so no further deliveries can target it. Returns the
    /// username and whether this was the user's last live connection.
    pub async fn unregister(&self, conn_id: ConnId) -> Option<(String, bool)> {
        let mut inner = self.inner.write().await;
        let handle = inner.connections.remove(&conn_id)?;

        for members in inner.rooms.values_mut() {
            members.remove(&conn_id);
        }
        inner.rooms.retain(|_, members| !members.is_empty());

        let mut last = false;
        if let Some(conns) = inner.by_user.get_mut(&handle.username) {
            conns.remove(&conn_id);
            if conns.is_empty() {
                inner.by_user.remove(&handle.username);
                last = true;
            }
        }
        Some((handle.username, last))
    }

    /// Subscribe a connection to a room. Unknown connection ids are ignored
    /// so a join racing a disconnect cannot resurrect state.
    pub async fn join(&self, conn_id: ConnId, room: RoomKey) {
        let mut inner = self.inner.write().await;
        if !inner.connections.contains_key(&conn_id) {
            return;
        }
        inner.rooms.entry(room).or_default().insert(conn_id);
    }

    pub async fn leave(&self, conn_id: ConnId, room: &RoomKey) {
        let mut inner = self.inner.write().await;
        if let Some(members) = inner.rooms.get_mut(room) {
            members.remove(&conn_id);
            if members.is_empty() {
                inner.rooms.remove(room);
            }
        }
    }

    /// Sorted usernames with at least one live connection.
    pub async fn online_users(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut users: Vec<String> = inner.by_user.keys().cloned().collect();
        users.sort_unstable();
        users
    }

    pub async fn all_senders(&self) -> Vec<(ConnId, EventSender)> {
        let inner = self.inner.read().await;
        inner
            .connections
            .iter()
            .map(|(id, handle)| (*id, handle.tx.clone()))
            .collect()
    }

    pub async fn room_senders(&self, room: &RoomKey) -> Vec<(ConnId, EventSender)> {
        let inner = self.inner.read().await;
        let Some(members) = inner.rooms.get(room) else {
            return vec![];
        };
        members
            .iter()
            .filter_map(|id| inner.connections.get(id).map(|h| (*id, h.tx.clone())))
            .collect()
    }

    /// Room members excluding one user's connections (typing indicators are
    /// not echoed back to the typist).
    pub async fn room_senders_except(&self, room: &RoomKey, except: &str) -> Vec<(ConnId, EventSender)> {
        let inner = self.inner.read().await;
        let Some(members) = inner.rooms.get(room) else {
            return vec![];
        };
        members
            .iter()
            .filter_map(|id| inner.connections.get(id).map(|h| (*id, h)))
            .filter(|(_, h)| h.username != except)
            .map(|(id, h)| (id, h.tx.clone()))
            .collect()
    }

    pub async fn user_senders(&self, username: &str) -> Vec<(ConnId, EventSender)> {
        let inner = self.inner.read().await;
        let Some(conns) = inner.by_user.get(username) else {
            return vec![];
        };
        conns
            .iter()
            .filter_map(|id| inner.connections.get(id).map(|h| (*id, h.tx.clone())))
            .collect()
    }

    pub async fn conn_sender(&self, conn_id: ConnId) -> Option<EventSender> {
        let inner = self.inner.read().await;
        inner.connections.get(&conn_id).map(|h| h.tx.clone())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_tracks_presence_per_user() {
        let registry = Registry::new();
        let (a1, _rx1) = registry.register("Alice").await;
        let (_a2, _rx2) = registry.register("Alice").await;
        let (_b, _rx3) = registry.register("Bob").await;

        assert_eq!(registry.online_users().await, vec!["Alice", "Bob"]);

        // first of two connections closing does not take Alice offline
        let (name, last) = registry.unregister(a1).await.unwrap();
        assert_eq!(name, "Alice");
        assert!(!last);
        assert_eq!(registry.online_users().await, vec!["Alice", "Bob"]);
    }

    #[tokio::test]
    async fn unregister_leaves_every_room() {
        let registry = Registry::new();
        let (conn, _rx) = registry.register("Alice").await;
        registry.join(conn, RoomKey::Group(1)).await;
        registry.join(conn, RoomKey::Named("Alice,Bob".into())).await;

        assert_eq!(registry.room_senders(&RoomKey::Group(1)).await.len(), 1);

        let (_, last) = registry.unregister(conn).await.unwrap();
        assert!(last);
        assert!(registry.room_senders(&RoomKey::Group(1)).await.is_empty());
        assert!(
            registry
                .room_senders(&RoomKey::Named("Alice,Bob".into()))
                .await
                .is_empty()
        );
    }

    #[tokio::test]
    async fn join_after_disconnect_is_ignored() {
        let registry = Registry::new();
        let (conn, _rx) = registry.register("Alice").await;
        registry.unregister(conn).await;
        registry.join(conn, RoomKey::Group(1)).await;
        assert!(registry.room_senders(&RoomKey::Group(1)).await.is_empty());
    }

    #[tokio::test]
    async fn leave_removes_only_the_named_room() {
        let registry = Registry::new();
        let (conn, _rx) = registry.register("Alice").await;
        registry.join(conn, RoomKey::Group(1)).await;
        registry.join(conn, RoomKey::Group(2)).await;

        registry.leave(conn, &RoomKey::Group(1)).await;
        assert!(registry.room_senders(&RoomKey::Group(1)).await.is_empty());
        assert_eq!(registry.room_senders(&RoomKey::Group(2)).await.len(), 1);
    }
}
