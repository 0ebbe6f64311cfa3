use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

use crate::models::{ConversationId, UserId};

pub mod events;
pub mod session;

/// Unique identifier for one realtime connection.
///
/// Each connection gets a fresh session id when it registers, which allows
/// precise cleanup when it closes even if the same user holds several
/// connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
struct Subscriber {
    id: SessionId,
    user_id: UserId,
    sender: UnboundedSender<String>,
}

/// Registry of open realtime sessions and room membership.
///
/// Sessions are keyed by user so conversation-list updates and presence
/// changes reach every device. Rooms track which sessions are focused on
/// a conversation; a session occupies at most one room at a time.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    sessions: Arc<RwLock<HashMap<UserId, Vec<Subscriber>>>>,
    rooms: Arc<RwLock<HashMap<ConversationId, Vec<Subscriber>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session for a user. Returns the session id (used for
    /// cleanup) and the channel the connection drains into its socket.
    pub async fn register(&self, user_id: UserId) -> (SessionId, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        let subscriber = Subscriber {
            id: SessionId::new(),
            user_id,
            sender: tx,
        };
        let id = subscriber.id;

        let mut guard = self.sessions.write().await;
        guard.entry(user_id).or_default().push(subscriber);
        tracing::debug!(
            user_id,
            sessions = guard.get(&user_id).map(|v| v.len()).unwrap_or(0),
            "session registered"
        );
        (id, rx)
    }

    /// Remove a session entirely: its room membership and its sender.
    pub async fn unregister(&self, user_id: UserId, session_id: SessionId) {
        self.leave_all_rooms(session_id).await;

        let mut guard = self.sessions.write().await;
        if let Some(subscribers) = guard.get_mut(&user_id) {
            subscribers.retain(|s| s.id != session_id);
            if subscribers.is_empty() {
                guard.remove(&user_id);
            }
        }
        tracing::debug!(user_id, "session unregistered");
    }

    /// Put a session into a conversation's room. Joining is idempotent,
    /// and a session holds one room at most: any previous room is left
    /// first (switching conversations is leave-then-join).
    pub async fn join_room(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        session_id: SessionId,
    ) {
        let sender = {
            let guard = self.sessions.read().await;
            guard
                .get(&user_id)
                .and_then(|subs| subs.iter().find(|s| s.id == session_id))
                .map(|s| s.sender.clone())
        };
        let Some(sender) = sender else {
            return;
        };

        let mut rooms = self.rooms.write().await;
        for (id, members) in rooms.iter_mut() {
            if *id != conversation_id {
                members.retain(|m| m.id != session_id);
            }
        }
        rooms.retain(|_, members| !members.is_empty());

        let members = rooms.entry(conversation_id).or_default();
        if !members.iter().any(|m| m.id == session_id) {
            members.push(Subscriber {
                id: session_id,
                user_id,
                sender,
            });
        }
        tracing::debug!(conversation_id, user_id, "joined room");
    }

    /// Remove a session from a room. Redundant leaves are no-ops.
    pub async fn leave_room(&self, conversation_id: ConversationId, session_id: SessionId) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(&conversation_id) {
            members.retain(|m| m.id != session_id);
            if members.is_empty() {
                rooms.remove(&conversation_id);
            }
        }
    }

    async fn leave_all_rooms(&self, session_id: SessionId) {
        let mut rooms = self.rooms.write().await;
        for members in rooms.values_mut() {
            members.retain(|m| m.id != session_id);
        }
        rooms.retain(|_, members| !members.is_empty());
    }

    /// Drop a room entirely (conversation deleted).
    pub async fn drop_room(&self, conversation_id: ConversationId) {
        self.rooms.write().await.remove(&conversation_id);
    }

    /// True if any of the user's sessions is currently in the room. This
    /// is the single-process membership check behind the immediate-read
    /// optimization.
    pub async fn user_in_room(&self, conversation_id: ConversationId, user_id: UserId) -> bool {
        self.rooms
            .read()
            .await
            .get(&conversation_id)
            .map(|members| members.iter().any(|m| m.user_id == user_id))
            .unwrap_or(false)
    }

    /// Send a payload to every session in the room, optionally skipping
    /// one user's sessions. Dead senders are pruned.
    pub async fn broadcast_to_room(
        &self,
        conversation_id: ConversationId,
        payload: &str,
        skip_user: Option<UserId>,
    ) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(&conversation_id) {
            members.retain(|m| {
                if skip_user == Some(m.user_id) {
                    return true;
                }
                m.sender.send(payload.to_string()).is_ok()
            });
            if members.is_empty() {
                rooms.remove(&conversation_id);
            }
        }
    }

    /// Send a payload to exactly one session (bootstrap traffic that other
    /// devices of the same user must not receive twice).
    pub async fn send_to_session(&self, user_id: UserId, session_id: SessionId, payload: &str) {
        let guard = self.sessions.read().await;
        if let Some(subscriber) = guard
            .get(&user_id)
            .and_then(|subs| subs.iter().find(|s| s.id == session_id))
        {
            let _ = subscriber.sender.send(payload.to_string());
        }
    }

    /// Send a payload to every open session of one user, in or out of any
    /// room. Dead senders are pruned.
    pub async fn send_to_user(&self, user_id: UserId, payload: &str) {
        let mut guard = self.sessions.write().await;
        if let Some(subscribers) = guard.get_mut(&user_id) {
            subscribers.retain(|s| s.sender.send(payload.to_string()).is_ok());
            if subscribers.is_empty() {
                guard.remove(&user_id);
            }
        }
    }

    pub async fn session_count(&self, user_id: UserId) -> usize {
        self.sessions
            .read()
            .await
            .get(&user_id)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_and_send_to_user_reaches_all_sessions() {
        let registry = ConnectionRegistry::new();
        let (_id1, mut rx1) = registry.register(1).await;
        let (_id2, mut rx2) = registry.register(1).await;

        registry.send_to_user(1, "hello").await;
        assert_eq!(rx1.recv().await.unwrap(), "hello");
        assert_eq!(rx2.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn join_is_idempotent_and_exclusive() {
        let registry = ConnectionRegistry::new();
        let (id, mut rx) = registry.register(1).await;

        registry.join_room(10, 1, id).await;
        registry.join_room(10, 1, id).await;
        registry.broadcast_to_room(10, "once", None).await;
        assert_eq!(rx.recv().await.unwrap(), "once");
        assert!(rx.try_recv().is_err());

        // Switching rooms leaves the old one.
        registry.join_room(11, 1, id).await;
        assert!(!registry.user_in_room(10, 1).await);
        assert!(registry.user_in_room(11, 1).await);

        registry.leave_room(11, id).await;
        registry.leave_room(11, id).await; // redundant leave is a no-op
        assert!(!registry.user_in_room(11, 1).await);
    }

    #[tokio::test]
    async fn broadcast_skips_requested_user() {
        let registry = ConnectionRegistry::new();
        let (id1, mut rx1) = registry.register(1).await;
        let (id2, mut rx2) = registry.register(2).await;
        registry.join_room(10, 1, id1).await;
        registry.join_room(10, 2, id2).await;

        registry.broadcast_to_room(10, "for-bob", Some(1)).await;
        assert_eq!(rx2.recv().await.unwrap(), "for-bob");
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_cleans_rooms_and_sessions() {
        let registry = ConnectionRegistry::new();
        let (id, _rx) = registry.register(1).await;
        registry.join_room(10, 1, id).await;

        registry.unregister(1, id).await;
        assert!(!registry.user_in_room(10, 1).await);
        assert_eq!(registry.session_count(1).await, 0);
    }
}
