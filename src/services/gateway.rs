//! Realtime gateway core.
//!
//! All realtime event semantics live here, behind plain async methods, so
//! the WebSocket layer stays a thin transport adapter and the event flow
//! is testable without sockets. Each connection is an independent caller;
//! the per-conversation dispatch lock keeps append atomic with broadcast,
//! so delivery order to room members always equals persistence order.

use std::collections::HashMap;

use std::sync::Arc;

use tokio::sync::{mpsc::UnboundedReceiver, Mutex};

use crate::error::{AppError, AppResult};
use crate::models::{ConversationId, Message, MessageId, UserId};
use crate::presence::PresenceRegistry;
use crate::services::ConversationListService;
use crate::store::ChatStore;
use crate::websocket::events::ServerEvent;
use crate::websocket::{ConnectionRegistry, SessionId};

pub struct ChatGateway {
    store: Arc<ChatStore>,
    presence: PresenceRegistry,
    registry: ConnectionRegistry,
    list: ConversationListService,
    dispatch_locks: Mutex<HashMap<ConversationId, Arc<Mutex<()>>>>,
}

impl ChatGateway {
    pub fn new(
        store: Arc<ChatStore>,
        presence: PresenceRegistry,
        registry: ConnectionRegistry,
        list: ConversationListService,
    ) -> Self {
        Self {
            store,
            presence,
            registry,
            list,
            dispatch_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<ChatStore> {
        &self.store
    }

    pub fn list(&self) -> &ConversationListService {
        &self.list
    }

    async fn dispatch_lock(&self, conversation_id: ConversationId) -> Arc<Mutex<()>> {
        self.dispatch_locks
            .lock()
            .await
            .entry(conversation_id)
            .or_default()
            .clone()
    }

    /// Register an authenticated connection: presence increment, online
    /// broadcast to conversation peers when this is the user's first
    /// connection, and the bootstrap presence snapshot for the caller.
    pub async fn connect(&self, user_id: UserId) -> (SessionId, UnboundedReceiver<String>) {
        let (session_id, rx) = self.registry.register(user_id).await;

        let count = self.presence.connection_opened(user_id).await;
        if count == 1 {
            self.broadcast_status(user_id, true).await;
        }

        let mut user_ids: Vec<UserId> = self.presence.online_snapshot().await.into_iter().collect();
        user_ids.sort_unstable();
        self.registry
            .send_to_session(
                user_id,
                session_id,
                &ServerEvent::InitialOnlineUsers { user_ids }.to_json(),
            )
            .await;

        tracing::info!(user_id, "realtime connection opened");
        (session_id, rx)
    }

    /// Tear down a connection: room cleanup, presence decrement, offline
    /// broadcast when it was the user's last connection.
    pub async fn disconnect(&self, user_id: UserId, session_id: SessionId) {
        self.registry.unregister(user_id, session_id).await;
        let remaining = self.presence.connection_closed(user_id).await;
        if remaining == 0 {
            self.broadcast_status(user_id, false).await;
        }
        tracing::info!(user_id, remaining, "realtime connection closed");
    }

    async fn broadcast_status(&self, user_id: UserId, online: bool) {
        let event = ServerEvent::UserStatusChanged { user_id, online }.to_json();
        for peer in self.store.peers_of(user_id).await {
            self.registry.send_to_user(peer, &event).await;
        }
    }

    /// Focus a conversation. Participant check up front; the registry
    /// makes the join idempotent and leaves any previously held room.
    pub async fn join(
        &self,
        user_id: UserId,
        session_id: SessionId,
        conversation_id: ConversationId,
    ) -> AppResult<()> {
        let conversation = self.store.get(conversation_id).await?;
        if !conversation.is_participant(user_id) {
            return Err(AppError::Forbidden);
        }
        self.registry
            .join_room(conversation_id, user_id, session_id)
            .await;
        Ok(())
    }

    /// Leave a room. Fire-and-forget; redundant leaves are no-ops.
    pub async fn leave(&self, session_id: SessionId, conversation_id: ConversationId) {
        self.registry.leave_room(conversation_id, session_id).await;
    }

    /// Persist and fan out one message.
    ///
    /// Holding the conversation's dispatch lock across append and
    /// broadcast guarantees that no message is pushed before its id and
    /// timestamp are final and that two concurrent sends to one
    /// conversation cannot be reordered between store and room.
    pub async fn send_message(
        &self,
        sender_id: UserId,
        conversation_id: ConversationId,
        text: &str,
    ) -> AppResult<Message> {
        let lock = self.dispatch_lock(conversation_id).await;
        let _ordering = lock.lock().await;

        let mut message = self
            .store
            .append_message(conversation_id, sender_id, text)
            .await?;
        let recipient_id = message.recipient_id;

        // Recipient currently viewing the room: collapse the "online and
        // viewing" case into a single round trip by marking read before
        // delivery and receipting the sender immediately.
        let recipient_in_room = self
            .registry
            .user_in_room(conversation_id, recipient_id)
            .await;
        if recipient_in_room {
            let flipped = self
                .store
                .mark_read(conversation_id, recipient_id, &[message.id])
                .await?;
            message.read = flipped.contains(&message.id);
        }

        self.registry
            .broadcast_to_room(
                conversation_id,
                &ServerEvent::NewMessage {
                    message: message.clone(),
                }
                .to_json(),
                None,
            )
            .await;

        if message.read {
            self.registry
                .send_to_user(
                    sender_id,
                    &ServerEvent::MessageRead {
                        conversation_id,
                        message_ids: vec![message.id],
                    }
                    .to_json(),
                )
                .await;
        }

        // Sidebar update for the other participant, in or out of the room.
        let entry = self.list.entry_for(recipient_id, conversation_id).await?;
        self.registry
            .send_to_user(recipient_id, &ServerEvent::ChatUnread { entry }.to_json())
            .await;

        Ok(message)
    }

    /// Flip read flags and relay the receipt to the other participant's
    /// connections only, so just the sender learns the messages were seen.
    pub async fn mark_as_read(
        &self,
        reader_id: UserId,
        conversation_id: ConversationId,
        message_ids: &[MessageId],
    ) -> AppResult<Vec<MessageId>> {
        let flipped = self
            .store
            .mark_read(conversation_id, reader_id, message_ids)
            .await?;
        if !flipped.is_empty() {
            if let Some(peer) = self.store.get(conversation_id).await?.peer_of(reader_id) {
                self.registry
                    .send_to_user(
                        peer,
                        &ServerEvent::MessageRead {
                            conversation_id,
                            message_ids: flipped.clone(),
                        }
                        .to_json(),
                    )
                    .await;
            }
        }
        Ok(flipped)
    }

    /// Relay a typing indicator to the other room member. Nothing is
    /// persisted or buffered; with no peer in the room the event is
    /// dropped.
    pub async fn typing(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
        is_typing: bool,
    ) {
        self.registry
            .broadcast_to_room(
                conversation_id,
                &ServerEvent::Typing {
                    conversation_id,
                    user_id,
                    is_typing,
                }
                .to_json(),
                Some(user_id),
            )
            .await;
    }

    /// Push `newChat` to the peer after REST created a fresh conversation.
    pub async fn notify_new_chat(
        &self,
        peer_id: UserId,
        conversation_id: ConversationId,
    ) -> AppResult<()> {
        let entry = self.list.entry_for(peer_id, conversation_id).await?;
        self.registry
            .send_to_user(peer_id, &ServerEvent::NewChat { entry }.to_json())
            .await;
        Ok(())
    }

    /// Evict a deleted conversation's room and dispatch lock. The peer is
    /// deliberately not notified in realtime; their list converges on the
    /// next fetch.
    pub async fn forget_conversation(&self, conversation_id: ConversationId) {
        self.registry.drop_room(conversation_id).await;
        self.dispatch_locks.lock().await.remove(&conversation_id);
    }
}
