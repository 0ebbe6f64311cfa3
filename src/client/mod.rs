//! Client-side reconciliation layer.
//!
//! `ChatClient` is the state machine a frontend keeps between the socket
//! and the REST API: the conversation list, per-conversation message
//! caches, the focused room and a presence view. It is deliberately pure.
//! Every input is a method call and every side effect is returned as a
//! `ClientAction` for the caller's transport to execute, which keeps the
//! reconciliation rules testable without any network.

use std::collections::{HashMap, HashSet};

use crate::models::{ChatEntry, ConversationId, Message, MessageId, UserId};
use crate::websocket::events::ServerEvent;

/// An effect the transport must carry out on the client's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    JoinRoom {
        conversation_id: ConversationId,
    },
    LeaveRoom {
        conversation_id: ConversationId,
    },
    FetchHistory {
        conversation_id: ConversationId,
        offset: i64,
        limit: i64,
    },
    FetchConversations,
    SendReadReceipt {
        conversation_id: ConversationId,
        message_ids: Vec<MessageId>,
    },
}

pub struct ChatClient {
    user_id: UserId,
    page_size: i64,
    entries: HashMap<ConversationId, ChatEntry>,
    messages: HashMap<ConversationId, Vec<Message>>,
    online: HashSet<UserId>,
    focused: Option<ConversationId>,
    connected: bool,
}

impl ChatClient {
    pub fn new(user_id: UserId, page_size: i64) -> Self {
        Self {
            user_id,
            page_size,
            entries: HashMap::new(),
            messages: HashMap::new(),
            online: HashSet::new(),
            focused: None,
            connected: true,
        }
    }

    pub fn focused(&self) -> Option<ConversationId> {
        self.focused
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.online.contains(&user_id)
    }

    pub fn unread_count(&self, conversation_id: ConversationId) -> u32 {
        self.entries
            .get(&conversation_id)
            .map(|e| e.unread_count)
            .unwrap_or(0)
    }

    /// Cached messages for a conversation, oldest first.
    pub fn messages(&self, conversation_id: ConversationId) -> &[Message] {
        self.messages
            .get(&conversation_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Conversation list in sidebar order: most recent activity first.
    pub fn entries(&self) -> Vec<&ChatEntry> {
        let mut out: Vec<&ChatEntry> = self.entries.values().collect();
        out.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then(b.conversation_id.cmp(&a.conversation_id))
        });
        out
    }

    /// Switch focus to a conversation.
    ///
    /// Leaves the previous room, joins the new one, fetches the first page
    /// if the cache is cold, and acknowledges any cached unread messages
    /// addressed to this user. The local unread counter is cleared
    /// optimistically; the server receipt confirms it.
    pub fn focus(&mut self, conversation_id: ConversationId) -> Vec<ClientAction> {
        let mut actions = Vec::new();
        if self.focused == Some(conversation_id) {
            return actions;
        }

        if let Some(previous) = self.focused.take() {
            actions.push(ClientAction::LeaveRoom {
                conversation_id: previous,
            });
        }
        self.focused = Some(conversation_id);
        actions.push(ClientAction::JoinRoom { conversation_id });

        match self.messages.get(&conversation_id) {
            None => {
                actions.push(ClientAction::FetchHistory {
                    conversation_id,
                    offset: 0,
                    limit: self.page_size,
                });
            }
            Some(cached) => {
                let unread: Vec<MessageId> = cached
                    .iter()
                    .filter(|m| !m.read && m.recipient_id == self.user_id)
                    .map(|m| m.id)
                    .collect();
                if !unread.is_empty() {
                    actions.push(ClientAction::SendReadReceipt {
                        conversation_id,
                        message_ids: unread,
                    });
                }
            }
        }

        if let Some(entry) = self.entries.get_mut(&conversation_id) {
            entry.unread_count = 0;
        }
        actions
    }

    pub fn blur(&mut self) -> Vec<ClientAction> {
        match self.focused.take() {
            Some(conversation_id) => vec![ClientAction::LeaveRoom { conversation_id }],
            None => Vec::new(),
        }
    }

    /// Apply one pushed server event.
    pub fn apply_server_event(&mut self, event: ServerEvent) -> Vec<ClientAction> {
        match event {
            ServerEvent::NewMessage { message } => self.apply_new_message(message),
            ServerEvent::MessageRead {
                conversation_id,
                message_ids,
            } => {
                let ids: HashSet<MessageId> = message_ids.into_iter().collect();
                if let Some(cached) = self.messages.get_mut(&conversation_id) {
                    for m in cached.iter_mut() {
                        if ids.contains(&m.id) {
                            m.read = true;
                        }
                    }
                }
                Vec::new()
            }
            ServerEvent::NewChat { entry } | ServerEvent::ChatUnread { entry } => {
                self.entries.insert(entry.conversation_id, entry);
                Vec::new()
            }
            ServerEvent::UserStatusChanged { user_id, online } => {
                if online {
                    self.online.insert(user_id);
                } else {
                    self.online.remove(&user_id);
                }
                for entry in self.entries.values_mut() {
                    if entry.peer.id == user_id {
                        entry.peer_online = online;
                    }
                }
                Vec::new()
            }
            ServerEvent::InitialOnlineUsers { user_ids } => {
                self.online = user_ids.into_iter().collect();
                for entry in self.entries.values_mut() {
                    entry.peer_online = self.online.contains(&entry.peer.id);
                }
                Vec::new()
            }
            // Typing is ephemeral UI state; errors are surfaced by the
            // transport. Neither changes reconciled state.
            ServerEvent::Typing { .. } | ServerEvent::Error { .. } => Vec::new(),
        }
    }

    fn apply_new_message(&mut self, message: Message) -> Vec<ClientAction> {
        let conversation_id = message.conversation_id;
        let inbound = message.recipient_id == self.user_id;
        let focused_here = self.focused == Some(conversation_id);
        let message_id = message.id;
        let already_read = message.read;

        if let Some(entry) = self.entries.get_mut(&conversation_id) {
            entry.last_message = Some(message.text.clone());
            entry.last_activity = message.created_at;
        }
        Self::upsert_message(self.messages.entry(conversation_id).or_default(), message);

        if !inbound {
            return Vec::new();
        }

        if focused_here {
            // Viewing the room. The server usually marks the message read
            // before delivery; receipt only what it did not.
            if already_read {
                Vec::new()
            } else {
                vec![ClientAction::SendReadReceipt {
                    conversation_id,
                    message_ids: vec![message_id],
                }]
            }
        } else {
            if let Some(entry) = self.entries.get_mut(&conversation_id) {
                entry.unread_count = entry.unread_count.saturating_add(1);
            }
            Vec::new()
        }
    }

    /// Merge one REST history page into the cache. Dedup is by message id,
    /// so overlapping pages and a push that raced the fetch are both safe.
    ///
    /// When the page belongs to the focused conversation it may carry
    /// unread messages that just became visible (a cold-cache focus fetches
    /// before anything is acknowledged), so those are receipted here.
    pub fn apply_history_page(
        &mut self,
        conversation_id: ConversationId,
        page: Vec<Message>,
    ) -> Vec<ClientAction> {
        let cached = self.messages.entry(conversation_id).or_default();
        for message in page {
            Self::upsert_message(cached, message);
        }

        if self.focused != Some(conversation_id) {
            return Vec::new();
        }
        let unread: Vec<MessageId> = cached
            .iter()
            .filter(|m| !m.read && m.recipient_id == self.user_id)
            .map(|m| m.id)
            .collect();
        if unread.is_empty() {
            Vec::new()
        } else {
            vec![ClientAction::SendReadReceipt {
                conversation_id,
                message_ids: unread,
            }]
        }
    }

    /// Replace the conversation list from a REST fetch. The server's view
    /// is authoritative; entries it no longer returns are dropped.
    pub fn apply_conversation_list(&mut self, list: Vec<ChatEntry>) {
        self.entries = list
            .into_iter()
            .map(|e| (e.conversation_id, e))
            .collect();
        let stale: Vec<ConversationId> = self
            .messages
            .keys()
            .filter(|id| !self.entries.contains_key(id))
            .copied()
            .collect();
        for id in stale {
            self.messages.remove(&id);
        }
        if let Some(focused) = self.focused {
            if !self.entries.contains_key(&focused) {
                self.focused = None;
            }
        }
    }

    pub fn connection_lost(&mut self) {
        self.connected = false;
        self.online.clear();
    }

    /// Recover after a reconnect. Pushed events were missed while offline,
    /// so re-sync from REST: refetch the list, rejoin the focused room and
    /// refetch its latest page to pick up anything sent in the gap.
    pub fn reconnected(&mut self) -> Vec<ClientAction> {
        self.connected = true;
        let mut actions = vec![ClientAction::FetchConversations];
        if let Some(conversation_id) = self.focused {
            actions.push(ClientAction::JoinRoom { conversation_id });
            let cached_len = self
                .messages
                .get(&conversation_id)
                .map(|m| m.len() as i64)
                .unwrap_or(0);
            actions.push(ClientAction::FetchHistory {
                conversation_id,
                offset: cached_len.saturating_sub(self.page_size).max(0),
                limit: self.page_size,
            });
        }
        actions
    }

    fn upsert_message(cached: &mut Vec<Message>, message: Message) {
        match cached.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message,
            None => {
                cached.push(message);
                cached.sort_by_key(Message::sort_key);
            }
        }
    }
}
