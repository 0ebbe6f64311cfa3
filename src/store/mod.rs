//! Conversation and message store.
//!
//! Single writer for the Conversation and Message records. Writes are
//! serialized per conversation (each conversation guards its own message
//! log), while the "one conversation per unordered pair" invariant is
//! enforced atomically through the pair index lock, so two simultaneous
//! creation requests for the same pair collapse to one row.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use crate::error::{AppError, AppResult};
use crate::models::{Conversation, ConversationId, Message, MessageId, UserId};
use crate::users::UserDirectory;

/// One conversation's owned state. The message log lock is the
/// per-conversation single-writer discipline: appends, read flips and the
/// cascade delete all take it.
struct ConversationSlot {
    conversation: Conversation,
    deleted: AtomicBool,
    messages: Mutex<Vec<Message>>,
}

/// Snapshot used by the conversation list service, computed under one
/// acquisition of the conversation's lock.
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub last_message: Option<Message>,
    pub unread_count: u32,
}

pub struct ChatStore {
    users: Arc<dyn UserDirectory>,
    max_message_length: usize,
    next_conversation_id: AtomicI64,
    next_message_id: AtomicI64,
    /// Canonical pair -> conversation id. Held while creating or deleting
    /// so creation is "insert or return existing", never check-then-act.
    pair_index: Mutex<HashMap<(UserId, UserId), ConversationId>>,
    conversations: RwLock<HashMap<ConversationId, Arc<ConversationSlot>>>,
}

impl ChatStore {
    pub fn new(users: Arc<dyn UserDirectory>, max_message_length: usize) -> Self {
        Self {
            users,
            max_message_length,
            next_conversation_id: AtomicI64::new(1),
            next_message_id: AtomicI64::new(1),
            pair_index: Mutex::new(HashMap::new()),
            conversations: RwLock::new(HashMap::new()),
        }
    }

    async fn slot(&self, conversation_id: ConversationId) -> AppResult<Arc<ConversationSlot>> {
        self.conversations
            .read()
            .await
            .get(&conversation_id)
            .cloned()
            .ok_or(AppError::NotFound)
    }

    /// Return the existing conversation for the pair or create a new one.
    /// The boolean is true when a new record was created.
    pub async fn create_conversation(
        &self,
        user_a: UserId,
        user_b: UserId,
    ) -> AppResult<(Conversation, bool)> {
        if user_a == user_b {
            return Err(AppError::InvalidOperation(
                "cannot open a conversation with yourself".into(),
            ));
        }
        for user in [user_a, user_b] {
            if self.users.resolve(user).await.is_none() {
                return Err(AppError::NotFound);
            }
        }

        let pair = Conversation::pair(user_a, user_b);
        let mut index = self.pair_index.lock().await;
        if let Some(existing_id) = index.get(&pair) {
            let conversation = self.slot(*existing_id).await?.conversation.clone();
            return Ok((conversation, false));
        }

        let conversation = Conversation {
            id: self.next_conversation_id.fetch_add(1, Ordering::SeqCst),
            user_a: pair.0,
            user_b: pair.1,
            created_at: Utc::now(),
        };
        index.insert(pair, conversation.id);
        self.conversations.write().await.insert(
            conversation.id,
            Arc::new(ConversationSlot {
                conversation: conversation.clone(),
                deleted: AtomicBool::new(false),
                messages: Mutex::new(Vec::new()),
            }),
        );

        tracing::info!(
            conversation_id = conversation.id,
            user_a = pair.0,
            user_b = pair.1,
            "conversation created"
        );
        Ok((conversation, true))
    }

    /// Delete a conversation and cascade its messages. A second delete of
    /// the same id observes `NotFound`.
    pub async fn delete_conversation(
        &self,
        conversation_id: ConversationId,
        requester: UserId,
    ) -> AppResult<()> {
        let mut index = self.pair_index.lock().await;
        let slot = self.slot(conversation_id).await?;
        if !slot.conversation.is_participant(requester) {
            return Err(AppError::Forbidden);
        }

        // Serialize with in-flight appends before the slot disappears.
        let mut messages = slot.messages.lock().await;
        slot.deleted.store(true, Ordering::SeqCst);
        messages.clear();
        drop(messages);

        let pair = Conversation::pair(slot.conversation.user_a, slot.conversation.user_b);
        index.remove(&pair);
        self.conversations.write().await.remove(&conversation_id);

        tracing::info!(conversation_id, requester, "conversation deleted");
        Ok(())
    }

    /// Append a message. This is the single source of truth for message
    /// ordering: the id comes from the store-wide monotonic counter and is
    /// assigned under the conversation's own lock, so within one
    /// conversation id order equals append order.
    pub async fn append_message(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        text: &str,
    ) -> AppResult<Message> {
        if text.trim().is_empty() {
            return Err(AppError::InvalidOperation(
                "message text must not be empty".into(),
            ));
        }
        if text.len() > self.max_message_length {
            return Err(AppError::InvalidOperation(format!(
                "message text exceeds {} bytes",
                self.max_message_length
            )));
        }

        let slot = self.slot(conversation_id).await?;
        let recipient_id = slot
            .conversation
            .peer_of(sender_id)
            .ok_or(AppError::Forbidden)?;

        let mut messages = slot.messages.lock().await;
        if slot.deleted.load(Ordering::SeqCst) {
            return Err(AppError::NotFound);
        }
        let message = Message {
            id: self.next_message_id.fetch_add(1, Ordering::SeqCst),
            conversation_id,
            sender_id,
            recipient_id,
            text: text.to_string(),
            read: false,
            created_at: Utc::now(),
        };
        messages.push(message.clone());
        Ok(message)
    }

    /// One page of messages, oldest first within the page.
    pub async fn list_messages(
        &self,
        conversation_id: ConversationId,
        offset: i64,
        limit: i64,
    ) -> AppResult<Vec<Message>> {
        let slot = self.slot(conversation_id).await?;
        let messages = slot.messages.lock().await;
        let offset = offset.max(0) as usize;
        let limit = limit.max(0) as usize;
        Ok(messages.iter().skip(offset).take(limit).cloned().collect())
    }

    /// Id-keyed set union of overlapping pages, sorted by timestamp
    /// ascending with ties broken by id. Idempotent: feeding the same page
    /// twice yields each message exactly once.
    pub fn merge_pages<I>(pages: I) -> Vec<Message>
    where
        I: IntoIterator<Item = Vec<Message>>,
    {
        let mut by_id: HashMap<MessageId, Message> = HashMap::new();
        for page in pages {
            for message in page {
                by_id.insert(message.id, message);
            }
        }
        let mut merged: Vec<Message> = by_id.into_values().collect();
        merged.sort_by_key(Message::sort_key);
        merged
    }

    /// Flip the read flag for the given ids, but only for messages in this
    /// conversation addressed to `reader`. Unknown or foreign ids are
    /// silently skipped to tolerate races between client optimism and
    /// server state. Returns the ids actually flipped.
    pub async fn mark_read(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
        message_ids: &[MessageId],
    ) -> AppResult<Vec<MessageId>> {
        let slot = self.slot(conversation_id).await?;
        let wanted: HashSet<MessageId> = message_ids.iter().copied().collect();
        let mut flipped = Vec::new();
        let mut messages = slot.messages.lock().await;
        for message in messages.iter_mut() {
            if wanted.contains(&message.id) && message.recipient_id == reader && !message.read {
                message.read = true;
                flipped.push(message.id);
            }
        }
        Ok(flipped)
    }

    pub async fn unread_count(
        &self,
        conversation_id: ConversationId,
        viewer: UserId,
    ) -> AppResult<u32> {
        let slot = self.slot(conversation_id).await?;
        let messages = slot.messages.lock().await;
        Ok(messages
            .iter()
            .filter(|m| m.recipient_id == viewer && !m.read)
            .count() as u32)
    }

    pub async fn get(&self, conversation_id: ConversationId) -> AppResult<Conversation> {
        Ok(self.slot(conversation_id).await?.conversation.clone())
    }

    /// All conversations the viewer participates in (unordered snapshot).
    pub async fn conversations_of(&self, viewer: UserId) -> Vec<Conversation> {
        self.conversations
            .read()
            .await
            .values()
            .filter(|slot| slot.conversation.is_participant(viewer))
            .map(|slot| slot.conversation.clone())
            .collect()
    }

    /// Users who share at least one conversation with `user_id`; the
    /// audience for that user's presence changes.
    pub async fn peers_of(&self, user_id: UserId) -> HashSet<UserId> {
        self.conversations_of(user_id)
            .await
            .into_iter()
            .filter_map(|c| c.peer_of(user_id))
            .collect()
    }

    /// Viewer-specific summary under a single lock acquisition.
    pub async fn summary(
        &self,
        conversation_id: ConversationId,
        viewer: UserId,
    ) -> AppResult<ConversationSummary> {
        let slot = self.slot(conversation_id).await?;
        if !slot.conversation.is_participant(viewer) {
            return Err(AppError::Forbidden);
        }
        let messages = slot.messages.lock().await;
        Ok(ConversationSummary {
            conversation: slot.conversation.clone(),
            last_message: messages.last().cloned(),
            unread_count: messages
                .iter()
                .filter(|m| m.recipient_id == viewer && !m.read)
                .count() as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::InMemoryUserDirectory;

    async fn store() -> Arc<ChatStore> {
        let users = Arc::new(InMemoryUserDirectory::new());
        users.insert_named(1, "alice").await;
        users.insert_named(2, "bob").await;
        users.insert_named(3, "carol").await;
        Arc::new(ChatStore::new(users, 4_000))
    }

    #[tokio::test]
    async fn create_is_idempotent_per_pair() {
        let store = store().await;
        let (first, created) = store.create_conversation(1, 2).await.unwrap();
        assert!(created);
        let (second, created) = store.create_conversation(2, 1).await.unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(store.conversations_of(1).await.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_creation_yields_one_conversation() {
        let store = store().await;
        let a = {
            let store = store.clone();
            tokio::spawn(async move { store.create_conversation(1, 2).await })
        };
        let b = {
            let store = store.clone();
            tokio::spawn(async move { store.create_conversation(2, 1).await })
        };
        let (conv_a, _) = a.await.unwrap().unwrap();
        let (conv_b, _) = b.await.unwrap().unwrap();
        assert_eq!(conv_a.id, conv_b.id);
        assert_eq!(store.conversations_of(2).await.len(), 1);
    }

    #[tokio::test]
    async fn self_chat_and_unknown_users_are_rejected() {
        let store = store().await;
        assert!(matches!(
            store.create_conversation(1, 1).await,
            Err(AppError::InvalidOperation(_))
        ));
        assert!(matches!(
            store.create_conversation(1, 99).await,
            Err(AppError::NotFound)
        ));
    }

    #[tokio::test]
    async fn message_ids_strictly_increase() {
        let store = store().await;
        let (conv, _) = store.create_conversation(1, 2).await.unwrap();
        let mut last = 0;
        for i in 0..10 {
            let m = store
                .append_message(conv.id, 1, &format!("msg {i}"))
                .await
                .unwrap();
            assert!(m.id > last);
            last = m.id;
        }
    }

    #[tokio::test]
    async fn append_validates_text_and_membership() {
        let store = store().await;
        let (conv, _) = store.create_conversation(1, 2).await.unwrap();
        assert!(matches!(
            store.append_message(conv.id, 1, "   ").await,
            Err(AppError::InvalidOperation(_))
        ));
        assert!(matches!(
            store.append_message(conv.id, 3, "hi").await,
            Err(AppError::Forbidden)
        ));
        assert!(matches!(
            store.append_message(9_999, 1, "hi").await,
            Err(AppError::NotFound)
        ));
        let oversized = "x".repeat(4_001);
        assert!(matches!(
            store.append_message(conv.id, 1, &oversized).await,
            Err(AppError::InvalidOperation(_))
        ));
    }

    #[tokio::test]
    async fn overlapping_pages_merge_exactly_once() {
        let store = store().await;
        let (conv, _) = store.create_conversation(1, 2).await.unwrap();
        for i in 0..10 {
            store
                .append_message(conv.id, 1, &format!("msg {i}"))
                .await
                .unwrap();
        }

        let page_a = store.list_messages(conv.id, 0, 6).await.unwrap();
        let page_b = store.list_messages(conv.id, 4, 6).await.unwrap();
        let merged = ChatStore::merge_pages([page_a.clone(), page_b, page_a]);

        assert_eq!(merged.len(), 10);
        for pair in merged.windows(2) {
            assert!(pair[0].sort_key() < pair[1].sort_key());
        }
    }

    #[tokio::test]
    async fn mark_read_is_idempotent_and_scoped_to_recipient() {
        let store = store().await;
        let (conv, _) = store.create_conversation(1, 2).await.unwrap();
        let m1 = store.append_message(conv.id, 1, "one").await.unwrap();
        let m2 = store.append_message(conv.id, 1, "two").await.unwrap();
        let from_bob = store.append_message(conv.id, 2, "reply").await.unwrap();

        assert_eq!(store.unread_count(conv.id, 2).await.unwrap(), 2);

        // Sender cannot mark their own outbound messages read.
        let flipped = store.mark_read(conv.id, 1, &[m1.id, m2.id]).await.unwrap();
        assert!(flipped.is_empty());

        // Unknown ids are skipped, not rejected.
        let flipped = store
            .mark_read(conv.id, 2, &[m1.id, m2.id, 12_345])
            .await
            .unwrap();
        assert_eq!(flipped, vec![m1.id, m2.id]);
        assert_eq!(store.unread_count(conv.id, 2).await.unwrap(), 0);
        assert_eq!(store.unread_count(conv.id, 1).await.unwrap(), 1);

        // Second call flips nothing and leaves the same final state.
        let flipped = store.mark_read(conv.id, 2, &[m1.id, m2.id]).await.unwrap();
        assert!(flipped.is_empty());
        assert_eq!(store.unread_count(conv.id, 1).await.unwrap(), 1);
        let _ = from_bob;
    }

    #[tokio::test]
    async fn unread_count_tracks_append_and_mark_read() {
        let store = store().await;
        let (conv, _) = store.create_conversation(1, 2).await.unwrap();
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(
                store
                    .append_message(conv.id, 1, &format!("m{i}"))
                    .await
                    .unwrap()
                    .id,
            );
        }
        assert_eq!(store.unread_count(conv.id, 2).await.unwrap(), 5);
        store.mark_read(conv.id, 2, &ids[0..2]).await.unwrap();
        assert_eq!(store.unread_count(conv.id, 2).await.unwrap(), 3);
        store.mark_read(conv.id, 2, &ids).await.unwrap();
        assert_eq!(store.unread_count(conv.id, 2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_cascades_and_is_not_repeatable() {
        let store = store().await;
        let (conv, _) = store.create_conversation(1, 2).await.unwrap();
        store.append_message(conv.id, 1, "hello").await.unwrap();

        assert!(matches!(
            store.delete_conversation(conv.id, 3).await,
            Err(AppError::Forbidden)
        ));

        store.delete_conversation(conv.id, 1).await.unwrap();
        assert!(matches!(
            store.list_messages(conv.id, 0, 10).await,
            Err(AppError::NotFound)
        ));
        assert!(matches!(
            store.delete_conversation(conv.id, 1).await,
            Err(AppError::NotFound)
        ));

        // The pair is free again after deletion.
        let (recreated, created) = store.create_conversation(1, 2).await.unwrap();
        assert!(created);
        assert_ne!(recreated.id, conv.id);
        assert!(store.list_messages(recreated.id, 0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn peers_of_spans_all_conversations() {
        let store = store().await;
        store.create_conversation(1, 2).await.unwrap();
        store.create_conversation(1, 3).await.unwrap();
        let peers = store.peers_of(1).await;
        assert_eq!(peers, HashSet::from([2, 3]));
    }
}
