//! Conversation list façade.
//!
//! Combines store queries with presence lookups and the user directory to
//! produce viewer-specific Conversation-List Entries. Holds no state of
//! its own.

use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::models::{ChatEntry, ConversationId, UserId};
use crate::presence::PresenceRegistry;
use crate::store::{ChatStore, ConversationSummary};
use crate::users::{UserDirectory, UserProfile};

#[derive(Clone)]
pub struct ConversationListService {
    store: Arc<ChatStore>,
    presence: PresenceRegistry,
    users: Arc<dyn UserDirectory>,
}

impl ConversationListService {
    pub fn new(
        store: Arc<ChatStore>,
        presence: PresenceRegistry,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            store,
            presence,
            users,
        }
    }

    /// Page of the viewer's conversations, most recent activity first.
    /// `search` filters by peer display name, case-insensitive substring,
    /// before pagination is applied.
    pub async fn list(
        &self,
        viewer: UserId,
        offset: i64,
        limit: i64,
        search: Option<&str>,
    ) -> AppResult<Vec<ChatEntry>> {
        let mut entries = Vec::new();
        for conversation in self.store.conversations_of(viewer).await {
            let summary = self.store.summary(conversation.id, viewer).await?;
            entries.push(self.build_entry(viewer, summary).await?);
        }

        if let Some(term) = search.map(str::trim).filter(|t| !t.is_empty()) {
            let needle = term.to_lowercase();
            entries.retain(|e| e.peer.name.to_lowercase().contains(&needle));
        }

        entries.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then(b.conversation_id.cmp(&a.conversation_id))
        });

        let offset = offset.max(0) as usize;
        let limit = limit.max(0) as usize;
        Ok(entries.into_iter().skip(offset).take(limit).collect())
    }

    /// One refreshed entry, used for realtime sidebar pushes and as the
    /// `POST /chat` response.
    pub async fn entry_for(
        &self,
        viewer: UserId,
        conversation_id: ConversationId,
    ) -> AppResult<ChatEntry> {
        let summary = self.store.summary(conversation_id, viewer).await?;
        self.build_entry(viewer, summary).await
    }

    async fn build_entry(
        &self,
        viewer: UserId,
        summary: ConversationSummary,
    ) -> AppResult<ChatEntry> {
        let peer_id = summary
            .conversation
            .peer_of(viewer)
            .ok_or(AppError::Forbidden)?;
        let peer = match self.users.resolve(peer_id).await {
            Some(profile) => profile,
            // The directory is external; a vanished profile must not hide
            // the conversation.
            None => UserProfile {
                id: peer_id,
                name: format!("user-{peer_id}"),
                avatar: None,
            },
        };
        let last_activity = summary
            .last_message
            .as_ref()
            .map(|m| m.created_at)
            .unwrap_or(summary.conversation.created_at);

        Ok(ChatEntry {
            conversation_id: summary.conversation.id,
            peer_online: self.presence.is_online(peer_id).await,
            peer,
            last_message: summary.last_message.map(|m| m.text),
            last_activity,
            unread_count: summary.unread_count,
            created_at: summary.conversation.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::InMemoryUserDirectory;

    async fn service() -> (ConversationListService, Arc<ChatStore>) {
        let users = Arc::new(InMemoryUserDirectory::new());
        users.insert_named(1, "alice").await;
        users.insert_named(2, "bob").await;
        users.insert_named(3, "carol").await;
        let store = Arc::new(ChatStore::new(users.clone(), 4_000));
        let presence = PresenceRegistry::new();
        (
            ConversationListService::new(store.clone(), presence, users),
            store,
        )
    }

    #[tokio::test]
    async fn list_orders_by_recent_activity() {
        let (service, store) = service().await;
        let (with_bob, _) = store.create_conversation(1, 2).await.unwrap();
        let (with_carol, _) = store.create_conversation(1, 3).await.unwrap();
        store.append_message(with_bob.id, 2, "newest").await.unwrap();

        let entries = service.list(1, 0, 10, None).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].conversation_id, with_bob.id);
        assert_eq!(entries[0].last_message.as_deref(), Some("newest"));
        assert_eq!(entries[0].unread_count, 1);
        assert_eq!(entries[1].conversation_id, with_carol.id);
        assert_eq!(entries[1].last_message, None);
    }

    #[tokio::test]
    async fn search_filters_by_peer_name() {
        let (service, store) = service().await;
        store.create_conversation(1, 2).await.unwrap();
        store.create_conversation(1, 3).await.unwrap();

        let entries = service.list(1, 0, 10, Some("CAR")).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].peer.name, "carol");

        let entries = service.list(1, 0, 10, Some("nobody")).await.unwrap();
        assert!(entries.is_empty());

        // Blank search terms are ignored.
        let entries = service.list(1, 0, 10, Some("  ")).await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn pagination_applies_after_filtering() {
        let (service, store) = service().await;
        store.create_conversation(1, 2).await.unwrap();
        store.create_conversation(1, 3).await.unwrap();

        let page = service.list(1, 0, 1, None).await.unwrap();
        assert_eq!(page.len(), 1);
        let rest = service.list(1, 1, 10, None).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_ne!(page[0].conversation_id, rest[0].conversation_id);
    }

    #[tokio::test]
    async fn entry_reflects_unread_and_presence() {
        let (service, store) = service().await;
        let (conv, _) = store.create_conversation(1, 2).await.unwrap();
        let msg = store.append_message(conv.id, 2, "hi").await.unwrap();

        let entry = service.entry_for(1, conv.id).await.unwrap();
        assert_eq!(entry.unread_count, 1);
        assert!(!entry.peer_online);
        assert_eq!(entry.peer.name, "bob");

        store.mark_read(conv.id, 1, &[msg.id]).await.unwrap();
        let entry = service.entry_for(1, conv.id).await.unwrap();
        assert_eq!(entry.unread_count, 0);
    }
}
