use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ConversationId, UserId};
use crate::users::UserProfile;

/// The durable two-party chat record. At most one exists per unordered
/// pair of participants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub user_a: UserId,
    pub user_b: UserId,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// Participant pair in canonical (ascending) order.
    pub fn pair(user_a: UserId, user_b: UserId) -> (UserId, UserId) {
        if user_a <= user_b {
            (user_a, user_b)
        } else {
            (user_b, user_a)
        }
    }

    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.user_a == user_id || self.user_b == user_id
    }

    /// The other participant from `viewer`'s point of view.
    pub fn peer_of(&self, viewer: UserId) -> Option<UserId> {
        if viewer == self.user_a {
            Some(self.user_b)
        } else if viewer == self.user_b {
            Some(self.user_a)
        } else {
            None
        }
    }
}

/// Viewer-specific conversation row for the sidebar: peer display fields,
/// last message, unread count and live presence. Derived by query, never
/// stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatEntry {
    pub conversation_id: ConversationId,
    pub peer: UserProfile,
    pub peer_online: bool,
    pub last_message: Option<String>,
    pub last_activity: DateTime<Utc>,
    pub unread_count: u32,
    pub created_at: DateTime<Utc>,
}
