use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ConversationId, MessageId, UserId};

/// A persisted chat message.
///
/// The recipient is derivable from the conversation minus the sender but is
/// kept explicit so unread queries never need a membership join. The read
/// flag only ever transitions false to true.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub text: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Ordering key used everywhere a message list is sorted: creation
    /// timestamp, ties broken by ascending id.
    pub fn sort_key(&self) -> (DateTime<Utc>, MessageId) {
        (self.created_at, self.id)
    }
}
