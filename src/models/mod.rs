pub mod conversation;
pub mod message;

pub use conversation::{ChatEntry, Conversation};
pub use message::Message;

/// Stable numeric user identity supplied by the external user directory.
pub type UserId = i64;

/// Store-assigned conversation identity.
pub type ConversationId = i64;

/// Store-assigned, store-wide monotonic message identity.
pub type MessageId = i64;
