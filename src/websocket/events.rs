//! Wire contract of the realtime channel. JSON payloads tagged with
//! `"type"`, camelCase throughout.

use serde::{Deserialize, Serialize};

use crate::models::{ChatEntry, ConversationId, Message, MessageId, UserId};

/// Client to server events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    JoinChat { conversation_id: ConversationId },

    #[serde(rename_all = "camelCase")]
    LeaveChat { conversation_id: ConversationId },

    #[serde(rename_all = "camelCase")]
    SendMessage {
        conversation_id: ConversationId,
        text: String,
    },

    #[serde(rename_all = "camelCase")]
    MarkAsRead {
        conversation_id: ConversationId,
        message_ids: Vec<MessageId>,
    },

    #[serde(rename_all = "camelCase")]
    Typing {
        conversation_id: ConversationId,
        is_typing: bool,
    },
}

/// Server to client events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    NewMessage { message: Message },

    #[serde(rename_all = "camelCase")]
    MessageRead {
        conversation_id: ConversationId,
        message_ids: Vec<MessageId>,
    },

    /// A peer opened a brand-new conversation with the receiver.
    #[serde(rename_all = "camelCase")]
    NewChat { entry: ChatEntry },

    /// Sidebar refresh: unread count or last message changed.
    #[serde(rename_all = "camelCase")]
    ChatUnread { entry: ChatEntry },

    #[serde(rename_all = "camelCase")]
    UserStatusChanged { user_id: UserId, online: bool },

    #[serde(rename_all = "camelCase")]
    InitialOnlineUsers { user_ids: Vec<UserId> },

    #[serde(rename_all = "camelCase")]
    Typing {
        conversation_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
    },

    #[serde(rename_all = "camelCase")]
    Error { message: String },
}

impl ServerEvent {
    /// Serialize for the socket. Serialization of these enums cannot fail;
    /// a failure would be a programming error, so it degrades to an error
    /// event rather than panicking.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize server event");
            r#"{"type":"error","message":"internal serialization failure"}"#.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_use_wire_names() {
        let evt: ClientEvent =
            serde_json::from_str(r#"{"type":"joinChat","conversationId":5}"#).unwrap();
        assert_eq!(evt, ClientEvent::JoinChat { conversation_id: 5 });

        let evt: ClientEvent = serde_json::from_str(
            r#"{"type":"markAsRead","conversationId":5,"messageIds":[1,2]}"#,
        )
        .unwrap();
        assert_eq!(
            evt,
            ClientEvent::MarkAsRead {
                conversation_id: 5,
                message_ids: vec![1, 2]
            }
        );

        let evt: ClientEvent =
            serde_json::from_str(r#"{"type":"typing","conversationId":5,"isTyping":true}"#)
                .unwrap();
        assert_eq!(
            evt,
            ClientEvent::Typing {
                conversation_id: 5,
                is_typing: true
            }
        );
    }

    #[test]
    fn server_events_serialize_with_wire_names() {
        let json = ServerEvent::UserStatusChanged {
            user_id: 3,
            online: true,
        }
        .to_json();
        assert_eq!(
            json,
            r#"{"type":"userStatusChanged","userId":3,"online":true}"#
        );

        let json = ServerEvent::InitialOnlineUsers { user_ids: vec![1] }.to_json();
        assert_eq!(json, r#"{"type":"initialOnlineUsers","userIds":[1]}"#);

        let json = ServerEvent::MessageRead {
            conversation_id: 4,
            message_ids: vec![9],
        }
        .to_json();
        assert_eq!(
            json,
            r#"{"type":"messageRead","conversationId":4,"messageIds":[9]}"#
        );
    }

    #[test]
    fn malformed_payload_is_rejected() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"type":"sendMessage"}"#).is_err());
        assert!(serde_json::from_str::<ClientEvent>("not json").is_err());
    }
}
