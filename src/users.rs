//! Collaborator seam for the external user directory.
//!
//! The chat core never stores user profiles. It only needs to resolve a
//! numeric identity to display fields, so the directory is a trait and the
//! deployment wires in whatever lookup service it has.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::models::UserId;

/// Display fields for one user, as returned by the directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Resolve a user id to its display fields. `None` means the identity
    /// does not exist.
    async fn resolve(&self, user_id: UserId) -> Option<UserProfile>;
}

/// In-process directory used behind the trust boundary and in tests.
#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<UserId, UserProfile>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, profile: UserProfile) {
        self.users.write().await.insert(profile.id, profile);
    }

    pub async fn insert_named(&self, id: UserId, name: &str) {
        self.insert(UserProfile {
            id,
            name: name.to_string(),
            avatar: None,
        })
        .await;
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn resolve(&self, user_id: UserId) -> Option<UserProfile> {
        self.users.read().await.get(&user_id).cloned()
    }
}
