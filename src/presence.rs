//! In-memory presence registry.
//!
//! Tracks the number of open realtime connections per user. A user is
//! online iff that count is greater than zero; the count is never
//! persisted and is rebuilt from scratch on process restart.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::models::UserId;

#[derive(Debug, Clone)]
struct PresenceEntry {
    connections: u32,
    last_seen: DateTime<Utc>,
}

/// Connection counter map, safe under concurrent open/close from many
/// connections for the same user (multiple devices or tabs).
#[derive(Default, Clone)]
pub struct PresenceRegistry {
    inner: Arc<RwLock<HashMap<UserId, PresenceEntry>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly opened connection. Returns the connection count
    /// after the increment; a return of 1 means the user just came online.
    pub async fn connection_opened(&self, user_id: UserId) -> u32 {
        let mut guard = self.inner.write().await;
        let entry = guard.entry(user_id).or_insert(PresenceEntry {
            connections: 0,
            last_seen: Utc::now(),
        });
        entry.connections += 1;
        entry.last_seen = Utc::now();
        entry.connections
    }

    /// Record a closed connection. Floors at zero, never negative.
    /// Returns the count after the decrement; 0 means the user went
    /// offline.
    pub async fn connection_closed(&self, user_id: UserId) -> u32 {
        let mut guard = self.inner.write().await;
        match guard.get_mut(&user_id) {
            Some(entry) => {
                entry.connections = entry.connections.saturating_sub(1);
                entry.last_seen = Utc::now();
                let remaining = entry.connections;
                if remaining == 0 {
                    guard.remove(&user_id);
                }
                remaining
            }
            None => 0,
        }
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.inner
            .read()
            .await
            .get(&user_id)
            .map(|e| e.connections > 0)
            .unwrap_or(false)
    }

    /// All currently-online user ids, used to seed a newly connected
    /// client.
    pub async fn online_snapshot(&self) -> HashSet<UserId> {
        self.inner
            .read()
            .await
            .iter()
            .filter(|(_, e)| e.connections > 0)
            .map(|(id, _)| *id)
            .collect()
    }

    pub async fn last_seen(&self, user_id: UserId) -> Option<DateTime<Utc>> {
        self.inner.read().await.get(&user_id).map(|e| e.last_seen)
    }
}
