//! Process-wide presence: which connection currently represents each online
//! user.
//!
//! Volatile by nature. Entries are created on join, removed on disconnect and
//! everything is dropped at shutdown. Only the most recent connection per
//! user is tracked. The registry never pushes notifications itself; the
//! session manager queries it and decides who to tell.

use std::collections::HashMap;
use std::sync::Arc;

use souk_shared::{ConnectionId, UserId};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Clone, Default)]
pub struct PresenceRegistry {
    entries: Arc<RwLock<HashMap<UserId, ConnectionId>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `connection_id` as the active connection for `user_id`,
    /// replacing any previous one.
    pub async fn join(&self, user_id: UserId, connection_id: ConnectionId) {
        let previous = self.entries.write().await.insert(user_id, connection_id);
        if let Some(previous) = previous.filter(|p| *p != connection_id) {
            debug!(
                user = %user_id,
                previous = %previous.short(),
                current = %connection_id.short(),
                "Presence moved to newer connection"
            );
        }
    }

    /// Remove the entry owned by `connection_id`. Returns the user that went
    /// offline, or `None` if that connection was not the active one.
    pub async fn leave(&self, connection_id: ConnectionId) -> Option<UserId> {
        let mut entries = self.entries.write().await;
        let user_id = entries
            .iter()
            .find(|(_, conn)| **conn == connection_id)
            .map(|(user, _)| *user)?;
        entries.remove(&user_id);
        Some(user_id)
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.entries.read().await.contains_key(&user_id)
    }

    pub async fn online_count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Forget everyone. Called at shutdown.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}
