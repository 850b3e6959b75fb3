//! Read-side queries for the inbox view. Pure reads, no side effects.

use souk_shared::UserId;
use souk_store::{Conversation, PublicProfile, ThreadSummary};

use crate::error::ChatError;
use crate::session::SharedDatabase;

#[derive(Clone)]
pub struct ThreadQueryService {
    db: SharedDatabase,
}

impl ThreadQueryService {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    /// Every conversation `user_id` takes part in that has at least one
    /// message, paired with its latest message and the other participant,
    /// newest first.
    pub async fn get_threads(&self, user_id: UserId) -> Result<Vec<ThreadSummary>, ChatError> {
        Ok(self.db.lock().await.thread_summaries(user_id)?)
    }

    /// Fetch or lazily create the direct conversation between two users.
    pub async fn conversation_with(
        &self,
        user_id: UserId,
        other_id: UserId,
    ) -> Result<Conversation, ChatError> {
        Ok(self
            .db
            .lock()
            .await
            .find_or_create_conversation(&[user_id, other_id])?)
    }

    /// People `user_id` has not chatted with yet.
    pub async fn new_users(&self, user_id: UserId) -> Result<Vec<PublicProfile>, ChatError> {
        Ok(self.db.lock().await.list_new_users(user_id)?)
    }
}
