//! Inbox aggregation: one [`ThreadSummary`] per conversation that has at
//! least one message, newest first.

use souk_shared::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::ThreadSummary;

impl Database {
    /// Thread summaries for `user_id`, sorted by last-message timestamp,
    /// descending.
    ///
    /// Conversations without messages are skipped. Other participants that
    /// have no user record are skipped too; a group conversation yields one
    /// summary per other participant.
    pub fn thread_summaries(&self, user_id: UserId) -> Result<Vec<ThreadSummary>> {
        let mut summaries = Vec::new();

        for conversation in self.list_conversations_for_user(user_id)? {
            let Some(last_message) = self.last_message_for_conversation(conversation.id)? else {
                continue;
            };

            for other in conversation.other_participants(user_id) {
                match self.get_public_profile(other) {
                    Ok(user) => summaries.push(ThreadSummary {
                        conversation_id: conversation.id,
                        last_message: last_message.clone(),
                        user,
                    }),
                    Err(StoreError::NotFound) => {
                        tracing::debug!(
                            conversation = %conversation.id,
                            user = %other,
                            "skipping participant without a user record"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        // Stable: ties keep conversation creation order.
        summaries.sort_by(|a, b| b.last_message.timestamp.cmp(&a.last_message.timestamp));
        Ok(summaries)
    }
}
