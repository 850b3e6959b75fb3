use chrono::{SubsecRound, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use souk_shared::{ConversationId, MessageId, UserId};

use crate::conversations::conversation_exists;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{format_timestamp, timestamp_column, uuid_column, Message};

impl Database {
    /// Append a message to a conversation's log.
    ///
    /// The whole operation is one `BEGIN IMMEDIATE` transaction inserting a
    /// single row, so concurrent appends never overwrite each other. The
    /// timestamp is assigned here and never goes backwards within a
    /// conversation, even if the wall clock does.
    pub fn append_message(
        &mut self,
        conversation_id: ConversationId,
        sender_id: UserId,
        body: &str,
    ) -> Result<Message> {
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        if !conversation_exists(&tx, conversation_id)? {
            return Err(StoreError::NotFound);
        }

        let latest = tx
            .query_row(
                "SELECT timestamp FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY seq DESC
                 LIMIT 1",
                params![conversation_id.to_string()],
                |row| timestamp_column(row, 0),
            )
            .optional()?;

        let now = Utc::now().trunc_subsecs(6);
        let timestamp = match latest {
            Some(latest) if latest > now => latest,
            _ => now,
        };

        let message = Message {
            id: MessageId::new(),
            conversation_id,
            sender_id,
            body: body.to_string(),
            timestamp,
            delivered: false,
            read: false,
        };

        tx.execute(
            "INSERT INTO messages (id, conversation_id, sender_id, body, timestamp, delivered, read)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.id.to_string(),
                conversation_id.to_string(),
                sender_id.to_string(),
                message.body,
                format_timestamp(&message.timestamp),
                message.delivered,
                message.read,
            ],
        )?;
        tx.commit()?;

        tracing::debug!(
            conversation = %conversation_id,
            message = %message.id,
            sender = %sender_id,
            "appended message"
        );
        Ok(message)
    }

    /// Full message log of a conversation in append order. No pagination.
    pub fn get_messages_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, conversation_id, sender_id, body, timestamp, delivered, read
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY seq ASC",
        )?;

        let rows = stmt.query_map(params![conversation_id.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Most recent message of a conversation, if it has any.
    pub fn last_message_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<Message>> {
        self.conn()
            .query_row(
                "SELECT id, conversation_id, sender_id, body, timestamp, delivered, read
                 FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY timestamp DESC, seq DESC
                 LIMIT 1",
                params![conversation_id.to_string()],
                row_to_message,
            )
            .optional()
            .map_err(StoreError::Sqlite)
    }

    pub fn count_messages(&self, conversation_id: ConversationId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            params![conversation_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: MessageId(uuid_column(row, 0)?),
        conversation_id: ConversationId(uuid_column(row, 1)?),
        sender_id: UserId(uuid_column(row, 2)?),
        body: row.get(3)?,
        timestamp: timestamp_column(row, 4)?,
        delivered: row.get(5)?,
        read: row.get(6)?,
    })
}
