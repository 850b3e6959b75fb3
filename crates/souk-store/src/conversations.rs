//! CRUD operations for [`Conversation`] records.

use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use souk_shared::{ConversationId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{format_timestamp, timestamp_column, uuid_column, Conversation};

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Create a conversation between `participants`.
    ///
    /// Does not check for an existing conversation with the same set; use
    /// [`Database::find_or_create_conversation`] for that.
    pub fn create_conversation(&mut self, participants: &[UserId]) -> Result<Conversation> {
        let (participants, key) = participant_key(participants)?;

        let conversation = Conversation {
            id: ConversationId::new(),
            participants,
            created_at: Utc::now().trunc_subsecs(6),
        };

        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT INTO conversations (id, participant_key, created_at)
             VALUES (?1, ?2, ?3)",
            params![
                conversation.id.to_string(),
                key,
                format_timestamp(&conversation.created_at),
            ],
        )?;
        for (position, user_id) in conversation.participants.iter().enumerate() {
            tx.execute(
                "INSERT INTO conversation_participants (conversation_id, user_id, position)
                 VALUES (?1, ?2, ?3)",
                params![conversation.id.to_string(), user_id.to_string(), position as i64],
            )?;
        }
        tx.commit()?;

        tracing::debug!(
            conversation = %conversation.id,
            participants = conversation.participants.len(),
            "created conversation"
        );
        Ok(conversation)
    }

    /// Return the conversation for exactly this participant set, creating it
    /// when none exists.
    pub fn find_or_create_conversation(&mut self, participants: &[UserId]) -> Result<Conversation> {
        if let Some(existing) = self.find_conversation_by_participants(participants)? {
            return Ok(existing);
        }
        self.create_conversation(participants)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Exact match on the participant set (order-insensitive). When racing
    /// creators produced duplicates, the oldest one wins.
    pub fn find_conversation_by_participants(
        &self,
        participants: &[UserId],
    ) -> Result<Option<Conversation>> {
        let (_, key) = participant_key(participants)?;

        let row: Option<(String, String)> = self
            .conn()
            .query_row(
                "SELECT id, created_at FROM conversations
                 WHERE participant_key = ?1
                 ORDER BY created_at ASC, rowid ASC
                 LIMIT 1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((id, created_at)) => {
                let id = ConversationId::parse(&id)?;
                let created_at = DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc);
                Ok(Some(Conversation {
                    id,
                    participants: load_participants(self.conn(), id)?,
                    created_at,
                }))
            }
            None => Ok(None),
        }
    }

    /// Fetch a single conversation by id.
    pub fn get_conversation(&self, id: ConversationId) -> Result<Conversation> {
        let created_at = self
            .conn()
            .query_row(
                "SELECT created_at FROM conversations WHERE id = ?1",
                params![id.to_string()],
                |row| timestamp_column(row, 0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;

        Ok(Conversation {
            id,
            participants: load_participants(self.conn(), id)?,
            created_at,
        })
    }

    pub fn conversation_exists(&self, id: ConversationId) -> Result<bool> {
        conversation_exists(self.conn(), id)
    }

    /// Every conversation `user_id` takes part in, oldest first.
    pub fn list_conversations_for_user(&self, user_id: UserId) -> Result<Vec<Conversation>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.id, c.created_at
             FROM conversations c
             JOIN conversation_participants p ON p.conversation_id = c.id
             WHERE p.user_id = ?1
             ORDER BY c.created_at ASC, c.rowid ASC",
        )?;

        let rows = stmt.query_map(params![user_id.to_string()], |row| {
            Ok((ConversationId(uuid_column(row, 0)?), timestamp_column(row, 1)?))
        })?;

        let mut conversations = Vec::new();
        for row in rows {
            let (id, created_at) = row?;
            conversations.push(Conversation {
                id,
                participants: load_participants(self.conn(), id)?,
                created_at,
            });
        }
        Ok(conversations)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Deduplicate (keeping first-seen order) and build the lookup key: the
/// sorted ids joined with commas.
fn participant_key(participants: &[UserId]) -> Result<(Vec<UserId>, String)> {
    let mut unique: Vec<UserId> = Vec::with_capacity(participants.len());
    for p in participants {
        if !unique.contains(p) {
            unique.push(*p);
        }
    }

    if unique.len() < 2 {
        return Err(StoreError::InvalidParticipants(format!(
            "need at least 2 distinct participants, got {}",
            unique.len()
        )));
    }

    let mut sorted: Vec<String> = unique.iter().map(|p| p.to_string()).collect();
    sorted.sort();
    Ok((unique, sorted.join(",")))
}

pub(crate) fn conversation_exists(conn: &Connection, id: ConversationId) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM conversations WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn load_participants(conn: &Connection, id: ConversationId) -> Result<Vec<UserId>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM conversation_participants
         WHERE conversation_id = ?1
         ORDER BY position ASC",
    )?;
    let rows = stmt.query_map(params![id.to_string()], |row| {
        Ok(UserId(uuid_column(row, 0)?))
    })?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(StoreError::Sqlite)
}
