//! Domain model structs persisted in the chat database.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use souk_shared::{ConversationId, MessageId, MessagePayload, UserId};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered user. Credentials live with the auth service, not here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
    /// Lowercased, unique.
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn public_profile(&self) -> PublicProfile {
        PublicProfile {
            id: self.id,
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
        }
    }
}

/// The part of a user that other users may see.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicProfile {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A chat thread between a fixed set of participants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    /// In the order given at creation. Immutable once created.
    pub participants: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn has_participant(&self, user_id: UserId) -> bool {
        self.participants.contains(&user_id)
    }

    /// Everyone except `user_id`.
    pub fn other_participants(&self, user_id: UserId) -> impl Iterator<Item = UserId> + '_ {
        self.participants
            .iter()
            .copied()
            .filter(move |p| *p != user_id)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message, owned by its conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub body: String,
    /// Assigned by the store when the message is appended.
    pub timestamp: DateTime<Utc>,
    /// Reserved; never transitioned.
    pub delivered: bool,
    /// Reserved; never transitioned.
    pub read: bool,
}

impl From<Message> for MessagePayload {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            chat_id: m.conversation_id,
            sender_id: m.sender_id,
            message: m.body,
            timestamp: m.timestamp,
            delivered: m.delivered,
            read: m.read,
        }
    }
}

// ---------------------------------------------------------------------------
// Thread summary (derived, never stored)
// ---------------------------------------------------------------------------

/// Inbox entry: a conversation paired with its latest message and the other
/// participant's public profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThreadSummary {
    pub conversation_id: ConversationId,
    pub last_message: Message,
    pub user: PublicProfile,
}

// ---------------------------------------------------------------------------
// Column helpers
// ---------------------------------------------------------------------------

/// Fixed-width RFC-3339 (`...T12:00:00.123456Z`), so text order is time order.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn timestamp_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn uuid_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
