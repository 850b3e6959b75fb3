//! v001 -- Initial schema creation.
//!
//! Creates `users`, `conversations`, `conversation_participants` and
//! `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (public profile + contact email; no credentials)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    first_name TEXT NOT NULL,
    last_name  TEXT NOT NULL,
    email      TEXT NOT NULL UNIQUE,        -- lowercased
    created_at TEXT NOT NULL                -- RFC-3339, microsecond precision
);

-- ----------------------------------------------------------------
-- Conversations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id              TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    participant_key TEXT NOT NULL,              -- sorted, comma-joined user ids
    created_at      TEXT NOT NULL
);

-- Not UNIQUE: racing creators can produce duplicate conversations.
CREATE INDEX IF NOT EXISTS idx_conversations_participant_key
    ON conversations(participant_key);

CREATE TABLE IF NOT EXISTS conversation_participants (
    conversation_id TEXT NOT NULL,              -- FK -> conversations(id)
    user_id         TEXT NOT NULL,
    position        INTEGER NOT NULL,

    PRIMARY KEY (conversation_id, user_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_participants_user
    ON conversation_participants(user_id);

-- ----------------------------------------------------------------
-- Messages (one row per message, append-only)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,  -- append order
    id              TEXT NOT NULL UNIQUE,               -- UUID v4
    conversation_id TEXT NOT NULL,                      -- FK -> conversations(id)
    sender_id       TEXT NOT NULL,
    body            TEXT NOT NULL,
    timestamp       TEXT NOT NULL,                      -- server-assigned
    delivered       INTEGER NOT NULL DEFAULT 0,         -- reserved
    read            INTEGER NOT NULL DEFAULT 0,         -- reserved

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_seq
    ON messages(conversation_id, seq);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
