//! User records and the public-profile projection.

use chrono::{SubsecRound, Utc};
use rusqlite::{params, OptionalExtension};
use souk_shared::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{format_timestamp, timestamp_column, uuid_column, PublicProfile, User};

impl Database {
    /// Insert a new user. Names are trimmed, the email trimmed and lowercased.
    pub fn create_user(&self, first_name: &str, last_name: &str, email: &str) -> Result<User> {
        let email = email.trim().to_lowercase();

        let taken: Option<String> = self
            .conn()
            .query_row(
                "SELECT id FROM users WHERE email = ?1",
                params![email],
                |row| row.get(0),
            )
            .optional()?;
        if taken.is_some() {
            return Err(StoreError::AlreadyExists(format!("email {email}")));
        }

        let user = User {
            id: UserId::new(),
            first_name: first_name.trim().to_string(),
            last_name: last_name.trim().to_string(),
            email,
            created_at: Utc::now().trunc_subsecs(6),
        };

        self.conn().execute(
            "INSERT INTO users (id, first_name, last_name, email, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.id.to_string(),
                user.first_name,
                user.last_name,
                user.email,
                format_timestamp(&user.created_at),
            ],
        )?;

        tracing::debug!(user = %user.id, "created user");
        Ok(user)
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, first_name, last_name, email, created_at
                 FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Name-only projection of a user; never includes the email.
    pub fn get_public_profile(&self, id: UserId) -> Result<PublicProfile> {
        self.conn()
            .query_row(
                "SELECT id, first_name, last_name FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_profile,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Users that `user_id` could start a new chat with: everyone else,
    /// minus people already sharing a conversation with at least one
    /// message. Empty conversations don't count as an existing chat.
    pub fn list_new_users(&self, user_id: UserId) -> Result<Vec<PublicProfile>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, first_name, last_name
             FROM users
             WHERE id != ?1
               AND id NOT IN (
                   SELECT other.user_id
                   FROM conversation_participants me
                   JOIN conversation_participants other
                     ON other.conversation_id = me.conversation_id
                   WHERE me.user_id = ?1
                     AND other.user_id != ?1
                     AND EXISTS (
                         SELECT 1 FROM messages m
                         WHERE m.conversation_id = me.conversation_id
                     )
               )
             ORDER BY created_at ASC, rowid ASC",
        )?;

        let rows = stmt.query_map(params![user_id.to_string()], row_to_profile)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId(uuid_column(row, 0)?),
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        email: row.get(3)?,
        created_at: timestamp_column(row, 4)?,
    })
}

fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<PublicProfile> {
    Ok(PublicProfile {
        id: UserId(uuid_column(row, 0)?),
        first_name: row.get(1)?,
        last_name: row.get(2)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_get_user() {
        let db = Database::open_in_memory().unwrap();
        let user = db
            .create_user("  Grace ", "Hopper", " Grace@Example.COM ")
            .unwrap();

        assert_eq!(user.first_name, "Grace");
        assert_eq!(user.email, "grace@example.com");
        assert_eq!(db.get_user(user.id).unwrap(), user);
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.create_user("A", "One", "same@example.com").unwrap();

        let err = db.create_user("B", "Two", "SAME@example.com").unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[test]
    fn test_public_profile_has_no_email() {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user("Alan", "Turing", "alan@example.com").unwrap();

        let profile = db.get_public_profile(user.id).unwrap();
        assert_eq!(profile, user.public_profile());

        let json = serde_json::to_value(&profile).unwrap();
        assert!(json.get("email").is_none());
    }

    #[test]
    fn test_missing_user_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.get_user(UserId::new()),
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            db.get_public_profile(UserId::new()),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_new_users_excludes_active_chats_only() {
        let mut db = Database::open_in_memory().unwrap();
        let me = db.create_user("Me", "Self", "me@example.com").unwrap();
        let talked = db.create_user("Talked", "To", "talked@example.com").unwrap();
        let silent = db.create_user("Silent", "Chat", "silent@example.com").unwrap();
        let stranger = db.create_user("Total", "Stranger", "stranger@example.com").unwrap();

        let active = db.create_conversation(&[me.id, talked.id]).unwrap();
        db.append_message(active.id, me.id, "hello").unwrap();
        db.create_conversation(&[me.id, silent.id]).unwrap();

        let ids: Vec<UserId> = db
            .list_new_users(me.id)
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();

        assert_eq!(ids, vec![silent.id, stranger.id]);
    }
}
