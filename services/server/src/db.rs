//! Typed storage adapter over the embedded SQLite database.
//!
//! Every durable entity (accounts, messages, contact edges, call records,
//! auth tokens) goes through this layer.  Handlers never touch SQL directly.
//! All writes commit before the corresponding success reply is sent.

use chrono::{Duration, NaiveDateTime, Utc};
use msgr_protocol::{CallHistoryEntry, ChatMessage, ContactEntry, PendingRequest, UserSummary};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;

const SCHEMA_SQL: &str = include_str!("storage/schema.sql");

/// Timestamp format used for every persisted instant.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type DbResult<T> = Result<T, DbError>;

/// Current time in the persisted timestamp format (UTC, second resolution).
pub fn now_timestamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a persisted timestamp; `None` when the text is not in the
/// canonical format.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT).ok()
}

/// Stored credential material plus the profile fields returned on login.
#[derive(Debug, Clone)]
pub struct AuthRow {
    pub password_hash: String,
    pub salt: String,
    pub display_name: String,
    pub avatar_url: String,
    pub status_message: String,
}

/// Profile fields for token login and contact pushes.
#[derive(Debug, Clone)]
pub struct ProfileRow {
    pub display_name: String,
    pub avatar_url: String,
    pub status_message: String,
}

pub struct Db {
    conn: Connection,
}

impl Db {
    pub fn open(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> DbResult<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(SCHEMA_SQL)?;
        self.purge_expired_tokens()?;
        Ok(())
    }

    // -- users --------------------------------------------------------------

    /// Insert a new account.  Returns `false` when the username is taken.
    pub fn create_user(
        &self,
        username: &str,
        display_name: &str,
        password_hash: &str,
        salt_hex: &str,
    ) -> DbResult<bool> {
        let result = self.conn.execute(
            "INSERT INTO users (username, display_name, password_hash, salt, creation_date)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![username, display_name, password_hash, salt_hex, now_timestamp()],
        );
        match result {
            Ok(_) => Ok(true),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn auth_row(&self, username: &str) -> DbResult<Option<AuthRow>> {
        Ok(self
            .conn
            .query_row(
                "SELECT password_hash, salt, display_name, avatar_url, status_message
                 FROM users WHERE username = ?1",
                params![username],
                |r| {
                    Ok(AuthRow {
                        password_hash: r.get(0)?,
                        salt: r.get(1)?,
                        display_name: r.get(2)?,
                        avatar_url: r.get::<_, Option<String>>(3)?.unwrap_or_default(),
                        status_message: r.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    })
                },
            )
            .optional()?)
    }

    pub fn profile(&self, username: &str) -> DbResult<Option<ProfileRow>> {
        Ok(self
            .conn
            .query_row(
                "SELECT display_name, avatar_url, status_message FROM users WHERE username = ?1",
                params![username],
                |r| {
                    Ok(ProfileRow {
                        display_name: r.get(0)?,
                        avatar_url: r.get::<_, Option<String>>(1)?.unwrap_or_default(),
                        status_message: r.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    })
                },
            )
            .optional()?)
    }

    pub fn user_id(&self, username: &str) -> DbResult<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM users WHERE username = ?1",
                params![username],
                |r| r.get(0),
            )
            .optional()?)
    }

    pub fn update_profile(
        &self,
        username: &str,
        display_name: &str,
        status_message: &str,
        avatar_url: &str,
    ) -> DbResult<()> {
        self.conn.execute(
            "UPDATE users SET display_name = ?1, status_message = ?2, avatar_url = ?3
             WHERE username = ?4",
            params![display_name, status_message, avatar_url, username],
        )?;
        Ok(())
    }

    pub fn touch_last_seen(&self, username: &str) -> DbResult<()> {
        self.conn.execute(
            "UPDATE users SET last_seen = ?1 WHERE username = ?2",
            params![now_timestamp(), username],
        )?;
        Ok(())
    }

    pub fn search_users(&self, term: &str, exclude: &str) -> DbResult<Vec<UserSummary>> {
        let pattern = format!("%{term}%");
        let mut stmt = self.conn.prepare(
            "SELECT username, display_name FROM users
             WHERE (username LIKE ?1 OR display_name LIKE ?1) AND username != ?2
             LIMIT 20",
        )?;
        let rows = stmt.query_map(params![pattern, exclude], |r| {
            Ok(UserSummary {
                username: r.get(0)?,
                displayname: r.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // -- messages -----------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn insert_message(
        &self,
        from_user: &str,
        to_user: &str,
        payload: &str,
        timestamp: &str,
        reply_to_id: Option<i64>,
        file_id: &str,
        file_name: &str,
        file_url: &str,
    ) -> DbResult<i64> {
        self.conn.execute(
            "INSERT INTO messages (fromUser, toUser, payload, timestamp, reply_to_id,
                                   file_id, file_name, file_url)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![from_user, to_user, payload, timestamp, reply_to_id, file_id, file_name, file_url],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// `(fromUser, toUser)` of a message, or `None` when the id is unknown.
    pub fn message_parties(&self, id: i64) -> DbResult<Option<(String, String)>> {
        Ok(self
            .conn
            .query_row(
                "SELECT fromUser, toUser FROM messages WHERE id = ?1",
                params![id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?)
    }

    /// 0 -> 1 only; re-marking a delivered message is a no-op.
    pub fn mark_delivered(&self, id: i64) -> DbResult<()> {
        self.conn.execute(
            "UPDATE messages SET is_delivered = 1 WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    pub fn mark_read(&self, id: i64) -> DbResult<()> {
        self.conn
            .execute("UPDATE messages SET is_read = 1 WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn edit_message(&self, id: i64, payload: &str) -> DbResult<()> {
        self.conn.execute(
            "UPDATE messages SET payload = ?1, is_edited = 1 WHERE id = ?2",
            params![payload, id],
        )?;
        Ok(())
    }

    pub fn delete_message(&self, id: i64) -> DbResult<()> {
        self.conn
            .execute("DELETE FROM messages WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Newest <= 20 rows of the pair conversation, optionally older than
    /// `before_id`, returned in chronological (ascending) order.
    pub fn history(&self, me: &str, peer: &str, before_id: i64) -> DbResult<Vec<ChatMessage>> {
        let base = "SELECT id, fromUser, toUser, payload, timestamp, is_delivered, is_read,
                           is_edited, reply_to_id, file_id, file_name, file_url
                    FROM messages
                    WHERE ((fromUser = ?1 AND toUser = ?2) OR (fromUser = ?2 AND toUser = ?1))";
        let mut rows = if before_id > 0 {
            let sql = format!("{base} AND id < ?3 ORDER BY id DESC LIMIT 20");
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params![me, peer, before_id], row_to_message)?;
            rows.collect::<Result<Vec<_>, _>>()?
        } else {
            let sql = format!("{base} ORDER BY id DESC LIMIT 20");
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params![me, peer], row_to_message)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        rows.reverse();
        Ok(rows)
    }

    /// Per-sender unread counts for the freshly logged-in user.
    pub fn unread_counts(&self, username: &str) -> DbResult<Vec<(String, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT fromUser, COUNT(*) FROM messages
             WHERE toUser = ?1 AND is_read = 0
             GROUP BY fromUser",
        )?;
        let rows = stmt.query_map(params![username], |r| Ok((r.get(0)?, r.get(1)?)))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // -- contacts -----------------------------------------------------------

    /// Status of the canonical edge, or `None` when no edge exists.
    pub fn contact_status(&self, id_1: i64, id_2: i64) -> DbResult<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                "SELECT status FROM contacts WHERE user_id_1 = ?1 AND user_id_2 = ?2",
                params![id_1, id_2],
                |r| r.get(0),
            )
            .optional()?)
    }

    pub fn insert_contact_request(&self, id_1: i64, id_2: i64) -> DbResult<()> {
        self.conn.execute(
            "INSERT INTO contacts (user_id_1, user_id_2, status, creation_date)
             VALUES (?1, ?2, 0, ?3)",
            params![id_1, id_2, now_timestamp()],
        )?;
        Ok(())
    }

    /// Promote a pending edge to accepted.  Returns `false` when no pending
    /// edge existed for the pair.
    pub fn accept_contact(&self, id_1: i64, id_2: i64) -> DbResult<bool> {
        let changed = self.conn.execute(
            "UPDATE contacts SET status = 1
             WHERE user_id_1 = ?1 AND user_id_2 = ?2 AND status = 0",
            params![id_1, id_2],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_pending_contact(&self, id_1: i64, id_2: i64) -> DbResult<()> {
        self.conn.execute(
            "DELETE FROM contacts WHERE user_id_1 = ?1 AND user_id_2 = ?2 AND status = 0",
            params![id_1, id_2],
        )?;
        Ok(())
    }

    /// Accepted neighbors of a user, excluding the user themselves.
    pub fn contacts_of(&self, user_id: i64) -> DbResult<Vec<ContactEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT u.username, u.display_name, u.last_seen, u.status_message, u.avatar_url
             FROM users u
             JOIN contacts c ON (u.id = c.user_id_1 OR u.id = c.user_id_2)
             WHERE (c.user_id_1 = ?1 OR c.user_id_2 = ?1)
               AND c.status = 1
               AND u.id != ?1",
        )?;
        let rows = stmt.query_map(params![user_id], |r| {
            Ok(ContactEntry {
                username: r.get(0)?,
                displayname: r.get(1)?,
                last_seen: r.get::<_, Option<String>>(2)?.unwrap_or_default(),
                statusmessage: r.get::<_, Option<String>>(3)?.unwrap_or_default(),
                avatar_url: r.get::<_, Option<String>>(4)?.unwrap_or_default(),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Pending edges involving the user, in either direction; the client
    /// distinguishes which side should act.
    pub fn pending_requests_for(&self, user_id: i64) -> DbResult<Vec<PendingRequest>> {
        let mut stmt = self.conn.prepare(
            "SELECT u.username, u.display_name, u.avatar_url FROM users u
             JOIN contacts c
               ON u.id = (CASE WHEN c.user_id_1 = ?1 THEN c.user_id_2 ELSE c.user_id_1 END)
             WHERE (c.user_id_1 = ?1 OR c.user_id_2 = ?1) AND c.status = 0",
        )?;
        let rows = stmt.query_map(params![user_id], |r| {
            Ok(PendingRequest {
                from_username: r.get(0)?,
                from_displayname: r.get(1)?,
                from_avatar_url: r.get::<_, Option<String>>(2)?.unwrap_or_default(),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // -- calls --------------------------------------------------------------

    pub fn create_call(
        &self,
        call_id: &str,
        caller: &str,
        callee: &str,
        caller_ip: &str,
        caller_port: u16,
    ) -> DbResult<()> {
        self.conn.execute(
            "INSERT INTO call_history (call_id, caller_username, callee_username, status,
                                       start_time, caller_ip, caller_port)
             VALUES (?1, ?2, ?3, 'ringing', ?4, ?5, ?6)",
            params![call_id, caller, callee, now_timestamp(), caller_ip, caller_port],
        )?;
        Ok(())
    }

    pub fn call_connected(&self, call_id: &str, callee_ip: &str, callee_port: u16) -> DbResult<()> {
        self.conn.execute(
            "UPDATE call_history
             SET status = 'connected', connect_time = ?1, callee_ip = ?2, callee_port = ?3
             WHERE call_id = ?4",
            params![now_timestamp(), callee_ip, callee_port, call_id],
        )?;
        Ok(())
    }

    /// Terminal transition: `completed`, `missed` or `rejected`.  Duration is
    /// derived from `connect_time` when the call ever connected, else 0.
    pub fn call_ended(&self, call_id: &str, status: &str) -> DbResult<()> {
        self.conn.execute(
            "UPDATE call_history
             SET status = ?1,
                 end_time = ?2,
                 duration_seconds = CASE
                     WHEN connect_time IS NULL THEN 0
                     ELSE CAST(ROUND((julianday(?2) - julianday(connect_time)) * 86400.0) AS INTEGER)
                 END
             WHERE call_id = ?3",
            params![status, now_timestamp(), call_id],
        )?;
        Ok(())
    }

    /// Up to 50 calls involving the user, newest first, annotated with
    /// `call_type` from the user's perspective.
    pub fn call_history(&self, username: &str) -> DbResult<Vec<CallHistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT call_id, caller_username, callee_username, status,
                    start_time, end_time, duration_seconds
             FROM call_history
             WHERE caller_username = ?1 OR callee_username = ?1
             ORDER BY start_time DESC LIMIT 50",
        )?;
        let rows = stmt.query_map(params![username], |r| {
            let caller: String = r.get(1)?;
            Ok(CallHistoryEntry {
                call_id: r.get(0)?,
                call_type: if caller == username {
                    "outgoing".to_owned()
                } else {
                    "incoming".to_owned()
                },
                caller,
                callee: r.get(2)?,
                status: r.get(3)?,
                start_time: r.get(4)?,
                end_time: r.get::<_, Option<String>>(5)?.unwrap_or_default(),
                duration_seconds: r.get::<_, Option<i64>>(6)?.unwrap_or(0),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // -- tokens -------------------------------------------------------------

    /// One active token per username; a new row replaces the old one.
    pub fn upsert_token(&self, username: &str, token: &str) -> DbResult<()> {
        let expires_at = (Utc::now() + Duration::days(30))
            .format(TIMESTAMP_FORMAT)
            .to_string();
        self.conn.execute(
            "INSERT OR REPLACE INTO tokens (username, token, expires_at) VALUES (?1, ?2, ?3)",
            params![username, token, expires_at],
        )?;
        Ok(())
    }

    pub fn token_row(&self, username: &str) -> DbResult<Option<(String, String)>> {
        Ok(self
            .conn
            .query_row(
                "SELECT token, expires_at FROM tokens WHERE username = ?1",
                params![username],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?)
    }

    pub fn delete_token(&self, username: &str) -> DbResult<()> {
        self.conn
            .execute("DELETE FROM tokens WHERE username = ?1", params![username])?;
        Ok(())
    }

    fn purge_expired_tokens(&self) -> DbResult<()> {
        self.conn
            .execute("DELETE FROM tokens WHERE expires_at < ?1", params![now_timestamp()])?;
        Ok(())
    }
}

fn row_to_message(r: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: r.get(0)?,
        from_user: r.get(1)?,
        to_user: r.get(2)?,
        payload: r.get(3)?,
        timestamp: r.get(4)?,
        is_delivered: r.get(5)?,
        is_read: r.get(6)?,
        is_edited: r.get(7)?,
        reply_to_id: r.get(8)?,
        file_id: r.get::<_, Option<String>>(9)?.unwrap_or_default(),
        file_name: r.get::<_, Option<String>>(10)?.unwrap_or_default(),
        file_url: r.get::<_, Option<String>>(11)?.unwrap_or_default(),
        temp_id: None,
    })
}
