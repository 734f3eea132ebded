//! Database module for threadchat
//!
//! Provides persistence for conversation history and title records.
//! Every mutation is committed before the call returns and every read goes
//! back to SQLite; nothing is cached in process.

mod schema;

pub use schema::*;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Database connection lock poisoned")]
    LockPoisoned,
    #[error("Corrupt message row in {conversation_id} at {sequence_id}: unknown role {role:?}")]
    UnknownRole {
        conversation_id: String,
        sequence_id: i64,
        role: String,
    },
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn lock(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    // ==================== Message Operations ====================

    /// Append a message to the end of a conversation.
    ///
    /// The conversation springs into existence with its first message.
    pub fn append(&self, conversation_id: &str, message: &Message) -> DbResult<MessageRecord> {
        let conn = self.lock()?;
        let now = Utc::now();

        let sequence_id: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sequence_id), 0) + 1 FROM messages WHERE conversation_id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )?;

        conn.execute(
            "INSERT INTO messages (conversation_id, sequence_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                conversation_id,
                sequence_id,
                message.role.as_str(),
                message.content,
                now.to_rfc3339(),
            ],
        )?;

        Ok(MessageRecord {
            conversation_id: conversation_id.to_string(),
            sequence_id,
            message: message.clone(),
            created_at: now,
        })
    }

    /// Ordered history of a conversation. Unknown ids yield an empty history.
    pub fn get_history(&self, conversation_id: &str) -> DbResult<Vec<Message>> {
        Ok(self
            .get_records(conversation_id)?
            .into_iter()
            .map(|r| r.message)
            .collect())
    }

    /// Ordered stored records of a conversation
    pub fn get_records(&self, conversation_id: &str) -> DbResult<Vec<MessageRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT conversation_id, sequence_id, role, content, created_at
             FROM messages WHERE conversation_id = ?1 ORDER BY sequence_id ASC",
        )?;

        let rows = stmt.query_map(params![conversation_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (conversation_id, sequence_id, role, content, created_at) = row?;
            let Some(role) = Role::parse(&role) else {
                return Err(DbError::UnknownRole {
                    conversation_id,
                    sequence_id,
                    role,
                });
            };
            records.push(MessageRecord {
                conversation_id,
                sequence_id,
                message: Message { role, content },
                created_at: parse_datetime(&created_at),
            });
        }
        Ok(records)
    }

    /// Number of messages stored for a conversation
    pub fn message_count(&self, conversation_id: &str) -> DbResult<i64> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )
        .map_err(DbError::from)
    }

    // ==================== Conversation Listing ====================

    /// All known conversation ids, most recent activity first
    #[allow(dead_code)] // The HTTP layer lists summaries
    pub fn list_conversations(&self) -> DbResult<Vec<String>> {
        Ok(self.list_summaries()?.into_iter().map(|s| s.id).collect())
    }

    /// Sidebar listing.
    ///
    /// Titled conversations come first, newest activity first. Conversations
    /// that only exist in the message table follow in the order their first
    /// message was stored.
    pub fn list_summaries(&self) -> DbResult<Vec<ConversationSummary>> {
        let conn = self.lock()?;

        let mut titled_stmt = conn.prepare(
            "SELECT thread_id, title, updated_at FROM thread_titles ORDER BY activity DESC",
        )?;
        let mut summaries = titled_stmt
            .query_map([], |row| {
                Ok(ConversationSummary {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    updated_at: Some(parse_datetime(&row.get::<_, String>(2)?)),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let seen: HashSet<String> = summaries.iter().map(|s| s.id.clone()).collect();

        let mut discovered_stmt = conn.prepare(
            "SELECT conversation_id FROM messages
             GROUP BY conversation_id ORDER BY MIN(rowid) ASC",
        )?;
        let discovered = discovered_stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        summaries.extend(
            discovered
                .into_iter()
                .filter(|id| !seen.contains(id))
                .map(|id| ConversationSummary {
                    id,
                    title: DEFAULT_TITLE.to_string(),
                    updated_at: None,
                }),
        );

        Ok(summaries)
    }

    // ==================== Title Operations ====================

    /// Display title, `"New Chat"` when none has been recorded
    pub fn get_title(&self, conversation_id: &str) -> DbResult<String> {
        Ok(self
            .get_title_record(conversation_id)?
            .map_or_else(|| DEFAULT_TITLE.to_string(), |r| r.title))
    }

    pub fn get_title_record(&self, conversation_id: &str) -> DbResult<Option<TitleRecord>> {
        let conn = self.lock()?;
        let result = conn.query_row(
            "SELECT thread_id, title, updated_at FROM thread_titles WHERE thread_id = ?1",
            params![conversation_id],
            |row| {
                Ok(TitleRecord {
                    thread_id: row.get(0)?,
                    title: row.get(1)?,
                    updated_at: parse_datetime(&row.get::<_, String>(2)?),
                })
            },
        );

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DbError::Sqlite(e)),
        }
    }

    /// Upsert the title record and make it the most recently active
    pub fn set_title(&self, conversation_id: &str, title: &str) -> DbResult<()> {
        let conn = self.lock()?;
        let now = Utc::now();

        conn.execute(
            "INSERT INTO thread_titles (thread_id, title, updated_at, activity)
             VALUES (?1, ?2, ?3, (SELECT COALESCE(MAX(activity), 0) + 1 FROM thread_titles))
             ON CONFLICT(thread_id) DO UPDATE SET
                 title = excluded.title,
                 updated_at = excluded.updated_at,
                 activity = excluded.activity",
            params![conversation_id, title, now.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Bump recency of an existing title record without changing the title.
    ///
    /// Returns `false` when the conversation has no title record; none is created.
    pub fn touch(&self, conversation_id: &str) -> DbResult<bool> {
        let conn = self.lock()?;
        let now = Utc::now();

        let updated = conn.execute(
            "UPDATE thread_titles
             SET updated_at = ?1,
                 activity = (SELECT COALESCE(MAX(activity), 0) + 1 FROM thread_titles)
             WHERE thread_id = ?2",
            params![now.to_rfc3339(), conversation_id],
        )?;
        Ok(updated > 0)
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
