//! Database schema and types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS messages (
    conversation_id TEXT NOT NULL,
    sequence_id INTEGER NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL,

    PRIMARY KEY (conversation_id, sequence_id)
);

CREATE TABLE IF NOT EXISTS thread_titles (
    thread_id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    activity INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_thread_titles_activity ON thread_titles(activity DESC);
";

/// Title shown for conversations that have no title record yet
pub const DEFAULT_TITLE: &str = "New Chat";

/// Who authored a message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// One chat message. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A message as stored, with its position in the conversation
#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub conversation_id: String,
    pub sequence_id: i64,
    #[serde(flatten)]
    pub message: Message,
    pub created_at: DateTime<Utc>,
}

/// Title side-record for a conversation
#[derive(Debug, Clone, Serialize)]
pub struct TitleRecord {
    pub thread_id: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
}

/// Sidebar entry: identifier plus display title
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    /// `None` for conversations that have messages but no title record
    pub updated_at: Option<DateTime<Utc>>,
}
