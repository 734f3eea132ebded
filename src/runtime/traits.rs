//! Trait abstractions for runtime I/O
//!
//! The storage seam lets the executor run against an in-memory store in
//! tests. The model seam is `crate::llm::LlmService`.

use crate::db::{Database, Message, MessageRecord};
use async_trait::async_trait;
use std::sync::Arc;

/// Conversation persistence as seen by a running conversation
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append a message to the end of the conversation
    async fn append(&self, conv_id: &str, message: &Message) -> Result<MessageRecord, String>;

    /// Get the ordered history of the conversation
    async fn get_history(&self, conv_id: &str) -> Result<Vec<Message>, String>;

    /// Store the conversation's title
    async fn set_title(&self, conv_id: &str, title: &str) -> Result<(), String>;

    /// Bump recency of an already titled conversation
    async fn touch(&self, conv_id: &str) -> Result<bool, String>;
}

#[async_trait]
impl<T: ConversationStore + ?Sized> ConversationStore for Arc<T> {
    async fn append(&self, conv_id: &str, message: &Message) -> Result<MessageRecord, String> {
        (**self).append(conv_id, message).await
    }

    async fn get_history(&self, conv_id: &str) -> Result<Vec<Message>, String> {
        (**self).get_history(conv_id).await
    }

    async fn set_title(&self, conv_id: &str, title: &str) -> Result<(), String> {
        (**self).set_title(conv_id, title).await
    }

    async fn touch(&self, conv_id: &str) -> Result<bool, String> {
        (**self).touch(conv_id).await
    }
}

/// Adapter to use Database as `ConversationStore`
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ConversationStore for DatabaseStorage {
    async fn append(&self, conv_id: &str, message: &Message) -> Result<MessageRecord, String> {
        self.db.append(conv_id, message).map_err(|e| e.to_string())
    }

    async fn get_history(&self, conv_id: &str) -> Result<Vec<Message>, String> {
        self.db.get_history(conv_id).map_err(|e| e.to_string())
    }

    async fn set_title(&self, conv_id: &str, title: &str) -> Result<(), String> {
        self.db.set_title(conv_id, title).map_err(|e| e.to_string())
    }

    async fn touch(&self, conv_id: &str) -> Result<bool, String> {
        self.db.touch(conv_id).map_err(|e| e.to_string())
    }
}
