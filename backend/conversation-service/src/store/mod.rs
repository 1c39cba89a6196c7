//! Durable conversation and message storage
//!
//! Two implementations back the same traits: [`PgStore`] over tokio-postgres
//! and [`MemoryStore`] for tests and local runs. Both assign per-conversation
//! sequence numbers and strictly increasing `created_at` values under a
//! per-conversation lock, so concurrent appends never share an order position.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Attachment, Conversation, Message, MessageType, Pagination, SortOrder};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("message is deleted")]
    Deleted,
    #[error("store operation timed out")]
    Timeout,
    #[error("database error: {0}")]
    Database(String),
    #[error("connection pool error: {0}")]
    Pool(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(e: tokio_postgres::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for StoreError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        StoreError::Pool(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Message content to append; id, order position and timestamps are assigned
/// by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub sender_id: Uuid,
    pub message_type: MessageType,
    pub content: Option<String>,
    pub attachment: Option<Attachment>,
}

impl NewMessage {
    pub fn text(sender_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            sender_id,
            message_type: MessageType::Text,
            content: Some(content.into()),
            attachment: None,
        }
    }

    pub fn file(sender_id: Uuid, message_type: MessageType, attachment: Attachment) -> Self {
        Self {
            sender_id,
            message_type,
            content: None,
            attachment: Some(attachment),
        }
    }
}

/// Result of [`ConversationStore::create_conversation`]
#[derive(Debug, Clone)]
pub struct CreatedConversation {
    pub conversation: Conversation,
    /// `false` when a conversation with the same participant set already existed
    pub created: bool,
    pub initial_message: Option<Message>,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create a conversation for exactly `participants`, or return the one that
    /// already has that participant set. The optional initial message is
    /// appended in the same transaction.
    async fn create_conversation(
        &self,
        participants: &BTreeSet<Uuid>,
        initial_message: Option<NewMessage>,
    ) -> StoreResult<CreatedConversation>;

    async fn get_conversation(&self, id: Uuid) -> StoreResult<Option<Conversation>>;

    async fn is_participant(&self, conversation_id: Uuid, user_id: Uuid) -> StoreResult<bool>;

    /// Conversations of `user_id`, most recently updated first
    async fn list_for_user(&self, user_id: Uuid, page: Pagination)
        -> StoreResult<Vec<Conversation>>;

    /// Move the participant's read mark to now (never behind the newest
    /// message). Touches only that participant's row. Returns `false` when the
    /// user is not a participant.
    async fn mark_read(&self, conversation_id: Uuid, user_id: Uuid) -> StoreResult<bool>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(&self, conversation_id: Uuid, message: NewMessage) -> StoreResult<Message>;

    async fn get_message(&self, id: Uuid) -> StoreResult<Option<Message>>;

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        page: Pagination,
        order: SortOrder,
    ) -> StoreResult<Vec<Message>>;

    async fn latest_message(&self, conversation_id: Uuid) -> StoreResult<Option<Message>>;

    /// Non-deleted messages from other participants created after `since`
    /// (all of them when `since` is `None`)
    async fn unread_count(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<i64>;

    /// Replace the content and set `edited`. `NotFound` for unknown ids,
    /// `Deleted` when the message is soft-deleted at write time.
    async fn update_content(&self, id: Uuid, content: &str) -> StoreResult<Message>;

    /// Soft delete: clear content and attachment, keep the row and its order
    /// position. `NotFound` for unknown ids.
    async fn soft_delete(&self, id: Uuid) -> StoreResult<Message>;
}

/// Stable key for a participant set, used for exact-set deduplication
pub fn participant_key(participants: &BTreeSet<Uuid>) -> String {
    let mut hasher = Sha256::new();
    for id in participants {
        hasher.update(id.as_bytes());
    }
    hex::encode(hasher.finalize())
}
