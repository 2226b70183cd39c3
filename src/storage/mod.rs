//! Persistence collaborator contracts.
//!
//! The workflow core only depends on the [`Storage`] trait; every method is
//! atomic per call (a partial write is never observable) and writes keyed
//! by caller-supplied ids are idempotent under retry. [`InMemoryStorage`]
//! backs tests and development; a SQLite implementation lives in
//! [`sqlite`] behind the default-on `sqlite` feature.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::message::Message;
use crate::state::{Channel, PendingAction, UserProfile};

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryStorage;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

/// A conversation record: the durable anchor for a (channel, user) pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub channel: Channel,
    pub user_identifier: String,
    pub created_at: DateTime<Utc>,
}

/// A long-term memory entry for a user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub summary: String,
    pub updated_at: DateTime<Utc>,
    pub conversation_count: u32,
}

/// Resolution state of a recorded pending action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl ActionStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Approved => "approved",
            ActionStatus::Rejected => "rejected",
            ActionStatus::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ActionStatus::Pending),
            "approved" => Some(ActionStatus::Approved),
            "rejected" => Some(ActionStatus::Rejected),
            "cancelled" => Some(ActionStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durably recorded sensitive action and its approval lifecycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingActionRecord {
    pub action: PendingAction,
    pub conversation_id: String,
    /// Suspension generation at recording time; with the conversation id
    /// and action id this forms the approval idempotency key.
    pub generation: u64,
    pub status: ActionStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Errors from the persistence collaborator.
#[derive(Debug, Error, Diagnostic)]
pub enum StorageError {
    #[error("storage backend unavailable: {0}")]
    #[diagnostic(code(chatloom::storage::backend))]
    Backend(String),

    #[error("stored payload could not be decoded: {0}")]
    #[diagnostic(
        code(chatloom::storage::decode),
        help("The persisted JSON does not match the current schema.")
    )]
    Decode(#[from] serde_json::Error),

    #[error("no such record: {what}")]
    #[diagnostic(code(chatloom::storage::not_found))]
    NotFound { what: String },
}

/// Read/write contract for conversation data.
///
/// Every operation is atomic per call. `append_message` is idempotent by
/// message id and reports whether a row was actually inserted, which is
/// what makes retried external-write nodes safe.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Locate the conversation for a (channel, user) pair, creating it on
    /// first contact.
    async fn find_or_create_conversation(
        &self,
        channel: &Channel,
        user_identifier: &str,
    ) -> Result<ConversationRecord, StorageError>;

    /// Append a message; a duplicate id is a no-op returning false.
    async fn append_message(
        &self,
        conversation_id: &str,
        message: &Message,
    ) -> Result<bool, StorageError>;

    /// The last `limit` messages in send order.
    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError>;

    async fn load_profile(&self, user_identifier: &str)
        -> Result<Option<UserProfile>, StorageError>;

    async fn upsert_profile(
        &self,
        user_identifier: &str,
        profile: &UserProfile,
    ) -> Result<(), StorageError>;

    /// Most recently updated long-term memory for the user, any channel.
    async fn load_user_context(
        &self,
        user_identifier: &str,
    ) -> Result<Option<MemoryEntry>, StorageError>;

    async fn save_user_context(
        &self,
        user_identifier: &str,
        channel: &Channel,
        summary: &str,
    ) -> Result<(), StorageError>;

    async fn record_pending_action(
        &self,
        conversation_id: &str,
        action: &PendingAction,
        generation: u64,
    ) -> Result<(), StorageError>;

    /// The most recently recorded action for the conversation, if any.
    async fn latest_pending_action(
        &self,
        conversation_id: &str,
    ) -> Result<Option<PendingActionRecord>, StorageError>;

    /// Resolve a recorded action. Returns false when it was already
    /// resolved (the duplicate-decision signal).
    async fn resolve_pending_action(
        &self,
        conversation_id: &str,
        action_id: &str,
        status: ActionStatus,
    ) -> Result<bool, StorageError>;
}
