//! SQLite-backed [`Storage`] implementation.
//!
//! Keeps this module focused on database I/O: rows hold JSON payloads for
//! the structured shapes (profile, pending action) and RFC3339 text for
//! timestamps, so the schema stays stable while the Rust types evolve.
//! The schema is ensured on connect; no external migration step is needed.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::message::Message;
use crate::state::{Channel, PendingAction, UserProfile};

use super::{
    ActionStatus, ConversationRecord, MemoryEntry, PendingActionRecord, Storage, StorageError,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    id              TEXT PRIMARY KEY,
    channel         TEXT NOT NULL,
    user_identifier TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    UNIQUE (channel, user_identifier)
);
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    role            TEXT NOT NULL,
    content         TEXT NOT NULL,
    sent_at         TEXT NOT NULL,
    seq             INTEGER
);
CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages (conversation_id, seq);
CREATE TABLE IF NOT EXISTS user_profiles (
    user_identifier TEXT PRIMARY KEY,
    profile_json    TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS user_contexts (
    user_identifier    TEXT PRIMARY KEY,
    channel            TEXT NOT NULL,
    summary            TEXT NOT NULL,
    updated_at         TEXT NOT NULL,
    conversation_count INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS pending_actions (
    action_id       TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    generation      INTEGER NOT NULL,
    action_json     TEXT NOT NULL,
    status          TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    resolved_at     TEXT
);
CREATE INDEX IF NOT EXISTS idx_actions_conversation ON pending_actions (conversation_id, created_at);
"#;

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Open a pooled SQLite connection for the given path, creating the file
/// when missing.
pub async fn connect_pool(path: &str) -> Result<SqlitePool, StorageError> {
    let options = SqliteConnectOptions::from_str(path)
        .map_err(backend)?
        .create_if_missing(true);
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(backend)
}

/// Durable [`Storage`] on SQLite via sqlx.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Connect to `path` (a `sqlite:` URL or plain filesystem path) and
    /// ensure the schema exists.
    pub async fn connect(path: &str) -> Result<Self, StorageError> {
        let pool = connect_pool(path).await?;
        Self::with_pool(pool).await
    }

    /// Wrap an existing pool, ensuring the schema exists.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await.map_err(backend)?;
        Ok(Self { pool })
    }

    fn row_to_message(row: &SqliteRow) -> Result<Message, StorageError> {
        Ok(Message {
            id: row.try_get::<String, _>("id").map_err(backend)?,
            role: row.try_get::<String, _>("role").map_err(backend)?,
            content: row.try_get::<String, _>("content").map_err(backend)?,
            sent_at: parse_timestamp(&row.try_get::<String, _>("sent_at").map_err(backend)?),
        })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn find_or_create_conversation(
        &self,
        channel: &Channel,
        user_identifier: &str,
    ) -> Result<ConversationRecord, StorageError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            "INSERT OR IGNORE INTO conversations (id, channel, user_identifier, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(channel.as_str())
        .bind(user_identifier)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        let row = sqlx::query(
            "SELECT id, channel, user_identifier, created_at FROM conversations
             WHERE channel = ? AND user_identifier = ?",
        )
        .bind(channel.as_str())
        .bind(user_identifier)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        Ok(ConversationRecord {
            id: row.try_get::<String, _>("id").map_err(backend)?,
            channel: Channel::parse(&row.try_get::<String, _>("channel").map_err(backend)?),
            user_identifier: row
                .try_get::<String, _>("user_identifier")
                .map_err(backend)?,
            created_at: parse_timestamp(
                &row.try_get::<String, _>("created_at").map_err(backend)?,
            ),
        })
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        message: &Message,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO messages (id, conversation_id, role, content, sent_at, seq)
             VALUES (?, ?, ?, ?, ?,
                 (SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE conversation_id = ?))",
        )
        .bind(&message.id)
        .bind(conversation_id)
        .bind(&message.role)
        .bind(&message.content)
        .bind(message.sent_at.to_rfc3339())
        .bind(conversation_id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, role, content, sent_at FROM (
                 SELECT * FROM messages WHERE conversation_id = ?
                 ORDER BY seq DESC LIMIT ?
             ) ORDER BY seq ASC",
        )
        .bind(conversation_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(Self::row_to_message).collect()
    }

    async fn load_profile(
        &self,
        user_identifier: &str,
    ) -> Result<Option<UserProfile>, StorageError> {
        let row = sqlx::query("SELECT profile_json FROM user_profiles WHERE user_identifier = ?")
            .bind(user_identifier)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        match row {
            Some(row) => {
                let raw: String = row.try_get("profile_json").map_err(backend)?;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn upsert_profile(
        &self,
        user_identifier: &str,
        profile: &UserProfile,
    ) -> Result<(), StorageError> {
        let payload = serde_json::to_string(profile)?;
        sqlx::query(
            "INSERT INTO user_profiles (user_identifier, profile_json, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT (user_identifier)
             DO UPDATE SET profile_json = excluded.profile_json,
                           updated_at = excluded.updated_at",
        )
        .bind(user_identifier)
        .bind(payload)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn load_user_context(
        &self,
        user_identifier: &str,
    ) -> Result<Option<MemoryEntry>, StorageError> {
        let row = sqlx::query(
            "SELECT summary, updated_at, conversation_count FROM user_contexts
             WHERE user_identifier = ?",
        )
        .bind(user_identifier)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        match row {
            Some(row) => Ok(Some(MemoryEntry {
                summary: row.try_get::<String, _>("summary").map_err(backend)?,
                updated_at: parse_timestamp(
                    &row.try_get::<String, _>("updated_at").map_err(backend)?,
                ),
                conversation_count: row
                    .try_get::<i64, _>("conversation_count")
                    .map_err(backend)? as u32,
            })),
            None => Ok(None),
        }
    }

    async fn save_user_context(
        &self,
        user_identifier: &str,
        channel: &Channel,
        summary: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO user_contexts (user_identifier, channel, summary, updated_at, conversation_count)
             VALUES (?, ?, ?, ?, 1)
             ON CONFLICT (user_identifier)
             DO UPDATE SET channel = excluded.channel,
                           summary = excluded.summary,
                           updated_at = excluded.updated_at,
                           conversation_count = user_contexts.conversation_count + 1",
        )
        .bind(user_identifier)
        .bind(channel.as_str())
        .bind(summary)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn record_pending_action(
        &self,
        conversation_id: &str,
        action: &PendingAction,
        generation: u64,
    ) -> Result<(), StorageError> {
        let payload = serde_json::to_string(action)?;
        sqlx::query(
            "INSERT OR IGNORE INTO pending_actions
             (action_id, conversation_id, generation, action_json, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&action.id)
        .bind(conversation_id)
        .bind(generation as i64)
        .bind(payload)
        .bind(ActionStatus::Pending.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn latest_pending_action(
        &self,
        conversation_id: &str,
    ) -> Result<Option<PendingActionRecord>, StorageError> {
        let row = sqlx::query(
            "SELECT action_json, generation, status, created_at, resolved_at
             FROM pending_actions WHERE conversation_id = ?
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        match row {
            Some(row) => {
                let raw: String = row.try_get("action_json").map_err(backend)?;
                let status_raw: String = row.try_get("status").map_err(backend)?;
                let resolved_at: Option<String> = row.try_get("resolved_at").map_err(backend)?;
                Ok(Some(PendingActionRecord {
                    action: serde_json::from_str(&raw)?,
                    conversation_id: conversation_id.to_string(),
                    generation: row.try_get::<i64, _>("generation").map_err(backend)? as u64,
                    status: ActionStatus::parse(&status_raw).ok_or_else(|| {
                        StorageError::Backend(format!("unknown action status: {status_raw}"))
                    })?,
                    created_at: parse_timestamp(
                        &row.try_get::<String, _>("created_at").map_err(backend)?,
                    ),
                    resolved_at: resolved_at.as_deref().map(parse_timestamp),
                }))
            }
            None => Ok(None),
        }
    }

    async fn resolve_pending_action(
        &self,
        conversation_id: &str,
        action_id: &str,
        status: ActionStatus,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE pending_actions SET status = ?, resolved_at = ?
             WHERE conversation_id = ? AND action_id = ? AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(conversation_id)
        .bind(action_id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        if result.rows_affected() > 0 {
            return Ok(true);
        }
        // Distinguish "already resolved" from "never recorded".
        let exists = sqlx::query(
            "SELECT 1 AS present FROM pending_actions WHERE conversation_id = ? AND action_id = ?",
        )
        .bind(conversation_id)
        .bind(action_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        if exists.is_some() {
            Ok(false)
        } else {
            Err(StorageError::NotFound {
                what: format!("pending action {action_id}"),
            })
        }
    }
}
