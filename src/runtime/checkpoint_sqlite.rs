//! SQLite-backed [`Checkpointer`].
//!
//! Stores the latest checkpoint per conversation as a JSON column; the
//! serde shape of [`Checkpoint`] is the persistence format. This is what
//! lets a SUSPENDED run outlive the process and be resumed elsewhere.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use super::checkpoint::{Checkpoint, Checkpointer, CheckpointerError, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS checkpoints (
    conversation_id TEXT PRIMARY KEY,
    step            INTEGER NOT NULL,
    node            TEXT NOT NULL,
    generation      INTEGER NOT NULL,
    state_json      TEXT NOT NULL,
    created_at      TEXT NOT NULL
);
"#;

fn backend(e: sqlx::Error) -> CheckpointerError {
    CheckpointerError::Backend(e.to_string())
}

/// Durable checkpointer on SQLite via sqlx.
pub struct SqliteCheckpointer {
    pool: SqlitePool,
}

impl SqliteCheckpointer {
    /// Connect to `path` (a `sqlite:` URL or plain filesystem path) and
    /// ensure the schema exists.
    pub async fn connect(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(backend)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(backend)?;
        Self::with_pool(pool).await
    }

    /// Wrap an existing pool, ensuring the schema exists.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await.map_err(backend)?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl Checkpointer for SqliteCheckpointer {
    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        let payload = serde_json::to_string(&checkpoint)?;
        sqlx::query(
            "INSERT INTO checkpoints (conversation_id, step, node, generation, state_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (conversation_id)
             DO UPDATE SET step = excluded.step,
                           node = excluded.node,
                           generation = excluded.generation,
                           state_json = excluded.state_json,
                           created_at = excluded.created_at",
        )
        .bind(&checkpoint.conversation_id)
        .bind(checkpoint.step as i64)
        .bind(checkpoint.node.as_str())
        .bind(checkpoint.generation as i64)
        .bind(payload)
        .bind(checkpoint.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn load_latest(&self, conversation_id: &str) -> Result<Option<Checkpoint>> {
        let row = sqlx::query("SELECT state_json FROM checkpoints WHERE conversation_id = ?")
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        match row {
            Some(row) => {
                let raw: String = row.try_get("state_json").map_err(backend)?;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn list_conversations(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT conversation_id FROM checkpoints ORDER BY conversation_id")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("conversation_id").map_err(backend))
            .collect()
    }
}
