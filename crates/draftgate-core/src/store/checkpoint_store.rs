//! Checkpoint persistence: the durability boundary of the engine.
//!
//! The engine saves a checkpoint after every stage through the
//! [`CheckpointStore`] trait. The in-memory store keeps runs for the life of
//! the process; the SQLite store survives restarts. Neither changes how the
//! state machine behaves.

use std::collections::HashMap;

use async_trait::async_trait;
use rusqlite::OptionalExtension;
use tokio::sync::RwLock;

use crate::db::Database;
use crate::error::WorkflowError;
use crate::models::Checkpoint;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, session_id: &str, checkpoint: &Checkpoint) -> Result<(), WorkflowError>;

    async fn load(&self, session_id: &str) -> Result<Option<Checkpoint>, WorkflowError>;

    async fn delete(&self, session_id: &str) -> Result<(), WorkflowError>;
}

/// Process-local checkpoint storage.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.checkpoints.read().await.len()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, session_id: &str, checkpoint: &Checkpoint) -> Result<(), WorkflowError> {
        self.checkpoints
            .write()
            .await
            .insert(session_id.to_string(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<Checkpoint>, WorkflowError> {
        Ok(self.checkpoints.read().await.get(session_id).cloned())
    }

    async fn delete(&self, session_id: &str) -> Result<(), WorkflowError> {
        self.checkpoints.write().await.remove(session_id);
        Ok(())
    }
}

/// SQLite-backed checkpoint storage. The checkpoint body is stored as JSON.
pub struct SqliteCheckpointStore {
    db: Database,
}

impl SqliteCheckpointStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, session_id: &str, checkpoint: &Checkpoint) -> Result<(), WorkflowError> {
        let id = session_id.to_string();
        let stage = checkpoint.stage.as_str();
        let step = checkpoint.step;
        let updated_at = checkpoint.updated_at.timestamp_millis();
        let payload = serde_json::to_string(checkpoint)
            .map_err(|e| WorkflowError::Persistence(format!("Failed to encode checkpoint: {}", e)))?;

        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO checkpoints (session_id, stage, step, payload, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(session_id) DO UPDATE SET
                       stage = excluded.stage,
                       step = excluded.step,
                       payload = excluded.payload,
                       updated_at = excluded.updated_at",
                    rusqlite::params![id, stage, step, payload, updated_at],
                )?;
                Ok(())
            })
            .await
    }

    async fn load(&self, session_id: &str) -> Result<Option<Checkpoint>, WorkflowError> {
        let id = session_id.to_string();
        let payload: Option<String> = self
            .db
            .with_conn_async(move |conn| {
                conn.query_row(
                    "SELECT payload FROM checkpoints WHERE session_id = ?1",
                    [&id],
                    |row| row.get(0),
                )
                .optional()
            })
            .await?;

        payload
            .map(|json| {
                serde_json::from_str(&json).map_err(|e| {
                    WorkflowError::Persistence(format!("Corrupt checkpoint for {}: {}", session_id, e))
                })
            })
            .transpose()
    }

    async fn delete(&self, session_id: &str) -> Result<(), WorkflowError> {
        let id = session_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                conn.execute("DELETE FROM checkpoints WHERE session_id = ?1", [&id])?;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResumeCommand, Stage};

    fn paused_checkpoint() -> Checkpoint {
        let mut cp = Checkpoint::start("Summarize Q3 sales");
        cp.record_draft("Sales rose.".to_string()).unwrap();
        cp
    }

    #[tokio::test]
    async fn test_in_memory_roundtrip_and_delete() {
        let store = InMemoryCheckpointStore::new();
        let cp = paused_checkpoint();
        store.save("s1", &cp).await.unwrap();
        assert_eq!(store.load("s1").await.unwrap(), Some(cp));
        store.delete("s1").await.unwrap();
        assert_eq!(store.load("s1").await.unwrap(), None);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_sqlite_upsert_keeps_latest() {
        let store = SqliteCheckpointStore::new(Database::open_in_memory().unwrap());
        let mut cp = paused_checkpoint();
        store.save("s1", &cp).await.unwrap();

        cp.apply_review(ResumeCommand::feedback("more detail")).unwrap();
        store.save("s1", &cp).await.unwrap();

        let loaded = store.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.stage, Stage::Finalizing);
        assert_eq!(loaded.review, Some(ResumeCommand::feedback("more detail")));
        assert_eq!(loaded, cp);
    }

    #[tokio::test]
    async fn test_sqlite_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.db");
        let path = path.to_str().unwrap();

        let cp = paused_checkpoint();
        {
            let store = SqliteCheckpointStore::new(Database::open(path).unwrap());
            store.save("s1", &cp).await.unwrap();
        }

        let store = SqliteCheckpointStore::new(Database::open(path).unwrap());
        assert_eq!(store.load("s1").await.unwrap(), Some(cp));
    }

    #[tokio::test]
    async fn test_sqlite_missing_is_none() {
        let store = SqliteCheckpointStore::new(Database::open_in_memory().unwrap());
        assert_eq!(store.load("nope").await.unwrap(), None);
        store.delete("nope").await.unwrap();
    }
}
