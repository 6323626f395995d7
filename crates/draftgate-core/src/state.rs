//! Shared application state for adapters.

use std::sync::Arc;

use crate::config::WorkflowConfig;
use crate::db::Database;
use crate::generation::Generator;
use crate::service::WorkflowService;
use crate::store::{CheckpointStore, InMemoryCheckpointStore, SessionStore, SqliteCheckpointStore};

/// Shared state accessible by all API handlers.
pub struct AppStateInner {
    /// Present when checkpoints are kept in SQLite.
    pub db: Option<Database>,
    pub service: Arc<WorkflowService>,
}

pub type AppState = Arc<AppStateInner>;

impl AppStateInner {
    pub fn new(
        db: Option<Database>,
        generator: Arc<dyn Generator>,
        system_prompt: Option<String>,
        config: WorkflowConfig,
    ) -> Self {
        let checkpoints: Arc<dyn CheckpointStore> = match &db {
            Some(db) => Arc::new(SqliteCheckpointStore::new(db.clone())),
            None => Arc::new(InMemoryCheckpointStore::new()),
        };
        let sessions = Arc::new(SessionStore::new(checkpoints));
        Self {
            db,
            service: Arc::new(WorkflowService::new(
                sessions,
                generator,
                system_prompt,
                config,
            )),
        }
    }
}
