//! Session store: keyed registry of runs and their checkpoints.
//!
//! Each session sits behind its own mutex, so read-modify-write on one id
//! never interleaves with another mutation on the same id, while different
//! sessions proceed independently. Checkpoints are delegated to a
//! [`CheckpointStore`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::checkpoint_store::{CheckpointStore, InMemoryCheckpointStore};
use crate::error::WorkflowError;
use crate::models::{Checkpoint, PendingCommand, Session, SessionStatus, Stage};

pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl SessionStore {
    pub fn new(checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            checkpoints,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryCheckpointStore::new()))
    }

    /// Allocate a new session id and register it.
    pub async fn create(
        &self,
        status: SessionStatus,
        pending: Option<PendingCommand>,
    ) -> Session {
        let id = uuid::Uuid::new_v4().to_string();
        let session = Session::new(id.clone(), status, pending);
        self.sessions
            .write()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(session.clone())));
        tracing::debug!("[SessionStore] created session {} ({})", id, status);
        session
    }

    /// Snapshot of a session, if known.
    pub async fn get(&self, session_id: &str) -> Result<Option<Session>, WorkflowError> {
        match self.entry(session_id).await? {
            Some(entry) => Ok(Some(entry.lock().await.clone())),
            None => Ok(None),
        }
    }

    pub async fn list(&self) -> Vec<Session> {
        let entries: Vec<Arc<Mutex<Session>>> =
            self.sessions.read().await.values().cloned().collect();
        let mut sessions = Vec::with_capacity(entries.len());
        for entry in entries {
            sessions.push(entry.lock().await.clone());
        }
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions
    }

    /// Atomically apply `f` to one session.
    pub async fn update<T, F>(&self, session_id: &str, f: F) -> Result<T, WorkflowError>
    where
        F: FnOnce(&mut Session) -> Result<T, WorkflowError>,
    {
        let mut session = self
            .lock(session_id)
            .await?
            .ok_or_else(|| WorkflowError::UnknownSession(session_id.to_string()))?;
        f(&mut session)
    }

    pub async fn set_status(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> Result<(), WorkflowError> {
        self.update(session_id, |s| {
            s.set_status(status);
            Ok(())
        })
        .await
    }

    /// Remove the queued command, failing if there is none.
    pub async fn take_pending(&self, session_id: &str) -> Result<PendingCommand, WorkflowError> {
        let taken = match self.lock(session_id).await? {
            Some(mut session) => session.pending.take(),
            None => None,
        };
        taken.ok_or_else(|| WorkflowError::NoPendingCommand(session_id.to_string()))
    }

    /// Forget a session and its checkpoint.
    pub async fn remove(&self, session_id: &str) -> Result<bool, WorkflowError> {
        let existed = self.sessions.write().await.remove(session_id).is_some();
        self.delete_checkpoint(session_id).await?;
        Ok(existed)
    }

    pub async fn save_checkpoint(
        &self,
        session_id: &str,
        checkpoint: &Checkpoint,
    ) -> Result<(), WorkflowError> {
        self.checkpoints
            .save(session_id, checkpoint)
            .await
            .map_err(into_persistence)
    }

    pub async fn load_checkpoint(&self, session_id: &str) -> Result<Option<Checkpoint>, WorkflowError> {
        self.checkpoints
            .load(session_id)
            .await
            .map_err(into_persistence)
    }

    pub async fn delete_checkpoint(&self, session_id: &str) -> Result<(), WorkflowError> {
        self.checkpoints
            .delete(session_id)
            .await
            .map_err(into_persistence)
    }

    /// Drop sessions that have been idle longer than `ttl`. Running sessions
    /// and sessions currently locked by a caller are skipped.
    ///
    /// The registry write lock is held until the checkpoints are gone, so a
    /// reaped session can neither be claimed nor rehydrated midway.
    pub async fn reap_idle(&self, ttl: Duration) -> Result<usize, WorkflowError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| WorkflowError::Internal(format!("Invalid TTL: {}", e)))?;
        let cutoff = Utc::now() - ttl;

        let mut sessions = self.sessions.write().await;
        let expired: Vec<String> = sessions
            .iter()
            .filter_map(|(id, entry)| match entry.try_lock() {
                Ok(session) if session.is_idle_since(cutoff) => Some(id.clone()),
                _ => None,
            })
            .collect();

        for id in &expired {
            sessions.remove(id);
            self.delete_checkpoint(id).await?;
            tracing::info!("[SessionStore] reclaimed idle session {}", id);
        }
        Ok(expired.len())
    }

    /// Lock a session for mutation.
    async fn lock(&self, session_id: &str) -> Result<Option<OwnedMutexGuard<Session>>, WorkflowError> {
        match self.entry(session_id).await? {
            Some(entry) => Ok(self.lock_live(session_id, entry).await),
            None => Ok(None),
        }
    }

    /// Lock `entry`, or `None` if it left the registry while we waited.
    async fn lock_live(
        &self,
        session_id: &str,
        entry: Arc<Mutex<Session>>,
    ) -> Option<OwnedMutexGuard<Session>> {
        let guard = entry.clone().lock_owned().await;
        let live = self
            .sessions
            .read()
            .await
            .get(session_id)
            .is_some_and(|current| Arc::ptr_eq(current, &entry));
        live.then_some(guard)
    }

    /// Look up a session, rehydrating it from a durable checkpoint when the
    /// in-memory registry does not know it (e.g. after a restart).
    async fn entry(&self, session_id: &str) -> Result<Option<Arc<Mutex<Session>>>, WorkflowError> {
        if let Some(entry) = self.sessions.read().await.get(session_id) {
            return Ok(Some(entry.clone()));
        }

        let checkpoint = match self.load_checkpoint(session_id).await? {
            Some(cp) => cp,
            None => return Ok(None),
        };
        let status = match checkpoint.stage {
            Stage::AwaitingHumanFeedback => SessionStatus::AwaitingFeedback,
            Stage::Done => SessionStatus::Finished,
            // A content stage means the process died mid-stage.
            Stage::Drafting | Stage::Finalizing | Stage::Errored => SessionStatus::Errored,
        };

        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::info!(
                    "[SessionStore] rehydrated session {} from checkpoint ({})",
                    session_id,
                    status
                );
                Arc::new(Mutex::new(Session::new(session_id.to_string(), status, None)))
            })
            .clone();
        Ok(Some(entry))
    }
}

fn into_persistence(err: WorkflowError) -> WorkflowError {
    match err {
        WorkflowError::Persistence(_) => err,
        other => WorkflowError::Persistence(other.to_string()),
    }
}
