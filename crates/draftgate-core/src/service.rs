//! Driver facade over the engine and the streaming coordinator.
//!
//! Adapters (HTTP, CLI) only talk to [`WorkflowService`]; it owns the
//! admission rules for each command and the idle-session reaper.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::WorkflowConfig;
use crate::error::WorkflowError;
use crate::generation::Generator;
use crate::models::{
    Checkpoint, CommandKind, ResumeCommand, Session, SessionStatus, Stage, StartCommand,
};
use crate::store::SessionStore;
use crate::streaming::{EventStream, StreamingCoordinator};
use crate::workflow::{EventSink, ExecutionEngine, RunInput, RunOutcome};

/// Inspection view of one session and its durable checkpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub thread_id: String,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_command: Option<CommandKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub human_request: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl SessionView {
    fn new(session: Session, checkpoint: Option<Checkpoint>) -> Self {
        let (stage, human_request, draft, error) = match checkpoint {
            Some(cp) => (Some(cp.stage), Some(cp.human_request), cp.draft, cp.error),
            None => (None, None, None, None),
        };
        Self {
            thread_id: session.id,
            status: session.status,
            stage,
            pending_command: session.pending.as_ref().map(|p| p.kind()),
            human_request,
            draft,
            error,
            created_at: session.created_at.to_rfc3339(),
            updated_at: session.updated_at.to_rfc3339(),
        }
    }
}

pub struct WorkflowService {
    sessions: Arc<SessionStore>,
    engine: Arc<ExecutionEngine>,
    coordinator: StreamingCoordinator,
    config: WorkflowConfig,
}

impl WorkflowService {
    pub fn new(
        sessions: Arc<SessionStore>,
        generator: Arc<dyn Generator>,
        system_prompt: Option<String>,
        config: WorkflowConfig,
    ) -> Self {
        let engine = Arc::new(
            ExecutionEngine::new(sessions.clone(), generator).with_system_prompt(system_prompt),
        );
        let coordinator =
            StreamingCoordinator::new(sessions.clone(), engine.clone(), config.stream_buffer);
        Self {
            sessions,
            engine,
            coordinator,
            config,
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn generator(&self) -> &Arc<dyn Generator> {
        self.engine.generator()
    }

    /// Create a session and run it to the review gate.
    pub async fn start_run(&self, command: StartCommand) -> Result<RunOutcome, WorkflowError> {
        let session = self.sessions.create(SessionStatus::Running, None).await;
        self.engine
            .execute(&session.id, RunInput::Start(command), &EventSink::discard())
            .await
    }

    /// Apply a review decision to a paused session and finish it.
    pub async fn resume_run(
        &self,
        session_id: &str,
        command: ResumeCommand,
    ) -> Result<RunOutcome, WorkflowError> {
        if let Err(e) = self.engine.admit_resume(session_id).await {
            tracing::warn!("[Service] rejected resume for {}: {}", session_id, e);
            return Err(e);
        }
        self.engine
            .execute(session_id, RunInput::Resume(command), &EventSink::discard())
            .await
    }

    pub async fn queue_start(&self, command: StartCommand) -> Session {
        self.coordinator.queue_start(command).await
    }

    pub async fn queue_resume(
        &self,
        session_id: &str,
        command: ResumeCommand,
    ) -> Result<Session, WorkflowError> {
        self.coordinator.queue_resume(session_id, command).await
    }

    pub async fn open_stream(
        &self,
        session_id: &str,
        cancel: CancellationToken,
    ) -> Result<EventStream, WorkflowError> {
        self.coordinator.open_stream(session_id, cancel).await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<SessionView, WorkflowError> {
        let session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| WorkflowError::UnknownSession(session_id.to_string()))?;
        let checkpoint = self.sessions.load_checkpoint(session_id).await?;
        Ok(SessionView::new(session, checkpoint))
    }

    pub async fn list_sessions(&self) -> Vec<SessionView> {
        self.sessions
            .list()
            .await
            .into_iter()
            .map(|s| SessionView::new(s, None))
            .collect()
    }

    /// Forget a session. A running session cannot be deleted.
    pub async fn delete_session(&self, session_id: &str) -> Result<(), WorkflowError> {
        let session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| WorkflowError::UnknownSession(session_id.to_string()))?;
        if session.status == SessionStatus::Running {
            return Err(WorkflowError::Validation(format!(
                "Session {} is running and cannot be deleted",
                session_id
            )));
        }
        self.sessions.remove(session_id).await?;
        tracing::info!("[Service] deleted session {}", session_id);
        Ok(())
    }

    pub async fn reap_idle(&self) -> Result<usize, WorkflowError> {
        self.sessions.reap_idle(self.config.session_ttl).await
    }

    /// Periodically reclaim idle sessions until `shutdown` fires.
    pub fn spawn_reaper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let service = self.clone();
        let period = service.config.reap_interval.max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match service.reap_idle().await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!("[Service] reaper reclaimed {} idle sessions", n),
                    Err(e) => tracing::warn!("[Service] reaper failed: {}", e),
                }
            }
            tracing::debug!("[Service] reaper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::ScriptedGenerator;
    use crate::workflow::RunStatus;

    fn service(config: WorkflowConfig) -> Arc<WorkflowService> {
        Arc::new(WorkflowService::new(
            Arc::new(SessionStore::in_memory()),
            Arc::new(ScriptedGenerator::new()),
            None,
            config,
        ))
    }

    #[tokio::test]
    async fn test_finished_session_stays_stale() {
        let svc = service(WorkflowConfig::default());
        let outcome = svc
            .start_run(StartCommand::new("Write a haiku").unwrap())
            .await
            .unwrap();
        svc.resume_run(&outcome.session_id, ResumeCommand::approved())
            .await
            .unwrap();

        let view = svc.get_session(&outcome.session_id).await.unwrap();
        assert_eq!(view.status, SessionStatus::Finished);
        assert_eq!(view.stage, Some(Stage::Done));

        let err = svc
            .resume_run(&outcome.session_id, ResumeCommand::approved())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::StaleResume {
                status: SessionStatus::Finished,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_view_reports_draft_and_pending_kind() {
        let svc = service(WorkflowConfig::default());
        let outcome = svc
            .start_run(StartCommand::new("Summarize Q3 sales").unwrap())
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::UserFeedback);

        svc.queue_resume(&outcome.session_id, ResumeCommand::approved())
            .await
            .unwrap();
        let view = svc.get_session(&outcome.session_id).await.unwrap();
        assert_eq!(view.stage, Some(Stage::AwaitingHumanFeedback));
        assert_eq!(view.pending_command, Some(CommandKind::Resume));
        assert_eq!(view.draft, outcome.response);
    }

    #[tokio::test]
    async fn test_delete_refuses_running_and_unknown() {
        let svc = service(WorkflowConfig::default());
        assert!(matches!(
            svc.delete_session("missing").await,
            Err(WorkflowError::UnknownSession(_))
        ));

        let session = svc.queue_start(StartCommand::new("x").unwrap()).await;
        svc.delete_session(&session.id).await.unwrap();
        assert!(matches!(
            svc.get_session(&session.id).await,
            Err(WorkflowError::UnknownSession(_))
        ));
    }

    #[tokio::test]
    async fn test_reaper_reclaims_idle_sessions() {
        let svc = service(WorkflowConfig {
            session_ttl: Duration::ZERO,
            reap_interval: Duration::from_millis(20),
            ..WorkflowConfig::default()
        });
        let session = svc.queue_start(StartCommand::new("x").unwrap()).await;

        let shutdown = CancellationToken::new();
        let handle = svc.spawn_reaper(shutdown.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert!(svc.list_sessions().await.is_empty());
        assert!(matches!(
            svc.get_session(&session.id).await,
            Err(WorkflowError::UnknownSession(_))
        ));
    }
}
