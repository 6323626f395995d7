//! Execution engine: drives one run from its checkpoint to the review gate
//! or to completion.
//!
//! The engine:
//! 1. Builds the starting checkpoint (new request) or loads the paused one
//!    and merges the reviewer's decision into it
//! 2. Executes the current stage, streaming generated chunks to the sink
//! 3. Persists the checkpoint after every stage before moving on
//! 4. Stops at the review gate, at `done`, or at `errored`
//!
//! It never waits for a human: reaching the gate returns control to the
//! caller immediately.

use std::sync::Arc;

use futures::StreamExt;

use super::events::{EventSink, RunOutcome, RunStatus, StageEvent};
use super::machine::FinalizePlan;
use crate::error::WorkflowError;
use crate::generation::{GenerationRequest, Generator};
use crate::models::{Checkpoint, ResumeCommand, SessionStatus, Stage, StartCommand};
use crate::store::SessionStore;

/// What an invocation starts from: a new request, or a paused run plus the
/// reviewer's decision. Never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunInput {
    Start(StartCommand),
    Resume(ResumeCommand),
}

pub struct ExecutionEngine {
    sessions: Arc<SessionStore>,
    generator: Arc<dyn Generator>,
    system_prompt: Option<String>,
}

impl ExecutionEngine {
    pub fn new(sessions: Arc<SessionStore>, generator: Arc<dyn Generator>) -> Self {
        Self {
            sessions,
            generator,
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: Option<String>) -> Self {
        self.system_prompt = system_prompt;
        self
    }

    pub fn generator(&self) -> &Arc<dyn Generator> {
        &self.generator
    }

    /// Claim a paused session for a resume. Atomic per session: of two
    /// concurrent resumes, exactly one sees `awaiting_feedback`.
    pub async fn admit_resume(&self, session_id: &str) -> Result<(), WorkflowError> {
        self.sessions
            .update(session_id, |session| {
                if session.status != SessionStatus::AwaitingFeedback {
                    return Err(WorkflowError::StaleResume {
                        session_id: session.id.clone(),
                        status: session.status,
                    });
                }
                session.set_status(SessionStatus::Running);
                Ok(())
            })
            .await
    }

    /// Run an admitted session. On failure the session status is settled
    /// from the last durable checkpoint before the error is returned.
    pub async fn execute(
        &self,
        session_id: &str,
        input: RunInput,
        events: &EventSink,
    ) -> Result<RunOutcome, WorkflowError> {
        match self.run(session_id, input, events).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                tracing::error!("[Engine] session {} failed: {}", session_id, err);
                self.settle_after_error(session_id).await;
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        session_id: &str,
        input: RunInput,
        events: &EventSink,
    ) -> Result<RunOutcome, WorkflowError> {
        let mut checkpoint = match input {
            RunInput::Start(cmd) => {
                tracing::info!("[Engine] starting session {}", session_id);
                let checkpoint = Checkpoint::start(cmd.human_request);
                self.sessions.save_checkpoint(session_id, &checkpoint).await?;
                checkpoint
            }
            RunInput::Resume(review) => {
                let mut checkpoint = self
                    .sessions
                    .load_checkpoint(session_id)
                    .await?
                    .ok_or_else(|| WorkflowError::UnknownSession(session_id.to_string()))?;
                if !checkpoint.is_paused() {
                    return Err(WorkflowError::StaleResume {
                        session_id: session_id.to_string(),
                        status: status_for(checkpoint.stage),
                    });
                }
                tracing::info!(
                    "[Engine] resuming session {} with decision '{}'",
                    session_id,
                    review.decision
                );
                checkpoint.apply_review(review)?;
                self.sessions.save_checkpoint(session_id, &checkpoint).await?;
                events
                    .emit(StageEvent::Transition {
                        from: Stage::AwaitingHumanFeedback,
                        to: Stage::Finalizing,
                    })
                    .await;
                checkpoint
            }
        };

        loop {
            if let Some(status) = self.step(session_id, &mut checkpoint, events).await? {
                return Ok(RunOutcome {
                    session_id: session_id.to_string(),
                    status,
                    response: checkpoint.response().map(str::to_string),
                });
            }
        }
    }

    /// Execute the checkpoint's current stage. Returns `Some` when the run
    /// has to stop (paused or finished).
    async fn step(
        &self,
        session_id: &str,
        checkpoint: &mut Checkpoint,
        events: &EventSink,
    ) -> Result<Option<RunStatus>, WorkflowError> {
        let from = checkpoint.stage;
        match from {
            Stage::Drafting => {
                let request = GenerationRequest::draft(&checkpoint.human_request)
                    .with_system_prompt(self.system_prompt.clone());
                let draft = match self.generate(&request, events).await {
                    Ok(draft) => draft,
                    Err(err) => return Err(self.fail(session_id, checkpoint, err).await),
                };
                checkpoint.record_draft(draft)?;
                self.commit(session_id, checkpoint, from, events).await?;
                self.sessions
                    .set_status(session_id, SessionStatus::AwaitingFeedback)
                    .await?;
                tracing::info!("[Engine] session {} paused for review", session_id);
                Ok(Some(RunStatus::UserFeedback))
            }
            Stage::Finalizing => {
                let response = match checkpoint.finalize_plan()? {
                    FinalizePlan::Promote { draft } => {
                        events
                            .emit(StageEvent::Token {
                                stage: Stage::Finalizing,
                                content: draft.clone(),
                            })
                            .await;
                        draft
                    }
                    FinalizePlan::Regenerate {
                        human_request,
                        draft,
                        comment,
                    } => {
                        let request =
                            GenerationRequest::revise(&human_request, &draft, comment.as_deref())
                                .with_system_prompt(self.system_prompt.clone());
                        match self.generate(&request, events).await {
                            Ok(text) => text,
                            Err(err) => return Err(self.fail(session_id, checkpoint, err).await),
                        }
                    }
                };
                checkpoint.record_final(response)?;
                self.commit(session_id, checkpoint, from, events).await?;
                self.sessions
                    .set_status(session_id, SessionStatus::Finished)
                    .await?;
                // The `done` checkpoint stays until the session is deleted or
                // reaped, so a late resume is stale even after a restart.
                tracing::info!("[Engine] session {} finished", session_id);
                Ok(Some(RunStatus::Finished))
            }
            // `run` merges the review before the loop and drafting stops at
            // the gate, so the loop never sees a paused checkpoint.
            Stage::AwaitingHumanFeedback => Err(WorkflowError::Internal(format!(
                "session {} reached the step loop while paused",
                session_id
            ))),
            Stage::Done | Stage::Errored => Err(WorkflowError::StaleResume {
                session_id: session_id.to_string(),
                status: status_for(from),
            }),
        }
    }

    /// Persist a completed stage and announce the transition.
    async fn commit(
        &self,
        session_id: &str,
        checkpoint: &Checkpoint,
        from: Stage,
        events: &EventSink,
    ) -> Result<(), WorkflowError> {
        self.sessions.save_checkpoint(session_id, checkpoint).await?;
        tracing::debug!(
            "[Engine] session {} {} -> {} (step {})",
            session_id,
            from,
            checkpoint.stage,
            checkpoint.step
        );
        events
            .emit(StageEvent::Transition {
                from,
                to: checkpoint.stage,
            })
            .await;
        Ok(())
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        events: &EventSink,
    ) -> Result<String, WorkflowError> {
        let mut chunks = self.generator.stream(request);
        let mut text = String::new();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| match e {
                WorkflowError::Generation(_) => e,
                other => WorkflowError::Generation(other.to_string()),
            })?;
            events
                .emit(StageEvent::Token {
                    stage: request.stage,
                    content: chunk.clone(),
                })
                .await;
            text.push_str(&chunk);
        }

        if text.trim().is_empty() {
            return Err(WorkflowError::Generation(format!(
                "{} produced an empty response during {}",
                self.generator.name(),
                request.stage
            )));
        }
        Ok(text)
    }

    /// Move the run to `errored` and persist that terminal checkpoint. The
    /// original error is returned; a persistence failure here takes priority.
    async fn fail(
        &self,
        session_id: &str,
        checkpoint: &mut Checkpoint,
        err: WorkflowError,
    ) -> WorkflowError {
        let from = checkpoint.stage;
        if let Err(e) = checkpoint.fail(err.to_string()) {
            return e;
        }
        if let Err(e) = self.sessions.save_checkpoint(session_id, checkpoint).await {
            return e;
        }
        tracing::warn!("[Engine] session {} {} -> errored", session_id, from);
        err
    }

    /// Derive the session status from whatever was last persisted.
    async fn settle_after_error(&self, session_id: &str) {
        let status = match self.sessions.load_checkpoint(session_id).await {
            Ok(Some(checkpoint)) if checkpoint.is_paused() => SessionStatus::AwaitingFeedback,
            _ => SessionStatus::Errored,
        };
        let settled = self
            .sessions
            .update(session_id, |session| {
                if session.status == SessionStatus::Running {
                    session.set_status(status);
                }
                Ok(())
            })
            .await;
        if let Err(e) = settled {
            tracing::warn!("[Engine] could not settle session {}: {}", session_id, e);
        }
    }
}

fn status_for(stage: Stage) -> SessionStatus {
    match stage {
        Stage::Drafting | Stage::Finalizing => SessionStatus::Running,
        Stage::AwaitingHumanFeedback => SessionStatus::AwaitingFeedback,
        Stage::Done => SessionStatus::Finished,
        Stage::Errored => SessionStatus::Errored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::ScriptedGenerator;
    use crate::store::{CheckpointStore, InMemoryCheckpointStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn engine_with(generator: ScriptedGenerator) -> (Arc<SessionStore>, ExecutionEngine) {
        let sessions = Arc::new(SessionStore::in_memory());
        let engine = ExecutionEngine::new(sessions.clone(), Arc::new(generator));
        (sessions, engine)
    }

    async fn started(sessions: &SessionStore) -> String {
        sessions.create(SessionStatus::Running, None).await.id
    }

    fn start(request: &str) -> RunInput {
        RunInput::Start(StartCommand::new(request).unwrap())
    }

    #[tokio::test]
    async fn test_start_pauses_with_draft() {
        let (sessions, engine) = engine_with(ScriptedGenerator::new());
        let id = started(&sessions).await;

        let outcome = engine
            .execute(&id, start("Summarize Q3 sales"), &EventSink::discard())
            .await
            .unwrap();

        assert_eq!(outcome.status, RunStatus::UserFeedback);
        assert_eq!(
            outcome.response.as_deref(),
            Some("Draft response to \"Summarize Q3 sales\"")
        );
        let session = sessions.get(&id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::AwaitingFeedback);
        let checkpoint = sessions.load_checkpoint(&id).await.unwrap().unwrap();
        assert!(checkpoint.is_paused());
    }

    #[tokio::test]
    async fn test_events_are_ordered_tokens_then_transition() {
        let (sessions, engine) = engine_with(ScriptedGenerator::new());
        let id = started(&sessions).await;
        let (sink, mut rx) = EventSink::channel(64);

        engine.execute(&id, start("Write a haiku"), &sink).await.unwrap();
        drop(sink);

        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        assert!(events.len() > 2);
        assert_eq!(
            events.last(),
            Some(&StageEvent::Transition {
                from: Stage::Drafting,
                to: Stage::AwaitingHumanFeedback
            })
        );
        assert!(events[..events.len() - 1].iter().all(|e| matches!(
            e,
            StageEvent::Token {
                stage: Stage::Drafting,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_resume_approved_promotes_draft() {
        let (sessions, engine) = engine_with(ScriptedGenerator::new());
        let id = started(&sessions).await;
        let draft = engine
            .execute(&id, start("Summarize Q3 sales"), &EventSink::discard())
            .await
            .unwrap()
            .response;

        engine.admit_resume(&id).await.unwrap();
        let outcome = engine
            .execute(&id, RunInput::Resume(ResumeCommand::approved()), &EventSink::discard())
            .await
            .unwrap();

        assert_eq!(outcome.status, RunStatus::Finished);
        assert_eq!(outcome.response, draft);
        let session = sessions.get(&id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Finished);
        let checkpoint = sessions.load_checkpoint(&id).await.unwrap().unwrap();
        assert_eq!(checkpoint.stage, Stage::Done);
    }

    #[tokio::test]
    async fn test_resume_feedback_regenerates() {
        let (sessions, engine) = engine_with(ScriptedGenerator::new());
        let id = started(&sessions).await;
        engine
            .execute(&id, start("Write a haiku"), &EventSink::discard())
            .await
            .unwrap();

        engine.admit_resume(&id).await.unwrap();
        let outcome = engine
            .execute(
                &id,
                RunInput::Resume(ResumeCommand::feedback("about autumn")),
                &EventSink::discard(),
            )
            .await
            .unwrap();

        let response = outcome.response.unwrap();
        assert!(response.contains("about autumn"));
        assert!(response.starts_with("Revised"));
    }

    #[tokio::test]
    async fn test_admit_resume_rejects_non_paused() {
        let (sessions, engine) = engine_with(ScriptedGenerator::new());
        let id = started(&sessions).await;

        let err = engine.admit_resume(&id).await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::StaleResume {
                status: SessionStatus::Running,
                ..
            }
        ));
        assert!(matches!(
            engine.admit_resume("nope").await,
            Err(WorkflowError::UnknownSession(_))
        ));
    }

    #[tokio::test]
    async fn test_generation_failure_errors_run_without_pausing() {
        let (sessions, engine) = engine_with(ScriptedGenerator::failing_on(Stage::Drafting));
        let id = started(&sessions).await;

        let err = engine
            .execute(&id, start("Summarize Q3 sales"), &EventSink::discard())
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::Generation(_)));
        let session = sessions.get(&id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Errored);
        let checkpoint = sessions.load_checkpoint(&id).await.unwrap().unwrap();
        assert_eq!(checkpoint.stage, Stage::Errored);
        assert!(checkpoint.draft.is_none());
        assert!(checkpoint.error.is_some());
    }

    #[tokio::test]
    async fn test_finalize_failure_errors_run_and_keeps_draft() {
        let (sessions, engine) = engine_with(ScriptedGenerator::failing_on(Stage::Finalizing));
        let id = started(&sessions).await;
        let draft = engine
            .execute(&id, start("Write a haiku"), &EventSink::discard())
            .await
            .unwrap()
            .response;

        engine.admit_resume(&id).await.unwrap();
        let err = engine
            .execute(
                &id,
                RunInput::Resume(ResumeCommand::feedback("about autumn")),
                &EventSink::discard(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Generation(_)));

        let checkpoint = sessions.load_checkpoint(&id).await.unwrap().unwrap();
        assert_eq!(checkpoint.stage, Stage::Errored);
        assert_eq!(checkpoint.draft, draft);
        assert!(checkpoint.error.is_some());
        let session = sessions.get(&id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Errored);

        assert!(matches!(
            engine.admit_resume(&id).await,
            Err(WorkflowError::StaleResume {
                status: SessionStatus::Errored,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_step_refuses_paused_checkpoint() {
        let (sessions, engine) = engine_with(ScriptedGenerator::new());
        let id = started(&sessions).await;
        let mut checkpoint = Checkpoint::start("Write a haiku");
        checkpoint.record_draft("An old pond.".to_string()).unwrap();

        let err = engine
            .step(&id, &mut checkpoint, &EventSink::discard())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Internal(_)));
        assert!(checkpoint.is_paused());
    }

    /// Fails every save after the first `ok_saves`.
    struct FlakyStore {
        inner: InMemoryCheckpointStore,
        ok_saves: usize,
        saves: AtomicUsize,
    }

    #[async_trait]
    impl CheckpointStore for FlakyStore {
        async fn save(&self, id: &str, cp: &Checkpoint) -> Result<(), WorkflowError> {
            if self.saves.fetch_add(1, Ordering::SeqCst) >= self.ok_saves {
                return Err(WorkflowError::Persistence("disk full".to_string()));
            }
            self.inner.save(id, cp).await
        }
        async fn load(&self, id: &str) -> Result<Option<Checkpoint>, WorkflowError> {
            self.inner.load(id).await
        }
        async fn delete(&self, id: &str) -> Result<(), WorkflowError> {
            self.inner.delete(id).await
        }
    }

    #[tokio::test]
    async fn test_persistence_failure_surfaces_and_keeps_last_checkpoint() {
        // start + draft succeed; the save that merges the review fails.
        let store = Arc::new(FlakyStore {
            inner: InMemoryCheckpointStore::new(),
            ok_saves: 2,
            saves: AtomicUsize::new(0),
        });
        let sessions = Arc::new(SessionStore::new(store));
        let engine = ExecutionEngine::new(sessions.clone(), Arc::new(ScriptedGenerator::new()));
        let id = started(&sessions).await;

        engine
            .execute(&id, start("Summarize Q3 sales"), &EventSink::discard())
            .await
            .unwrap();
        engine.admit_resume(&id).await.unwrap();
        let err = engine
            .execute(&id, RunInput::Resume(ResumeCommand::approved()), &EventSink::discard())
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::Persistence(_)));
        let checkpoint = sessions.load_checkpoint(&id).await.unwrap().unwrap();
        assert!(checkpoint.is_paused());
        // Paused checkpoint is still durable, so the session can be retried.
        let session = sessions.get(&id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::AwaitingFeedback);
    }
}
