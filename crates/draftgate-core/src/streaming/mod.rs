//! Streaming coordinator: stages start/resume commands and multiplexes one
//! engine invocation's output to a live subscriber.
//!
//! ```text
//! queue_start / queue_resume ──► session.pending (last write wins)
//!                                      │
//! open_stream ── take pending ─────────┘
//!      │
//!      ├─► started
//!      ├─► token* ◄── mpsc ◄── ExecutionEngine (spawned task)
//!      └─► status | error
//! ```
//!
//! The engine runs in its own task. Cancelling the subscriber (or dropping
//! the stream) stops forwarding only; the engine still finishes its stage
//! and persists its checkpoint.

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::error::WorkflowError;
use crate::models::{
    PendingCommand, ResumeCommand, Session, SessionStatus, Stage, StartCommand,
};
use crate::store::SessionStore;
use crate::workflow::{EventSink, ExecutionEngine, RunInput, StageEvent, StreamEvent};

pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

pub struct StreamingCoordinator {
    sessions: Arc<SessionStore>,
    engine: Arc<ExecutionEngine>,
    buffer: usize,
}

impl StreamingCoordinator {
    pub fn new(sessions: Arc<SessionStore>, engine: Arc<ExecutionEngine>, buffer: usize) -> Self {
        Self {
            sessions,
            engine,
            buffer: buffer.max(1),
        }
    }

    /// Stage a start command on a new session.
    pub async fn queue_start(&self, command: StartCommand) -> Session {
        let session = self
            .sessions
            .create(SessionStatus::Pending, Some(PendingCommand::Start(command)))
            .await;
        tracing::info!("[Coordinator] queued start for session {}", session.id);
        session
    }

    /// Stage a resume command, replacing any command not yet consumed.
    pub async fn queue_resume(
        &self,
        session_id: &str,
        command: ResumeCommand,
    ) -> Result<Session, WorkflowError> {
        let result = self
            .sessions
            .update(session_id, |session| {
                if session.status != SessionStatus::AwaitingFeedback {
                    return Err(WorkflowError::StaleResume {
                        session_id: session.id.clone(),
                        status: session.status,
                    });
                }
                if session.pending.is_some() {
                    tracing::debug!(
                        "[Coordinator] replacing queued command for session {}",
                        session.id
                    );
                }
                session.pending = Some(PendingCommand::Resume(command));
                session.set_status(SessionStatus::AwaitingFeedback);
                Ok(session.clone())
            })
            .await;

        match &result {
            Ok(_) => tracing::info!("[Coordinator] queued resume for session {}", session_id),
            Err(e) => tracing::warn!("[Coordinator] rejected resume for {}: {}", session_id, e),
        }
        result
    }

    /// Consume the queued command and start streaming its run.
    ///
    /// Fails with `NoPendingCommand` when nothing is queued; the command is
    /// consumed here, so a second subscription for the same command fails.
    pub async fn open_stream(
        &self,
        session_id: &str,
        cancel: CancellationToken,
    ) -> Result<EventStream, WorkflowError> {
        let command = self.sessions.take_pending(session_id).await?;
        let kind = command.kind();

        let input = match command {
            PendingCommand::Start(cmd) => {
                self.sessions
                    .set_status(session_id, SessionStatus::Running)
                    .await?;
                RunInput::Start(cmd)
            }
            PendingCommand::Resume(cmd) => {
                self.engine.admit_resume(session_id).await?;
                RunInput::Resume(cmd)
            }
        };

        let (sink, mut rx) = EventSink::channel(self.buffer);
        let engine = self.engine.clone();
        let run_id = session_id.to_string();
        let handle = tokio::spawn(async move { engine.execute(&run_id, input, &sink).await });

        let session_id = session_id.to_string();
        tracing::info!(
            "[Coordinator] streaming {} run for session {}",
            kind.as_str(),
            session_id
        );

        let stream = async_stream::stream! {
            yield StreamEvent::Started {
                session_id: session_id.clone(),
                command: kind,
            };

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    event = rx.recv() => Some(event),
                };
                let event = match next {
                    Some(event) => event,
                    None => {
                        tracing::warn!(
                            "[Coordinator] subscriber left session {}, run continues detached",
                            session_id
                        );
                        return;
                    }
                };

                match event {
                    Some(StageEvent::Token { stage, content }) => match stage {
                        Stage::Drafting | Stage::Finalizing => {
                            yield StreamEvent::Token { content };
                        }
                        Stage::AwaitingHumanFeedback | Stage::Done | Stage::Errored => {}
                    },
                    Some(StageEvent::Transition { from, to }) => {
                        tracing::debug!("[Coordinator] session {} {} -> {}", session_id, from, to);
                    }
                    // Sender dropped: the engine task has returned.
                    None => break,
                }
            }

            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                joined = handle => joined,
            };

            match joined {
                Ok(Ok(outcome)) => yield StreamEvent::Status { status: outcome.status },
                Ok(Err(err)) => yield StreamEvent::Error { error: err.to_string() },
                Err(join_err) => {
                    tracing::error!(
                        "[Coordinator] engine task for session {} panicked: {}",
                        session_id,
                        join_err
                    );
                    yield StreamEvent::Error {
                        error: WorkflowError::Internal(join_err.to_string()).to_string(),
                    };
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
