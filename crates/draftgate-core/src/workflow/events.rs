//! Events produced while a run executes, and the outcome it returns.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::models::{CommandKind, Stage};

/// A unit of output from one execution pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageEvent {
    /// A content chunk produced by the given stage.
    Token { stage: Stage, content: String },
    /// The run moved between stages.
    Transition { from: Stage, to: Stage },
}

/// Where an execution pass stopped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Paused at the review gate.
    UserFeedback,
    Finished,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserFeedback => "user_feedback",
            Self::Finished => "finished",
        }
    }
}

/// Result of driving a run to its pause point or to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub session_id: String,
    pub status: RunStatus,
    pub response: Option<String>,
}

/// Events delivered to a stream subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Started {
        session_id: String,
        command: CommandKind,
    },
    Token {
        content: String,
    },
    Status {
        status: RunStatus,
    },
    Error {
        error: String,
    },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Status { .. } | Self::Error { .. })
    }
}

/// Where the engine sends stage events. Sending never fails the run: a
/// discarded sink or a dropped receiver just means nobody is listening.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<StageEvent>>,
}

impl EventSink {
    pub fn discard() -> Self {
        Self { tx: None }
    }

    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<StageEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx: Some(tx) }, rx)
    }

    pub async fn emit(&self, event: StageEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).await.is_err() {
                tracing::trace!("[EventSink] receiver dropped, event discarded");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_discarded_sink_is_silent() {
        let sink = EventSink::discard();
        sink.emit(StageEvent::Transition {
            from: Stage::Drafting,
            to: Stage::AwaitingHumanFeedback,
        })
        .await;
    }

    #[tokio::test]
    async fn test_emit_after_receiver_dropped_does_not_block() {
        let (sink, rx) = EventSink::channel(1);
        drop(rx);
        for _ in 0..4 {
            sink.emit(StageEvent::Token {
                stage: Stage::Drafting,
                content: "x".into(),
            })
            .await;
        }
    }

    #[test]
    fn test_run_status_wire_names() {
        assert_eq!(
            serde_json::to_value(RunStatus::UserFeedback).unwrap(),
            "user_feedback"
        );
        assert_eq!(RunStatus::Finished.as_str(), "finished");
    }
}
