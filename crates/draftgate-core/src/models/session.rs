use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::command::PendingCommand;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    AwaitingFeedback,
    Finished,
    Errored,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::AwaitingFeedback => "awaiting_feedback",
            Self::Finished => "finished",
            Self::Errored => "errored",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Errored)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logical workflow run as tracked by the session store.
///
/// The checkpoint itself lives behind the `CheckpointStore`; this record
/// carries the lifecycle tag and the queued-command slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingCommand>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: String, status: SessionStatus, pending: Option<PendingCommand>) -> Self {
        let now = Utc::now();
        Self {
            id,
            status,
            pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Idle sessions are reclaimable; a running session never is.
    pub fn is_idle_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.status != SessionStatus::Running && self.updated_at < cutoff
    }
}
