use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::command::ResumeCommand;

/// Position of a run in the draft → review → finalize graph.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Drafting,
    AwaitingHumanFeedback,
    Finalizing,
    Done,
    Errored,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drafting => "drafting",
            Self::AwaitingHumanFeedback => "awaiting_human_feedback",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
            Self::Errored => "errored",
        }
    }

    /// Stages that call the generation capability and emit tokens.
    pub fn produces_content(&self) -> bool {
        matches!(self, Self::Drafting | Self::Finalizing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Errored)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable snapshot of a run, sufficient to resume it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub human_request: String,
    /// Stage the run currently sits in.
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<ResumeCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Number of stage transitions applied so far.
    pub step: u32,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// The stage the engine would execute next, or `None` when the run is
    /// paused for a human or has terminated.
    pub fn next_stage(&self) -> Option<Stage> {
        match self.stage {
            Stage::Drafting | Stage::Finalizing => Some(self.stage),
            Stage::AwaitingHumanFeedback | Stage::Done | Stage::Errored => None,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.stage == Stage::AwaitingHumanFeedback
    }

    /// The latest user-visible response: final text if present, else the draft.
    pub fn response(&self) -> Option<&str> {
        self.final_response.as_deref().or(self.draft.as_deref())
    }
}
