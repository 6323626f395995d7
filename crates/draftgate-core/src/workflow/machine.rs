//! Workflow state machine: the draft / review gate / finalize graph.
//!
//! ```text
//! drafting ──► awaiting_human_feedback ──(resume)──► finalizing ──► done
//!    │                                                   │
//!    └──────────────────► errored ◄──────────────────────┘
//! ```
//!
//! Every transition is a method on [`Checkpoint`] that validates the current
//! stage before mutating anything, so a rejected transition leaves the
//! checkpoint untouched.

use chrono::Utc;

use crate::error::WorkflowError;
use crate::models::{Checkpoint, ResumeCommand, ReviewDecision, Stage};

/// Input the finalize stage works from once the gate has been passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizePlan {
    /// Reviewer approved: the draft becomes the final response unchanged.
    Promote { draft: String },
    /// Reviewer asked for changes: regenerate from the draft and comment.
    Regenerate {
        human_request: String,
        draft: String,
        comment: Option<String>,
    },
}

impl Checkpoint {
    /// Initial checkpoint: a human request and no draft yet.
    pub fn start(human_request: impl Into<String>) -> Self {
        Self {
            human_request: human_request.into(),
            stage: Stage::Drafting,
            draft: None,
            review: None,
            final_response: None,
            error: None,
            step: 0,
            updated_at: Utc::now(),
        }
    }

    fn advance(&mut self, to: Stage) {
        self.stage = to;
        self.step += 1;
        self.updated_at = Utc::now();
    }

    fn expect_stage(&self, expected: Stage, action: &str) -> Result<(), WorkflowError> {
        if self.stage == expected {
            Ok(())
        } else {
            Err(WorkflowError::Internal(format!(
                "cannot {} while in stage '{}' (expected '{}')",
                action, self.stage, expected
            )))
        }
    }

    /// `drafting → awaiting_human_feedback`: the draft is complete.
    pub fn record_draft(&mut self, draft: String) -> Result<(), WorkflowError> {
        self.expect_stage(Stage::Drafting, "record a draft")?;
        self.draft = Some(draft);
        self.advance(Stage::AwaitingHumanFeedback);
        Ok(())
    }

    /// `awaiting_human_feedback → finalizing`: merge the reviewer's decision.
    ///
    /// Callers map a paused-stage mismatch to `StaleResume` before getting
    /// here; this check guards the invariant for direct users.
    pub fn apply_review(&mut self, review: ResumeCommand) -> Result<(), WorkflowError> {
        self.expect_stage(Stage::AwaitingHumanFeedback, "apply a review")?;
        if self.draft.is_none() {
            return Err(WorkflowError::Internal(
                "paused checkpoint has no draft".to_string(),
            ));
        }
        self.review = Some(review);
        self.advance(Stage::Finalizing);
        Ok(())
    }

    /// What the finalize stage should do, derived from the merged review.
    pub fn finalize_plan(&self) -> Result<FinalizePlan, WorkflowError> {
        self.expect_stage(Stage::Finalizing, "plan finalization")?;
        let draft = self
            .draft
            .clone()
            .ok_or_else(|| WorkflowError::Internal("finalizing without a draft".to_string()))?;
        let review = self
            .review
            .as_ref()
            .ok_or_else(|| WorkflowError::Internal("finalizing without a review".to_string()))?;

        Ok(match review.decision {
            ReviewDecision::Approved => FinalizePlan::Promote { draft },
            ReviewDecision::Feedback => FinalizePlan::Regenerate {
                human_request: self.human_request.clone(),
                draft,
                comment: review.comment.clone(),
            },
        })
    }

    /// `finalizing → done`.
    pub fn record_final(&mut self, response: String) -> Result<(), WorkflowError> {
        self.expect_stage(Stage::Finalizing, "record a final response")?;
        self.final_response = Some(response);
        self.advance(Stage::Done);
        Ok(())
    }

    /// Any content stage → `errored`. Halts the run.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), WorkflowError> {
        if !self.stage.produces_content() {
            return Err(WorkflowError::Internal(format!(
                "cannot fail a run from stage '{}'",
                self.stage
            )));
        }
        self.error = Some(message.into());
        self.advance(Stage::Errored);
        Ok(())
    }
}
