use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;

/// The reviewer's verdict on a draft.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Approved,
    Feedback,
}

impl ReviewDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Feedback => "feedback",
        }
    }

    pub fn parse(s: &str) -> Result<Self, WorkflowError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approved" => Ok(Self::Approved),
            "feedback" => Ok(Self::Feedback),
            other => Err(WorkflowError::Validation(format!(
                "review_action must be 'approved' or 'feedback', got '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ReviewDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A human request that opens a new run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StartCommand {
    pub human_request: String,
}

impl StartCommand {
    pub fn new(human_request: impl Into<String>) -> Result<Self, WorkflowError> {
        let human_request = human_request.into();
        if human_request.trim().is_empty() {
            return Err(WorkflowError::Validation(
                "human_request must not be empty".to_string(),
            ));
        }
        Ok(Self { human_request })
    }
}

/// A reviewer decision that continues a paused run.
///
/// A `feedback` decision without a comment is accepted: the finalize stage
/// then regenerates from the draft alone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResumeCommand {
    pub decision: ReviewDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ResumeCommand {
    pub fn new(decision: ReviewDecision, comment: Option<String>) -> Self {
        // Blank comments carry no information; the web client drops them too.
        let comment = comment.filter(|c| !c.trim().is_empty());
        Self { decision, comment }
    }

    pub fn approved() -> Self {
        Self::new(ReviewDecision::Approved, None)
    }

    pub fn feedback(comment: impl Into<String>) -> Self {
        Self::new(ReviewDecision::Feedback, Some(comment.into()))
    }

    /// Build from raw wire fields, rejecting a missing or unknown decision.
    pub fn parse(decision: Option<&str>, comment: Option<String>) -> Result<Self, WorkflowError> {
        let decision = decision
            .ok_or_else(|| WorkflowError::Validation("review_action is required".to_string()))?;
        Ok(Self::new(ReviewDecision::parse(decision)?, comment))
    }
}

/// Discriminant of a queued command, used for the stream's opening event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Start,
    Resume,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Resume => "resume",
        }
    }
}

/// A command staged for the next stream subscription on a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PendingCommand {
    Start(StartCommand),
    Resume(ResumeCommand),
}

impl PendingCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Start(_) => CommandKind::Start,
            Self::Resume(_) => CommandKind::Resume,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decision_is_case_insensitive() {
        assert_eq!(ReviewDecision::parse("Approved").unwrap(), ReviewDecision::Approved);
        assert_eq!(ReviewDecision::parse(" feedback ").unwrap(), ReviewDecision::Feedback);
        assert!(matches!(
            ReviewDecision::parse("reject"),
            Err(WorkflowError::Validation(_))
        ));
    }

    #[test]
    fn test_resume_requires_decision() {
        let err = ResumeCommand::parse(None, Some("looks off".into())).unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
    }

    #[test]
    fn test_feedback_without_comment_is_permitted() {
        let cmd = ResumeCommand::parse(Some("feedback"), None).unwrap();
        assert_eq!(cmd.decision, ReviewDecision::Feedback);
        assert_eq!(cmd.comment, None);
    }

    #[test]
    fn test_blank_comment_is_dropped() {
        let cmd = ResumeCommand::new(ReviewDecision::Feedback, Some("   ".into()));
        assert_eq!(cmd.comment, None);
    }

    #[test]
    fn test_start_rejects_blank_request() {
        assert!(StartCommand::new("  ").is_err());
        assert_eq!(
            StartCommand::new("Write a haiku").unwrap().human_request,
            "Write a haiku"
        );
    }

    #[test]
    fn test_pending_command_serializes_with_type_tag() {
        let cmd = PendingCommand::Resume(ResumeCommand::feedback("shorter"));
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["type"], "resume");
        assert_eq!(json["decision"], "feedback");
        assert_eq!(json["comment"], "shorter");
        assert_eq!(cmd.kind(), CommandKind::Resume);
    }
}
