//! Core error type for the draftgate workflow engine.
//!
//! `WorkflowError` is used throughout the core domain (stores, engine,
//! coordinator). When the `axum` feature is enabled, it also implements
//! `IntoResponse` so it can be used directly as an axum handler error type.

use crate::models::SessionStatus;

#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkflowError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Session {session_id} is {status} and cannot be resumed")]
    StaleResume {
        session_id: String,
        status: SessionStatus,
    },

    #[error("No queued command for session {0}. Queue a start or resume command first")]
    NoPendingCommand(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WorkflowError {
    /// Whether the error was raised before any session state was touched.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            WorkflowError::Validation(_)
                | WorkflowError::UnknownSession(_)
                | WorkflowError::StaleResume { .. }
                | WorkflowError::NoPendingCommand(_)
        )
    }
}

// ---------------------------------------------------------------------------
// axum integration (opt-in via feature flag)
// ---------------------------------------------------------------------------

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for WorkflowError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match &self {
            WorkflowError::Validation(_) => StatusCode::BAD_REQUEST,
            WorkflowError::UnknownSession(_) => StatusCode::NOT_FOUND,
            WorkflowError::NoPendingCommand(_) => StatusCode::NOT_FOUND,
            WorkflowError::StaleResume { .. } => StatusCode::CONFLICT,
            WorkflowError::Generation(_) => StatusCode::BAD_GATEWAY,
            WorkflowError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            WorkflowError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejections_are_classified() {
        assert!(WorkflowError::Validation("x".into()).is_rejection());
        assert!(WorkflowError::UnknownSession("x".into()).is_rejection());
        assert!(WorkflowError::StaleResume {
            session_id: "s".into(),
            status: SessionStatus::Finished,
        }
        .is_rejection());
        assert!(!WorkflowError::Generation("boom".into()).is_rejection());
        assert!(!WorkflowError::Persistence("disk".into()).is_rejection());
    }

    #[test]
    fn test_stale_resume_message_names_status() {
        let err = WorkflowError::StaleResume {
            session_id: "abc".into(),
            status: SessionStatus::Finished,
        };
        assert_eq!(
            err.to_string(),
            "Session abc is finished and cannot be resumed"
        );
    }
}
