//! Blocking run API - /graph
//!
//! POST /graph/start  - Create a session and run it to the review gate
//! POST /graph/resume - Apply a review decision and finish the run

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use draftgate_core::error::WorkflowError;
use draftgate_core::models::{ResumeCommand, StartCommand};
use draftgate_core::state::AppState;
use draftgate_core::workflow::RunOutcome;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/start", post(start_run))
        .route("/resume", post(resume_run))
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub human_request: Option<String>,
}

impl StartRequest {
    pub fn into_command(self) -> Result<StartCommand, WorkflowError> {
        StartCommand::new(self.human_request.unwrap_or_default())
    }
}

#[derive(Debug, Deserialize)]
pub struct ResumeRequest {
    pub thread_id: String,
    pub review_action: Option<String>,
    pub human_comment: Option<String>,
}

impl ResumeRequest {
    pub fn into_command(self) -> Result<(String, ResumeCommand), WorkflowError> {
        let command = ResumeCommand::parse(self.review_action.as_deref(), self.human_comment)?;
        Ok((self.thread_id, command))
    }
}

#[derive(Debug, Serialize)]
pub struct GraphResponse {
    pub thread_id: String,
    pub run_status: String,
    pub assistant_response: Option<String>,
}

impl GraphResponse {
    pub fn pending(thread_id: String) -> Self {
        Self {
            thread_id,
            run_status: "pending".to_string(),
            assistant_response: None,
        }
    }
}

impl From<RunOutcome> for GraphResponse {
    fn from(outcome: RunOutcome) -> Self {
        Self {
            thread_id: outcome.session_id,
            run_status: outcome.status.as_str().to_string(),
            assistant_response: outcome.response,
        }
    }
}

async fn start_run(
    State(state): State<AppState>,
    Json(body): Json<StartRequest>,
) -> Result<Json<GraphResponse>, WorkflowError> {
    let command = body.into_command()?;
    let outcome = state.service.start_run(command).await?;
    Ok(Json(outcome.into()))
}

async fn resume_run(
    State(state): State<AppState>,
    Json(body): Json<ResumeRequest>,
) -> Result<Json<GraphResponse>, WorkflowError> {
    let (thread_id, command) = body.into_command()?;
    let outcome = state.service.resume_run(&thread_id, command).await?;
    Ok(Json(outcome.into()))
}
