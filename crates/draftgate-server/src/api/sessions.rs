//! Session inspection API - /graph/sessions
//!
//! GET    /graph/sessions              - List known sessions
//! GET    /graph/sessions/{thread_id}  - Status, stage, queued command and draft
//! DELETE /graph/sessions/{thread_id}  - Forget a session that is not running

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use draftgate_core::error::WorkflowError;
use draftgate_core::service::SessionView;
use draftgate_core::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_sessions))
        .route("/{thread_id}", get(get_session).delete(delete_session))
}

async fn list_sessions(State(state): State<AppState>) -> Json<serde_json::Value> {
    let sessions = state.service.list_sessions().await;
    Json(serde_json::json!({ "sessions": sessions }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<SessionView>, WorkflowError> {
    Ok(Json(state.service.get_session(&thread_id).await?))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<serde_json::Value>, WorkflowError> {
    state.service.delete_session(&thread_id).await?;
    Ok(Json(serde_json::json!({ "deleted": true, "thread_id": thread_id })))
}
