//! Streaming run API - /graph/stream
//!
//! POST /graph/stream/create       - Queue a start command on a new session
//! POST /graph/stream/resume       - Queue a resume command on a paused session
//! GET  /graph/stream/{thread_id}  - Run the queued command, streaming SSE events
//!
//! Event names: `start` or `resume` first (carrying `thread_id`), then `token`
//! (`content`), then exactly one of `status` (`status`) or `error` (`error`).

use std::convert::Infallible;
use std::pin::Pin;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, KeepAliveStream, Sse},
    routing::{get, post},
    Json, Router,
};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use super::graph::{GraphResponse, ResumeRequest, StartRequest};
use draftgate_core::error::WorkflowError;
use draftgate_core::state::AppState;
use draftgate_core::workflow::StreamEvent;

type SseStream = Pin<Box<dyn tokio_stream::Stream<Item = Result<Event, Infallible>> + Send>>;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create", post(create_stream))
        .route("/resume", post(resume_stream))
        .route("/{thread_id}", get(open_stream))
}

async fn create_stream(
    State(state): State<AppState>,
    Json(body): Json<StartRequest>,
) -> Result<Json<GraphResponse>, WorkflowError> {
    let command = body.into_command()?;
    let session = state.service.queue_start(command).await;
    Ok(Json(GraphResponse::pending(session.id)))
}

async fn resume_stream(
    State(state): State<AppState>,
    Json(body): Json<ResumeRequest>,
) -> Result<Json<GraphResponse>, WorkflowError> {
    let (thread_id, command) = body.into_command()?;
    let session = state.service.queue_resume(&thread_id, command).await?;
    Ok(Json(GraphResponse::pending(session.id)))
}

async fn open_stream(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Sse<KeepAliveStream<SseStream>>, WorkflowError> {
    let cancel = CancellationToken::new();
    // Cancels forwarding when the client goes away and axum drops the body.
    let guard = cancel.clone().drop_guard();
    let mut events = state.service.open_stream(&thread_id, cancel).await?;

    let stream: SseStream = Box::pin(async_stream::stream! {
        let _guard = guard;
        while let Some(event) = events.next().await {
            yield Ok::<_, Infallible>(to_sse(&event));
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn to_sse(event: &StreamEvent) -> Event {
    let (name, data) = match event {
        StreamEvent::Started {
            session_id,
            command,
        } => (command.as_str(), serde_json::json!({ "thread_id": session_id })),
        StreamEvent::Token { content } => ("token", serde_json::json!({ "content": content })),
        StreamEvent::Status { status } => {
            ("status", serde_json::json!({ "status": status.as_str() }))
        }
        StreamEvent::Error { error } => ("error", serde_json::json!({ "error": error })),
    };
    Event::default().event(name).data(data.to_string())
}

