//! `draftgate run`: drive one run through the review gate in the terminal.
//!
//! The draft is produced first; the operator then approves it or sends
//! feedback (interactively unless a decision was given on the command line)
//! and the run is finalized.

use std::io::Write;

use console::style;
use draftgate_core::models::{ResumeCommand, ReviewDecision, StartCommand};
use draftgate_core::state::AppState;
use draftgate_core::streaming::EventStream;
use draftgate_core::workflow::{RunStatus, StreamEvent};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use super::print_json;

/// Decision given up front with `--approve` / `--feedback`.
pub fn preset_review(approve: bool, feedback: Option<String>) -> Option<ResumeCommand> {
    match (approve, feedback) {
        (_, Some(comment)) => Some(ResumeCommand::new(ReviewDecision::Feedback, Some(comment))),
        (true, None) => Some(ResumeCommand::approved()),
        (false, None) => None,
    }
}

pub async fn run(
    state: &AppState,
    request: &str,
    review: Option<ResumeCommand>,
    stream: bool,
    json: bool,
) -> Result<(), String> {
    let command = StartCommand::new(request).map_err(|e| e.to_string())?;
    let quiet = json;

    if !quiet {
        println!("{}", style("Draft").bold().cyan());
    }
    let (thread_id, status, draft) = if stream {
        let session = state.service.queue_start(command).await;
        let (status, text) = follow(state, &session.id, quiet).await?;
        (session.id, status, text)
    } else {
        let outcome = state
            .service
            .start_run(command)
            .await
            .map_err(|e| e.to_string())?;
        let text = outcome.response.unwrap_or_default();
        if !quiet {
            println!("{}", text);
        }
        (outcome.session_id, outcome.status, text)
    };

    tracing::info!("[Cli] run {} drafted ({})", thread_id, status.as_str());
    if status != RunStatus::UserFeedback {
        return Err(format!("Run {} did not pause for review ({})", thread_id, status.as_str()));
    }

    let review = match review {
        Some(review) => review,
        None => tokio::task::spawn_blocking(prompt_review)
            .await
            .map_err(|e| format!("Review prompt failed: {}", e))??,
    };

    tracing::info!("[Cli] resuming run {} with decision '{}'", thread_id, review.decision);
    if !quiet {
        println!();
        println!("{} ({})", style("Final").bold().green(), review.decision);
    }
    let (status, response) = if stream {
        state
            .service
            .queue_resume(&thread_id, review)
            .await
            .map_err(|e| e.to_string())?;
        follow(state, &thread_id, quiet).await?
    } else {
        let outcome = state
            .service
            .resume_run(&thread_id, review)
            .await
            .map_err(|e| e.to_string())?;
        let text = outcome.response.unwrap_or_default();
        if !quiet {
            println!("{}", text);
        }
        (outcome.status, text)
    };

    tracing::info!("[Cli] run {} ended ({})", thread_id, status.as_str());
    if json {
        print_json(&serde_json::json!({
            "thread_id": thread_id,
            "run_status": status.as_str(),
            "draft": draft,
            "assistant_response": response,
        }));
    }
    Ok(())
}

/// Open the session's stream and print tokens as they arrive.
async fn follow(
    state: &AppState,
    thread_id: &str,
    quiet: bool,
) -> Result<(RunStatus, String), String> {
    let events = state
        .service
        .open_stream(thread_id, CancellationToken::new())
        .await
        .map_err(|e| e.to_string())?;
    drain(events, quiet).await
}

async fn drain(mut events: EventStream, quiet: bool) -> Result<(RunStatus, String), String> {
    let mut text = String::new();
    while let Some(event) = events.next().await {
        match event {
            StreamEvent::Started { .. } => {}
            StreamEvent::Token { content } => {
                if !quiet {
                    print!("{}", content);
                    let _ = std::io::stdout().flush();
                }
                text.push_str(&content);
            }
            StreamEvent::Status { status } => {
                if !quiet {
                    println!();
                }
                return Ok((status, text));
            }
            StreamEvent::Error { error } => {
                if !quiet {
                    println!();
                }
                return Err(error);
            }
        }
    }
    Err("Stream ended before the run reported a status".to_string())
}

fn prompt_review() -> Result<ResumeCommand, String> {
    let choice = dialoguer::Select::new()
        .with_prompt("Review the draft")
        .items(&["Approve", "Request changes"])
        .default(0)
        .interact()
        .map_err(|e| format!("Failed to read decision: {}", e))?;

    if choice == 0 {
        return Ok(ResumeCommand::approved());
    }

    let comment: String = dialoguer::Input::new()
        .with_prompt("Feedback")
        .allow_empty(true)
        .interact_text()
        .map_err(|e| format!("Failed to read feedback: {}", e))?;
    Ok(ResumeCommand::new(ReviewDecision::Feedback, Some(comment)))
}
