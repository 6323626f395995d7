//! Content generation capability used by the draft and finalize stages.
//!
//! The engine only sees the [`Generator`] trait: a request goes in, a stream
//! of text chunks comes out. Two backends are provided:
//!
//! - [`ScriptedGenerator`]: deterministic and offline, the default.
//! - [`OpenAiGenerator`]: any OpenAI-compatible `/chat/completions` endpoint.

pub mod openai;
pub mod scripted;

pub use openai::OpenAiGenerator;
pub use scripted::ScriptedGenerator;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;

use crate::config::{GeneratorConfig, GeneratorKind};
use crate::error::WorkflowError;
use crate::models::Stage;

pub type ChunkStream<'a> = Pin<Box<dyn Stream<Item = Result<String, WorkflowError>> + Send + 'a>>;

/// Abstraction over text generation backends.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Stream the response for one stage, chunk by chunk.
    fn stream<'a>(&'a self, request: &'a GenerationRequest) -> ChunkStream<'a>;

    /// Backend name (for logging and health output).
    fn name(&self) -> &'static str;

    /// Check that the backend is reachable.
    async fn health_check(&self) -> Result<(), WorkflowError> {
        Ok(())
    }
}

/// Everything a backend needs to produce one stage's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub stage: Stage,
    pub system_prompt: Option<String>,
    pub human_request: String,
    pub draft: Option<String>,
    pub comment: Option<String>,
}

impl GenerationRequest {
    pub fn draft(human_request: &str) -> Self {
        Self {
            stage: Stage::Drafting,
            system_prompt: None,
            human_request: human_request.to_string(),
            draft: None,
            comment: None,
        }
    }

    pub fn revise(human_request: &str, draft: &str, comment: Option<&str>) -> Self {
        Self {
            stage: Stage::Finalizing,
            system_prompt: None,
            human_request: human_request.to_string(),
            draft: Some(draft.to_string()),
            comment: comment.map(|c| c.to_string()),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: Option<String>) -> Self {
        self.system_prompt = system_prompt.filter(|s| !s.is_empty());
        self
    }

    /// Render the user-facing prompt for chat-style backends.
    pub fn prompt(&self) -> String {
        match (&self.draft, self.stage) {
            (Some(draft), Stage::Finalizing) => {
                let mut prompt = format!(
                    "Original request:\n{}\n\nYour previous draft:\n{}\n\n",
                    self.human_request, draft
                );
                match &self.comment {
                    Some(comment) => prompt.push_str(&format!(
                        "The reviewer asked for changes:\n{}\n\nWrite the final response, applying the reviewer's feedback.",
                        comment
                    )),
                    None => prompt.push_str(
                        "The reviewer asked for a revision without further detail. Write an improved final response.",
                    ),
                }
                prompt
            }
            _ => format!(
                "Draft a response to the following request. A human will review it before it is finalized.\n\n{}",
                self.human_request
            ),
        }
    }
}

/// Build the configured backend.
pub fn build_generator(config: &GeneratorConfig) -> Result<Arc<dyn Generator>, WorkflowError> {
    match config.kind {
        GeneratorKind::Scripted => Ok(Arc::new(ScriptedGenerator::new())),
        GeneratorKind::OpenAi => Ok(Arc::new(OpenAiGenerator::from_config(config)?)),
    }
}
