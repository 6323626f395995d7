//! Deterministic, offline generator.
//!
//! Produces a fixed rendering of the request for each stage, split into
//! word-sized chunks. Used when no provider is configured, and by tests.

use std::time::Duration;

use async_trait::async_trait;

use super::{ChunkStream, GenerationRequest, Generator};
use crate::error::WorkflowError;
use crate::models::Stage;

#[derive(Debug, Clone, Default)]
pub struct ScriptedGenerator {
    fail_on: Option<Stage>,
    token_delay: Option<Duration>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with a `Generation` error partway through the given stage.
    pub fn failing_on(stage: Stage) -> Self {
        Self {
            fail_on: Some(stage),
            token_delay: None,
        }
    }

    /// Sleep between chunks, to mimic a slow provider.
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = Some(delay);
        self
    }

    /// The full text this generator produces for a request.
    pub fn render(request: &GenerationRequest) -> String {
        match request.stage {
            Stage::Finalizing => match &request.comment {
                Some(comment) => format!(
                    "Revised response to \"{}\" addressing feedback: {}",
                    request.human_request, comment
                ),
                None => format!("Revised response to \"{}\"", request.human_request),
            },
            _ => format!("Draft response to \"{}\"", request.human_request),
        }
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn stream<'a>(&'a self, request: &'a GenerationRequest) -> ChunkStream<'a> {
        let text = Self::render(request);
        let fail = self.fail_on == Some(request.stage);
        let delay = self.token_delay;

        Box::pin(async_stream::stream! {
            for (i, chunk) in text.split_inclusive(' ').enumerate() {
                if fail && i == 2 {
                    yield Err(WorkflowError::Generation(format!(
                        "scripted failure during {}",
                        request.stage
                    )));
                    return;
                }
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(chunk.to_string());
            }
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_chunks_concatenate_to_render() {
        let generator = ScriptedGenerator::new();
        let request = GenerationRequest::draft("Write a haiku");
        let chunks: Vec<String> = generator
            .stream(&request)
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), "Draft response to \"Write a haiku\"");
    }

    #[tokio::test]
    async fn test_feedback_render_differs_from_draft() {
        let draft = ScriptedGenerator::render(&GenerationRequest::draft("x"));
        let revised =
            ScriptedGenerator::render(&GenerationRequest::revise("x", &draft, Some("shorter")));
        assert_ne!(draft, revised);
        assert!(revised.contains("shorter"));
    }

    #[tokio::test]
    async fn test_failure_is_injected_for_stage() {
        let generator = ScriptedGenerator::failing_on(Stage::Drafting);
        let request = GenerationRequest::draft("Summarize Q3 sales");
        let results: Vec<_> = generator.stream(&request).collect().await;
        assert!(matches!(
            results.last(),
            Some(Err(WorkflowError::Generation(_)))
        ));
    }
}
