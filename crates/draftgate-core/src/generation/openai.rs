//! OpenAI-compatible streaming generator.
//!
//! POST {base_url}/chat/completions with `stream: true`
//! Headers:
//!   Authorization: Bearer {api_key}
//!   content-type: application/json
//!
//! The response is a server-sent event stream of `data: {chunk}` lines,
//! terminated by `data: [DONE]`.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;

use super::{ChunkStream, GenerationRequest, Generator};
use crate::config::GeneratorConfig;
use crate::error::WorkflowError;

pub struct OpenAiGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: Option<f64>,
    system_prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

impl OpenAiGenerator {
    pub fn from_config(config: &GeneratorConfig) -> Result<Self, WorkflowError> {
        let config = config.resolved();
        if config.api_key.is_empty() {
            return Err(WorkflowError::Validation(
                "OpenAI generator requires an API key".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300)) // 5 min timeout
            .build()
            .map_err(|e| WorkflowError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            model: config.model,
            temperature: config.temperature,
            system_prompt: config.system_prompt,
        })
    }

    fn build_request_body(&self, request: &GenerationRequest) -> serde_json::Value {
        let mut messages = vec![];

        if let Some(system) = request.system_prompt.as_ref().or(self.system_prompt.as_ref()) {
            messages.push(serde_json::json!({
                "role": "system",
                "content": system
            }));
        }

        messages.push(serde_json::json!({
            "role": "user",
            "content": request.prompt()
        }));

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true
        });

        if let Some(temp) = self.temperature {
            body["temperature"] = serde_json::Value::Number(
                serde_json::Number::from_f64(temp).unwrap_or_else(|| serde_json::Number::from(0)),
            );
        }

        body
    }

    /// Pop the next complete line off the front of `buffer`. Bytes are only
    /// decoded once their newline has arrived, so a multi-byte character
    /// split across network reads is reassembled first.
    fn take_line(buffer: &mut Vec<u8>) -> Option<Result<String, WorkflowError>> {
        let newline_pos = buffer.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = buffer.drain(..=newline_pos).collect();
        Some(
            String::from_utf8(line)
                .map(|line| line.trim().to_string())
                .map_err(|e| WorkflowError::Generation(format!("Stream is not valid UTF-8: {}", e))),
        )
    }

    /// Extract the content delta from one SSE line, if it carries any.
    fn parse_sse_line(line: &str) -> Option<String> {
        let data = line.strip_prefix("data:")?.trim();
        if data == "[DONE]" {
            return None;
        }
        let chunk: ChatCompletionChunk = serde_json::from_str(data).ok()?;
        let content: String = chunk
            .choices
            .into_iter()
            .filter_map(|c| c.delta.content)
            .collect();
        if content.is_empty() {
            None
        } else {
            Some(content)
        }
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn stream<'a>(&'a self, request: &'a GenerationRequest) -> ChunkStream<'a> {
        Box::pin(async_stream::try_stream! {
            let url = format!("{}/chat/completions", self.base_url);
            let body = self.build_request_body(request);

            tracing::info!(
                "[OpenAiGenerator] {} stage via {} (model: {})",
                request.stage,
                url,
                self.model
            );

            let response = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await
                .map_err(|e| WorkflowError::Generation(format!("HTTP request failed: {}", e)))?;

            let status = response.status();
            let stream_result = if status.is_success() {
                Ok(response.bytes_stream())
            } else {
                let text = response.text().await.unwrap_or_default();
                Err(WorkflowError::Generation(format!("API returned {}: {}", status, text)))
            };
            let mut bytes = stream_result?;
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = chunk
                    .map_err(|e| WorkflowError::Generation(format!("Stream interrupted: {}", e)))?;
                buffer.extend_from_slice(&chunk);

                while let Some(line) = Self::take_line(&mut buffer) {
                    let line = line?;
                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }
                    if let Some(content) = Self::parse_sse_line(&line) {
                        yield content;
                    }
                }
            }
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }

    async fn health_check(&self) -> Result<(), WorkflowError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| WorkflowError::Generation(format!("HTTP request failed: {}", e)))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(WorkflowError::Generation(format!(
                "API returned {}",
                response.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeneratorKind;

    fn config() -> GeneratorConfig {
        GeneratorConfig {
            kind: GeneratorKind::OpenAi,
            api_key: "sk-test".to_string(),
            base_url: "http://localhost:9999/v1/".to_string(),
            ..GeneratorConfig::default()
        }
    }

    #[test]
    fn test_parse_sse_line() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(OpenAiGenerator::parse_sse_line(line).as_deref(), Some("Hel"));
        assert_eq!(OpenAiGenerator::parse_sse_line("data: [DONE]"), None);
        assert_eq!(
            OpenAiGenerator::parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            None
        );
        assert_eq!(OpenAiGenerator::parse_sse_line("event: ping"), None);
    }

    #[test]
    fn test_take_line_waits_for_split_characters() {
        let line = "data: café\n".as_bytes();
        let split = "data: caf".len() + 1;
        let mut buffer = line[..split].to_vec();
        assert!(OpenAiGenerator::take_line(&mut buffer).is_none());

        buffer.extend_from_slice(&line[split..]);
        let decoded = OpenAiGenerator::take_line(&mut buffer).unwrap().unwrap();
        assert_eq!(decoded, "data: café");
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_stream_reassembles_characters_split_across_reads() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            // Read the request headers and its JSON body before answering.
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }

            let body = "data: {\"choices\":[{\"delta\":{\"content\":\"café 日本\"}}]}\n\ndata: [DONE]\n\n";
            // Split inside the two bytes of "é".
            let split = body.find('é').unwrap() + 1;
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n",
                )
                .await
                .unwrap();
            socket.write_all(&body.as_bytes()[..split]).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            socket.write_all(&body.as_bytes()[split..]).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        let generator = OpenAiGenerator::from_config(&GeneratorConfig {
            base_url: format!("http://{}/v1", addr),
            ..config()
        })
        .unwrap();
        let request = GenerationRequest::draft("Write a haiku");
        let chunks: Vec<String> = generator
            .stream(&request)
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;

        assert_eq!(chunks.concat(), "café 日本");
        server.await.unwrap();
    }

    #[test]
    fn test_request_body_streams_with_system_prompt() {
        let generator = OpenAiGenerator::from_config(&config()).unwrap();
        assert_eq!(generator.base_url, "http://localhost:9999/v1");
        let body = generator.build_request_body(&GenerationRequest::draft("Write a haiku"));
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
    }

    #[test]
    fn test_missing_key_is_rejected() {
        let cfg = GeneratorConfig {
            api_key: "${DRAFTGATE_UNSET_KEY_FOR_TEST}".to_string(),
            ..config()
        };
        assert!(matches!(
            OpenAiGenerator::from_config(&cfg),
            Err(WorkflowError::Validation(_))
        ));
    }
}
