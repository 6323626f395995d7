//! Run-policy and generator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;

/// Which generation backend to use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorKind {
    #[default]
    Scripted,
    OpenAi,
}

impl GeneratorKind {
    pub fn parse(s: &str) -> Result<Self, WorkflowError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scripted" => Ok(Self::Scripted),
            "openai" | "open-ai" => Ok(Self::OpenAi),
            other => Err(WorkflowError::Validation(format!(
                "Unknown generator kind: '{}'",
                other
            ))),
        }
    }
}

/// Configuration for the generation backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub kind: GeneratorKind,
    /// API base URL (OpenAI-compatible)
    pub base_url: String,
    /// API key / auth token
    pub api_key: String,
    /// Model ID
    pub model: String,
    pub temperature: Option<f64>,
    /// System prompt sent with every stage
    pub system_prompt: Option<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            kind: GeneratorKind::Scripted,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: "${OPENAI_API_KEY}".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: None,
            system_prompt: Some(
                "You are a helpful assistant. Be concise and accurate.".to_string(),
            ),
        }
    }
}

impl GeneratorConfig {
    /// Expand `${VAR}` references in the URL and key.
    pub fn resolved(&self) -> Self {
        Self {
            base_url: resolve_env_vars(&self.base_url),
            api_key: resolve_env_vars(&self.api_key),
            ..self.clone()
        }
    }
}

/// Run-policy knobs for the workflow service.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Idle sessions (paused, queued or terminal) older than this are reclaimed.
    pub session_ttl: Duration,
    /// How often the reaper sweeps for idle sessions.
    pub reap_interval: Duration,
    /// Channel depth between the engine and a stream subscriber.
    pub stream_buffer: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(3600),
            reap_interval: Duration::from_secs(60),
            stream_buffer: 64,
        }
    }
}

/// Resolve environment variable references in a string.
/// Supports `${ENV_VAR}` and `${ENV_VAR:-default}` syntax.
pub fn resolve_env_vars(input: &str) -> String {
    let re = match regex::Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return input.to_string(),
    };
    re.replace_all(input, |caps: &regex::Captures| {
        let var_expr = &caps[1];
        // Support default value syntax: ${VAR:-default}
        if let Some(idx) = var_expr.find(":-") {
            let var_name = &var_expr[..idx];
            let default_val = &var_expr[idx + 2..];
            std::env::var(var_name).unwrap_or_else(|_| default_val.to_string())
        } else {
            std::env::var(var_expr).unwrap_or_default()
        }
    })
    .to_string()
}
