use async_trait::async_trait;
use rig::{client::CompletionClient, completion::Prompt, providers::openrouter};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Failures of the text-generation service. Callers always recover from these
/// with a scripted or keyword-based fallback.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("text generation is not configured")]
    Unavailable,

    #[error("text generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("text generation request failed: {0}")]
    Request(String),

    #[error("malformed generation output: {0}")]
    Malformed(String),
}

/// Opaque text-generation service: instructions plus user text in, text out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, instructions: &str, input: &str) -> Result<String, GenerationError>;
}

/// OpenRouter-backed generator with a hard per-call timeout.
pub struct OpenRouterGenerator {
    client: openrouter::Client,
    model: String,
    timeout: Duration,
}

impl OpenRouterGenerator {
    pub fn new(api_key: &str, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: openrouter::Client::new(api_key),
            model: model.into(),
            timeout,
        }
    }
}

#[async_trait]
impl TextGenerator for OpenRouterGenerator {
    async fn generate(&self, instructions: &str, input: &str) -> Result<String, GenerationError> {
        let agent = self
            .client
            .agent(&self.model)
            .preamble(instructions)
            .temperature(0.7)
            .max_tokens(500)
            .build();

        debug!(model = %self.model, input_length = input.len(), "Calling text generation");

        let response = tokio::time::timeout(self.timeout, agent.prompt(input))
            .await
            .map_err(|_| GenerationError::Timeout(self.timeout))?
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        let response = response.trim();
        if response.is_empty() {
            return Err(GenerationError::Malformed("empty response".to_string()));
        }
        Ok(response.to_string())
    }
}

/// Stand-in used when no API key is configured.
pub struct DisabledGenerator;

#[async_trait]
impl TextGenerator for DisabledGenerator {
    async fn generate(&self, _instructions: &str, _input: &str) -> Result<String, GenerationError> {
        Err(GenerationError::Unavailable)
    }
}

/// Parses a structured JSON answer, tolerating a surrounding markdown code fence.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T, GenerationError> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);

    serde_json::from_str(body.trim()).map_err(|e| GenerationError::Malformed(e.to_string()))
}
