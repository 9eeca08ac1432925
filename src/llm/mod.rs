//! Text generation through a local Ollama runtime.
//!
//! Every classifier, enrichment step and answer in the pipeline goes through [`LlmClient`]. The
//! Ollama adapter issues non-streaming `/api/generate` requests directly over HTTP.

use crate::resilience::{CallPolicy, Transient, guarded};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced while generating text.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Runtime unreachable or endpoint missing.
    #[error("LLM provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Runtime answered with an error status.
    #[error("Failed to generate completion: {0}")]
    GenerationFailed(String),
    /// Runtime response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
    /// An attempt exceeded the call timeout.
    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        /// Guarded operation name.
        operation: &'static str,
        /// Timeout that elapsed.
        seconds: u64,
    },
}

impl Transient for LlmError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::ProviderUnavailable(_) | Self::Timeout { .. })
    }

    fn timed_out(operation: &'static str, after: Duration) -> Self {
        Self::Timeout {
            operation,
            seconds: after.as_secs(),
        }
    }
}

/// Interface implemented by generation backends.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete `prompt` and return the trimmed response text.
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;

    /// Cheap reachability probe.
    async fn is_available(&self) -> bool;
}

/// Ollama-backed generation client.
pub struct OllamaLlmClient {
    http: Client,
    base_url: String,
    model: String,
    temperature: f32,
    policy: CallPolicy,
}

impl OllamaLlmClient {
    /// Construct a client for `model` served at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        policy: CallPolicy,
    ) -> Result<Self, LlmError> {
        let http = Client::builder()
            .user_agent("docent/llm")
            .build()
            .map_err(|error| LlmError::ProviderUnavailable(error.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature: 0.1,
            policy,
        })
    }

    /// Override the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn generate_once(&self, prompt: &str) -> Result<String, LlmError> {
        let payload = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": self.temperature,
            }
        });

        let response = self
            .http
            .post(self.endpoint("api/generate"))
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                LlmError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::GenerationFailed(format!(
                "Ollama returned 404 for {}: {body}",
                self.endpoint("api/generate")
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: GenerateResponse = response.json().await.map_err(|error| {
            LlmError::InvalidResponse(format!("failed to decode Ollama response: {error}"))
        })?;

        if !body.done {
            return Err(LlmError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        Ok(body.response.trim().to_string())
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    done: bool,
}

#[async_trait]
impl LlmClient for OllamaLlmClient {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        tracing::debug!(model = %self.model, prompt_chars = prompt.len(), "Generating completion");
        guarded("llm.generate", &self.policy, || self.generate_once(prompt)).await
    }

    async fn is_available(&self) -> bool {
        let probe = self.http.get(self.endpoint("api/tags")).send();
        match tokio::time::timeout(self.policy.timeout, probe).await {
            Ok(Ok(response)) => response.status().is_success(),
            Ok(Err(error)) => {
                tracing::warn!(error = %error, "Ollama availability probe failed");
                false
            }
            Err(_) => {
                tracing::warn!("Ollama availability probe timed out");
                false
            }
        }
    }
}
