use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::ModelConfig;
use crate::error::PipelineError;

/// Anything that turns a prompt into raw text. No retries at this layer.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, PipelineError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
}

/// Client for a local Ollama-style `/api/generate` endpoint.
pub struct OllamaClient {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OllamaClient {
    pub fn new(config: &ModelConfig) -> Result<Self, PipelineError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PipelineError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http_client,
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    fn request_body<'a>(&'a self, prompt: &'a str) -> GenerateRequest<'a> {
        GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
                top_p: 0.9,
            },
        }
    }
}

#[async_trait]
impl TextModel for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String, PipelineError> {
        let url = format!("{}/api/generate", self.base_url);
        info!(model = %self.model, prompt_chars = prompt.len(), "model call");
        debug!(prompt, "model prompt");

        let response = self
            .http_client
            .post(&url)
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| PipelineError::Transport(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "model endpoint returned an error");
            return Err(PipelineError::Transport(format!(
                "model endpoint returned {status}: {body}"
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| PipelineError::Transport(format!("unreadable model payload: {e}")))?;
        let text = extract_text(&payload)?;
        info!(model = %self.model, response_chars = text.len(), "model responded");
        Ok(text)
    }
}

/// Pulls the generated text out of a non-streaming payload.
pub fn extract_text(payload: &Value) -> Result<String, PipelineError> {
    payload
        .get("response")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            PipelineError::Transport("model payload has no 'response' text field".to_string())
        })
}
