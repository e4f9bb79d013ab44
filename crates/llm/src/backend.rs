//! Extractor backend
//!
//! HTTPS chat-completions backend for the per-turn extraction call. One
//! retry with fixed backoff on transient failures; 4xx responses fail
//! immediately. Intent and entities are always finalized before synthesis
//! begins — the voice path never speaks a half-parsed response.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::contract::{parse_inference, ExtractionRequest, TurnInference};
use crate::prompt::PromptBuilder;
use crate::LlmError;

/// Backend configuration.
#[derive(Debug, Clone)]
pub struct HttpExtractorConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
    /// Retries on transient failure; the dialogue design wants exactly one.
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for HttpExtractorConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(8),
            max_retries: 1,
            retry_backoff: Duration::from_millis(500),
            temperature: 0.2,
            max_tokens: 300,
        }
    }
}

/// Turn extraction interface.
#[async_trait]
pub trait ExtractorBackend: Send + Sync {
    /// Run one extraction. Implementations must return a fully validated
    /// inference; protocol-level garbage is coerced, not propagated.
    async fn infer(&self, request: &ExtractionRequest) -> Result<TurnInference, LlmError>;

    /// Model name for logging.
    fn model_name(&self) -> &str;
}

/// Chat-completions extractor.
#[derive(Clone)]
pub struct HttpExtractor {
    client: Client,
    config: HttpExtractorConfig,
}

impl HttpExtractor {
    pub fn new(config: HttpExtractorConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    async fn execute(&self, request: &ChatRequest<'_>) -> Result<String, LlmError> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(LlmError::Network(format!("server error {status}: {detail}")));
            }
            return Err(LlmError::Api(format!("{status}: {detail}")));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("empty choices".to_string()))
    }

    fn is_retryable(error: &LlmError) -> bool {
        matches!(error, LlmError::Network(_) | LlmError::Timeout)
    }
}

#[async_trait]
impl ExtractorBackend for HttpExtractor {
    async fn infer(&self, request: &ExtractionRequest) -> Result<TurnInference, LlmError> {
        let messages = PromptBuilder::new(request).build();
        let chat = ChatRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tracing::warn!(attempt, "extractor request failed, retrying after backoff");
                tokio::time::sleep(self.config.retry_backoff).await;
            }

            match self.execute(&chat).await {
                Ok(content) => return Ok(parse_inference(&content)),
                Err(e) if Self::is_retryable(&e) => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| LlmError::Network("retries exhausted".to_string())))
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

// Chat-completions API types

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}
