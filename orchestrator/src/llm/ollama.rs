//! Ollama client over the HTTP chat endpoint
//!
//! Uses direct HTTP rather than a client library so token counts
//! (`prompt_eval_count` / `eval_count`) are available for cost tracking.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{LlmClient, LlmResponse};
use crate::error::LlmError;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ChatOptions>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

pub struct OllamaClient {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: Option<f32>,
}

impl OllamaClient {
    pub fn new(url: &str, model: &str, temperature: Option<f32>) -> Result<Self, LlmError> {
        let parsed = url::Url::parse(url)
            .map_err(|e| LlmError::Fatal(format!("invalid Ollama URL '{}': {}", url, e)))?;
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| LlmError::Fatal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            model: model.to_string(),
            temperature,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

fn classify(err: reqwest::Error) -> LlmError {
    if err.is_timeout() || err.is_connect() {
        LlmError::Transient(err.to_string())
    } else {
        LlmError::Fatal(err.to_string())
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn invoke(&self, prompt: &str) -> Result<LlmResponse, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream: false,
            options: self.temperature.map(|temperature| ChatOptions { temperature }),
        };

        let url = format!("{}/api/chat", self.base_url);
        tracing::debug!(model = %self.model, prompt_len = prompt.len(), "Sending Ollama request");

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("Ollama API error {}: {}", status, body);
            return Err(if status.as_u16() == 429 || status.is_server_error() {
                LlmError::Transient(message)
            } else {
                LlmError::Fatal(message)
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Fatal(format!("failed to parse Ollama response: {}", e)))?;

        tracing::debug!(
            model = %self.model,
            tokens_in = body.prompt_eval_count,
            tokens_out = body.eval_count,
            "Ollama response received"
        );

        Ok(LlmResponse {
            text: body.message.content,
            tokens_in: body.prompt_eval_count,
            tokens_out: body.eval_count,
        })
    }
}
