//! LLM abstraction layer
//!
//! The pool only talks to [`LlmClient`] handles produced by an
//! [`LlmFactory`]. Provider wire formats stay behind those two traits.

mod ollama;
mod retry;

pub use ollama::OllamaClient;
pub use retry::RetryingClient;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Which model an agent runs on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_model() -> String {
    "qwen3-coder:30b".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            temperature: None,
        }
    }
}

impl LlmConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A completed LLM call with token usage
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LlmResponse {
    pub text: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

impl LlmResponse {
    pub fn new(text: impl Into<String>, tokens_in: u64, tokens_out: u64) -> Self {
        Self {
            text: text.into(),
            tokens_in,
            tokens_out,
        }
    }
}

/// Handle to a model, owned by one agent
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a single prompt and wait for the complete response
    async fn invoke(&self, prompt: &str) -> Result<LlmResponse, LlmError>;

    /// Release any resources held by the handle
    async fn release(&self) -> Result<(), LlmError> {
        Ok(())
    }
}

/// Creates clients for a provider/model pair
pub trait LlmFactory: Send + Sync {
    fn create_client(&self, config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError>;
}

/// Factory for the providers shipped with the crate
#[derive(Debug, Clone)]
pub struct DefaultLlmFactory {
    ollama_url: String,
}

impl DefaultLlmFactory {
    pub fn new(ollama_url: impl Into<String>) -> Self {
        Self {
            ollama_url: ollama_url.into(),
        }
    }
}

impl LlmFactory for DefaultLlmFactory {
    fn create_client(&self, config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
        match config.provider.as_str() {
            "ollama" => Ok(Arc::new(OllamaClient::new(
                &self.ollama_url,
                &config.model,
                config.temperature,
            )?)),
            other => Err(LlmError::UnsupportedProvider(other.to_string())),
        }
    }
}
