//! Retrying decorator for LLM clients

use std::sync::Arc;

use async_trait::async_trait;

use super::{LlmClient, LlmResponse};
use crate::error::LlmError;
use crate::retry::{retry_with_backoff, RetryPolicy};

/// Retries transient failures with exponential backoff.
///
/// Failed attempts carry no token usage, so only the successful attempt
/// is ever billed.
pub struct RetryingClient {
    inner: Arc<dyn LlmClient>,
    policy: RetryPolicy,
}

impl RetryingClient {
    pub fn new(inner: Arc<dyn LlmClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl LlmClient for RetryingClient {
    async fn invoke(&self, prompt: &str) -> Result<LlmResponse, LlmError> {
        retry_with_backoff(
            &self.policy,
            || self.inner.invoke(prompt),
            LlmError::is_transient,
        )
        .await
        .map_err(|e| e.last_error)
    }

    async fn release(&self) -> Result<(), LlmError> {
        self.inner.release().await
    }
}
