use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::LlmError;

/// Hint for backends that can spend extra reasoning tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    /// Wire value for OpenAI-style `reasoning_effort`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }

    /// Thinking-token budget for backends that take an explicit budget.
    pub fn thinking_budget(&self) -> u32 {
        match self {
            ReasoningEffort::Low => 0,
            ReasoningEffort::Medium => 2048,
            ReasoningEffort::High => 8192,
        }
    }
}

/// One model invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    /// Logical model name; the dispatcher routes on its prefix.
    pub model: String,
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub reasoning_effort: Option<ReasoningEffort>,
}

impl LlmRequest {
    pub fn new(model: impl Into<String>, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: system.into(),
            user: user.into(),
            temperature: 0.2,
            max_tokens: 1024,
            reasoning_effort: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning_effort = Some(effort);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Backend-independent response.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    pub content: String,
    pub usage: TokenUsage,
}

/// A model backend adapter.
///
/// `stream` forwards content deltas to `tx` as they arrive and returns the
/// accumulated response. If `tx` is closed the adapter stops reading and
/// returns what it has.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    async fn stream(
        &self,
        request: &LlmRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<LlmResponse, LlmError> {
        let response = self.complete(request).await?;
        if !response.content.is_empty() {
            let _ = tx.send(response.content.clone()).await;
        }
        Ok(response)
    }
}
