//! In-process backend for tests and offline runs.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::{LlmRequest, LlmResponse, ModelBackend, TokenUsage};
use super::LlmError;

type Handler = Box<dyn Fn(&LlmRequest) -> Result<String, LlmError> + Send + Sync>;

/// Mock backend. Replies come from a handler closure or a script of
/// canned replies; every request is recorded.
pub struct MockBackend {
    handler: Option<Handler>,
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: Mutex<Vec<LlmRequest>>,
}

impl MockBackend {
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&LlmRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            handler: Some(Box::new(handler)),
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always replies with `text`.
    pub fn fixed(text: &str) -> Self {
        let text = text.to_string();
        Self::with_handler(move |_| Ok(text.clone()))
    }

    /// Always fails with `err`.
    pub fn failing(err: LlmError) -> Self {
        Self::with_handler(move |_| Err(err.clone()))
    }

    /// Replies in order; once the script runs out, calls fail.
    pub fn scripted(replies: Vec<Result<String, LlmError>>) -> Self {
        Self {
            handler: None,
            script: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Echoes the user message back. Registered under the `mock` prefix
    /// so the service can run without credentials.
    pub fn echo() -> Self {
        Self::with_handler(|req| Ok(req.user.clone()))
    }

    pub fn calls(&self) -> Vec<LlmRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn reply(&self, request: &LlmRequest) -> Result<String, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }
        if let Some(handler) = &self.handler {
            return handler(request);
        }
        self.script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| Err(LlmError::Unknown("mock script exhausted".into())))
    }
}

/// Rough token estimate: one token per two characters.
fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(2)
}

#[async_trait]
impl ModelBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let content = self.reply(request)?;
        let usage = TokenUsage {
            prompt_tokens: estimate_tokens(&request.system) + estimate_tokens(&request.user),
            completion_tokens: estimate_tokens(&content),
        };
        Ok(LlmResponse { content, usage })
    }

    async fn stream(
        &self,
        request: &LlmRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<LlmResponse, LlmError> {
        let response = self.complete(request).await?;
        let chars: Vec<char> = response.content.chars().collect();
        for chunk in chars.chunks(8) {
            if tx.send(chunk.iter().collect()).await.is_err() {
                break;
            }
        }
        Ok(response)
    }
}
