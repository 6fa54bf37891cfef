//! Routes a logical model name to the backend that serves it.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::anthropic::AnthropicBackend;
use super::gemini::GeminiBackend;
use super::mock::MockBackend;
use super::ollama::OllamaBackend;
use super::openai::OpenAiBackend;
use super::types::{LlmRequest, LlmResponse, ModelBackend};
use super::LlmError;
use crate::config::BackendSettings;

/// Prefix routing table. The longest matching prefix wins.
#[derive(Clone, Default)]
pub struct ModelDispatcher {
    routes: Vec<(String, Arc<dyn ModelBackend>)>,
}

impl ModelDispatcher {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, prefix: &str, backend: Arc<dyn ModelBackend>) -> Self {
        self.routes.retain(|(p, _)| p != prefix);
        self.routes.push((prefix.to_string(), backend));
        self
    }

    /// Register the hosted and local backends. Hosted backends without a
    /// key are still registered so calls fail as `AUTHENTICATION` rather
    /// than as an unknown model.
    pub fn from_settings(settings: &BackendSettings) -> Result<Self, LlmError> {
        let timeout = settings.request_timeout_secs;
        let openai: Arc<dyn ModelBackend> = Arc::new(OpenAiBackend::new(
            &settings.openai_base_url,
            settings.openai_api_key.clone(),
            timeout,
        )?);
        let anthropic: Arc<dyn ModelBackend> = Arc::new(AnthropicBackend::new(
            &settings.anthropic_base_url,
            settings.anthropic_api_key.clone(),
            timeout,
        )?);
        let gemini: Arc<dyn ModelBackend> = Arc::new(GeminiBackend::new(
            &settings.gemini_base_url,
            settings.gemini_api_key.clone(),
            timeout,
        )?);
        let ollama: Arc<dyn ModelBackend> =
            Arc::new(OllamaBackend::new(&settings.ollama_base_url, timeout)?);

        let mut dispatcher = Self::empty();
        for prefix in ["gpt-", "o1", "o3", "o4", "openai/"] {
            dispatcher = dispatcher.with_backend(prefix, openai.clone());
        }
        Ok(dispatcher
            .with_backend("claude-", anthropic)
            .with_backend("gemini-", gemini)
            .with_backend("ollama/", ollama)
            .with_backend("mock", Arc::new(MockBackend::echo())))
    }

    fn route(&self, model: &str) -> Result<&Arc<dyn ModelBackend>, LlmError> {
        self.routes
            .iter()
            .filter(|(prefix, _)| model.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, backend)| backend)
            .ok_or_else(|| LlmError::Unknown(format!("No backend serves model '{model}'")))
    }

    pub async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let backend = self.route(&request.model)?;
        tracing::debug!(model = %request.model, backend = backend.name(), "Dispatching completion");
        backend.complete(request).await
    }

    pub async fn stream(
        &self,
        request: &LlmRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<LlmResponse, LlmError> {
        let backend = self.route(&request.model)?;
        tracing::debug!(model = %request.model, backend = backend.name(), "Dispatching stream");
        backend.stream(request, tx).await
    }
}
