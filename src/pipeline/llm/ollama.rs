//! Local Ollama backend over `/api/chat`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::http::{build_client, check_status, classify_transport, LineStream};
use super::types::{LlmRequest, LlmResponse, ModelBackend, TokenUsage};
use super::LlmError;

/// Ollama HTTP client for local inference.
pub struct OllamaBackend {
    base_url: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl OllamaBackend {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, LlmError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: build_client(timeout_secs)?,
            timeout_secs,
        })
    }

    async fn send(&self, body: &ChatRequest<'_>) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(|e| classify_transport(e, self.timeout_secs, &self.base_url))?;
        check_status(response).await
    }
}

fn wire_model(model: &str) -> &str {
    model.strip_prefix("ollama/").unwrap_or(model)
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct Options {
    temperature: f32,
    num_predict: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: Options,
}

impl<'a> ChatRequest<'a> {
    fn from_request(request: &'a LlmRequest, stream: bool) -> Self {
        Self {
            model: wire_model(&request.model),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            stream,
            options: Options {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        }
    }
}

/// Response body from `/api/chat`; streaming sends one per line.
#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
    error: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

#[async_trait]
impl ModelBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let body = ChatRequest::from_request(request, false);
        let response = self.send(&body).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Unknown(format!("Malformed Ollama response: {e}")))?;
        if let Some(err) = parsed.error {
            return Err(LlmError::Unknown(err));
        }

        Ok(LlmResponse {
            content: parsed.message.map(|m| m.content).unwrap_or_default(),
            usage: TokenUsage {
                prompt_tokens: parsed.prompt_eval_count,
                completion_tokens: parsed.eval_count,
            },
        })
    }

    async fn stream(
        &self,
        request: &LlmRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<LlmResponse, LlmError> {
        let body = ChatRequest::from_request(request, true);
        let response = self.send(&body).await?;
        let mut lines = LineStream::new(response, self.timeout_secs, &self.base_url);

        let mut content = String::new();
        let mut usage = TokenUsage::default();
        while let Some(line) = lines.next_line().await {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let Ok(chunk) = serde_json::from_str::<ChatResponse>(&line) else {
                tracing::debug!("Skipping unparseable NDJSON line");
                continue;
            };
            if let Some(err) = chunk.error {
                return Err(LlmError::Unknown(err));
            }
            if chunk.done {
                usage = TokenUsage {
                    prompt_tokens: chunk.prompt_eval_count,
                    completion_tokens: chunk.eval_count,
                };
            }
            let delta = chunk.message.map(|m| m.content).unwrap_or_default();
            if !delta.is_empty() {
                content.push_str(&delta);
                if tx.send(delta).await.is_err() {
                    tracing::debug!("Delta receiver closed, stopping stream");
                    break;
                }
            }
            if chunk.done {
                break;
            }
        }

        Ok(LlmResponse { content, usage })
    }
}
