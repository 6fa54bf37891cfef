//! Anthropic messages backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::http::{build_client, check_status, classify_transport, sse_data, LineStream};
use super::types::{LlmRequest, LlmResponse, ModelBackend, TokenUsage};
use super::LlmError;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicBackend {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl AnthropicBackend {
    pub fn new(base_url: &str, api_key: Option<String>, timeout_secs: u64) -> Result<Self, LlmError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client: build_client(timeout_secs)?,
            timeout_secs,
        })
    }

    async fn send(&self, body: &MessagesRequest<'_>) -> Result<reqwest::Response, LlmError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| LlmError::Authentication("Anthropic API key not configured".into()))?;
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| classify_transport(e, self.timeout_secs, &self.base_url))?;
        check_status(response).await
    }
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct Thinking {
    #[serde(rename = "type")]
    kind: &'static str,
    budget_tokens: u32,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<Thinking>,
    stream: bool,
}

impl<'a> MessagesRequest<'a> {
    fn from_request(request: &'a LlmRequest, stream: bool) -> Self {
        let budget = request
            .reasoning_effort
            .map(|e| e.thinking_budget())
            .filter(|b| *b > 0);
        Self {
            model: &request.model,
            system: &request.system,
            messages: vec![Message {
                role: "user",
                content: &request.user,
            }],
            // Thinking tokens count against max_tokens.
            max_tokens: request.max_tokens + budget.unwrap_or(0),
            // Extended thinking requires the default temperature.
            temperature: budget.is_none().then_some(request.temperature),
            thinking: budget.map(|budget_tokens| Thinking {
                kind: "enabled",
                budget_tokens,
            }),
            stream,
        }
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// One server-sent event payload. Only the fields we read.
#[derive(Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    delta: Option<StreamDelta>,
    message: Option<MessagesResponse>,
    usage: Option<Usage>,
    error: Option<StreamError>,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(rename = "type")]
    kind: Option<String>,
    text: Option<String>,
}

#[derive(Deserialize)]
struct StreamError {
    #[serde(rename = "type")]
    kind: String,
}

#[async_trait]
impl ModelBackend for AnthropicBackend {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let body = MessagesRequest::from_request(request, false);
        let response = self.send(&body).await?;
        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Unknown(format!("Malformed messages response: {e}")))?;

        let content: String = parsed
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect();
        let usage = parsed.usage.unwrap_or_default();

        Ok(LlmResponse {
            content,
            usage: TokenUsage {
                prompt_tokens: usage.input_tokens,
                completion_tokens: usage.output_tokens,
            },
        })
    }

    async fn stream(
        &self,
        request: &LlmRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<LlmResponse, LlmError> {
        let body = MessagesRequest::from_request(request, true);
        let response = self.send(&body).await?;
        let mut lines = LineStream::new(response, self.timeout_secs, &self.base_url);

        let mut content = String::new();
        let mut usage = TokenUsage::default();
        while let Some(line) = lines.next_line().await {
            let line = line?;
            let Some(data) = sse_data(&line) else {
                continue;
            };
            let Ok(event) = serde_json::from_str::<StreamEvent>(data) else {
                continue;
            };
            match event.kind.as_str() {
                "message_start" => {
                    if let Some(u) = event.message.and_then(|m| m.usage) {
                        usage.prompt_tokens = u.input_tokens;
                    }
                }
                "content_block_delta" => {
                    let Some(delta) = event.delta else { continue };
                    if delta.kind.as_deref() != Some("text_delta") {
                        continue;
                    }
                    let Some(text) = delta.text.filter(|t| !t.is_empty()) else {
                        continue;
                    };
                    content.push_str(&text);
                    if tx.send(text).await.is_err() {
                        tracing::debug!("Delta receiver closed, stopping stream");
                        break;
                    }
                }
                "message_delta" => {
                    if let Some(u) = event.usage {
                        usage.completion_tokens = u.output_tokens;
                    }
                }
                "message_stop" => break,
                "error" => {
                    let kind = event.error.map(|e| e.kind).unwrap_or_default();
                    return Err(match kind.as_str() {
                        "overloaded_error" | "rate_limit_error" => {
                            LlmError::RateLimited { retry_after: None }
                        }
                        "authentication_error" | "permission_error" => {
                            LlmError::Authentication(kind)
                        }
                        _ => LlmError::Unknown(format!("stream error: {kind}")),
                    });
                }
                _ => {}
            }
        }

        Ok(LlmResponse { content, usage })
    }
}
