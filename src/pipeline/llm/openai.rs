//! OpenAI-compatible chat completions backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::http::{build_client, check_status, classify_transport, sse_data, LineStream};
use super::types::{LlmRequest, LlmResponse, ModelBackend, TokenUsage};
use super::LlmError;

pub struct OpenAiBackend {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl OpenAiBackend {
    pub fn new(base_url: &str, api_key: Option<String>, timeout_secs: u64) -> Result<Self, LlmError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client: build_client(timeout_secs)?,
            timeout_secs,
        })
    }

    async fn send(&self, body: &ChatRequest<'_>) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| classify_transport(e, self.timeout_secs, &self.base_url))?;
        check_status(response).await
    }
}

/// o-series and gpt-5 models take `max_completion_tokens` and
/// `reasoning_effort` and reject a custom temperature.
fn is_reasoning_model(model: &str) -> bool {
    ["o1", "o3", "o4", "gpt-5"].iter().any(|p| model.starts_with(p))
}

fn wire_model(model: &str) -> &str {
    model.strip_prefix("openai/").unwrap_or(model)
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'static str>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

impl<'a> ChatRequest<'a> {
    fn from_request(request: &'a LlmRequest, stream: bool) -> Self {
        let model = wire_model(&request.model);
        let reasoning = is_reasoning_model(model);
        Self {
            model,
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
            temperature: (!reasoning).then_some(request.temperature),
            max_tokens: (!reasoning).then_some(request.max_tokens),
            max_completion_tokens: reasoning.then_some(request.max_tokens),
            reasoning_effort: if reasoning {
                request.reasoning_effort.map(|e| e.as_str())
            } else {
                None
            },
            stream,
            stream_options: stream.then_some(StreamOptions { include_usage: true }),
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<Content>,
    delta: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl From<Usage> for TokenUsage {
    fn from(u: Usage) -> Self {
        TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        }
    }
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let body = ChatRequest::from_request(request, false);
        let response = self.send(&body).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Unknown(format!("Malformed chat completion: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or_else(|| LlmError::Unknown("Chat completion had no content".into()))?;

        Ok(LlmResponse {
            content,
            usage: parsed.usage.map(TokenUsage::from).unwrap_or_default(),
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
            let Some(data) = sse_data(&line) else {
                continue;
            };
            if data == "[DONE]" {
                break;
            }
            let Ok(chunk) = serde_json::from_str::<ChatResponse>(data) else {
                tracing::debug!("Skipping unparseable stream chunk");
                continue;
            };
            if let Some(u) = chunk.usage {
                usage = u.into();
            }
            let delta = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta)
                .and_then(|d| d.content)
                .unwrap_or_default();
            if delta.is_empty() {
                continue;
            }
            content.push_str(&delta);
            if tx.send(delta).await.is_err() {
                tracing::debug!("Delta receiver closed, stopping stream");
                break;
            }
        }

        Ok(LlmResponse { content, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::llm::ReasoningEffort;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(model: &str) -> LlmRequest {
        LlmRequest::new(model, "system", "user").with_max_tokens(64)
    }

    #[tokio::test]
    async fn completes_and_reports_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "gpt-4o-mini", "max_tokens": 64})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "안녕하세요"}}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3}
            })))
            .mount(&server)
            .await;

        let backend = OpenAiBackend::new(&server.uri(), Some("sk-test".into()), 5).unwrap();
        let response = backend.complete(&request("gpt-4o-mini")).await.unwrap();
        assert_eq!(response.content, "안녕하세요");
        assert_eq!(response.usage.prompt_tokens, 12);
        assert_eq!(response.usage.completion_tokens, 3);
    }

    #[tokio::test]
    async fn reasoning_models_send_effort_instead_of_temperature() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "model": "o3-mini",
                "max_completion_tokens": 64,
                "reasoning_effort": "high"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "ok"}}]
            })))
            .mount(&server)
            .await;

        let backend = OpenAiBackend::new(&server.uri(), None, 5).unwrap();
        let req = request("openai/o3-mini").with_reasoning_effort(ReasoningEffort::High);
        let response = backend.complete(&req).await.unwrap();
        assert_eq!(response.content, "ok");
    }

    #[tokio::test]
    async fn streams_sse_deltas() {
        let server = MockServer::start().await;
        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"안녕\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"하세요\"}}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":5,\"completion_tokens\":2}}\n\n",
            "data: [DONE]\n\n"
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .mount(&server)
            .await;

        let backend = OpenAiBackend::new(&server.uri(), None, 5).unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let response = backend.stream(&request("gpt-4o"), tx).await.unwrap();
        assert_eq!(response.content, "안녕하세요");
        assert_eq!(response.usage.completion_tokens, 2);

        let mut deltas = Vec::new();
        while let Some(d) = rx.recv().await {
            deltas.push(d);
        }
        assert_eq!(deltas, vec!["안녕", "하세요"]);
    }

    #[tokio::test]
    async fn unauthorized_maps_to_authentication() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key sk-abcdefghijkl"))
            .mount(&server)
            .await;

        let backend = OpenAiBackend::new(&server.uri(), Some("bad".into()), 5).unwrap();
        let err = backend.complete(&request("gpt-4o")).await.unwrap_err();
        assert_eq!(err.code(), "AUTHENTICATION");
        assert!(!err.to_string().contains("sk-abcdefghijkl"));
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "12"))
            .mount(&server)
            .await;

        let backend = OpenAiBackend::new(&server.uri(), None, 5).unwrap();
        let err = backend.complete(&request("gpt-4o")).await.unwrap_err();
        assert_eq!(err, LlmError::RateLimited { retry_after: Some(12) });
    }

    #[tokio::test]
    async fn unreachable_server_is_connection_error() {
        let backend = OpenAiBackend::new("http://127.0.0.1:9", None, 2).unwrap();
        let err = backend.complete(&request("gpt-4o")).await.unwrap_err();
        assert_eq!(err.code(), "CONNECTION");
    }
}
