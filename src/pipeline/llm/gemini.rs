//! Gemini `generateContent` backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::http::{build_client, check_status, classify_transport, sse_data, LineStream};
use super::types::{LlmRequest, LlmResponse, ModelBackend, TokenUsage};
use super::LlmError;

pub struct GeminiBackend {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl GeminiBackend {
    pub fn new(base_url: &str, api_key: Option<String>, timeout_secs: u64) -> Result<Self, LlmError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client: build_client(timeout_secs)?,
            timeout_secs,
        })
    }

    async fn send(
        &self,
        model: &str,
        method: &str,
        body: &GenerateRequest<'_>,
    ) -> Result<reqwest::Response, LlmError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| LlmError::Authentication("Gemini API key not configured".into()))?;
        // Key goes in a header so it never appears in URLs or logs.
        let response = self
            .client
            .post(format!("{}/models/{model}:{method}", self.base_url))
            .header("x-goog-api-key", key)
            .json(body)
            .send()
            .await
            .map_err(|e| classify_transport(e, self.timeout_secs, &self.base_url))?;
        check_status(response).await
    }
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

impl<'a> GenerateRequest<'a> {
    fn from_request(request: &'a LlmRequest) -> Self {
        Self {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: &request.system,
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part {
                    text: &request.user,
                }],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
                thinking_config: request.reasoning_effort.map(|e| ThinkingConfig {
                    thinking_budget: e.thinking_budget(),
                }),
            },
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

impl GenerateResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| {
                c.parts
                    .iter()
                    .filter(|p| !p.thought)
                    .filter_map(|p| p.text.as_deref())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

impl From<&UsageMetadata> for TokenUsage {
    fn from(u: &UsageMetadata) -> Self {
        TokenUsage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
        }
    }
}

#[async_trait]
impl ModelBackend for GeminiBackend {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let body = GenerateRequest::from_request(request);
        let response = self.send(&request.model, "generateContent", &body).await?;
        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Unknown(format!("Malformed generateContent response: {e}")))?;

        Ok(LlmResponse {
            content: parsed.text(),
            usage: parsed
                .usage_metadata
                .as_ref()
                .map(TokenUsage::from)
                .unwrap_or_default(),
        })
    }

    async fn stream(
        &self,
        request: &LlmRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<LlmResponse, LlmError> {
        let body = GenerateRequest::from_request(request);
        let response = self
            .send(&request.model, "streamGenerateContent?alt=sse", &body)
            .await?;
        let mut lines = LineStream::new(response, self.timeout_secs, &self.base_url);

        let mut content = String::new();
        let mut usage = TokenUsage::default();
        while let Some(line) = lines.next_line().await {
            let line = line?;
            let Some(data) = sse_data(&line) else {
                continue;
            };
            let Ok(chunk) = serde_json::from_str::<GenerateResponse>(data) else {
                continue;
            };
            if let Some(u) = &chunk.usage_metadata {
                usage = u.into();
            }
            let delta = chunk.text();
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
