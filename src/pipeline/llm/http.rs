//! HTTP plumbing shared by the network backends: client construction,
//! failure classification, error-body sanitizing and line framing for
//! SSE / NDJSON streams.

use std::collections::VecDeque;
use std::sync::LazyLock;
use std::time::Duration;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use regex::Regex;
use reqwest::StatusCode;

use super::LlmError;

/// Longest error-body excerpt kept for logs.
const MAX_ERROR_BODY_CHARS: usize = 300;

static CREDENTIAL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"sk-[A-Za-z0-9_\-]{8,}").unwrap(),
        Regex::new(r"AIza[0-9A-Za-z_\-]{20,}").unwrap(),
        Regex::new(r"(?i)bearer\s+[A-Za-z0-9._\-]+").unwrap(),
        Regex::new(r#"(?i)"?(?:api[_\-]?key|x-api-key|authorization)"?\s*[:=]\s*"?[^",\s}]+"?"#).unwrap(),
        Regex::new(r"(?i)([?&]key=)[^&\s]+").unwrap(),
    ]
});

pub(crate) fn build_client(timeout_secs: u64) -> Result<reqwest::Client, LlmError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| LlmError::Unknown(format!("HTTP client construction failed: {e}")))
}

/// Classify a transport-level failure.
pub(crate) fn classify_transport(err: reqwest::Error, timeout_secs: u64, base_url: &str) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout(timeout_secs)
    } else if err.is_connect() {
        LlmError::Connection(base_url.to_string())
    } else if err.is_decode() {
        LlmError::Unknown(format!("Malformed response body: {err}"))
    } else {
        LlmError::Unknown(sanitize_error_body(&err.to_string()))
    }
}

/// Classify a non-success HTTP status.
pub(crate) fn classify_status(status: StatusCode, retry_after: Option<u64>, body: &str) -> LlmError {
    let body = sanitize_error_body(body);
    match status.as_u16() {
        401 | 403 => LlmError::Authentication(format!("status {status}: {body}")),
        429 | 529 => LlmError::RateLimited { retry_after },
        408 | 504 => LlmError::Timeout(0),
        502 | 503 => LlmError::Connection(format!("status {status}")),
        _ => LlmError::Unknown(format!("status {status}: {body}")),
    }
}

/// Turn a non-success response into a classified error; pass successes through.
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok());
    let body = response.text().await.unwrap_or_default();
    let err = classify_status(status, retry_after, &body);
    tracing::warn!(status = status.as_u16(), code = err.code(), "Model backend returned error");
    Err(err)
}

/// Redact credential-looking content and truncate.
pub fn sanitize_error_body(body: &str) -> String {
    let mut cleaned = body.to_string();
    for pattern in CREDENTIAL_PATTERNS.iter() {
        cleaned = pattern.replace_all(&cleaned, "[REDACTED]").into_owned();
    }
    if cleaned.chars().count() > MAX_ERROR_BODY_CHARS {
        let truncated: String = cleaned.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{truncated}…")
    } else {
        cleaned
    }
}

/// Splits a byte stream into `\n`-terminated lines.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            lines.push(line.trim_end_matches(['\r', '\n']).to_string());
        }
        lines
    }

    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.buf).trim_end().to_string();
        self.buf.clear();
        (!rest.is_empty()).then_some(rest)
    }
}

/// Line-by-line reader over a streaming response body.
pub(crate) struct LineStream {
    body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    buffer: LineBuffer,
    pending: VecDeque<String>,
    done: bool,
    timeout_secs: u64,
    base_url: String,
}

impl LineStream {
    pub fn new(response: reqwest::Response, timeout_secs: u64, base_url: &str) -> Self {
        Self {
            body: response
                .bytes_stream()
                .map(|chunk| chunk.map(|b| b.to_vec()))
                .boxed(),
            buffer: LineBuffer::default(),
            pending: VecDeque::new(),
            done: false,
            timeout_secs,
            base_url: base_url.to_string(),
        }
    }

    pub async fn next_line(&mut self) -> Option<Result<String, LlmError>> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Some(Ok(line));
            }
            if self.done {
                return None;
            }
            match self.body.next().await {
                Some(Ok(chunk)) => self.pending.extend(self.buffer.push(&chunk)),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(classify_transport(e, self.timeout_secs, &self.base_url)));
                }
                None => {
                    self.done = true;
                    self.pending.extend(self.buffer.finish());
                }
            }
        }
    }
}

/// Payload of an SSE `data:` line, if the line is one.
pub(crate) fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_buffer_handles_split_chunks() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"data: {\"a\"").is_empty());
        let lines = buffer.push(b":1}\r\ndata: [DONE]\n\npartial");
        assert_eq!(lines, vec!["data: {\"a\":1}", "data: [DONE]", ""]);
        assert_eq!(buffer.finish().as_deref(), Some("partial"));
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn line_buffer_keeps_multibyte_chars_across_chunks() {
        let mut buffer = LineBuffer::default();
        let text = "안녕\n".as_bytes();
        assert!(buffer.push(&text[..2]).is_empty());
        assert_eq!(buffer.push(&text[2..]), vec!["안녕"]);
    }

    #[test]
    fn sanitizes_credentials_and_truncates() {
        let body = r#"{"error":"invalid key sk-abcdefghijklmnop","api_key":"secret123"} Bearer tok.en"#;
        let cleaned = sanitize_error_body(body);
        assert!(!cleaned.contains("sk-abcdefghijklmnop"));
        assert!(!cleaned.contains("secret123"));
        assert!(!cleaned.contains("tok.en"));

        let long = "x".repeat(1000);
        assert!(sanitize_error_body(&long).chars().count() <= MAX_ERROR_BODY_CHARS + 1);
    }

    #[test]
    fn status_classification() {
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED, None, "").code(),
            "AUTHENTICATION"
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, Some(7), ""),
            LlmError::RateLimited { retry_after: Some(7) }
        );
        assert_eq!(classify_status(StatusCode::GATEWAY_TIMEOUT, None, "").code(), "TIMEOUT");
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY, None, "").code(), "CONNECTION");
        assert_eq!(classify_status(StatusCode::BAD_REQUEST, None, "bad").code(), "UNKNOWN");
    }

    #[test]
    fn sse_data_prefix() {
        assert_eq!(sse_data("data: {\"x\":1}"), Some("{\"x\":1}"));
        assert_eq!(sse_data("event: ping"), None);
    }
}
