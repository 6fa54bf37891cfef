//! API error types with structured JSON responses.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::pipeline::llm::LlmError;
use crate::pipeline::PipelineError;

/// Structured error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request: {message}")]
    BadRequest { code: &'static str, message: String },
    #[error("Model backend failed: {0}")]
    Upstream(LlmError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest { code, message } => {
                (StatusCode::BAD_REQUEST, *code, message.clone())
            }
            ApiError::Upstream(e) => {
                tracing::warn!(code = e.code(), "Upstream model failure: {e}");
                let status = match e {
                    LlmError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
                    LlmError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                    LlmError::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
                    LlmError::Authentication(_) | LlmError::Unknown(_) => StatusCode::BAD_GATEWAY,
                };
                (status, e.code(), e.user_message().to_string())
            }
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "내부 오류가 발생했습니다.".to_string(),
                )
            }
        };

        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };

        let mut response = (status, Json(body)).into_response();
        if let ApiError::Upstream(LlmError::RateLimited {
            retry_after: Some(secs),
        }) = &self
        {
            if let Ok(val) = axum::http::HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert("Retry-After", val);
            }
        }
        response
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::EmptyInput | PipelineError::InputTooLong { .. } => ApiError::BadRequest {
                code: err.code(),
                message: err.user_message(),
            },
            PipelineError::Generation(e) => ApiError::Upstream(e),
            PipelineError::Cancelled => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest {
            code: "BAD_REQUEST",
            message: rejection.body_text(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), 4096).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn input_errors_return_400_with_code() {
        let api: ApiError = PipelineError::InputTooLong {
            max: 3000,
            actual: 4000,
        }
        .into();
        let response = api.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "INPUT_TOO_LONG");
        assert!(json["error"]["message"].as_str().unwrap().contains("3000"));
    }

    #[tokio::test]
    async fn rate_limited_returns_429_with_retry_after() {
        let api: ApiError =
            PipelineError::Generation(LlmError::RateLimited { retry_after: Some(60) }).into();
        let response = api.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("Retry-After").unwrap(), "60");
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "RATE_LIMITED");
    }

    #[tokio::test]
    async fn upstream_details_never_reach_the_client() {
        let response =
            ApiError::Upstream(LlmError::Authentication("sk-secret rejected".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "AUTHENTICATION");
        assert!(!json.to_string().contains("sk-secret"));
    }

    #[tokio::test]
    async fn timeout_returns_504() {
        let response = ApiError::Upstream(LlmError::Timeout(60)).into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn internal_returns_500_without_detail() {
        let response = ApiError::Internal("something broke".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "INTERNAL");
        assert!(!json.to_string().contains("something broke"));
    }
}
