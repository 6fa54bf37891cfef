//! Model dispatcher and backend adapters.

pub mod anthropic;
pub mod dispatcher;
pub mod gemini;
pub mod http;
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod types;

pub use dispatcher::*;
pub use mock::MockBackend;
pub use types::*;

use thiserror::Error;

/// Stable failure taxonomy for every model call. Callers never see
/// backend-specific error types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Model backend rejected credentials: {0}")]
    Authentication(String),

    #[error("Model backend rate limited the request")]
    RateLimited { retry_after: Option<u64> },

    #[error("Model call timed out after {0}s")]
    Timeout(u64),

    #[error("Model backend unreachable: {0}")]
    Connection(String),

    #[error("Model call failed: {0}")]
    Unknown(String),
}

impl LlmError {
    pub fn code(&self) -> &'static str {
        match self {
            LlmError::Authentication(_) => "AUTHENTICATION",
            LlmError::RateLimited { .. } => "RATE_LIMITED",
            LlmError::Timeout(_) => "TIMEOUT",
            LlmError::Connection(_) => "CONNECTION",
            LlmError::Unknown(_) => "UNKNOWN",
        }
    }

    /// Message safe to show to end users.
    pub fn user_message(&self) -> &'static str {
        match self {
            LlmError::Authentication(_) => {
                "AI 서비스 인증에 실패했습니다. 관리자에게 문의해 주세요."
            }
            LlmError::RateLimited { .. } => {
                "요청이 많아 잠시 처리할 수 없습니다. 잠시 후 다시 시도해 주세요."
            }
            LlmError::Timeout(_) => "AI 응답 시간이 초과되었습니다. 다시 시도해 주세요.",
            LlmError::Connection(_) => {
                "AI 서비스에 연결할 수 없습니다. 잠시 후 다시 시도해 주세요."
            }
            LlmError::Unknown(_) => "변환 중 오류가 발생했습니다. 다시 시도해 주세요.",
        }
    }
}
