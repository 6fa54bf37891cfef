//! Request and result types shared by the orchestrator and the API.

use serde::{Deserialize, Serialize};

use super::validation::ValidationIssue;

/// Relationship role of the recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Persona {
    Boss,
    Client,
    Official,
    Professor,
    Colleague,
    Parent,
    Friend,
    #[default]
    Other,
}

impl Persona {
    /// Korean label used in prompts.
    pub fn label(&self) -> &'static str {
        match self {
            Persona::Boss => "직장 상사",
            Persona::Client => "고객",
            Persona::Official => "공공기관 담당자",
            Persona::Professor => "교수님",
            Persona::Colleague => "동료",
            Persona::Parent => "학부모",
            Persona::Friend => "친구",
            Persona::Other => "상대방",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Context {
    Request,
    Schedule,
    Apology,
    Complaint,
    Feedback,
    Report,
    Thanks,
    Decline,
    Announcement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Purpose {
    Request,
    Apology,
    Feedback,
    Schedule,
    Report,
    Thanks,
    Decline,
    RefundRejection,
    General,
}

impl Purpose {
    /// Parse a purpose token as returned by the situation analyzer.
    pub fn from_token(token: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(token.trim().to_uppercase())).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Topic {
    Refund,
    Delivery,
    Billing,
    Work,
    Academic,
    Personal,
    Other,
}

/// One transformation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformRequest {
    pub original_text: String,
    #[serde(default)]
    pub sender_info: Option<String>,
    #[serde(default)]
    pub user_prompt: Option<String>,
    #[serde(default)]
    pub persona: Persona,
    #[serde(default)]
    pub contexts: Vec<Context>,
    #[serde(default)]
    pub purpose: Option<Purpose>,
    #[serde(default)]
    pub topic: Option<Topic>,
}

impl TransformRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            original_text: text.into(),
            ..Self::default()
        }
    }

    pub fn primary_context(&self) -> Option<Context> {
        self.contexts.first().copied()
    }
}

/// Counts of segments per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierCounts {
    pub green: usize,
    pub yellow: usize,
    pub red: usize,
}

/// Which optional stages fired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StagesFired {
    pub segment_refiner: bool,
    pub situation_analysis: bool,
    pub identity_booster: bool,
    pub all_safe_recovery: bool,
    pub labeling_fallback: bool,
    pub section_enforced: bool,
    pub knowledge: bool,
}

/// The `stats` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    pub segment_count: usize,
    pub tiers: TierCounts,
    pub locked_span_count: usize,
    pub retry_count: u32,
    pub stages: StagesFired,
    pub template_id: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub latency_ms: u64,
}

/// Terminal artifact of one request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    pub transformed_text: String,
    pub validation_issues: Vec<ValidationIssue>,
    pub stats: PipelineStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_deserializes_camel_case_with_defaults() {
        let req: TransformRequest = serde_json::from_str(
            r#"{"originalText":"안녕","persona":"BOSS","contexts":["APOLOGY","REPORT"],"purpose":"REFUND_REJECTION"}"#,
        )
        .unwrap();
        assert_eq!(req.persona, Persona::Boss);
        assert_eq!(req.primary_context(), Some(Context::Apology));
        assert_eq!(req.purpose, Some(Purpose::RefundRejection));
        assert!(req.sender_info.is_none());

        let minimal: TransformRequest = serde_json::from_str(r#"{"originalText":"x"}"#).unwrap();
        assert_eq!(minimal.persona, Persona::Other);
        assert!(minimal.contexts.is_empty());
    }

    #[test]
    fn purpose_tokens_parse_loosely() {
        assert_eq!(Purpose::from_token(" apology "), Some(Purpose::Apology));
        assert_eq!(Purpose::from_token("refund_rejection"), Some(Purpose::RefundRejection));
        assert_eq!(Purpose::from_token("SMALL_TALK"), None);
    }
}
