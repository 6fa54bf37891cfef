//! Situation analysis: facts, intent and purpose of the masked message.

use serde::{Deserialize, Serialize};

use super::{extract_json_fragment, strip_markdown_fences, AnalysisError};
use crate::pipeline::llm::{LlmRequest, ModelDispatcher};
use crate::pipeline::preprocess::placeholders_in;
use crate::pipeline::types::Purpose;
use crate::pipeline::usage::{UsageLedger, UsagePhase};

const SITUATION_SYSTEM: &str = "\
당신은 한국어 메시지의 상황을 분석합니다.
메시지에 실제로 적힌 사실만 추출하고, 추측하거나 내용을 보태지 마세요.
{{TYPE_N}} 형태의 자리표시자는 그대로 옮겨 적으세요.

다음 JSON 하나만 출력하세요:
{\"facts\": [\"사실1\", \"사실2\"], \"intent\": \"보내는 사람의 핵심 의도 한 문장\", \"purpose\": \"REQUEST|APOLOGY|FEEDBACK|SCHEDULE|REPORT|THANKS|DECLINE|REFUND_REJECTION|GENERAL\"}";

/// Korean postpositions trimmed before word matching, longest first.
const POSTPOSITIONS: &[&str] = &[
    "에서", "으로", "까지", "부터", "에게", "한테", "처럼", "보다", "은", "는", "이", "가", "을",
    "를", "에", "의", "도", "로", "와", "과", "만",
];

#[derive(Debug, Clone, Copy)]
pub struct SituationParams<'a> {
    pub model: &'a str,
    pub max_tokens: u32,
}

/// The `situationAnalysis` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SituationAnalysis {
    pub facts: Vec<String>,
    pub intent: String,
    pub purpose: Option<Purpose>,
}

#[derive(Deserialize)]
struct RawAnalysis {
    #[serde(default)]
    facts: Vec<serde_json::Value>,
    #[serde(default)]
    intent: String,
    #[serde(default)]
    purpose: Option<String>,
}

fn parse_analysis(content: &str) -> Result<SituationAnalysis, AnalysisError> {
    let clean = strip_markdown_fences(content);
    let json = extract_json_fragment(clean, '{', '}')
        .ok_or_else(|| AnalysisError::Malformed("no JSON object".into()))?;
    let raw: RawAnalysis =
        serde_json::from_str(json).map_err(|e| AnalysisError::Malformed(e.to_string()))?;

    let facts = raw
        .facts
        .into_iter()
        .filter_map(|v| match v {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Object(map) => map
                .get("content")
                .and_then(|c| c.as_str())
                .map(str::to_string),
            _ => None,
        })
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .collect();

    Ok(SituationAnalysis {
        facts,
        intent: raw.intent.trim().to_string(),
        purpose: raw.purpose.as_deref().and_then(Purpose::from_token),
    })
}

pub async fn analyze_situation(
    dispatcher: &ModelDispatcher,
    ledger: &UsageLedger,
    params: &SituationParams<'_>,
    masked: &str,
    sender_info: Option<&str>,
) -> Result<SituationAnalysis, AnalysisError> {
    let mut user = format!("[메시지]\n{masked}\n");
    if let Some(sender) = sender_info.filter(|s| !s.trim().is_empty()) {
        user.push_str(&format!("\n[보내는 사람]\n{sender}\n"));
    }
    let request = LlmRequest::new(params.model, SITUATION_SYSTEM, user)
        .with_temperature(0.0)
        .with_max_tokens(params.max_tokens);
    let response = dispatcher.complete(&request).await?;
    ledger.record(UsagePhase::SituationAnalysis, params.model, &response.usage);

    let analysis = parse_analysis(&response.content)?;
    tracing::debug!(
        facts = analysis.facts.len(),
        purpose = ?analysis.purpose,
        "Situation analysis complete"
    );
    Ok(analysis)
}

/// Token stem with one trailing postposition removed. `None` for tokens
/// shorter than two characters.
pub(crate) fn content_word(token: &str) -> Option<String> {
    let word = token.trim_matches(|c: char| !c.is_alphanumeric());
    let stem = POSTPOSITIONS
        .iter()
        .find_map(|p| word.strip_suffix(p).filter(|s| s.chars().count() >= 2))
        .unwrap_or(word);
    (stem.chars().count() >= 2).then(|| stem.to_string())
}

fn traceable(fact: &str, masked: &str) -> bool {
    let placeholders = placeholders_in(fact);
    if placeholders.iter().any(|p| masked.contains(p.as_str())) {
        return true;
    }
    let words: Vec<String> = fact
        .split_whitespace()
        .filter(|t| !t.contains("{{"))
        .filter_map(content_word)
        .collect();
    if words.is_empty() {
        return false;
    }
    let found = words.iter().filter(|w| masked.contains(w.as_str())).count();
    found * 2 >= words.len()
}

/// Keep only facts traceable to the masked text.
pub fn filter_facts(mut analysis: SituationAnalysis, masked: &str) -> SituationAnalysis {
    let before = analysis.facts.len();
    analysis.facts.retain(|f| traceable(f, masked));
    if analysis.facts.len() < before {
        tracing::debug!(
            dropped = before - analysis.facts.len(),
            "Untraceable situation facts dropped"
        );
    }
    analysis
}
