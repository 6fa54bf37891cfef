//! Identity booster: proper nouns the regex extractor cannot see.

use std::sync::LazyLock;

use regex::Regex;

use super::{extract_json_fragment, strip_markdown_fences, AnalysisError};
use crate::pipeline::llm::{LlmRequest, ModelDispatcher};
use crate::pipeline::usage::{UsageLedger, UsagePhase};

const IDENTITY_SYSTEM: &str = "\
다음 한국어 메시지에서 사람 이름, 회사·기관명, 상품명 같은 고유명사만 찾으세요.
직함(대리, 팀장 등)이나 일반 명사는 제외하고, 메시지에 적힌 그대로 옮겨 적으세요.
{{TYPE_N}} 형태의 자리표시자는 이미 처리된 값이므로 제외합니다.
JSON 문자열 배열 하나만 출력하세요. 없으면 []를 출력하세요.";

/// Names longer than this are treated as noise.
const MAX_NAME_CHARS: usize = 20;

/// Honorifics and titles that usually follow a name.
static NAME_CUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[가-힣]{2,4}\s?(님|씨|대리|과장|차장|부장|팀장|실장|이사|사장|대표|주임|교수|선생|매니저|책임|선임)|\b[A-Z][a-z]+\b|\(주\)|주식회사")
        .unwrap()
});

#[derive(Debug, Clone, Copy)]
pub struct IdentityParams<'a> {
    pub model: &'a str,
    pub max_tokens: u32,
}

/// Whether the booster is worth a model call for this text.
pub fn booster_gate(enabled: bool, masked: &str, min_chars: usize) -> bool {
    enabled && masked.chars().count() >= min_chars && NAME_CUE.is_match(masked)
}

fn parse_names(content: &str, masked: &str) -> Result<Vec<String>, AnalysisError> {
    let clean = strip_markdown_fences(content);
    let json = extract_json_fragment(clean, '[', ']')
        .ok_or_else(|| AnalysisError::Malformed("no JSON array".into()))?;
    let raw: Vec<serde_json::Value> =
        serde_json::from_str(json).map_err(|e| AnalysisError::Malformed(e.to_string()))?;

    let mut names: Vec<String> = Vec::new();
    for value in raw {
        let Some(name) = value.as_str().map(str::trim) else {
            continue;
        };
        let chars = name.chars().count();
        if chars < 2
            || chars > MAX_NAME_CHARS
            || name.contains("{{")
            || !masked.contains(name)
            || names.iter().any(|n| n == name)
        {
            continue;
        }
        names.push(name.to_string());
    }
    Ok(names)
}

/// Ask the identity model for proper nouns that occur in `masked`.
pub async fn boost_identities(
    dispatcher: &ModelDispatcher,
    ledger: &UsageLedger,
    params: &IdentityParams<'_>,
    masked: &str,
) -> Result<Vec<String>, AnalysisError> {
    let request = LlmRequest::new(params.model, IDENTITY_SYSTEM, masked)
        .with_temperature(0.0)
        .with_max_tokens(params.max_tokens);
    let response = dispatcher.complete(&request).await?;
    ledger.record(UsagePhase::IdentityBooster, params.model, &response.usage);

    let names = parse_names(&response.content, masked)?;
    tracing::debug!(names = names.len(), "Identity booster complete");
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::llm::MockBackend;
    use std::sync::Arc;

    #[test]
    fn gate_requires_flag_length_and_cue() {
        let text = "김민수 대리님께 자료 전달 부탁드립니다";
        assert!(booster_gate(true, text, 10));
        assert!(!booster_gate(false, text, 10));
        assert!(!booster_gate(true, text, 100));
        assert!(!booster_gate(true, "내일 회의 자료를 꼭 챙겨주세요 부탁드립니다", 10));
    }

    #[test]
    fn names_are_filtered_to_text_occurrences() {
        let masked = "김민수 대리님과 {{EMAIL_1}} 으로 연락한 Acme 건입니다";
        let names = parse_names(
            r#"["김민수", "김민수", "박지훈", "{{EMAIL_1}}", "A", "Acme", 7]"#,
            masked,
        )
        .unwrap();
        assert_eq!(names, vec!["김민수", "Acme"]);
    }

    #[tokio::test]
    async fn booster_call_records_usage() {
        let dispatcher = ModelDispatcher::empty()
            .with_backend("mock", Arc::new(MockBackend::fixed("결과: [\"이서연\"]")));
        let ledger = UsageLedger::default();
        let params = IdentityParams {
            model: "mock-identity",
            max_tokens: 128,
        };
        let names = boost_identities(&dispatcher, &ledger, &params, "이서연 님 안녕하세요")
            .await
            .unwrap();
        assert_eq!(names, vec!["이서연"]);
        assert_eq!(ledger.report().phases[0].phase, UsagePhase::IdentityBooster);
    }
}
