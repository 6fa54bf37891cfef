//! Background analysis tasks: situation analysis and the identity booster.

pub mod identity;
pub mod situation;

pub use identity::{boost_identities, booster_gate, IdentityParams};
pub use situation::{analyze_situation, filter_facts, SituationAnalysis, SituationParams};

use thiserror::Error;

use super::llm::LlmError;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error(transparent)]
    Model(#[from] LlmError),

    #[error("Malformed analysis response: {0}")]
    Malformed(String),
}

impl AnalysisError {
    pub fn code(&self) -> &'static str {
        match self {
            AnalysisError::Model(e) => e.code(),
            AnalysisError::Malformed(_) => "MALFORMED",
        }
    }
}

/// Strip markdown code fences from a model reply.
pub(crate) fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    clean.strip_suffix("```").unwrap_or(clean).trim()
}

/// The outermost `open..=close` fragment of `text`.
pub(crate) fn extract_json_fragment(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (start <= end).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fences_and_prose_are_stripped() {
        let reply = "```json\n{\"a\": 1}\n```";
        assert_eq!(strip_markdown_fences(reply), "{\"a\": 1}");
        assert_eq!(
            extract_json_fragment("결과는 다음과 같습니다: [\"김민수\"] 입니다", '[', ']'),
            Some("[\"김민수\"]")
        );
        assert_eq!(extract_json_fragment("] nothing [", '[', ']'), None);
    }
}
