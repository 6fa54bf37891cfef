//! Output validation: a fixed battery of textual checks over the
//! candidate text, and the retry decision derived from it.

mod checks;

use serde::Serialize;

use super::labeling::LabeledSegment;
use super::preprocess::{LockedSpan, UnmaskResult};
use super::redact::RedactionMap;
use super::template::SelectedTemplate;
use super::types::Persona;

/// Phrases that describe the rewrite instead of being the message.
pub const META_PHRASES: &[&str] = &[
    "변환된 메시지",
    "변환한 메시지",
    "수정된 메시지",
    "다듬은 메시지",
    "변환 결과",
    "아래는 변환",
    "아래는 수정",
    "아래는 다듬은",
    "원문에서",
    "자리표시자",
    "placeholder",
];

/// Spoken-register connectives that do not belong in a polished message.
pub const INFORMAL_CONNECTIVES: &[&str] = &[
    "근데", "그니까", "암튼", "아무튼", "어쨌든", "걍", "글구", "그리구", "그래갖고",
];

/// Thresholds for the validator.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationConfig {
    /// Absolute ceiling on output length, in characters.
    pub max_output_chars: usize,
    /// Output may be at most this multiple of the input length...
    pub length_multiplier: usize,
    /// ...unless it is shorter than this floor.
    pub length_floor: usize,
    /// Redacted texts shorter than this are not checked for leakage.
    pub redaction_min_chars: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_output_chars: 4000,
            length_multiplier: 3,
            length_floor: 300,
            redaction_min_chars: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueType {
    Emoji,
    MetaCommentary,
    UnsupportedFact,
    RepeatedEnding,
    LengthOverflow,
    PerspectiveError,
    LockedSpanMissing,
    RedactionLeak,
    CoreNumberMissing,
    SoftenContentDropped,
    SectionMissing,
    InformalConnective,
}

impl IssueType {
    pub fn severity(&self) -> Severity {
        match self {
            IssueType::LockedSpanMissing
            | IssueType::RedactionLeak
            | IssueType::CoreNumberMissing => Severity::Error,
            _ => Severity::Warning,
        }
    }

    /// Warnings that still justify the repair retry.
    pub fn retry_worthy(&self) -> bool {
        match self.severity() {
            Severity::Error => true,
            Severity::Warning => matches!(
                self,
                IssueType::Emoji
                    | IssueType::MetaCommentary
                    | IssueType::UnsupportedFact
                    | IssueType::PerspectiveError
                    | IssueType::SectionMissing
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_text: Option<String>,
}

impl ValidationIssue {
    pub fn new(issue_type: IssueType, message: impl Into<String>) -> Self {
        Self {
            issue_type,
            severity: issue_type.severity(),
            message: message.into(),
            matched_text: None,
        }
    }

    pub fn with_match(mut self, matched: impl Into<String>) -> Self {
        self.matched_text = Some(matched.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub passed: bool,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn from_issues(issues: Vec<ValidationIssue>) -> Self {
        Self {
            passed: !issues.iter().any(|i| i.severity == Severity::Error),
            issues,
        }
    }

    pub fn error_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .count()
    }

    pub fn needs_retry(&self) -> bool {
        self.issues.iter().any(|i| i.issue_type.retry_worthy())
    }

    /// One hint line per retry-worthy issue, for the repair prompt.
    ///
    /// Hints go back to the model, so any locked value in them is put back
    /// behind its placeholder. Missing-span hints already name theirs.
    pub fn retry_hints(&self, spans: &[LockedSpan]) -> Vec<String> {
        let mut by_length: Vec<&LockedSpan> = spans.iter().collect();
        by_length.sort_by(|a, b| b.original_text.len().cmp(&a.original_text.len()));

        self.issues
            .iter()
            .filter(|i| i.issue_type.retry_worthy())
            .map(|i| {
                let hint = match &i.matched_text {
                    Some(_) if i.issue_type == IssueType::LockedSpanMissing => i.message.clone(),
                    Some(m) => format!("{} ({m})", i.message),
                    None => i.message.clone(),
                };
                by_length
                    .iter()
                    .filter(|s| !s.original_text.is_empty())
                    .fold(hint, |h, s| h.replace(&s.original_text, &s.placeholder))
            })
            .collect()
    }
}

/// Everything a validation run looks at.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    /// Final text after unmasking.
    pub output: &'a str,
    /// Model output before unmasking.
    pub raw_output: &'a str,
    /// Normalized input.
    pub original: &'a str,
    pub spans: &'a [LockedSpan],
    pub unmask: &'a UnmaskResult,
    pub segments: &'a [LabeledSegment],
    pub redactions: &'a RedactionMap,
    pub persona: Persona,
    pub template: &'a SelectedTemplate,
}

/// Run every check in a fixed order.
pub fn validate(ctx: &ValidationContext<'_>, config: &ValidationConfig) -> ValidationResult {
    let mut issues = Vec::new();
    checks::emoji(ctx, &mut issues);
    checks::meta_commentary(ctx, &mut issues);
    checks::unsupported_facts(ctx, &mut issues);
    checks::repeated_endings(ctx, &mut issues);
    checks::length_overflow(ctx, config, &mut issues);
    checks::perspective(ctx, &mut issues);
    checks::locked_spans(ctx, &mut issues);
    checks::redaction_leak(ctx, config, &mut issues);
    checks::core_numbers(ctx, &mut issues);
    checks::soften_content(ctx, &mut issues);
    checks::mandatory_section(ctx, &mut issues);
    checks::informal_connectives(ctx, &mut issues);

    let result = ValidationResult::from_issues(issues);
    tracing::debug!(
        passed = result.passed,
        issues = result.issues.len(),
        errors = result.error_count(),
        "Validation complete"
    );
    result
}
