//! Individual validator checks. Each appends zero or more issues.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use super::{
    IssueType, ValidationConfig, ValidationContext, ValidationIssue, INFORMAL_CONNECTIVES,
    META_PHRASES,
};
use crate::pipeline::analysis::situation::content_word;
use crate::pipeline::labeling::Tier;
use crate::pipeline::preprocess::{restore, PLACEHOLDER};
use crate::pipeline::template::Section;
use crate::pipeline::types::Persona;

static EMOJI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\x{1F000}-\x{1FAFF}\x{2600}-\x{27BF}\x{2B50}\x{2B55}\x{FE0F}]").unwrap()
});

static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d[\d,]*(?:\.\d+)?").unwrap());

static SENTENCE_SPLIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?。\n]+").unwrap());

/// Traces a model leaves when it mentions removed content.
const REMOVAL_TRACES: &[&str] = &[
    "[REDACTED",
    "삭제된 내용",
    "삭제한 내용",
    "생략된 내용",
    "생략한 부분",
    "(삭제)",
];

/// Phrases that confirm an internal check took place.
const VERIFICATION_MARKERS: &[&str] = &[
    "확인해 보니",
    "확인해보니",
    "확인 결과",
    "확인한 결과",
    "확인해 본 결과",
    "검토 결과",
    "검토한 결과",
    "살펴본 결과",
    "점검한 결과",
    "확인했습니다",
    "확인하였습니다",
];

/// Phrases that read as if the sender held the recipient's position.
fn perspective_phrases(persona: Persona) -> &'static [&'static str] {
    match persona {
        Persona::Boss | Persona::Professor | Persona::Official => &[
            "수고하셨습니다",
            "수고했어요",
            "수고해요",
            "고생했어요",
            "잘했어요",
            "잘하셨습니다",
        ],
        Persona::Client => &["고객으로서", "구매자로서", "소비자로서"],
        Persona::Parent => &["학부모로서", "부모로서 말씀드리면"],
        Persona::Friend => &["귀하", "귀사", "존경하는"],
        Persona::Colleague | Persona::Other => &[],
    }
}

fn digits(number: &str) -> String {
    number.chars().filter(|c| *c != ',').collect()
}

fn numbers_in(text: &str) -> Vec<String> {
    NUMBER.find_iter(text).map(|m| digits(m.as_str())).collect()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(super) fn emoji(ctx: &ValidationContext<'_>, issues: &mut Vec<ValidationIssue>) {
    if let Some(m) = EMOJI.find(ctx.output) {
        issues.push(
            ValidationIssue::new(IssueType::Emoji, "이모지를 사용하지 마세요").with_match(m.as_str()),
        );
    }
}

pub(super) fn meta_commentary(ctx: &ValidationContext<'_>, issues: &mut Vec<ValidationIssue>) {
    for phrase in META_PHRASES {
        if ctx.output.contains(phrase) && !ctx.original.contains(phrase) {
            issues.push(
                ValidationIssue::new(
                    IssueType::MetaCommentary,
                    "변환 과정에 대한 설명 없이 메시지 본문만 작성하세요",
                )
                .with_match(*phrase),
            );
        }
    }
}

/// Numbers in the output that never occur in the input.
pub(super) fn unsupported_facts(ctx: &ValidationContext<'_>, issues: &mut Vec<ValidationIssue>) {
    let source = digits(ctx.original);
    let mut reported = HashSet::new();
    for number in numbers_in(ctx.output) {
        if number.chars().count() < 2 || source.contains(&number) {
            continue;
        }
        if reported.insert(number.clone()) {
            issues.push(
                ValidationIssue::new(
                    IssueType::UnsupportedFact,
                    "원문에 없는 숫자나 날짜를 추가하지 마세요",
                )
                .with_match(number),
            );
        }
    }
}

/// Three or more consecutive sentences ending in the same word.
pub(super) fn repeated_endings(ctx: &ValidationContext<'_>, issues: &mut Vec<ValidationIssue>) {
    let endings: Vec<&str> = SENTENCE_SPLIT
        .split(ctx.output)
        .filter_map(|s| s.split_whitespace().last())
        .collect();
    let mut run = 1;
    for pair in endings.windows(2) {
        run = if pair[0] == pair[1] { run + 1 } else { 1 };
        if run == 3 {
            issues.push(
                ValidationIssue::new(
                    IssueType::RepeatedEnding,
                    "같은 문장 끝맺음이 세 번 이상 반복됩니다",
                )
                .with_match(pair[1]),
            );
        }
    }
}

pub(super) fn length_overflow(
    ctx: &ValidationContext<'_>,
    config: &ValidationConfig,
    issues: &mut Vec<ValidationIssue>,
) {
    let output = ctx.output.chars().count();
    let relative = (ctx.original.chars().count() * config.length_multiplier).max(config.length_floor);
    if output > config.max_output_chars || output > relative {
        issues.push(ValidationIssue::new(
            IssueType::LengthOverflow,
            format!("결과가 지나치게 깁니다 ({output}자)"),
        ));
    }
}

pub(super) fn perspective(ctx: &ValidationContext<'_>, issues: &mut Vec<ValidationIssue>) {
    for phrase in perspective_phrases(ctx.persona) {
        if ctx.output.contains(phrase) {
            issues.push(
                ValidationIssue::new(
                    IssueType::PerspectiveError,
                    format!("{}에게 보내는 메시지의 관점에 맞지 않는 표현입니다", ctx.persona.label()),
                )
                .with_match(*phrase),
            );
        }
    }
}

/// Spans lost in the output. A well-formed placeholder left unresolved
/// counts against the missing span of its type and is not reported twice.
pub(super) fn locked_spans(ctx: &ValidationContext<'_>, issues: &mut Vec<ValidationIssue>) {
    let missing_types: HashSet<&str> = ctx
        .unmask
        .missing_spans
        .iter()
        .map(|s| s.span_type.as_str())
        .collect();

    for span in &ctx.unmask.missing_spans {
        issues.push(
            ValidationIssue::new(
                IssueType::LockedSpanMissing,
                format!("반드시 유지해야 하는 값 {}이(가) 빠졌습니다", span.placeholder),
            )
            .with_match(span.original_text.clone()),
        );
    }

    for unknown in &ctx.unmask.unknown_placeholders {
        let tag = unknown
            .trim_start_matches('{')
            .split('_')
            .next()
            .unwrap_or_default();
        if missing_types.contains(tag) {
            continue;
        }
        issues.push(
            ValidationIssue::new(
                IssueType::LockedSpanMissing,
                "존재하지 않는 자리표시자가 출력에 남아 있습니다",
            )
            .with_match(unknown.clone()),
        );
    }
}

/// Deleted content showing up again.
pub(super) fn redaction_leak(
    ctx: &ValidationContext<'_>,
    config: &ValidationConfig,
    issues: &mut Vec<ValidationIssue>,
) {
    let output_collapsed = collapse_whitespace(ctx.output);
    let output_compact: String = ctx.output.split_whitespace().collect();

    for (marker, masked_original) in ctx.redactions.entries() {
        let original = restore(masked_original, ctx.spans);
        if original.chars().count() < config.redaction_min_chars {
            continue;
        }
        let compact: String = original.split_whitespace().collect();
        if ctx.output.contains(&original)
            || output_collapsed.contains(&collapse_whitespace(&original))
            || output_compact.contains(&compact)
        {
            issues.push(
                ValidationIssue::new(IssueType::RedactionLeak, "삭제해야 할 내용이 결과에 다시 등장했습니다")
                    .with_match(marker),
            );
        }
    }

    for trace in REMOVAL_TRACES {
        if ctx.output.contains(trace) {
            issues.push(
                ValidationIssue::new(
                    IssueType::RedactionLeak,
                    "삭제된 내용이 있었다는 흔적을 남기지 마세요",
                )
                .with_match(*trace),
            );
        }
    }
}

/// Numbers of keep-tier segments that must survive.
pub(super) fn core_numbers(ctx: &ValidationContext<'_>, issues: &mut Vec<ValidationIssue>) {
    let output = digits(ctx.output);
    for segment in ctx.segments.iter().filter(|s| s.tier == Tier::Green) {
        let outside_placeholders = PLACEHOLDER.replace_all(&segment.text, " ");
        let missing: Vec<String> = numbers_in(&outside_placeholders)
            .into_iter()
            .filter(|n| !output.contains(n.as_str()))
            .collect();
        if !missing.is_empty() {
            issues.push(
                ValidationIssue::new(
                    IssueType::CoreNumberMissing,
                    format!("{} 구간의 숫자가 결과에서 빠졌습니다", segment.id),
                )
                .with_match(missing.join(", ")),
            );
        }
    }
}

/// Rewrite-tier segments whose content vanished entirely.
pub(super) fn soften_content(ctx: &ValidationContext<'_>, issues: &mut Vec<ValidationIssue>) {
    let output = digits(ctx.output);
    for segment in ctx.segments.iter().filter(|s| s.tier == Tier::Yellow) {
        let restored = restore(&segment.text, ctx.spans);
        let mut keys: Vec<String> = restored
            .split_whitespace()
            .filter_map(content_word)
            .collect();
        keys.extend(numbers_in(&restored));
        if keys.is_empty() {
            continue;
        }
        if keys.iter().all(|k| !output.contains(k.as_str())) {
            issues.push(ValidationIssue::new(
                IssueType::SoftenContentDropped,
                format!("{} 구간의 내용이 결과에서 모두 사라졌습니다", segment.id),
            ));
        }
    }
}

pub(super) fn mandatory_section(ctx: &ValidationContext<'_>, issues: &mut Vec<ValidationIssue>) {
    if !ctx.template.section_enforced
        || !ctx.template.has_section(Section::InternalVerification)
    {
        return;
    }
    if !VERIFICATION_MARKERS.iter().any(|m| ctx.output.contains(m)) {
        issues.push(ValidationIssue::new(
            IssueType::SectionMissing,
            "사실관계를 확인했다는 내용(예: 확인해 보니)을 포함하세요",
        ));
    }
}

pub(super) fn informal_connectives(ctx: &ValidationContext<'_>, issues: &mut Vec<ValidationIssue>) {
    let mut seen = HashSet::new();
    for word in ctx.output.split_whitespace() {
        let word = word.trim_matches(|c: char| !c.is_alphanumeric());
        for connective in INFORMAL_CONNECTIVES {
            if word.starts_with(connective) && seen.insert(*connective) {
                issues.push(
                    ValidationIssue::new(
                        IssueType::InformalConnective,
                        "구어체 접속어 대신 격식 있는 표현을 사용하세요",
                    )
                    .with_match(*connective),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::pipeline::labeling::{Label, LabeledSegment};
    use crate::pipeline::preprocess::{extract_locked_spans, mask, unmask};
    use crate::pipeline::redact::redact;
    use crate::pipeline::template::{select_template, SelectionInput};

    struct Fixture {
        original: String,
        spans: Vec<LockedSpan>,
        segments: Vec<LabeledSegment>,
        persona: Persona,
    }

    impl Fixture {
        fn new(original: &str, labels: &[(&str, Label)]) -> Self {
            let spans = extract_locked_spans(original);
            let masked = mask(original, &spans);
            let mut cursor = 0;
            let segments = labels
                .iter()
                .enumerate()
                .map(|(i, (text, label))| {
                    let start = cursor + masked[cursor..].find(text).unwrap();
                    cursor = start + text.len();
                    LabeledSegment {
                        id: format!("T{}", i + 1),
                        text: text.to_string(),
                        start,
                        end: cursor,
                        label: *label,
                        tier: label.tier(),
                    }
                })
                .collect();
            Self {
                original: original.to_string(),
                spans,
                segments,
                persona: Persona::Other,
            }
        }

        fn run(&self, raw_output: &str) -> ValidationResult {
            let unmasked = unmask(raw_output, &self.spans);
            let redaction = redact(&self.segments);
            let template = select_template(&SelectionInput {
                persona: self.persona,
                purpose: None,
                primary_context: None,
                topic: None,
                masked_text: "",
                segments: &self.segments,
            });
            let ctx = ValidationContext {
                output: &unmasked.text,
                raw_output,
                original: &self.original,
                spans: &self.spans,
                unmask: &unmasked,
                segments: &self.segments,
                redactions: &redaction.map,
                persona: self.persona,
                template: &template,
            };
            validate(&ctx, &ValidationConfig::default())
        }
    }

    fn types(result: &ValidationResult) -> Vec<IssueType> {
        result.issues.iter().map(|i| i.issue_type).collect()
    }

    #[test]
    fn clean_output_passes() {
        let f = Fixture::new(
            "2024년 2월 4일에 만나요",
            &[("{{DATE_1}}에 만나요", Label::CoreFact)],
        );
        let result = f.run("안녕하세요. {{DATE_1}}에 뵙겠습니다.");
        assert!(result.passed, "{:?}", result.issues);
        assert!(result.issues.is_empty());
    }

    #[test]
    fn unresolved_placeholder_with_absent_value_is_one_error() {
        let f = Fixture::new(
            "2024년 2월 4일에 만나요",
            &[("{{DATE_1}}에 만나요", Label::CoreFact)],
        );
        let result = f.run("{{DATE_2}}에 뵙겠습니다.");
        let missing: Vec<_> = result
            .issues
            .iter()
            .filter(|i| i.issue_type == IssueType::LockedSpanMissing)
            .collect();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].severity, Severity::Error);
        assert!(!result.passed);
        assert!(result.needs_retry());
    }

    #[test]
    fn verbatim_value_without_placeholder_is_not_missing() {
        let f = Fixture::new(
            "2024년 2월 4일에 만나요",
            &[("{{DATE_1}}에 만나요", Label::CoreFact)],
        );
        let result = f.run("2024년 2월 4일에 뵙겠습니다.");
        assert!(!types(&result).contains(&IssueType::LockedSpanMissing));
    }

    #[test]
    fn emoji_meta_and_connectives_are_flagged() {
        let f = Fixture::new("내일 뵙겠습니다", &[("내일 뵙겠습니다", Label::CoreFact)]);
        let result = f.run("아래는 변환된 메시지입니다. 근데 내일 뵙겠습니다 😊");
        let t = types(&result);
        assert!(t.contains(&IssueType::Emoji));
        assert!(t.contains(&IssueType::MetaCommentary));
        assert!(t.contains(&IssueType::InformalConnective));
        assert!(result.passed);
        assert!(result.needs_retry());
    }

    #[test]
    fn ordinary_lead_in_is_not_meta_commentary() {
        let f = Fixture::new("일정 공유드립니다", &[("일정 공유드립니다", Label::CoreFact)]);
        let result = f.run("일정 공유드립니다. 아래는 이번 주 일정입니다.");
        assert!(!types(&result).contains(&IssueType::MetaCommentary));
    }

    #[test]
    fn invented_numbers_are_unsupported() {
        let f = Fixture::new("회의를 미뤄주세요", &[("회의를 미뤄주세요", Label::Request)]);
        let result = f.run("회의를 15일로 미뤄주실 수 있을까요?");
        assert_eq!(types(&result), vec![IssueType::UnsupportedFact]);
        assert_eq!(result.issues[0].matched_text.as_deref(), Some("15"));
    }

    #[test]
    fn repeated_endings_and_length() {
        let f = Fixture::new("확인 부탁", &[("확인 부탁", Label::Request)]);
        let result = f.run("확인 부탁드립니다. 검토 부탁드립니다. 회신 부탁드립니다.");
        assert!(types(&result).contains(&IssueType::RepeatedEnding));

        let long = "가".repeat(301);
        assert!(types(&f.run(&long)).contains(&IssueType::LengthOverflow));
    }

    #[test]
    fn perspective_depends_on_persona() {
        let mut f = Fixture::new("보고서 드립니다", &[("보고서 드립니다", Label::CoreFact)]);
        f.persona = Persona::Boss;
        assert!(types(&f.run("보고서 드립니다. 수고하셨습니다.")).contains(&IssueType::PerspectiveError));
        f.persona = Persona::Colleague;
        assert!(!types(&f.run("보고서 드립니다. 수고하셨습니다.")).contains(&IssueType::PerspectiveError));
    }

    #[test]
    fn redacted_text_reappearing_is_a_leak() {
        let f = Fixture::new(
            "자료 보내드립니다. 진짜 일을 이렇게밖에 못하세요",
            &[
                ("자료 보내드립니다.", Label::CoreFact),
                ("진짜 일을 이렇게밖에 못하세요", Label::PersonalAttack),
            ],
        );
        let result = f.run("자료 보내드립니다. 진짜 일을  이렇게밖에 못하세요");
        assert!(types(&result).contains(&IssueType::RedactionLeak));
        assert!(!result.passed);

        let result = f.run("자료 보내드립니다. (삭제)");
        assert!(types(&result).contains(&IssueType::RedactionLeak));
    }

    #[test]
    fn keep_tier_numbers_must_survive() {
        let f = Fixture::new(
            "내선 1234로 연락 주세요",
            &[("내선 1234로 연락 주세요", Label::CoreFact)],
        );
        assert!(f.spans.is_empty());
        let result = f.run("연락 부탁드립니다.");
        assert_eq!(types(&result), vec![IssueType::CoreNumberMissing]);
        assert_eq!(result.issues[0].matched_text.as_deref(), Some("1234"));
        assert!(!result.passed);

        assert!(f.run("내선 1,234로 연락 부탁드립니다.").passed);
    }

    #[test]
    fn dropped_rewrite_content_is_flagged() {
        let f = Fixture::new(
            "납품이 계속 지연되어 답답합니다",
            &[("납품이 계속 지연되어 답답합니다", Label::NegativeFeedback)],
        );
        let result = f.run("확인해 보니 잘 처리되고 있습니다.");
        assert!(types(&result).contains(&IssueType::SoftenContentDropped));

        let result = f.run("확인해 보니 납품 일정이 늦어지고 있어 확인 부탁드립니다.");
        assert!(!types(&result).contains(&IssueType::SoftenContentDropped));
    }

    #[test]
    fn enforced_verification_section_needs_marker() {
        let f = Fixture::new(
            "납품이 계속 지연되어 답답합니다",
            &[("납품이 계속 지연되어 답답합니다", Label::NegativeFeedback)],
        );
        assert!(types(&f.run("납품 일정이 늦어지고 있습니다.")).contains(&IssueType::SectionMissing));
        assert!(!types(&f.run("확인해 보니 납품 일정이 늦어지고 있습니다."))
            .contains(&IssueType::SectionMissing));
    }
}
