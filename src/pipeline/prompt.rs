//! Final-generation prompt assembly.

use serde::Serialize;

use super::analysis::SituationAnalysis;
use super::labeling::{strip_for_matching, Label, Tier};
use super::preprocess::{placeholders_in, PLACEHOLDER};
use super::redact::ProcessedSegment;
use super::template::{Emphasis, SelectedTemplate};
use super::types::Persona;
use super::validation::{INFORMAL_CONNECTIVES, META_PHRASES};

const ROLE_BLOCK: &str = "\
당신은 한국어 비즈니스 커뮤니케이션 전문가입니다.
아래 구간 목록을 바탕으로, 받는 사람과의 관계에 맞는 정중하고 자연스러운 메시지 한 편을 작성합니다.";

const FORMAT_BLOCK: &str = "\
[입력 형식]
- 사용자 메시지의 JSON 배열은 원문을 의미 단위로 나눈 구간 목록입니다. order 순서가 원문 순서입니다.
- tier: GREEN은 내용을 유지, YELLOW는 의도는 살리되 표현을 다듬기, RED는 삭제된 구간(text가 null)입니다.
- dedupeKey가 같은 구간은 같은 내용이므로 한 번만 표현합니다.";

const PLACEHOLDER_BLOCK: &str = "\
[자리표시자 규칙]
- {{TYPE_N}} 형태의 자리표시자는 날짜, 금액, 연락처 등 바꾸면 안 되는 값입니다.
- 자리표시자는 글자 하나 바꾸지 말고 그대로 출력에 포함하세요. 풀어 쓰거나 추측해서 채우지 마세요.
- mustInclude에 나열된 자리표시자는 반드시 출력에 등장해야 합니다.";

const TIER_BLOCK: &str = "\
[구간별 처리]
- GREEN: 사실과 의도를 그대로 유지하고 어투만 관계에 맞게 조정합니다.
- YELLOW: 감정, 변명, 비난은 걷어내고 전달해야 할 사실과 요청만 정중하게 다시 씁니다.
- RED: 삭제된 내용입니다. 내용을 추측하거나 암시하지 말고, 삭제했다는 사실도 언급하지 마세요.";

/// One entry of the JSON segment payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptSegment {
    pub order: usize,
    pub id: String,
    pub tier: Tier,
    pub label: Label,
    pub text: Option<String>,
    pub dedupe_key: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub must_include: Vec<String>,
}

/// Everything the assembler reads.
#[derive(Debug, Clone, Copy)]
pub struct PromptInput<'a> {
    pub persona: Persona,
    pub segments: &'a [ProcessedSegment],
    pub template: &'a SelectedTemplate,
    pub situation: Option<&'a SituationAnalysis>,
    pub knowledge: &'a [String],
    pub sender_info: Option<&'a str>,
    pub user_prompt: Option<&'a str>,
    /// Defects from a failed first attempt; non-empty only on retry.
    pub retry_hints: &'a [String],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltPrompt {
    pub system: String,
    pub user: String,
}

/// Placeholder-aware normalized form: placeholders verbatim, everything
/// else lowercased with whitespace and punctuation removed.
pub fn dedupe_key(text: &str) -> String {
    let mut key = String::new();
    let mut cursor = 0;
    for m in PLACEHOLDER.find_iter(text) {
        key.push_str(&strip_for_matching(&text[cursor..m.start()]));
        key.push_str(m.as_str());
        cursor = m.end();
    }
    key.push_str(&strip_for_matching(&text[cursor..]));
    key
}

/// Order segments by position and build the JSON payload entries.
pub fn prompt_segments(segments: &[ProcessedSegment]) -> Vec<PromptSegment> {
    let mut sorted: Vec<&ProcessedSegment> = segments.iter().collect();
    sorted.sort_by_key(|s| s.start);
    sorted
        .into_iter()
        .enumerate()
        .map(|(i, s)| PromptSegment {
            order: i + 1,
            id: s.id.clone(),
            tier: s.tier,
            label: s.label,
            text: s.text.clone(),
            dedupe_key: s.text.as_deref().map(dedupe_key),
            must_include: match (&s.text, s.tier) {
                (Some(text), Tier::Yellow) => placeholders_in(text),
                _ => Vec::new(),
            },
        })
        .collect()
}

fn forbidden_block() -> String {
    let mut block = String::from("[금지 사항]\n- 이모지를 사용하지 마세요.\n");
    block.push_str(&format!(
        "- 다음과 같은 메타 표현을 쓰지 마세요: {}\n",
        META_PHRASES.join(", ")
    ));
    block.push_str(&format!(
        "- 다음 구어체 접속어를 쓰지 마세요: {}\n",
        INFORMAL_CONNECTIVES.join(", ")
    ));
    block.push_str("- 원문에 없는 숫자, 날짜, 사실을 만들어 내지 마세요.\n- 완성된 메시지 본문만 출력하세요.");
    block
}

fn section_block(template: &SelectedTemplate) -> String {
    let mut block = format!("[구성: {} {}]\n", template.template_id, template.name);
    for (i, s) in template.sections.iter().enumerate() {
        let emphasis = match s.emphasis {
            Emphasis::Normal => "",
            Emphasis::Shortened => " (짧게)",
            Emphasis::Expanded => " (충분히)",
        };
        let mandatory = if s.mandatory { " [필수]" } else { "" };
        block.push_str(&format!(
            "{}. {}{}{}: {}\n",
            i + 1,
            s.section.as_str(),
            emphasis,
            mandatory,
            s.section.guidance()
        ));
    }
    block.push_str("섹션 이름은 출력하지 말고, 이 순서의 흐름이 자연스럽게 드러나도록 작성하세요.");
    block
}

pub fn build_prompt(input: &PromptInput<'_>) -> BuiltPrompt {
    let system = [
        ROLE_BLOCK.to_string(),
        format!("받는 사람: {}", input.persona.label()),
        FORMAT_BLOCK.to_string(),
        PLACEHOLDER_BLOCK.to_string(),
        TIER_BLOCK.to_string(),
        forbidden_block(),
        section_block(input.template),
    ]
    .join("\n\n");

    let payload = prompt_segments(input.segments);
    let json = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| "[]".to_string());
    let mut user = format!("[구간 목록]\n{json}");

    if let Some(situation) = input.situation {
        if !situation.facts.is_empty() || !situation.intent.is_empty() {
            user.push_str("\n\n[참고: 상황 분석]");
            for fact in &situation.facts {
                user.push_str(&format!("\n- 사실: {fact}"));
            }
            if !situation.intent.is_empty() {
                user.push_str(&format!("\n- 의도: {}", situation.intent));
            }
        }
    }
    if let Some(sender) = input.sender_info.filter(|s| !s.trim().is_empty()) {
        user.push_str(&format!("\n\n[참고: 보내는 사람]\n{sender}"));
    }
    if let Some(extra) = input.user_prompt.filter(|s| !s.trim().is_empty()) {
        user.push_str(&format!("\n\n[참고: 추가 요청]\n{extra}"));
    }
    if !input.knowledge.is_empty() {
        user.push_str("\n\n[참고: 관련 자료]");
        for block in input.knowledge {
            user.push_str(&format!("\n---\n{block}"));
        }
    }
    if !input.retry_hints.is_empty() {
        user.push_str("\n\n[이전 결과의 문제점: 반드시 고쳐서 다시 작성하세요]");
        for hint in input.retry_hints {
            user.push_str(&format!("\n- {hint}"));
        }
    }

    BuiltPrompt { system, user }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::labeling::LabeledSegment;
    use crate::pipeline::redact::redact;
    use crate::pipeline::template::{select_template, SelectionInput};

    fn labeled(id: &str, start: usize, text: &str, label: Label) -> LabeledSegment {
        LabeledSegment {
            id: id.into(),
            text: text.into(),
            start,
            end: start + text.len(),
            label,
            tier: label.tier(),
        }
    }

    fn fixture() -> (Vec<ProcessedSegment>, SelectedTemplate) {
        let segs = vec![
            labeled("T2", 40, "{{DATE_1}}까지 꼭 보내주세요!!", Label::NegativeFeedback),
            labeled("T1", 0, "자료 보내주세요.", Label::Request),
            labeled("T3", 80, "진짜 한심하네", Label::PersonalAttack),
        ];
        let template = select_template(&SelectionInput {
            persona: Persona::Boss,
            purpose: None,
            primary_context: None,
            topic: None,
            masked_text: "",
            segments: &segs,
        });
        (redact(&segs).segments, template)
    }

    fn input<'a>(segments: &'a [ProcessedSegment], template: &'a SelectedTemplate) -> PromptInput<'a> {
        PromptInput {
            persona: Persona::Boss,
            segments,
            template,
            situation: None,
            knowledge: &[],
            sender_info: None,
            user_prompt: None,
            retry_hints: &[],
        }
    }

    #[test]
    fn dedupe_key_keeps_placeholders() {
        assert_eq!(dedupe_key("{{DATE_1}}까지 꼭  보내주세요!!"), "{{DATE_1}}까지꼭보내주세요");
        assert_eq!(dedupe_key("Hello, World"), "helloworld");
    }

    #[test]
    fn segments_are_ordered_and_red_text_is_null() {
        let (segments, _) = fixture();
        let payload = prompt_segments(&segments);
        let ids: Vec<&str> = payload.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["T1", "T2", "T3"]);
        assert_eq!(payload[0].order, 1);
        assert_eq!(payload[1].must_include, vec!["{{DATE_1}}"]);
        assert!(payload[0].must_include.is_empty());
        assert!(payload[2].text.is_none() && payload[2].dedupe_key.is_none());
    }

    #[test]
    fn advisory_blocks_never_change_the_system_prompt() {
        let (segments, template) = fixture();
        let plain = build_prompt(&input(&segments, &template));

        let situation = SituationAnalysis {
            facts: vec!["{{DATE_1}} 마감".into()],
            intent: "자료 요청".into(),
            purpose: None,
        };
        let knowledge = vec!["사내 보고 양식".to_string()];
        let hints = vec!["이모지를 제거하세요".to_string()];
        let mut rich = input(&segments, &template);
        rich.situation = Some(&situation);
        rich.knowledge = &knowledge;
        rich.sender_info = Some("영업팀 사원");
        rich.retry_hints = &hints;
        let rich = build_prompt(&rich);

        assert_eq!(plain.system, rich.system);
        assert!(rich.user.starts_with(&plain.user));
        assert!(rich.user.contains("자료 요청"));
        assert!(rich.user.contains("사내 보고 양식"));
        assert!(rich.user.contains("이모지를 제거하세요"));
    }

    #[test]
    fn system_prompt_lists_effective_sections() {
        let (segments, template) = fixture();
        let prompt = build_prompt(&input(&segments, &template));
        assert!(prompt.system.contains("INTERNAL_VERIFICATION [필수]"));
        assert!(prompt.system.contains("GREETING (짧게)"));
        assert!(prompt.system.contains("직장 상사"));
        assert!(!prompt.user.contains("한심"));
    }
}
