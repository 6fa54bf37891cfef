use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use super::types::{placeholder_for, LockedSpan, SpanType, UnmaskResult};

/// Strict placeholder shape as produced by the masker.
pub static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{[A-Z]+_\d+\}\}").unwrap());

/// Tolerant shape: internal whitespace, `-` or `_` separator, any case.
static LOOSE_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z]+)\s*[-_]\s*(\d+)\s*\}\}").unwrap());

/// Replace every span range with its placeholder in one left-to-right pass.
///
/// `spans` must be sorted by `start_pos` and non-overlapping.
pub fn mask(text: &str, spans: &[LockedSpan]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for span in spans {
        out.push_str(&text[cursor..span.start_pos]);
        out.push_str(&span.placeholder);
        cursor = span.end_pos;
    }
    out.push_str(&text[cursor..]);
    out
}

/// Restore placeholders in a model output.
///
/// A span whose placeholder never shows up is still considered present if
/// its original text appears verbatim. Only spans that fail both checks are
/// reported in `missing_spans`.
pub fn unmask(output: &str, spans: &[LockedSpan]) -> UnmaskResult {
    let by_placeholder: HashMap<&str, &LockedSpan> =
        spans.iter().map(|s| (s.placeholder.as_str(), s)).collect();

    let mut seen: HashSet<&str> = HashSet::new();
    let mut unknown = Vec::new();

    let text = LOOSE_PLACEHOLDER.replace_all(output, |caps: &regex::Captures| {
        let canonical = canonical_placeholder(&caps[1], &caps[2]);
        match by_placeholder.get(canonical.as_str()) {
            Some(span) => {
                seen.insert(span.placeholder.as_str());
                span.original_text.clone()
            }
            None => {
                unknown.push(canonical);
                caps[0].to_string()
            }
        }
    });
    let text = text.into_owned();

    let mut missing_spans = Vec::new();
    let mut verbatim_spans = Vec::new();
    for span in spans {
        if seen.contains(span.placeholder.as_str()) {
            continue;
        }
        if text.contains(&span.original_text) {
            tracing::info!(
                placeholder = %span.placeholder,
                "Locked span restored verbatim without placeholder"
            );
            verbatim_spans.push(span.placeholder.clone());
        } else {
            missing_spans.push(span.clone());
        }
    }

    UnmaskResult {
        text,
        missing_spans,
        unknown_placeholders: unknown,
        verbatim_spans,
    }
}

/// Replace placeholders with their original text, ignoring anything that
/// does not resolve. Used on segment texts, which always carry canonical
/// placeholders.
pub fn restore(text: &str, spans: &[LockedSpan]) -> String {
    if spans.is_empty() {
        return text.to_string();
    }
    PLACEHOLDER
        .replace_all(text, |caps: &regex::Captures| {
            spans
                .iter()
                .find(|s| s.placeholder == caps[0])
                .map(|s| s.original_text.clone())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Canonical placeholders contained in `text`, in order of appearance.
pub fn placeholders_in(text: &str) -> Vec<String> {
    PLACEHOLDER
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

fn canonical_placeholder(tag: &str, index: &str) -> String {
    let index: usize = index.parse().unwrap_or(0);
    match SpanType::from_tag(tag) {
        Some(span_type) => placeholder_for(span_type, index),
        None => format!("{{{{{}_{}}}}}", tag.to_ascii_uppercase(), index),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::preprocess::extract::extract_locked_spans;

    #[test]
    fn masks_korean_date() {
        let text = "2024년 2월 4일에 만나요";
        let spans = extract_locked_spans(text);
        assert_eq!(mask(text, &spans), "{{DATE_1}}에 만나요");
    }

    #[test]
    fn round_trip_through_unchanged_output() {
        let text = "010-9876-5432로 3월 5일 오후 2시에 15,000원 보내드릴게요";
        let spans = extract_locked_spans(text);
        assert!(spans.len() >= 3);
        let masked = mask(text, &spans);
        let result = unmask(&masked, &spans);
        assert_eq!(result.text, text);
        assert!(result.missing_spans.is_empty());
        assert!(result.unknown_placeholders.is_empty());
    }

    #[test]
    fn tolerates_whitespace_case_and_separator_drift() {
        let text = "2024년 2월 4일에 만나요";
        let spans = extract_locked_spans(text);
        let result = unmask("{{ date-1 }}에 뵙겠습니다", &spans);
        assert_eq!(result.text, "2024년 2월 4일에 뵙겠습니다");
        assert!(result.missing_spans.is_empty());
    }

    #[test]
    fn verbatim_value_is_not_missing() {
        let text = "2024년 2월 4일에 만나요";
        let spans = extract_locked_spans(text);
        let result = unmask("2024년 2월 4일에 뵙겠습니다", &spans);
        assert!(result.missing_spans.is_empty());
        assert_eq!(result.verbatim_spans, vec!["{{DATE_1}}".to_string()]);
    }

    #[test]
    fn dropped_value_is_missing() {
        let text = "2024년 2월 4일에 만나요";
        let spans = extract_locked_spans(text);
        let result = unmask("곧 뵙겠습니다", &spans);
        assert_eq!(result.missing_spans.len(), 1);
        assert_eq!(result.missing_spans[0].placeholder, "{{DATE_1}}");
    }

    #[test]
    fn unknown_placeholders_are_reported_and_kept() {
        let text = "2024년 2월 4일에 만나요";
        let spans = extract_locked_spans(text);
        let result = unmask("{{DATE_1}} 또는 {{DATE_7}}에 뵙겠습니다", &spans);
        assert_eq!(result.unknown_placeholders, vec!["{{DATE_7}}".to_string()]);
        assert!(result.text.contains("{{DATE_7}}"));
        assert!(result.missing_spans.is_empty());
    }

    #[test]
    fn restore_ignores_unknown_tokens() {
        let text = "3월 2일 회의";
        let spans = extract_locked_spans(text);
        assert_eq!(restore("{{DATE_1}} / {{NAME_1}}", &spans), "3월 2일 / {{NAME_1}}");
    }

    #[test]
    fn lists_placeholders_in_order() {
        assert_eq!(
            placeholders_in("{{MONEY_1}}을 {{DATE_2}}까지"),
            vec!["{{MONEY_1}}".to_string(), "{{DATE_2}}".to_string()]
        );
    }
}
