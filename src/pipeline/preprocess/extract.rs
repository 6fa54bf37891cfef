use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use super::types::{placeholder_for, LockedSpan, SpanType};

/// A compiled extraction rule.
struct SpanRule {
    regex: Regex,
    span_type: SpanType,
    /// Reject matches glued to an ASCII letter or digit on either side.
    ascii_boundary: bool,
}

fn rule(pattern: &str, span_type: SpanType) -> SpanRule {
    SpanRule {
        regex: Regex::new(pattern).expect("locked-span pattern must compile"),
        span_type,
        ascii_boundary: true,
    }
}

fn loose_rule(pattern: &str, span_type: SpanType) -> SpanRule {
    SpanRule {
        ascii_boundary: false,
        ..rule(pattern, span_type)
    }
}

/// Extraction rules in priority order. On equal start and length the
/// earlier rule wins.
static SPAN_RULES: LazyLock<Vec<SpanRule>> = LazyLock::new(|| {
    vec![
        // email
        rule(
            r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(?:\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}",
            SpanType::Email,
        ),
        // url
        rule(
            r#"(?:https?://|www\.)[^\s<>"'(){}\[\]]+[^\s<>"'(){}\[\].,!?;:]"#,
            SpanType::Url,
        ),
        // phone
        rule(
            r"(?:\+82[\s\-]?)?0\d{1,2}[\s\-.]?\d{3,4}[\s\-.]?\d{4}",
            SpanType::Phone,
        ),
        rule(r"1[5-9]\d{2}-\d{4}", SpanType::Phone),
        // account
        rule(r"\d{2,6}-\d{2,6}-\d{2,8}(?:-\d{1,6})?", SpanType::Account),
        // date
        rule(
            r"(?:\d{2,4}\s*년\s*)?\d{1,2}\s*월\s*\d{1,2}\s*일(?:\s*\([월화수목금토일]\))?",
            SpanType::Date,
        ),
        rule(r"\d{2,4}\s*년\s*\d{1,2}\s*월", SpanType::Date),
        rule(r"\d{4}[-./]\d{1,2}[-./]\d{1,2}", SpanType::Date),
        rule(r"\d{1,2}/\d{1,2}(?:/\d{2,4})?", SpanType::Date),
        // time
        rule(
            r"(?:(?:오전|오후|새벽|아침|저녁|밤)\s*)?\d{1,2}\s*시(?:\s*(?:\d{1,2}\s*분|반))?",
            SpanType::Time,
        ),
        // time HH:MM
        rule(r"\d{1,2}:\d{2}(?::\d{2})?(?:\s?[AaPp][Mm])?", SpanType::Time),
        // money
        rule(
            r"\d[\d,]*(?:\.\d+)?\s*(?:[십백천만억]+\s*(?:\d[\d,]*\s*[십백천만]*\s*)?)?(?:원|달러|엔|유로|위안)",
            SpanType::Money,
        ),
        rule(r"[$₩€£¥]\s?\d[\d,]*(?:\.\d+)?", SpanType::Money),
        rule(r"\d[\d,]*(?:\.\d+)?\s?(?:USD|KRW|EUR|JPY|CNY)", SpanType::Money),
        // unit-number
        rule(
            r"\d+(?:\.\d+)?\s*(?:%|퍼센트|kg|mg|km|cm|mm|ml|GB|MB|KB|TB|g|m|L|개월|개|명|건|회|번|시간|분|초|일|주|년|장|권|대|박스|세트|층|호|차|부|페이지)",
            SpanType::Unit,
        ),
        // large-number
        rule(r"\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d{5,}", SpanType::Number),
        // uuid
        rule(
            r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
            SpanType::Uuid,
        ),
        // file path
        rule(r"(?:~|\.{1,2})?/(?:[A-Za-z0-9_.\-]+/)+[A-Za-z0-9_.\-]*", SpanType::Path),
        rule(r"[A-Za-z]:\\(?:[^\s\\]+\\)*[^\s\\]*", SpanType::Path),
        // issue ticket
        rule(r"[A-Z][A-Z0-9]{1,9}-\d+", SpanType::Issue),
        loose_rule(r"#\d{1,7}", SpanType::Issue),
        // version
        rule(r"[vV]\d+(?:\.\d+){1,3}|\d+\.\d+\.\d+(?:\.\d+)?", SpanType::Version),
        // quoted text
        loose_rule(r#""[^"\n]{1,80}"|“[^”\n]{1,80}”|'[^'\n]{2,80}'|‘[^’\n]{2,80}’|「[^」\n]{1,80}」|『[^』\n]{1,80}』"#, SpanType::Quote),
        // identifier
        rule(r"[A-Za-z]+[_\-]?\d+[A-Za-z0-9_\-]*", SpanType::Id),
        // hash
        rule(r"[0-9a-fA-F]{7,64}", SpanType::Hash),
    ]
});

#[derive(Debug, Clone, Copy)]
struct Candidate {
    start: usize,
    end: usize,
    span_type: SpanType,
}

/// Find every substring of `text` that must survive verbatim.
///
/// Output is sorted by `start_pos` and pairwise non-overlapping.
pub fn extract_locked_spans(text: &str) -> Vec<LockedSpan> {
    if text.is_empty() {
        return Vec::new();
    }

    let mut candidates = Vec::new();
    for rule in SPAN_RULES.iter() {
        for m in rule.regex.find_iter(text) {
            if m.is_empty() {
                continue;
            }
            if rule.ascii_boundary && !at_ascii_boundary(text, m.start(), m.end()) {
                continue;
            }
            if !accept(rule.span_type, m.as_str()) {
                continue;
            }
            candidates.push(Candidate {
                start: m.start(),
                end: m.end(),
                span_type: rule.span_type,
            });
        }
    }

    assign_placeholders(resolve_overlaps(candidates), text)
}

/// Combine two independently produced span lists.
///
/// Every `primary` span is kept. A `secondary` span is kept only when it
/// overlaps nothing already kept. Indices and placeholders are re-derived
/// from the merged, start-sorted order.
pub fn merge_spans(primary: &[LockedSpan], secondary: &[LockedSpan]) -> Vec<LockedSpan> {
    let mut kept: Vec<&LockedSpan> = primary.iter().collect();
    for span in secondary {
        if kept.iter().all(|k| !k.overlaps(span.start_pos, span.end_pos)) {
            kept.push(span);
        }
    }
    kept.sort_by_key(|s| (s.start_pos, Reverse(s.len())));
    renumber(kept.into_iter().cloned().collect())
}

/// Re-derive per-type indices and placeholders in start order.
pub fn renumber(mut spans: Vec<LockedSpan>) -> Vec<LockedSpan> {
    spans.sort_by_key(|s| s.start_pos);
    let mut counters: HashMap<SpanType, usize> = HashMap::new();
    for span in &mut spans {
        let counter = counters.entry(span.span_type).or_insert(0);
        *counter += 1;
        span.index = *counter;
        span.placeholder = placeholder_for(span.span_type, *counter);
    }
    spans
}

/// Sort by start ascending then length descending and keep the first
/// match of every overlapping cluster.
fn resolve_overlaps(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    // Stable sort keeps rule priority among identical ranges.
    candidates.sort_by_key(|c| (c.start, Reverse(c.end - c.start)));

    let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let overlaps = kept
            .iter()
            .any(|k| candidate.start < k.end && k.start < candidate.end);
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

fn assign_placeholders(candidates: Vec<Candidate>, text: &str) -> Vec<LockedSpan> {
    let spans = candidates
        .into_iter()
        .map(|c| LockedSpan {
            index: 0,
            original_text: text[c.start..c.end].to_string(),
            placeholder: String::new(),
            span_type: c.span_type,
            start_pos: c.start,
            end_pos: c.end,
        })
        .collect();
    renumber(spans)
}

fn at_ascii_boundary(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    let glued = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    !glued(before) && !glued(after)
}

/// Per-type sanity checks the patterns cannot express.
fn accept(span_type: SpanType, matched: &str) -> bool {
    match span_type {
        SpanType::Hash => {
            matched.chars().any(|c| c.is_ascii_digit())
                && matched.chars().any(|c| c.is_ascii_alphabetic())
        }
        SpanType::Id => matched.chars().count() >= 4,
        SpanType::Date => {
            // "3/4" style dates need a plausible month
            if let Some((month, _)) = matched.split_once('/') {
                month.parse::<u32>().is_ok_and(|m| (1..=12).contains(&m))
            } else {
                true
            }
        }
        _ => true,
    }
}
