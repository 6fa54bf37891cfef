//! Model-assisted refinement of over-length segments.
//!
//! All long segments go out in one batched call. A proposed split is only
//! accepted when every part can be found, in order, inside the original
//! segment; otherwise that entry keeps its original text. Any failure
//! leaves the segment list untouched.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use super::types::Segment;
use super::locate_segments;
use crate::pipeline::llm::{LlmRequest, ModelDispatcher};
use crate::pipeline::preprocess::PLACEHOLDER;
use crate::pipeline::usage::{UsageLedger, UsagePhase};

pub const SPLIT_DELIMITER: &str = "|||";

/// Endings that leave a fragment dangling when a split lands after them.
const CONNECTIVE_ENDINGS: &[&str] = &["는데", "지만", "면서", "고", "며", "서"];

static ENTRY_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\[?(\d+)\]?[.):]?\s+(.*)$").unwrap());

const REFINER_SYSTEM: &str = "\
당신은 한국어 문장 분할기입니다. 번호가 붙은 각 문장을 의미 단위로 나눕니다.
규칙:
- 원문의 글자를 바꾸거나 추가하거나 지우지 마세요. 구분자 ||| 만 삽입합니다.
- 진짜 의미 경계에서만 나눕니다. 나눌 곳이 없으면 원문을 그대로 돌려줍니다.
- '~고', '~며', '~는데', '~지만', '~면서', '~서' 처럼 연결어미로 끝나는 조각이 남도록 나누지 마세요.
- {{TYPE_N}} 형태의 자리표시자는 절대 쪼개거나 바꾸지 마세요.
- 출력 형식: 입력과 같은 번호로 한 줄에 하나씩. 예: [1] 앞부분 ||| 뒷부분
- 설명이나 다른 말은 쓰지 마세요.";

#[derive(Debug, Clone)]
pub struct RefineOutcome {
    pub segments: Vec<Segment>,
    /// A refinement call was made and succeeded.
    pub fired: bool,
    /// Number of entries whose split was accepted.
    pub accepted_splits: usize,
}

impl RefineOutcome {
    fn unchanged(segments: Vec<Segment>) -> Self {
        Self {
            segments,
            fired: false,
            accepted_splits: 0,
        }
    }
}

/// Settings for one refinement run.
pub struct RefineParams<'a> {
    pub model: &'a str,
    pub threshold_chars: usize,
    pub max_tokens: u32,
}

/// Refine every segment longer than `params.threshold_chars`.
pub async fn refine_segments(
    dispatcher: &ModelDispatcher,
    ledger: &UsageLedger,
    params: &RefineParams<'_>,
    masked: &str,
    segments: Vec<Segment>,
) -> RefineOutcome {
    let long: Vec<usize> = segments
        .iter()
        .enumerate()
        .filter(|(_, s)| s.text.chars().count() > params.threshold_chars)
        .map(|(i, _)| i)
        .collect();
    if long.is_empty() {
        return RefineOutcome::unchanged(segments);
    }

    let user = long
        .iter()
        .enumerate()
        .map(|(n, &i)| format!("[{}] {}", n + 1, segments[i].text))
        .collect::<Vec<_>>()
        .join("\n");

    let request = LlmRequest::new(params.model, REFINER_SYSTEM, user)
        .with_temperature(0.0)
        .with_max_tokens(params.max_tokens);

    let response = match dispatcher.complete(&request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(code = e.code(), "Segment refiner call failed, keeping segments");
            return RefineOutcome::unchanged(segments);
        }
    };
    ledger.record(UsagePhase::SegmentRefine, params.model, &response.usage);

    let proposals = parse_entries(&response.content);
    let mut accepted_splits = 0;
    let mut texts: Vec<String> = Vec::with_capacity(segments.len() + long.len());
    for (i, segment) in segments.iter().enumerate() {
        let entry = long.iter().position(|&l| l == i).map(|n| n + 1);
        let split = entry
            .and_then(|n| proposals.get(&n))
            .and_then(|parts| split_by_parts(&segment.text, parts));
        match split {
            Some(pieces) => {
                accepted_splits += 1;
                texts.extend(pieces);
            }
            None => texts.push(segment.text.clone()),
        }
    }

    match locate_segments(masked, &texts) {
        Some(refined) => {
            tracing::debug!(
                long = long.len(),
                accepted_splits,
                segments = refined.len(),
                "Segment refinement applied"
            );
            RefineOutcome {
                segments: refined,
                fired: true,
                accepted_splits,
            }
        }
        None => {
            tracing::warn!("Refined segments could not be relocated, keeping originals");
            RefineOutcome::unchanged(segments)
        }
    }
}

/// Parse `[n] part ||| part` lines into entry number → parts.
fn parse_entries(content: &str) -> HashMap<usize, Vec<String>> {
    content
        .lines()
        .filter_map(|line| {
            let caps = ENTRY_LINE.captures(line)?;
            let n: usize = caps[1].parse().ok()?;
            let parts = caps[2]
                .split(SPLIT_DELIMITER)
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            Some((n, parts))
        })
        .collect()
}

/// Cut `original` where each proposed part begins. `None` if the proposal
/// does not reconstruct the original or leaves a dangling fragment.
fn split_by_parts(original: &str, parts: &[String]) -> Option<Vec<String>> {
    if parts.len() < 2 {
        return None;
    }

    let mut cursor = 0;
    let mut starts = Vec::with_capacity(parts.len());
    for part in parts {
        let (start, end) = find_exact(original, part, cursor)
            .or_else(|| find_ignoring_whitespace(original, part, cursor))?;
        starts.push(start);
        cursor = end;
    }

    let placeholders: Vec<_> = PLACEHOLDER.find_iter(original).map(|m| m.range()).collect();
    let cuts = &starts[1..];
    if cuts
        .iter()
        .any(|&c| placeholders.iter().any(|r| r.start < c && c < r.end))
    {
        return None;
    }

    let mut pieces = Vec::with_capacity(parts.len());
    let mut prev = 0;
    for &cut in cuts {
        pieces.push(original[prev..cut].trim().to_string());
        prev = cut;
    }
    pieces.push(original[prev..].trim().to_string());

    let dangling = pieces[..pieces.len() - 1].iter().any(|p| {
        let p = p.trim_end_matches(|c: char| c == ',' || c.is_whitespace());
        CONNECTIVE_ENDINGS.iter().any(|e| p.ends_with(*e))
    });
    if dangling || pieces.iter().any(|p| p.is_empty()) {
        return None;
    }
    Some(pieces)
}

fn find_exact(haystack: &str, needle: &str, from: usize) -> Option<(usize, usize)> {
    haystack[from..]
        .find(needle)
        .map(|i| (from + i, from + i + needle.len()))
}

/// Locate `needle` in `haystack` after `from`, ignoring whitespace on both sides.
fn find_ignoring_whitespace(haystack: &str, needle: &str, from: usize) -> Option<(usize, usize)> {
    let wanted: Vec<char> = needle.chars().filter(|c| !c.is_whitespace()).collect();
    let first = *wanted.first()?;

    for (offset, c) in haystack[from..].char_indices() {
        if c != first {
            continue;
        }
        let start = from + offset;
        let mut matched = 0;
        for (i, h) in haystack[start..].char_indices() {
            if h.is_whitespace() {
                continue;
            }
            if h != wanted[matched] {
                break;
            }
            matched += 1;
            if matched == wanted.len() {
                return Some((start, start + i + h.len_utf8()));
            }
        }
    }
    None
}
