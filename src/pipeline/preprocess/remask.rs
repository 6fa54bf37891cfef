//! Late re-masking when extra name spans arrive after segmentation.

use super::extract::merge_spans;
use super::mask::mask;
use super::types::{LockedSpan, SpanType};
use crate::pipeline::segment::{locate_segments, Segment};

/// Span list, masked text and segments re-derived after merging names.
#[derive(Debug, Clone, PartialEq)]
pub struct Remasked {
    pub spans: Vec<LockedSpan>,
    pub masked_text: String,
    pub segments: Vec<Segment>,
}

/// Merge `names` into the span list as NAME spans and re-mask both the
/// text and every segment, keeping segment ids.
///
/// Name occurrences that overlap an existing span or straddle a segment
/// boundary are ignored. Returns `None` when nothing new was masked or
/// the segments could not be relocated.
pub fn remask_with_names(
    normalized: &str,
    spans: &[LockedSpan],
    segments: &[Segment],
    names: &[String],
) -> Option<Remasked> {
    let ranges: Vec<(usize, usize)> = segments
        .iter()
        .map(|s| (to_normalized(s.start, spans), to_normalized(s.end, spans)))
        .collect();

    let mut found: Vec<LockedSpan> = Vec::new();
    for name in names {
        let name = name.trim();
        if name.chars().count() < 2 {
            continue;
        }
        for (start, matched) in normalized.match_indices(name) {
            let end = start + matched.len();
            let clashes = spans.iter().chain(found.iter()).any(|s| s.overlaps(start, end));
            let inside_segment = ranges.iter().any(|&(s, e)| s <= start && end <= e);
            if clashes || !inside_segment {
                continue;
            }
            found.push(LockedSpan {
                index: 0,
                original_text: matched.to_string(),
                placeholder: String::new(),
                span_type: SpanType::Name,
                start_pos: start,
                end_pos: end,
            });
        }
    }
    if found.is_empty() {
        return None;
    }

    let merged = merge_spans(spans, &found);
    let masked_text = mask(normalized, &merged);

    let texts: Vec<String> = ranges
        .iter()
        .map(|&(start, end)| {
            let local: Vec<LockedSpan> = merged
                .iter()
                .filter(|s| start <= s.start_pos && s.end_pos <= end)
                .map(|s| LockedSpan {
                    start_pos: s.start_pos - start,
                    end_pos: s.end_pos - start,
                    ..s.clone()
                })
                .collect();
            mask(&normalized[start..end], &local)
        })
        .collect();

    let Some(located) = locate_segments(&masked_text, &texts) else {
        tracing::warn!("Re-masked segments could not be relocated, keeping original masking");
        return None;
    };
    if located.len() != segments.len() {
        return None;
    }
    let segments = located
        .into_iter()
        .zip(segments)
        .map(|(new, old)| Segment {
            id: old.id.clone(),
            ..new
        })
        .collect();

    tracing::debug!(added = found.len(), total = merged.len(), "Identity names re-masked");
    Some(Remasked {
        spans: merged,
        masked_text,
        segments,
    })
}

/// Map a byte offset in the masked text to the normalized text.
/// `spans` must be sorted; offsets inside a placeholder map to the span end.
fn to_normalized(pos: usize, spans: &[LockedSpan]) -> usize {
    // Bytes the masked text is ahead of the normalized text.
    let mut shift: isize = 0;
    for span in spans {
        let masked_start = span.start_pos as isize + shift;
        let masked_end = masked_start + span.placeholder.len() as isize;
        let p = pos as isize;
        if p <= masked_start {
            return (p - shift) as usize;
        }
        if p < masked_end {
            return span.end_pos;
        }
        shift += span.placeholder.len() as isize - span.len() as isize;
    }
    (pos as isize - shift) as usize
}
