//! Meaning segmentation: a seven-stage rule cascade over the masked text,
//! plus an optional model-assisted refiner for over-length segments.

pub mod protect;
pub mod refine;
pub mod stages;
pub mod types;

pub use refine::*;
pub use types::*;

use protect::ProtectedIndex;
use stages::STAGES;

/// Split masked text into segments with sequential ids `T1..Tn`.
///
/// Segments are trimmed, sorted, non-overlapping, and never cut through
/// a placeholder.
pub fn segment_text(masked: &str, config: &SegmenterConfig) -> Vec<Segment> {
    if masked.trim().is_empty() {
        return Vec::new();
    }

    let protected = ProtectedIndex::build(masked);
    let mut units = vec![Unit::whole(masked.len())];
    for (name, stage) in STAGES {
        let before = units.len();
        units = stage(masked, units, &protected, config);
        tracing::trace!(stage = name, before, after = units.len(), "Segmentation stage");
    }

    let min_confidence = units.iter().map(|u| u.confidence).fold(1.0, f32::min);
    tracing::debug!(
        segments = units.len(),
        min_confidence,
        "Segmentation complete"
    );

    let segments = units
        .into_iter()
        .filter_map(|unit| trim_range(masked, unit.start, unit.end))
        .enumerate()
        .map(|(i, (start, end))| Segment {
            id: format!("T{}", i + 1),
            text: masked[start..end].to_string(),
            start,
            end,
        })
        .collect();
    segments
}

/// Map segment texts back onto the masked text by sequential forward
/// search and assign fresh ids.
///
/// Duplicate substrings resolve to their next unconsumed occurrence.
/// Returns `None` if any text cannot be found after the cursor.
pub fn locate_segments(masked: &str, texts: &[String]) -> Option<Vec<Segment>> {
    let mut cursor = 0;
    let mut segments = Vec::with_capacity(texts.len());
    for text in texts {
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        let start = cursor + masked[cursor..].find(text)?;
        let end = start + text.len();
        cursor = end;
        segments.push(Segment {
            id: format!("T{}", segments.len() + 1),
            text: text.to_string(),
            start,
            end,
        });
    }
    Some(segments)
}

fn trim_range(text: &str, start: usize, end: usize) -> Option<(usize, usize)> {
    let slice = &text[start..end];
    let trimmed_start = start + (slice.len() - slice.trim_start().len());
    let trimmed_end = end - (slice.len() - slice.trim_end().len());
    (trimmed_start < trimmed_end).then_some((trimmed_start, trimmed_end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(segments: &[Segment]) -> Vec<&str> {
        segments.iter().map(|s| s.text.as_str()).collect()
    }

    #[test]
    fn short_request_stays_whole() {
        let segments = segment_text("내일까지 보내주세요", &SegmenterConfig::default());
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].id, "T1");
        assert_eq!(segments[0].text, "내일까지 보내주세요");
    }

    #[test]
    fn splits_sentences_and_assigns_ids() {
        let segments = segment_text(
            "안녕하세요. 회의 자료 보내드립니다. 확인 부탁드려요",
            &SegmenterConfig::default(),
        );
        assert_eq!(
            texts(&segments),
            vec!["안녕하세요.", "회의 자료 보내드립니다.", "확인 부탁드려요"]
        );
        let ids: Vec<_> = segments.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["T1", "T2", "T3"]);
    }

    #[test]
    fn placeholders_survive_intact() {
        let masked = "{{DATE_1}}에 만나요. {{MONEY_1}} 입금했습니다";
        let segments = segment_text(masked, &SegmenterConfig::default());
        assert_eq!(texts(&segments), vec!["{{DATE_1}}에 만나요.", "{{MONEY_1}} 입금했습니다"]);
    }

    #[test]
    fn merges_runs_of_fragments() {
        let segments = segment_text(
            "네. 네. 네. 알겠습니다 그럼 내일 뵙겠습니다",
            &SegmenterConfig::default(),
        );
        assert_eq!(
            texts(&segments),
            vec!["네. 네. 네. 알겠습니다", "그럼 내일 뵙겠습니다"]
        );
    }

    #[test]
    fn placeholder_units_break_merge_runs() {
        let segments = segment_text("네. 네. {{NAME_1}}. 네. 네.", &SegmenterConfig::default());
        assert_eq!(segments.len(), 5);
    }

    #[test]
    fn segments_are_sorted_disjoint_and_exact() {
        let masked = "공지드립니다\n\n- {{DATE_1}} 회의는 취소됐어요\n- 대신 {{TIME_1}}에 통화해요\n\n\
                      그런데 자료는 아직 못 받았는데 언제쯤 주실 수 있을까요? 확인 부탁드립니다";
        let segments = segment_text(masked, &SegmenterConfig::default());
        assert!(segments.len() >= 4);
        for pair in segments.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
        for seg in &segments {
            assert_eq!(&masked[seg.start..seg.end], seg.text);
        }
        let rebuilt: String = segments.iter().map(|s| s.text.as_str()).collect();
        let squashed: String = masked.chars().filter(|c| !c.is_whitespace()).collect();
        assert_eq!(
            rebuilt.chars().filter(|c| !c.is_whitespace()).collect::<String>(),
            squashed
        );
    }

    #[test]
    fn empty_input_has_no_segments() {
        assert!(segment_text("  \n ", &SegmenterConfig::default()).is_empty());
    }

    #[test]
    fn locate_resolves_duplicates_forward() {
        let masked = "네 알겠어요 네 알겠어요";
        let segments =
            locate_segments(masked, &["네 알겠어요".to_string(), "네 알겠어요".to_string()])
                .unwrap();
        assert_eq!(segments[0].start, 0);
        assert_eq!(segments[1].start, masked.rfind("네").unwrap());
        assert_eq!(segments[1].id, "T2");
    }

    #[test]
    fn locate_fails_on_foreign_text() {
        assert!(locate_segments("가나다", &["라마".to_string()]).is_none());
    }
}
