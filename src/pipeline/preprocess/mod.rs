//! Normalization, locked-span extraction and placeholder masking.

pub mod extract;
pub mod mask;
pub mod normalize;
pub mod remask;
pub mod types;

pub use extract::{extract_locked_spans, merge_spans, renumber};
pub use mask::{mask, placeholders_in, restore, unmask, PLACEHOLDER};
pub use normalize::normalize;
pub use remask::{remask_with_names, Remasked};
pub use types::*;

/// Output of the synchronous preprocessing stage.
#[derive(Debug, Clone)]
pub struct Preprocessed {
    pub normalized: String,
    pub spans: Vec<LockedSpan>,
    pub masked: String,
}

/// normalize → extract → mask.
pub fn preprocess(raw: &str) -> Preprocessed {
    let normalized = normalize(raw);
    let spans = extract_locked_spans(&normalized);
    let masked = mask(&normalized, &spans);
    tracing::debug!(
        chars = normalized.chars().count(),
        spans = spans.len(),
        "Preprocessing complete"
    );
    Preprocessed {
        normalized,
        spans,
        masked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_scenario_masks_to_placeholder() {
        let out = preprocess("2024년 2월 4일에 만나요");
        assert_eq!(out.spans.len(), 1);
        assert_eq!(out.spans[0].span_type, SpanType::Date);
        assert_eq!(out.spans[0].original_text, "2024년 2월 4일");
        assert_eq!(out.masked, "{{DATE_1}}에 만나요");
    }

    #[test]
    fn unchanged_masked_text_round_trips() {
        let raw = "  010-1234-5678로 연락주시고\r\n\r\n\r\n50,000원 입금은 https://pay.example.com 에서  ";
        let out = preprocess(raw);
        let restored = unmask(&out.masked, &out.spans);
        assert!(restored.missing_spans.is_empty());
        assert_eq!(restored.text, out.normalized);
    }
}
