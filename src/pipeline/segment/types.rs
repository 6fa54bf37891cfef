use serde::{Deserialize, Serialize};

/// A minimal semantic unit of the masked text.
///
/// `start`/`end` are byte offsets into the masked text; `text` is the
/// trimmed slice `masked[start..end]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Thresholds for the segmentation cascade. Lengths are in characters.
#[derive(Debug, Clone, Serialize)]
pub struct SegmenterConfig {
    /// Units longer than this are split by the length stage.
    pub max_unit_chars: usize,
    /// Minimum unit length before enumeration detection is attempted.
    pub enum_min_chars: usize,
    /// Every enumeration part must be at least this long.
    pub enum_min_part_chars: usize,
    /// Minimum unit length before discourse-marker splitting is attempted.
    pub discourse_min_chars: usize,
    /// Characters that must follow a discourse marker for it to split.
    pub discourse_min_trailing_chars: usize,
    /// Units shorter than this count as fragments for the merge stage.
    pub merge_min_chars: usize,
    /// Bound on length-split passes.
    pub max_split_passes: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            max_unit_chars: 250,
            enum_min_chars: 40,
            enum_min_part_chars: 5,
            discourse_min_chars: 80,
            discourse_min_trailing_chars: 5,
            merge_min_chars: 6,
            max_split_passes: 8,
        }
    }
}

/// Working unit: a byte range of the masked text plus the lowest confidence
/// of any stage that cut it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Unit {
    pub start: usize,
    pub end: usize,
    pub confidence: f32,
}

impl Unit {
    pub fn whole(len: usize) -> Self {
        Self {
            start: 0,
            end: len,
            confidence: 1.0,
        }
    }

    pub fn slice<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.end]
    }

    pub fn char_len(&self, text: &str) -> usize {
        self.slice(text).trim().chars().count()
    }
}
