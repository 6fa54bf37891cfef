use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use crate::pipeline::preprocess::PLACEHOLDER;

static WEAK_RANGES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\([^()\n]*\)|\[[^\[\]\n]*\]|"[^"]*"|“[^”]*”|‘[^’]*’|「[^」]*」|『[^』]*』"#)
        .unwrap()
});

/// How hard a stage is allowed to cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CutStrength {
    /// Structural stage: may cut inside parentheses and quotes.
    Structural,
    /// Every other stage.
    Regular,
}

/// Ranges of the masked text that cuts must not fall inside.
/// Computed once per segmentation run.
#[derive(Debug, Default)]
pub(crate) struct ProtectedIndex {
    absolute: Vec<Range<usize>>,
    weak: Vec<Range<usize>>,
}

impl ProtectedIndex {
    pub fn build(text: &str) -> Self {
        Self {
            absolute: PLACEHOLDER.find_iter(text).map(|m| m.range()).collect(),
            weak: WEAK_RANGES.find_iter(text).map(|m| m.range()).collect(),
        }
    }

    /// Whether a cut at byte `pos` would land strictly inside a protected range.
    pub fn blocks(&self, pos: usize, strength: CutStrength) -> bool {
        let inside = |r: &Range<usize>| r.start < pos && pos < r.end;
        if self.absolute.iter().any(inside) {
            return true;
        }
        strength == CutStrength::Regular && self.weak.iter().any(inside)
    }

    pub fn has_placeholder(&self, range: Range<usize>) -> bool {
        self.absolute
            .iter()
            .any(|r| r.start >= range.start && r.end <= range.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_interior_is_always_blocked() {
        let text = "{{DATE_1}}에 만나요";
        let index = ProtectedIndex::build(text);
        assert!(index.blocks(3, CutStrength::Structural));
        assert!(!index.blocks(0, CutStrength::Regular));
        assert!(!index.blocks("{{DATE_1}}".len(), CutStrength::Regular));
    }

    #[test]
    fn parentheses_block_only_regular_cuts() {
        let text = "회의(내일. 오후)는 취소";
        let index = ProtectedIndex::build(text);
        let inside = text.find("오후").unwrap();
        assert!(index.blocks(inside, CutStrength::Regular));
        assert!(!index.blocks(inside, CutStrength::Structural));
    }
}
