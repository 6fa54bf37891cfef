//! The seven segmentation stages. Each is a pure function
//! `(text, units, protected, config) -> units` over byte ranges of the
//! masked text.

use std::sync::LazyLock;

use regex::Regex;

use super::protect::{CutStrength, ProtectedIndex};
use super::types::{SegmenterConfig, Unit};

pub(crate) type Stage = fn(&str, Vec<Unit>, &ProtectedIndex, &SegmenterConfig) -> Vec<Unit>;

/// Fixed stage order.
pub(crate) const STAGES: [(&str, Stage); 7] = [
    ("structural", structural_boundaries),
    ("sentence_ending", sentence_endings),
    ("punctuation", weak_punctuation),
    ("length", length_split),
    ("enumeration", enumeration_split),
    ("discourse", discourse_split),
    ("merge", merge_fragments),
];

// ═══════════════════════════════════════════════════════════
// Pattern tables
// ═══════════════════════════════════════════════════════════

static SEPARATOR_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-=_*~#]{3,}|[─━═]{3,})\s*$").unwrap());

static LIST_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*•·▪◦‣]|\d{1,2}[.)]|[①-⑳]|[가나다라마바사아자차카타파하][.)])\s+").unwrap()
});

/// Trailing punctuation / laughter allowed between an ending and the break.
const ENDING_TAIL: &str = r"[.!?~…ㅋㅎㅠㅜ^]*(?:\s+|$)";

struct EndingFamily {
    regex: Regex,
    ambiguous: bool,
}

fn family(endings: &str, ambiguous: bool) -> EndingFamily {
    EndingFamily {
        regex: Regex::new(&format!("(?:{endings}){ENDING_TAIL}")).unwrap(),
        ambiguous,
    }
}

static ENDING_FAMILIES: LazyLock<Vec<EndingFamily>> = LazyLock::new(|| {
    vec![
        // formal
        family("습니다|습니까|입니다|입니까|십시오|니다", false),
        // polite
        family("[가-힣]요", false),
        // casual
        family(
            "잖아|거야|했어|할게|줄게|볼게|구나|더라|는군|겠어|었어|았어|였어|했지|이야|거지|냐",
            false,
        ),
        // narrative
        family(
            "었다|았다|였다|했다|한다|된다|이다|는다|겠다|있다|없다|같다|었음|았음|였음|했음|있음|없음",
            false,
        ),
        // endings that double as mid-sentence connectives
        family("는데|거든|지|어|아|해|네|고", true),
    ]
});

/// Nouns that end in 요 and must not be read as a polite ending.
const NOUNS_ENDING_IN_YO: &[&str] = &["필요", "중요", "수요", "주요", "소요", "불요"];

static WEAK_PUNCTUATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:[.!?。？！]+["'”’)]?|…+|;|[—–])(?:\s+|$)"#).unwrap()
});

static ENUM_COMMA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[,、，]\s*").unwrap());
static ENUM_SLASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*/\s*|\s*[·ㆍ•]\s*").unwrap());
static ENUM_PARALLEL_GO: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[가-힣]고\s+").unwrap());

/// Sentence-initial connectives that signal a new clause. Longest first.
const DISCOURSE_MARKERS: &[&str] = &[
    "그러니까", "그렇지만", "그러므로", "그런데", "그래서", "그리고", "하지만", "그러나",
    "그래도", "게다가", "그러면", "아무튼", "어쨌든", "따라서", "그니까", "근데", "또한",
    "그럼", "암튼", "결국", "반면", "한편",
];

/// Compound words whose head looks like a discourse marker.
const DISCOURSE_EXCLUSIONS: &[&str] = &["그러면서", "그래서인지", "그런데도", "그럼에도", "그리고는"];

const POSTPOSITIONS: &[&str] = &[
    "으로", "에서", "에게", "한테", "까지", "부터", "은", "는", "이", "가", "을", "를", "에",
    "의", "와", "과", "도", "로", "만", "께",
];

/// Discourse marker at the start of `s`, unless `s` starts with a known compound.
pub(crate) fn leading_discourse_marker(s: &str) -> Option<&'static str> {
    let s = s.trim_start();
    if DISCOURSE_EXCLUSIONS.iter().any(|e| s.starts_with(*e)) {
        return None;
    }
    DISCOURSE_MARKERS.iter().copied().find(|m| s.starts_with(*m))
}

// ═══════════════════════════════════════════════════════════
// Shared helpers
// ═══════════════════════════════════════════════════════════

/// Cut `unit` at absolute byte positions. Whitespace-only pieces are dropped.
fn cut_unit(text: &str, unit: Unit, mut cuts: Vec<usize>, confidence: f32) -> Vec<Unit> {
    cuts.retain(|&c| c > unit.start && c < unit.end);
    cuts.sort_unstable();
    cuts.dedup();
    if cuts.is_empty() {
        return vec![unit];
    }

    let confidence = unit.confidence.min(confidence);
    let mut pieces = Vec::with_capacity(cuts.len() + 1);
    let mut start = unit.start;
    for cut in cuts.into_iter().chain(std::iter::once(unit.end)) {
        pieces.push(Unit {
            start,
            end: cut,
            confidence,
        });
        start = cut;
    }
    pieces.retain(|p| !text[p.start..p.end].trim().is_empty());
    pieces
}

fn ends_with_postposition(before: &str) -> bool {
    let word = before
        .trim_end_matches(|c: char| c.is_whitespace() || c == ',')
        .rsplit(char::is_whitespace)
        .next()
        .unwrap_or("");
    word.chars().count() >= 2 && POSTPOSITIONS.iter().any(|p| word.ends_with(*p))
}

// ═══════════════════════════════════════════════════════════
// Stage 1: structural boundaries (1.0)
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Blank,
    Separator,
    ListItem,
    Text,
}

fn classify_line(line: &str) -> LineKind {
    if line.trim().is_empty() {
        LineKind::Blank
    } else if SEPARATOR_LINE.is_match(line) {
        LineKind::Separator
    } else if LIST_MARKER.is_match(line) {
        LineKind::ListItem
    } else {
        LineKind::Text
    }
}

pub(crate) fn structural_boundaries(
    text: &str,
    units: Vec<Unit>,
    protected: &ProtectedIndex,
    _config: &SegmenterConfig,
) -> Vec<Unit> {
    units
        .into_iter()
        .flat_map(|unit| {
            let mut cuts = Vec::new();
            let mut previous: Option<LineKind> = None;
            let mut offset = unit.start;
            for line in unit.slice(text).split_inclusive('\n') {
                let kind = classify_line(line.trim_end_matches('\n'));
                if let Some(prev) = previous {
                    let boundary = kind != LineKind::Text
                        || matches!(prev, LineKind::Blank | LineKind::Separator);
                    if boundary && !protected.blocks(offset, CutStrength::Structural) {
                        cuts.push(offset);
                    }
                }
                previous = Some(kind);
                offset += line.len();
            }
            cut_unit(text, unit, cuts, 1.0)
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════
// Stage 2: Korean sentence-ending morphology (0.95)
// ═══════════════════════════════════════════════════════════

pub(crate) fn sentence_endings(
    text: &str,
    units: Vec<Unit>,
    protected: &ProtectedIndex,
    config: &SegmenterConfig,
) -> Vec<Unit> {
    units
        .into_iter()
        .flat_map(|unit| {
            let slice = unit.slice(text);
            let mut cuts = Vec::new();
            for family in ENDING_FAMILIES.iter() {
                for m in family.regex.find_iter(slice) {
                    let cut = unit.start + m.end();
                    if protected.blocks(cut, CutStrength::Regular) {
                        continue;
                    }
                    if !family.ambiguous {
                        if NOUNS_ENDING_IN_YO.iter().any(|n| m.as_str().starts_with(*n)) {
                            continue;
                        }
                        cuts.push(cut);
                        continue;
                    }
                    let remainder = &slice[m.end()..];
                    let terminal = remainder.trim().is_empty();
                    let new_sentence = leading_discourse_marker(remainder).is_some();
                    let overlong = slice[..m.start()].chars().count() > config.max_unit_chars;
                    if terminal || new_sentence || overlong {
                        cuts.push(cut);
                    }
                }
            }
            cut_unit(text, unit, cuts, 0.95)
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════
// Stage 3: weak punctuation (0.9)
// ═══════════════════════════════════════════════════════════

pub(crate) fn weak_punctuation(
    text: &str,
    units: Vec<Unit>,
    protected: &ProtectedIndex,
    _config: &SegmenterConfig,
) -> Vec<Unit> {
    units
        .into_iter()
        .flat_map(|unit| {
            let slice = unit.slice(text);
            let cuts = WEAK_PUNCTUATION
                .find_iter(slice)
                .filter(|m| {
                    // "1. 항목" is a list ordinal, not a sentence end
                    let ordinal = m.as_str().starts_with(". ")
                        && slice[..m.start()]
                            .chars()
                            .next_back()
                            .is_some_and(|c| c.is_ascii_digit());
                    !ordinal
                })
                .map(|m| unit.start + m.end())
                .filter(|&cut| !protected.blocks(cut, CutStrength::Regular))
                .collect();
            cut_unit(text, unit, cuts, 0.9)
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════
// Stage 4: length-based safety split (0.85)
// ═══════════════════════════════════════════════════════════

pub(crate) fn length_split(
    text: &str,
    mut units: Vec<Unit>,
    protected: &ProtectedIndex,
    config: &SegmenterConfig,
) -> Vec<Unit> {
    for _ in 0..config.max_split_passes {
        let mut changed = false;
        let mut next = Vec::with_capacity(units.len());
        for unit in units {
            if unit.char_len(text) <= config.max_unit_chars {
                next.push(unit);
                continue;
            }
            match midpoint_cut(text, unit, protected) {
                Some(cut) => {
                    changed = true;
                    next.extend(cut_unit(text, unit, vec![cut], 0.85));
                }
                None => next.push(unit),
            }
        }
        units = next;
        if !changed {
            break;
        }
    }
    units
}

fn midpoint_cut(text: &str, unit: Unit, protected: &ProtectedIndex) -> Option<usize> {
    let slice = unit.slice(text);
    let mid = unit.start + slice.len() / 2;
    let candidates: Vec<usize> = slice
        .char_indices()
        .filter(|(_, c)| c.is_whitespace() || *c == ',')
        .map(|(i, c)| unit.start + i + c.len_utf8())
        .filter(|&cut| cut < unit.end && !protected.blocks(cut, CutStrength::Regular))
        .collect();

    let nearest = |allowed: &dyn Fn(usize) -> bool| {
        candidates
            .iter()
            .copied()
            .filter(|&c| allowed(c))
            .min_by_key(|&c| c.abs_diff(mid))
    };

    nearest(&|cut| !ends_with_postposition(&text[unit.start..cut])).or_else(|| nearest(&|_| true))
}

// ═══════════════════════════════════════════════════════════
// Stage 5: enumeration detection (0.9)
// ═══════════════════════════════════════════════════════════

pub(crate) fn enumeration_split(
    text: &str,
    units: Vec<Unit>,
    protected: &ProtectedIndex,
    config: &SegmenterConfig,
) -> Vec<Unit> {
    let families: [&Regex; 3] = [&ENUM_COMMA, &ENUM_SLASH, &ENUM_PARALLEL_GO];
    units
        .into_iter()
        .flat_map(|unit| {
            if unit.char_len(text) < config.enum_min_chars {
                return vec![unit];
            }
            let slice = unit.slice(text);
            for delimiter in families {
                let cuts: Vec<usize> = delimiter
                    .find_iter(slice)
                    .map(|m| unit.start + m.end())
                    .filter(|&cut| !protected.blocks(cut, CutStrength::Regular))
                    .collect();
                let parts = cut_unit(text, unit, cuts, 0.9);
                if parts.len() >= 3
                    && parts
                        .iter()
                        .all(|p| p.char_len(text) >= config.enum_min_part_chars)
                {
                    return parts;
                }
            }
            vec![unit]
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════
// Stage 6: discourse-marker splitting (0.88)
// ═══════════════════════════════════════════════════════════

pub(crate) fn discourse_split(
    text: &str,
    units: Vec<Unit>,
    protected: &ProtectedIndex,
    config: &SegmenterConfig,
) -> Vec<Unit> {
    units
        .into_iter()
        .flat_map(|unit| {
            if unit.char_len(text) < config.discourse_min_chars {
                return vec![unit];
            }
            let slice = unit.slice(text);
            let mut cuts = Vec::new();
            let mut previous: Option<char> = None;
            for (i, c) in slice.char_indices() {
                let at_clause_start = previous.is_some_and(char::is_whitespace);
                previous = Some(c);
                if !at_clause_start {
                    continue;
                }
                let rest = &slice[i..];
                let Some(marker) = leading_discourse_marker(rest) else {
                    continue;
                };
                let trailing = rest[marker.len()..].trim().chars().count();
                if trailing < config.discourse_min_trailing_chars {
                    continue;
                }
                let cut = unit.start + i;
                if !protected.blocks(cut, CutStrength::Regular) {
                    cuts.push(cut);
                }
            }
            cut_unit(text, unit, cuts, 0.88)
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════
// Stage 7: over-segmentation merge
// ═══════════════════════════════════════════════════════════

pub(crate) fn merge_fragments(
    text: &str,
    units: Vec<Unit>,
    protected: &ProtectedIndex,
    config: &SegmenterConfig,
) -> Vec<Unit> {
    let mut merged = Vec::with_capacity(units.len());
    let mut run: Vec<Unit> = Vec::new();

    let flush = |run: &mut Vec<Unit>, merged: &mut Vec<Unit>| {
        if run.len() >= 3 {
            merged.push(Unit {
                start: run[0].start,
                end: run[run.len() - 1].end,
                confidence: run.iter().map(|u| u.confidence).fold(1.0, f32::min),
            });
        } else {
            merged.extend(run.iter().copied());
        }
        run.clear();
    };

    for unit in units {
        let fragment = unit.char_len(text) < config.merge_min_chars
            && !protected.has_placeholder(unit.start..unit.end);
        if fragment {
            run.push(unit);
        } else {
            flush(&mut run, &mut merged);
            merged.push(unit);
        }
    }
    flush(&mut run, &mut merged);
    merged
}
