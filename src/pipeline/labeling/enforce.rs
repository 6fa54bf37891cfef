//! Deterministic label correction: the always-on enforcer and the trigger
//! scanner used by all-safe recovery. No model calls.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::types::{Label, LabeledSegment, Tier};

/// Minimum trigger score for a keep-tier segment to be upgraded.
pub const TRIGGER_THRESHOLD: u32 = 2;
/// Upgrades allowed per request.
pub const MAX_TRIGGER_UPGRADES: usize = 3;

/// Stems that stay profane wherever they appear, spacing removed.
static PROFANITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"씨발|씨바|ㅆㅂ|ㅅㅂ|개새끼|새끼야|병신|ㅂㅅ|좆|지랄|미친놈|미친년|엿먹|죽을래").unwrap()
});

/// Stems that also begin ordinary words (시발점, 시발역); matched per eojeol.
static PROFANE_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^시발(?:놈|년|새끼|같은|아|$)").unwrap());

/// Dismissals that are also plain verbs (전원이 꺼져서, 위기가 닥쳐오다).
/// Only the bare imperative counts.
static DISMISSAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:꺼져|꺼져라|꺼지라고|꺼지세요|닥쳐|닥쳐라|닥치라고|닥치세요)$").unwrap()
});

/// Words that can sit in front of an imperative dismissal.
const DISMISSAL_LEAD: &[&str] = &[
    "좀", "그냥", "당장", "제발", "빨리", "얼른", "그만", "너", "넌", "니", "너는",
];

static ABILITY_DENIAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"머리가?(없|나쁘|비었)|뇌가?없|할줄아는게없|그것도못|기본도모르|제대로하는게(하나도)?없|능력도없|무능하|일을?이렇게밖에|수준하고는|한심하",
    )
    .unwrap()
});

static SARCASTIC_PRAISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(참|정말|진짜|아주|거참)(잘하셨|잘했|잘하시|대단하|훌륭하|똑똑하|잘나셨)|천재시|대단하십니다").unwrap()
});

static MOCKERY_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ㅋㅋ|ㅎㅎ|ㅉㅉ|\^\^|퍽이나|어련하|참나|하하").unwrap());

static MILD_PROFANITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"존나|졸라|젠장|빡치|빡쳐|개빡|개짜증|짜증나|열받|미치겠|돌겠|빌어먹").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TriggerCategory {
    Blame,
    EmotionalIntensity,
    Speculation,
    SelfDefense,
}

impl TriggerCategory {
    fn upgrade(&self) -> Label {
        match self {
            TriggerCategory::Blame | TriggerCategory::Speculation => Label::NegativeFeedback,
            TriggerCategory::EmotionalIntensity => Label::Emotional,
            TriggerCategory::SelfDefense => Label::SelfJustification,
        }
    }
}

/// (category, strong pattern, soft pattern)
static TRIGGERS: LazyLock<Vec<(TriggerCategory, Regex, Regex)>> = LazyLock::new(|| {
    vec![
        (
            TriggerCategory::Blame,
            Regex::new(r"(맨날|매번|항상|만날)(이러|그러|이런|그런|늦|실수|틀리|빼먹)|한두번이아니|도대체(왜|몇번)|왜항상|또이러").unwrap(),
            Regex::new(r"맨날|매번|항상|번번이|또").unwrap(),
        ),
        (
            TriggerCategory::EmotionalIntensity,
            Regex::new(r"너무화나|진짜화나|어이없|황당하|기가막|답답해죽|환장|열받|미치겠").unwrap(),
            Regex::new(r"답답|속상|실망|짜증|화가|서운|억장").unwrap(),
        ),
        (
            TriggerCategory::Speculation,
            Regex::new(r"일부러|고의로|뻔하|뻔히|분명히.*(했|하)겠").unwrap(),
            Regex::new(r"아마|것같은데|모양이|거아니|듯하").unwrap(),
        ),
        (
            TriggerCategory::SelfDefense,
            Regex::new(r"제(잘못|탓)이아니|저는시키는대로|어쩔수없었|저도할만큼|억울하").unwrap(),
            Regex::new(r"사실은|원래는|그게아니라|저는분명|근데제가").unwrap(),
        ),
    ]
});

/// Lowercased text with whitespace and punctuation removed, so that
/// spacing or symbols inserted between syllables do not evade matching.
/// Eojeol-level check for the ambiguous stems. A dismissal must end the
/// segment and either open it or follow a lead word.
fn has_profane_word(text: &str) -> bool {
    let words: Vec<String> = text
        .split_whitespace()
        .map(strip_for_matching)
        .filter(|w| !w.is_empty())
        .collect();
    if words.iter().any(|w| PROFANE_WORD.is_match(w)) {
        return true;
    }
    match words.split_last() {
        Some((last, before)) if DISMISSAL.is_match(last) => before
            .last()
            .map_or(true, |prev| DISMISSAL_LEAD.contains(&prev.as_str())),
        _ => false,
    }
}

pub fn strip_for_matching(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace() && !is_punctuation(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation() && c != '^'
        || matches!(c, '…' | '·' | '‘' | '’' | '“' | '”' | '「' | '」' | '『' | '』' | '～' | '〜')
}

/// A label reassignment made by the enforcer or the scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelChange {
    pub id: String,
    pub from: Label,
    pub to: Label,
}

/// Force labels for confirmed patterns and escalate ambiguous ones.
///
/// Segments already in the delete tier are skipped. Ambiguous matches only
/// move a keep-tier label to the mildest rewrite label.
pub fn enforce_labels(segments: &mut [LabeledSegment]) -> Vec<LabelChange> {
    let mut changes = Vec::new();
    for segment in segments.iter_mut() {
        if segment.tier == Tier::Red {
            continue;
        }
        let stripped = strip_for_matching(&segment.text);
        let forced = if PROFANITY.is_match(&stripped) || has_profane_word(&segment.text) {
            Some(Label::Aggression)
        } else if ABILITY_DENIAL.is_match(&stripped)
            || (SARCASTIC_PRAISE.is_match(&stripped) && MOCKERY_MARKER.is_match(&stripped))
        {
            Some(Label::PersonalAttack)
        } else if segment.tier == Tier::Green && MILD_PROFANITY.is_match(&stripped) {
            Some(Label::MILDEST_REWRITE)
        } else {
            None
        };

        if let Some(to) = forced {
            changes.push(LabelChange {
                id: segment.id.clone(),
                from: segment.label,
                to,
            });
            segment.relabel(to);
        }
    }
    if !changes.is_empty() {
        tracing::debug!(changes = changes.len(), "Enforcer corrected labels");
    }
    changes
}

/// Scanner score and proposed label for one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerHit {
    pub index: usize,
    pub score: u32,
    pub label: Label,
}

fn score(text: &str) -> (u32, Option<Label>) {
    let stripped = strip_for_matching(text);
    let mut total = 0;
    let mut best: Option<(u32, Label)> = None;
    for (category, strong, soft) in TRIGGERS.iter() {
        let points = if strong.is_match(&stripped) {
            2
        } else if soft.is_match(&stripped) {
            1
        } else {
            0
        };
        total += points;
        if points > 0 && best.map_or(true, |(p, _)| points > p) {
            best = Some((points, category.upgrade()));
        }
    }
    (total, best.map(|(_, label)| label))
}

/// Score keep-tier segments; return those at or above the threshold,
/// highest first, capped at [`MAX_TRIGGER_UPGRADES`].
pub fn scan_triggers(segments: &[LabeledSegment]) -> Vec<TriggerHit> {
    let mut hits: Vec<TriggerHit> = segments
        .iter()
        .enumerate()
        .filter(|(_, s)| s.tier == Tier::Green)
        .filter_map(|(index, s)| {
            let (score, label) = score(&s.text);
            let label = label?;
            (score >= TRIGGER_THRESHOLD).then_some(TriggerHit {
                index,
                score,
                label,
            })
        })
        .collect();
    hits.sort_by(|a, b| b.score.cmp(&a.score));
    hits.truncate(MAX_TRIGGER_UPGRADES);
    hits
}

/// Apply scanner hits. Returns the changes made.
pub fn apply_triggers(segments: &mut [LabeledSegment], hits: &[TriggerHit]) -> Vec<LabelChange> {
    hits.iter()
        .filter_map(|hit| {
            let segment = segments.get_mut(hit.index)?;
            let change = LabelChange {
                id: segment.id.clone(),
                from: segment.label,
                to: hit.label,
            };
            segment.relabel(hit.label);
            Some(change)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(id: &str, text: &str, label: Label) -> LabeledSegment {
        LabeledSegment {
            id: id.into(),
            text: text.into(),
            start: 0,
            end: text.len(),
            label,
            tier: label.tier(),
        }
    }

    #[test]
    fn profanity_forces_aggression_even_with_spacing() {
        let mut segs = vec![seg("T1", "이게 무슨 시.발 상황이에요", Label::CoreFact)];
        let changes = enforce_labels(&mut segs);
        assert_eq!(segs[0].label, Label::Aggression);
        assert_eq!(segs[0].tier, Tier::Red);
        assert_eq!(changes[0].from, Label::CoreFact);
    }

    #[test]
    fn ordinary_words_sharing_profane_stems_are_left_alone() {
        let mut segs = vec![
            seg("T1", "노트북 한 개 새로 보내주세요", Label::CoreFact),
            seg("T2", "컴퓨터가 꺼져서 파일을 못 보냈어요", Label::CoreFact),
            seg("T3", "이번 달이 프로젝트 시발점입니다", Label::CoreFact),
            seg("T4", "마감이 닥쳐오고 있습니다", Label::CoreFact),
            seg("T5", "화면이 자꾸 꺼져", Label::CoreFact),
        ];
        let changes = enforce_labels(&mut segs);
        assert!(changes.is_empty(), "{changes:?}");
        assert!(segs.iter().all(|s| s.label == Label::CoreFact));
    }

    #[test]
    fn imperative_dismissals_force_aggression() {
        let mut segs = vec![
            seg("T1", "그냥 꺼져", Label::CoreIntent),
            seg("T2", "닥쳐!", Label::Emotional),
            seg("T3", "시발 진짜", Label::CoreFact),
        ];
        enforce_labels(&mut segs);
        assert!(segs.iter().all(|s| s.label == Label::Aggression));
    }

    #[test]
    fn ability_denial_and_sarcasm_force_personal_attack() {
        let mut segs = vec![
            seg("T1", "그것도 못 하세요?", Label::NegativeFeedback),
            seg("T2", "참 잘하셨네요 ㅋㅋ", Label::Courtesy),
            seg("T3", "참 잘하셨네요", Label::Courtesy),
        ];
        enforce_labels(&mut segs);
        assert_eq!(segs[0].label, Label::PersonalAttack);
        assert_eq!(segs[1].label, Label::PersonalAttack);
        assert_eq!(segs[2].label, Label::Courtesy);
    }

    #[test]
    fn mild_profanity_only_escalates_keep_tier() {
        let mut segs = vec![
            seg("T1", "진짜 짜증나네요", Label::CoreFact),
            seg("T2", "짜증나서 말씀드립니다", Label::NegativeFeedback),
            seg("T3", "존나 별로", Label::PureGrumble),
        ];
        let changes = enforce_labels(&mut segs);
        assert_eq!(segs[0].label, Label::Emotional);
        assert_eq!(segs[1].label, Label::NegativeFeedback);
        assert_eq!(segs[2].label, Label::PureGrumble);
        assert_eq!(changes.len(), 1);
    }

    #[test]
    fn scanner_scores_and_caps() {
        let segs = vec![
            seg("T1", "맨날 이러시니까 답답해요", Label::CoreFact),
            seg("T2", "회의는 3시입니다", Label::CoreFact),
            seg("T3", "일부러 그러신 것 같은데 정말 어이없네요", Label::Courtesy),
            seg("T4", "또 늦으셨네요", Label::NegativeFeedback),
            seg("T5", "제 잘못이 아니라 억울합니다", Label::CoreIntent),
            seg("T6", "매번 실수하시고 너무 화나요", Label::CoreFact),
        ];
        let hits = scan_triggers(&segs);
        assert_eq!(hits.len(), MAX_TRIGGER_UPGRADES);
        assert!(hits.iter().all(|h| h.score >= TRIGGER_THRESHOLD));
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(hits.iter().all(|h| h.index != 1 && h.index != 3));
    }

    #[test]
    fn scanner_picks_strongest_category_label() {
        let segs = vec![seg("T1", "제 잘못이 아니에요 원래는", Label::CoreFact)];
        let hits = scan_triggers(&segs);
        assert_eq!(hits[0].label, Label::SelfJustification);

        let mut segs = segs;
        let changes = apply_triggers(&mut segs, &hits);
        assert_eq!(changes.len(), 1);
        assert_eq!(segs[0].tier, Tier::Yellow);
    }

    #[test]
    fn soft_signal_alone_stays_below_threshold() {
        let segs = vec![seg("T1", "아마 내일 도착할 거예요", Label::CoreFact)];
        assert!(scan_triggers(&segs).is_empty());
    }
}
