use serde::{Deserialize, Serialize};

use crate::pipeline::segment::Segment;

/// Content-handling class of a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    /// Keep as is.
    Green,
    /// Rewrite with care.
    Yellow,
    /// Delete.
    Red,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Label {
    CoreFact,
    CoreIntent,
    Request,
    Apology,
    Courtesy,
    Accountability,
    SelfJustification,
    NegativeFeedback,
    Emotional,
    ExcessDetail,
    Aggression,
    PersonalAttack,
    PrivateTmi,
    PureGrumble,
}

/// Static label table: (label, wire name, tier).
const LABELS: [(Label, &str, Tier); 14] = [
    (Label::CoreFact, "CORE_FACT", Tier::Green),
    (Label::CoreIntent, "CORE_INTENT", Tier::Green),
    (Label::Request, "REQUEST", Tier::Green),
    (Label::Apology, "APOLOGY", Tier::Green),
    (Label::Courtesy, "COURTESY", Tier::Green),
    (Label::Accountability, "ACCOUNTABILITY", Tier::Yellow),
    (Label::SelfJustification, "SELF_JUSTIFICATION", Tier::Yellow),
    (Label::NegativeFeedback, "NEGATIVE_FEEDBACK", Tier::Yellow),
    (Label::Emotional, "EMOTIONAL", Tier::Yellow),
    (Label::ExcessDetail, "EXCESS_DETAIL", Tier::Yellow),
    (Label::Aggression, "AGGRESSION", Tier::Red),
    (Label::PersonalAttack, "PERSONAL_ATTACK", Tier::Red),
    (Label::PrivateTmi, "PRIVATE_TMI", Tier::Red),
    (Label::PureGrumble, "PURE_GRUMBLE", Tier::Red),
];

/// Older label names still produced by some prompts and models.
const LEGACY: &[(&str, Label)] = &[
    ("FACT", Label::CoreFact),
    ("INFO", Label::CoreFact),
    ("INTENT", Label::CoreIntent),
    ("PURPOSE", Label::CoreIntent),
    ("ASK", Label::Request),
    ("REQ", Label::Request),
    ("SORRY", Label::Apology),
    ("GREETING", Label::Courtesy),
    ("THANKS", Label::Courtesy),
    ("POLITE", Label::Courtesy),
    ("RESPONSIBILITY", Label::Accountability),
    ("BLAME", Label::NegativeFeedback),
    ("CRITICISM", Label::NegativeFeedback),
    ("COMPLAINT", Label::NegativeFeedback),
    ("EXCUSE", Label::SelfJustification),
    ("DEFENSE", Label::SelfJustification),
    ("EMOTION", Label::Emotional),
    ("FEELING", Label::Emotional),
    ("DETAIL", Label::ExcessDetail),
    ("VERBOSE", Label::ExcessDetail),
    ("PROFANITY", Label::Aggression),
    ("HOSTILE", Label::Aggression),
    ("ATTACK", Label::PersonalAttack),
    ("INSULT", Label::PersonalAttack),
    ("TMI", Label::PrivateTmi),
    ("PRIVATE", Label::PrivateTmi),
    ("GRUMBLE", Label::PureGrumble),
    ("VENT", Label::PureGrumble),
];

impl Label {
    pub const ALL: [Label; 14] = [
        Label::CoreFact,
        Label::CoreIntent,
        Label::Request,
        Label::Apology,
        Label::Courtesy,
        Label::Accountability,
        Label::SelfJustification,
        Label::NegativeFeedback,
        Label::Emotional,
        Label::ExcessDetail,
        Label::Aggression,
        Label::PersonalAttack,
        Label::PrivateTmi,
        Label::PureGrumble,
    ];

    /// Default for unresolvable tokens and total labeling failure.
    pub const SAFEST_KEEP: Label = Label::CoreFact;
    /// Target of ambiguous escalation.
    pub const MILDEST_REWRITE: Label = Label::Emotional;

    fn entry(&self) -> &'static (Label, &'static str, Tier) {
        // LABELS is ordered like the enum.
        &LABELS[*self as usize]
    }

    pub fn as_str(&self) -> &'static str {
        self.entry().1
    }

    pub fn tier(&self) -> Tier {
        self.entry().2
    }

    /// The factual/intent labels the labeler output must contain.
    pub fn is_core(&self) -> bool {
        matches!(self, Label::CoreFact | Label::CoreIntent)
    }

    pub fn from_name(name: &str) -> Option<Label> {
        LABELS
            .iter()
            .find(|(_, wire, _)| *wire == name)
            .map(|(label, _, _)| *label)
    }

    /// Resolve a raw model token: exact name, then the legacy table.
    pub fn parse(token: &str) -> Option<Label> {
        let normalized = token
            .trim()
            .trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .to_ascii_uppercase()
            .replace([' ', '-'], "_");
        Label::from_name(&normalized).or_else(|| {
            LEGACY
                .iter()
                .find(|(legacy, _)| *legacy == normalized)
                .map(|(_, label)| *label)
        })
    }
}

/// A segment with its label. The enforcer may reassign `label`; text and
/// positions never change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabeledSegment {
    pub id: String,
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub label: Label,
    pub tier: Tier,
}

impl LabeledSegment {
    pub fn new(segment: &Segment, label: Label) -> Self {
        Self {
            id: segment.id.clone(),
            text: segment.text.clone(),
            start: segment.start,
            end: segment.end,
            label,
            tier: label.tier(),
        }
    }

    pub fn relabel(&mut self, label: Label) {
        self.label = label;
        self.tier = label.tier();
    }
}
