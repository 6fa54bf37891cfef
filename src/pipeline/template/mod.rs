//! Template selection: purpose/context lookup, refund overrides,
//! mandatory-section injection and role rules.

pub mod catalog;

pub use catalog::{
    role_rules, template_by_id, Emphasis, RoleRules, Section, Template, DEFAULT_TEMPLATE_ID,
    REFUND_REJECTION_TEMPLATE_ID, TEMPLATES,
};

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::labeling::{Label, LabeledSegment};
use super::types::{Context, Persona, Purpose, Topic};
use catalog::{template_for_context, template_for_purpose};

static REFUND_TERMS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"환불|반품|환급|결제\s*취소|청약\s*철회").unwrap());

/// Signals the selector reads.
#[derive(Debug, Clone, Copy)]
pub struct SelectionInput<'a> {
    pub persona: Persona,
    pub purpose: Option<Purpose>,
    pub primary_context: Option<Context>,
    pub topic: Option<Topic>,
    pub masked_text: &'a str,
    pub segments: &'a [LabeledSegment],
}

/// How the base template was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectionReason {
    Purpose,
    Context,
    Default,
    RefundOverride,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveSection {
    pub section: Section,
    pub emphasis: Emphasis,
    /// Injected sections survive skip rules.
    pub mandatory: bool,
}

/// The `templateSelected` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedTemplate {
    pub template_id: &'static str,
    pub name: &'static str,
    pub reason: SelectionReason,
    pub sections: Vec<EffectiveSection>,
    pub section_enforced: bool,
}

impl SelectedTemplate {
    pub fn has_section(&self, section: Section) -> bool {
        self.sections.iter().any(|s| s.section == section)
    }
}

fn has_label(segments: &[LabeledSegment], label: Label) -> bool {
    segments.iter().any(|s| s.label == label)
}

fn base_template(input: &SelectionInput<'_>) -> (&'static str, SelectionReason) {
    let refund_by_topic = input.topic == Some(Topic::Refund)
        && matches!(input.purpose, Some(Purpose::Decline | Purpose::RefundRejection));
    let refund_by_scan = REFUND_TERMS.is_match(input.masked_text)
        && has_label(input.segments, Label::NegativeFeedback);
    if refund_by_topic || refund_by_scan {
        return (REFUND_REJECTION_TEMPLATE_ID, SelectionReason::RefundOverride);
    }

    if let Some(purpose) = input.purpose {
        (template_for_purpose(purpose), SelectionReason::Purpose)
    } else if let Some(context) = input.primary_context {
        (template_for_context(context), SelectionReason::Context)
    } else {
        (DEFAULT_TEMPLATE_ID, SelectionReason::Default)
    }
}

/// Choose the template and compute the effective section list.
pub fn select_template(input: &SelectionInput<'_>) -> SelectedTemplate {
    let (id, reason) = base_template(input);
    let template = template_by_id(id).unwrap_or(&TEMPLATES[0]);

    let mut sections: Vec<EffectiveSection> = template
        .sections
        .iter()
        .map(|&section| EffectiveSection {
            section,
            emphasis: Emphasis::Normal,
            mandatory: false,
        })
        .collect();

    let needs_verification = has_label(input.segments, Label::Accountability)
        || has_label(input.segments, Label::NegativeFeedback);
    let mut section_enforced = false;
    if needs_verification && !template.sections.contains(&Section::InternalVerification) {
        let anchor = sections
            .iter()
            .position(|s| s.section == Section::Acknowledge)
            .or_else(|| sections.iter().position(|s| s.section == Section::Greeting));
        let at = anchor.map_or(0, |i| i + 1);
        sections.insert(
            at,
            EffectiveSection {
                section: Section::InternalVerification,
                emphasis: Emphasis::Normal,
                mandatory: true,
            },
        );
        section_enforced = true;
    }

    let rules = role_rules(input.persona);
    sections.retain(|s| s.mandatory || !rules.skip.contains(&s.section));
    for s in &mut sections {
        if rules.expand.contains(&s.section) {
            s.emphasis = Emphasis::Expanded;
        } else if rules.shorten.contains(&s.section) {
            s.emphasis = Emphasis::Shortened;
        }
    }

    tracing::debug!(
        template = template.id,
        ?reason,
        sections = sections.len(),
        section_enforced,
        "Template selected"
    );
    SelectedTemplate {
        template_id: template.id,
        name: template.name,
        reason,
        sections,
        section_enforced,
    }
}
