//! Streaming event model.
//!
//! The orchestrator emits these in a strict per-request order; the HTTP
//! layer turns each one into a named SSE event via `name()` and `data()`.

use serde::Serialize;

use super::analysis::SituationAnalysis;
use super::labeling::LabeledSegment;
use super::preprocess::LockedSpan;
use super::redact::ProcessedSegment;
use super::segment::Segment;
use super::template::SelectedTemplate;
use super::types::PipelineStats;
use super::usage::UsageReport;
use super::validation::ValidationIssue;

/// Pipeline stage reported by `phase` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Preprocessing,
    Segmenting,
    Labeling,
    TemplateSelecting,
    Generating,
    Validating,
    Retrying,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Preprocessing => "preprocessing",
            Phase::Segmenting => "segmenting",
            Phase::Labeling => "labeling",
            Phase::TemplateSelecting => "templateSelecting",
            Phase::Generating => "generating",
            Phase::Validating => "validating",
            Phase::Retrying => "retrying",
        }
    }
}

/// Payload of the terminal `error` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Phase(Phase),
    Spans(Vec<LockedSpan>),
    MaskedText(String),
    Segments(Vec<Segment>),
    Labels(Vec<LabeledSegment>),
    SituationAnalysis(SituationAnalysis),
    ProcessedSegments(Vec<ProcessedSegment>),
    TemplateSelected(SelectedTemplate),
    Delta(String),
    /// Consumers discard every delta received so far.
    Retry(Vec<String>),
    ValidationIssues(Vec<ValidationIssue>),
    Stats(PipelineStats),
    Usage(UsageReport),
    Done(String),
    Error(ErrorPayload),
}

impl PipelineEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::Phase(_) => "phase",
            PipelineEvent::Spans(_) => "spans",
            PipelineEvent::MaskedText(_) => "maskedText",
            PipelineEvent::Segments(_) => "segments",
            PipelineEvent::Labels(_) => "labels",
            PipelineEvent::SituationAnalysis(_) => "situationAnalysis",
            PipelineEvent::ProcessedSegments(_) => "processedSegments",
            PipelineEvent::TemplateSelected(_) => "templateSelected",
            PipelineEvent::Delta(_) => "delta",
            PipelineEvent::Retry(_) => "retry",
            PipelineEvent::ValidationIssues(_) => "validationIssues",
            PipelineEvent::Stats(_) => "stats",
            PipelineEvent::Usage(_) => "usage",
            PipelineEvent::Done(_) => "done",
            PipelineEvent::Error(_) => "error",
        }
    }

    /// SSE data: plain text for string events, JSON otherwise.
    pub fn data(&self) -> String {
        let json = match self {
            PipelineEvent::Phase(p) => return p.as_str().to_string(),
            PipelineEvent::MaskedText(s) | PipelineEvent::Delta(s) | PipelineEvent::Done(s) => {
                return s.clone()
            }
            PipelineEvent::Spans(v) => serde_json::to_string(v),
            PipelineEvent::Segments(v) => serde_json::to_string(v),
            PipelineEvent::Labels(v) => serde_json::to_string(v),
            PipelineEvent::SituationAnalysis(v) => serde_json::to_string(v),
            PipelineEvent::ProcessedSegments(v) => serde_json::to_string(v),
            PipelineEvent::TemplateSelected(v) => serde_json::to_string(v),
            PipelineEvent::Retry(v) => serde_json::to_string(v),
            PipelineEvent::ValidationIssues(v) => serde_json::to_string(v),
            PipelineEvent::Stats(v) => serde_json::to_string(v),
            PipelineEvent::Usage(v) => serde_json::to_string(v),
            PipelineEvent::Error(v) => serde_json::to_string(v),
        };
        json.unwrap_or_else(|e| {
            tracing::error!(event = self.name(), "Event serialization failed: {e}");
            "null".to_string()
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineEvent::Done(_) | PipelineEvent::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::labeling::Label;
    use crate::pipeline::redact::redact;

    #[test]
    fn string_events_carry_plain_text() {
        let e = PipelineEvent::Phase(Phase::TemplateSelecting);
        assert_eq!((e.name(), e.data().as_str()), ("phase", "templateSelecting"));
        let e = PipelineEvent::Delta("안녕".into());
        assert_eq!(e.data(), "안녕");
        assert!(PipelineEvent::Done("끝".into()).is_terminal());
        assert!(!e.is_terminal());
    }

    #[test]
    fn processed_segments_serialize_red_text_as_null() {
        let labeled = vec![LabeledSegment {
            id: "T1".into(),
            text: "꺼져".into(),
            start: 0,
            end: 6,
            label: Label::Aggression,
            tier: Label::Aggression.tier(),
        }];
        let e = PipelineEvent::ProcessedSegments(redact(&labeled).segments);
        let json: serde_json::Value = serde_json::from_str(&e.data()).unwrap();
        assert!(json[0]["text"].is_null());
        assert_eq!(e.name(), "processedSegments");
    }

    #[test]
    fn error_payload_is_code_and_message() {
        let e = PipelineEvent::Error(ErrorPayload {
            code: "TIMEOUT",
            message: "시간 초과".into(),
        });
        assert_eq!(e.data(), r#"{"code":"TIMEOUT","message":"시간 초과"}"#);
    }
}
