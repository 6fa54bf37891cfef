//! Delete-tier stripping and the redaction map used for leak detection.

use std::collections::HashMap;

use serde::Serialize;

use super::labeling::{Label, LabeledSegment, Tier};
use super::types::TierCounts;

/// A labeled segment as handed to the prompt assembler. Delete-tier
/// segments carry no text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedSegment {
    pub id: String,
    pub start: usize,
    pub end: usize,
    pub label: Label,
    pub tier: Tier,
    pub text: Option<String>,
    /// `[REDACTED:LABEL_N]` for delete-tier segments.
    pub marker: Option<String>,
}

/// Marker to original text. Never re-inserted into output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RedactionMap {
    entries: Vec<(String, String)>,
}

impl RedactionMap {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, marker: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(m, _)| m == marker)
            .map(|(_, text)| text.as_str())
    }

    /// `(marker, original)` pairs in redaction order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(m, text)| (m.as_str(), text.as_str()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Redaction {
    pub segments: Vec<ProcessedSegment>,
    pub map: RedactionMap,
    pub counts: TierCounts,
}

pub fn redact(labeled: &[LabeledSegment]) -> Redaction {
    let mut counters: HashMap<Label, usize> = HashMap::new();
    let mut out = Redaction::default();

    for segment in labeled {
        let (text, marker) = match segment.tier {
            Tier::Green => {
                out.counts.green += 1;
                (Some(segment.text.clone()), None)
            }
            Tier::Yellow => {
                out.counts.yellow += 1;
                (Some(segment.text.clone()), None)
            }
            Tier::Red => {
                out.counts.red += 1;
                let n = counters.entry(segment.label).or_insert(0);
                *n += 1;
                let marker = format!("[REDACTED:{}_{}]", segment.label.as_str(), n);
                out.map.entries.push((marker.clone(), segment.text.clone()));
                (None, Some(marker))
            }
        };
        out.segments.push(ProcessedSegment {
            id: segment.id.clone(),
            start: segment.start,
            end: segment.end,
            label: segment.label,
            tier: segment.tier,
            text,
            marker,
        });
    }

    tracing::debug!(
        green = out.counts.green,
        yellow = out.counts.yellow,
        red = out.counts.red,
        "Redaction complete"
    );
    out
}
