use serde::{Deserialize, Serialize};

/// Kind of substring that must survive the rewrite verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpanType {
    Email,
    Url,
    Phone,
    Account,
    Date,
    Time,
    Money,
    Unit,
    Number,
    Uuid,
    Path,
    Issue,
    Version,
    Quote,
    Id,
    Hash,
    /// Proper noun found by the identity booster.
    Name,
}

impl SpanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanType::Email => "EMAIL",
            SpanType::Url => "URL",
            SpanType::Phone => "PHONE",
            SpanType::Account => "ACCOUNT",
            SpanType::Date => "DATE",
            SpanType::Time => "TIME",
            SpanType::Money => "MONEY",
            SpanType::Unit => "UNIT",
            SpanType::Number => "NUMBER",
            SpanType::Uuid => "UUID",
            SpanType::Path => "PATH",
            SpanType::Issue => "ISSUE",
            SpanType::Version => "VERSION",
            SpanType::Quote => "QUOTE",
            SpanType::Id => "ID",
            SpanType::Hash => "HASH",
            SpanType::Name => "NAME",
        }
    }

    /// Case-insensitive reverse of `as_str`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.to_ascii_uppercase();
        [
            SpanType::Email,
            SpanType::Url,
            SpanType::Phone,
            SpanType::Account,
            SpanType::Date,
            SpanType::Time,
            SpanType::Money,
            SpanType::Unit,
            SpanType::Number,
            SpanType::Uuid,
            SpanType::Path,
            SpanType::Issue,
            SpanType::Version,
            SpanType::Quote,
            SpanType::Id,
            SpanType::Hash,
            SpanType::Name,
        ]
        .into_iter()
        .find(|t| t.as_str() == tag)
    }
}

/// A substring of the normalized input that is replaced by a placeholder
/// before any model sees the text.
///
/// `start_pos`/`end_pos` are byte offsets into the normalized text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockedSpan {
    /// Per-type running counter, 1-based.
    pub index: usize,
    pub original_text: String,
    pub placeholder: String,
    #[serde(rename = "type")]
    pub span_type: SpanType,
    pub start_pos: usize,
    pub end_pos: usize,
}

impl LockedSpan {
    pub fn len(&self) -> usize {
        self.end_pos - self.start_pos
    }

    pub fn is_empty(&self) -> bool {
        self.start_pos == self.end_pos
    }

    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start_pos < end && start < self.end_pos
    }
}

/// Canonical placeholder string for a span type and per-type index.
pub fn placeholder_for(span_type: SpanType, index: usize) -> String {
    format!("{{{{{}_{}}}}}", span_type.as_str(), index)
}

/// Outcome of restoring placeholders in a model output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmaskResult {
    pub text: String,
    /// Spans whose placeholder never appeared and whose original text is
    /// not present verbatim either.
    pub missing_spans: Vec<LockedSpan>,
    /// Well-formed placeholders in the output that map to no span.
    /// Left in the text as-is.
    pub unknown_placeholders: Vec<String>,
    /// Spans recovered through the verbatim path.
    pub verbatim_spans: Vec<String>,
}
