//! Three-tier structure labeling and its deterministic safety net.

pub mod enforce;
pub mod labeler;
pub mod types;

pub use enforce::{enforce_labels, scan_triggers, strip_for_matching, LabelChange};
pub use labeler::{label_segments, LabelerParams, LabelingOutcome};
pub use types::*;
