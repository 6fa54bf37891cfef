pub mod analysis; // Situation analysis + identity booster (background)
pub mod events; // Streaming event model
pub mod knowledge;
pub mod labeling; // Labels, tiers, labeler, trigger scan + enforcer
pub mod llm; // Model dispatcher and backends
pub mod orchestrator; // Per-request state machine
pub mod preprocess; // Normalize → extract → mask
pub mod prompt;
pub mod redact;
pub mod segment; // Segmentation cascade + refiner
pub mod template; // Sections, templates, role rules, selector
pub mod types;
pub mod usage;
pub mod validation;

pub use orchestrator::{PipelineError, TransformPipeline};
pub use types::{PipelineResult, TransformRequest};
