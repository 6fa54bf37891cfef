//! Shared state for the HTTP layer.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::pipeline::TransformPipeline;

/// State handed to every handler.
#[derive(Clone)]
pub struct ApiContext {
    pub pipeline: Arc<TransformPipeline>,
    pub started_at: DateTime<Utc>,
}

impl ApiContext {
    pub fn new(pipeline: Arc<TransformPipeline>) -> Self {
        Self {
            pipeline,
            started_at: Utc::now(),
        }
    }
}
