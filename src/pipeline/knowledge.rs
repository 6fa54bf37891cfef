//! Supplementary knowledge lookup. The store itself lives outside this
//! crate; the orchestrator only sees this trait.

use async_trait::async_trait;

/// Searches an external knowledge store for text blocks relevant to a
/// query. Failures are reported as a message and never abort a request.
#[async_trait]
pub trait KnowledgeSearch: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<String>, String>;
}

/// Fixed blocks, for tests and demos.
pub struct StaticKnowledge {
    blocks: Vec<String>,
}

impl StaticKnowledge {
    pub fn new(blocks: Vec<String>) -> Self {
        Self { blocks }
    }
}

#[async_trait]
impl KnowledgeSearch for StaticKnowledge {
    async fn search(&self, _query: &str, limit: usize) -> Result<Vec<String>, String> {
        Ok(self.blocks.iter().take(limit).cloned().collect())
    }
}
