//! Read-only knowledge lookup for grounding replies.

mod static_kb;

use crate::error::KnowledgeError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use static_kb::StaticKnowledgeBase;

/// A ranked piece of reference text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub content: String,
    /// Relevance, higher is better
    pub score: f32,
    /// Where the snippet came from (file name or document label)
    pub source: String,
}

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// At most `k` snippets relevant to `text`, best first.
    async fn query(&self, text: &str, k: usize) -> Result<Vec<Snippet>, KnowledgeError>;
}
