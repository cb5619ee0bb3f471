//! Retrieval-augmented-generation collaborator contract.
//!
//! Ingestion and the vector store live outside the core; the core only
//! consumes `retrieve(query) → snippets`.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A retrieved knowledge snippet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snippet {
    pub text: String,
    pub score: f32,
    pub source: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[async_trait::async_trait]
pub trait RagRetriever: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        user_id: Option<&str>,
        corpus_id: Option<&str>,
        top_k: usize,
    ) -> Result<Vec<Snippet>>;
}
