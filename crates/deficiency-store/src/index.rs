//! Contracts for the production index and the optional reranker.

use async_trait::async_trait;
use deficiency_core::{ChunkKey, EvidenceChunk};
use serde::{Deserialize, Serialize};

use crate::RetrievalError;

/// A raw hit from one of the index's search modes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexHit {
    pub document_id: String,
    pub chunk_index: u32,
    pub chunk_text: String,
    #[serde(default)]
    pub page_number: Option<u32>,
    /// Mode-specific score; higher is more relevant.
    pub score: f32,
}

impl IndexHit {
    pub fn key(&self) -> ChunkKey {
        ChunkKey {
            document_id: self.document_id.clone(),
            chunk_index: self.chunk_index,
        }
    }
}

/// Chunk index over produced documents, scoped per production.
///
/// Both search modes return hits ordered by descending score and never
/// cross production boundaries.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Embedding-similarity search.
    async fn semantic_search(
        &self,
        production_id: &str,
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<IndexHit>, RetrievalError>;

    /// Keyword / full-text search.
    async fn keyword_search(
        &self,
        production_id: &str,
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<IndexHit>, RetrievalError>;
}

/// Cross-encoder style rescoring of retrieval candidates.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// One score per candidate, in candidate order.
    async fn rerank(
        &self,
        query_text: &str,
        candidates: &[EvidenceChunk],
    ) -> Result<Vec<f32>, RetrievalError>;
}
