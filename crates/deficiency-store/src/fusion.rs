//! Hybrid evidence retrieval: semantic + keyword search, weighted score
//! fusion, and optional reranking.
//!
//! `EvidenceRetriever` queries both index modes for one production, merges
//! the hits by `(document_id, chunk_index)`, and orders them by
//! `semantic_weight * semantic + keyword_weight * keyword`. The top
//! candidates then go through the reranker, if one is configured and
//! reachable; otherwise the fused order stands.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use deficiency_core::evidence::clamp_unit;
use deficiency_core::{ChunkKey, EvidenceChunk};
use futures::future;
use tracing::{debug, warn};

use crate::{IndexHit, Reranker, RetrievalError, VectorIndex};

pub const DEFAULT_LIMIT: usize = 20;
pub const DEFAULT_CANDIDATE_CAP: usize = 100;

/// Relative weight of each search mode in the fused score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub semantic: f32,
    pub keyword: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            semantic: 0.7,
            keyword: 0.3,
        }
    }
}

#[derive(Debug)]
struct Candidate {
    hit: IndexHit,
    semantic: f32,
    keyword: f32,
    fused: f32,
}

/// Hybrid retriever over a shared index client.
///
/// Cheap to share: hold it in an `Arc` and call [`search`](Self::search)
/// from any number of tasks.
pub struct EvidenceRetriever {
    index: Arc<dyn VectorIndex>,
    reranker: Option<Arc<dyn Reranker>>,
    weights: FusionWeights,
    candidate_cap: usize,
}

impl EvidenceRetriever {
    pub fn new(index: Arc<dyn VectorIndex>) -> Self {
        Self {
            index,
            reranker: None,
            weights: FusionWeights::default(),
            candidate_cap: DEFAULT_CANDIDATE_CAP,
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn with_weights(mut self, weights: FusionWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_candidate_cap(mut self, cap: usize) -> Self {
        self.candidate_cap = cap.max(1);
        self
    }

    /// Top `limit` chunks for a query within one production, by descending
    /// `relevance_score`.
    ///
    /// Fails only when neither search mode can reach the index. A single
    /// failed mode, or a failed reranker, degrades with a warning.
    pub async fn search(
        &self,
        query_text: &str,
        production_id: &str,
        limit: usize,
    ) -> Result<Vec<EvidenceChunk>, RetrievalError> {
        let cap = self.candidate_cap.max(limit);
        let (semantic, keyword) = future::join(
            self.index.semantic_search(production_id, query_text, cap),
            self.index.keyword_search(production_id, query_text, cap),
        )
        .await;

        let (semantic, keyword) = match (semantic, keyword) {
            (Err(err), Err(_)) => return Err(err),
            (Ok(s), Err(err)) => {
                warn!(production_id, error = %err, "keyword search failed, using semantic only");
                (s, Vec::new())
            }
            (Err(err), Ok(k)) => {
                warn!(production_id, error = %err, "semantic search failed, using keyword only");
                (Vec::new(), k)
            }
            (Ok(s), Ok(k)) => (s, k),
        };

        let mut candidates = fuse(semantic, keyword, self.weights);
        candidates.truncate(self.candidate_cap);
        debug!(
            production_id,
            candidates = candidates.len(),
            "fused retrieval candidates"
        );

        let mut chunks: Vec<EvidenceChunk> = candidates
            .into_iter()
            .map(|c| EvidenceChunk {
                document_id: c.hit.document_id,
                chunk_index: c.hit.chunk_index,
                chunk_text: c.hit.chunk_text,
                page_number: c.hit.page_number,
                relevance_score: c.fused,
            })
            .collect();

        if let Some(reranker) = &self.reranker {
            if !chunks.is_empty() {
                self.apply_rerank(reranker.as_ref(), query_text, &mut chunks)
                    .await;
            }
        }

        chunks.truncate(limit);
        Ok(chunks)
    }

    async fn apply_rerank(
        &self,
        reranker: &dyn Reranker,
        query_text: &str,
        chunks: &mut [EvidenceChunk],
    ) {
        let scores = match reranker.rerank(query_text, chunks).await {
            Ok(scores) if scores.len() == chunks.len() => scores,
            Ok(scores) => {
                warn!(
                    expected = chunks.len(),
                    got = scores.len(),
                    "reranker returned mismatched score count, keeping fused order"
                );
                return;
            }
            Err(err) => {
                warn!(error = %err, "reranker unavailable, keeping fused order");
                return;
            }
        };

        for (chunk, score) in chunks.iter_mut().zip(scores) {
            chunk.relevance_score = clamp_unit(score);
        }
        // Stable: equal rerank scores keep fused order.
        chunks.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(Ordering::Equal)
        });
    }
}

/// Scale scores so the best hit is 1.0.
fn max_normalized(hits: &[IndexHit]) -> Vec<f32> {
    let max = hits
        .iter()
        .map(|h| h.score)
        .filter(|s| s.is_finite())
        .fold(0.0f32, f32::max);
    hits.iter()
        .map(|h| if max > 0.0 { clamp_unit(h.score / max) } else { 0.0 })
        .collect()
}

/// Merge both result lists by chunk identity and compute fused scores.
///
/// Semantic scores are similarities already in `[0, 1]` and are clamped;
/// keyword scores are unbounded and are max-normalised first. Sorted by
/// fused score, ties broken by chunk key for determinism.
fn fuse(semantic: Vec<IndexHit>, keyword: Vec<IndexHit>, weights: FusionWeights) -> Vec<Candidate> {
    let keyword_scores = max_normalized(&keyword);
    let mut merged: HashMap<ChunkKey, Candidate> = HashMap::new();

    for hit in semantic {
        let score = clamp_unit(hit.score);
        merged
            .entry(hit.key())
            .and_modify(|c| c.semantic = c.semantic.max(score))
            .or_insert(Candidate {
                hit,
                semantic: score,
                keyword: 0.0,
                fused: 0.0,
            });
    }

    for (hit, score) in keyword.into_iter().zip(keyword_scores) {
        merged
            .entry(hit.key())
            .and_modify(|c| c.keyword = c.keyword.max(score))
            .or_insert(Candidate {
                hit,
                semantic: 0.0,
                keyword: score,
                fused: 0.0,
            });
    }

    let mut candidates: Vec<Candidate> = merged
        .into_values()
        .map(|mut c| {
            c.fused = clamp_unit(weights.semantic * c.semantic + weights.keyword * c.keyword);
            c
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.fused
            .partial_cmp(&a.fused)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.hit.key().cmp(&b.hit.key()))
    });
    candidates
}
