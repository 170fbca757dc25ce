//! In-process chunk index for local runs and tests.
//!
//! "Semantic" search here is bag-of-words cosine similarity; keyword search
//! scores the fraction of distinct query terms a chunk contains. Neither is
//! a substitute for a real embedding index, but both honour the
//! `VectorIndex` contract: per-production scoping, descending scores,
//! deterministic ties.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{IndexHit, RetrievalError, StoreError, VectorIndex};

const STOP_WORDS: &[&str] = &[
    "a", "all", "an", "and", "any", "are", "as", "at", "be", "by", "for", "from", "in", "is", "it",
    "of", "on", "or", "that", "the", "this", "to", "with", "your",
];

/// A chunk as supplied to the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub document_id: String,
    pub chunk_index: u32,
    pub chunk_text: String,
    #[serde(default)]
    pub page_number: Option<u32>,
}

#[derive(Debug)]
struct Entry {
    chunk: IndexedChunk,
    terms: HashMap<String, f32>,
    norm: f32,
}

impl Entry {
    fn new(chunk: IndexedChunk) -> Self {
        let terms = term_frequencies(&chunk.chunk_text);
        let norm = terms.values().map(|v| v * v).sum::<f32>().sqrt();
        Self { chunk, terms, norm }
    }

    fn hit(&self, score: f32) -> IndexHit {
        IndexHit {
            document_id: self.chunk.document_id.clone(),
            chunk_index: self.chunk.chunk_index,
            chunk_text: self.chunk.chunk_text.clone(),
            page_number: self.chunk.page_number,
            score,
        }
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
}

fn term_frequencies(text: &str) -> HashMap<String, f32> {
    let mut tf = HashMap::new();
    for token in tokens(text) {
        *tf.entry(token).or_insert(0.0) += 1.0;
    }
    tf
}

fn rank(mut hits: Vec<IndexHit>, limit: usize) -> Vec<IndexHit> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.key().cmp(&b.key()))
    });
    hits.truncate(limit);
    hits
}

/// Chunk index held in memory, keyed by production id.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    productions: RwLock<HashMap<String, Vec<Entry>>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add chunks to a production. A chunk with an existing
    /// `(document_id, chunk_index)` replaces the old one.
    pub fn add_chunks(
        &self,
        production_id: &str,
        chunks: impl IntoIterator<Item = IndexedChunk>,
    ) -> Result<usize, StoreError> {
        let mut productions = self
            .productions
            .write()
            .map_err(|_| StoreError::Other("index lock poisoned".into()))?;
        let entries = productions.entry(production_id.to_string()).or_default();
        let mut added = 0;
        for chunk in chunks {
            entries.retain(|e| {
                e.chunk.document_id != chunk.document_id || e.chunk.chunk_index != chunk.chunk_index
            });
            entries.push(Entry::new(chunk));
            added += 1;
        }
        Ok(added)
    }

    /// Load a JSON array of chunks into a production.
    pub async fn load_json_file(
        &self,
        production_id: &str,
        path: impl AsRef<Path>,
    ) -> Result<usize, StoreError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let chunks: Vec<IndexedChunk> = serde_json::from_slice(&bytes)?;
        let added = self.add_chunks(production_id, chunks)?;
        info!(production_id, path = %path.display(), chunks = added, "loaded chunk index");
        Ok(added)
    }

    /// Number of chunks indexed for a production.
    pub fn len(&self, production_id: &str) -> usize {
        self.productions
            .read()
            .map(|p| p.get(production_id).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    fn search_with<F>(
        &self,
        production_id: &str,
        limit: usize,
        score: F,
    ) -> Result<Vec<IndexHit>, RetrievalError>
    where
        F: Fn(&Entry) -> f32,
    {
        let productions = self
            .productions
            .read()
            .map_err(|_| RetrievalError::Unavailable("index lock poisoned".into()))?;
        let Some(entries) = productions.get(production_id) else {
            return Ok(Vec::new());
        };
        let hits = entries
            .iter()
            .filter_map(|e| {
                let s = score(e);
                (s > 0.0).then(|| e.hit(s))
            })
            .collect();
        Ok(rank(hits, limit))
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn semantic_search(
        &self,
        production_id: &str,
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<IndexHit>, RetrievalError> {
        let query = term_frequencies(query_text);
        let query_norm = query.values().map(|v| v * v).sum::<f32>().sqrt();
        if query_norm == 0.0 {
            return Ok(Vec::new());
        }
        self.search_with(production_id, limit, |entry| {
            if entry.norm == 0.0 {
                return 0.0;
            }
            let dot: f32 = query
                .iter()
                .filter_map(|(term, q)| entry.terms.get(term).map(|c| q * c))
                .sum();
            dot / (query_norm * entry.norm)
        })
    }

    async fn keyword_search(
        &self,
        production_id: &str,
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<IndexHit>, RetrievalError> {
        let terms: HashSet<String> = tokens(query_text).collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        self.search_with(production_id, limit, |entry| {
            let matched = terms.iter().filter(|t| entry.terms.contains_key(*t)).count();
            matched as f32 / terms.len() as f32
        })
    }
}
