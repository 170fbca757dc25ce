//! Scored excerpts retrieved from a production.

use serde::{Deserialize, Serialize};

/// Identity of a chunk within a production index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkKey {
    pub document_id: String,
    pub chunk_index: u32,
}

/// A scored excerpt from a produced document.
///
/// Owned by the analysis of a single request and copied by value into the
/// final report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceChunk {
    pub document_id: String,
    pub chunk_index: u32,
    pub chunk_text: String,
    pub page_number: Option<u32>,
    /// Relevance to the request, in `[0, 1]`.
    pub relevance_score: f32,
}

impl EvidenceChunk {
    pub fn key(&self) -> ChunkKey {
        ChunkKey {
            document_id: self.document_id.clone(),
            chunk_index: self.chunk_index,
        }
    }

    /// Stable identifier shown to the classification model: `doc#chunk`.
    pub fn evidence_id(&self) -> String {
        format!("{}#{}", self.document_id, self.chunk_index)
    }
}

/// Clamp a score into `[0, 1]`, mapping NaN to 0.
pub fn clamp_unit(score: f32) -> f32 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}
