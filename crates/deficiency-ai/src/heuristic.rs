//! Offline stand-in for the classification model.
//!
//! Classifies from evidence coverage alone: how many excerpts were
//! retrieved and how strong the best one is. It produces the same JSON a
//! real model would, so the full validation path is exercised on dry runs.

use async_trait::async_trait;
use serde_json::json;

use crate::model::{ClassificationModel, ModelError, ModelRequest, ModelResponse};

const STRONG: f32 = 0.6;
const WEAK: f32 = 0.3;
const MIN_STRONG_CHUNKS: usize = 2;

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicModel;

impl HeuristicModel {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ClassificationModel for HeuristicModel {
    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        let strong: Vec<&str> = request
            .evidence
            .iter()
            .filter(|e| e.relevance_score >= STRONG)
            .map(|e| e.id.as_str())
            .collect();
        let best = request
            .evidence
            .iter()
            .map(|e| e.relevance_score)
            .fold(0.0f32, f32::max);

        let (classification, confidence, rationale, cited): (&str, f32, String, Vec<&str>) =
            if strong.len() >= MIN_STRONG_CHUNKS {
                (
                    "fully_produced",
                    0.5,
                    format!("{} strongly matching excerpts were produced.", strong.len()),
                    strong,
                )
            } else if best >= WEAK {
                let cited = request
                    .evidence
                    .iter()
                    .filter(|e| e.relevance_score >= WEAK)
                    .map(|e| e.id.as_str())
                    .collect();
                (
                    "partially_produced",
                    0.4,
                    format!("Best excerpt relevance is {best:.2}; coverage looks incomplete."),
                    cited,
                )
            } else {
                (
                    "not_produced",
                    0.4,
                    "No retrieved excerpt is meaningfully relevant.".to_string(),
                    Vec::new(),
                )
            };

        let text = json!({
            "classification": classification,
            "confidence": confidence,
            "rationale": format!("Heuristic: {rationale}"),
            "evidence_ids": cited,
        })
        .to_string();
        Ok(ModelResponse {
            text,
            tokens_used: 0,
        })
    }

    fn name(&self) -> &str {
        "heuristic"
    }
}
