//! The classification model contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An evidence chunk as referenced in a prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub id: String,
    pub relevance_score: f32,
}

/// One generation request.
///
/// `evidence` lists the chunk ids embedded in `user_prompt`, so models that
/// support constrained output can restrict citations to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(default)]
    pub evidence: Vec<EvidenceRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Raw model output; expected to be a JSON object, validated by the caller.
    pub text: String,
    #[serde(default)]
    pub tokens_used: u32,
}

#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("model request timed out")]
    Timeout,
    #[error("model transport error: {0}")]
    Transport(String),
    #[error("model server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("model response was not valid JSON: {0}")]
    Json(String),
}

impl ModelError {
    /// Timeouts, connection failures, rate limits and 5xx responses.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Server { status, .. } => *status == 429 || *status >= 500,
            Self::Json(_) => false,
        }
    }
}

/// LLM or equivalent that turns a prompt into structured JSON text.
#[async_trait]
pub trait ClassificationModel: Send + Sync {
    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError>;

    /// Identifier recorded in logs.
    fn name(&self) -> &str {
        "model"
    }
}
