//! Compliance classifications and the validated result type.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::evidence::EvidenceChunk;

/// Compliance status of a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    FullyProduced,
    PartiallyProduced,
    NotProduced,
    /// Opposing counsel asserts nothing responsive exists.
    NoResponsiveDocs,
    /// Could not be decided automatically; needs a human.
    NeedsReview,
}

impl Classification {
    pub const ALL: [Classification; 5] = [
        Self::FullyProduced,
        Self::PartiallyProduced,
        Self::NotProduced,
        Self::NoResponsiveDocs,
        Self::NeedsReview,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullyProduced => "fully_produced",
            Self::PartiallyProduced => "partially_produced",
            Self::NotProduced => "not_produced",
            Self::NoResponsiveDocs => "no_responsive_docs",
            Self::NeedsReview => "needs_review",
        }
    }

    /// Not fully satisfied by the production.
    pub fn is_deficient(&self) -> bool {
        matches!(self, Self::PartiallyProduced | Self::NotProduced)
    }

    /// Must be surfaced to a reviewer before the report is relied on.
    pub fn requires_attention(&self) -> bool {
        matches!(self, Self::NeedsReview)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown classification: {0:?}")]
pub struct UnknownClassification(pub String);

impl FromStr for Classification {
    type Err = UnknownClassification;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| UnknownClassification(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidResult {
    #[error("confidence {0} outside [0, 1]")]
    Confidence(f32),
    #[error("evidence {id} has relevance score {score} outside [0, 1]")]
    EvidenceScore { id: String, score: f32 },
}

/// A classification for one request, with the evidence it relied on.
///
/// Fields are private so that every instance has passed validation:
/// confidence and evidence scores are finite and within `[0, 1]`.
/// Reviewer edits never touch this value; see [`ItemRevision`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawClassificationResult")]
pub struct ClassificationResult {
    classification: Classification,
    confidence: f32,
    rationale: String,
    evidence: Vec<EvidenceChunk>,
}

#[derive(Deserialize)]
struct RawClassificationResult {
    classification: Classification,
    confidence: f32,
    rationale: String,
    #[serde(default)]
    evidence: Vec<EvidenceChunk>,
}

impl TryFrom<RawClassificationResult> for ClassificationResult {
    type Error = InvalidResult;

    fn try_from(raw: RawClassificationResult) -> Result<Self, Self::Error> {
        Self::new(raw.classification, raw.confidence, raw.rationale, raw.evidence)
    }
}

fn in_unit(v: f32) -> bool {
    (0.0..=1.0).contains(&v)
}

impl ClassificationResult {
    pub fn new(
        classification: Classification,
        confidence: f32,
        rationale: impl Into<String>,
        evidence: Vec<EvidenceChunk>,
    ) -> Result<Self, InvalidResult> {
        if !in_unit(confidence) {
            return Err(InvalidResult::Confidence(confidence));
        }
        if let Some(bad) = evidence.iter().find(|c| !in_unit(c.relevance_score)) {
            return Err(InvalidResult::EvidenceScore {
                id: bad.evidence_id(),
                score: bad.relevance_score,
            });
        }
        Ok(Self {
            classification,
            confidence,
            rationale: rationale.into(),
            evidence,
        })
    }

    /// `needs_review` with zero confidence and no evidence.
    pub fn needs_review(rationale: impl Into<String>) -> Self {
        Self {
            classification: Classification::NeedsReview,
            confidence: 0.0,
            rationale: rationale.into(),
            evidence: Vec::new(),
        }
    }

    pub fn classification(&self) -> Classification {
        self.classification
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn rationale(&self) -> &str {
        &self.rationale
    }

    pub fn evidence(&self) -> &[EvidenceChunk] {
        &self.evidence
    }
}

/// A reviewer's edit to a report item, tracked apart from the AI result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRevision {
    /// Replacement classification; `None` for a note-only revision.
    pub classification: Option<Classification>,
    pub reviewer_notes: String,
    pub modified_by: String,
    pub modified_at: DateTime<Utc>,
}

impl ItemRevision {
    pub fn new(
        classification: Option<Classification>,
        reviewer_notes: impl Into<String>,
        modified_by: impl Into<String>,
    ) -> Self {
        Self {
            classification,
            reviewer_notes: reviewer_notes.into(),
            modified_by: modified_by.into(),
            modified_at: Utc::now(),
        }
    }
}
