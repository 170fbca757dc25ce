//! Compliance classification for a single request.
//!
//! A deterministic pre-check handles the "no responsive documents" case
//! without a model call; everything else goes through the model and is
//! validated on the way back.

use std::sync::Arc;

use deficiency_core::{Classification, ClassificationResult, EvidenceChunk, RequestItem};
use thiserror::Error;
use tracing::debug;

use crate::model::{ClassificationModel, ModelError};
use crate::output::{ValidationError, parse_model_output};
use crate::prompt::build_request;

pub const NO_RESPONSIVE_RATIONALE: &str = "opposing counsel asserts no responsive documents";
pub const NO_RESPONSE_NOTE: &str = "No response provided by opposing counsel.";

/// Phrases that count as an assertion of no responsive documents.
pub const DEFAULT_NO_RESPONSIVE_PHRASES: &[&str] = &[
    "no responsive documents",
    "no documents responsive",
    "no responsive records",
    "no non-privileged responsive documents",
    "no such documents",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierConfig {
    /// Confidence assigned by the no-responsive-documents fast path.
    pub no_responsive_confidence: f32,
    /// Matched case-insensitively as substrings of the response.
    pub no_responsive_phrases: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            no_responsive_confidence: 0.9,
            no_responsive_phrases: DEFAULT_NO_RESPONSIVE_PHRASES
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ClassifyError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("model output failed validation: {0}")]
    Validation(#[from] ValidationError),
}

impl ClassifyError {
    /// Whether another attempt may succeed. Validation failures are
    /// retried too: model output is not deterministic.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Model(e) => e.is_retryable(),
            Self::Validation(_) => true,
        }
    }

    /// The `needs_review` placeholder recorded once attempts are exhausted.
    pub fn into_needs_review(self) -> ClassificationResult {
        ClassificationResult::needs_review(match self {
            Self::Validation(e) => format!("model output failed validation: {e}"),
            Self::Model(e) => format!("classification model unavailable: {e}"),
        })
    }
}

pub struct ComplianceClassifier {
    model: Arc<dyn ClassificationModel>,
    config: ClassifierConfig,
}

impl ComplianceClassifier {
    pub fn new(model: Arc<dyn ClassificationModel>) -> Self {
        Self::with_config(model, ClassifierConfig::default())
    }

    pub fn with_config(model: Arc<dyn ClassificationModel>, config: ClassifierConfig) -> Self {
        let no_responsive_phrases = config
            .no_responsive_phrases
            .iter()
            .map(|p| p.to_lowercase())
            .collect();
        Self {
            model,
            config: ClassifierConfig {
                no_responsive_phrases,
                ..config
            },
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Whether the response asserts there are no responsive documents.
    pub fn asserts_no_responsive(&self, response_text: &str) -> bool {
        let lowered = response_text.to_lowercase();
        self.config
            .no_responsive_phrases
            .iter()
            .any(|p| lowered.contains(p.as_str()))
    }

    /// The fast-path result, if the response qualifies for it.
    pub fn precheck(&self, response_text: &str) -> Option<ClassificationResult> {
        if !self.asserts_no_responsive(response_text) {
            return None;
        }
        let confidence = self.config.no_responsive_confidence.clamp(0.0, 1.0);
        ClassificationResult::new(
            Classification::NoResponsiveDocs,
            confidence,
            NO_RESPONSIVE_RATIONALE,
            Vec::new(),
        )
        .ok()
    }

    /// Classify one request against its response and retrieved evidence.
    ///
    /// A single attempt: the caller owns retries and timeouts.
    pub async fn classify(
        &self,
        request: &RequestItem,
        response_text: &str,
        evidence: &[EvidenceChunk],
    ) -> Result<ClassificationResult, ClassifyError> {
        if let Some(result) = self.precheck(response_text) {
            debug!(request_number = %request.number, "no-responsive-documents fast path");
            return Ok(result);
        }

        let model_request = build_request(request, response_text, evidence);
        let response = self.model.generate(&model_request).await?;
        debug!(
            request_number = %request.number,
            model = self.model.name(),
            tokens = response.tokens_used,
            "model responded"
        );

        let result = parse_model_output(&response.text, evidence)?;
        if response_text.trim().is_empty() {
            return Ok(with_no_response_note(result));
        }
        Ok(result)
    }
}

/// Prefix the rationale to distinguish "no response" from "no responsive
/// documents".
fn with_no_response_note(result: ClassificationResult) -> ClassificationResult {
    let rationale = format!("{NO_RESPONSE_NOTE} {}", result.rationale());
    ClassificationResult::new(
        result.classification(),
        result.confidence(),
        rationale,
        result.evidence().to_vec(),
    )
    .unwrap_or(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelRequest, ModelResponse};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedModel {
        reply: Result<String, ModelError>,
        seen: Mutex<Vec<ModelRequest>>,
    }

    impl ScriptedModel {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(text.to_string()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ClassificationModel for ScriptedModel {
        async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
            self.seen.lock().unwrap().push(request.clone());
            self.reply.clone().map(|text| ModelResponse {
                text,
                tokens_used: 42,
            })
        }
    }

    fn evidence() -> Vec<EvidenceChunk> {
        vec![
            EvidenceChunk {
                document_id: "MSA-2023".into(),
                chunk_index: 0,
                chunk_text: "Master services agreement dated March 1, 2023".into(),
                page_number: Some(1),
                relevance_score: 0.92,
            },
            EvidenceChunk {
                document_id: "SOW-2023".into(),
                chunk_index: 4,
                chunk_text: "Statement of work executed June 2023".into(),
                page_number: Some(2),
                relevance_score: 0.88,
            },
        ]
    }

    #[tokio::test]
    async fn no_responsive_phrase_skips_the_model() {
        let model = ScriptedModel::replying("unused");
        let classifier = ComplianceClassifier::new(model.clone());
        let request = RequestItem::new("2", "All invoices.");

        let result = classifier
            .classify(
                &request,
                "No Responsive Documents exist for this request.",
                &evidence(),
            )
            .await
            .unwrap();
        assert_eq!(result.classification(), Classification::NoResponsiveDocs);
        assert_eq!(result.confidence(), 0.9);
        assert!(result.evidence().is_empty());
        assert_eq!(result.rationale(), NO_RESPONSIVE_RATIONALE);
        assert!(model.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn model_sees_all_evidence() {
        let model = ScriptedModel::replying(
            r#"{"classification":"fully_produced","confidence":0.85,
                "rationale":"Both 2023 contracts are present.","evidence_ids":["MSA-2023#0","SOW-2023#4"]}"#,
        );
        let classifier = ComplianceClassifier::new(model.clone());
        let request = RequestItem::new("1", "All contracts from 2023");

        let result = classifier
            .classify(&request, "See attached", &evidence())
            .await
            .unwrap();
        assert_eq!(result.classification(), Classification::FullyProduced);
        assert_eq!(result.evidence().len(), 2);

        let seen = model.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].user_prompt.contains("[MSA-2023#0]"));
        assert!(seen[0].user_prompt.contains("[SOW-2023#4]"));
    }

    #[tokio::test]
    async fn empty_response_is_noted_in_rationale() {
        let model = ScriptedModel::replying(
            r#"{"classification":"not_produced","confidence":0.6,"rationale":"Nothing matches."}"#,
        );
        let classifier = ComplianceClassifier::new(model);
        let result = classifier
            .classify(&RequestItem::new("3", "Ledger."), "", &[])
            .await
            .unwrap();
        assert_eq!(
            result.rationale(),
            "No response provided by opposing counsel. Nothing matches."
        );
    }

    #[tokio::test]
    async fn invalid_output_is_a_retryable_validation_error() {
        let model =
            ScriptedModel::replying(r#"{"classification":"fully_produced","confidence":7}"#);
        let classifier = ComplianceClassifier::new(model);
        let err = classifier
            .classify(&RequestItem::new("1", "x"), "See attached", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifyError::Validation(_)));
        assert!(err.is_retryable());

        let fallback = err.into_needs_review();
        assert_eq!(fallback.classification(), Classification::NeedsReview);
        assert_eq!(fallback.confidence(), 0.0);
        assert!(fallback.rationale().contains("validation"));
    }

    #[tokio::test]
    async fn model_errors_pass_through() {
        let model = Arc::new(ScriptedModel {
            reply: Err(ModelError::Timeout),
            seen: Mutex::new(Vec::new()),
        });
        let classifier = ComplianceClassifier::new(model);
        let err = classifier
            .classify(&RequestItem::new("1", "x"), "See attached", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifyError::Model(ModelError::Timeout)));
    }

    #[test]
    fn configured_phrases_are_case_insensitive() {
        let config = ClassifierConfig {
            no_responsive_confidence: 0.75,
            no_responsive_phrases: vec!["Nothing To Produce".into()],
        };
        let classifier = ComplianceClassifier::with_config(ScriptedModel::replying(""), config);
        let result = classifier
            .precheck("Responding party has NOTHING TO PRODUCE.")
            .unwrap();
        assert_eq!(result.confidence(), 0.75);
        assert!(classifier.precheck("no responsive documents").is_none());
    }
}
