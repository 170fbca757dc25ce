//! Validation of raw model output into a `ClassificationResult`.
//!
//! Model output is never trusted: the classification must be one of the
//! four model-assignable values, confidence must lie in `[0, 1]`, and cited
//! evidence is intersected with what was actually supplied.

use deficiency_core::{Classification, ClassificationResult, EvidenceChunk};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("unparseable model output: {0}")]
    Unparseable(String),
    #[error("invalid classification {0:?}")]
    Classification(String),
    #[error("confidence {0} outside [0, 1]")]
    Confidence(f32),
    #[error("empty rationale")]
    EmptyRationale,
}

#[derive(Debug, Deserialize)]
struct ModelOutput {
    classification: String,
    confidence: f32,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    evidence_ids: Vec<String>,
}

/// Strip a surrounding markdown code fence, which models add despite
/// instructions.
fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Validate model output against the evidence it was shown.
///
/// Evidence is returned in the order supplied (retrieval order), not the
/// order cited. Unknown ids are dropped with a warning.
pub fn parse_model_output(
    text: &str,
    supplied: &[EvidenceChunk],
) -> Result<ClassificationResult, ValidationError> {
    let output: ModelOutput = serde_json::from_str(strip_fence(text)).map_err(|e| {
        let raw: String = text.chars().take(200).collect();
        ValidationError::Unparseable(format!("{e}; raw: {raw}"))
    })?;

    let classification: Classification = output
        .classification
        .parse()
        .map_err(|_| ValidationError::Classification(output.classification.clone()))?;
    if classification == Classification::NoResponsiveDocs {
        return Err(ValidationError::Classification(output.classification));
    }
    if !(0.0..=1.0).contains(&output.confidence) {
        return Err(ValidationError::Confidence(output.confidence));
    }
    let rationale = output.rationale.trim();
    if rationale.is_empty() {
        return Err(ValidationError::EmptyRationale);
    }

    for id in &output.evidence_ids {
        if !supplied.iter().any(|c| &c.evidence_id() == id) {
            warn!(evidence_id = %id, "model cited evidence that was not supplied, dropping");
        }
    }
    let evidence: Vec<EvidenceChunk> = supplied
        .iter()
        .filter(|c| output.evidence_ids.contains(&c.evidence_id()))
        .cloned()
        .collect();

    ClassificationResult::new(classification, output.confidence, rationale, evidence)
        .map_err(|e| ValidationError::Unparseable(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supplied() -> Vec<EvidenceChunk> {
        ["A", "B", "C"]
            .iter()
            .enumerate()
            .map(|(i, doc)| EvidenceChunk {
                document_id: doc.to_string(),
                chunk_index: 0,
                chunk_text: format!("text {i}"),
                page_number: None,
                relevance_score: 0.9 - i as f32 * 0.1,
            })
            .collect()
    }

    #[test]
    fn valid_output_keeps_supplied_order() {
        let text = r#"{"classification":"partially_produced","confidence":0.7,
            "rationale":"Only Q1 contracts present.","evidence_ids":["C#0","A#0"]}"#;
        let result = parse_model_output(text, &supplied()).unwrap();
        assert_eq!(result.classification(), Classification::PartiallyProduced);
        let ids: Vec<String> = result.evidence().iter().map(|c| c.evidence_id()).collect();
        assert_eq!(ids, ["A#0", "C#0"]);
    }

    #[test]
    fn fabricated_evidence_is_dropped() {
        let text = r#"{"classification":"fully_produced","confidence":0.95,
            "rationale":"All present.","evidence_ids":["B#0","Z#9"]}"#;
        let result = parse_model_output(text, &supplied()).unwrap();
        assert_eq!(result.evidence().len(), 1);
        assert_eq!(result.evidence()[0].document_id, "B");
    }

    #[test]
    fn fenced_output_is_accepted() {
        let text = "```json\n{\"classification\":\"not_produced\",\"confidence\":0.8,\"rationale\":\"Nothing.\"}\n```";
        let result = parse_model_output(text, &supplied()).unwrap();
        assert_eq!(result.classification(), Classification::NotProduced);
        assert!(result.evidence().is_empty());
    }

    #[test]
    fn rejects_invalid_output() {
        let cases = [
            ("not json", "Unparseable"),
            (
                r#"{"classification":"maybe","confidence":0.5,"rationale":"x"}"#,
                "Classification",
            ),
            (
                r#"{"classification":"no_responsive_docs","confidence":0.5,"rationale":"x"}"#,
                "Classification",
            ),
            (
                r#"{"classification":"not_produced","confidence":1.5,"rationale":"x"}"#,
                "Confidence",
            ),
            (
                r#"{"classification":"not_produced","confidence":0.5,"rationale":"  "}"#,
                "EmptyRationale",
            ),
        ];
        for (text, expected) in cases {
            let err = parse_model_output(text, &supplied()).unwrap_err();
            let kind = match err {
                ValidationError::Unparseable(_) => "Unparseable",
                ValidationError::Classification(_) => "Classification",
                ValidationError::Confidence(_) => "Confidence",
                ValidationError::EmptyRationale => "EmptyRationale",
            };
            assert_eq!(kind, expected, "input: {text}");
        }
    }

    #[test]
    fn strip_fence_variants() {
        assert_eq!(strip_fence("  {}  "), "{}");
        assert_eq!(strip_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_fence("```json\n{\"a\":1}```"), "{\"a\":1}");
    }
}
