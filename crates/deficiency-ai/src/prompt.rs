//! Prompt templates for compliance classification.

use deficiency_core::{EvidenceChunk, RequestItem};

use crate::model::{EvidenceRef, ModelRequest};

/// Chunk text beyond this many characters is elided in the prompt.
const MAX_CHUNK_CHARS: usize = 1_500;
const MAX_TOKENS: u32 = 1_024;

pub const SYSTEM_PROMPT: &str = "\
You are a litigation support analyst reviewing a document production for discovery compliance.

Given one request from a Request to Produce, opposing counsel's written response to it, and \
excerpts retrieved from the documents actually produced, decide whether the production satisfies \
the request.

Respond ONLY with a JSON object. No markdown fences, no explanation, just raw JSON:
{
  \"classification\": one of \"fully_produced\", \"partially_produced\", \"not_produced\", \"needs_review\",
  \"confidence\": a number between 0 and 1,
  \"rationale\": \"one or two sentences explaining the decision\",
  \"evidence_ids\": [\"ids of the excerpts you relied on, exactly as given\"]
}

Use \"fully_produced\" only when the excerpts show documents covering every part of the request.
Use \"partially_produced\" when some responsive material is present but categories, date ranges \
or custodians are missing.
Use \"not_produced\" when nothing in the excerpts is responsive.
Use \"needs_review\" when the excerpts are ambiguous or the response raises objections that need \
an attorney's judgement.
Cite only excerpt ids that appear below.";

fn elide(text: &str) -> &str {
    match text.char_indices().nth(MAX_CHUNK_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn build_user_prompt(
    request: &RequestItem,
    response_text: &str,
    evidence: &[EvidenceChunk],
) -> String {
    let mut prompt = format!("Request No. {}:\n{}\n", request.number, request.text);
    if let Some(category) = &request.category {
        prompt.push_str(&format!("Category: {category}\n"));
    }

    prompt.push_str("\nOpposing counsel's response:\n");
    if response_text.trim().is_empty() {
        prompt.push_str("(no response provided)\n");
    } else {
        prompt.push_str(response_text);
        prompt.push('\n');
    }

    prompt.push_str("\nProduced document excerpts:\n");
    if evidence.is_empty() {
        prompt.push_str("(no excerpts retrieved)\n");
    }
    for chunk in evidence {
        let page = chunk
            .page_number
            .map(|p| format!(", page {p}"))
            .unwrap_or_default();
        let text = elide(&chunk.chunk_text);
        let ellipsis = if text.len() < chunk.chunk_text.len() { " ..." } else { "" };
        prompt.push_str(&format!(
            "[{id}] (relevance {score:.2}{page})\n{text}{ellipsis}\n\n",
            id = chunk.evidence_id(),
            score = chunk.relevance_score,
        ));
    }
    prompt
}

pub fn build_request(
    request: &RequestItem,
    response_text: &str,
    evidence: &[EvidenceChunk],
) -> ModelRequest {
    ModelRequest {
        system_prompt: SYSTEM_PROMPT.to_string(),
        user_prompt: build_user_prompt(request, response_text, evidence),
        max_tokens: MAX_TOKENS,
        temperature: 0.0,
        evidence: evidence
            .iter()
            .map(|c| EvidenceRef {
                id: c.evidence_id(),
                relevance_score: c.relevance_score,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(doc: &str, idx: u32, text: &str) -> EvidenceChunk {
        EvidenceChunk {
            document_id: doc.into(),
            chunk_index: idx,
            chunk_text: text.into(),
            page_number: Some(3),
            relevance_score: 0.82,
        }
    }

    #[test]
    fn prompt_lists_evidence_ids() {
        let request = RequestItem::new("4", "All contracts from 2023.").with_category("CONTRACTS");
        let prompt = build_user_prompt(
            &request,
            "See attached.",
            &[chunk("MSA", 0, "Master services agreement")],
        );
        assert!(prompt.starts_with("Request No. 4:\nAll contracts from 2023.\n"));
        assert!(prompt.contains("Category: CONTRACTS"));
        assert!(prompt.contains("[MSA#0] (relevance 0.82, page 3)"));
        assert!(prompt.contains("See attached."));
    }

    #[test]
    fn empty_response_and_evidence_are_explicit() {
        let prompt = build_user_prompt(&RequestItem::new("1", "Ledgers."), "  ", &[]);
        assert!(prompt.contains("(no response provided)"));
        assert!(prompt.contains("(no excerpts retrieved)"));
    }

    #[test]
    fn long_chunks_are_elided() {
        let long = "é".repeat(MAX_CHUNK_CHARS + 10);
        let prompt = build_user_prompt(&RequestItem::new("1", "x"), "y", &[chunk("D", 0, &long)]);
        assert!(prompt.contains(" ..."));
        assert!(!prompt.contains(&long));
    }

    #[test]
    fn request_carries_evidence_refs() {
        let request = build_request(
            &RequestItem::new("1", "x"),
            "y",
            &[chunk("A", 0, "a"), chunk("B", 2, "b")],
        );
        let ids: Vec<&str> = request.evidence.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["A#0", "B#2"]);
        assert_eq!(request.temperature, 0.0);
    }
}
