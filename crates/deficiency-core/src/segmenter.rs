//! Alignment of opposing counsel's written responses with request items.
//!
//! Responses are located with the same numbering markers as requests. A
//! response document usually restates each request and follows it with the
//! answer, so for each number the most specific segment wins:
//!
//! 1. a block under a "RESPONSE TO REQUEST NO. n" marker,
//! 2. the text after a "RESPONSE:" label inside a "REQUEST NO. n" block,
//! 3. the bare "REQUEST NO. n" block, minus any restated request text.
//!
//! Requests with no segment map to an empty string; that is a recorded
//! outcome ("no response provided"), never an error.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::parser::{find_markers, normalize_whitespace, truncate_at_terminator};
use crate::request::RequestItem;

static RESPONSE_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t]*(?:response|answer)[ \t]*:").expect("label pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Specificity {
    Bare,
    Labelled,
    Marked,
}

/// Response text per request number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseSegments {
    by_number: HashMap<String, String>,
}

impl ResponseSegments {
    /// The response for a request, or `""` when none was found.
    pub fn get(&self, number: &str) -> &str {
        self.by_number.get(number).map_or("", String::as_str)
    }

    /// Whether a non-empty response was found for this request.
    pub fn has_response(&self, number: &str) -> bool {
        !self.get(number).is_empty()
    }

    /// Number of requests with a non-empty response.
    pub fn matched(&self) -> usize {
        self.by_number.values().filter(|s| !s.is_empty()).count()
    }

    pub fn into_map(self) -> HashMap<String, String> {
        self.by_number
    }
}

/// Drop a restated request from the front of a bare block.
fn strip_restated<'a>(segment: &'a str, request_text: &str) -> &'a str {
    if request_text.is_empty() {
        return segment;
    }
    match segment.strip_prefix(request_text) {
        Some(rest) => rest.trim_start(),
        None => segment,
    }
}

/// Map every request number to the response text addressing it.
///
/// The returned map has an entry for each item, empty when unmatched.
/// Response segments for numbers not present in `items` are ignored.
pub fn segment_responses(items: &[RequestItem], response_text: &str) -> ResponseSegments {
    let markers = find_markers(response_text);
    let mut best: HashMap<String, (Specificity, String)> = HashMap::new();

    for (i, marker) in markers.iter().enumerate() {
        let Some(number) = &marker.number else {
            continue;
        };
        let Some(item) = items.iter().find(|item| &item.number == number) else {
            debug!(number = %number, "response segment for unknown request");
            continue;
        };

        let block_end = markers
            .get(i + 1)
            .map_or(response_text.len(), |next| next.start);
        let block = truncate_at_terminator(&response_text[marker.end..block_end]);

        let (specificity, segment) = if marker.is_response {
            (Specificity::Marked, normalize_whitespace(block))
        } else if let Some(label) = RESPONSE_LABEL.find(block) {
            (Specificity::Labelled, normalize_whitespace(&block[label.end()..]))
        } else {
            let normalized = normalize_whitespace(block);
            let stripped = strip_restated(&normalized, &item.text).to_string();
            (Specificity::Bare, stripped)
        };

        match best.get(number) {
            Some((existing, _)) if *existing >= specificity => {}
            _ => {
                best.insert(number.clone(), (specificity, segment));
            }
        }
    }

    let by_number = items
        .iter()
        .map(|item| {
            let segment = best
                .remove(&item.number)
                .map(|(_, text)| text)
                .unwrap_or_default();
            (item.number.clone(), segment)
        })
        .collect();

    ResponseSegments { by_number }
}
