//! Heuristic extraction of numbered requests from Request to Produce text.
//!
//! Text is cut into blocks at numbering markers ("REQUEST NO. 4:", "Request
//! for Production No. 4", "RFP 4", "RTP No. 4"). Each block's body becomes a
//! request. Blocks that cannot be numbered are dropped with a warning;
//! extraction only fails when nothing at all can be identified.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::numbering::canonical_number;
use crate::request::{ParseWarning, ParseWarningKind, ParsedRequests, RequestItem};

const EXCERPT_WORDS: usize = 12;
const HEADING_MAX_WORDS: usize = 5;

/// `REQUEST [FOR PRODUCTION | TO PRODUCE] NO.` or `RFP` / `RTP`, optionally
/// preceded by `RESPONSE [TO]`, then an optional number and terminator.
static MARKER: LazyLock<Regex> = LazyLock::new(|| {
    let request = r"(?:request(?:[ \t]+for[ \t]+production|[ \t]+to[ \t]+produce)?[ \t]*(?:no\b\.?|number\b|#)|(?:rfp|rtp)\b\.?[ \t]*(?:(?:no\b\.?|#)[ \t]*)?)";
    let pattern = format!(
        r"(?im)^[ \t]*(?:(?P<resp>response(?:[ \t]+to)?[ \t]+){request}|(?P<resp_only>response)[ \t]*(?:no\b\.?|number\b|#)|{request})[ \t]*(?P<num>\d+(?:[a-z]\b|\([a-z]{{1,2}}\)|\(\d{{1,3}}\))?)?[ \t]*[:.)\-–—]?"
    );
    Regex::new(&pattern).expect("marker pattern is valid")
});

/// Lines that end the substantive part of a block: dates, signatures,
/// certificates of service.
static TERMINATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t]*(?:dated\b|respectfully submitted|certificate of service|/s/)")
        .expect("terminator pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("no request items found ({} candidate blocks dropped)", .warnings.len())]
    NoRequests { warnings: Vec<ParseWarning> },
}

/// A numbering marker located in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Marker {
    pub start: usize,
    pub end: usize,
    /// Canonical number, if one followed the marker.
    pub number: Option<String>,
    /// Marker was prefixed with "RESPONSE".
    pub is_response: bool,
}

pub(crate) fn find_markers(text: &str) -> Vec<Marker> {
    MARKER
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(Marker {
                start: whole.start(),
                end: whole.end(),
                number: caps
                    .name("num")
                    .and_then(|m| canonical_number(m.as_str())),
                is_response: caps.name("resp").is_some() || caps.name("resp_only").is_some(),
            })
        })
        .collect()
}

/// Cut a block at the first terminator line.
pub(crate) fn truncate_at_terminator(block: &str) -> &str {
    match TERMINATOR.find(block) {
        Some(m) => &block[..m.start()],
        None => block,
    }
}

/// Collapse all whitespace runs to single spaces.
pub(crate) fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn excerpt(s: &str) -> String {
    s.split_whitespace()
        .take(EXCERPT_WORDS)
        .collect::<Vec<_>>()
        .join(" ")
}

/// An all-caps line such as "FINANCIAL RECORDS" sitting above a request.
fn as_heading(line: &str) -> Option<String> {
    let line = line.trim().trim_end_matches(':').trim();
    let letters = line.chars().filter(|c| c.is_alphabetic()).count();
    if !(3..=80).contains(&line.len()) || letters < 3 {
        return None;
    }
    if line.chars().any(|c| c.is_lowercase()) || line.ends_with('.') {
        return None;
    }
    if line.to_uppercase().contains("REQUEST") {
        return None;
    }
    Some(line.to_string())
}

/// Split off a trailing heading line, returning `(body, heading)`.
///
/// The heading must stand apart from the body: either a blank line sits
/// between them, or the body ends in terminal punctuation and the heading
/// is short. Otherwise an all-caps body wrapped over several lines would
/// lose its last line.
fn split_trailing_heading(block: &str) -> (&str, Option<String>) {
    let trimmed = block.trim_end();
    let Some(pos) = trimmed.rfind('\n') else {
        return (block, None);
    };
    let (head, last) = (&trimmed[..pos], &trimmed[pos + 1..]);
    let body = head.trim_end();
    if body.is_empty() {
        return (block, None);
    }
    let blank_line_above = head[body.len()..].contains('\n');
    let body_ended = body.ends_with(['.', ';', '?', '!'])
        && last.split_whitespace().count() <= HEADING_MAX_WORDS;
    if !blank_line_above && !body_ended {
        return (block, None);
    }
    match as_heading(last) {
        Some(heading) => (head, Some(heading)),
        None => (block, None),
    }
}

/// Extract numbered requests from RTP text.
///
/// Items come back in document order with unique numbers. Unnumbered,
/// empty and duplicate blocks are dropped and reported as warnings. Fails
/// with [`ParseError::NoRequests`] only when no item survives.
pub fn parse_requests(text: &str) -> Result<ParsedRequests, ParseError> {
    let markers: Vec<Marker> = find_markers(text)
        .into_iter()
        .filter(|m| !m.is_response)
        .collect();

    let mut parsed = ParsedRequests::default();
    let mut seen: HashSet<String> = HashSet::new();

    // A heading directly above the first marker belongs to the first request.
    let mut pending_category = markers.first().and_then(|first| {
        text[..first.start]
            .trim_end()
            .lines()
            .last()
            .and_then(as_heading)
    });

    for (i, marker) in markers.iter().enumerate() {
        let block_end = markers.get(i + 1).map_or(text.len(), |next| next.start);
        let raw_block = &text[marker.end..block_end];

        let (block, next_category) = if i + 1 < markers.len() {
            split_trailing_heading(raw_block)
        } else {
            (raw_block, None)
        };
        let category = std::mem::replace(&mut pending_category, next_category);
        let body = normalize_whitespace(truncate_at_terminator(block));

        let warning_kind = match &marker.number {
            None => Some(ParseWarningKind::MissingNumber),
            Some(_) if body.is_empty() => Some(ParseWarningKind::EmptyBody),
            Some(number) if seen.contains(number) => Some(ParseWarningKind::DuplicateNumber),
            Some(_) => None,
        };

        if let Some(kind) = warning_kind {
            warn!(offset = marker.start, ?kind, "dropping request block");
            parsed.warnings.push(ParseWarning {
                kind,
                offset: marker.start,
                excerpt: excerpt(&text[marker.start..block_end]),
            });
            continue;
        }

        let Some(number) = marker.number.clone() else {
            continue;
        };
        seen.insert(number.clone());
        parsed.items.push(RequestItem {
            number,
            text: body,
            category,
        });
    }

    if parsed.items.is_empty() {
        return Err(ParseError::NoRequests {
            warnings: parsed.warnings,
        });
    }

    debug!(
        items = parsed.items.len(),
        warnings = parsed.warnings.len(),
        "parsed request document"
    );
    Ok(parsed)
}
