//! Discovery request items extracted from a Request to Produce.

use serde::{Deserialize, Serialize};

use crate::numbering;

/// One numbered request from a Request to Produce.
///
/// Produced once by [`parse_requests`](crate::parse_requests); never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestItem {
    /// Canonical request number ("7", "7a", "3.2"), unique within a document.
    pub number: String,
    pub text: String,
    /// Heading the request was filed under, if the document had one.
    pub category: Option<String>,
}

impl RequestItem {
    pub fn new(number: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            text: text.into(),
            category: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Lexicographic key recovering document order from the number alone.
    pub fn sort_key(&self) -> String {
        numbering::sort_key(&self.number)
    }
}

/// Why a candidate request block was dropped during parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseWarningKind {
    /// Marker found but no usable number followed it.
    MissingNumber,
    /// Number already used by an earlier request; the first one wins.
    DuplicateNumber,
    /// Marker with no request text after it.
    EmptyBody,
}

/// A non-fatal problem encountered while extracting requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseWarning {
    pub kind: ParseWarningKind,
    /// Byte offset of the offending marker in the source text.
    pub offset: usize,
    /// First few words of the dropped block.
    pub excerpt: String,
}

/// Output of a successful parse: the extracted items plus anything dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedRequests {
    pub items: Vec<RequestItem>,
    pub warnings: Vec<ParseWarning>,
}

impl ParsedRequests {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, number: &str) -> Option<&RequestItem> {
        self.items.iter().find(|item| item.number == number)
    }
}
