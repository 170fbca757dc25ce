//! Deficiency report types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classification::{Classification, ClassificationResult, ItemRevision};
use crate::numbering::canonical_number;
use crate::request::RequestItem;
use crate::session::{ItemError, SessionStatus};

/// Per-classification counts. The five classification counts always sum to
/// the report's `total_requests`; `errored` is informational and is already
/// included in `needs_review`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryStatistics {
    pub fully_produced: usize,
    pub partially_produced: usize,
    pub not_produced: usize,
    pub no_responsive_docs: usize,
    pub needs_review: usize,
    pub errored: usize,
}

impl SummaryStatistics {
    pub fn record(&mut self, classification: Classification) {
        *self.count_mut(classification) += 1;
    }

    /// Count an errored item; it lands in `needs_review`.
    pub fn record_error(&mut self) {
        self.needs_review += 1;
        self.errored += 1;
    }

    pub fn count(&self, classification: Classification) -> usize {
        match classification {
            Classification::FullyProduced => self.fully_produced,
            Classification::PartiallyProduced => self.partially_produced,
            Classification::NotProduced => self.not_produced,
            Classification::NoResponsiveDocs => self.no_responsive_docs,
            Classification::NeedsReview => self.needs_review,
        }
    }

    fn count_mut(&mut self, classification: Classification) -> &mut usize {
        match classification {
            Classification::FullyProduced => &mut self.fully_produced,
            Classification::PartiallyProduced => &mut self.partially_produced,
            Classification::NotProduced => &mut self.not_produced,
            Classification::NoResponsiveDocs => &mut self.no_responsive_docs,
            Classification::NeedsReview => &mut self.needs_review,
        }
    }

    /// Sum across the five classifications.
    pub fn total(&self) -> usize {
        Classification::ALL.iter().map(|c| self.count(*c)).sum()
    }

    /// Requests not fully satisfied by the production.
    pub fn deficient(&self) -> usize {
        self.partially_produced + self.not_produced
    }
}

/// One request's line in a deficiency report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeficiencyItem {
    pub request: RequestItem,
    pub response_text: String,
    /// The AI-generated result; never edited after assembly.
    pub result: ClassificationResult,
    /// Set when the item errored and `result` is a placeholder.
    pub error: Option<ItemError>,
    #[serde(default)]
    pub revisions: Vec<ItemRevision>,
}

impl DeficiencyItem {
    /// The latest reviewer override, falling back to the AI classification.
    pub fn effective_classification(&self) -> Classification {
        self.revisions
            .iter()
            .rev()
            .find_map(|r| r.classification)
            .unwrap_or_else(|| self.result.classification())
    }

    pub fn requires_attention(&self) -> bool {
        self.error.is_some() || self.effective_classification().requires_attention()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeficiencyReport {
    pub report_id: String,
    pub session_id: String,
    pub production_id: String,
    /// Terminal status of the session the report was built from.
    pub status: SessionStatus,
    pub generated_at: DateTime<Utc>,
    pub total_requests: usize,
    pub summary_statistics: SummaryStatistics,
    /// In request parse order.
    pub items: Vec<DeficiencyItem>,
}

impl DeficiencyReport {
    fn position(&self, request_number: &str) -> Option<usize> {
        let key = canonical_number(request_number)?;
        self.items.iter().position(|i| i.request.number == key)
    }

    /// Look up an item by request number; "07" and "7" find the same item.
    pub fn item(&self, request_number: &str) -> Option<&DeficiencyItem> {
        self.position(request_number).map(|i| &self.items[i])
    }

    /// Append a reviewer revision to one item. Returns `false` if no item
    /// carries that request number.
    pub fn append_revision(&mut self, request_number: &str, revision: ItemRevision) -> bool {
        match self.position(request_number) {
            Some(i) => {
                self.items[i].revisions.push(revision);
                true
            }
            None => false,
        }
    }

    /// Items classified as partially or not produced, after reviewer edits.
    pub fn deficiencies(&self) -> impl Iterator<Item = &DeficiencyItem> {
        self.items
            .iter()
            .filter(|i| i.effective_classification().is_deficient())
    }
}
