//! Events emitted while a session runs.
//!
//! Transport-neutral: the orchestrator writes these to a channel and any
//! number of adapters (websocket, CLI, audit log) consume them. Events for
//! one request arrive in stage order; events across requests do not.

use serde::{Deserialize, Serialize};

use crate::classification::Classification;
use crate::report::SummaryStatistics;
use crate::session::{ItemErrorKind, ItemStage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AnalysisEvent {
    AnalysisStarted {
        session_id: String,
        production_id: String,
        total_requests: usize,
    },
    ItemProgress {
        session_id: String,
        request_number: String,
        stage: ItemStage,
    },
    ItemAnalyzed {
        session_id: String,
        request_number: String,
        classification: Classification,
        confidence: f32,
        /// `"current/total"`.
        progress: String,
    },
    ItemError {
        session_id: String,
        request_number: String,
        error_kind: ItemErrorKind,
    },
    AnalysisCompleted {
        session_id: String,
        report_id: String,
        summary_statistics: SummaryStatistics,
    },
    AnalysisCancelled {
        session_id: String,
        report_id: String,
        summary_statistics: SummaryStatistics,
    },
    AnalysisFailed {
        session_id: String,
        reason: String,
    },
}

impl AnalysisEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::AnalysisStarted { session_id, .. }
            | Self::ItemProgress { session_id, .. }
            | Self::ItemAnalyzed { session_id, .. }
            | Self::ItemError { session_id, .. }
            | Self::AnalysisCompleted { session_id, .. }
            | Self::AnalysisCancelled { session_id, .. }
            | Self::AnalysisFailed { session_id, .. } => session_id,
        }
    }

    /// Request the event concerns, for per-item events.
    pub fn request_number(&self) -> Option<&str> {
        match self {
            Self::ItemProgress { request_number, .. }
            | Self::ItemAnalyzed { request_number, .. }
            | Self::ItemError { request_number, .. } => Some(request_number),
            _ => None,
        }
    }

    /// True for the last event a session emits.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::AnalysisCompleted { .. }
                | Self::AnalysisCancelled { .. }
                | Self::AnalysisFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_match_event_contract() {
        let event = AnalysisEvent::ItemAnalyzed {
            session_id: "s-1".into(),
            request_number: "3".into(),
            classification: Classification::PartiallyProduced,
            confidence: 0.75,
            progress: "2/5".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "item_analyzed");
        assert_eq!(json["classification"], "partially_produced");
        assert_eq!(json["progress"], "2/5");
        assert_eq!(event.request_number(), Some("3"));
        assert!(!event.is_terminal());
    }

    #[test]
    fn item_error_carries_kind() {
        let event = AnalysisEvent::ItemError {
            session_id: "s-1".into(),
            request_number: "4".into(),
            error_kind: ItemErrorKind::Retrieval,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "item_error");
        assert_eq!(json["error_kind"], "retrieval");
    }
}
