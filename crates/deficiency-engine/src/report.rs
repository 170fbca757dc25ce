//! Turning a terminal session into a persisted `DeficiencyReport`.

use std::collections::HashSet;
use std::sync::Arc;

use deficiency_core::{
    AnalysisSession, ClassificationResult, DeficiencyItem, DeficiencyReport, ItemState,
    SummaryStatistics,
};
use deficiency_store::{ReportStore, SaveOutcome};
use tracing::{info, warn};

use crate::EngineError;

/// Deterministic, so every assembly of a session targets the same report.
pub fn report_id_for(session_id: &str) -> String {
    format!("report-{session_id}")
}

/// Build the report for a terminal session.
///
/// Items keep parse order. Errored items appear with a `needs_review`
/// placeholder and count toward both `needs_review` and `errored`. Items
/// without a terminal result (only possible after cancellation) are left
/// out. Evidence is limited to chunks the retriever returned for the item.
pub fn assemble(session: &AnalysisSession) -> Result<DeficiencyReport, EngineError> {
    if !session.status.is_terminal() {
        return Err(EngineError::NotTerminal {
            session_id: session.session_id.clone(),
            status: session.status,
        });
    }

    let mut stats = SummaryStatistics::default();
    let mut items = Vec::with_capacity(session.items.len());

    for item in &session.items {
        let (result, error) = match &item.state {
            ItemState::Done(result) => {
                let retrieved: HashSet<_> = item.retrieved.iter().collect();
                let kept: Vec<_> = result
                    .evidence()
                    .iter()
                    .filter(|c| retrieved.contains(&c.key()))
                    .cloned()
                    .collect();
                let result = if kept.len() == result.evidence().len() {
                    result.clone()
                } else {
                    warn!(
                        request_number = %item.request.number,
                        dropped = result.evidence().len() - kept.len(),
                        "dropping evidence not returned by retrieval"
                    );
                    ClassificationResult::new(
                        result.classification(),
                        result.confidence(),
                        result.rationale(),
                        kept,
                    )
                    .unwrap_or_else(|_| result.clone())
                };
                stats.record(result.classification());
                (result, None)
            }
            ItemState::Error(error) => {
                stats.record_error();
                let placeholder = ClassificationResult::needs_review(format!(
                    "{} error: {}",
                    error.kind.as_str(),
                    error.message
                ));
                (placeholder, Some(error.clone()))
            }
            ItemState::Queued | ItemState::Retrieving | ItemState::Classifying => continue,
        };
        items.push(DeficiencyItem {
            request: item.request.clone(),
            response_text: item.response_text.clone(),
            result,
            error,
            revisions: Vec::new(),
        });
    }

    Ok(DeficiencyReport {
        report_id: report_id_for(&session.session_id),
        session_id: session.session_id.clone(),
        production_id: session.production_id.clone(),
        status: session.status,
        generated_at: session.finished_at.unwrap_or(session.created_at),
        total_requests: items.len(),
        summary_statistics: stats,
        items,
    })
}

/// Assembles reports and persists each exactly once.
#[derive(Clone)]
pub struct ReportAssembler {
    store: Arc<dyn ReportStore>,
}

impl ReportAssembler {
    pub fn new(store: Arc<dyn ReportStore>) -> Self {
        Self { store }
    }

    /// Assemble and save. If the session's report was already saved, the
    /// stored copy (including any reviewer revisions) is returned instead.
    pub async fn persist(
        &self,
        session: &AnalysisSession,
    ) -> Result<DeficiencyReport, EngineError> {
        let report = assemble(session)?;
        match self.store.save(&report).await? {
            SaveOutcome::Created => {
                info!(
                    report_id = %report.report_id,
                    session_id = %report.session_id,
                    items = report.items.len(),
                    "report persisted"
                );
                Ok(report)
            }
            SaveOutcome::AlreadyExists => {
                let stored = self.store.load(&report.report_id).await?;
                if stored.session_id != report.session_id
                    || stored.production_id != report.production_id
                {
                    warn!(
                        report_id = %report.report_id,
                        session_id = %report.session_id,
                        stored_session = %stored.session_id,
                        "report id already taken by another session"
                    );
                    return Err(EngineError::ReportConflict {
                        report_id: report.report_id,
                        stored_session: stored.session_id,
                        stored_production: stored.production_id,
                    });
                }
                Ok(stored)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deficiency_core::{
        Classification, EvidenceChunk, ItemError, ItemErrorKind, RequestItem, SessionStatus,
    };
    use deficiency_store::MemoryReportStore;

    fn chunk(doc: &str) -> EvidenceChunk {
        EvidenceChunk {
            document_id: doc.into(),
            chunk_index: 0,
            chunk_text: "text".into(),
            page_number: None,
            relevance_score: 0.8,
        }
    }

    fn session() -> AnalysisSession {
        let mut session = AnalysisSession::new(
            "s-1",
            "prod-1",
            (1..=3).map(|n| {
                let request = RequestItem::new(n.to_string(), format!("Request {n}"));
                (request, String::new())
            }),
        );
        session.start();
        let result = ClassificationResult::new(
            Classification::FullyProduced,
            0.9,
            "ok",
            vec![chunk("A"), chunk("FAKE")],
        )
        .unwrap();
        session.record_done(0, result, vec![chunk("A").key()]);
        session.record_error(
            2,
            ItemError {
                kind: ItemErrorKind::Retrieval,
                message: "index unavailable".into(),
            },
            vec![],
        );
        session
    }

    #[test]
    fn refuses_active_sessions() {
        assert!(matches!(
            assemble(&session()),
            Err(EngineError::NotTerminal { .. })
        ));
    }

    #[test]
    fn cancelled_session_keeps_only_finished_items() {
        let mut session = session();
        session.cancel();
        let report = assemble(&session).unwrap();

        let numbers: Vec<&str> = report.items.iter().map(|i| i.request.number.as_str()).collect();
        assert_eq!(numbers, ["1", "3"]);
        assert_eq!(report.status, SessionStatus::Cancelled);
        assert_eq!(report.total_requests, 2);
        assert_eq!(report.summary_statistics.total(), report.total_requests);
        assert_eq!(report.summary_statistics.errored, 1);
    }

    #[test]
    fn evidence_is_limited_to_retrieved_chunks() {
        let mut session = session();
        session.cancel();
        let report = assemble(&session).unwrap();
        let evidence = report.items[0].result.evidence();
        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence[0].document_id, "A");
    }

    #[test]
    fn errored_items_become_needs_review_placeholders() {
        let mut session = session();
        session.record_done(
            1,
            ClassificationResult::needs_review("ambiguous"),
            vec![],
        );
        assert_eq!(session.finish(), SessionStatus::Completed);
        let report = assemble(&session).unwrap();

        let errored = report.item("3").unwrap();
        assert_eq!(errored.result.classification(), Classification::NeedsReview);
        assert!(errored.requires_attention());
        assert!(errored.result.rationale().contains("index unavailable"));
        assert_eq!(report.summary_statistics.needs_review, 2);
        assert_eq!(report.summary_statistics.total(), 3);
    }

    #[tokio::test]
    async fn persist_is_idempotent() {
        let mut session = session();
        session.record_done(1, ClassificationResult::needs_review("x"), vec![]);
        session.finish();

        let store = Arc::new(MemoryReportStore::new());
        let assembler = ReportAssembler::new(store.clone());
        let first = assembler.persist(&session).await.unwrap();
        let second = assembler.persist(&session).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first.summary_statistics).unwrap(),
            serde_json::to_string(&second.summary_statistics).unwrap()
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn persist_refuses_a_report_from_another_session() {
        let mut first = session();
        first.record_done(1, ClassificationResult::needs_review("x"), vec![]);
        first.finish();
        let mut moved = first.clone();
        moved.production_id = "prod-2".into();

        let store = Arc::new(MemoryReportStore::new());
        let assembler = ReportAssembler::new(store.clone());
        let saved = assembler.persist(&first).await.unwrap();

        match assembler.persist(&moved).await {
            Err(EngineError::ReportConflict {
                report_id,
                stored_production,
                ..
            }) => {
                assert_eq!(report_id, saved.report_id);
                assert_eq!(stored_production, "prod-1");
            }
            other => panic!("expected a report conflict, got {other:?}"),
        }
        let stored = store.load(&saved.report_id).await.unwrap();
        assert_eq!(stored.production_id, "prod-1");
    }
}
