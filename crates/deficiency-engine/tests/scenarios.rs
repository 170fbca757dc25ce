//! End-to-end analysis scenarios against scripted collaborators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use deficiency_ai::{ClassificationModel, ModelError, ModelRequest, ModelResponse};
use deficiency_core::{AnalysisEvent, Classification, ItemErrorKind, SessionStatus};
use deficiency_engine::{AnalysisOrchestrator, EngineConfig, EngineError};
use deficiency_store::{
    IndexHit, JsonFileReportStore, MemoryReportStore, ReportStore, RetrievalError, VectorIndex,
};
use tokio::sync::mpsc::UnboundedReceiver;

// ── Fakes ──

/// Index with fixed hits; queries containing `fail_on` always fail.
struct ScriptedIndex {
    hits: Vec<IndexHit>,
    fail_on: Option<&'static str>,
    failures: AtomicUsize,
}

impl ScriptedIndex {
    fn new(hits: Vec<IndexHit>) -> Self {
        Self {
            hits,
            fail_on: None,
            failures: AtomicUsize::new(0),
        }
    }

    fn search(
        &self,
        production_id: &str,
        query_text: &str,
    ) -> Result<Vec<IndexHit>, RetrievalError> {
        if let Some(needle) = self.fail_on {
            if query_text.contains(needle) {
                self.failures.fetch_add(1, Ordering::SeqCst);
                return Err(RetrievalError::Unavailable("connection refused".into()));
            }
        }
        if production_id != "prod-1" {
            return Ok(Vec::new());
        }
        Ok(self.hits.clone())
    }
}

#[async_trait]
impl VectorIndex for ScriptedIndex {
    async fn semantic_search(
        &self,
        production_id: &str,
        query_text: &str,
        _limit: usize,
    ) -> Result<Vec<IndexHit>, RetrievalError> {
        self.search(production_id, query_text)
    }

    async fn keyword_search(
        &self,
        production_id: &str,
        query_text: &str,
        _limit: usize,
    ) -> Result<Vec<IndexHit>, RetrievalError> {
        self.search(production_id, query_text)
    }
}

/// Records the evidence ids it is shown and cites all of them.
#[derive(Default)]
struct RecordingModel {
    calls: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl ClassificationModel for RecordingModel {
    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        let ids: Vec<String> = request.evidence.iter().map(|e| e.id.clone()).collect();
        self.calls.lock().unwrap().push(ids.clone());
        let text = serde_json::json!({
            "classification": "fully_produced",
            "confidence": 0.8,
            "rationale": "Responsive contracts located.",
            "evidence_ids": ids,
        })
        .to_string();
        Ok(ModelResponse {
            text,
            tokens_used: 10,
        })
    }
}

enum Fault {
    /// Replies, but never with a valid classification.
    Garbage,
    /// Every call fails in transport.
    Down,
    /// Panics on prompts containing the needle; otherwise finds nothing.
    PanicOn(&'static str),
}

/// Model with a fixed failure mode that counts its calls.
struct FaultyModel {
    fault: Fault,
    calls: AtomicUsize,
}

impl FaultyModel {
    fn new(fault: Fault) -> Arc<Self> {
        Arc::new(Self {
            fault,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ClassificationModel for FaultyModel {
    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = match &self.fault {
            Fault::Garbage => {
                r#"{"classification":"mostly_produced","confidence":1.4}"#.to_string()
            }
            Fault::Down => return Err(ModelError::Transport("connection reset".into())),
            Fault::PanicOn(needle) => {
                if request.user_prompt.contains(needle) {
                    panic!("model crashed on {needle}");
                }
                serde_json::json!({
                    "classification": "not_produced",
                    "confidence": 0.6,
                    "rationale": "Nothing responsive located.",
                    "evidence_ids": [],
                })
                .to_string()
            }
        };
        Ok(ModelResponse {
            text,
            tokens_used: 0,
        })
    }
}

fn hit(doc: &str, score: f32) -> IndexHit {
    IndexHit {
        document_id: doc.into(),
        chunk_index: 0,
        chunk_text: format!("{doc}: agreement executed in 2023"),
        page_number: Some(1),
        score,
    }
}

fn contracts_index() -> ScriptedIndex {
    ScriptedIndex::new(vec![hit("MSA-2023", 0.93), hit("SOW-2023", 0.88)])
}

fn orchestrator(
    index: Arc<ScriptedIndex>,
    model: Arc<RecordingModel>,
    store: Arc<dyn ReportStore>,
) -> AnalysisOrchestrator {
    AnalysisOrchestrator::builder(index, model, store)
        .build()
        .unwrap()
}

async fn drain(mut rx: UnboundedReceiver<AnalysisEvent>) -> Vec<AnalysisEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

const THREE_REQUESTS: &str = "\
REQUEST FOR PRODUCTION NO. 1: All contracts from 2023.
REQUEST FOR PRODUCTION NO. 2: All invoices from 2023.
REQUEST FOR PRODUCTION NO. 3: All board minutes.
";

// ── Scenarios ──

#[tokio::test]
async fn no_responsive_documents_fast_path() {
    let model = Arc::new(RecordingModel::default());
    let orchestrator = orchestrator(
        Arc::new(contracts_index()),
        model.clone(),
        Arc::new(MemoryReportStore::new()),
    );
    let response = "\
RESPONSE TO REQUEST NO. 1: See attached.
RESPONSE TO REQUEST NO. 2: No responsive documents exist for this request.
RESPONSE TO REQUEST NO. 3: See attached.
";
    let report = orchestrator
        .start("prod-1", THREE_REQUESTS, response)
        .unwrap()
        .join()
        .await
        .unwrap();

    let item = report.item("2").unwrap();
    assert_eq!(item.result.classification(), Classification::NoResponsiveDocs);
    assert_eq!(item.result.confidence(), 0.9);
    assert!(item.result.evidence().is_empty());
    assert_eq!(model.calls.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn classifier_sees_both_retrieved_chunks() {
    let model = Arc::new(RecordingModel::default());
    let orchestrator = orchestrator(
        Arc::new(contracts_index()),
        model.clone(),
        Arc::new(MemoryReportStore::new()),
    );
    let report = orchestrator
        .start(
            "prod-1",
            "REQUEST NO. 1: All contracts from 2023\n",
            "RESPONSE TO REQUEST NO. 1: See attached\n",
        )
        .unwrap()
        .join()
        .await
        .unwrap();

    let calls = model.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0], ["MSA-2023#0", "SOW-2023#0"]);

    let item = report.item("1").unwrap();
    assert_ne!(item.result.classification(), Classification::NoResponsiveDocs);
    assert_eq!(item.result.evidence().len(), 2);
    for chunk in item.result.evidence() {
        assert!((0.0..=1.0).contains(&chunk.relevance_score));
    }
}

#[tokio::test(start_paused = true)]
async fn exhausted_retrieval_retries_mark_item_for_review() {
    let mut index = contracts_index();
    index.fail_on = Some("invoices");
    let index = Arc::new(index);
    let orchestrator = orchestrator(
        index.clone(),
        Arc::new(RecordingModel::default()),
        Arc::new(MemoryReportStore::new()),
    );

    let mut handle = orchestrator.start("prod-1", THREE_REQUESTS, "").unwrap();
    let events = handle.take_events().unwrap();
    let report = handle.join().await.unwrap();

    assert_eq!(report.status, SessionStatus::Completed);
    // Both search modes fail on each of the three attempts.
    assert_eq!(index.failures.load(Ordering::SeqCst), 6);

    let item = report.item("2").unwrap();
    assert_eq!(item.result.classification(), Classification::NeedsReview);
    assert!(item.error.is_some());
    assert_eq!(report.summary_statistics.errored, 1);
    assert_eq!(report.summary_statistics.total(), report.total_requests);
    assert_eq!(report.total_requests, 3);

    let events = drain(events).await;
    assert!(events.iter().any(|e| matches!(
        e,
        AnalysisEvent::ItemError { request_number, .. } if request_number == "2"
    )));
    assert!(matches!(
        events.last(),
        Some(AnalysisEvent::AnalysisCompleted { .. })
    ));
}

#[tokio::test]
async fn concurrent_start_for_same_production_conflicts() {
    let orchestrator = orchestrator(
        Arc::new(contracts_index()),
        Arc::new(RecordingModel::default()),
        Arc::new(MemoryReportStore::new()),
    );

    let first = orchestrator.start("prod-1", THREE_REQUESTS, "").unwrap();
    let second = orchestrator.start("prod-1", THREE_REQUESTS, "");
    match second {
        Err(EngineError::SessionConflict { active_session, .. }) => {
            assert_eq!(active_session, first.session_id());
        }
        Err(other) => panic!("expected conflict, got {other}"),
        Ok(_) => panic!("expected conflict, got a second session"),
    }

    // A different production is unaffected.
    let other = orchestrator.start("prod-2", THREE_REQUESTS, "").unwrap();

    let report = first.join().await.unwrap();
    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.items.len(), 3);
    other.join().await.unwrap();

    // The slot frees once the first session settles.
    assert!(orchestrator.start("prod-1", THREE_REQUESTS, "").is_ok());
}

#[tokio::test]
async fn unnumbered_rtp_is_a_parse_error_without_a_session() {
    let store = Arc::new(MemoryReportStore::new());
    let orchestrator = orchestrator(
        Arc::new(contracts_index()),
        Arc::new(RecordingModel::default()),
        store.clone(),
    );

    let err = orchestrator
        .start(
            "prod-1",
            "Please produce everything relating to the merger.\nThank you.",
            "",
        )
        .err()
        .unwrap();
    assert!(matches!(err, EngineError::Parse(_)));
    assert_eq!(orchestrator.active_session("prod-1"), None);
    assert!(store.is_empty());
}

// ── Model failures ──

#[tokio::test(start_paused = true)]
async fn output_that_never_validates_is_needs_review() {
    let model = FaultyModel::new(Fault::Garbage);
    let orchestrator = AnalysisOrchestrator::builder(
        Arc::new(contracts_index()),
        model.clone(),
        Arc::new(MemoryReportStore::new()),
    )
    .build()
    .unwrap();

    let report = orchestrator
        .start("prod-1", THREE_REQUESTS, "")
        .unwrap()
        .join()
        .await
        .unwrap();

    assert_eq!(report.status, SessionStatus::Completed);
    // Every item spends its full classification budget.
    assert_eq!(model.calls.load(Ordering::SeqCst), 9);
    for item in &report.items {
        assert_eq!(item.result.classification(), Classification::NeedsReview);
        assert_eq!(item.result.confidence(), 0.0);
        assert!(
            item.result
                .rationale()
                .starts_with("model output failed validation")
        );
        assert!(item.error.is_none());
    }
    assert_eq!(report.summary_statistics.needs_review, 3);
    assert_eq!(report.summary_statistics.errored, 0);
}

#[tokio::test(start_paused = true)]
async fn unavailable_model_fails_the_session_but_keeps_the_report() {
    let model = FaultyModel::new(Fault::Down);
    let store = Arc::new(MemoryReportStore::new());
    let orchestrator = AnalysisOrchestrator::builder(
        Arc::new(contracts_index()),
        model.clone(),
        store.clone(),
    )
    .build()
    .unwrap();

    let mut handle = orchestrator.start("prod-1", THREE_REQUESTS, "").unwrap();
    let events = handle.take_events().unwrap();
    let report = handle.join().await.unwrap();

    assert_eq!(report.status, SessionStatus::Failed);
    assert_eq!(model.calls.load(Ordering::SeqCst), 9);
    assert_eq!(report.items.len(), 3);
    for item in &report.items {
        let error = item.error.as_ref().unwrap();
        assert_eq!(error.kind, ItemErrorKind::ModelUnavailable);
        assert_eq!(item.result.classification(), Classification::NeedsReview);
    }
    assert_eq!(report.summary_statistics.errored, 3);
    assert_eq!(report.summary_statistics.total(), report.total_requests);

    let stored = store.load(&report.report_id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Failed);

    let events = drain(events).await;
    let errors = events
        .iter()
        .filter(|e| matches!(e, AnalysisEvent::ItemError { .. }))
        .count();
    assert_eq!(errors, 3);
    match events.last() {
        Some(AnalysisEvent::AnalysisFailed { reason, .. }) => {
            assert!(reason.contains("all 3 requests"), "{reason}");
        }
        other => panic!("expected analysis_failed last, got {other:?}"),
    }
}

#[tokio::test]
async fn panicking_worker_is_an_internal_error_for_that_item_only() {
    let orchestrator = AnalysisOrchestrator::builder(
        Arc::new(contracts_index()),
        FaultyModel::new(Fault::PanicOn("invoices")),
        Arc::new(MemoryReportStore::new()),
    )
    .build()
    .unwrap();

    let mut handle = orchestrator.start("prod-1", THREE_REQUESTS, "").unwrap();
    let events = handle.take_events().unwrap();
    let report = handle.join().await.unwrap();

    assert_eq!(report.status, SessionStatus::Completed);
    let crashed = report.item("2").unwrap();
    assert_eq!(crashed.error.as_ref().unwrap().kind, ItemErrorKind::Internal);
    assert_eq!(crashed.result.classification(), Classification::NeedsReview);
    for number in ["1", "3"] {
        let item = report.item(number).unwrap();
        assert!(item.error.is_none());
        assert_eq!(item.result.classification(), Classification::NotProduced);
    }

    let events = drain(events).await;
    assert!(events.iter().any(|e| matches!(
        e,
        AnalysisEvent::ItemError { request_number, error_kind: ItemErrorKind::Internal, .. }
            if request_number == "2"
    )));
}

// ── Persistence ──

#[tokio::test]
async fn reports_are_written_once_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileReportStore::open(dir.path()).await.unwrap());
    let orchestrator = orchestrator(
        Arc::new(contracts_index()),
        Arc::new(RecordingModel::default()),
        store.clone(),
    );

    let report = orchestrator
        .start("prod-1", THREE_REQUESTS, "")
        .unwrap()
        .join()
        .await
        .unwrap();

    let loaded = store.load(&report.report_id).await.unwrap();
    assert_eq!(loaded.session_id, report.session_id);
    assert_eq!(loaded.summary_statistics, report.summary_statistics);
    assert_eq!(loaded.generated_at, report.generated_at);
    let numbers: Vec<&str> = loaded.items.iter().map(|i| i.request.number.as_str()).collect();
    assert_eq!(numbers, ["1", "2", "3"]);
    let files = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(files, 1);
}

#[tokio::test]
async fn every_result_is_in_range() {
    let config = EngineConfig {
        concurrency: 1,
        ..EngineConfig::default()
    };
    let orchestrator = AnalysisOrchestrator::builder(
        Arc::new(contracts_index()),
        Arc::new(RecordingModel::default()),
        Arc::new(MemoryReportStore::new()),
    )
    .config(config)
    .build()
    .unwrap();

    let report = orchestrator
        .start("prod-1", THREE_REQUESTS, "")
        .unwrap()
        .join()
        .await
        .unwrap();
    for item in &report.items {
        assert!((0.0..=1.0).contains(&item.result.confidence()));
        assert!(Classification::ALL.contains(&item.result.classification()));
    }
}
