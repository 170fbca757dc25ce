//! Drives an RTP through retrieval and classification for one production.
//!
//! `start` parses synchronously (so `ParseError` and `SessionConflict`
//! reach the caller before anything runs), then spawns a driver task that
//! dispatches items to a semaphore-bounded pool. Each item runs
//! `queued → retrieving → classifying → done | error`, emitting one event per
//! transition. The driver settles the session and persists the report once
//! every dispatched item has finished.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use deficiency_ai::{ClassificationModel, ClassifyError, ComplianceClassifier, ModelError};
use deficiency_core::{
    AnalysisEvent, AnalysisSession, ChunkKey, ClassificationResult, DeficiencyReport,
    EvidenceChunk, ItemError, ItemErrorKind, ItemStage, SessionStatus, parse_requests,
    segment_responses,
};
use deficiency_store::{EvidenceRetriever, ReportStore, Reranker, RetrievalError, VectorIndex};
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::registry::{SessionClaim, SessionRegistry};
use crate::report::ReportAssembler;
use crate::retry::with_retry;
use crate::EngineError;

type SharedSession = Arc<Mutex<AnalysisSession>>;

/// The production slot, shared so cancellation can free it before the
/// driver finishes draining.
type SharedClaim = Arc<Mutex<Option<SessionClaim>>>;

fn lock(session: &Mutex<AnalysisSession>) -> MutexGuard<'_, AnalysisSession> {
    // Session methods refuse invalid transitions, so the state is usable
    // even if a worker panicked while holding the lock.
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

fn release(claim: &Mutex<Option<SessionClaim>>) {
    claim.lock().unwrap_or_else(PoisonError::into_inner).take();
}

fn next_session_id() -> String {
    format!("sess-{}", Uuid::new_v4())
}

/// Resolves once the session is cancelled. Never resolves if every
/// [`Canceller`] is gone without cancelling.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

struct Shared {
    retriever: EvidenceRetriever,
    classifier: ComplianceClassifier,
    assembler: ReportAssembler,
    registry: SessionRegistry,
    config: EngineConfig,
}

/// Entry point for running analyses. Cheap to clone; clones share the
/// session registry, so exclusivity holds across them.
#[derive(Clone)]
pub struct AnalysisOrchestrator {
    shared: Arc<Shared>,
}

pub struct OrchestratorBuilder {
    index: Arc<dyn VectorIndex>,
    model: Arc<dyn ClassificationModel>,
    store: Arc<dyn ReportStore>,
    reranker: Option<Arc<dyn Reranker>>,
    config: EngineConfig,
}

impl OrchestratorBuilder {
    pub fn reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<AnalysisOrchestrator, EngineError> {
        self.config.validate()?;
        let mut retriever = EvidenceRetriever::new(self.index)
            .with_weights(self.config.fusion)
            .with_candidate_cap(self.config.candidate_cap);
        if let Some(reranker) = self.reranker {
            retriever = retriever.with_reranker(reranker);
        }
        let classifier =
            ComplianceClassifier::with_config(self.model, self.config.classifier.clone());
        Ok(AnalysisOrchestrator {
            shared: Arc::new(Shared {
                retriever,
                classifier,
                assembler: ReportAssembler::new(self.store),
                registry: SessionRegistry::new(),
                config: self.config,
            }),
        })
    }
}

impl AnalysisOrchestrator {
    pub fn builder(
        index: Arc<dyn VectorIndex>,
        model: Arc<dyn ClassificationModel>,
        store: Arc<dyn ReportStore>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            index,
            model,
            store,
            reranker: None,
            config: EngineConfig::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// The session currently holding a production, if any.
    pub fn active_session(&self, production_id: &str) -> Option<String> {
        self.shared.registry.active_session(production_id)
    }

    /// Parse the RTP, align responses, claim the production and spawn the
    /// analysis. Must be called from within a Tokio runtime.
    ///
    /// Fails with `Parse` when no requests can be identified and with
    /// `SessionConflict` when the production already has an active session;
    /// in both cases nothing is created and no events are emitted.
    pub fn start(
        &self,
        production_id: &str,
        rtp_text: &str,
        response_text: &str,
    ) -> Result<AnalysisHandle, EngineError> {
        let parsed = parse_requests(rtp_text)?;
        for warning in &parsed.warnings {
            warn!(
                production_id,
                kind = ?warning.kind,
                offset = warning.offset,
                excerpt = %warning.excerpt,
                "dropped request block"
            );
        }

        let session_id = next_session_id();
        let claim: SharedClaim = Arc::new(Mutex::new(Some(
            self.shared.registry.claim(production_id, &session_id)?,
        )));

        let segments = segment_responses(&parsed.items, response_text);
        debug!(
            production_id,
            requests = parsed.items.len(),
            matched_responses = segments.matched(),
            "aligned responses"
        );
        let items = parsed.items.into_iter().map(|item| {
            let response = segments.get(&item.number).to_string();
            (item, response)
        });
        let session: SharedSession = Arc::new(Mutex::new(AnalysisSession::new(
            session_id.clone(),
            production_id,
            items,
        )));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let driver = Driver {
            shared: Arc::clone(&self.shared),
            session: Arc::clone(&session),
            claim: Arc::clone(&claim),
            events: events_tx,
            cancel: cancel_rx,
            session_id: session_id.clone(),
            production_id: production_id.to_string(),
        };
        let task = tokio::spawn(driver.run());

        Ok(AnalysisHandle {
            events: Some(events_rx),
            canceller: Canceller {
                session_id,
                session,
                claim,
                cancel: Arc::new(cancel_tx),
            },
            task,
        })
    }
}

/// Cancels one session. Cloneable so it can outlive a handle moved into
/// [`AnalysisHandle::join`].
#[derive(Clone)]
pub struct Canceller {
    session_id: String,
    session: SharedSession,
    claim: SharedClaim,
    cancel: Arc<watch::Sender<bool>>,
}

impl Canceller {
    /// Stop dispatching and abort in-flight items. Items that already
    /// finished are kept in the report. The production is released at once,
    /// so a new analysis can start while this one drains. Returns `false` if
    /// the session had already reached a terminal state.
    pub fn cancel(&self) -> bool {
        let cancelled = lock(&self.session).cancel();
        if cancelled {
            release(&self.claim);
            info!(session_id = %self.session_id, "analysis cancelled");
            self.cancel.send_replace(true);
        }
        cancelled
    }
}

/// Caller's view of a running analysis.
pub struct AnalysisHandle {
    events: Option<mpsc::UnboundedReceiver<AnalysisEvent>>,
    canceller: Canceller,
    task: tokio::task::JoinHandle<Result<DeficiencyReport, EngineError>>,
}

impl AnalysisHandle {
    pub fn session_id(&self) -> &str {
        &self.canceller.session_id
    }

    /// The event stream. Can be taken once; the stream ends after the
    /// session's terminal event.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<AnalysisEvent>> {
        self.events.take()
    }

    /// Current session state, for polling consumers.
    pub fn snapshot(&self) -> AnalysisSession {
        lock(&self.canceller.session).clone()
    }

    /// See [`Canceller::cancel`].
    pub fn cancel(&self) -> bool {
        self.canceller.cancel()
    }

    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    /// Wait for the session to settle and return its persisted report.
    pub async fn join(self) -> Result<DeficiencyReport, EngineError> {
        self.task
            .await
            .map_err(|e| EngineError::Join(e.to_string()))?
    }
}

struct Driver {
    shared: Arc<Shared>,
    session: SharedSession,
    claim: SharedClaim,
    events: mpsc::UnboundedSender<AnalysisEvent>,
    cancel: watch::Receiver<bool>,
    session_id: String,
    production_id: String,
}

impl Driver {
    fn emit(&self, event: AnalysisEvent) {
        // A dropped receiver only means nobody is listening.
        let _ = self.events.send(event);
    }

    async fn run(self) -> Result<DeficiencyReport, EngineError> {
        let numbers: Vec<String> = {
            let mut session = lock(&self.session);
            session.start();
            session.items.iter().map(|i| i.request.number.clone()).collect()
        };
        info!(
            session_id = %self.session_id,
            production_id = %self.production_id,
            total_requests = numbers.len(),
            "analysis started"
        );
        self.emit(AnalysisEvent::AnalysisStarted {
            session_id: self.session_id.clone(),
            production_id: self.production_id.clone(),
            total_requests: numbers.len(),
        });
        for number in &numbers {
            self.emit(AnalysisEvent::ItemProgress {
                session_id: self.session_id.clone(),
                request_number: number.clone(),
                stage: ItemStage::Queued,
            });
        }

        self.dispatch(&numbers).await;
        self.settle().await
    }

    /// Run every item through the bounded pool, stopping dispatch on
    /// cancellation.
    async fn dispatch(&self, numbers: &[String]) {
        let semaphore = Arc::new(Semaphore::new(self.shared.config.concurrency));
        let mut tasks = JoinSet::new();
        let mut owners = HashMap::new();
        let mut cancel = self.cancel.clone();

        for (index, number) in numbers.iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let worker = ItemWorker {
                shared: Arc::clone(&self.shared),
                session: Arc::clone(&self.session),
                events: self.events.clone(),
                cancel: self.cancel.clone(),
                session_id: self.session_id.clone(),
                production_id: self.production_id.clone(),
                index,
                number: number.clone(),
            };
            let handle = tasks.spawn(async move {
                let _permit = permit;
                worker.run().await;
            });
            owners.insert(handle.id(), index);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            let Err(err) = joined else { continue };
            let Some(&index) = owners.get(&err.id()) else {
                continue;
            };
            warn!(session_id = %self.session_id, index, error = %err, "item worker died");
            let error = ItemError {
                kind: ItemErrorKind::Internal,
                message: err.to_string(),
            };
            let mut session = lock(&self.session);
            if session.record_error(index, error, Vec::new()) {
                self.emit(AnalysisEvent::ItemError {
                    session_id: self.session_id.clone(),
                    request_number: numbers[index].clone(),
                    error_kind: ItemErrorKind::Internal,
                });
            }
        }
    }

    /// Settle the session status, persist the report, and emit the terminal
    /// event.
    async fn settle(&self) -> Result<DeficiencyReport, EngineError> {
        let snapshot = {
            let mut session = lock(&self.session);
            if session.finish().is_active() {
                session.fail("analysis stopped before every request finished");
            }
            session.clone()
        };

        let report = match self.shared.assembler.persist(&snapshot).await {
            Ok(report) => report,
            Err(err) => {
                warn!(session_id = %self.session_id, error = %err, "report persistence failed");
                self.emit(AnalysisEvent::AnalysisFailed {
                    session_id: self.session_id.clone(),
                    reason: err.to_string(),
                });
                return Err(err);
            }
        };

        let event = match snapshot.status {
            SessionStatus::Cancelled => AnalysisEvent::AnalysisCancelled {
                session_id: self.session_id.clone(),
                report_id: report.report_id.clone(),
                summary_statistics: report.summary_statistics,
            },
            SessionStatus::Failed => AnalysisEvent::AnalysisFailed {
                session_id: self.session_id.clone(),
                reason: snapshot
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| "analysis failed".to_string()),
            },
            _ => AnalysisEvent::AnalysisCompleted {
                session_id: self.session_id.clone(),
                report_id: report.report_id.clone(),
                summary_statistics: report.summary_statistics,
            },
        };
        info!(
            session_id = %self.session_id,
            status = snapshot.status.as_str(),
            report_id = %report.report_id,
            items = report.items.len(),
            "analysis finished"
        );
        self.emit(event);
        Ok(report)
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        release(&self.claim);
    }
}

enum Outcome {
    Done(ClassificationResult, Vec<ChunkKey>),
    Failed(ItemError, Vec<ChunkKey>),
    /// The session ended before this item could advance.
    Abandoned,
}

struct ItemWorker {
    shared: Arc<Shared>,
    session: SharedSession,
    events: mpsc::UnboundedSender<AnalysisEvent>,
    cancel: watch::Receiver<bool>,
    session_id: String,
    production_id: String,
    index: usize,
    number: String,
}

impl ItemWorker {
    fn emit(&self, event: AnalysisEvent) {
        let _ = self.events.send(event);
    }

    async fn run(self) {
        let mut cancel = self.cancel.clone();
        tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => {
                debug!(
                    session_id = %self.session_id,
                    request_number = %self.number,
                    "item aborted"
                );
            }
            outcome = self.analyze() => self.record(outcome),
        }
    }

    /// Move to a later stage and announce it. `false` once the session is
    /// terminal.
    fn advance(&self, stage: ItemStage) -> bool {
        let mut session = lock(&self.session);
        if !session.set_stage(self.index, stage) {
            return false;
        }
        self.emit(AnalysisEvent::ItemProgress {
            session_id: self.session_id.clone(),
            request_number: self.number.clone(),
            stage,
        });
        true
    }

    async fn analyze(&self) -> Outcome {
        let (request, response_text) = {
            let session = lock(&self.session);
            let item = &session.items[self.index];
            (item.request.clone(), item.response_text.clone())
        };
        let config = &self.shared.config;

        // Fast path: the classification ignores evidence, so skip retrieval.
        if let Some(result) = self.shared.classifier.precheck(&response_text) {
            if !self.advance(ItemStage::Classifying) {
                return Outcome::Abandoned;
            }
            return Outcome::Done(result, Vec::new());
        }

        if !self.advance(ItemStage::Retrieving) {
            return Outcome::Abandoned;
        }
        let retriever = &self.shared.retriever;
        let query = request.text.as_str();
        let production_id = self.production_id.as_str();
        let limit = config.retrieval_limit;
        let evidence = match with_retry(
            &config.retry,
            config.retrieval_timeout,
            "retrieval",
            RetrievalError::is_retryable,
            || RetrievalError::Timeout,
            move || retriever.search(query, production_id, limit),
        )
        .await
        {
            Ok(evidence) => evidence,
            Err(err) => {
                return Outcome::Failed(
                    ItemError {
                        kind: ItemErrorKind::Retrieval,
                        message: err.to_string(),
                    },
                    Vec::new(),
                );
            }
        };
        let retrieved: Vec<ChunkKey> = evidence.iter().map(EvidenceChunk::key).collect();

        if !self.advance(ItemStage::Classifying) {
            return Outcome::Abandoned;
        }
        let classifier = &self.shared.classifier;
        let request_ref = &request;
        let response_ref = response_text.as_str();
        let evidence_ref = evidence.as_slice();
        let classified = with_retry(
            &config.retry,
            config.model_timeout,
            "classification",
            ClassifyError::is_retryable,
            || ClassifyError::Model(ModelError::Timeout),
            move || classifier.classify(request_ref, response_ref, evidence_ref),
        )
        .await;

        match classified {
            Ok(result) => Outcome::Done(result, retrieved),
            Err(err @ ClassifyError::Validation(_)) => {
                warn!(
                    session_id = %self.session_id,
                    request_number = %self.number,
                    error = %err,
                    "classification output invalid after retries"
                );
                Outcome::Done(err.into_needs_review(), retrieved)
            }
            Err(ClassifyError::Model(err)) => Outcome::Failed(
                ItemError {
                    kind: ItemErrorKind::ModelUnavailable,
                    message: err.to_string(),
                },
                retrieved,
            ),
        }
    }

    fn record(&self, outcome: Outcome) {
        let mut session = lock(&self.session);
        match outcome {
            Outcome::Done(result, retrieved) => {
                let classification = result.classification();
                let confidence = result.confidence();
                if session.record_done(self.index, result, retrieved) {
                    let progress = session.progress();
                    info!(
                        session_id = %self.session_id,
                        request_number = %self.number,
                        classification = classification.as_str(),
                        confidence,
                        progress = %progress,
                        "item analyzed"
                    );
                    self.emit(AnalysisEvent::ItemAnalyzed {
                        session_id: self.session_id.clone(),
                        request_number: self.number.clone(),
                        classification,
                        confidence,
                        progress,
                    });
                }
            }
            Outcome::Failed(error, retrieved) => {
                let error_kind = error.kind;
                warn!(
                    session_id = %self.session_id,
                    request_number = %self.number,
                    kind = error_kind.as_str(),
                    error = %error.message,
                    "item failed"
                );
                if session.record_error(self.index, error, retrieved) {
                    self.emit(AnalysisEvent::ItemError {
                        session_id: self.session_id.clone(),
                        request_number: self.number.clone(),
                        error_kind,
                    });
                }
            }
            Outcome::Abandoned => {}
        }
    }
}
