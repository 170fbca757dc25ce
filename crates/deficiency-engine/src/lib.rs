//! Analysis orchestration: runs a parsed RTP through retrieval and
//! classification with bounded concurrency, retries and cancellation, and
//! assembles the persisted deficiency report.

mod error;
pub use error::EngineError;

pub mod config;
pub use config::{EngineConfig, RetryPolicy};

mod orchestrator;
pub use orchestrator::{AnalysisHandle, AnalysisOrchestrator, Canceller, OrchestratorBuilder};

pub mod registry;
pub use registry::{SessionClaim, SessionRegistry};

pub mod report;
pub use report::{ReportAssembler, assemble, report_id_for};

mod retry;
