use deficiency_core::{ParseError, SessionStatus};
use deficiency_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("production {production_id} already has an active analysis ({active_session})")]
    SessionConflict {
        production_id: String,
        active_session: String,
    },

    #[error("report store error: {0}")]
    Store(#[from] StoreError),

    #[error("session {session_id} is still {status:?}")]
    NotTerminal {
        session_id: String,
        status: SessionStatus,
    },

    #[error("report {report_id} belongs to session {stored_session} on {stored_production}")]
    ReportConflict {
        report_id: String,
        stored_session: String,
        stored_production: String,
    },

    #[error("analysis task failed: {0}")]
    Join(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}
