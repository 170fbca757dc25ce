use thiserror::Error;

/// Failure talking to the production index or reranker.
#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    #[error("index unavailable: {0}")]
    Unavailable(String),

    #[error("index request timed out")]
    Timeout,

    #[error("reranker unavailable: {0}")]
    Reranker(String),

    #[error("malformed index response: {0}")]
    Malformed(String),
}

impl RetrievalError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout)
    }
}

/// Failure persisting or loading reports.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("report not found: {0}")]
    ReportNotFound(String),

    #[error("request {request_number} not found in report {report_id}")]
    ItemNotFound {
        report_id: String,
        request_number: String,
    },

    #[error("invalid report id: {0:?}")]
    InvalidId(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}
