//! Storage layer: production index contracts, hybrid evidence retrieval,
//! and deficiency report persistence.

mod error;
pub use error::{RetrievalError, StoreError};

mod index;
pub use index::{IndexHit, Reranker, VectorIndex};

pub mod fusion;
pub use fusion::{EvidenceRetriever, FusionWeights};

mod memory;
pub use memory::{IndexedChunk, MemoryIndex};

pub mod reports;
pub use reports::{JsonFileReportStore, MemoryReportStore, ReportStore, SaveOutcome};

#[cfg(feature = "http")]
mod http;
#[cfg(feature = "http")]
pub use http::{HttpIndex, HttpReranker};
