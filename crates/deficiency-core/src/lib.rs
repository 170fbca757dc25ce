//! Core types for discovery deficiency analysis: the data model, request
//! parsing, response segmentation, and the event contract.

pub mod classification;
pub mod events;
pub mod evidence;
pub mod numbering;
pub mod parser;
pub mod report;
pub mod request;
pub mod segmenter;
pub mod session;

pub use classification::{Classification, ClassificationResult, InvalidResult, ItemRevision};
pub use events::AnalysisEvent;
pub use evidence::{ChunkKey, EvidenceChunk};
pub use parser::{ParseError, parse_requests};
pub use report::{DeficiencyItem, DeficiencyReport, SummaryStatistics};
pub use request::{ParseWarning, ParseWarningKind, ParsedRequests, RequestItem};
pub use segmenter::{ResponseSegments, segment_responses};
pub use session::{
    AnalysisSession, ItemError, ItemErrorKind, ItemStage, ItemState, SessionItem, SessionStatus,
};
