//! Compliance classification: the model contract, prompts, output
//! validation, and the classifier that ties them together.

pub mod classifier;
pub mod heuristic;
pub mod model;
pub mod output;
pub mod prompt;

pub use classifier::{ClassifierConfig, ClassifyError, ComplianceClassifier};
pub use heuristic::HeuristicModel;
pub use model::{ClassificationModel, EvidenceRef, ModelError, ModelRequest, ModelResponse};
pub use output::{ValidationError, parse_model_output};

#[cfg(feature = "http")]
mod http;
#[cfg(feature = "http")]
pub use http::HttpModel;
