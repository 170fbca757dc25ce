//! Analysis session state machine.
//!
//! Session: `pending → processing → {completed, failed, cancelled}`.
//! Item: `queued → retrieving → classifying → {done, error}`.
//!
//! Transitions out of a terminal state are refused; callers get `false` back
//! rather than a panic so that a late worker cannot corrupt a finished session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classification::ClassificationResult;
use crate::evidence::ChunkKey;
use crate::request::RequestItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Pending or processing: holds the production's exclusive slot.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

/// Non-terminal per-item stages, reported through progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStage {
    Queued,
    Retrieving,
    Classifying,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemErrorKind {
    /// Index unreachable after every retry.
    Retrieval,
    /// Model call timed out or failed in transport after every retry.
    ModelUnavailable,
    /// Worker task died.
    Internal,
}

impl ItemErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retrieval => "retrieval",
            Self::ModelUnavailable => "model_unavailable",
            Self::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub kind: ItemErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ItemState {
    Queued,
    Retrieving,
    Classifying,
    Done(ClassificationResult),
    Error(ItemError),
}

impl ItemState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Error(_))
    }

    fn stage(&self) -> Option<ItemStage> {
        match self {
            Self::Queued => Some(ItemStage::Queued),
            Self::Retrieving => Some(ItemStage::Retrieving),
            Self::Classifying => Some(ItemStage::Classifying),
            Self::Done(_) | Self::Error(_) => None,
        }
    }
}

impl From<ItemStage> for ItemState {
    fn from(stage: ItemStage) -> Self {
        match stage {
            ItemStage::Queued => Self::Queued,
            ItemStage::Retrieving => Self::Retrieving,
            ItemStage::Classifying => Self::Classifying,
        }
    }
}

/// One request's slot in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionItem {
    pub request: RequestItem,
    /// Opposing counsel's response; empty when none was found.
    pub response_text: String,
    pub state: ItemState,
    /// Every chunk the retriever returned for this item.
    pub retrieved: Vec<ChunkKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSession {
    pub session_id: String,
    pub production_id: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub items: Vec<SessionItem>,
}

impl AnalysisSession {
    /// Create a pending session with every item queued, in parse order.
    pub fn new(
        session_id: impl Into<String>,
        production_id: impl Into<String>,
        items: impl IntoIterator<Item = (RequestItem, String)>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            production_id: production_id.into(),
            status: SessionStatus::Pending,
            created_at: Utc::now(),
            finished_at: None,
            failure_reason: None,
            items: items
                .into_iter()
                .map(|(request, response_text)| SessionItem {
                    request,
                    response_text,
                    state: ItemState::Queued,
                    retrieved: Vec::new(),
                })
                .collect(),
        }
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }

    pub fn done_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.state, ItemState::Done(_)))
            .count()
    }

    pub fn error_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.state, ItemState::Error(_)))
            .count()
    }

    pub fn terminal_count(&self) -> usize {
        self.items.iter().filter(|i| i.state.is_terminal()).count()
    }

    /// `"current/total"` where current counts items with a terminal result.
    pub fn progress(&self) -> String {
        format!("{}/{}", self.terminal_count(), self.total())
    }

    /// `pending → processing`. Returns `false` from any other state.
    pub fn start(&mut self) -> bool {
        if self.status != SessionStatus::Pending {
            return false;
        }
        self.status = SessionStatus::Processing;
        true
    }

    /// Advance an item to a later non-terminal stage.
    ///
    /// Refused when the session is terminal, the item already finished, or
    /// the stage would move backwards.
    pub fn set_stage(&mut self, index: usize, stage: ItemStage) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let Some(item) = self.items.get_mut(index) else {
            return false;
        };
        match item.state.stage() {
            Some(current) if current < stage => {
                item.state = stage.into();
                true
            }
            _ => false,
        }
    }

    pub fn record_done(
        &mut self,
        index: usize,
        result: ClassificationResult,
        retrieved: Vec<ChunkKey>,
    ) -> bool {
        self.finish_item(index, ItemState::Done(result), retrieved)
    }

    pub fn record_error(
        &mut self,
        index: usize,
        error: ItemError,
        retrieved: Vec<ChunkKey>,
    ) -> bool {
        self.finish_item(index, ItemState::Error(error), retrieved)
    }

    fn finish_item(&mut self, index: usize, state: ItemState, retrieved: Vec<ChunkKey>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        match self.items.get_mut(index) {
            Some(item) if !item.state.is_terminal() => {
                item.state = state;
                item.retrieved = retrieved;
                true
            }
            _ => false,
        }
    }

    /// External cancellation. Only an active session can be cancelled.
    pub fn cancel(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = SessionStatus::Cancelled;
        self.finished_at = Some(Utc::now());
        true
    }

    /// Session-level failure before any item ran.
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = SessionStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.finished_at = Some(Utc::now());
        true
    }

    /// Settle an active session once every item has a terminal result:
    /// completed if anything succeeded, failed if every item errored.
    ///
    /// Returns the resulting status; a session that is already terminal, or
    /// still has unfinished items, is returned unchanged.
    pub fn finish(&mut self) -> SessionStatus {
        if self.status.is_terminal() || self.terminal_count() < self.total() {
            return self.status;
        }
        if self.done_count() > 0 {
            self.status = SessionStatus::Completed;
        } else {
            self.status = SessionStatus::Failed;
            self.failure_reason = Some(format!(
                "all {} requests failed to analyze",
                self.total()
            ));
        }
        self.finished_at = Some(Utc::now());
        self.status
    }
}
