//! Result and event types for transfers, imports and batches.

/// How a call to [`transfer`](crate::ChunkTransferEngine::transfer) ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferResult {
    /// Every byte has been acknowledged.
    Completed,
    /// Cancellation was observed at a chunk boundary; resumable.
    Paused,
    /// A chunk send failed; resumable from the last acknowledged offset.
    Failed(String),
}

/// How an import request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportResult {
    /// Imported synchronously; the session can be deleted.
    Imported,
    /// The server will finish the import later; the session is kept.
    Queued { task_ref: Option<String> },
    /// The server refused the unit; the session has been deleted.
    Conflict { reason: String },
}

/// Event emitted while a batch runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    Started {
        session_id: String,
        source_filename: String,
    },
    Progress {
        session_id: String,
        offset: u64,
        total: u64,
    },
    /// All bytes sent; import is next.
    Transferred { session_id: String },
    Imported { session_id: String },
    /// Import postponed behind other repository operations.
    Queued {
        session_id: String,
        task_ref: Option<String>,
    },
    Failed { session_id: String, error: String },
    /// The batch stopped here.
    Paused { session_id: String, offset: u64 },
}

/// What happened to one session in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeKind {
    /// Transferred, imported and deleted.
    Imported,
    /// Transferred; the import was queued and the session kept.
    Queued { task_ref: Option<String> },
    /// Import conflict; the session was deleted.
    Conflict { reason: String },
    /// A chunk send failed; the session is resumable.
    TransferFailed { reason: String },
    /// Cancelled at a chunk boundary; the batch stopped here.
    Paused { offset: u64 },
    /// Anything else that kept this session from finishing.
    Error { message: String },
}

impl OutcomeKind {
    /// Returns `true` for outcomes reported to the operator as failures.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::TransferFailed { .. } | Self::Error { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub session_id: String,
    pub kind: OutcomeKind,
}

/// Summary of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// One entry per session the batch attempted, in order.
    pub outcomes: Vec<SessionOutcome>,
    /// Sessions never attempted because the batch was paused.
    pub untouched: Vec<String>,
    /// `true` if cancellation stopped the batch early.
    pub paused: bool,
}

impl BatchReport {
    /// Returns the outcome recorded for `session_id`.
    pub fn outcome(&self, session_id: &str) -> Option<&OutcomeKind> {
        self.outcomes
            .iter()
            .find(|o| o.session_id == session_id)
            .map(|o| &o.kind)
    }

    pub fn failures(&self) -> impl Iterator<Item = &SessionOutcome> {
        self.outcomes.iter().filter(|o| o.kind.is_failure())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }
}
