use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use repoload_protocol::RepoContext;
use serde::{Deserialize, Serialize};

use crate::TransferError;

/// Where a session sits in its transfer/import lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Not running; resumable from the persisted offset.
    Paused,
    /// A transfer was executing when the record was last written.
    Transferring,
    /// All bytes acknowledged, import not yet accepted.
    ImportPending,
    /// The server queued the import; the record is kept until it completes.
    ImportQueued,
    /// Nothing left to do; the record is about to be removed.
    Terminated,
}

/// Durable record of one upload session.
///
/// `offset` only moves forward and never passes `total_size`; both are
/// enforced by [`advance_to`](Self::advance_to) and by
/// [`validate`](Self::validate) when a record is loaded from disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadSession {
    session_id: String,
    source_path: PathBuf,
    total_size: u64,
    offset: u64,
    state: SessionState,
    repo_context: RepoContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    task_ref: Option<String>,
    created_at: DateTime<Utc>,
    /// Process-local; a fresh process never has a running session.
    #[serde(skip)]
    is_running: bool,
}

impl UploadSession {
    /// Creates a new paused session at offset 0.
    pub fn new(
        session_id: impl Into<String>,
        source_path: impl Into<PathBuf>,
        total_size: u64,
        repo_context: RepoContext,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            source_path: source_path.into(),
            total_size,
            offset: 0,
            state: SessionState::Paused,
            repo_context,
            task_ref: None,
            created_at: Utc::now(),
            is_running: false,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Base name of the source file, for display.
    pub fn source_filename(&self) -> String {
        self.source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source_path.to_string_lossy().into_owned())
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Bytes the server has acknowledged so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes still to send.
    pub fn remaining(&self) -> u64 {
        self.total_size - self.offset
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn repo_context(&self) -> &RepoContext {
        &self.repo_context
    }

    /// Server task reference of a queued import.
    pub fn task_ref(&self) -> Option<&str> {
        self.task_ref.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    /// Returns `true` once every byte has been acknowledged.
    pub fn is_transfer_complete(&self) -> bool {
        self.offset == self.total_size
    }

    /// Moves the acknowledged offset forward to `offset`.
    ///
    /// Rejects moving backwards and moving past `total_size`.
    pub fn advance_to(&mut self, offset: u64) -> Result<(), TransferError> {
        if offset < self.offset || offset > self.total_size {
            return Err(TransferError::InvalidOffset {
                session_id: self.session_id.clone(),
                offset,
                current: self.offset,
                total: self.total_size,
            });
        }
        self.offset = offset;
        Ok(())
    }

    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    /// Marks the import as queued under `task_ref`.
    pub fn mark_queued(&mut self, task_ref: Option<String>) {
        self.state = SessionState::ImportQueued;
        self.task_ref = task_ref;
    }

    pub(crate) fn set_running(&mut self, running: bool) {
        self.is_running = running;
    }

    /// Checks the invariants a record read from disk must satisfy.
    pub fn validate(&self) -> Result<(), TransferError> {
        crate::validate_session_id(&self.session_id)?;
        if self.offset > self.total_size {
            return Err(TransferError::Corrupt(format!(
                "{}: offset {} exceeds total size {}",
                self.session_id, self.offset, self.total_size
            )));
        }
        if self.source_path.as_os_str().is_empty() {
            return Err(TransferError::Corrupt(format!(
                "{}: empty source path",
                self.session_id
            )));
        }
        Ok(())
    }

    /// Returns the listing view of this session.
    pub fn view(&self) -> SessionView {
        SessionView {
            session_id: self.session_id.clone(),
            source_filename: self.source_filename(),
            is_running: self.is_running,
            state: self.state,
            offset: self.offset,
            total_size: self.total_size,
        }
    }
}

/// What the command layer needs to list and select sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub session_id: String,
    pub source_filename: String,
    pub is_running: bool,
    pub state: SessionState,
    pub offset: u64,
    pub total_size: u64,
}

impl SessionView {
    /// Transfer progress as a percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total_size == 0 {
            return 100.0;
        }
        self.offset as f64 / self.total_size as f64 * 100.0
    }
}
