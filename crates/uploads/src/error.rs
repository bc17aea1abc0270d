//! Upload error types.

use std::path::PathBuf;

use repoload_protocol::ServerError;
use repoload_transfer::TransferError;

use crate::config::ConfigError;

/// Errors that keep an upload operation from running at all.
///
/// Per-session outcomes such as a failed chunk send or an import conflict
/// are reported through [`TransferResult`](crate::TransferResult) and
/// [`ImportResult`](crate::ImportResult) instead.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session store error: {0}")]
    Store(#[from] TransferError),

    #[error("server error: {0}")]
    Server(#[from] ServerError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("source file {} changed: expected {expected} bytes, found {actual}", .path.display())]
    SourceChanged {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("session {session_id} has not finished transferring ({offset}/{total} bytes)")]
    IncompleteTransfer {
        session_id: String,
        offset: u64,
        total: u64,
    },

    #[error("not a regular file: {}", .0.display())]
    NotAFile(PathBuf),

    #[error("task join error: {0}")]
    Join(String),
}

impl UploadError {
    /// Returns `true` if the session id is unknown locally.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(TransferError::SessionNotFound(_)))
    }

    /// Returns `true` if another transfer or import holds the session.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Store(TransferError::SessionRunning(_)))
    }
}
