//! Upload session bookkeeping and chunked file reading.
//!
//! A session is one local file on its way to the server. This crate owns
//! the durable side of that: the [`UploadSession`] record, the
//! [`SessionStore`] that keeps one JSON record per session in a working
//! directory, and the [`ChunkReader`] that reads the source file from a
//! persisted offset.

mod chunked;
mod progress;
mod store;
mod types;
mod validation;

pub use chunked::{Chunk, ChunkReader, calculate_file_checksum, checksum_bytes};
pub use progress::{ChannelProgress, NoProgress, ProgressSink, TransferProgress};
pub use store::{SessionLock, SessionStore};
pub use types::{SessionState, SessionView, UploadSession};
pub use validation::validate_session_id;

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session is already running: {0}")]
    SessionRunning(String),

    #[error("invalid session id: {0}")]
    InvalidSessionId(String),

    #[error("corrupt session record: {0}")]
    Corrupt(String),

    #[error("offset {offset} is invalid for session {session_id} (current {current}, total {total})")]
    InvalidOffset {
        session_id: String,
        offset: u64,
        current: u64,
        total: u64,
    },
}
