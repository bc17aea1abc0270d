//! Errors reported by an upload server transport.

/// Failures a transport surfaces for any remote upload operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServerError {
    /// Network-level failure (connection refused, reset, DNS, ...).
    #[error("transport error: {0}")]
    Transport(String),

    /// The call did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The server expected a different next offset for this session.
    #[error("offset mismatch: server expects offset {expected}")]
    OffsetMismatch { expected: u64 },

    /// The unit already exists, or cannot be imported in this repository.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The server has no record of the session.
    #[error("session not found on server: {0}")]
    NotFound(String),

    /// Any other non-success response.
    #[error("server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl ServerError {
    /// Returns `true` for failures that say nothing about the session
    /// itself, only about reaching the server.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout)
    }
}
