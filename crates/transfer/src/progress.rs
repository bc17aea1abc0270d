//! Progress reporting seam between the transfer engine and whoever renders it.

use tokio::sync::mpsc;

/// Receives the acknowledged offset after each persisted chunk.
pub trait ProgressSink: Send + Sync {
    /// Called with the new durable offset and the session's total size.
    fn advance(&self, offset: u64, total: u64);
}

impl<F> ProgressSink for F
where
    F: Fn(u64, u64) + Send + Sync,
{
    fn advance(&self, offset: u64, total: u64) {
        self(offset, total)
    }
}

/// Sink that discards every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn advance(&self, _offset: u64, _total: u64) {}
}

/// A progress update as a value, for channel-based consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    pub session_id: String,
    pub offset: u64,
    pub total: u64,
}

impl TransferProgress {
    /// Returns the progress as a percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.offset as f64 / self.total as f64 * 100.0
    }
}

/// Forwards updates into a bounded channel, dropping them when it is full.
///
/// The engine never waits on a slow consumer.
pub struct ChannelProgress {
    session_id: String,
    tx: mpsc::Sender<TransferProgress>,
}

impl ChannelProgress {
    pub fn new(session_id: impl Into<String>, tx: mpsc::Sender<TransferProgress>) -> Self {
        Self {
            session_id: session_id.into(),
            tx,
        }
    }
}

impl ProgressSink for ChannelProgress {
    fn advance(&self, offset: u64, total: u64) {
        let _ = self.tx.try_send(TransferProgress {
            session_id: self.session_id.clone(),
            offset,
            total,
        });
    }
}
