//! Chunked transfer of one session's source file.
//!
//! Each acknowledged chunk is a durability checkpoint: the new offset is
//! persisted before the next chunk is read, so a restart resumes exactly
//! where the server left off.

use std::path::Path;
use std::time::Duration;

use repoload_protocol::ServerError;
use repoload_transfer::{ChunkReader, ProgressSink, SessionState, SessionStore, UploadSession};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::UploadError;
use crate::server::{self, UploadServer};
use crate::types::TransferResult;

/// Sends a session's bytes to the server, resumable from any persisted offset.
pub struct ChunkTransferEngine<'a> {
    store: &'a SessionStore,
    server: &'a dyn UploadServer,
    chunk_size: usize,
    timeout: Option<Duration>,
}

impl<'a> ChunkTransferEngine<'a> {
    pub fn new(store: &'a SessionStore, server: &'a dyn UploadServer, chunk_size: usize) -> Self {
        Self {
            store,
            server,
            chunk_size,
            timeout: None,
        }
    }

    /// Bounds every chunk send; an expired send counts as a transport failure.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Transfers the remaining bytes of `session_id`.
    ///
    /// `cancel` is only checked between chunks. A send in flight always
    /// finishes and is persisted before the transfer stops with
    /// [`TransferResult::Paused`].
    pub async fn transfer(
        &self,
        session_id: &str,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<TransferResult, UploadError> {
        let _lock = self.store.lock(session_id)?;
        let mut session = self.store.get(session_id)?;

        if session.is_transfer_complete() {
            if matches!(
                session.state(),
                SessionState::Paused | SessionState::Transferring
            ) {
                session.set_state(SessionState::ImportPending);
                self.store.persist(&session)?;
            }
            debug!(session = %session_id, "nothing left to transfer");
            return Ok(TransferResult::Completed);
        }

        check_source(&session)?;

        session.set_state(SessionState::Transferring);
        self.store.persist(&session)?;
        info!(
            session = %session_id,
            offset = session.offset(),
            total = session.total_size(),
            "transfer started"
        );

        let result = self.send_chunks(&mut session, progress, cancel).await;

        match &result {
            Ok(TransferResult::Completed) => {
                session.set_state(SessionState::ImportPending);
                self.store.persist(&session)?;
                info!(session = %session_id, total = session.total_size(), "transfer completed");
            }
            _ => {
                session.set_state(SessionState::Paused);
                if let Err(e) = self.store.persist(&session) {
                    warn!(session = %session_id, error = %e, "failed to record paused state");
                }
            }
        }

        result
    }

    async fn send_chunks(
        &self,
        session: &mut UploadSession,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<TransferResult, UploadError> {
        let total = session.total_size();
        let path = session.source_path().to_path_buf();
        let chunk_size = self.chunk_size;
        let start = session.offset();
        let mut reader = blocking(move || {
            ChunkReader::open_at(&path, chunk_size, start).map(|r| r.with_limit(total))
        })
        .await??;

        while session.offset() < total {
            if cancel.is_cancelled() {
                info!(session = %session.session_id(), offset = session.offset(), "transfer paused");
                return Ok(TransferResult::Paused);
            }

            let (r, next) = blocking(move || {
                let next = reader.next_chunk();
                (reader, next)
            })
            .await?;
            reader = r;
            let Some(chunk) = next? else {
                return Err(UploadError::SourceChanged {
                    path: session.source_path().to_path_buf(),
                    expected: total,
                    actual: session.offset(),
                });
            };

            let sent = server::call(
                self.timeout,
                self.server
                    .send_chunk(session.session_id(), chunk.offset, &chunk.data),
            )
            .await;

            match sent {
                Ok(()) => {
                    session.advance_to(chunk.end())?;
                }
                Err(ServerError::OffsetMismatch { expected })
                    if expected > chunk.offset && expected <= total =>
                {
                    // The server kept bytes whose checkpoint never reached disk.
                    warn!(
                        session = %session.session_id(),
                        local = chunk.offset,
                        server = expected,
                        "server is ahead of the persisted offset, skipping forward"
                    );
                    session.advance_to(expected)?;
                    reader.seek_to(expected)?;
                }
                Err(e) => {
                    warn!(
                        session = %session.session_id(),
                        offset = chunk.offset,
                        error = %e,
                        "chunk send failed"
                    );
                    return Ok(TransferResult::Failed(e.to_string()));
                }
            }

            self.store.persist(session)?;
            progress.advance(session.offset(), total);
            debug!(session = %session.session_id(), offset = session.offset(), total, "chunk acknowledged");
        }

        Ok(TransferResult::Completed)
    }
}

/// Fails if the source file no longer has the size recorded at creation.
fn check_source(session: &UploadSession) -> Result<(), UploadError> {
    let path: &Path = session.source_path();
    let actual = std::fs::metadata(path)?.len();
    if actual != session.total_size() {
        return Err(UploadError::SourceChanged {
            path: path.to_path_buf(),
            expected: session.total_size(),
            actual,
        });
    }
    Ok(())
}

/// Runs blocking file work off the async worker threads.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, UploadError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| UploadError::Join(e.to_string()))
}
