//! Upload manager: the one entry point the command layer talks to.
//!
//! Owns the session store and the server handle, and applies the batch
//! policy: a failed or conflicting session is reported and the batch moves
//! on, while a pause stops the batch where it is.

use std::path::Path;
use std::sync::Arc;

use repoload_protocol::{FileMetadata, RepoContext};
use repoload_transfer::{
    ProgressSink, SessionState, SessionStore, SessionView, UploadSession,
    calculate_file_checksum, validate_session_id,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::UploadManagerConfig;
use crate::engine::{ChunkTransferEngine, blocking};
use crate::error::UploadError;
use crate::import::ImportCoordinator;
use crate::server::{self, UploadServer};
use crate::types::{
    BatchReport, ImportResult, OutcomeKind, SessionOutcome, TransferResult, UploadEvent,
};

/// Composes the session store, transfer engine and import coordinator.
pub struct UploadManager {
    config: UploadManagerConfig,
    store: SessionStore,
    server: Arc<dyn UploadServer>,
}

impl UploadManager {
    /// Creates a manager over `config.working_directory`.
    ///
    /// Call [`initialize`](Self::initialize) before anything else to load
    /// the sessions already on disk.
    pub fn new(
        config: UploadManagerConfig,
        server: Arc<dyn UploadServer>,
    ) -> Result<Self, UploadError> {
        config.validate()?;
        let store = SessionStore::new(&config.working_directory);
        Ok(Self {
            config,
            store,
            server,
        })
    }

    pub fn config(&self) -> &UploadManagerConfig {
        &self.config
    }

    /// Loads every readable session record. Returns how many were loaded.
    pub fn initialize(&self) -> Result<usize, UploadError> {
        Ok(self.store.initialize()?)
    }

    pub fn list(&self) -> Vec<SessionView> {
        self.store.list().iter().map(UploadSession::view).collect()
    }

    /// Sessions an operator may resume or cancel right now.
    pub fn resumable(&self) -> Vec<SessionView> {
        self.list().into_iter().filter(|v| !v.is_running).collect()
    }

    pub fn get(&self, session_id: &str) -> Result<UploadSession, UploadError> {
        Ok(self.store.get(session_id)?)
    }

    /// Opens a server session for `source_path` and records it locally.
    ///
    /// The new session starts paused at offset 0; nothing is sent yet.
    pub async fn create(
        &self,
        source_path: &Path,
        repo_context: RepoContext,
    ) -> Result<String, UploadError> {
        let path = std::path::absolute(source_path)?;
        let meta = tokio::fs::metadata(&path).await?;
        if !meta.is_file() {
            return Err(UploadError::NotAFile(path));
        }

        let checksum = {
            let path = path.clone();
            blocking(move || calculate_file_checksum(&path)).await??
        };
        let file = FileMetadata {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size: meta.len(),
            checksum,
        };

        let session_id = server::call(
            self.config.request_timeout(),
            self.server.create_session(&file),
        )
        .await?;

        if let Err(e) = validate_session_id(&session_id) {
            warn!(session = %session_id, "server returned an unusable session id");
            self.discard_remote(&session_id).await;
            return Err(e.into());
        }

        let session = UploadSession::new(&session_id, &path, meta.len(), repo_context);
        if let Err(e) = self.store.persist(&session) {
            warn!(session = %session_id, error = %e, "failed to record new session");
            self.discard_remote(&session_id).await;
            return Err(e.into());
        }
        info!(
            session = %session_id,
            file = %file.name,
            size = file.size,
            repo = %session.repo_context().repo_id,
            "upload session created"
        );
        Ok(session_id)
    }

    /// Force-deletes a server session that has no local record.
    async fn discard_remote(&self, session_id: &str) {
        if let Err(e) = server::call(
            self.config.request_timeout(),
            self.server.delete_session(session_id, true),
        )
        .await
        {
            warn!(session = %session_id, error = %e, "failed to discard remote session");
        }
    }

    /// Sends the remaining bytes of one session.
    pub async fn transfer(
        &self,
        session_id: &str,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<TransferResult, UploadError> {
        ChunkTransferEngine::new(&self.store, self.server.as_ref(), self.config.chunk_size)
            .with_timeout(self.config.request_timeout())
            .transfer(session_id, progress, cancel)
            .await
    }

    /// Imports one fully transferred session.
    pub async fn import_session(&self, session_id: &str) -> Result<ImportResult, UploadError> {
        ImportCoordinator::new(&self.store, self.server.as_ref())
            .with_timeout(self.config.request_timeout())
            .import_session(session_id)
            .await
    }

    /// Deletes a session remotely and locally.
    ///
    /// With `force`, a failed remote delete is logged and the local record
    /// is removed anyway. Without it, the error is returned and the record
    /// is kept.
    pub async fn delete(&self, session_id: &str, force: bool) -> Result<(), UploadError> {
        let _lock = self.store.lock(session_id)?;
        self.store.get(session_id)?;

        if let Err(e) = server::call(
            self.config.request_timeout(),
            self.server.delete_session(session_id, force),
        )
        .await
        {
            if !force {
                return Err(e.into());
            }
            warn!(session = %session_id, error = %e, "remote delete failed, removing local record");
        }

        self.store.delete(session_id)?;
        info!(session = %session_id, force, "upload session deleted");
        Ok(())
    }

    /// Deletes each session in turn, returning one result per id.
    pub async fn delete_many(
        &self,
        session_ids: &[String],
        force: bool,
    ) -> Vec<(String, Result<(), UploadError>)> {
        let mut results = Vec::with_capacity(session_ids.len());
        for id in session_ids {
            let result = self.delete(id, force).await;
            if let Err(e) = &result {
                error!(session = %id, error = %e, "delete failed");
            }
            results.push((id.clone(), result));
        }
        results
    }

    /// Transfers and imports each session in order.
    ///
    /// A session that fails is reported and the batch continues. A pause,
    /// whether observed mid-transfer or before a session starts, ends the
    /// batch; the sessions not yet attempted are listed as untouched.
    pub async fn process_batch(
        &self,
        session_ids: &[String],
        cancel: &CancellationToken,
        events: &mpsc::Sender<UploadEvent>,
    ) -> BatchReport {
        let mut report = BatchReport::default();

        for (i, id) in session_ids.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(remaining = session_ids.len() - i, "batch paused before next session");
                report.paused = true;
                report.untouched = session_ids[i..].to_vec();
                break;
            }

            let kind = self.process_one(id, cancel, events).await;
            let stop = matches!(kind, OutcomeKind::Paused { .. });
            report.outcomes.push(SessionOutcome {
                session_id: id.clone(),
                kind,
            });

            if stop {
                report.paused = true;
                report.untouched = session_ids[i + 1..].to_vec();
                info!(session = %id, remaining = report.untouched.len(), "batch paused");
                break;
            }
        }

        report
    }

    async fn process_one(
        &self,
        session_id: &str,
        cancel: &CancellationToken,
        events: &mpsc::Sender<UploadEvent>,
    ) -> OutcomeKind {
        let session = match self.store.get(session_id) {
            Ok(s) => s,
            Err(e) => return failed(session_id, e.to_string(), events).await,
        };

        let _ = events
            .send(UploadEvent::Started {
                session_id: session_id.to_string(),
                source_filename: session.source_filename(),
            })
            .await;

        match session.state() {
            SessionState::ImportQueued => {
                let task_ref = session.task_ref().map(str::to_string);
                return queued(session_id, task_ref, events).await;
            }
            // Imported earlier but the record outlived the cleanup.
            SessionState::Terminated => return self.finish_imported(session_id, true, events).await,
            _ => {}
        }

        let progress = EventProgress {
            session_id: session_id.to_string(),
            tx: events.clone(),
        };
        match self.transfer(session_id, &progress, cancel).await {
            Ok(TransferResult::Completed) => {
                let _ = events
                    .send(UploadEvent::Transferred {
                        session_id: session_id.to_string(),
                    })
                    .await;
            }
            Ok(TransferResult::Paused) => {
                let offset = self
                    .store
                    .get(session_id)
                    .map(|s| s.offset())
                    .unwrap_or(session.offset());
                let _ = events
                    .send(UploadEvent::Paused {
                        session_id: session_id.to_string(),
                        offset,
                    })
                    .await;
                return OutcomeKind::Paused { offset };
            }
            Ok(TransferResult::Failed(reason)) => {
                error!(session = %session_id, error = %reason, "transfer failed");
                send_failed(session_id, &reason, events).await;
                return OutcomeKind::TransferFailed { reason };
            }
            Err(e) => return failed(session_id, e.to_string(), events).await,
        }

        match self.import_session(session_id).await {
            Ok(ImportResult::Imported) => self.finish_imported(session_id, false, events).await,
            Ok(ImportResult::Queued { task_ref }) => queued(session_id, task_ref, events).await,
            Ok(ImportResult::Conflict { reason }) => {
                error!(session = %session_id, reason = %reason, "import conflict");
                send_failed(session_id, &format!("import conflict: {reason}"), events).await;
                OutcomeKind::Conflict { reason }
            }
            Err(e) => failed(session_id, e.to_string(), events).await,
        }
    }

    async fn finish_imported(
        &self,
        session_id: &str,
        force: bool,
        events: &mpsc::Sender<UploadEvent>,
    ) -> OutcomeKind {
        if let Err(e) = self.delete(session_id, force).await {
            return failed(
                session_id,
                format!("imported, but cleanup failed: {e}"),
                events,
            )
            .await;
        }
        let _ = events
            .send(UploadEvent::Imported {
                session_id: session_id.to_string(),
            })
            .await;
        OutcomeKind::Imported
    }
}

async fn queued(
    session_id: &str,
    task_ref: Option<String>,
    events: &mpsc::Sender<UploadEvent>,
) -> OutcomeKind {
    let _ = events
        .send(UploadEvent::Queued {
            session_id: session_id.to_string(),
            task_ref: task_ref.clone(),
        })
        .await;
    OutcomeKind::Queued { task_ref }
}

async fn failed(
    session_id: &str,
    message: String,
    events: &mpsc::Sender<UploadEvent>,
) -> OutcomeKind {
    error!(session = %session_id, error = %message, "upload failed");
    send_failed(session_id, &message, events).await;
    OutcomeKind::Error { message }
}

async fn send_failed(session_id: &str, error: &str, events: &mpsc::Sender<UploadEvent>) {
    let _ = events
        .send(UploadEvent::Failed {
            session_id: session_id.to_string(),
            error: error.to_string(),
        })
        .await;
}

/// Forwards chunk progress as batch events, dropping them when the
/// receiver falls behind.
struct EventProgress {
    session_id: String,
    tx: mpsc::Sender<UploadEvent>,
}

impl ProgressSink for EventProgress {
    fn advance(&self, offset: u64, total: u64) {
        let _ = self.tx.try_send(UploadEvent::Progress {
            session_id: self.session_id.clone(),
            offset,
            total,
        });
    }
}
