//! Hands a fully transferred session to the server's import step.

use std::time::Duration;

use repoload_protocol::ServerError;
use repoload_transfer::{SessionState, SessionStore};
use tracing::{info, warn};

use crate::error::UploadError;
use crate::server::{self, UploadServer};
use crate::types::ImportResult;

/// Requests imports and classifies the server's answer.
pub struct ImportCoordinator<'a> {
    store: &'a SessionStore,
    server: &'a dyn UploadServer,
    timeout: Option<Duration>,
}

impl<'a> ImportCoordinator<'a> {
    pub fn new(store: &'a SessionStore, server: &'a dyn UploadServer) -> Self {
        Self {
            store,
            server,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Imports `session_id` into the repository recorded on the session.
    ///
    /// - `Imported`: the record is marked terminated; deleting it is up to
    ///   the caller.
    /// - `Queued`: the record is kept with the server's task reference.
    /// - `Conflict`: the session is deleted remotely (forced) and locally.
    ///
    /// Any other server failure is returned as an error and leaves the
    /// session pending import.
    pub async fn import_session(&self, session_id: &str) -> Result<ImportResult, UploadError> {
        let _lock = self.store.lock(session_id)?;
        let mut session = self.store.get(session_id)?;

        if !session.is_transfer_complete() {
            return Err(UploadError::IncompleteTransfer {
                session_id: session_id.to_string(),
                offset: session.offset(),
                total: session.total_size(),
            });
        }

        if matches!(
            session.state(),
            SessionState::Paused | SessionState::Transferring
        ) {
            session.set_state(SessionState::ImportPending);
            self.store.persist(&session)?;
        }

        let response = server::call(
            self.timeout,
            self.server.import(session_id, session.repo_context()),
        )
        .await;

        match response {
            Ok(resp) if resp.synchronous => {
                session.set_state(SessionState::Terminated);
                self.store.persist(&session)?;
                info!(session = %session_id, repo = %session.repo_context().repo_id, "import completed");
                Ok(ImportResult::Imported)
            }
            Ok(resp) => {
                session.mark_queued(resp.task_ref.clone());
                self.store.persist(&session)?;
                info!(
                    session = %session_id,
                    task = resp.task_ref.as_deref().unwrap_or("-"),
                    "import queued behind other repository operations"
                );
                Ok(ImportResult::Queued {
                    task_ref: resp.task_ref,
                })
            }
            Err(ServerError::Conflict(reason)) => {
                warn!(session = %session_id, reason = %reason, "import conflict, discarding session");
                if let Err(e) = server::call(
                    self.timeout,
                    self.server.delete_session(session_id, true),
                )
                .await
                {
                    warn!(session = %session_id, error = %e, "remote delete after conflict failed");
                }
                self.store.delete(session_id)?;
                Ok(ImportResult::Conflict { reason })
            }
            Err(e) => Err(e.into()),
        }
    }
}
