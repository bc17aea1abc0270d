//! Boundary to the remote upload server.
//!
//! `UploadServer` is implemented by the embedding application on top of
//! its actual transport. Keeping it a trait keeps the upload logic free of
//! wire concerns and testable with mocks.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use repoload_protocol::{FileMetadata, ImportResponse, RepoContext, ServerError};

/// Boxed future returned by every [`UploadServer`] call.
pub type ServerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ServerError>> + Send + 'a>>;

/// Remote operations the upload core depends on.
pub trait UploadServer: Send + Sync {
    /// Opens a session for a file and returns its server-assigned id.
    fn create_session<'a>(&'a self, file: &'a FileMetadata) -> ServerFuture<'a, String>;

    /// Stores `data` at `offset`.
    ///
    /// Fails with [`ServerError::OffsetMismatch`] when `offset` is not the
    /// next offset the server expects.
    fn send_chunk<'a>(
        &'a self,
        session_id: &'a str,
        offset: u64,
        data: &'a [u8],
    ) -> ServerFuture<'a, ()>;

    /// Imports a fully transferred session into a repository.
    ///
    /// Reports [`ServerError::Conflict`] when the unit already exists or
    /// cannot be imported in this context.
    fn import<'a>(
        &'a self,
        session_id: &'a str,
        repo: &'a RepoContext,
    ) -> ServerFuture<'a, ImportResponse>;

    /// Deletes the server side of a session. With `force`, a server that
    /// has no record of the session is not an error.
    fn delete_session<'a>(&'a self, session_id: &'a str, force: bool) -> ServerFuture<'a, ()>;
}

/// Awaits a server call, mapping an expired `timeout` to
/// [`ServerError::Timeout`].
pub(crate) async fn call<T>(
    timeout: Option<Duration>,
    fut: ServerFuture<'_, T>,
) -> Result<T, ServerError> {
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(ServerError::Timeout),
        },
        None => fut.await,
    }
}
