//! Scriptable in-memory [`UploadServer`] shared by the crate's tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use repoload_protocol::{FileMetadata, ImportResponse, RepoContext, ServerError};
use repoload_transfer::{SessionStore, UploadSession};
use tokio_util::sync::CancellationToken;

use crate::server::{ServerFuture, UploadServer};

/// A chunk the mock server acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SentChunk {
    pub session_id: String,
    pub offset: u64,
    pub len: usize,
}

/// Scripted reply to an import request.
#[derive(Debug, Clone)]
pub(crate) enum ImportScript {
    Queued(String),
    Conflict(String),
    Fail(ServerError),
}

#[derive(Default)]
struct MockState {
    next_id: u32,
    created: Vec<FileMetadata>,
    sends: Vec<SentChunk>,
    /// Next offset the server expects, per session.
    expected: HashMap<String, u64>,
    imports: HashMap<String, ImportScript>,
    imported: Vec<String>,
    deletes: Vec<(String, bool)>,
    /// Fail the send attempted after this many acknowledged sends.
    fail_send_at: HashMap<String, usize>,
    cancel_after: Option<(String, usize, CancellationToken)>,
    delete_fails: bool,
}

pub(crate) struct MockServer {
    state: Mutex<MockState>,
}

impl MockServer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn script_import(&self, session_id: &str, script: ImportScript) {
        self.state
            .lock()
            .unwrap()
            .imports
            .insert(session_id.to_string(), script);
    }

    /// Makes the send following `acked` acknowledged sends fail once.
    pub fn fail_send_at(&self, session_id: &str, acked: usize) {
        self.state
            .lock()
            .unwrap()
            .fail_send_at
            .insert(session_id.to_string(), acked);
    }

    /// Cancels `token` right after the `n`th acknowledged send of a session.
    pub fn cancel_after(&self, session_id: &str, n: usize, token: CancellationToken) {
        self.state.lock().unwrap().cancel_after = Some((session_id.to_string(), n, token));
    }

    pub fn set_expected_offset(&self, session_id: &str, offset: u64) {
        self.state
            .lock()
            .unwrap()
            .expected
            .insert(session_id.to_string(), offset);
    }

    pub fn fail_deletes(&self) {
        self.state.lock().unwrap().delete_fails = true;
    }

    pub fn created(&self) -> Vec<FileMetadata> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn sends(&self) -> Vec<SentChunk> {
        self.state.lock().unwrap().sends.clone()
    }

    pub fn sends_for(&self, session_id: &str) -> Vec<SentChunk> {
        self.sends()
            .into_iter()
            .filter(|c| c.session_id == session_id)
            .collect()
    }

    pub fn imported(&self) -> Vec<String> {
        self.state.lock().unwrap().imported.clone()
    }

    pub fn deletes(&self) -> Vec<(String, bool)> {
        self.state.lock().unwrap().deletes.clone()
    }
}

impl UploadServer for MockServer {
    fn create_session<'a>(&'a self, file: &'a FileMetadata) -> ServerFuture<'a, String> {
        let mut s = self.state.lock().unwrap();
        s.next_id += 1;
        let id = format!("session-{}", s.next_id);
        s.created.push(file.clone());
        s.expected.insert(id.clone(), 0);
        Box::pin(std::future::ready(Ok(id)))
    }

    fn send_chunk<'a>(
        &'a self,
        session_id: &'a str,
        offset: u64,
        data: &'a [u8],
    ) -> ServerFuture<'a, ()> {
        let mut s = self.state.lock().unwrap();
        let acked = s.sends.iter().filter(|c| c.session_id == session_id).count();

        if s.fail_send_at.get(session_id) == Some(&acked) {
            s.fail_send_at.remove(session_id);
            return Box::pin(std::future::ready(Err(ServerError::Transport(
                "connection reset".into(),
            ))));
        }

        let expected = s.expected.get(session_id).copied().unwrap_or(0);
        if offset != expected {
            return Box::pin(std::future::ready(Err(ServerError::OffsetMismatch {
                expected,
            })));
        }

        s.expected
            .insert(session_id.to_string(), offset + data.len() as u64);
        s.sends.push(SentChunk {
            session_id: session_id.to_string(),
            offset,
            len: data.len(),
        });

        if let Some((id, n, token)) = &s.cancel_after
            && id == session_id
            && acked + 1 == *n
        {
            token.cancel();
        }

        Box::pin(std::future::ready(Ok(())))
    }

    fn import<'a>(
        &'a self,
        session_id: &'a str,
        _repo: &'a RepoContext,
    ) -> ServerFuture<'a, ImportResponse> {
        let mut s = self.state.lock().unwrap();
        s.imported.push(session_id.to_string());
        let result = match s.imports.get(session_id) {
            None => Ok(ImportResponse::completed()),
            Some(ImportScript::Queued(task)) => Ok(ImportResponse::queued(task.clone())),
            Some(ImportScript::Conflict(reason)) => Err(ServerError::Conflict(reason.clone())),
            Some(ImportScript::Fail(e)) => Err(e.clone()),
        };
        Box::pin(std::future::ready(result))
    }

    fn delete_session<'a>(&'a self, session_id: &'a str, force: bool) -> ServerFuture<'a, ()> {
        let mut s = self.state.lock().unwrap();
        s.deletes.push((session_id.to_string(), force));
        let result = if s.delete_fails {
            Err(ServerError::Transport("delete failed".into()))
        } else {
            Ok(())
        };
        Box::pin(std::future::ready(result))
    }
}

/// Writes `len` deterministic bytes to `dir/name`.
pub(crate) fn write_source(dir: &Path, name: &str, len: usize) -> PathBuf {
    let path = dir.join(name);
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, data).unwrap();
    path
}

/// Persists a paused session for `path` at `offset`.
pub(crate) fn seed_session(
    store: &SessionStore,
    session_id: &str,
    path: &Path,
    offset: u64,
) -> UploadSession {
    let total = std::fs::metadata(path).unwrap().len();
    let mut session = UploadSession::new(session_id, path, total, RepoContext::new("repo-1", "rpm"));
    session.advance_to(offset).unwrap();
    store.persist(&session).unwrap();
    session
}
