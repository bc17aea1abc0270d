//! Durable registry of upload sessions.
//!
//! One `<session_id>.json` record per session lives in the working
//! directory, next to a `<session_id>.lock` file that marks the session as
//! owned by a running transfer. Records are replaced with write-to-temp
//! then rename, so a reader sees either the previous record or the new
//! one, never a partial write.

use std::collections::{HashMap, HashSet};
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, SystemTime};

use fs4::fs_std::FileExt;
use tracing::{debug, info, warn};

use crate::types::{SessionState, UploadSession};
use crate::{TransferError, validate_session_id};

const RECORD_EXT: &str = "json";
const LOCK_EXT: &str = "lock";
const TEMP_PREFIX: &str = ".record-";
const STALE_TEMP_AGE: Duration = Duration::from_secs(60);

type RunningSet = Arc<Mutex<HashSet<String>>>;

/// Session records cached in memory and persisted to a working directory.
pub struct SessionStore {
    dir: PathBuf,
    sessions: RwLock<HashMap<String, UploadSession>>,
    running: RunningSet,
}

impl SessionStore {
    /// Creates an empty store rooted at `dir`. Call
    /// [`initialize`](Self::initialize) to load existing records.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sessions: RwLock::new(HashMap::new()),
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Returns the working directory.
    pub fn working_directory(&self) -> &Path {
        &self.dir
    }

    /// Rebuilds the in-memory session list from the working directory.
    ///
    /// Malformed records are skipped with a warning. A record left in
    /// `Transferring` by a process that no longer holds its lock is
    /// rewritten as `Paused`. Temp files abandoned by an interrupted write
    /// are removed. Returns the number of sessions loaded.
    pub fn initialize(&self) -> Result<usize, TransferError> {
        fs::create_dir_all(&self.dir)?;
        remove_stale_temp_files(&self.dir)?;

        let (mut loaded, skipped) = scan_records(&self.dir)?;
        for (path, e) in skipped {
            warn!(path = %path.display(), error = %e, "skipping malformed session record");
        }

        for session in loaded.values_mut() {
            if session.state() != SessionState::Transferring
                || self.is_running(session.session_id())
            {
                continue;
            }
            match self.locked_elsewhere(session.session_id()) {
                Ok(true) => {}
                Ok(false) => {
                    session.set_state(SessionState::Paused);
                    match write_record(&self.dir, session) {
                        Ok(()) => info!(
                            session = %session.session_id(),
                            offset = session.offset(),
                            "interrupted transfer marked paused"
                        ),
                        Err(e) => warn!(
                            session = %session.session_id(),
                            error = %e,
                            "failed to rewrite interrupted session"
                        ),
                    }
                }
                Err(e) => {
                    warn!(session = %session.session_id(), error = %e, "failed to probe session lock");
                }
            }
        }

        let count = loaded.len();
        *self.sessions.write().unwrap_or_else(PoisonError::into_inner) = loaded;
        info!(dir = %self.dir.display(), sessions = count, "session store initialized");
        Ok(count)
    }

    /// Returns every session on disk, oldest first.
    ///
    /// The directory is rescanned so records written or removed by other
    /// processes show up. If it cannot be read, the last known list is
    /// returned.
    pub fn list(&self) -> Vec<UploadSession> {
        match scan_records(&self.dir) {
            Ok((loaded, _)) => {
                *self.sessions.write().unwrap_or_else(PoisonError::into_inner) = loaded;
            }
            Err(e) => {
                debug!(dir = %self.dir.display(), error = %e, "listing cached sessions");
            }
        }

        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<UploadSession> = sessions
            .values()
            .map(|s| {
                let mut s = s.clone();
                s.set_running(running.contains(s.session_id()));
                s
            })
            .collect();
        all.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.session_id().cmp(b.session_id()))
        });
        all
    }

    /// Returns the current record of one session, read from disk.
    ///
    /// Called after [`lock`](Self::lock), this is the state no other
    /// process can change until the guard is dropped.
    pub fn get(&self, session_id: &str) -> Result<UploadSession, TransferError> {
        if validate_session_id(session_id).is_err() {
            return Err(TransferError::SessionNotFound(session_id.to_string()));
        }

        let mut session = match read_record(&record_path(&self.dir, session_id), session_id) {
            Ok(session) => session,
            Err(TransferError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                self.sessions
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(session_id);
                return Err(TransferError::SessionNotFound(session_id.to_string()));
            }
            Err(e) => return Err(e),
        };

        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.to_string(), session.clone());
        session.set_running(self.is_running(session_id));
        Ok(session)
    }

    /// Returns `true` if a transfer or import holds the session in this process.
    pub fn is_running(&self, session_id: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(session_id)
    }

    /// Atomically writes `session` to disk and updates the cache.
    pub fn persist(&self, session: &UploadSession) -> Result<(), TransferError> {
        session.validate()?;
        write_record(&self.dir, session)?;

        let mut cached = session.clone();
        cached.set_running(false);
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.session_id().to_string(), cached);
        debug!(
            session = %session.session_id(),
            offset = session.offset(),
            state = ?session.state(),
            "session persisted"
        );
        Ok(())
    }

    /// Removes the local record. Returns `false` if it was already gone.
    pub fn delete(&self, session_id: &str) -> Result<bool, TransferError> {
        validate_session_id(session_id)?;

        let existed_on_disk = match fs::remove_file(record_path(&self.dir, session_id)) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        let cached = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
            .is_some();

        if existed_on_disk || cached {
            debug!(session = %session_id, "session record deleted");
        }
        Ok(existed_on_disk || cached)
    }

    /// Takes exclusive ownership of a session for a transfer or import.
    ///
    /// Fails with [`TransferError::SessionRunning`] if this process or any
    /// other already holds it. Ownership ends when the guard is dropped.
    pub fn lock(&self, session_id: &str) -> Result<SessionLock, TransferError> {
        validate_session_id(session_id)?;

        {
            let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            if !running.insert(session_id.to_string()) {
                return Err(TransferError::SessionRunning(session_id.to_string()));
            }
        }

        match self.acquire_file_lock(session_id) {
            Ok(file) => Ok(SessionLock {
                session_id: session_id.to_string(),
                file,
                lock_path: lock_path(&self.dir, session_id),
                record_path: record_path(&self.dir, session_id),
                running: Arc::clone(&self.running),
            }),
            Err(e) => {
                self.running
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(session_id);
                Err(e)
            }
        }
    }

    fn acquire_file_lock(&self, session_id: &str) -> Result<File, TransferError> {
        fs::create_dir_all(&self.dir)?;
        let file = open_lock_file(&self.dir, session_id)?;
        if FileExt::try_lock_exclusive(&file)? {
            Ok(file)
        } else {
            Err(TransferError::SessionRunning(session_id.to_string()))
        }
    }

    /// Probes whether another process currently holds the session's lock.
    fn locked_elsewhere(&self, session_id: &str) -> Result<bool, TransferError> {
        let path = lock_path(&self.dir, session_id);
        if !path.exists() {
            return Ok(false);
        }
        let file = open_lock_file(&self.dir, session_id)?;
        if FileExt::try_lock_exclusive(&file)? {
            FileExt::unlock(&file)?;
            Ok(false)
        } else {
            Ok(true)
        }
    }
}

/// Exclusive ownership of one session; released on drop.
pub struct SessionLock {
    session_id: String,
    file: File,
    lock_path: PathBuf,
    record_path: PathBuf,
    running: RunningSet,
}

impl SessionLock {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        // The record is gone, so nothing will contend for this marker again.
        if !self.record_path.exists() {
            let _ = fs::remove_file(&self.lock_path);
        }
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.session_id);
    }
}

fn record_path(dir: &Path, session_id: &str) -> PathBuf {
    dir.join(format!("{session_id}.{RECORD_EXT}"))
}

fn lock_path(dir: &Path, session_id: &str) -> PathBuf {
    dir.join(format!("{session_id}.{LOCK_EXT}"))
}

fn open_lock_file(dir: &Path, session_id: &str) -> std::io::Result<File> {
    File::options()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path(dir, session_id))
}

/// Reads every record in `dir`. Returns the valid sessions keyed by id and
/// the records that failed to load.
fn scan_records(
    dir: &Path,
) -> Result<(HashMap<String, UploadSession>, Vec<(PathBuf, TransferError)>), TransferError> {
    let mut loaded = HashMap::new();
    let mut skipped = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension() != Some(OsStr::new(RECORD_EXT)) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(OsStr::to_str) else {
            continue;
        };
        if stem.starts_with('.') {
            continue;
        }

        match read_record(&path, stem) {
            Ok(session) => {
                loaded.insert(stem.to_string(), session);
            }
            // Removed between read_dir and the read.
            Err(TransferError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => skipped.push((path, e)),
        }
    }
    Ok((loaded, skipped))
}

/// Removes temp files older than [`STALE_TEMP_AGE`]. Younger ones may
/// belong to a write still in progress in another process.
fn remove_stale_temp_files(dir: &Path) -> Result<(), TransferError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
            continue;
        }
        let stale = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age >= STALE_TEMP_AGE);
        if !stale {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => debug!(path = %entry.path().display(), "removed abandoned temp file"),
            Err(e) => warn!(path = %entry.path().display(), error = %e, "failed to remove temp file"),
        }
    }
    Ok(())
}

/// Reads and validates one record; `expected_id` is the file stem.
fn read_record(path: &Path, expected_id: &str) -> Result<UploadSession, TransferError> {
    let data = fs::read(path)?;
    let session: UploadSession = serde_json::from_slice(&data)?;
    session.validate()?;
    if session.session_id() != expected_id {
        return Err(TransferError::Corrupt(format!(
            "record for {} stored under {expected_id}",
            session.session_id()
        )));
    }
    Ok(session)
}

/// Writes a record via a temp file in the same directory, then renames it
/// over the previous record.
fn write_record(dir: &Path, session: &UploadSession) -> Result<(), TransferError> {
    fs::create_dir_all(dir)?;
    let json = serde_json::to_vec_pretty(session)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(dir)?;
    tmp.write_all(&json)?;
    tmp.as_file().sync_all()?;
    tmp.persist(record_path(dir, session.session_id()))
        .map_err(|e| TransferError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use repoload_protocol::RepoContext;
    use tempfile::TempDir;

    fn session(id: &str, total: u64) -> UploadSession {
        UploadSession::new(
            id,
            format!("/data/{id}.rpm"),
            total,
            RepoContext::new("repo-1", "rpm"),
        )
    }

    fn test_store() -> (TempDir, SessionStore) {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path().join("uploads"));
        store.initialize().unwrap();
        (tmp, store)
    }

    #[test]
    fn new_store_empty() {
        let (_tmp, store) = test_store();
        assert!(store.list().is_empty());
        assert!(matches!(
            store.get("missing"),
            Err(TransferError::SessionNotFound(_))
        ));
    }

    #[test]
    fn persist_and_reload() {
        let (tmp, store) = test_store();
        let mut s = session("s1", 100);
        s.advance_to(40).unwrap();
        store.persist(&s).unwrap();
        store.persist(&session("s2", 10)).unwrap();

        let reloaded = SessionStore::new(tmp.path().join("uploads"));
        assert_eq!(reloaded.initialize().unwrap(), 2);
        let s1 = reloaded.get("s1").unwrap();
        assert_eq!(s1.offset(), 40);
        assert_eq!(s1.total_size(), 100);
        assert!(!s1.is_running());
    }

    #[test]
    fn persist_leaves_no_temp_files() {
        let (_tmp, store) = test_store();
        let mut s = session("s1", 100);
        for offset in [10, 20, 30] {
            s.advance_to(offset).unwrap();
            store.persist(&s).unwrap();
        }

        let names: Vec<String> = fs::read_dir(store.working_directory())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["s1.json".to_string()]);
    }

    #[test]
    fn malformed_records_are_skipped() {
        let (tmp, store) = test_store();
        store.persist(&session("good-1", 10)).unwrap();
        store.persist(&session("good-2", 10)).unwrap();
        store.persist(&session("good-3", 10)).unwrap();

        let dir = store.working_directory();
        fs::write(dir.join("broken.json"), b"{ not json").unwrap();
        // Valid JSON, but filed under the wrong name.
        fs::copy(dir.join("good-1.json"), dir.join("renamed.json")).unwrap();
        fs::write(dir.join("notes.txt"), b"ignored").unwrap();

        let reloaded = SessionStore::new(tmp.path().join("uploads"));
        assert_eq!(reloaded.initialize().unwrap(), 3);
        let mut ids: Vec<String> = reloaded
            .list()
            .iter()
            .map(|s| s.session_id().to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["good-1", "good-2", "good-3"]);
    }

    #[test]
    fn reads_reflect_other_store_on_same_directory() {
        let (tmp, writer) = test_store();
        let mut s = session("s1", 100);
        writer.persist(&s).unwrap();

        let reader = SessionStore::new(tmp.path().join("uploads"));
        reader.initialize().unwrap();
        assert_eq!(reader.get("s1").unwrap().offset(), 0);

        s.advance_to(8).unwrap();
        writer.persist(&s).unwrap();
        assert_eq!(reader.get("s1").unwrap().offset(), 8);
        assert_eq!(reader.list()[0].offset(), 8);

        writer.persist(&session("s2", 10)).unwrap();
        assert_eq!(reader.list().len(), 2);

        writer.delete("s1").unwrap();
        assert!(matches!(
            reader.get("s1"),
            Err(TransferError::SessionNotFound(_))
        ));
        let ids: Vec<String> = reader
            .list()
            .iter()
            .map(|s| s.session_id().to_string())
            .collect();
        assert_eq!(ids, vec!["s2".to_string()]);
    }

    #[test]
    fn get_rejects_unsafe_id_as_not_found() {
        let (_tmp, store) = test_store();
        assert!(matches!(
            store.get("../escape"),
            Err(TransferError::SessionNotFound(_))
        ));
    }

    #[test]
    fn initialize_removes_abandoned_temp_files() {
        let (tmp, store) = test_store();
        store.persist(&session("s1", 10)).unwrap();
        let dir = store.working_directory();

        let abandoned = dir.join(format!("{TEMP_PREFIX}abandoned"));
        let in_flight = dir.join(format!("{TEMP_PREFIX}in-flight"));
        fs::write(&abandoned, b"{ partial").unwrap();
        fs::write(&in_flight, b"{ partial").unwrap();
        File::options()
            .write(true)
            .open(&abandoned)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(3600))
            .unwrap();

        let reloaded = SessionStore::new(tmp.path().join("uploads"));
        assert_eq!(reloaded.initialize().unwrap(), 1);
        assert!(!abandoned.exists());
        assert!(in_flight.exists());
        assert!(dir.join("s1.json").exists());
    }

    #[test]
    fn delete_is_idempotent() {
        let (_tmp, store) = test_store();
        store.persist(&session("s1", 10)).unwrap();

        assert!(store.delete("s1").unwrap());
        assert!(!store.delete("s1").unwrap());
        assert!(store.get("s1").is_err());
        assert!(!store.working_directory().join("s1.json").exists());
    }

    #[test]
    fn persist_rejects_unsafe_id() {
        let (_tmp, store) = test_store();
        let result = store.persist(&session("../escape", 10));
        assert!(matches!(result, Err(TransferError::InvalidSessionId(_))));
    }

    #[test]
    fn lock_is_exclusive_in_process() {
        let (_tmp, store) = test_store();
        store.persist(&session("s1", 10)).unwrap();

        let guard = store.lock("s1").unwrap();
        assert_eq!(guard.session_id(), "s1");
        assert!(store.is_running("s1"));
        assert!(store.get("s1").unwrap().is_running());
        assert!(store.list()[0].is_running());
        assert!(matches!(
            store.lock("s1"),
            Err(TransferError::SessionRunning(_))
        ));

        drop(guard);
        assert!(!store.is_running("s1"));
        assert!(store.lock("s1").is_ok());
    }

    #[test]
    fn lock_is_exclusive_across_stores() {
        let (tmp, store) = test_store();
        store.persist(&session("s1", 10)).unwrap();
        let other = SessionStore::new(tmp.path().join("uploads"));
        other.initialize().unwrap();

        let _guard = store.lock("s1").unwrap();
        assert!(matches!(
            other.lock("s1"),
            Err(TransferError::SessionRunning(_))
        ));
        // Only this process's own activity shows as running.
        assert!(!other.get("s1").unwrap().is_running());
    }

    #[test]
    fn lock_file_removed_after_record_deleted() {
        let (_tmp, store) = test_store();
        store.persist(&session("s1", 10)).unwrap();
        let lock_file = store.working_directory().join("s1.lock");

        let guard = store.lock("s1").unwrap();
        assert!(lock_file.exists());
        store.delete("s1").unwrap();
        drop(guard);
        assert!(!lock_file.exists());
    }

    #[test]
    fn interrupted_transfer_becomes_paused() {
        let (tmp, store) = test_store();
        let mut s = session("s1", 100);
        s.advance_to(30).unwrap();
        s.set_state(SessionState::Transferring);
        store.persist(&s).unwrap();

        let reloaded = SessionStore::new(tmp.path().join("uploads"));
        reloaded.initialize().unwrap();
        let s1 = reloaded.get("s1").unwrap();
        assert_eq!(s1.state(), SessionState::Paused);
        assert_eq!(s1.offset(), 30);

        // The rewrite reached disk too.
        let raw = fs::read_to_string(reloaded.working_directory().join("s1.json")).unwrap();
        assert!(raw.contains("\"paused\""));
    }

    #[test]
    fn transfer_held_elsewhere_stays_transferring() {
        let (tmp, store) = test_store();
        let mut s = session("s1", 100);
        s.set_state(SessionState::Transferring);
        store.persist(&s).unwrap();
        let _guard = store.lock("s1").unwrap();

        let other = SessionStore::new(tmp.path().join("uploads"));
        other.initialize().unwrap();
        assert_eq!(other.get("s1").unwrap().state(), SessionState::Transferring);
    }

    #[test]
    fn concurrent_list_never_sees_torn_records() {
        use std::thread;

        let (tmp, store) = test_store();
        let store = Arc::new(store);
        store.persist(&session("s1", 1000)).unwrap();

        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let mut s = store.get("s1").unwrap();
                for offset in (10..=1000).step_by(10) {
                    s.advance_to(offset).unwrap();
                    store.persist(&s).unwrap();
                }
            })
        };

        let dir = tmp.path().join("uploads");
        let mut readers = vec![];
        for _ in 0..4 {
            let store = Arc::clone(&store);
            let dir = dir.clone();
            readers.push(thread::spawn(move || {
                let mut last = 0;
                for _ in 0..100 {
                    let s = store.get("s1").unwrap();
                    assert!(s.offset() >= last);
                    assert!(s.offset() <= s.total_size());
                    last = s.offset();

                    let raw = fs::read(dir.join("s1.json")).unwrap();
                    let on_disk: UploadSession = serde_json::from_slice(&raw).unwrap();
                    assert!(on_disk.offset() <= on_disk.total_size());
                }
            }));
        }

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(store.get("s1").unwrap().offset(), 1000);
    }
}
