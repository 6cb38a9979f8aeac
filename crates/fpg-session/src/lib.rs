// SPDX-License-Identifier: MIT OR Apache-2.0
//! Chunked-upload session storage.
//!
//! A session is a client-chosen opaque id backed by an append-only
//! `<id>.wfp` file under the temp directory. Appends within a session are
//! serialised through a per-id async lock; the lock table itself sits behind
//! a synchronous mutex and entries are created lazily on first use.
//!
//! Finalisation returns a [`FinalizedSession`] that owns the session lock for
//! the duration of the terminal scan; dropping it deletes the session file,
//! on success and failure paths alike.

#![deny(unsafe_code)]

use fpg_error::GatewayError;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Suffix for session files under the temp directory.
pub const SESSION_SUFFIX: &str = ".wfp";

/// Validate a client-supplied session id before any filesystem access.
///
/// Ids are opaque but must not escape the temp directory.
pub fn validate_session_id(id: &str) -> Result<(), GatewayError> {
    if id.is_empty() {
        return Err(GatewayError::BadInput("missing session id".into()));
    }
    if id.contains('/') || id.contains("..") {
        return Err(GatewayError::BadInput(format!(
            "invalid session id: {id}"
        )));
    }
    Ok(())
}

/// A finalised session: the assembled payload plus ownership of the session
/// lock until the terminal scan completes. Dropping deletes the session file.
#[derive(Debug)]
pub struct FinalizedSession {
    /// Full session payload, chunks concatenated in append order.
    pub payload: Vec<u8>,
    path: PathBuf,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for FinalizedSession {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(target: "fpg.session", path = %self.path.display(), error = %e, "session file cleanup failed");
            }
        }
    }
}

/// Append-only session store keyed by opaque session ids.
#[derive(Debug)]
pub struct SessionStore {
    temp_dir: PathBuf,
    locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SessionStore {
    /// Create a store rooted at `temp_dir`.
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Path of the session file for `id`.
    pub fn session_path(&self, id: &str) -> PathBuf {
        self.temp_dir.join(format!("{id}{SESSION_SUFFIX}"))
    }

    fn lock_for(&self, id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().expect("session lock table poisoned");
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Append a chunk to the session file, creating it on first use.
    ///
    /// A newline is inserted after any chunk that does not end in one, so
    /// fingerprint records never run together across chunk boundaries. The
    /// session lock is released on every exit path.
    pub async fn append(&self, id: &str, chunk: &[u8]) -> Result<(), GatewayError> {
        validate_session_id(id)?;
        let lock = self.lock_for(id);
        let _guard = lock.lock_owned().await;

        let path = self.session_path(id);
        let mut opts = tokio::fs::OpenOptions::new();
        opts.append(true).create(true);
        #[cfg(unix)]
        opts.mode(0o644);
        let mut file = opts
            .open(&path)
            .await
            .map_err(|e| GatewayError::SessionIo(format!("open {}: {e}", path.display())))?;

        file.write_all(chunk)
            .await
            .map_err(|e| GatewayError::SessionIo(format!("append {}: {e}", path.display())))?;
        if chunk.last() != Some(&b'\n') {
            file.write_all(b"\n")
                .await
                .map_err(|e| GatewayError::SessionIo(format!("append {}: {e}", path.display())))?;
        }
        file.flush()
            .await
            .map_err(|e| GatewayError::SessionIo(format!("flush {}: {e}", path.display())))?;

        debug!(target: "fpg.session", session = id, bytes = chunk.len(), "chunk appended");
        Ok(())
    }

    /// Read the assembled session payload and take the session lock for the
    /// duration of the terminal scan.
    pub async fn finalize(&self, id: &str) -> Result<FinalizedSession, GatewayError> {
        validate_session_id(id)?;
        let lock = self.lock_for(id);
        let guard = lock.lock_owned().await;

        let path = self.session_path(id);
        let payload = tokio::fs::read(&path)
            .await
            .map_err(|e| GatewayError::SessionIo(format!("read {}: {e}", path.display())))?;

        debug!(target: "fpg.session", session = id, bytes = payload.len(), "session finalised");
        Ok(FinalizedSession {
            payload,
            path,
            _guard: guard,
        })
    }

    /// Drop lock-table entries with no session file on disk and no active
    /// holder. Entries for in-flight sessions are retained.
    pub fn sweep(&self) -> usize {
        let mut locks = self.locks.lock().expect("session lock table poisoned");
        let before = locks.len();
        let temp_dir = self.temp_dir.clone();
        locks.retain(|id, lock| {
            Arc::strong_count(lock) > 1
                || temp_dir.join(format!("{id}{SESSION_SUFFIX}")).exists()
        });
        before - locks.len()
    }

    /// Number of tracked session lock entries.
    pub fn tracked_sessions(&self) -> usize {
        self.locks.lock().expect("session lock table poisoned").len()
    }
}
