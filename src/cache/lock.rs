//! Per-directory writer locks.
//!
//! A full run and a selective re-run on the same commit both write into the
//! same result directory. Each holds that directory's lock for its whole
//! duration, so their writes never interleave.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

/// Registry of async locks keyed by result directory.
#[derive(Debug, Clone, Default)]
pub struct CommitLocks {
    locks: Arc<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>>,
}

impl CommitLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `dir`.
    pub async fn acquire(&self, dir: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(dir.to_path_buf()).or_default())
        };
        tracing::debug!(dir = %dir.display(), "waiting for commit lock");
        lock.lock_owned().await
    }

    /// Acquire `dir` only if no one else holds it.
    pub fn try_acquire(&self, dir: &Path) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(dir.to_path_buf()).or_default())
        };
        lock.try_lock_owned().ok()
    }
}
