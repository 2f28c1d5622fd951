//! Cross-process exclusive lock with compromise detection.
//!
//! The election is decided here: exactly one process holds the advisory
//! lock on the derived lock path, and that process is entitled to bind the
//! socket. Contention is not an error; it is the signal to become a
//! follower.
//!
//! A held lock can be *compromised* from outside: the backing file deleted
//! or swapped out from under the holder. That is detected by a background
//! watcher task and delivered out of band on a watch channel, never as the
//! result of `acquire`/`release`. The engine reacts by releasing cleanly
//! and re-entering election.
//!
//! The lock file is intentionally left in place on release. Unlinking a
//! file that a contender may already hold open would let two processes lock
//! different inodes of the same path at once; the advisory lock itself is
//! dropped on unlock (or process death), which is all the single-leader
//! invariant needs.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use commune_core::{Providers, TaskProvider, TimeProvider};
use thiserror::Error;
use tokio::sync::watch;

/// Errors from lock operations.
#[derive(Debug, Clone, Error)]
pub enum LockError {
    /// Another process already holds the lock. Signals "become follower".
    #[error("lock is held by another process")]
    Contended,

    /// Underlying filesystem error.
    #[error("lock I/O error: {0}")]
    Io(String),
}

/// Ownership token for a held lock.
///
/// Exclusively owned by the engine instance that acquired it and released
/// exactly once: [`LockCoordinator::release`] consumes the handle, so a
/// double release does not typecheck. Dropping an unreleased handle also
/// unlocks (the OS releases advisory locks on close), covering unwind
/// paths.
#[derive(Debug)]
pub struct LockHandle {
    file: Option<File>,
    path: PathBuf,
    compromised_rx: watch::Receiver<bool>,
    watcher: tokio::task::JoinHandle<()>,
}

impl LockHandle {
    /// Whether the lock has been reported compromised.
    pub fn is_compromised(&self) -> bool {
        *self.compromised_rx.borrow()
    }

    /// Watch channel that flips to `true` when the lock is compromised.
    pub fn compromised(&self) -> watch::Receiver<bool> {
        self.compromised_rx.clone()
    }

    /// The lock file path this handle guards.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn release_now(mut self) -> Result<(), LockError> {
        self.watcher.abort();
        if let Some(file) = self.file.take() {
            // Qualified call: std's inherent File::unlock would shadow it.
            fs2::FileExt::unlock(&file).map_err(|e| LockError::Io(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

/// Coordinator for the exclusive cross-process lock at one path.
#[derive(Clone)]
pub struct LockCoordinator<P: Providers> {
    providers: P,
    path: PathBuf,
    poll_interval: Duration,
}

impl<P: Providers> LockCoordinator<P> {
    /// Create a coordinator for the lock file at `path`.
    ///
    /// `poll_interval` is how often the compromise watcher re-checks the
    /// backing file while the lock is held.
    pub fn new(providers: P, path: PathBuf, poll_interval: Duration) -> Self {
        Self {
            providers,
            path,
            poll_interval,
        }
    }

    /// Try to take the lock.
    ///
    /// Never blocks waiting for a holder: if another process has the lock
    /// this returns [`LockError::Contended`] immediately.
    ///
    /// # Errors
    ///
    /// `Contended` when held elsewhere; `Io` for real filesystem failures.
    pub async fn acquire(&self) -> Result<LockHandle, LockError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| LockError::Io(e.to_string()))?;

        match fs2::FileExt::try_lock_exclusive(&file) {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                return Err(LockError::Contended);
            }
            Err(e) => return Err(LockError::Io(e.to_string())),
        }

        let identity = file_identity(&file).map_err(|e| LockError::Io(e.to_string()))?;
        tracing::debug!(path = %self.path.display(), "lock acquired");

        let (tx, rx) = watch::channel(false);
        let watcher = self.providers.task().spawn_task(
            "lock-watcher",
            watch_lock(
                self.path.clone(),
                identity,
                self.poll_interval,
                self.providers.time().clone(),
                tx,
            ),
        );

        Ok(LockHandle {
            file: Some(file),
            path: self.path.clone(),
            compromised_rx: rx,
            watcher,
        })
    }

    /// Release a held lock.
    ///
    /// Consumes the handle; the compromise watcher is stopped first. Safe to
    /// call on a compromised handle (the unlock is best-effort then).
    ///
    /// # Errors
    ///
    /// `Io` if the unlock itself fails.
    pub async fn release(&self, handle: LockHandle) -> Result<(), LockError> {
        tracing::debug!(path = %self.path.display(), "lock released");
        handle.release_now()
    }
}

/// Background watcher: flags the lock as compromised when the backing file
/// disappears or is replaced by a different inode.
async fn watch_lock<T: TimeProvider>(
    path: PathBuf,
    identity: u64,
    interval: Duration,
    time: T,
    tx: watch::Sender<bool>,
) {
    loop {
        if time.sleep(interval).await.is_err() {
            return;
        }
        if tx.is_closed() {
            return;
        }

        let intact = match std::fs::metadata(&path) {
            Ok(meta) => metadata_identity(&meta) == identity,
            Err(_) => false,
        };
        if !intact {
            tracing::warn!(path = %path.display(), "lock file compromised");
            let _ = tx.send(true);
            return;
        }
    }
}

#[cfg(unix)]
fn file_identity(file: &File) -> std::io::Result<u64> {
    use std::os::unix::fs::MetadataExt;
    Ok(file.metadata()?.ino())
}

#[cfg(unix)]
fn metadata_identity(meta: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn file_identity(_file: &File) -> std::io::Result<u64> {
    // Existence-only compromise detection on platforms without inodes.
    Ok(0)
}

#[cfg(not(unix))]
fn metadata_identity(_meta: &std::fs::Metadata) -> u64 {
    0
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use commune_core::TokioProviders;

    fn coordinator(path: PathBuf) -> LockCoordinator<TokioProviders> {
        LockCoordinator::new(TokioProviders::new(), path, Duration::from_millis(20))
    }

    async fn with_local_set<F: std::future::Future>(fut: F) -> F::Output {
        tokio::task::LocalSet::new().run_until(fut).await
    }

    #[tokio::test]
    async fn first_acquire_wins_second_contends() {
        with_local_set(async {
            let dir = tempfile::tempdir().expect("tempdir");
            let path = dir.path().join("net.lock");

            let a = coordinator(path.clone());
            let b = coordinator(path);

            let handle = a.acquire().await.expect("first acquire");
            let contended = b.acquire().await;
            assert!(matches!(contended, Err(LockError::Contended)));

            a.release(handle).await.expect("release");
        })
        .await;
    }

    #[tokio::test]
    async fn released_lock_can_be_retaken() {
        with_local_set(async {
            let dir = tempfile::tempdir().expect("tempdir");
            let path = dir.path().join("net.lock");

            let a = coordinator(path.clone());
            let b = coordinator(path);

            let handle = a.acquire().await.expect("acquire");
            a.release(handle).await.expect("release");

            let retaken = b.acquire().await.expect("acquire after release");
            b.release(retaken).await.expect("release");
        })
        .await;
    }

    #[tokio::test]
    async fn deleted_lock_file_reports_compromise() {
        with_local_set(async {
            let dir = tempfile::tempdir().expect("tempdir");
            let path = dir.path().join("net.lock");

            let coordinator = coordinator(path.clone());
            let handle = coordinator.acquire().await.expect("acquire");
            assert!(!handle.is_compromised());

            std::fs::remove_file(&path).expect("delete lock file");

            let mut compromised = handle.compromised();
            tokio::time::timeout(Duration::from_secs(1), compromised.changed())
                .await
                .expect("watcher noticed within a second")
                .expect("watch channel alive");
            assert!(handle.is_compromised());

            coordinator.release(handle).await.expect("best-effort release");
        })
        .await;
    }

    #[tokio::test]
    async fn replaced_lock_file_reports_compromise() {
        with_local_set(async {
            let dir = tempfile::tempdir().expect("tempdir");
            let path = dir.path().join("net.lock");

            let coordinator = coordinator(path.clone());
            let handle = coordinator.acquire().await.expect("acquire");

            // Same path, different inode.
            std::fs::remove_file(&path).expect("delete");
            std::fs::write(&path, b"impostor").expect("recreate");

            let mut compromised = handle.compromised();
            tokio::time::timeout(Duration::from_secs(1), compromised.changed())
                .await
                .expect("watcher noticed within a second")
                .expect("watch channel alive");
            assert!(handle.is_compromised());
        })
        .await;
    }
}
