//! Advisory file locking. Two locks share this mechanism: the per-VM config
//! lock (`<lock_dir>/lock-<vmid>.conf`, default 10 s timeout) and the
//! process-wide hugepage lock (60 s timeout). Both are `flock(2)`-based RAII
//! guards; the lock is released automatically when the guard drops.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::{flock, FlockArg};
use std::os::unix::io::AsRawFd;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("failed to open lock file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out after {0:?} waiting for lock {1}")]
    Timeout(Duration, PathBuf),
    #[error("flock failed on {path}: {source}")]
    Flock {
        path: PathBuf,
        #[source]
        source: Errno,
    },
}

/// An acquired advisory lock. Releases on drop.
pub struct LockGuard {
    path: PathBuf,
    file: File,
}

impl LockGuard {
    /// Block-acquire an exclusive lock on `path`, creating the file if
    /// necessary, polling at a short interval until `timeout` elapses.
    pub fn acquire(path: impl AsRef<Path>, timeout: Duration) -> Result<Self, LockError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .map_err(|source| LockError::Open {
                path: path.clone(),
                source,
            })?;

        let deadline = Instant::now() + timeout;
        loop {
            match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
                Ok(()) => {
                    return Ok(LockGuard { path, file });
                }
                Err(Errno::EWOULDBLOCK) => {
                    if Instant::now() >= deadline {
                        return Err(LockError::Timeout(timeout, path));
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(source) => {
                    return Err(LockError::Flock { path, source });
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = flock(self.file.as_raw_fd(), FlockArg::Unlock);
    }
}

/// Default timeout for the per-VM config lock, per the concurrency model.
pub const VM_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the process-wide hugepage advisory lock.
pub const HUGEPAGE_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Build the canonical per-VM lock path `<lock_dir>/lock-<vmid>.conf`.
pub fn vm_lock_path(lock_dir: impl AsRef<Path>, vmid: u32) -> PathBuf {
    lock_dir.as_ref().join(format!("lock-{}.conf", vmid))
}

/// Acquire the per-VM advisory lock with the standard 10 s timeout.
pub fn lock_vm(lock_dir: impl AsRef<Path>, vmid: u32) -> Result<LockGuard, LockError> {
    LockGuard::acquire(vm_lock_path(lock_dir, vmid), VM_LOCK_TIMEOUT)
}

/// Acquire the process-wide hugepage advisory lock with the standard 60 s
/// timeout.
pub fn lock_hugepages(lock_dir: impl AsRef<Path>) -> Result<LockGuard, LockError> {
    LockGuard::acquire(
        lock_dir.as_ref().join("hugepage.lock"),
        HUGEPAGE_LOCK_TIMEOUT,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_acquire_and_release() {
        let dir = std::env::temp_dir().join(format!("vmctl-lock-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("lock-100.conf");

        let guard = LockGuard::acquire(&path, Duration::from_secs(1)).unwrap();
        assert_eq!(guard.path(), path.as_path());
        drop(guard);

        // Lock is releasable again immediately after drop.
        let guard2 = LockGuard::acquire(&path, Duration::from_secs(1)).unwrap();
        drop(guard2);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_contended_lock_times_out() {
        let dir = std::env::temp_dir().join(format!("vmctl-lock-test2-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("lock-101.conf");

        let _held = LockGuard::acquire(&path, Duration::from_secs(1)).unwrap();
        let result = LockGuard::acquire(&path, Duration::from_millis(150));
        assert!(matches!(result, Err(LockError::Timeout(_, _))));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_vm_lock_path() {
        let p = vm_lock_path("/run/vmctl/lock", 105);
        assert_eq!(p, PathBuf::from("/run/vmctl/lock/lock-105.conf"));
    }
}
