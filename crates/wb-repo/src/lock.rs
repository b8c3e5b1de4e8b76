//! Reader/writer lock per repository, shared by every process on the host.
//!
//! The lock is an `flock` on `{dir}/{sha256(repo path)}.lock`. Acquisition
//! blocks, so it runs on the blocking pool.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use sha2::{Digest, Sha256};

use crate::errors::Result;

/// Lock file for one repository.
#[derive(Clone, Debug)]
pub struct RepoLock {
    path: PathBuf,
}

/// Held lock; released on drop.
pub struct LockGuard {
    _lock: Flock<File>,
}

impl RepoLock {
    /// Lock for `repo` in the system temp dir.
    pub fn for_repo(repo: &Path) -> Self {
        Self::in_dir(&std::env::temp_dir(), repo)
    }

    /// Lock for `repo` with its file in `dir`.
    pub fn in_dir(dir: &Path, repo: &Path) -> Self {
        let digest = Sha256::digest(repo.to_string_lossy().as_bytes());
        let name: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        Self {
            path: dir.join(format!("{name}.lock")),
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Shared lock.
    pub async fn read(&self) -> Result<LockGuard> {
        self.acquire(FlockArg::LockShared).await
    }

    /// Exclusive lock.
    pub async fn write(&self) -> Result<LockGuard> {
        self.acquire(FlockArg::LockExclusive).await
    }

    async fn acquire(&self, arg: FlockArg) -> Result<LockGuard> {
        let path = self.path.clone();
        let lock = tokio::task::spawn_blocking(move || -> std::io::Result<Flock<File>> {
            let file = OpenOptions::new().create(true).truncate(false).write(true).open(&path)?;
            Flock::lock(file, arg).map_err(|(_, errno)| std::io::Error::from(errno))
        })
        .await
        .map_err(std::io::Error::other)??;
        Ok(LockGuard { _lock: lock })
    }
}
