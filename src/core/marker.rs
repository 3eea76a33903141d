use crate::utils::error::{BootstrapError, Result};
use nix::fcntl::{Flock, FlockArg};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// A file whose existence records a completed step. Content is never read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    path: PathBuf,
}

impl Marker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Callers map the failure to the error of the step the marker records.
    pub fn create(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&self.path)?;
        file.sync_all()
    }

    /// Returns whether a file was actually removed.
    pub fn remove(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Exclusive advisory lock serialising first runs that share a config dir.
/// Released on drop.
pub struct BootstrapLock {
    _lock: Flock<File>,
    path: PathBuf,
}

impl BootstrapLock {
    /// Blocks until the lock is held.
    pub async fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let lock_path = path.clone();

        tokio::task::spawn_blocking(move || Self::acquire_blocking(lock_path))
            .await
            .map_err(|e| BootstrapError::LockFailed {
                path,
                message: e.to_string(),
            })?
    }

    fn acquire_blocking(path: PathBuf) -> Result<Self> {
        let lock_failed = |message: String| BootstrapError::LockFailed {
            path: path.clone(),
            message,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| lock_failed(e.to_string()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| lock_failed(e.to_string()))?;

        let lock = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| lock_failed(errno.to_string()))?;

        Ok(Self { _lock: lock, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
