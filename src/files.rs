//! Scratch-file management for request staging.
//!
//! Every staged file lives directly inside one configured directory and is named with a fresh
//! UUID, so concurrent requests never collide. Removal is tied to `StagedFile`'s `Drop`, which
//! means a file is cleaned up on every exit path of the request that created it, including a
//! request future that is dropped mid-flight.

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

/// Bytes in one MiB, the unit of the configured upload limit.
pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Allocates, measures, and removes staged files inside a scratch directory.
#[derive(Debug, Clone)]
pub struct TempStore {
    dir: PathBuf,
    max_file_size_bytes: u64,
}

impl TempStore {
    pub fn new(dir: impl Into<PathBuf>, max_file_size_bytes: u64) -> Self {
        Self {
            dir: dir.into(),
            max_file_size_bytes,
        }
    }

    /// The scratch directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Upper bound (inclusive) on a staged file's size.
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_bytes
    }

    /// Create the scratch directory (and parents). Safe to call repeatedly.
    ///
    /// Blocking; meant for startup. Request paths go through [`TempStore::create_temp_path`].
    pub fn ensure_dir(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.dir)
    }

    /// Return a fresh, collision-free path inside the scratch directory.
    ///
    /// The file itself is not created. `suffix` is appended verbatim (e.g. `".wav"`).
    pub async fn create_temp_path(&self, suffix: &str) -> io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(self.dir.join(format!("{}{}", Uuid::new_v4(), suffix)))
    }

    /// Allocate a path whose file is removed when the returned guard drops.
    pub async fn stage(&self, suffix: &str) -> io::Result<StagedFile> {
        let path = self.create_temp_path(suffix).await?;
        Ok(self.adopt(path))
    }

    /// Take ownership of an existing file: it is removed when the returned guard drops.
    pub fn adopt(&self, path: impl Into<PathBuf>) -> StagedFile {
        StagedFile {
            path: path.into(),
            store: self.clone(),
            armed: true,
        }
    }

    /// `true` iff the file at `path` is no larger than the configured maximum.
    pub async fn validate_size(&self, path: &Path) -> io::Result<bool> {
        let size = tokio::fs::metadata(path).await?.len();
        Ok(size <= self.max_file_size_bytes)
    }

    /// Best-effort removal. Never fails: a missing file is expected, anything else is logged.
    pub fn cleanup(&self, path: &Path) {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed staged file"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => debug!(path = %path.display(), error = %err, "failed to remove staged file"),
        }
    }
}

/// A staged file owned by exactly one pipeline invocation.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    store: TempStore,
    armed: bool,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Disarm the guard and hand ownership of the file to the caller.
    pub fn keep(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.armed {
            self.store.cleanup(&self.path);
        }
    }
}
