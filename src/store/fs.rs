//! Local directory backend.
//!
//! Lock objects are empty files at `<root>/<bucket>/<key>`, created with
//! **create_new** semantics (exclusive create) so only one process can create
//! a given lock at a time. Each new lock file is stamped with the current time
//! at full precision; its generation hashes that modification time together
//! with the file's device and inode, so a lock that is cleared and recreated
//! at the same path gets a new generation even on filesystems with coarse
//! timestamps.
//!
//! Deletion checks the generation and then removes the file; unlike Cloud
//! Storage the two steps are not atomic, which is acceptable for processes on
//! a single host that all go through this protocol.

use super::{CreateOutcome, DeleteOutcome, Generation, ObjectStore, StoreError};
use crate::location::Location;
use async_trait::async_trait;
use std::io;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs::{self, OpenOptions};

/// Store that keeps lock objects as files under a root directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Create a store rooted at `root`. The directory is created on first use.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Path of the lock file for `location`.
    ///
    /// Rejects keys that would resolve outside the bucket directory.
    pub fn object_path(&self, location: &Location) -> Result<PathBuf, StoreError> {
        let relative = Path::new(&location.bucket).join(&location.key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(StoreError::Io {
                path: relative,
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "lock key must not contain '.', '..' or absolute segments",
                ),
            });
        }
        Ok(self.root.join(relative))
    }
}

fn io_error(path: &Path, source: io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

async fn generation_of(path: &Path) -> io::Result<Generation> {
    let metadata = fs::metadata(path).await?;
    let nanos = metadata
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map_err(|e| io::Error::other(e.to_string()))?
        .as_nanos();

    let mut hasher = DefaultHasher::new();
    nanos.hash(&mut hasher);
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        metadata.dev().hash(&mut hasher);
        metadata.ino().hash(&mut hasher);
    }
    Ok(Generation(hasher.finish() as i64))
}

/// Give a fresh lock file a full-precision modification time and flush it.
async fn stamp(file: fs::File) -> io::Result<()> {
    let file = file.into_std().await;
    tokio::task::spawn_blocking(move || {
        file.set_modified(SystemTime::now())?;
        file.sync_all()
    })
    .await
    .map_err(io::Error::other)?
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn create_if_absent(&self, location: &Location) -> Result<CreateOutcome, StoreError> {
        let path = self.object_path(location)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => {
                if let Err(e) = stamp(file).await {
                    let _ = fs::remove_file(&path).await;
                    return Err(io_error(&path, e));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Ok(CreateOutcome::AlreadyExists);
            }
            Err(e) => return Err(io_error(&path, e)),
        }

        let generation = generation_of(&path).await.map_err(|e| io_error(&path, e))?;
        Ok(CreateOutcome::Created(generation))
    }

    async fn delete_if_generation_matches(
        &self,
        location: &Location,
        generation: Generation,
    ) -> Result<DeleteOutcome, StoreError> {
        let path = self.object_path(location)?;

        let current = match generation_of(&path).await {
            Ok(current) => current,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(DeleteOutcome::NotFound),
            Err(e) => return Err(io_error(&path, e)),
        };
        if current != generation {
            return Ok(DeleteOutcome::GenerationMismatch);
        }

        match fs::remove_file(&path).await {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(DeleteOutcome::NotFound),
            Err(e) => Err(io_error(&path, e)),
        }
    }
}
