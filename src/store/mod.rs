//! Object storage backends for lock objects.
//!
//! The lock protocol needs exactly two conditional operations from a store:
//! - **create-if-absent**: write an empty object only if none exists at the key
//! - **delete-if-generation-matches**: delete the object only if it is still
//!   the exact creation we made
//!
//! Both are expressed by the [`ObjectStore`] trait with typed outcomes, so the
//! lock manager never inspects status codes. Contention (`AlreadyExists`) and
//! fencing failures (`GenerationMismatch`, `NotFound`) are outcomes, not errors;
//! [`StoreError`] is reserved for everything else.
//!
//! # Backends
//!
//! - [`GcsStore`]: Cloud Storage JSON API (or an emulator)
//! - [`FsStore`]: a local directory, for single-host use and tests

pub mod auth;
mod fs;
mod gcs;
#[cfg(test)]
pub mod memory;

use crate::config::{Backend, Config};
use crate::error::{GslockError, Result};
use crate::location::Location;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

pub use fs::FsStore;
pub use gcs::GcsStore;

/// Backend-assigned version of a lock object.
///
/// Each successful creation at a key yields a distinct generation. Deletes are
/// conditioned on it so a holder can only ever remove its own lock object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Generation(pub i64);

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of a create-if-absent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The object was created at this generation.
    Created(Generation),
    /// An object already exists at the key (precondition failed).
    AlreadyExists,
}

/// Outcome of a delete-if-generation-matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The object existed at the expected generation and was deleted.
    Deleted,
    /// No object exists at the key.
    NotFound,
    /// An object exists but at a different generation (precondition failed).
    GenerationMismatch,
}

/// Errors from a storage backend other than contention or fencing outcomes.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The HTTP request could not be sent or its body could not be read.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with an unexpected status.
    #[error("{operation} returned HTTP {status}: {message}")]
    Status {
        operation: &'static str,
        status: u16,
        message: String,
    },

    /// A local filesystem operation failed.
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The backend answered with something that could not be interpreted.
    #[error("unexpected response: {0}")]
    InvalidResponse(String),

    /// An access token could not be obtained or refreshed.
    #[error("authentication failed: {0}")]
    Auth(String),
}

/// Conditional object operations backing the lock protocol.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create an empty object at `location` only if no object exists there.
    async fn create_if_absent(
        &self,
        location: &Location,
    ) -> std::result::Result<CreateOutcome, StoreError>;

    /// Delete the object at `location` only if its generation is `generation`.
    async fn delete_if_generation_matches(
        &self,
        location: &Location,
        generation: Generation,
    ) -> std::result::Result<DeleteOutcome, StoreError>;
}

/// Build the store selected by `config`.
///
/// For Cloud Storage this resolves credentials and fetches a first access
/// token, so a misconfigured environment fails here rather than mid-acquire.
///
/// # Returns
///
/// * `Ok(store)` - A ready-to-use store
/// * `Err(GslockError::Auth)` - Credentials or client construction failed
pub async fn connect(config: &Config) -> Result<Arc<dyn ObjectStore>> {
    match &config.backend {
        Backend::Local(root) => Ok(Arc::new(FsStore::new(root.clone()))),
        Backend::Emulator(host) => {
            let store = GcsStore::emulator(host).map_err(|e| GslockError::Auth(e.to_string()))?;
            Ok(Arc::new(store))
        }
        Backend::Gcs => {
            let store = GcsStore::connect(config)
                .await
                .map_err(|e| GslockError::Auth(e.to_string()))?;
            Ok(Arc::new(store))
        }
    }
}
