//! Error types for the gslock CLI.
//!
//! Uses thiserror for derive macros and provides user-actionable error messages.

use crate::exit_codes;
use crate::store::StoreError;
use thiserror::Error;

/// Main error type for gslock operations.
///
/// Lock contention is never an error: it is retried inside the lock manager.
#[derive(Error, Debug)]
pub enum GslockError {
    /// User provided invalid arguments.
    #[error("{0}")]
    Usage(String),

    /// The lock location is not of the form `gs://bucket/key`.
    #[error("malformed lock location '{0}': expected gs://<bucket>/<key>")]
    MalformedLocation(String),

    /// Credentials could not be resolved or the storage client could not be built.
    #[error("failed to create storage client: {0}")]
    Auth(String),

    /// The storage backend failed for a reason other than contention.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// The lock could not be released.
    #[error("failed to release lock {location}: {reason}")]
    Release { location: String, reason: String },

    /// The guarded command could not be started or waited on.
    #[error("failed to run '{command}': {source}")]
    ChildProcess {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl GslockError {
    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            GslockError::Usage(_) => exit_codes::FAILURE,
            GslockError::MalformedLocation(_) => exit_codes::FAILURE,
            GslockError::Auth(_) => exit_codes::FAILURE,
            GslockError::Storage(_) => exit_codes::FAILURE,
            GslockError::Release { .. } => exit_codes::FAILURE,
            GslockError::ChildProcess { .. } => exit_codes::FAILURE,
        }
    }
}

/// Result type alias for gslock operations.
pub type Result<T> = std::result::Result<T, GslockError>;
