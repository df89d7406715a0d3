//! Lock location parsing.
//!
//! A lock is addressed as `gs://<bucket>/<key>`. The key is everything after
//! the first `/` following the bucket and may itself contain slashes.

use crate::error::{GslockError, Result};
use std::fmt;

/// URI scheme prefix recognized for lock locations.
pub const SCHEME: &str = "gs://";

/// A parsed lock location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    /// Bucket (container) holding the lock object.
    pub bucket: String,

    /// Object key of the lock within the bucket.
    pub key: String,
}

impl Location {
    /// Parse a `gs://bucket/key` location.
    ///
    /// # Returns
    ///
    /// * `Ok(Location)` - Bucket and non-empty key
    /// * `Err(GslockError::MalformedLocation)` - Wrong scheme, empty bucket, or empty key
    pub fn parse(path: &str) -> Result<Self> {
        let rest = path
            .strip_prefix(SCHEME)
            .ok_or_else(|| GslockError::MalformedLocation(path.to_string()))?;

        // A bare bucket cannot be a lock target.
        match rest.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok(Self {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            _ => Err(GslockError::MalformedLocation(path.to_string())),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}", SCHEME, self.bucket, self.key)
    }
}
