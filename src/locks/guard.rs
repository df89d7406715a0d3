//! Lock guard for an acquired lock object.

use crate::error::{GslockError, Result};
use crate::location::Location;
use crate::store::{DeleteOutcome, Generation, ObjectStore};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Proof of a successful acquire, carrying the obligation to release.
///
/// Release is an async delete, so it cannot run from `Drop`. Use
/// [`LockGuard::release`] (or [`super::LockManager::with_lock`], which always
/// calls it). Dropping an unreleased guard logs a warning naming the lock
/// object left behind.
pub struct LockGuard {
    store: Arc<dyn ObjectStore>,
    location: Location,
    generation: Generation,
    released: bool,
}

impl LockGuard {
    pub(super) fn new(store: Arc<dyn ObjectStore>, location: Location, generation: Generation) -> Self {
        Self {
            store,
            location,
            generation,
            released: false,
        }
    }

    /// Location of the held lock.
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Generation of the lock object this guard created.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Delete the lock object, but only if it is still the one we created.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The lock object was deleted
    /// * `Err(GslockError::Release)` - The object is gone, belongs to another
    ///   holder, or the store failed; nothing was deleted
    pub async fn release(mut self) -> Result<()> {
        self.released = true;

        let outcome = self
            .store
            .delete_if_generation_matches(&self.location, self.generation)
            .await
            .map_err(|e| self.release_error(e.to_string()))?;

        match outcome {
            DeleteOutcome::Deleted => Ok(()),
            DeleteOutcome::NotFound => Err(self.release_error("lock object no longer exists")),
            DeleteOutcome::GenerationMismatch => {
                Err(self.release_error("lock is now held by another holder"))
            }
        }
    }

    fn release_error(&self, reason: impl Into<String>) -> GslockError {
        GslockError::Release {
            location: self.location.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("location", &self.location)
            .field("generation", &self.generation)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                location = %self.location,
                generation = %self.generation,
                "lock dropped without release; the lock object stays until cleared by hand"
            );
        }
    }
}
