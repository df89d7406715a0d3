//! Lock acquisition and scoped release.

use super::guard::LockGuard;
use crate::error::Result;
use crate::location::Location;
use crate::store::{CreateOutcome, ObjectStore};
use futures::FutureExt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Acquires and releases lock objects in one store.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn ObjectStore>,
    poll_interval: Duration,
}

impl LockManager {
    /// Create a manager that retries contended locks every `poll_interval`.
    pub fn new(store: Arc<dyn ObjectStore>, poll_interval: Duration) -> Self {
        Self {
            store,
            poll_interval,
        }
    }

    /// Acquire the lock at `location`, waiting as long as it takes.
    ///
    /// Contention is retried at a fixed interval with no backoff, no jitter and
    /// no bound; waiters are not queued, so any of them may win the next race.
    ///
    /// # Returns
    ///
    /// * `Ok(LockGuard)` - This process created the lock object
    /// * `Err(GslockError::Storage)` - The store failed for a reason other than
    ///   contention; no lock is held
    pub async fn acquire(&self, location: &Location) -> Result<LockGuard> {
        let mut attempts: u64 = 0;

        loop {
            attempts += 1;
            match self.store.create_if_absent(location).await? {
                CreateOutcome::Created(generation) => {
                    info!(
                        %location,
                        %generation,
                        attempts,
                        holder = %holder_identity(),
                        "acquired lock"
                    );
                    return Ok(LockGuard::new(
                        Arc::clone(&self.store),
                        location.clone(),
                        generation,
                    ));
                }
                CreateOutcome::AlreadyExists if attempts == 1 => {
                    info!(
                        %location,
                        poll_interval_ms = self.poll_interval.as_millis() as u64,
                        "lock is held elsewhere, waiting"
                    );
                }
                CreateOutcome::AlreadyExists => {
                    debug!(%location, attempts, "lock still held");
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Run `body` while holding the lock at `location`.
    ///
    /// Once the lock is acquired, release is attempted exactly once on every
    /// exit route: normal completion, an error value from `body`, or a panic
    /// (which resumes after the release attempt). Release failures are logged
    /// and never replace the body's result.
    pub async fn with_lock<F>(&self, location: &Location, body: F) -> Result<F::Output>
    where
        F: Future,
    {
        let guard = self.acquire(location).await?;
        debug!(
            location = %guard.location(),
            generation = %guard.generation(),
            "running guarded body"
        );

        let outcome = AssertUnwindSafe(body).catch_unwind().await;

        if let Err(err) = guard.release().await {
            warn!(error = %err, "lock release failed");
        }

        match outcome {
            Ok(value) => Ok(value),
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

/// `user@host:pid` of this process, for log lines.
fn holder_identity() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    format!("{}@{}:{}", user, host, std::process::id())
}
