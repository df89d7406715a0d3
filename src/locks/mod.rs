//! Locking subsystem for gslock.
//!
//! A lock is an empty object at a `gs://bucket/key` location. Mutual exclusion
//! comes entirely from the store's two conditional operations:
//! - **acquire** creates the object only if it does not exist; contention is
//!   retried at a fixed interval until the create succeeds
//! - **release** deletes the object only if its generation is still the one
//!   returned by our create, so a holder can never remove someone else's lock
//!
//! # Guards
//!
//! A successful acquire returns a [`LockGuard`] that must be released.
//! [`LockManager::with_lock`] wraps a body so release is attempted on every
//! exit route. Locks have no expiry: a process killed while holding one
//! leaves it in place until it is cleared by hand.

mod guard;
mod manager;


pub use guard::LockGuard;
pub use manager::LockManager;
