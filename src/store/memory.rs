//! In-process store used by tests.
//!
//! Behaves like Cloud Storage for the two conditional operations: every
//! creation gets a fresh, strictly increasing generation. It also counts calls
//! and can be told to fail, so tests can check what the lock protocol did.

use super::{CreateOutcome, DeleteOutcome, Generation, ObjectStore, StoreError};
use crate::location::Location;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<Location, Generation>>,
    next_generation: AtomicI64,
    creates: AtomicUsize,
    deletes: AtomicUsize,
    fail_creates: AtomicBool,
    fail_deletes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation of the object at `location`, if it exists.
    pub fn generation(&self, location: &Location) -> Option<Generation> {
        self.objects.lock().unwrap().get(location).copied()
    }

    pub fn contains(&self, location: &Location) -> bool {
        self.generation(location).is_some()
    }

    /// Place an object as if another holder had created it.
    pub fn insert_foreign(&self, location: &Location) -> Generation {
        let generation = self.bump();
        self.objects
            .lock()
            .unwrap()
            .insert(location.clone(), generation);
        generation
    }

    /// Remove an object regardless of generation, like a manual cleanup.
    pub fn remove(&self, location: &Location) {
        self.objects.lock().unwrap().remove(location);
    }

    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.create_calls() + self.delete_calls()
    }

    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    fn bump(&self) -> Generation {
        Generation(self.next_generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn injected(operation: &'static str) -> StoreError {
        StoreError::Status {
            operation,
            status: 503,
            message: "injected failure".to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn create_if_absent(&self, location: &Location) -> Result<CreateOutcome, StoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(Self::injected("create"));
        }

        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(location) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        let generation = self.bump();
        objects.insert(location.clone(), generation);
        Ok(CreateOutcome::Created(generation))
    }

    async fn delete_if_generation_matches(
        &self,
        location: &Location,
        generation: Generation,
    ) -> Result<DeleteOutcome, StoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::injected("delete"));
        }

        let mut objects = self.objects.lock().unwrap();
        match objects.get(location) {
            None => Ok(DeleteOutcome::NotFound),
            Some(current) if *current != generation => Ok(DeleteOutcome::GenerationMismatch),
            Some(_) => {
                objects.remove(location);
                Ok(DeleteOutcome::Deleted)
            }
        }
    }
}
