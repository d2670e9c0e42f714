//! Chaotic storage wrapper for fault injection testing
//!
//! Storage wrapper that randomly fails operations so tests can verify that a
//! storage failure surfaces as `SERVER ERROR` on the affected request and
//! never takes down the event loop.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::sync::{Arc, Mutex};

use super::{Fields, Storage, StorageError, StoredRecord, Table};

/// Chaotic storage wrapper that randomly injects failures
///
/// Delegates to an underlying storage implementation but randomly fails
/// operations based on a configured failure rate. Uses Arc<Mutex<>> for the
/// RNG state, making it Clone and thread-safe.
#[derive(Clone)]
pub struct ChaoticStorage<S: Storage> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    /// RNG state for deterministic chaos
    rng: Arc<Mutex<ChaoticRng>>,
    /// Operations attempted, failed or not
    operation_count: Arc<Mutex<usize>>,
}

/// Linear congruential generator so chaos runs are reproducible per seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Generate next random value [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }

    /// Returns true with probability = `failure_rate`
    fn should_fail(&mut self, failure_rate: f64) -> bool {
        self.next() < failure_rate
    }
}

impl<S: Storage> ChaoticStorage<S> {
    /// Create a new chaotic storage wrapper
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Create with explicit seed for reproducible chaos
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operation_count: Arc::new(Mutex::new(0)),
        }
    }

    /// Underlying storage (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of storage operations attempted.
    pub fn operation_count(&self) -> usize {
        self.operation_count.lock().map_or(0, |count| *count)
    }

    /// Count the operation and decide whether it fails.
    fn inject(&self) -> Result<(), StorageError> {
        if let Ok(mut count) = self.operation_count.lock() {
            *count += 1;
        }

        let fail = self
            .rng
            .lock()
            .map_err(|_| StorageError::Io("chaotic rng mutex poisoned".to_string()))?
            .should_fail(self.failure_rate);

        if fail {
            return Err(StorageError::Io("chaotic failure injection".to_string()));
        }

        Ok(())
    }
}

impl<S: Storage> Storage for ChaoticStorage<S> {
    fn create(&self, table: Table, fields: Fields) -> Result<StoredRecord, StorageError> {
        self.inject()?;
        self.inner.create(table, fields)
    }

    fn get(&self, table: Table, id: u64) -> Result<Option<StoredRecord>, StorageError> {
        self.inject()?;
        self.inner.get(table, id)
    }

    fn filter(&self, table: Table, predicate: &Fields) -> Result<Vec<StoredRecord>, StorageError> {
        self.inject()?;
        self.inner.filter(table, predicate)
    }

    fn update(
        &self,
        table: Table,
        id: u64,
        changes: Fields,
    ) -> Result<Option<StoredRecord>, StorageError> {
        self.inject()?;
        self.inner.update(table, id, changes)
    }

    fn delete(&self, table: Table, id: u64) -> Result<Option<StoredRecord>, StorageError> {
        self.inject()?;
        self.inner.delete(table, id)
    }
}
