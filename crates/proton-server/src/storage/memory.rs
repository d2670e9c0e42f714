#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use super::{Fields, Storage, StorageError, StoredRecord, Table};

/// In-memory storage implementation (default backend, tests, simulation)
///
/// One `BTreeMap` per table keyed by id, so filters come back in id order.
/// All state is wrapped in Arc<Mutex<>> to allow Clone and concurrent access.
/// A poisoned mutex surfaces as `StorageError::Io` rather than a panic.
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryStorageInner>>,
}

#[derive(Default)]
struct MemoryStorageInner {
    /// Table → (id → fields)
    tables: HashMap<Table, BTreeMap<u64, Fields>>,

    /// Last id handed out per table
    sequences: HashMap<Table, u64>,
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(MemoryStorageInner::default())) }
    }

    /// Number of records in a table.
    ///
    /// Useful for debugging and testing.
    pub fn record_count(&self, table: Table) -> Result<usize, StorageError> {
        Ok(self.lock()?.tables.get(&table).map_or(0, BTreeMap::len))
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryStorageInner>, StorageError> {
        self.inner.lock().map_err(|_| StorageError::Io("memory storage mutex poisoned".to_string()))
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn create(&self, table: Table, fields: Fields) -> Result<StoredRecord, StorageError> {
        let mut inner = self.lock()?;

        let sequence = inner.sequences.entry(table).or_insert(0);
        *sequence += 1;
        let id = *sequence;

        let rows = inner.tables.entry(table).or_default();
        debug_assert!(!rows.contains_key(&id), "ids are never reused");
        rows.insert(id, fields.clone());

        Ok(StoredRecord { id, fields })
    }

    fn get(&self, table: Table, id: u64) -> Result<Option<StoredRecord>, StorageError> {
        let inner = self.lock()?;

        Ok(inner
            .tables
            .get(&table)
            .and_then(|rows| rows.get(&id))
            .map(|fields| StoredRecord { id, fields: fields.clone() }))
    }

    fn filter(&self, table: Table, predicate: &Fields) -> Result<Vec<StoredRecord>, StorageError> {
        let inner = self.lock()?;

        let Some(rows) = inner.tables.get(&table) else {
            return Ok(Vec::new());
        };

        Ok(rows
            .iter()
            .map(|(id, fields)| StoredRecord { id: *id, fields: fields.clone() })
            .filter(|record| record.matches(predicate))
            .collect())
    }

    fn update(
        &self,
        table: Table,
        id: u64,
        changes: Fields,
    ) -> Result<Option<StoredRecord>, StorageError> {
        let mut inner = self.lock()?;

        let Some(fields) = inner.tables.get_mut(&table).and_then(|rows| rows.get_mut(&id)) else {
            return Ok(None);
        };

        fields.extend(changes);

        Ok(Some(StoredRecord { id, fields: fields.clone() }))
    }

    fn delete(&self, table: Table, id: u64) -> Result<Option<StoredRecord>, StorageError> {
        let mut inner = self.lock()?;

        Ok(inner
            .tables
            .get_mut(&table)
            .and_then(|rows| rows.remove(&id))
            .map(|fields| StoredRecord { id, fields }))
    }
}
