//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety.
//! Records and id sequences survive server restarts.

use std::{path::Path, sync::Arc};

use redb::{Database, ReadableTable, TableDefinition};

use super::{Fields, Storage, StorageError, StoredRecord, Table};

/// Table: user
/// Key: record id
/// Value: CBOR-encoded Fields
const USERS: TableDefinition<u64, &[u8]> = TableDefinition::new("user");

/// Table: post
/// Key: record id
/// Value: CBOR-encoded Fields
const POSTS: TableDefinition<u64, &[u8]> = TableDefinition::new("post");

/// Table: auth_token
/// Key: record id
/// Value: CBOR-encoded Fields
const AUTH_TOKENS: TableDefinition<u64, &[u8]> = TableDefinition::new("auth_token");

/// Table: sequences
/// Key: table name
/// Value: last id handed out
const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

fn definition(table: Table) -> TableDefinition<'static, u64, &'static [u8]> {
    match table {
        Table::User => USERS,
        Table::Post => POSTS,
        Table::AuthToken => AUTH_TOKENS,
    }
}

fn io(err: impl std::fmt::Display) -> StorageError {
    StorageError::Io(err.to_string())
}

fn encode_fields(fields: &Fields) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(fields, &mut bytes)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn decode_fields(bytes: &[u8]) -> Result<Fields, StorageError> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates the record tables and the sequence table if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        let txn = db.begin_write().map_err(io)?;
        {
            for table in Table::ALL {
                let _ = txn.open_table(definition(table)).map_err(io)?;
            }
            let _ = txn.open_table(SEQUENCES).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl Storage for RedbStorage {
    fn create(&self, table: Table, fields: Fields) -> Result<StoredRecord, StorageError> {
        let bytes = encode_fields(&fields)?;

        let txn = self.db.begin_write().map_err(io)?;
        let id = {
            let mut sequences = txn.open_table(SEQUENCES).map_err(io)?;
            let last = sequences.get(table.name()).map_err(io)?.map_or(0, |guard| guard.value());
            let id = last + 1;
            sequences.insert(table.name(), id).map_err(io)?;

            let mut rows = txn.open_table(definition(table)).map_err(io)?;
            rows.insert(id, bytes.as_slice()).map_err(io)?;
            id
        };
        txn.commit().map_err(io)?;

        Ok(StoredRecord { id, fields })
    }

    fn get(&self, table: Table, id: u64) -> Result<Option<StoredRecord>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let rows = txn.open_table(definition(table)).map_err(io)?;

        match rows.get(id).map_err(io)? {
            Some(value) => Ok(Some(StoredRecord { id, fields: decode_fields(value.value())? })),
            None => Ok(None),
        }
    }

    fn filter(&self, table: Table, predicate: &Fields) -> Result<Vec<StoredRecord>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let rows = txn.open_table(definition(table)).map_err(io)?;

        let mut matches = Vec::new();
        for result in rows.iter().map_err(io)? {
            let (key, value) = result.map_err(io)?;
            let record = StoredRecord { id: key.value(), fields: decode_fields(value.value())? };
            if record.matches(predicate) {
                matches.push(record);
            }
        }

        Ok(matches)
    }

    fn update(
        &self,
        table: Table,
        id: u64,
        changes: Fields,
    ) -> Result<Option<StoredRecord>, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        let updated = {
            let mut rows = txn.open_table(definition(table)).map_err(io)?;

            let existing = match rows.get(id).map_err(io)? {
                Some(value) => Some(decode_fields(value.value())?),
                None => None,
            };

            match existing {
                Some(mut fields) => {
                    fields.extend(changes);
                    let bytes = encode_fields(&fields)?;
                    rows.insert(id, bytes.as_slice()).map_err(io)?;
                    Some(StoredRecord { id, fields })
                },
                None => None,
            }
        };
        txn.commit().map_err(io)?;

        Ok(updated)
    }

    fn delete(&self, table: Table, id: u64) -> Result<Option<StoredRecord>, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        let removed = {
            let mut rows = txn.open_table(definition(table)).map_err(io)?;
            match rows.remove(id).map_err(io)? {
                Some(value) => Some(StoredRecord { id, fields: decode_fields(value.value())? }),
                None => None,
            }
        };
        txn.commit().map_err(io)?;

        Ok(removed)
    }
}
