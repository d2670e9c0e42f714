//! Storage abstraction for Proton records
//!
//! A small repository interface over three tables (users, posts, auth
//! tokens): create, get by id, filter by field equality, update, delete. The
//! trait is synchronous (no async) so the event loop can call it directly.
//!
//! Records are a flat map of typed field values plus a table-assigned id.
//! Ids are assigned from a per-table sequence starting at 1 and are never
//! reused.

mod chaotic;
mod error;
mod memory;
mod redb;

use std::collections::BTreeMap;

pub use chaotic::ChaoticStorage;
pub use error::StorageError;
pub use memory::MemoryStorage;
use serde::{Deserialize, Serialize};

pub use self::redb::RedbStorage;

/// Tables known to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Table {
    /// Registered accounts
    User,
    /// User-authored posts
    Post,
    /// Live session tokens
    AuthToken,
}

impl Table {
    /// Every table.
    pub const ALL: [Self; 3] = [Self::User, Self::Post, Self::AuthToken];

    /// Stable table name used as the on-disk key.
    pub fn name(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Post => "post",
            Self::AuthToken => "auth_token",
        }
    }
}

/// A typed field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Unsigned integer (ids, foreign keys)
    Integer(u64),
    /// UTF-8 text
    Text(String),
    /// Raw bytes
    Blob(Vec<u8>),
    /// Unix seconds
    Timestamp(u64),
}

impl FieldValue {
    /// Integer payload. `None` for other variants.
    pub fn as_integer(&self) -> Option<u64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Text payload. `None` for other variants.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Timestamp payload. `None` for other variants.
    pub fn as_timestamp(&self) -> Option<u64> {
        match self {
            Self::Timestamp(value) => Some(*value),
            _ => None,
        }
    }
}

/// Field name → value, ordered by name.
pub type Fields = BTreeMap<String, FieldValue>;

/// A persisted row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Table-assigned identifier
    pub id: u64,
    /// Column values
    pub fields: Fields,
}

impl StoredRecord {
    /// Field value by name.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Whether every `(name, value)` in `predicate` equals this record's field.
    ///
    /// An empty predicate matches everything.
    pub fn matches(&self, predicate: &Fields) -> bool {
        predicate.iter().all(|(name, value)| self.fields.get(name) == Some(value))
    }
}

/// Storage abstraction for records
///
/// Must be Clone (shared between the driver and tests), Send + Sync
/// (thread-safe), and synchronous (no async methods). Implementations share
/// internal state via Arc, so clones access the same underlying storage.
///
/// Each method is atomic on its own. Sequences of calls are not; the event
/// loop serializes them.
pub trait Storage: Clone + Send + Sync + 'static {
    /// Insert a new record and return it with its assigned id.
    fn create(&self, table: Table, fields: Fields) -> Result<StoredRecord, StorageError>;

    /// Record by id. `None` if absent.
    fn get(&self, table: Table, id: u64) -> Result<Option<StoredRecord>, StorageError>;

    /// All records whose fields equal `predicate`, in ascending id order.
    fn filter(&self, table: Table, predicate: &Fields) -> Result<Vec<StoredRecord>, StorageError>;

    /// Overwrite the given fields of a record. Fields not named are kept.
    ///
    /// Returns the updated record, or `None` if no record has that id.
    fn update(
        &self,
        table: Table,
        id: u64,
        changes: Fields,
    ) -> Result<Option<StoredRecord>, StorageError>;

    /// Remove a record. Returns it, or `None` if no record has that id.
    fn delete(&self, table: Table, id: u64) -> Result<Option<StoredRecord>, StorageError>;

    /// Lowest-id record matching `predicate`. `None` if nothing matches.
    fn first(
        &self,
        table: Table,
        predicate: &Fields,
    ) -> Result<Option<StoredRecord>, StorageError> {
        Ok(self.filter(table, predicate)?.into_iter().next())
    }
}

/// Build a [`Fields`] map from `(name, value)` pairs.
pub fn fields<const N: usize>(pairs: [(&str, FieldValue); N]) -> Fields {
    pairs.into_iter().map(|(name, value)| (name.to_string(), value)).collect()
}
