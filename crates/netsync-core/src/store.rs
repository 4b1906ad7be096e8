//! Indexed collection of records for one side of a reconciliation run.
//!
//! A `RecordStore` never creates entries implicitly: lookups return
//! `Option<&Record>` and insertion of an identifier that already exists is
//! reported instead of overwriting the first record.

use std::collections::BTreeMap;
use tracing::warn;

use crate::error::{SyncError, SyncResult};
use crate::record::{Record, RecordKey};

/// Mapping from (type, identifier) to record.
///
/// Iteration order within a type is the key order, which keeps the diff
/// and apply phases deterministic.
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    name: String,
    records: BTreeMap<String, BTreeMap<RecordKey, Record>>,
}

impl RecordStore {
    /// Creates a new empty store. The name is used in log messages
    /// (e.g., "network", "datastore").
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: BTreeMap::new(),
        }
    }

    /// Returns the store name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a record.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::DuplicateRecord`] if a record with the same type
    /// and identifier is already present. The stored record is unchanged.
    pub fn add(&mut self, record: Record) -> SyncResult<()> {
        let by_key = self.records.entry(record.kind().to_string()).or_default();
        if by_key.contains_key(record.key()) {
            return Err(SyncError::DuplicateRecord {
                kind: record.kind().to_string(),
                key: record.key().to_string(),
            });
        }
        by_key.insert(record.key().clone(), record);
        Ok(())
    }

    /// Adds a record, tolerating duplicates: the second occurrence is
    /// logged and dropped.
    ///
    /// Returns true if the record was stored.
    pub fn add_or_warn(&mut self, record: Record) -> bool {
        match self.add(record) {
            Ok(()) => true,
            Err(err) => {
                warn!(store = %self.name, error = %err, "Dropping duplicate record");
                false
            }
        }
    }

    /// Returns the record for the given type and identifier.
    ///
    /// **This never creates entries.**
    pub fn get(&self, kind: &str, key: &RecordKey) -> Option<&Record> {
        self.records.get(kind).and_then(|by_key| by_key.get(key))
    }

    /// Returns true if the store holds the given record identifier.
    pub fn contains(&self, kind: &str, key: &RecordKey) -> bool {
        self.get(kind, key).is_some()
    }

    /// Iterates the records of one type in key order.
    pub fn records<'a>(&'a self, kind: &str) -> impl Iterator<Item = &'a Record> + 'a {
        self.records
            .get(kind)
            .into_iter()
            .flat_map(|by_key| by_key.values())
    }

    /// Iterates the identifiers of one type in key order.
    pub fn keys<'a>(&'a self, kind: &str) -> impl Iterator<Item = &'a RecordKey> + 'a {
        self.records
            .get(kind)
            .into_iter()
            .flat_map(|by_key| by_key.keys())
    }

    /// Returns the record types present in the store.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Returns the number of records of one type.
    pub fn count(&self, kind: &str) -> usize {
        self.records.get(kind).map_or(0, BTreeMap::len)
    }

    /// Returns the total number of records.
    pub fn len(&self) -> usize {
        self.records.values().map(BTreeMap::len).sum()
    }

    /// Returns true if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves a record's named child relation to the stored child records.
    ///
    /// Child keys that are not present in this store are skipped.
    pub fn children<'a>(&'a self, record: &Record, relation: &str) -> Vec<&'a Record> {
        match record.children(relation) {
            Some(rel) => rel
                .keys
                .iter()
                .filter_map(|key| self.get(&rel.kind, key))
                .collect(),
            None => Vec::new(),
        }
    }
}
