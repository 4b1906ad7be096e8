//! Per-run memoization of natural-key lookups against the datastore.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::datastore::{Datastore, Filter, ObjectId, StoredObject};
use crate::error::SyncResult;

/// Hit/miss counters exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that went to the datastore.
    pub misses: u64,
}

/// Memoizes `(kind, filter) -> object` lookups for one reconciliation run.
///
/// Safe for concurrent use. Entries are never shared across runs: the
/// runner clears the cache at the start of every run.
#[derive(Debug, Default)]
pub struct IdentifierCache {
    entries: DashMap<(String, Filter), StoredObject>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl IdentifierCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the object for `(kind, filter)`, querying the datastore with
    /// `get_one` on a miss. Failed lookups are not cached.
    pub fn resolve(
        &self,
        datastore: &dyn Datastore,
        kind: &str,
        filter: &Filter,
    ) -> SyncResult<StoredObject> {
        if let Some(found) = self.get(kind, filter) {
            return Ok(found);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(kind = %kind, filter = %filter, "Identifier cache miss");
        let object = datastore.get_one(kind, filter)?;
        self.entries
            .insert((kind.to_string(), filter.clone()), object.clone());
        Ok(object)
    }

    /// Returns a cached object, counting a hit when present.
    pub fn get(&self, kind: &str, filter: &Filter) -> Option<StoredObject> {
        let found = self
            .entries
            .get(&(kind.to_string(), filter.clone()))
            .map(|entry| entry.value().clone());
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Stores an object under `(kind, filter)`, typically right after a
    /// handler created it.
    pub fn insert(&self, kind: &str, filter: Filter, object: StoredObject) {
        self.entries.insert((kind.to_string(), filter), object);
    }

    /// Drops every entry pointing at the given object (after an update or
    /// delete made the cached copy stale).
    pub fn invalidate_object(&self, id: ObjectId) {
        self.entries.retain(|_, object| object.id != id);
    }

    /// Removes all entries and resets the counters.
    pub fn clear(&self) {
        self.entries.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Returns the number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the current hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::ObjectAttrs;
    use crate::error::SyncError;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use uuid::Uuid;

    /// Datastore stub that counts queries.
    struct CountingStore {
        objects: Vec<StoredObject>,
        queries: Mutex<usize>,
    }

    impl CountingStore {
        fn with_manufacturer(name: &str) -> Self {
            let mut attrs = ObjectAttrs::new();
            attrs.insert("name".to_string(), json!(name));
            Self {
                objects: vec![StoredObject {
                    id: Uuid::new_v4(),
                    kind: "manufacturer".to_string(),
                    attrs,
                }],
                queries: Mutex::new(0),
            }
        }
    }

    impl Datastore for CountingStore {
        fn get(&self, kind: &str, id: ObjectId) -> SyncResult<StoredObject> {
            self.objects
                .iter()
                .find(|o| o.kind == kind && o.id == id)
                .cloned()
                .ok_or_else(|| SyncError::related_not_found(kind, id))
        }

        fn query(&self, kind: &str, filter: &Filter) -> SyncResult<Vec<StoredObject>> {
            *self.queries.lock() += 1;
            Ok(self
                .objects
                .iter()
                .filter(|o| o.kind == kind && filter.matches(o))
                .cloned()
                .collect())
        }

        fn create(&self, _kind: &str, _attrs: ObjectAttrs) -> SyncResult<StoredObject> {
            Err(SyncError::datastore("create", "read-only"))
        }

        fn update(&self, _kind: &str, _id: ObjectId, _attrs: ObjectAttrs) -> SyncResult<StoredObject> {
            Err(SyncError::datastore("update", "read-only"))
        }

        fn delete(&self, _kind: &str, _id: ObjectId) -> SyncResult<()> {
            Err(SyncError::datastore("delete", "read-only"))
        }
    }

    #[test]
    fn test_resolve_memoizes() {
        let store = CountingStore::with_manufacturer("Arista");
        let cache = IdentifierCache::new();
        let filter = Filter::new().eq("name", "Arista");

        let first = cache.resolve(&store, "manufacturer", &filter).unwrap();
        let second = cache.resolve(&store, "manufacturer", &filter).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(*store.queries.lock(), 1);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[test]
    fn test_failed_lookup_not_cached() {
        let store = CountingStore::with_manufacturer("Arista");
        let cache = IdentifierCache::new();
        let filter = Filter::new().eq("name", "Cisco");

        let err = cache.resolve(&store, "manufacturer", &filter).unwrap_err();
        assert!(matches!(err, SyncError::RelatedObjectNotFound { .. }));
        assert!(cache.resolve(&store, "manufacturer", &filter).is_err());
        assert_eq!(*store.queries.lock(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_and_clear() {
        let store = CountingStore::with_manufacturer("Arista");
        let cache = IdentifierCache::new();
        let filter = Filter::new().eq("name", "Arista");
        let object = cache.resolve(&store, "manufacturer", &filter).unwrap();

        cache.invalidate_object(object.id);
        assert!(cache.is_empty());

        cache.insert("manufacturer", filter.clone(), object);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats(), CacheStats::default());
    }
}
