//! Process-local caches in front of the ID table.
//!
//! [`IdCacheManager`] is constructed explicitly and handed to every component
//! that needs it; there is no global cache state. All caches are advisory and
//! written after storage, so a stale entry can only cost an extra read.

mod bounded;

pub use bounded::{CacheStats, IdCache};

use crate::config::StoreConfig;
use crate::entity::{EntityId, EntityKey};
use crate::ids::TableHashes;

/// The ID, sortkey, reverse lookup and table-hash caches.
#[derive(Debug)]
pub struct IdCacheManager {
    ids: IdCache<EntityKey, EntityId>,
    sorts: IdCache<EntityId, String>,
    lookups: IdCache<EntityId, EntityKey>,
    table_hashes: IdCache<EntityId, TableHashes>,
}

impl IdCacheManager {
    #[must_use]
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            ids: IdCache::new("entity.id", config.id_cache_size),
            sorts: IdCache::new("entity.sort", config.sort_cache_size),
            lookups: IdCache::new("entity.lookup", config.lookup_cache_size),
            table_hashes: IdCache::new("entity.table_hashes", config.table_hash_cache_size),
        }
    }

    /// Records a resolved key in the ID, sort and lookup caches.
    pub fn set(&self, key: &EntityKey, id: EntityId, sortkey: &str) {
        self.ids.put(key.clone(), id);
        self.sorts.put(id, sortkey.to_string());
        self.lookups.put(id, key.clone());
    }

    /// Forgets a key and everything cached for its ID.
    pub fn delete(&self, key: &EntityKey) {
        if let Some(id) = self.ids.pop(key) {
            self.sorts.pop(&id);
            self.lookups.pop(&id);
            self.table_hashes.pop(&id);
        }
    }

    /// Forgets an ID and the key it was cached under.
    pub fn delete_id(&self, id: EntityId) {
        if let Some(key) = self.lookups.pop(&id) {
            self.ids.pop(&key);
        }
        self.sorts.pop(&id);
        self.table_hashes.pop(&id);
    }

    #[must_use]
    pub fn get_id(&self, key: &EntityKey) -> Option<EntityId> {
        self.ids.get(key)
    }

    #[must_use]
    pub fn get_sort(&self, id: EntityId) -> Option<String> {
        self.sorts.get(&id)
    }

    pub fn set_sort(&self, id: EntityId, sortkey: &str) {
        self.sorts.put(id, sortkey.to_string());
    }

    /// Reverse lookup: the key cached for an ID.
    #[must_use]
    pub fn lookup(&self, id: EntityId) -> Option<EntityKey> {
        self.lookups.get(&id)
    }

    #[must_use]
    pub fn get_table_hashes(&self, id: EntityId) -> Option<TableHashes> {
        self.table_hashes.get(&id)
    }

    pub fn set_table_hashes(&self, id: EntityId, hashes: TableHashes) {
        self.table_hashes.put(id, hashes);
    }

    pub fn clear(&self) {
        self.ids.clear();
        self.sorts.clear();
        self.lookups.clear();
        self.table_hashes.clear();
        tracing::debug!(target: "semstore::ids", "id caches cleared");
    }

    #[must_use]
    pub fn stats(&self) -> Vec<CacheStats> {
        vec![
            self.ids.stats(),
            self.sorts.stats(),
            self.lookups.stats(),
            self.table_hashes.stats(),
        ]
    }
}
