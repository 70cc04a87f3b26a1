//! Key to ID and ID to key resolution, cache first.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::cache::IdCacheManager;
use crate::entity::{EntityId, EntityKey, Namespace};
use crate::error::StoreResult;
use crate::schema::{field, ID_TABLE};
use crate::storage::{Conditions, Connection, SelectOptions};

use super::record::{key_conditions, key_from_row, IdRecord, RECORD_FIELDS, RECORD_FIELDS_WITH_HASHES};

/// Resolves composite keys to surrogate IDs.
#[derive(Clone)]
pub struct EntityIdFinder {
    conn: Arc<dyn Connection>,
    cache: Arc<IdCacheManager>,
}

impl EntityIdFinder {
    pub fn new(conn: Arc<dyn Connection>, cache: Arc<IdCacheManager>) -> Self {
        Self { conn, cache }
    }

    /// Looks up the record of `key`. Without `fetch_hashes` a cached ID and
    /// sortkey are enough to answer without touching storage.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn find_record(&self, key: &EntityKey, fetch_hashes: bool) -> StoreResult<Option<IdRecord>> {
        if let Some(id) = self.cache.get_id(key) {
            let cached_hashes = if fetch_hashes {
                self.cache.get_table_hashes(id)
            } else {
                None
            };
            if let Some(sortkey) = self.cache.get_sort(id) {
                if !fetch_hashes || cached_hashes.is_some() {
                    return Ok(Some(IdRecord {
                        id,
                        sortkey,
                        hash: key.hash(),
                        interwiki: key.interwiki.clone(),
                        table_hashes: cached_hashes,
                    }));
                }
            }
        }

        let fields = if fetch_hashes {
            RECORD_FIELDS_WITH_HASHES
        } else {
            RECORD_FIELDS
        };
        let Some(row) = self.conn.select_row(ID_TABLE, &key_conditions(key), fields)? else {
            return Ok(None);
        };
        let record = IdRecord::from_row(&row)?;
        self.cache.set(key, record.id, &record.sortkey);
        if let Some(hashes) = &record.table_hashes {
            self.cache.set_table_hashes(record.id, hashes.clone());
        }
        Ok(Some(record))
    }

    /// The ID of `key`, or [`EntityId::NONE`].
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn find_id(&self, key: &EntityKey) -> StoreResult<EntityId> {
        if let Some(id) = self.cache.get_id(key) {
            return Ok(id);
        }
        Ok(self.find_record(key, false)?.map_or(EntityId::NONE, |r| r.id))
    }

    /// Every entity sharing a title and namespace (the page itself, its
    /// subobjects and any marked variants).
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn find_ids_by_title(&self, title: &str, namespace: Namespace) -> StoreResult<Vec<(EntityKey, EntityId)>> {
        let conditions = Conditions::new()
            .eq(field::SMW_TITLE, title)
            .eq(field::SMW_NAMESPACE, namespace);
        let rows = self
            .conn
            .select(ID_TABLE, &conditions, &SelectOptions::new().order_by(field::SMW_ID))?;
        let mut found = Vec::with_capacity(rows.len());
        for row in rows {
            let key = key_from_row(&row)?;
            let record = IdRecord::from_row(&row)?;
            found.push((key, record.id));
        }
        Ok(found)
    }

    /// Resolves many keys with one query per batch and fills the cache.
    /// Returns the number of keys found.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn warm_up(&self, keys: &[EntityKey], batch_size: usize) -> StoreResult<usize> {
        let missing: Vec<&EntityKey> = keys.iter().filter(|k| self.cache.get_id(k).is_none()).collect();
        if missing.is_empty() {
            return Ok(0);
        }

        let wanted: HashSet<&EntityKey> = missing.iter().copied().collect();
        let mut found = 0;
        for chunk in missing.chunks(batch_size.max(1)) {
            let titles: Vec<&str> = chunk.iter().map(|k| k.title.as_str()).collect();
            let conditions = Conditions::new().any_of(field::SMW_TITLE, titles);
            let rows = self
                .conn
                .select(ID_TABLE, &conditions, &SelectOptions::new().fields(RECORD_FIELDS))?;
            for row in rows {
                let key = key_from_row(&row)?;
                if !wanted.contains(&key) {
                    continue;
                }
                let record = IdRecord::from_row(&row)?;
                self.cache.set(&key, record.id, &record.sortkey);
                found += 1;
            }
        }

        tracing::debug!(
            target: "semstore::ids",
            requested = keys.len(),
            fetched = found,
            "id cache warmed up"
        );
        Ok(found)
    }
}

/// Resolves surrogate IDs back to composite keys.
#[derive(Clone)]
pub struct IdEntityFinder {
    conn: Arc<dyn Connection>,
    cache: Arc<IdCacheManager>,
}

impl IdEntityFinder {
    pub fn new(conn: Arc<dyn Connection>, cache: Arc<IdCacheManager>) -> Self {
        Self { conn, cache }
    }

    /// The key stored for `id`, if the row exists.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn find_key(&self, id: EntityId) -> StoreResult<Option<EntityKey>> {
        if let Some(key) = self.cache.lookup(id) {
            return Ok(Some(key));
        }
        Ok(self.find_record_by_id(id)?.map(|(key, _)| key))
    }

    /// Key and record of `id`, read from storage.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn find_record_by_id(&self, id: EntityId) -> StoreResult<Option<(EntityKey, IdRecord)>> {
        let conditions = Conditions::new().eq(field::SMW_ID, id);
        let Some(row) = self.conn.select_row(ID_TABLE, &conditions, RECORD_FIELDS)? else {
            return Ok(None);
        };
        let key = key_from_row(&row)?;
        let record = IdRecord::from_row(&row)?;
        self.cache.set(&key, record.id, &record.sortkey);
        Ok(Some((key, record)))
    }

    /// Batch variant of [`IdEntityFinder::find_key`]; unknown IDs are absent
    /// from the result.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn find_keys(&self, ids: &[EntityId]) -> StoreResult<BTreeMap<EntityId, EntityKey>> {
        let mut keys = BTreeMap::new();
        let mut missing = Vec::new();
        for &id in ids {
            match self.cache.lookup(id) {
                Some(key) => {
                    keys.insert(id, key);
                }
                None => missing.push(id),
            }
        }
        if missing.is_empty() {
            return Ok(keys);
        }

        let conditions = Conditions::new().any_of(field::SMW_ID, missing);
        let rows = self
            .conn
            .select(ID_TABLE, &conditions, &SelectOptions::new().fields(RECORD_FIELDS))?;
        for row in rows {
            let key = key_from_row(&row)?;
            let record = IdRecord::from_row(&row)?;
            self.cache.set(&key, record.id, &record.sortkey);
            keys.insert(record.id, key);
        }
        Ok(keys)
    }
}
