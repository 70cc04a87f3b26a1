//! The entity ID façade.
//!
//! `EntityIdManager` allocates and resolves surrogate IDs, owns the redirect
//! store and the auxiliary field maps, and keeps the ID caches coherent with
//! the ID table. Every mutation writes storage first and updates the caches
//! second.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;

use crate::cache::{CacheStats, IdCacheManager};
use crate::config::StoreConfig;
use crate::entity::{interwiki, namespace, EntityId, EntityKey, Namespace};
use crate::error::StoreResult;
use crate::jobs::{Dispatch, JobQueue};
use crate::property::{PredefinedProperty, Property};
use crate::schema::{field, TableRegistry, ID_TABLE};
use crate::semantic_data::SemanticData;
use crate::storage::{Cell, Conditions, Connection, InsertOutcome, Row};

use super::duplicates::{DuplicateFinder, DuplicateReport};
use super::finder::{EntityIdFinder, IdEntityFinder};
use super::record::{encode_table_hashes, key_conditions, key_from_row, IdRecord, TableHashes, RECORD_FIELDS};
use super::redirect::RedirectStore;
use super::sequence_map::{AuxiliaryFields, CountMap, SequenceMap};

/// Single entry point for surrogate-ID allocation and lookup.
pub struct EntityIdManager {
    conn: Arc<dyn Connection>,
    config: Arc<StoreConfig>,
    cache: Arc<IdCacheManager>,
    finder: EntityIdFinder,
    entity_finder: IdEntityFinder,
    redirects: RedirectStore,
    aux: AuxiliaryFields,
    duplicates: DuplicateFinder,
}

impl EntityIdManager {
    /// Wires the manager over an installed schema.
    ///
    /// # Errors
    /// Fails when the registry has no redirect table.
    pub fn new(
        conn: Arc<dyn Connection>,
        registry: Arc<TableRegistry>,
        config: Arc<StoreConfig>,
        cache: Arc<IdCacheManager>,
        jobs: Option<Arc<dyn JobQueue>>,
    ) -> StoreResult<Self> {
        Ok(Self {
            finder: EntityIdFinder::new(Arc::clone(&conn), Arc::clone(&cache)),
            entity_finder: IdEntityFinder::new(Arc::clone(&conn), Arc::clone(&cache)),
            redirects: RedirectStore::new(
                Arc::clone(&conn),
                Arc::clone(&registry),
                Arc::clone(&config),
                jobs,
            )?,
            aux: AuxiliaryFields::new(Arc::clone(&conn), Arc::clone(&config)),
            duplicates: DuplicateFinder::new(Arc::clone(&conn), registry),
            conn,
            config,
            cache,
        })
    }

    /// Writes the ID-table rows of the predefined properties at their
    /// reserved IDs. Existing rows are left alone.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn install_predefined_properties(&self) -> StoreResult<()> {
        for p in PredefinedProperty::ALL {
            let key = Property::predefined(p).entity_key();
            let row = Self::new_row(&key, p.key()).with(field::SMW_ID, p.reserved_id());
            self.conn
                .insert_or_get_id(ID_TABLE, row, &key_conditions(&key), field::SMW_ID)?;
            self.cache.set(&key, p.reserved_id(), p.key());
        }
        Ok(())
    }

    fn new_row(key: &EntityKey, sortkey: &str) -> Row {
        Row::new()
            .with(field::SMW_TITLE, key.title.as_str())
            .with(field::SMW_NAMESPACE, key.namespace)
            .with(field::SMW_IW, key.interwiki.as_str())
            .with(field::SMW_SUBOBJECT, key.subobject.as_str())
            .with(field::SMW_SORTKEY, sortkey)
            .with(field::SMW_SORT, sortkey.to_lowercase())
            .with(field::SMW_HASH, key.hash())
            .with(field::SMW_PROPTABLE_HASH, Cell::Null)
            .with(field::SMW_TOUCHED, Utc::now().timestamp())
    }

    fn predefined_record(key: &EntityKey) -> Option<IdRecord> {
        if key.namespace != namespace::PROPERTY || !key.interwiki.is_empty() || key.is_subobject() {
            return None;
        }
        PredefinedProperty::from_key(&key.title).map(|p| IdRecord {
            id: p.reserved_id(),
            sortkey: p.key().to_string(),
            hash: key.hash(),
            interwiki: String::new(),
            table_hashes: None,
        })
    }

    /// The ID of `key`, or [`EntityId::NONE`]. Never allocates.
    ///
    /// # Errors
    /// Returns a validation error for malformed keys and propagates storage
    /// failures.
    pub fn get_id(&self, key: &EntityKey) -> StoreResult<EntityId> {
        key.validate()?;
        if let Some(record) = Self::predefined_record(key) {
            return Ok(record.id);
        }
        self.finder.find_id(key)
    }

    /// Component-wise variant of [`EntityIdManager::get_id`].
    ///
    /// # Errors
    /// See [`EntityIdManager::get_id`].
    pub fn get_page_id(
        &self,
        title: &str,
        namespace: Namespace,
        interwiki: &str,
        subobject: &str,
    ) -> StoreResult<EntityId> {
        self.get_id(&EntityKey::from_parts(title, namespace, interwiki, subobject))
    }

    /// ID, sortkey and hash of `key` in one lookup.
    ///
    /// With `canonical`, a redirecting page resolves to its target. Without
    /// it, a redirecting page resolves to its redirect stub. With
    /// `fetch_hashes` the per-table hashes are included.
    ///
    /// # Errors
    /// See [`EntityIdManager::get_id`].
    pub fn get_id_and_sort(
        &self,
        key: &EntityKey,
        canonical: bool,
        fetch_hashes: bool,
    ) -> StoreResult<Option<IdRecord>> {
        key.validate()?;
        if let Some(record) = Self::predefined_record(key) {
            return Ok(Some(record));
        }
        let lookup = self.storage_key(key, canonical)?;
        match lookup {
            Lookup::Target(target) => {
                let record = self.entity_finder.find_record_by_id(target)?.map(|(_, r)| r);
                match (record, fetch_hashes) {
                    (Some(mut record), true) => {
                        record.table_hashes = self.get_table_hashes(record.id)?;
                        Ok(Some(record))
                    }
                    (record, _) => Ok(record),
                }
            }
            Lookup::Key(storage_key) => self.finder.find_record(&storage_key, fetch_hashes),
        }
    }

    fn storage_key(&self, key: &EntityKey, canonical: bool) -> StoreResult<Lookup> {
        if !key.interwiki.is_empty() || key.is_subobject() {
            return Ok(Lookup::Key(key.clone()));
        }
        let target = self.redirects.find_redirect(&key.title, key.namespace)?;
        if target.is_none() {
            Ok(Lookup::Key(key.clone()))
        } else if canonical {
            Ok(Lookup::Target(target))
        } else {
            Ok(Lookup::Key(key.with_interwiki(interwiki::REDIRECT)))
        }
    }

    /// Returns the record of `key`, allocating a new ID when none exists.
    ///
    /// Allocation is race-free: the insert goes through
    /// [`Connection::insert_or_get_id`], so concurrent callers creating the
    /// same key all receive the same ID. A differing `sortkey` is written
    /// back to an existing row.
    ///
    /// # Errors
    /// Returns a validation error for malformed keys and propagates storage
    /// failures.
    pub fn make_id(
        &self,
        key: &EntityKey,
        sortkey: Option<&str>,
        canonical: bool,
        fetch_hashes: bool,
    ) -> StoreResult<IdRecord> {
        key.validate()?;
        if let Some(record) = Self::predefined_record(key) {
            return Ok(record);
        }

        if let Some(mut record) = self.get_id_and_sort(key, canonical, fetch_hashes)? {
            if let Some(sortkey) = sortkey {
                if sortkey != record.sortkey {
                    self.update_sortkey(record.id, sortkey)?;
                    record.sortkey = sortkey.to_string();
                }
            }
            return Ok(record);
        }

        let storage_key = match self.storage_key(key, false)? {
            Lookup::Key(k) => k,
            Lookup::Target(_) => key.clone(),
        };
        let sortkey = sortkey.map_or_else(|| storage_key.default_sortkey(), ToString::to_string);
        let outcome = self.conn.insert_or_get_id(
            ID_TABLE,
            Self::new_row(&storage_key, &sortkey),
            &key_conditions(&storage_key),
            field::SMW_ID,
        )?;
        let id = EntityId::new(outcome.id());
        match outcome {
            InsertOutcome::Inserted(_) => {
                tracing::debug!(target: "semstore::ids", key = %storage_key, %id, "id allocated");
            }
            InsertOutcome::Existing(_) => {
                tracing::debug!(target: "semstore::ids", key = %storage_key, %id, "id allocated concurrently");
            }
        }
        self.cache.set(&storage_key, id, &sortkey);

        Ok(IdRecord {
            id,
            sortkey,
            hash: storage_key.hash(),
            interwiki: storage_key.interwiki,
            table_hashes: if fetch_hashes && !outcome.was_inserted() {
                self.get_table_hashes(id)?
            } else {
                None
            },
        })
    }

    /// Component-wise variant of [`EntityIdManager::make_id`].
    ///
    /// # Errors
    /// See [`EntityIdManager::make_id`].
    #[allow(clippy::too_many_arguments)]
    pub fn make_page_id(
        &self,
        title: &str,
        namespace: Namespace,
        interwiki: &str,
        subobject: &str,
        sortkey: Option<&str>,
        canonical: bool,
        fetch_hashes: bool,
    ) -> StoreResult<EntityId> {
        let key = EntityKey::from_parts(title, namespace, interwiki, subobject);
        Ok(self.make_id(&key, sortkey, canonical, fetch_hashes)?.id)
    }

    /// The ID of a property. Predefined properties resolve to their reserved
    /// ID without a lookup; an unknown user property yields
    /// [`EntityId::NONE`].
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn get_property_id(&self, property: &Property) -> StoreResult<EntityId> {
        if let Some(p) = property.as_predefined() {
            return Ok(p.reserved_id());
        }
        Ok(self
            .get_id_and_sort(&property.entity_key(), true, false)?
            .map_or(EntityId::NONE, |r| r.id))
    }

    /// The ID of a property, allocating one for a new user property.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn make_property_id(&self, property: &Property) -> StoreResult<EntityId> {
        if let Some(p) = property.as_predefined() {
            return Ok(p.reserved_id());
        }
        Ok(self.make_id(&property.entity_key(), None, true, false)?.id)
    }

    /// The key stored for `id`.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn get_key(&self, id: EntityId) -> StoreResult<Option<EntityKey>> {
        self.entity_finder.find_key(id)
    }

    /// Batch reverse lookup.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn get_keys(&self, ids: &[EntityId]) -> StoreResult<BTreeMap<EntityId, EntityKey>> {
        self.entity_finder.find_keys(ids)
    }

    /// Every entity stored under a title and namespace.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn find_ids_by_title(&self, title: &str, namespace: Namespace) -> StoreResult<Vec<(EntityKey, EntityId)>> {
        self.finder.find_ids_by_title(title, namespace)
    }

    /// # Errors
    /// Propagates storage failures.
    pub fn find_redirect(&self, title: &str, namespace: Namespace) -> StoreResult<EntityId> {
        self.redirects.find_redirect(title, namespace)
    }

    /// # Errors
    /// Propagates storage failures.
    pub fn add_redirect(&self, target: EntityId, title: &str, namespace: Namespace) -> StoreResult<()> {
        self.redirects.add_redirect(target, title, namespace)
    }

    /// # Errors
    /// Propagates storage failures.
    pub fn delete_redirect(&self, title: &str, namespace: Namespace) -> StoreResult<()> {
        self.redirects.delete_redirect(title, namespace)
    }

    /// # Errors
    /// Propagates storage failures.
    pub fn is_redirect(&self, key: &EntityKey) -> StoreResult<bool> {
        self.redirects.is_redirect(&key.title, key.namespace)
    }

    /// See [`RedirectStore::update_redirect`].
    ///
    /// # Errors
    /// Propagates storage failures of the inline path.
    pub fn update_redirect(&self, source_id: EntityId, target_id: EntityId) -> StoreResult<Dispatch> {
        self.redirects.update_redirect(source_id, target_id)
    }

    #[must_use]
    pub const fn redirects(&self) -> &RedirectStore {
        &self.redirects
    }

    /// # Errors
    /// See [`DuplicateFinder::find_duplicates`].
    pub fn find_duplicates(&self, table: &str) -> StoreResult<DuplicateReport> {
        self.duplicates.find_duplicates(table)
    }

    /// Prefetches the IDs of many keys; returns how many were found.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn warm_up_cache(&self, keys: &[EntityKey]) -> StoreResult<usize> {
        self.finder.warm_up(keys, self.config.iterator_batch_size)
    }

    /// Rewrites interwiki marker and hash of `id` to match `key`.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn update_interwiki_field(&self, id: EntityId, key: &EntityKey, new_hash: &str) -> StoreResult<()> {
        let values = Row::new()
            .with(field::SMW_IW, key.interwiki.as_str())
            .with(field::SMW_HASH, new_hash);
        let sortkey = self.cache.get_sort(id);
        self.forget_cached(id)?;
        self.conn
            .update(ID_TABLE, &values, &Conditions::new().eq(field::SMW_ID, id))?;
        if let Some(sortkey) = sortkey {
            self.cache.set(key, id, &sortkey);
        }
        tracing::debug!(target: "semstore::ids", %id, interwiki = %key.interwiki, "interwiki field updated");
        Ok(())
    }

    /// Moves `id` to a new composite key.
    ///
    /// # Errors
    /// Propagates storage failures, including a duplicate key when `key` is
    /// already taken.
    pub fn move_entity(&self, id: EntityId, key: &EntityKey, sortkey: &str) -> StoreResult<()> {
        key.validate()?;
        let values = Row::new()
            .with(field::SMW_TITLE, key.title.as_str())
            .with(field::SMW_NAMESPACE, key.namespace)
            .with(field::SMW_IW, key.interwiki.as_str())
            .with(field::SMW_SUBOBJECT, key.subobject.as_str())
            .with(field::SMW_SORTKEY, sortkey)
            .with(field::SMW_SORT, sortkey.to_lowercase())
            .with(field::SMW_HASH, key.hash());
        self.forget_cached(id)?;
        self.conn
            .update(ID_TABLE, &values, &Conditions::new().eq(field::SMW_ID, id))?;
        self.cache.set(key, id, sortkey);
        Ok(())
    }

    /// Drops `id` and the key it is stored under from the cache. The key is
    /// read from the table since the reverse lookup may have been evicted.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn forget_cached(&self, id: EntityId) -> StoreResult<()> {
        let conditions = Conditions::new().eq(field::SMW_ID, id);
        if let Some(row) = self.conn.select_row(ID_TABLE, &conditions, RECORD_FIELDS)? {
            self.cache.delete(&key_from_row(&row)?);
        }
        self.cache.delete_id(id);
        Ok(())
    }

    fn update_sortkey(&self, id: EntityId, sortkey: &str) -> StoreResult<()> {
        let values = Row::new()
            .with(field::SMW_SORTKEY, sortkey)
            .with(field::SMW_SORT, sortkey.to_lowercase());
        self.conn
            .update(ID_TABLE, &values, &Conditions::new().eq(field::SMW_ID, id))?;
        self.cache.set_sort(id, sortkey);
        Ok(())
    }

    /// Sets the `touched` timestamp of all `ids` with a single update.
    /// Returns the number of rows touched.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn touch(&self, ids: &[EntityId]) -> StoreResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let values = Row::new().with(field::SMW_TOUCHED, Utc::now().timestamp());
        let conditions = Conditions::new().any_of(field::SMW_ID, ids.iter().copied());
        Ok(self.conn.update(ID_TABLE, &values, &conditions)?)
    }

    /// Stored per-table hashes of `id`; `None` when never recorded.
    ///
    /// # Errors
    /// Propagates storage failures and unreadable hash maps.
    pub fn get_table_hashes(&self, id: EntityId) -> StoreResult<Option<TableHashes>> {
        if let Some(hashes) = self.cache.get_table_hashes(id) {
            return Ok(Some(hashes));
        }
        let row = self.conn.select_row(
            ID_TABLE,
            &Conditions::new().eq(field::SMW_ID, id),
            &[field::SMW_ID, field::SMW_PROPTABLE_HASH],
        )?;
        let hashes = match row {
            Some(row) => IdRecord::from_row(&row)?.table_hashes,
            None => None,
        };
        if let Some(hashes) = &hashes {
            self.cache.set_table_hashes(id, hashes.clone());
        }
        Ok(hashes)
    }

    /// Persists the per-table hashes of `id`.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn set_table_hashes(&self, id: EntityId, hashes: &TableHashes) -> StoreResult<()> {
        let values = Row::new().with(field::SMW_PROPTABLE_HASH, encode_table_hashes(hashes)?);
        self.conn
            .update(ID_TABLE, &values, &Conditions::new().eq(field::SMW_ID, id))?;
        self.cache.set_table_hashes(id, hashes.clone());
        Ok(())
    }

    /// Forgets the recorded table hashes of `id`.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn reset_table_hashes(&self, id: EntityId) -> StoreResult<()> {
        let values = Row::new().with(field::SMW_PROPTABLE_HASH, Cell::Null);
        self.conn
            .update(ID_TABLE, &values, &Conditions::new().eq(field::SMW_ID, id))?;
        self.cache.delete_id(id);
        Ok(())
    }

    /// # Errors
    /// See [`AuxiliaryFields::preload`].
    pub fn preload(&self, ids: &[EntityId]) -> StoreResult<()> {
        self.aux.preload(ids)
    }

    /// # Errors
    /// See [`AuxiliaryFields::update_field_maps`].
    pub fn update_field_maps(&self, id: EntityId, data: &SemanticData) -> StoreResult<()> {
        self.aux.update_field_maps(id, data)
    }

    /// # Errors
    /// See [`AuxiliaryFields::get_sequence_map`].
    pub fn get_sequence_map(&self, id: EntityId, property_key: &str) -> StoreResult<Option<Vec<String>>> {
        self.aux.get_sequence_map(id, property_key)
    }

    /// # Errors
    /// See [`AuxiliaryFields::load_sequence_map`].
    pub fn load_sequence_map(&self, id: EntityId) -> StoreResult<SequenceMap> {
        self.aux.load_sequence_map(id)
    }

    /// # Errors
    /// See [`AuxiliaryFields::get_count_map`].
    pub fn get_count_map(&self, id: EntityId) -> StoreResult<CountMap> {
        self.aux.get_count_map(id)
    }

    #[must_use]
    pub const fn aux(&self) -> &AuxiliaryFields {
        &self.aux
    }

    /// True for IDs in the reserved predefined-property range.
    #[must_use]
    pub fn is_fixed_property_id(&self, id: EntityId) -> bool {
        !id.is_none() && id.get() < self.config.fixed_property_id_upper_bound
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &IdCacheManager {
        &self.cache
    }

    #[must_use]
    pub fn cache_stats(&self) -> Vec<CacheStats> {
        self.cache.stats()
    }

    /// Resets every cache owned by the manager.
    pub fn clear_caches(&self) {
        self.cache.clear();
        self.redirects.clear();
        self.aux.clear();
    }
}

enum Lookup {
    Key(EntityKey),
    Target(EntityId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::install;
    use crate::storage::InMemoryConnection;

    fn manager_with(config: StoreConfig) -> (Arc<InMemoryConnection>, EntityIdManager) {
        let conn = Arc::new(InMemoryConnection::new());
        let registry = Arc::new(TableRegistry::new(&[]).unwrap());
        install(
            conn.as_ref(),
            &registry,
            config.unique_entity_keys,
            config.fixed_property_id_upper_bound,
        )
        .unwrap();
        let cache = Arc::new(IdCacheManager::new(&config));
        let manager = EntityIdManager::new(conn.clone(), registry, Arc::new(config), cache, None).unwrap();
        manager.install_predefined_properties().unwrap();
        (conn, manager)
    }

    fn manager() -> (Arc<InMemoryConnection>, EntityIdManager) {
        manager_with(StoreConfig::default())
    }

    #[test]
    fn test_make_id_is_idempotent() {
        let (conn, ids) = manager();
        let foo = EntityKey::new("Foo", namespace::MAIN);
        let before = conn.row_count(ID_TABLE);

        let first = ids.make_id(&foo, None, false, false).unwrap();
        let second = ids.make_id(&foo, None, false, false).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(conn.row_count(ID_TABLE), before + 1);
        assert_eq!(first.id, EntityId::new(500));
    }

    #[test]
    fn test_get_id_never_allocates() {
        let (conn, ids) = manager();
        let before = conn.row_count(ID_TABLE);
        assert_eq!(ids.get_id(&EntityKey::new("Foo", 0)).unwrap(), EntityId::NONE);
        assert_eq!(conn.row_count(ID_TABLE), before);
    }

    #[test]
    fn test_lookup_after_cache_clear() {
        let (_, ids) = manager();
        let id = ids.make_page_id("Foo", 0, "", "", None, false, false).unwrap();
        ids.clear_caches();
        assert_eq!(ids.get_page_id("Foo", 0, "", "").unwrap(), id);
    }

    #[test]
    fn test_malformed_key_is_rejected() {
        let (_, ids) = manager();
        let err = ids.get_id(&EntityKey::new("", 0)).unwrap_err();
        assert!(err.is_validation());
        assert!(ids.make_id(&EntityKey::new("A|B", 0), None, false, false).is_err());
    }

    #[test]
    fn test_predefined_properties_use_reserved_ids() {
        let (_, ids) = manager();
        let inst = Property::predefined(PredefinedProperty::Instance);
        assert_eq!(ids.get_property_id(&inst).unwrap(), EntityId::new(4));
        assert_eq!(ids.make_property_id(&inst).unwrap(), EntityId::new(4));
        assert_eq!(ids.get_id(&inst.entity_key()).unwrap(), EntityId::new(4));
        assert_eq!(ids.get_key(EntityId::new(4)).unwrap(), Some(inst.entity_key()));
        assert!(ids.is_fixed_property_id(EntityId::new(4)));
        assert!(!ids.is_fixed_property_id(EntityId::new(500)));
    }

    #[test]
    fn test_unknown_user_property_is_none() {
        let (_, ids) = manager();
        let p = Property::new("Has_population").unwrap();
        assert_eq!(ids.get_property_id(&p).unwrap(), EntityId::NONE);
        let id = ids.make_property_id(&p).unwrap();
        assert_eq!(ids.get_property_id(&p).unwrap(), id);
    }

    #[test]
    fn test_canonical_lookup_follows_redirect() {
        let (_, ids) = manager();
        let target = ids.make_id(&EntityKey::new("Target", 0), None, false, false).unwrap();
        let source = EntityKey::new("Source", 0);
        let stub = ids.make_id(&source, None, false, false).unwrap();
        ids.update_interwiki_field(stub.id, &source.with_interwiki(interwiki::REDIRECT), "h")
            .unwrap();
        ids.add_redirect(target.id, "Source", 0).unwrap();

        let canonical = ids.get_id_and_sort(&source, true, false).unwrap().unwrap();
        assert_eq!(canonical.id, target.id);
        let raw = ids.get_id_and_sort(&source, false, false).unwrap().unwrap();
        assert_eq!(raw.id, stub.id);
        assert!(ids.is_redirect(&source).unwrap());
    }

    #[test]
    fn test_sortkey_is_updated() {
        let (_, ids) = manager();
        let key = EntityKey::new("New_York", 0);
        let record = ids.make_id(&key, None, false, false).unwrap();
        assert_eq!(record.sortkey, "New York");
        let record = ids.make_id(&key, Some("York"), false, false).unwrap();
        assert_eq!(record.sortkey, "York");
        ids.clear_caches();
        assert_eq!(ids.get_id_and_sort(&key, false, false).unwrap().unwrap().sortkey, "York");
    }

    #[test]
    fn test_table_hashes_round_trip() {
        let (_, ids) = manager();
        let id = ids.make_id(&EntityKey::new("Foo", 0), None, false, false).unwrap().id;
        assert_eq!(ids.get_table_hashes(id).unwrap(), None);

        let mut hashes = TableHashes::new();
        hashes.insert("smw_di_blob".into(), "abc".into());
        ids.set_table_hashes(id, &hashes).unwrap();
        ids.clear_caches();
        assert_eq!(ids.get_table_hashes(id).unwrap(), Some(hashes.clone()));

        let record = ids.get_id_and_sort(&EntityKey::new("Foo", 0), false, true).unwrap().unwrap();
        assert_eq!(record.table_hashes, Some(hashes));
    }

    #[test]
    fn test_touch_is_batched() {
        let (_, ids) = manager();
        let a = ids.make_page_id("A", 0, "", "", None, false, false).unwrap();
        let b = ids.make_page_id("B", 0, "", "", None, false, false).unwrap();
        assert_eq!(ids.touch(&[a, b, EntityId::new(9999)]).unwrap(), 2);
        assert_eq!(ids.touch(&[]).unwrap(), 0);
    }

    #[test]
    fn test_move_entity() {
        let (_, ids) = manager();
        let old = EntityKey::new("Old", 0);
        let new = EntityKey::new("New", 0);
        let id = ids.make_id(&old, None, false, false).unwrap().id;
        ids.move_entity(id, &new, "New").unwrap();
        assert_eq!(ids.get_id(&old).unwrap(), EntityId::NONE);
        assert_eq!(ids.get_id(&new).unwrap(), id);
    }

    #[test]
    fn test_warm_up_cache() {
        let (_, ids) = manager();
        let keys: Vec<_> = (0..5).map(|i| EntityKey::new(format!("P{i}"), 0)).collect();
        for key in &keys {
            ids.make_id(key, None, false, false).unwrap();
        }
        ids.clear_caches();
        assert_eq!(ids.warm_up_cache(&keys).unwrap(), 5);
        assert_eq!(ids.warm_up_cache(&keys).unwrap(), 0);
    }

    #[test]
    fn test_duplicates_without_key_constraint() {
        let (conn, ids) = manager_with(StoreConfig {
            unique_entity_keys: false,
            ..StoreConfig::default()
        });
        let foo = EntityKey::new("Foo", 0);
        ids.make_id(&foo, None, false, false).unwrap();
        conn.insert(ID_TABLE, vec![EntityIdManager::new_row(&foo, "Foo")]).unwrap();
        assert_eq!(ids.find_duplicates(ID_TABLE).unwrap().len(), 1);
    }

    /// Tiny caches where the reverse lookup of `Foo` is evicted while its
    /// key stays cached.
    fn evicted_lookup() -> (EntityIdManager, EntityKey, EntityId) {
        let (_, ids) = manager_with(StoreConfig {
            id_cache_size: 3,
            lookup_cache_size: 2,
            ..StoreConfig::default()
        });
        let foo = EntityKey::new("Foo", namespace::MAIN);
        let id = ids.make_id(&foo, None, false, false).unwrap().id;
        ids.make_id(&EntityKey::new("A", namespace::MAIN), None, false, false).unwrap();
        assert_eq!(ids.get_id(&foo).unwrap(), id);
        ids.make_id(&EntityKey::new("B", namespace::MAIN), None, false, false).unwrap();
        (ids, foo, id)
    }

    #[test]
    fn test_move_forgets_old_key_after_lookup_eviction() {
        let (ids, foo, id) = evicted_lookup();
        let new = EntityKey::new("New", namespace::MAIN);
        ids.move_entity(id, &new, "New").unwrap();
        assert_eq!(ids.get_id(&foo).unwrap(), EntityId::NONE);
        assert_eq!(ids.get_id(&new).unwrap(), id);
    }

    #[test]
    fn test_interwiki_update_forgets_old_key_after_lookup_eviction() {
        let (ids, foo, id) = evicted_lookup();
        let stub = foo.with_interwiki(interwiki::REDIRECT);
        ids.update_interwiki_field(id, &stub, &stub.hash()).unwrap();
        assert_eq!(ids.get_id(&foo).unwrap(), EntityId::NONE);
        assert_eq!(ids.get_id(&stub).unwrap(), id);
    }
}
