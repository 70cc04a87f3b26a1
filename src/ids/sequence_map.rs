//! Per-entity auxiliary field maps.
//!
//! The object-aux table keeps, per subject ID, a sequence map (property key
//! to the ordered value hashes of properties whose order matters) and a
//! count map (property key to number of values). Both are JSON documents.
//! Serializing many entities at once should [`AuxiliaryFields::preload`]
//! them first; preloaded maps are served from memory until cleared.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::StoreConfig;
use crate::entity::EntityId;
use crate::error::StoreResult;
use crate::schema::{field, AUX_TABLE};
use crate::semantic_data::SemanticData;
use crate::storage::{Cell, Conditions, Connection, Row, SelectOptions, StorageError};

/// Property key to ordered value hashes.
pub type SequenceMap = BTreeMap<String, Vec<String>>;
/// Property key to value count.
pub type CountMap = BTreeMap<String, usize>;

/// Both maps of one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMaps {
    /// Value order per property.
    pub sequence: SequenceMap,
    /// Value count per property.
    pub counts: CountMap,
}

impl FieldMaps {
    /// Computes the maps for a subject's data.
    #[must_use]
    pub fn from_data(data: &SemanticData, config: &StoreConfig) -> Self {
        let mut maps = Self::default();
        for (property, values) in data.properties() {
            if values.is_empty() {
                continue;
            }
            maps.counts.insert(property.key().to_string(), values.len());
            if config.is_ordered(property.key()) {
                maps.sequence.insert(
                    property.key().to_string(),
                    values.iter().map(crate::value::DataItem::value_hash).collect(),
                );
            }
        }
        maps
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty() && self.counts.is_empty()
    }
}

fn decode<T: DeserializeOwned + Default>(row: &Row, column: &str) -> Result<T, StorageError> {
    match row.text(column) {
        None => Ok(T::default()),
        Some(json) => serde_json::from_str(json)
            .map_err(|e| StorageError::Corrupt(format!("unreadable {column}: {e}"))),
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Cell, StorageError> {
    serde_json::to_string(value)
        .map(Cell::Text)
        .map_err(|e| StorageError::SerializationError(e.to_string()))
}

/// Reader and writer of the object-aux table.
pub struct AuxiliaryFields {
    conn: Arc<dyn Connection>,
    config: Arc<StoreConfig>,
    preloaded: RwLock<HashMap<EntityId, FieldMaps>>,
}

impl AuxiliaryFields {
    pub fn new(conn: Arc<dyn Connection>, config: Arc<StoreConfig>) -> Self {
        Self {
            conn,
            config,
            preloaded: RwLock::new(HashMap::new()),
        }
    }

    /// Recomputes and stores the maps for `id` from its current data.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn update_field_maps(&self, id: EntityId, data: &SemanticData) -> StoreResult<()> {
        let maps = FieldMaps::from_data(data, &self.config);
        let conditions = Conditions::new().eq(field::SMW_ID, id);

        if maps.is_empty() {
            self.conn.delete(AUX_TABLE, &conditions)?;
        } else {
            let values = Row::new()
                .with(field::SMW_SEQMAP, encode(&maps.sequence)?)
                .with(field::SMW_COUNTMAP, encode(&maps.counts)?);
            if self.conn.update(AUX_TABLE, &values, &conditions)? == 0 {
                self.conn.insert(AUX_TABLE, vec![values.with(field::SMW_ID, id)])?;
            }
        }

        let mut preloaded = self.preloaded.write();
        if preloaded.contains_key(&id) {
            preloaded.insert(id, maps);
        }
        Ok(())
    }

    /// Loads the maps of many entities with one query.
    ///
    /// # Errors
    /// Propagates storage failures and unreadable map documents.
    pub fn preload(&self, ids: &[EntityId]) -> StoreResult<()> {
        let missing: Vec<EntityId> = {
            let preloaded = self.preloaded.read();
            ids.iter().copied().filter(|id| !preloaded.contains_key(id)).collect()
        };
        if missing.is_empty() {
            return Ok(());
        }

        let conditions = Conditions::new().any_of(field::SMW_ID, missing.iter().copied());
        let rows = self.conn.select(AUX_TABLE, &conditions, &SelectOptions::new())?;

        let mut loaded: HashMap<EntityId, FieldMaps> =
            missing.into_iter().map(|id| (id, FieldMaps::default())).collect();
        for row in rows {
            let Some(id) = row.id(field::SMW_ID)? else {
                continue;
            };
            loaded.insert(
                id,
                FieldMaps {
                    sequence: decode(&row, field::SMW_SEQMAP)?,
                    counts: decode(&row, field::SMW_COUNTMAP)?,
                },
            );
        }

        tracing::debug!(target: "semstore::ids", entities = loaded.len(), "auxiliary fields preloaded");
        self.preloaded.write().extend(loaded);
        Ok(())
    }

    /// Both maps of `id`, from the preload table or storage.
    ///
    /// # Errors
    /// Propagates storage failures and unreadable map documents.
    pub fn load(&self, id: EntityId) -> StoreResult<FieldMaps> {
        if let Some(maps) = self.preloaded.read().get(&id) {
            return Ok(maps.clone());
        }
        let conditions = Conditions::new().eq(field::SMW_ID, id);
        let maps = match self.conn.select_row(AUX_TABLE, &conditions, &[])? {
            Some(row) => FieldMaps {
                sequence: decode(&row, field::SMW_SEQMAP)?,
                counts: decode(&row, field::SMW_COUNTMAP)?,
            },
            None => FieldMaps::default(),
        };
        Ok(maps)
    }

    /// The whole sequence map of `id`.
    ///
    /// # Errors
    /// See [`AuxiliaryFields::load`].
    pub fn load_sequence_map(&self, id: EntityId) -> StoreResult<SequenceMap> {
        Ok(self.load(id)?.sequence)
    }

    /// Ordered value hashes of one property, if its order is recorded.
    ///
    /// # Errors
    /// See [`AuxiliaryFields::load`].
    pub fn get_sequence_map(&self, id: EntityId, property_key: &str) -> StoreResult<Option<Vec<String>>> {
        Ok(self.load(id)?.sequence.remove(property_key))
    }

    /// The count map of `id`.
    ///
    /// # Errors
    /// See [`AuxiliaryFields::load`].
    pub fn get_count_map(&self, id: EntityId) -> StoreResult<CountMap> {
        Ok(self.load(id)?.counts)
    }

    /// Removes the stored maps of `id`.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn delete(&self, id: EntityId) -> StoreResult<usize> {
        self.preloaded.write().remove(&id);
        Ok(self.conn.delete(AUX_TABLE, &Conditions::new().eq(field::SMW_ID, id))?)
    }

    /// Drops the preload table.
    pub fn clear(&self) {
        self.preloaded.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{namespace, EntityKey};
    use crate::property::Property;
    use crate::schema::{install, TableRegistry};
    use crate::storage::InMemoryConnection;
    use crate::value::DataItem;

    fn setup(ordered: &[&str]) -> (Arc<InMemoryConnection>, AuxiliaryFields) {
        let conn = Arc::new(InMemoryConnection::new());
        install(conn.as_ref(), &TableRegistry::new(&[]).unwrap(), true, 500).unwrap();
        let config = StoreConfig {
            ordered_properties: ordered.iter().map(ToString::to_string).collect(),
            ..StoreConfig::default()
        };
        let aux = AuxiliaryFields::new(conn.clone(), Arc::new(config));
        (conn, aux)
    }

    fn data() -> SemanticData {
        let step = Property::new("Has_step").unwrap();
        let tag = Property::new("Has_tag").unwrap();
        SemanticData::new(EntityKey::new("Recipe", namespace::MAIN))
            .with_value(step.clone(), "mix")
            .with_value(step, "bake")
            .with_value(tag, "cake")
    }

    #[test]
    fn test_maps_are_stored_and_loaded() {
        let (_conn, aux) = setup(&["Has_step"]);
        let id = EntityId::new(600);
        aux.update_field_maps(id, &data()).unwrap();

        let counts = aux.get_count_map(id).unwrap();
        assert_eq!(counts["Has_step"], 2);
        assert_eq!(counts["Has_tag"], 1);

        let steps = aux.get_sequence_map(id, "Has_step").unwrap().unwrap();
        assert_eq!(steps[0], DataItem::Blob("mix".into()).value_hash());
        assert!(aux.get_sequence_map(id, "Has_tag").unwrap().is_none());
    }

    #[test]
    fn test_update_overwrites_existing_row() {
        let (conn, aux) = setup(&[]);
        let id = EntityId::new(600);
        aux.update_field_maps(id, &data()).unwrap();
        aux.update_field_maps(id, &data()).unwrap();
        assert_eq!(conn.row_count(AUX_TABLE), 1);

        aux.update_field_maps(id, &SemanticData::new(EntityKey::new("Recipe", 0))).unwrap();
        assert_eq!(conn.row_count(AUX_TABLE), 0);
    }

    #[test]
    fn test_preload_serves_from_memory() {
        let (conn, aux) = setup(&[]);
        let id = EntityId::new(600);
        aux.update_field_maps(id, &data()).unwrap();
        aux.preload(&[id, EntityId::new(601)]).unwrap();

        conn.delete(AUX_TABLE, &Conditions::new()).unwrap();
        assert_eq!(aux.get_count_map(id).unwrap().len(), 2);
        assert!(aux.get_count_map(EntityId::new(601)).unwrap().is_empty());

        aux.clear();
        assert!(aux.get_count_map(id).unwrap().is_empty());
    }
}
