//! Projection of semantic data into property-table rows.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::entity::EntityId;
use crate::error::StoreResult;
use crate::ids::EntityIdManager;
use crate::property::Property;
use crate::schema::{field, PropertyTableDefinition, TableRegistry};
use crate::semantic_data::SemanticData;
use crate::storage::Row;
use crate::value::DataItem;

use super::change_op::{table_hash, ChangeOp, FixedPropertyRecord, TextItem};

/// Output of [`RowMapper::map_to_rows`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappedRows {
    /// Rows per table, sorted and free of duplicates.
    pub rows: BTreeMap<String, Vec<Row>>,
    pub text_items: Vec<TextItem>,
    /// Every property that produced at least one row, with its ID.
    pub properties: Vec<(Property, EntityId)>,
    /// Resolution of every fixed table touched, including unknown ones.
    pub fixed_properties: Vec<FixedPropertyRecord>,
}

impl MappedRows {
    #[must_use]
    pub fn rows_for(&self, table: &str) -> &[Row] {
        self.rows.get(table).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.values().map(Vec::len).sum()
    }
}

/// Maps a subject's semantic data to row tuples, resolving or allocating
/// the surrogate IDs of properties and wikipage values on the way.
pub struct RowMapper {
    ids: Arc<EntityIdManager>,
    registry: Arc<TableRegistry>,
}

impl RowMapper {
    pub fn new(ids: Arc<EntityIdManager>, registry: Arc<TableRegistry>) -> Self {
        Self { ids, registry }
    }

    /// Maps `data` for the already allocated `subject_id`.
    ///
    /// Inverse properties are skipped, as are values whose table is not
    /// relevant for the subject's namespace. A fixed table whose property has
    /// no ID yet contributes no rows; the miss is kept in
    /// [`MappedRows::fixed_properties`].
    ///
    /// # Errors
    /// Returns a schema error when a value's kind does not match the fixed
    /// table of its property, and propagates ID-allocation failures.
    pub fn map_to_rows(&self, subject_id: EntityId, data: &SemanticData) -> StoreResult<MappedRows> {
        let namespace = data.subject().namespace;
        let mut rows: BTreeMap<String, BTreeSet<Row>> = BTreeMap::new();
        let mut text_items = BTreeSet::new();
        let mut properties = Vec::new();
        let mut fixed: BTreeMap<String, FixedPropertyRecord> = BTreeMap::new();
        let mut resolved: HashMap<(&str, bool), EntityId> = HashMap::new();

        for (property, values) in data.properties() {
            if property.is_inverse() {
                tracing::debug!(target: "semstore::tables", property = property.key(), "inverse property skipped");
                continue;
            }
            let mut used = None;
            for value in values {
                let def = self.registry.table_for(property, value.kind())?;
                if !def.is_relevant_for(namespace) {
                    tracing::debug!(
                        target: "semstore::tables",
                        table = def.name(),
                        namespace,
                        "table not relevant for subject namespace"
                    );
                    continue;
                }

                let property_id = match resolved.get(&(property.key(), def.is_fixed())) {
                    Some(id) => *id,
                    None => {
                        let id = self.resolve_property(property, def)?;
                        resolved.insert((property.key(), def.is_fixed()), id);
                        id
                    }
                };
                if def.is_fixed() {
                    fixed.entry(def.name().to_string()).or_insert_with(|| FixedPropertyRecord {
                        table: def.name().to_string(),
                        property_key: property.key().to_string(),
                        property_id,
                    });
                }
                if property_id.is_none() {
                    continue;
                }

                let row = self.value_row(subject_id, property_id, def, value)?;
                rows.entry(def.name().to_string()).or_default().insert(row);
                if let Some(text) = value.search_text() {
                    text_items.insert(TextItem {
                        property_id,
                        text: text.to_string(),
                    });
                }
                used = Some(property_id);
            }
            if let Some(id) = used {
                properties.push((property.clone(), id));
            }
        }

        for record in fixed.values().filter(|r| !r.is_known()) {
            tracing::warn!(
                target: "semstore::tables",
                table = %record.table,
                property = %record.property_key,
                "unknown fixed property, rows dropped"
            );
        }

        Ok(MappedRows {
            rows: rows
                .into_iter()
                .map(|(table, set)| (table, set.into_iter().collect()))
                .collect(),
            text_items: text_items.into_iter().collect(),
            properties,
            fixed_properties: fixed.into_values().collect(),
        })
    }

    /// Maps `data` and wraps every row as an insert, for subjects without
    /// stored rows.
    ///
    /// # Errors
    /// See [`RowMapper::map_to_rows`].
    pub fn new_change_op(&self, subject_id: EntityId, data: &SemanticData) -> StoreResult<ChangeOp> {
        let mapped = self.map_to_rows(subject_id, data)?;
        let mut op = ChangeOp::new(subject_id);
        for record in mapped.fixed_properties {
            op.add_fixed_property_record(record);
        }
        for (table, rows) in mapped.rows {
            op.set_new_hash(&table, table_hash(&rows));
            op.add_insert_rows(&table, rows);
        }
        op.set_text_items(mapped.text_items);
        Ok(op)
    }

    /// Shared tables and fixed properties declared in the configuration get
    /// an ID on first use. Any other fixed table only maps a known property.
    fn resolve_property(&self, property: &Property, def: &PropertyTableDefinition) -> StoreResult<EntityId> {
        let declared = property.as_predefined().is_some()
            || self
                .ids
                .config()
                .fixed_properties
                .iter()
                .any(|fixed| fixed.key == property.key());
        if def.is_fixed() && !declared {
            self.ids.get_property_id(property)
        } else {
            self.ids.make_property_id(property)
        }
    }

    fn value_row(
        &self,
        subject_id: EntityId,
        property_id: EntityId,
        def: &PropertyTableDefinition,
        value: &DataItem,
    ) -> StoreResult<Row> {
        let mut row = Row::new().with(field::S_ID, subject_id);
        if !def.is_fixed() {
            row.set(field::P_ID, property_id);
        }
        if let Some(page) = value.as_page() {
            let object = self.ids.make_id(page, None, true, false)?;
            row.set(field::O_ID, object.id);
        } else if let Some(cells) = value.value_cells() {
            for (column, cell) in cells {
                row.set(column, cell);
            }
        }
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::IdCacheManager;
    use crate::config::{FixedPropertyConfig, StoreConfig};
    use crate::entity::{namespace, EntityKey};
    use crate::property::PredefinedProperty;
    use crate::schema::{install, DataItemKind};
    use crate::storage::{Cell, Connection, InMemoryConnection};

    fn mapper_with(fixed: Vec<FixedPropertyConfig>) -> (Arc<EntityIdManager>, RowMapper) {
        mapper_with_tables(fixed.clone(), fixed)
    }

    /// `tables` builds the registry while `declared` goes to the ID manager.
    fn mapper_with_tables(
        tables: Vec<FixedPropertyConfig>,
        declared: Vec<FixedPropertyConfig>,
    ) -> (Arc<EntityIdManager>, RowMapper) {
        let config = StoreConfig {
            fixed_properties: declared,
            ..StoreConfig::default()
        };
        let conn: Arc<dyn Connection> = Arc::new(InMemoryConnection::new());
        let registry = Arc::new(TableRegistry::new(&tables).unwrap());
        install(conn.as_ref(), &registry, true, config.fixed_property_id_upper_bound).unwrap();
        let cache = Arc::new(IdCacheManager::new(&config));
        let ids = Arc::new(
            EntityIdManager::new(conn, Arc::clone(&registry), Arc::new(config), cache, None).unwrap(),
        );
        ids.install_predefined_properties().unwrap();
        let mapper = RowMapper::new(Arc::clone(&ids), registry);
        (ids, mapper)
    }

    #[test]
    fn test_generic_rows_carry_property_id() {
        let (ids, mapper) = mapper_with(Vec::new());
        let subject = EntityKey::new("Berlin", namespace::MAIN);
        let subject_id = ids.make_id(&subject, None, true, false).unwrap().id;
        let data = SemanticData::new(subject)
            .with_value(Property::new("Population").unwrap(), 3_645_000.0)
            .with_value(Property::new("Capital_of").unwrap(), EntityKey::new("Germany", 0));

        let mapped = mapper.map_to_rows(subject_id, &data).unwrap();
        let numbers = mapped.rows_for("smw_di_number");
        assert_eq!(numbers.len(), 1);
        assert_eq!(numbers[0].id(field::S_ID).unwrap(), Some(subject_id));
        assert!(numbers[0].id(field::P_ID).unwrap().is_some());
        assert_eq!(numbers[0].get(field::O_SORTKEY), Some(&Cell::Float(3_645_000.0)));

        let pages = mapped.rows_for("smw_di_wikipage");
        let germany = ids.get_id(&EntityKey::new("Germany", 0)).unwrap();
        assert!(!germany.is_none());
        assert_eq!(pages[0].id(field::O_ID).unwrap(), Some(germany));
        assert_eq!(mapped.properties.len(), 2);
    }

    #[test]
    fn test_fixed_table_rows_omit_property_column() {
        let (ids, mapper) = mapper_with(Vec::new());
        let subject = EntityKey::new("Berlin", namespace::MAIN);
        let subject_id = ids.make_id(&subject, None, true, false).unwrap().id;
        let data = SemanticData::new(subject).with_value(
            Property::predefined(PredefinedProperty::Instance),
            EntityKey::new("City", namespace::CATEGORY),
        );

        let mapped = mapper.map_to_rows(subject_id, &data).unwrap();
        let rows = mapped.rows_for("smw_fpt_inst");
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].contains(field::P_ID));
        assert_eq!(mapped.fixed_properties.len(), 1);
        assert_eq!(mapped.fixed_properties[0].property_id, PredefinedProperty::Instance.reserved_id());
    }

    fn has_area() -> Vec<FixedPropertyConfig> {
        vec![FixedPropertyConfig {
            key: "Has_area".into(),
            kind: DataItemKind::Number,
        }]
    }

    #[test]
    fn test_declared_fixed_property_is_allocated_on_first_use() {
        let (ids, mapper) = mapper_with(has_area());
        let subject = EntityKey::new("Berlin", namespace::MAIN);
        let subject_id = ids.make_id(&subject, None, true, false).unwrap().id;
        let area = Property::new("Has_area").unwrap();
        let data = SemanticData::new(subject).with_value(area.clone(), 891.8);

        let mapped = mapper.map_to_rows(subject_id, &data).unwrap();
        assert_eq!(mapped.rows_for("smw_fpt_has_area").len(), 1);
        assert!(mapped.fixed_properties[0].is_known());
        assert_eq!(mapped.fixed_properties[0].property_id, ids.get_property_id(&area).unwrap());
    }

    #[test]
    fn test_unknown_fixed_property_yields_no_rows() {
        let (ids, mapper) = mapper_with_tables(has_area(), Vec::new());
        let subject = EntityKey::new("Berlin", namespace::MAIN);
        let subject_id = ids.make_id(&subject, None, true, false).unwrap().id;
        let area = Property::new("Has_area").unwrap();
        let data = SemanticData::new(subject).with_value(area.clone(), 891.8);

        let mapped = mapper.map_to_rows(subject_id, &data).unwrap();
        assert_eq!(mapped.row_count(), 0);
        assert_eq!(mapped.fixed_properties.len(), 1);
        assert!(!mapped.fixed_properties[0].is_known());

        ids.make_property_id(&area).unwrap();
        let mapped = mapper.map_to_rows(subject_id, &data).unwrap();
        assert_eq!(mapped.rows_for("smw_fpt_has_area").len(), 1);
    }

    #[test]
    fn test_inverse_and_irrelevant_values_are_skipped() {
        let (ids, mapper) = mapper_with(Vec::new());
        let subject = EntityKey::new("Berlin", namespace::MAIN);
        let subject_id = ids.make_id(&subject, None, true, false).unwrap().id;
        let mut data = SemanticData::new(subject);
        data.add_value(
            Property::new("Capital_of").unwrap().inverted(),
            DataItem::WikiPage(EntityKey::new("Germany", 0)),
        );
        data.add_value(
            Property::predefined(PredefinedProperty::Concept),
            DataItem::Concept(crate::concept::ConceptDefinition {
                description: crate::concept::ConceptDescription::Category("City".into()),
                documentation: String::new(),
            }),
        );

        let mapped = mapper.map_to_rows(subject_id, &data).unwrap();
        assert_eq!(mapped.row_count(), 0);
    }

    #[test]
    fn test_text_items_collected() {
        let (ids, mapper) = mapper_with(Vec::new());
        let subject = EntityKey::new("Berlin", namespace::MAIN);
        let subject_id = ids.make_id(&subject, None, true, false).unwrap().id;
        let data = SemanticData::new(subject).with_value(Property::new("Motto").unwrap(), "Poor but sexy");

        let op = mapper.new_change_op(subject_id, &data).unwrap();
        assert_eq!(op.text_items().len(), 1);
        assert_eq!(op.text_items()[0].text, "Poor but sexy");
        assert_eq!(op.insert_count(), 1);
        assert!(op.new_hashes().contains_key("smw_di_blob"));
    }
}
