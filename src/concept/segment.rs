//! Evaluation of concept descriptions against the property tables.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::entity::{namespace, EntityId, EntityKey, Namespace};
use crate::error::StoreResult;
use crate::ids::EntityIdManager;
use crate::property::{PredefinedProperty, Property};
use crate::schema::{field, fixed_table_name, TableRegistry, ID_TABLE};
use crate::storage::{Conditions, Connection, SelectOptions};
use crate::value::DataItem;

use super::description::ConceptDescription;

/// Turns a [`ConceptDescription`] into the sorted set of matching subject
/// IDs.
pub struct QuerySegmentBuilder {
    conn: Arc<dyn Connection>,
    registry: Arc<TableRegistry>,
    ids: Arc<EntityIdManager>,
    config: Arc<StoreConfig>,
}

impl QuerySegmentBuilder {
    pub fn new(
        conn: Arc<dyn Connection>,
        registry: Arc<TableRegistry>,
        ids: Arc<EntityIdManager>,
        config: Arc<StoreConfig>,
    ) -> Self {
        Self {
            conn,
            registry,
            ids,
            config,
        }
    }

    /// Evaluates `description`. An empty conjunction matches nothing.
    ///
    /// # Errors
    /// Returns a validation error for malformed property keys or category
    /// names, and propagates storage failures.
    pub fn evaluate(&self, description: &ConceptDescription) -> StoreResult<BTreeSet<EntityId>> {
        match description {
            ConceptDescription::Category(name) => self.category_members(name),
            ConceptDescription::HasProperty(key) => self.property_subjects(&Property::new(key.as_str())?, None),
            ConceptDescription::PropertyValue { property, value } => {
                self.property_subjects(&Property::new(property.as_str())?, Some(value))
            }
            ConceptDescription::Namespace(ns) => self.namespace_members(*ns),
            ConceptDescription::Conjunction(parts) => {
                let mut parts = parts.iter();
                let Some(first) = parts.next() else {
                    return Ok(BTreeSet::new());
                };
                let mut result = self.evaluate(first)?;
                for part in parts {
                    if result.is_empty() {
                        break;
                    }
                    let next = self.evaluate(part)?;
                    result.retain(|id| next.contains(id));
                }
                Ok(result)
            }
            ConceptDescription::Disjunction(parts) => {
                let mut result = BTreeSet::new();
                for part in parts {
                    result.extend(self.evaluate(part)?);
                }
                Ok(result)
            }
        }
    }

    fn select_ids(&self, table: &str, conditions: &Conditions, column: &'static str) -> StoreResult<BTreeSet<EntityId>> {
        let rows = self
            .conn
            .select(table, conditions, &SelectOptions::new().fields(&[column]))?;
        let mut ids = BTreeSet::new();
        for row in rows {
            if let Some(id) = row.id(column)? {
                ids.insert(id);
            }
        }
        Ok(ids)
    }

    /// The category plus all subcategories, following `_SUBC` transitively.
    fn category_closure(&self, root: EntityId) -> StoreResult<BTreeSet<EntityId>> {
        let subcategory_table = fixed_table_name(PredefinedProperty::SubcategoryOf.key());
        let mut seen = BTreeSet::from([root]);
        let mut queue = VecDeque::from([root]);
        while let Some(category) = queue.pop_front() {
            let children = self.select_ids(
                &subcategory_table,
                &Conditions::new().eq(field::O_ID, category),
                field::S_ID,
            )?;
            for child in children {
                if seen.insert(child) {
                    queue.push_back(child);
                }
            }
        }
        Ok(seen)
    }

    fn category_members(&self, name: &str) -> StoreResult<BTreeSet<EntityId>> {
        let root = self.ids.get_id(&EntityKey::new(name, namespace::CATEGORY))?;
        if root.is_none() {
            return Ok(BTreeSet::new());
        }
        let categories = self.category_closure(root)?;
        self.select_ids(
            &fixed_table_name(PredefinedProperty::Instance.key()),
            &Conditions::new().any_of(field::O_ID, categories),
            field::S_ID,
        )
    }

    fn property_subjects(&self, property: &Property, value: Option<&DataItem>) -> StoreResult<BTreeSet<EntityId>> {
        let property_id = self.ids.get_property_id(property)?;
        if property_id.is_none() {
            return Ok(BTreeSet::new());
        }

        let Some(value) = value else {
            if let Some(def) = self.registry.fixed_table_for(property.key()) {
                return self.select_ids(def.name(), &Conditions::new(), field::S_ID);
            }
            let mut subjects = BTreeSet::new();
            for def in self.registry.generic_tables() {
                subjects.extend(self.select_ids(
                    def.name(),
                    &Conditions::new().eq(field::P_ID, property_id),
                    field::S_ID,
                )?);
            }
            return Ok(subjects);
        };

        let def = self.registry.table_for(property, value.kind())?;
        let mut conditions = Conditions::new();
        if !def.is_fixed() {
            conditions = conditions.eq(field::P_ID, property_id);
        }
        if let Some(page) = value.as_page() {
            let object = self.ids.get_id(page)?;
            if object.is_none() {
                return Ok(BTreeSet::new());
            }
            conditions = conditions.eq(field::O_ID, object);
        } else if let Some(cells) = value.value_cells() {
            for (column, cell) in cells {
                conditions = conditions.eq(column, cell);
            }
        }
        self.select_ids(def.name(), &conditions, field::S_ID)
    }

    fn namespace_members(&self, ns: Namespace) -> StoreResult<BTreeSet<EntityId>> {
        self.select_ids(
            ID_TABLE,
            &Conditions::new()
                .eq(field::SMW_NAMESPACE, ns)
                .eq(field::SMW_IW, "")
                .eq(field::SMW_SUBOBJECT, "")
                .gt(field::SMW_ID, self.config.fixed_property_id_upper_bound.saturating_sub(1)),
            field::SMW_ID,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::IdCacheManager;
    use crate::schema::install;
    use crate::storage::{InMemoryConnection, Row};

    struct Fixture {
        conn: Arc<dyn Connection>,
        ids: Arc<EntityIdManager>,
        builder: QuerySegmentBuilder,
    }

    fn fixture() -> Fixture {
        let config = Arc::new(StoreConfig::default());
        let conn: Arc<dyn Connection> = Arc::new(InMemoryConnection::new());
        let registry = Arc::new(TableRegistry::new(&[]).unwrap());
        install(conn.as_ref(), &registry, true, 500).unwrap();
        let cache = Arc::new(IdCacheManager::new(&config));
        let ids = Arc::new(
            EntityIdManager::new(
                Arc::clone(&conn),
                Arc::clone(&registry),
                Arc::clone(&config),
                cache,
                None,
            )
            .unwrap(),
        );
        let builder = QuerySegmentBuilder::new(Arc::clone(&conn), registry, Arc::clone(&ids), config);
        Fixture { conn, ids, builder }
    }

    fn id(f: &Fixture, title: &str, ns: i32) -> EntityId {
        f.ids.make_id(&EntityKey::new(title, ns), None, true, false).unwrap().id
    }

    fn fixed_row(f: &Fixture, table: &str, s: EntityId, o: EntityId) {
        f.conn
            .insert(table, vec![Row::new().with(field::S_ID, s).with(field::O_ID, o)])
            .unwrap();
    }

    #[test]
    fn test_category_includes_subcategories() {
        let f = fixture();
        let city = id(&f, "City", namespace::CATEGORY);
        let capital = id(&f, "Capital", namespace::CATEGORY);
        let berlin = id(&f, "Berlin", 0);
        let hamburg = id(&f, "Hamburg", 0);
        id(&f, "Rhine", 0);
        fixed_row(&f, "smw_fpt_subc", capital, city);
        fixed_row(&f, "smw_fpt_inst", berlin, capital);
        fixed_row(&f, "smw_fpt_inst", hamburg, city);

        let members = f.builder.evaluate(&ConceptDescription::Category("City".into())).unwrap();
        assert_eq!(members, BTreeSet::from([berlin, hamburg]));
        let capitals = f.builder.evaluate(&ConceptDescription::Category("Capital".into())).unwrap();
        assert_eq!(capitals, BTreeSet::from([berlin]));
        assert!(f.builder.evaluate(&ConceptDescription::Category("Nope".into())).unwrap().is_empty());
    }

    #[test]
    fn test_property_conditions_and_boolean_structure() {
        let f = fixture();
        let population = Property::new("Population").unwrap();
        let pid = f.ids.make_property_id(&population).unwrap();
        let berlin = id(&f, "Berlin", 0);
        let hamburg = id(&f, "Hamburg", 0);
        let paris = id(&f, "Paris", 0);
        for (s, v) in [(berlin, 3.6), (hamburg, 1.8)] {
            let mut row = Row::new().with(field::S_ID, s).with(field::P_ID, pid);
            for (column, cell) in DataItem::Number(v).value_cells().unwrap() {
                row.set(column, cell);
            }
            f.conn.insert("smw_di_number", vec![row]).unwrap();
        }

        let has = ConceptDescription::HasProperty("Population".into());
        assert_eq!(f.builder.evaluate(&has).unwrap(), BTreeSet::from([berlin, hamburg]));

        let exact = ConceptDescription::PropertyValue {
            property: "Population".into(),
            value: Box::new(DataItem::Number(1.8)),
        };
        assert_eq!(f.builder.evaluate(&exact).unwrap(), BTreeSet::from([hamburg]));

        let either = ConceptDescription::Disjunction(vec![exact.clone(), ConceptDescription::Namespace(0)]);
        assert_eq!(f.builder.evaluate(&either).unwrap(), BTreeSet::from([berlin, hamburg, paris]));

        let both = ConceptDescription::Conjunction(vec![has, exact]);
        assert_eq!(f.builder.evaluate(&both).unwrap(), BTreeSet::from([hamburg]));
        assert!(f.builder.evaluate(&ConceptDescription::Conjunction(Vec::new())).unwrap().is_empty());
    }
}
