//! Startup registry of property tables.
//!
//! Tables are resolved once from the predefined property registry plus the
//! configured user fixed properties. Row mapping then looks tables up by
//! typed property and kind instead of assembling names at every call.

use std::collections::{BTreeMap, HashMap};

use crate::config::FixedPropertyConfig;
use crate::error::{SchemaError, ValidationError};
use crate::property::{PredefinedProperty, Property};

use super::table::PropertyTableDefinition;
use super::DataItemKind;

/// Builds the fixed table name for a property key.
#[must_use]
pub fn fixed_table_name(property_key: &str) -> String {
    let slug: String = property_key
        .trim_start_matches('_')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("smw_fpt_{slug}")
}

/// Every property table known to the store.
#[derive(Debug, Clone)]
pub struct TableRegistry {
    tables: BTreeMap<String, PropertyTableDefinition>,
    fixed_by_property: HashMap<String, String>,
    generic_by_kind: HashMap<DataItemKind, String>,
}

impl TableRegistry {
    /// Resolves the table set.
    ///
    /// # Errors
    /// Returns [`ValidationError::InvalidConfig`] when a configured fixed
    /// property collides with a predefined one or with another configured
    /// property, or when a configured key is not a valid property key.
    pub fn new(fixed: &[FixedPropertyConfig]) -> Result<Self, ValidationError> {
        let mut registry = Self {
            tables: BTreeMap::new(),
            fixed_by_property: HashMap::new(),
            generic_by_kind: HashMap::new(),
        };

        for kind in DataItemKind::ALL {
            if let Some(name) = kind.generic_table_name() {
                registry.add(PropertyTableDefinition::generic(name, kind));
                registry.generic_by_kind.insert(kind, name.to_string());
            }
        }

        for p in PredefinedProperty::ALL {
            if !p.has_fixed_table() {
                continue;
            }
            let mut def = PropertyTableDefinition::fixed(fixed_table_name(p.key()), p.kind(), p.key())
                .restricted_to(p.namespace_restriction());
            if !p.uses_id_subject() {
                def = def.without_id_subject();
            }
            registry.add(def);
        }

        for cfg in fixed {
            let property = Property::new(cfg.key.clone())?;
            if !property.is_user_defined() {
                return Err(ValidationError::InvalidConfig {
                    reason: format!("fixed property '{}' is predefined", cfg.key),
                });
            }
            let name = fixed_table_name(&cfg.key);
            if registry.tables.contains_key(&name) {
                return Err(ValidationError::InvalidConfig {
                    reason: format!("fixed property '{}' maps to existing table '{name}'", cfg.key),
                });
            }
            registry.add(PropertyTableDefinition::fixed(name, cfg.kind, cfg.key.clone()));
        }

        tracing::debug!(
            target: "semstore::schema",
            tables = registry.tables.len(),
            "property table registry resolved"
        );
        Ok(registry)
    }

    fn add(&mut self, def: PropertyTableDefinition) {
        if let Some(key) = def.fixed_property() {
            self.fixed_by_property
                .insert(key.to_string(), def.name().to_string());
        }
        self.tables.insert(def.name().to_string(), def);
    }

    /// Looks up a table by name.
    ///
    /// # Errors
    /// Returns [`SchemaError::UnknownTable`] for unregistered names.
    pub fn get(&self, name: &str) -> Result<&PropertyTableDefinition, SchemaError> {
        self.tables.get(name).ok_or_else(|| SchemaError::UnknownTable {
            table: name.to_string(),
        })
    }

    /// The fixed table of a property, if it has one.
    #[must_use]
    pub fn fixed_table_for(&self, property_key: &str) -> Option<&PropertyTableDefinition> {
        self.fixed_by_property
            .get(property_key)
            .and_then(|name| self.tables.get(name))
    }

    /// The table a value of `kind` for `property` is stored in.
    ///
    /// # Errors
    /// Returns [`SchemaError::KindMismatch`] when the property has a fixed
    /// table of another kind, and [`SchemaError::UnknownTable`] when no
    /// shared table exists for the kind.
    pub fn table_for(
        &self,
        property: &Property,
        kind: DataItemKind,
    ) -> Result<&PropertyTableDefinition, SchemaError> {
        if let Some(def) = self.fixed_table_for(property.key()) {
            if def.kind() != kind {
                return Err(SchemaError::KindMismatch {
                    property: property.key().to_string(),
                    expected: def.kind().to_string(),
                    actual: kind.to_string(),
                });
            }
            return Ok(def);
        }
        let name = self
            .generic_by_kind
            .get(&kind)
            .ok_or_else(|| SchemaError::UnknownTable {
                table: format!("generic table for {kind}"),
            })?;
        self.get(name)
    }

    /// Generic (shared) tables, one per kind.
    pub fn generic_tables(&self) -> impl Iterator<Item = &PropertyTableDefinition> {
        self.tables.values().filter(|d| !d.is_fixed())
    }

    /// All tables in name order.
    pub fn tables(&self) -> impl Iterator<Item = &PropertyTableDefinition> {
        self.tables.values()
    }

    /// Tables that hold entity references of `kind` (used when re-pointing
    /// object references).
    pub fn tables_of_kind(&self, kind: DataItemKind) -> impl Iterator<Item = &PropertyTableDefinition> {
        self.tables.values().filter(move |d| d.kind() == kind)
    }

    /// The subject-less redirect table.
    ///
    /// # Errors
    /// Returns [`SchemaError::UnknownTable`] if the registry was built
    /// without it.
    pub fn redirect_table(&self) -> Result<&PropertyTableDefinition, SchemaError> {
        self.fixed_table_for(PredefinedProperty::Redirect.key())
            .ok_or_else(|| SchemaError::UnknownTable {
                table: fixed_table_name(PredefinedProperty::Redirect.key()),
            })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
