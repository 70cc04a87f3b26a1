//! Store configuration.

use serde::{Deserialize, Serialize};

use crate::entity::{namespace, Namespace};
use crate::error::ValidationError;
use crate::property::PredefinedProperty;
use crate::schema::DataItemKind;

/// A user property that gets its own fixed table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedPropertyConfig {
    /// Property key, e.g. `Has_population`.
    pub key: String,
    /// Kind of the values stored for it.
    pub kind: DataItemKind,
}

/// Store configuration.
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use semstore::StoreConfig;
///
/// let cfg = StoreConfig::from_json_str(r#"{ "check_remnant_entities": true }"#).unwrap();
/// assert!(cfg.check_remnant_entities);
/// assert_eq!(cfg.fixed_property_id_upper_bound, 500);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Capacity of the key to ID cache.
    pub id_cache_size: usize,
    /// Capacity of the ID to sortkey cache.
    pub sort_cache_size: usize,
    /// Capacity of the ID to key cache.
    pub lookup_cache_size: usize,
    /// Capacity of the per-subject table hash cache.
    pub table_hash_cache_size: usize,
    /// Capacity of the redirect cache.
    pub redirect_cache_size: usize,
    /// IDs below this bound are reserved for predefined properties. They are
    /// never garbage-collected and the allocator starts here.
    pub fixed_property_id_upper_bound: u32,
    /// User properties stored in dedicated tables.
    pub fixed_properties: Vec<FixedPropertyConfig>,
    /// Ignore the table hash shortcut when no hash was ever recorded.
    pub check_remnant_entities: bool,
    /// Hand redirect reconciliation and disposal to the job queue.
    pub enable_update_jobs: bool,
    /// Maintenance mode: always work inline, never enqueue.
    pub command_line_mode: bool,
    /// Namespaces an entity may live in. Empty means every namespace.
    pub valid_namespaces: Vec<Namespace>,
    /// Page size of ID-table sweeps.
    pub iterator_batch_size: usize,
    /// Bound of the in-process job queue.
    pub job_queue_capacity: usize,
    /// Age after which a concept cache counts as stale.
    pub concept_cache_lifetime_secs: u64,
    /// Enforce uniqueness of composite keys in the ID table.
    pub unique_entity_keys: bool,
    /// Properties whose value order is recorded in the sequence map.
    pub ordered_properties: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            id_cache_size: 500,
            sort_cache_size: 500,
            lookup_cache_size: 2000,
            table_hash_cache_size: 100,
            redirect_cache_size: 1000,
            fixed_property_id_upper_bound: 500,
            fixed_properties: Vec::new(),
            check_remnant_entities: false,
            enable_update_jobs: true,
            command_line_mode: false,
            valid_namespaces: vec![
                namespace::MAIN,
                namespace::USER,
                namespace::FILE,
                namespace::CATEGORY,
                namespace::PROPERTY,
                namespace::CONCEPT,
            ],
            iterator_batch_size: 500,
            job_queue_capacity: 1024,
            concept_cache_lifetime_secs: 3600,
            unique_entity_keys: true,
            ordered_properties: Vec::new(),
        }
    }
}

impl StoreConfig {
    /// Parses a JSON document; missing fields take their defaults.
    ///
    /// # Errors
    /// Returns [`ValidationError::InvalidConfig`] for unparsable input or a
    /// configuration that fails [`StoreConfig::validate`].
    pub fn from_json_str(json: &str) -> Result<Self, ValidationError> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            reason: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks capacities and the reserved ID range.
    ///
    /// # Errors
    /// Returns [`ValidationError::InvalidConfig`] describing the first
    /// offending field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: String| Err(ValidationError::InvalidConfig { reason });

        for (name, size) in [
            ("id_cache_size", self.id_cache_size),
            ("sort_cache_size", self.sort_cache_size),
            ("lookup_cache_size", self.lookup_cache_size),
            ("table_hash_cache_size", self.table_hash_cache_size),
            ("redirect_cache_size", self.redirect_cache_size),
            ("iterator_batch_size", self.iterator_batch_size),
            ("job_queue_capacity", self.job_queue_capacity),
        ] {
            if size == 0 {
                return invalid(format!("{name} must be positive"));
            }
        }

        let highest_reserved = PredefinedProperty::ALL
            .iter()
            .map(|p| p.reserved_id().get())
            .max()
            .unwrap_or(0);
        if self.fixed_property_id_upper_bound <= highest_reserved {
            return invalid(format!(
                "fixed_property_id_upper_bound {} does not cover reserved id {highest_reserved}",
                self.fixed_property_id_upper_bound
            ));
        }
        Ok(())
    }

    /// Whether an entity in `ns` passes the namespace sweep.
    #[must_use]
    pub fn is_valid_namespace(&self, ns: Namespace) -> bool {
        self.valid_namespaces.is_empty() || self.valid_namespaces.contains(&ns)
    }

    /// Whether the value order of `property_key` is tracked.
    #[must_use]
    pub fn is_ordered(&self, property_key: &str) -> bool {
        self.ordered_properties.iter().any(|k| k == property_key)
    }

    /// Whether follow-up work should be queued rather than run inline.
    #[must_use]
    pub const fn defers_to_jobs(&self) -> bool {
        self.enable_update_jobs && !self.command_line_mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = StoreConfig::default();
        assert!(cfg.validate().is_ok());
        assert!(cfg.defers_to_jobs());
    }

    #[test]
    fn test_zero_cache_is_rejected() {
        let cfg = StoreConfig {
            id_cache_size: 0,
            ..StoreConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("id_cache_size"));
    }

    #[test]
    fn test_upper_bound_must_cover_predefined_range() {
        let cfg = StoreConfig {
            fixed_property_id_upper_bound: 10,
            ..StoreConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_partial_json() {
        let cfg = StoreConfig::from_json_str(
            r#"{
                "command_line_mode": true,
                "fixed_properties": [{ "key": "Has_population", "kind": "number" }]
            }"#,
        )
        .unwrap();
        assert!(!cfg.defers_to_jobs());
        assert_eq!(cfg.fixed_properties[0].kind, DataItemKind::Number);
        assert_eq!(cfg.id_cache_size, 500);
    }

    #[test]
    fn test_bad_json() {
        assert!(StoreConfig::from_json_str("{ not json").is_err());
    }

    #[test]
    fn test_namespace_check() {
        let cfg = StoreConfig::default();
        assert!(cfg.is_valid_namespace(namespace::MAIN));
        assert!(!cfg.is_valid_namespace(4242));

        let open = StoreConfig {
            valid_namespaces: Vec::new(),
            ..StoreConfig::default()
        };
        assert!(open.is_valid_namespace(4242));
    }
}
