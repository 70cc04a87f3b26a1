//! Reachability of surrogate IDs.

use std::sync::Arc;

use crate::config::StoreConfig;
use crate::entity::EntityId;
use crate::error::StoreResult;
use crate::schema::TableRegistry;
use crate::storage::{Conditions, Connection};

/// A table column that holds a given ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub table: String,
    pub field: &'static str,
    pub count: usize,
}

/// Looks for rows that still use an ID as subject, property or object.
pub struct IdReferenceFinder {
    conn: Arc<dyn Connection>,
    registry: Arc<TableRegistry>,
    config: Arc<StoreConfig>,
}

impl IdReferenceFinder {
    pub fn new(conn: Arc<dyn Connection>, registry: Arc<TableRegistry>, config: Arc<StoreConfig>) -> Self {
        Self { conn, registry, config }
    }

    /// True when `id` must not be collected: it is reserved for a predefined
    /// property or some property table still references it.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn has_residual_reference_for_id(&self, id: EntityId) -> StoreResult<bool> {
        if id.get() < self.config.fixed_property_id_upper_bound {
            return Ok(true);
        }
        Ok(self.find_at_least_one_active_reference_by_id(id)?.is_some())
    }

    /// The first reference found, stopping at the first match.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn find_at_least_one_active_reference_by_id(&self, id: EntityId) -> StoreResult<Option<Reference>> {
        for def in self.registry.tables() {
            for column in def.id_fields() {
                let count = self.conn.count(def.name(), &Conditions::new().eq(column, id))?;
                if count > 0 {
                    tracing::debug!(
                        target: "semstore::dispose",
                        %id,
                        table = def.name(),
                        field = column,
                        "active reference found"
                    );
                    return Ok(Some(Reference {
                        table: def.name().to_string(),
                        field: column,
                        count,
                    }));
                }
            }
        }
        Ok(None)
    }

    /// Every reference to `id`, for diagnostics.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn search_all_references(&self, id: EntityId) -> StoreResult<Vec<Reference>> {
        let mut references = Vec::new();
        for def in self.registry.tables() {
            for column in def.id_fields() {
                let count = self.conn.count(def.name(), &Conditions::new().eq(column, id))?;
                if count > 0 {
                    references.push(Reference {
                        table: def.name().to_string(),
                        field: column,
                        count,
                    });
                }
            }
        }
        Ok(references)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{field, install};
    use crate::storage::{InMemoryConnection, Row};

    fn finder() -> (Arc<dyn Connection>, IdReferenceFinder) {
        let conn: Arc<dyn Connection> = Arc::new(InMemoryConnection::new());
        let registry = Arc::new(TableRegistry::new(&[]).unwrap());
        install(conn.as_ref(), &registry, true, 500).unwrap();
        let finder = IdReferenceFinder::new(Arc::clone(&conn), registry, Arc::new(StoreConfig::default()));
        (conn, finder)
    }

    #[test]
    fn test_reserved_ids_always_referenced() {
        let (_, finder) = finder();
        assert!(finder.has_residual_reference_for_id(EntityId::new(4)).unwrap());
        assert!(finder.has_residual_reference_for_id(EntityId::new(499)).unwrap());
        assert!(!finder.has_residual_reference_for_id(EntityId::new(500)).unwrap());
    }

    #[test]
    fn test_object_and_redirect_references() {
        let (conn, finder) = finder();
        conn.insert(
            "smw_di_wikipage",
            vec![Row::new().with(field::S_ID, 600u32).with(field::P_ID, 601u32).with(field::O_ID, 602u32)],
        )
        .unwrap();
        conn.insert(
            "smw_fpt_redi",
            vec![Row::new().with(field::S_TITLE, "Foo").with(field::S_NAMESPACE, 0).with(field::O_ID, 700u32)],
        )
        .unwrap();

        for id in [600, 601, 602, 700] {
            assert!(finder.has_residual_reference_for_id(EntityId::new(id)).unwrap(), "{id}");
        }
        assert!(!finder.has_residual_reference_for_id(EntityId::new(603)).unwrap());

        let first = finder
            .find_at_least_one_active_reference_by_id(EntityId::new(602))
            .unwrap()
            .unwrap();
        assert_eq!(first.field, field::O_ID);
        assert_eq!(finder.search_all_references(EntityId::new(700)).unwrap().len(), 1);
    }
}
