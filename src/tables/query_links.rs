//! Query dependency links: which entities an embedded query of a subject
//! depends on.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::entity::EntityId;
use crate::error::StoreResult;
use crate::schema::{field, QUERY_LINKS_TABLE};
use crate::storage::{Conditions, Connection, Row, SelectOptions};

pub struct QueryLinksStore {
    conn: Arc<dyn Connection>,
}

impl QueryLinksStore {
    pub fn new(conn: Arc<dyn Connection>) -> Self {
        Self { conn }
    }

    /// Replaces the dependencies of `subject_id`.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn set_dependencies(&self, subject_id: EntityId, dependencies: &[EntityId]) -> StoreResult<usize> {
        self.conn
            .delete(QUERY_LINKS_TABLE, &Conditions::new().eq(field::S_ID, subject_id))?;
        let unique: BTreeSet<EntityId> = dependencies.iter().copied().filter(|id| !id.is_none()).collect();
        let rows: Vec<Row> = unique
            .iter()
            .map(|id| Row::new().with(field::S_ID, subject_id).with(field::O_ID, *id))
            .collect();
        let count = rows.len();
        if !rows.is_empty() {
            self.conn.insert(QUERY_LINKS_TABLE, rows)?;
        }
        Ok(count)
    }

    /// IDs `subject_id` depends on.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn dependencies(&self, subject_id: EntityId) -> StoreResult<Vec<EntityId>> {
        self.column(field::S_ID, subject_id, field::O_ID)
    }

    /// Subjects whose queries depend on `id`.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn dependents(&self, id: EntityId) -> StoreResult<Vec<EntityId>> {
        self.column(field::O_ID, id, field::S_ID)
    }

    /// Drops every link from or to `id`.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn delete_for(&self, id: EntityId) -> StoreResult<usize> {
        let from = self
            .conn
            .delete(QUERY_LINKS_TABLE, &Conditions::new().eq(field::S_ID, id))?;
        let to = self
            .conn
            .delete(QUERY_LINKS_TABLE, &Conditions::new().eq(field::O_ID, id))?;
        Ok(from + to)
    }

    fn column(&self, key: &'static str, id: EntityId, wanted: &'static str) -> StoreResult<Vec<EntityId>> {
        let rows = self.conn.select(
            QUERY_LINKS_TABLE,
            &Conditions::new().eq(key, id),
            &SelectOptions::new().fields(&[wanted]).order_by(wanted),
        )?;
        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(id) = row.id(wanted)? {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{install, TableRegistry};
    use crate::storage::InMemoryConnection;

    #[test]
    fn test_dependencies_are_replaced() {
        let conn: Arc<dyn Connection> = Arc::new(InMemoryConnection::new());
        install(conn.as_ref(), &TableRegistry::new(&[]).unwrap(), true, 500).unwrap();
        let links = QueryLinksStore::new(conn);
        let subject = EntityId::new(600);

        let ids = |raw: &[u32]| raw.iter().copied().map(EntityId::new).collect::<Vec<_>>();
        assert_eq!(links.set_dependencies(subject, &ids(&[700, 701, 701, 0])).unwrap(), 2);
        assert_eq!(links.dependencies(subject).unwrap(), ids(&[700, 701]));

        links.set_dependencies(subject, &ids(&[702])).unwrap();
        assert_eq!(links.dependencies(subject).unwrap(), ids(&[702]));
        assert_eq!(links.dependents(EntityId::new(702)).unwrap(), vec![subject]);

        assert_eq!(links.delete_for(EntityId::new(702)).unwrap(), 1);
        assert!(links.dependencies(subject).unwrap().is_empty());
    }
}
