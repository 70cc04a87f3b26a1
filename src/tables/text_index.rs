//! Fulltext rows for text-valued properties.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::entity::EntityId;
use crate::error::StoreResult;
use crate::schema::{field, FT_SEARCH_TABLE};
use crate::storage::{Conditions, Connection, Row, SelectOptions};

use super::change_op::TextItem;

/// Keeps one row per subject, property and text in `smw_ft_search`.
///
/// `o_sort` holds the lowercased text and is what [`FulltextIndex::search`]
/// matches against.
pub struct FulltextIndex {
    conn: Arc<dyn Connection>,
}

impl FulltextIndex {
    pub fn new(conn: Arc<dyn Connection>) -> Self {
        Self { conn }
    }

    /// Replaces the text rows of `subject_id` with `items`.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn update(&self, subject_id: EntityId, items: &[TextItem]) -> StoreResult<usize> {
        self.delete(subject_id)?;
        let rows: Vec<Row> = items
            .iter()
            .map(|item| {
                Row::new()
                    .with(field::S_ID, subject_id)
                    .with(field::P_ID, item.property_id)
                    .with(field::O_TEXT, item.text.as_str())
                    .with(field::O_SORT, item.text.to_lowercase())
            })
            .collect();
        let count = rows.len();
        if count > 0 {
            self.conn.insert(FT_SEARCH_TABLE, rows)?;
        }
        Ok(count)
    }

    /// Subjects with a text containing `term`, ignoring case.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn search(&self, term: &str) -> StoreResult<Vec<EntityId>> {
        let needle = term.to_lowercase();
        let rows = self.conn.select(
            FT_SEARCH_TABLE,
            &Conditions::new(),
            &SelectOptions::new().fields(&[field::S_ID, field::O_SORT]),
        )?;
        let mut hits = BTreeSet::new();
        for row in rows {
            if row.text(field::O_SORT).is_some_and(|text| text.contains(&needle)) {
                if let Some(id) = row.id(field::S_ID)? {
                    hits.insert(id);
                }
            }
        }
        Ok(hits.into_iter().collect())
    }

    /// Removes the text rows of `subject_id`.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn delete(&self, subject_id: EntityId) -> StoreResult<usize> {
        Ok(self
            .conn
            .delete(FT_SEARCH_TABLE, &Conditions::new().eq(field::S_ID, subject_id))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{install, TableRegistry};
    use crate::storage::InMemoryConnection;

    #[test]
    fn test_update_and_search() {
        let conn: Arc<dyn Connection> = Arc::new(InMemoryConnection::new());
        install(conn.as_ref(), &TableRegistry::new(&[]).unwrap(), true, 500).unwrap();
        let index = FulltextIndex::new(conn);
        let item = |text: &str| TextItem {
            property_id: EntityId::new(600),
            text: text.to_string(),
        };

        index.update(EntityId::new(700), &[item("Poor but Sexy")]).unwrap();
        index.update(EntityId::new(701), &[item("sexy and rich"), item("other")]).unwrap();
        assert_eq!(index.search("SEXY").unwrap(), vec![EntityId::new(700), EntityId::new(701)]);

        index.update(EntityId::new(700), &[item("plain")]).unwrap();
        assert_eq!(index.search("sexy").unwrap(), vec![EntityId::new(701)]);
        assert_eq!(index.delete(EntityId::new(701)).unwrap(), 2);
        assert!(index.search("sexy").unwrap().is_empty());
    }
}
