//! Restartable, paged sweep over a table keyed by an integer ID column.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::entity::EntityId;
use crate::error::StoreResult;
use crate::storage::{Conditions, Connection, Row, SelectOptions};

/// Lazily pages through the rows matching `conditions` in ascending order of
/// `key_field`, holding at most one batch in memory.
///
/// Paging is keyset-based, so rows deleted by the consumer while iterating
/// do not shift later pages. [`ResultIterator::position`] can be stored and
/// handed to [`ResultIterator::resume_from`] to continue an interrupted sweep.
pub struct ResultIterator {
    conn: Arc<dyn Connection>,
    table: String,
    key_field: &'static str,
    conditions: Conditions,
    fields: Vec<&'static str>,
    batch_size: usize,
    position: EntityId,
    buffer: VecDeque<Row>,
    exhausted: bool,
}

impl ResultIterator {
    /// Starts before the first row. `batch_size` is clamped to at least one.
    #[must_use]
    pub fn new(
        conn: Arc<dyn Connection>,
        table: impl Into<String>,
        key_field: &'static str,
        conditions: Conditions,
        batch_size: usize,
    ) -> Self {
        Self {
            conn,
            table: table.into(),
            key_field,
            conditions,
            fields: Vec::new(),
            batch_size: batch_size.max(1),
            position: EntityId::NONE,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Restricts the returned columns; the key column is always included.
    #[must_use]
    pub fn with_fields(mut self, fields: &[&'static str]) -> Self {
        self.fields = fields.to_vec();
        if !self.fields.contains(&self.key_field) {
            self.fields.push(self.key_field);
        }
        self
    }

    /// Key of the last row handed out.
    #[must_use]
    pub const fn position(&self) -> EntityId {
        self.position
    }

    /// Continues after `position`.
    pub fn resume_from(&mut self, position: EntityId) {
        self.position = position;
        self.buffer.clear();
        self.exhausted = false;
    }

    /// Starts over from the first row.
    pub fn rewind(&mut self) {
        self.resume_from(EntityId::NONE);
    }

    fn fetch(&mut self) -> StoreResult<()> {
        let conditions = self.conditions.clone().gt(self.key_field, self.position);
        let options = SelectOptions::new()
            .fields(&self.fields)
            .order_by(self.key_field)
            .limit(self.batch_size);
        let rows = self.conn.select(&self.table, &conditions, &options)?;
        if rows.len() < self.batch_size {
            self.exhausted = true;
        }
        self.buffer.extend(rows);
        Ok(())
    }
}

impl Iterator for ResultIterator {
    type Item = StoreResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        let row = self.buffer.pop_front()?;
        match row.id(self.key_field) {
            Ok(Some(id)) => {
                self.position = id;
                Some(Ok(row))
            }
            Ok(None) => Some(Ok(row)),
            Err(e) => Some(Err(e.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{field, install, TableRegistry, ID_TABLE};
    use crate::storage::InMemoryConnection;

    fn populated(n: u32) -> Arc<dyn Connection> {
        let conn = InMemoryConnection::new();
        install(&conn, &TableRegistry::new(&[]).unwrap(), true, 500).unwrap();
        for i in 0..n {
            conn.insert_returning_id(
                ID_TABLE,
                Row::new()
                    .with(field::SMW_TITLE, format!("Page_{i}"))
                    .with(field::SMW_NAMESPACE, 0)
                    .with(field::SMW_IW, if i % 2 == 0 { "" } else { ":smw-delete" })
                    .with(field::SMW_SUBOBJECT, ""),
            )
            .unwrap();
        }
        Arc::new(conn)
    }

    #[test]
    fn test_pages_through_all_matching_rows() {
        let conn = populated(10);
        let iter = ResultIterator::new(
            conn,
            ID_TABLE,
            field::SMW_ID,
            Conditions::new().eq(field::SMW_IW, ":smw-delete"),
            2,
        );
        let ids: Vec<u32> = iter
            .map(|r| r.unwrap().id(field::SMW_ID).unwrap().unwrap().get())
            .collect();
        assert_eq!(ids, vec![501, 503, 505, 507, 509]);
    }

    #[test]
    fn test_resume_and_rewind() {
        let conn = populated(6);
        let mut iter = ResultIterator::new(conn, ID_TABLE, field::SMW_ID, Conditions::new(), 4)
            .with_fields(&[field::SMW_TITLE]);
        iter.next().unwrap().unwrap();
        iter.next().unwrap().unwrap();
        let saved = iter.position();
        assert_eq!(saved, EntityId::new(501));

        iter.resume_from(saved);
        assert_eq!(iter.by_ref().count(), 4);

        iter.rewind();
        assert_eq!(iter.count(), 6);
    }

    #[test]
    fn test_deleting_while_iterating() {
        let conn = populated(6);
        let iter = ResultIterator::new(Arc::clone(&conn), ID_TABLE, field::SMW_ID, Conditions::new(), 2);
        let mut seen = 0;
        for row in iter {
            let id = row.unwrap().id(field::SMW_ID).unwrap().unwrap();
            conn.delete(ID_TABLE, &Conditions::new().eq(field::SMW_ID, id)).unwrap();
            seen += 1;
        }
        assert_eq!(seen, 6);
    }
}
