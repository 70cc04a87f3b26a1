//! In-memory storage backend.
//!
//! This module provides a thread-safe in-memory implementation of
//! [`Connection`]. It is intended for embedded usage, tests, and as a
//! reference implementation of the backend contract: unique constraints,
//! auto-increment IDs and an atomic insert-or-get.

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::RwLock;

use super::traits::{
    Cell, Conditions, Connection, InsertOutcome, Row, SelectOptions, StorageError, TableSchema,
};

#[derive(Debug)]
struct Table {
    schema: TableSchema,
    rows: BTreeMap<u64, Row>,
    next_rowid: u64,
    next_auto: u32,
}

impl Table {
    fn new(schema: TableSchema) -> Self {
        let next_auto = schema.auto_increment.map_or(1, |a| a.start.max(1));
        Self {
            schema,
            rows: BTreeMap::new(),
            next_rowid: 1,
            next_auto,
        }
    }

    fn check_fields(&self, row: &Row) -> Result<(), StorageError> {
        for field in row.fields() {
            if !self.schema.fields.contains(&field) {
                return Err(StorageError::UnknownField {
                    table: self.schema.name.clone(),
                    field: field.to_string(),
                });
            }
        }
        Ok(())
    }

    fn check_conditions(&self, conditions: &Conditions) -> Result<(), StorageError> {
        for cond in conditions.iter() {
            if !self.schema.fields.contains(&cond.field()) {
                return Err(StorageError::UnknownField {
                    table: self.schema.name.clone(),
                    field: cond.field().to_string(),
                });
            }
        }
        Ok(())
    }

    fn unique_key(row: &Row, fields: &[&'static str]) -> Option<Vec<Cell>> {
        let mut key = Vec::with_capacity(fields.len());
        for field in fields {
            match row.get(field) {
                None | Some(Cell::Null) => return None,
                Some(cell) => key.push(cell.clone()),
            }
        }
        Some(key)
    }

    /// Rejects `candidates` if any of them collides with a stored row (other
    /// than those in `skip`) or with each other.
    fn check_unique(&self, candidates: &[&Row], skip: &[u64]) -> Result<(), StorageError> {
        for fields in &self.schema.unique {
            let mut seen: HashSet<Vec<Cell>> = HashSet::new();
            for (rowid, row) in &self.rows {
                if skip.contains(rowid) {
                    continue;
                }
                if let Some(key) = Self::unique_key(row, fields) {
                    seen.insert(key);
                }
            }
            for row in candidates {
                if let Some(key) = Self::unique_key(row, fields) {
                    if !seen.insert(key) {
                        return Err(StorageError::DuplicateKey(format!(
                            "{} ({})",
                            self.schema.name,
                            fields.join(", ")
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn push(&mut self, row: Row) {
        let rowid = self.next_rowid;
        self.next_rowid += 1;
        self.rows.insert(rowid, row);
    }

    fn assign_auto(&self, mut row: Row) -> Result<(Row, u32), StorageError> {
        let Some(auto) = self.schema.auto_increment else {
            return Err(StorageError::Unsupported(format!(
                "table '{}' has no auto-increment column",
                self.schema.name
            )));
        };
        let id = match row.get(auto.field).filter(|c| !c.is_null()) {
            Some(cell) => cell.as_id().map(crate::entity::EntityId::get).ok_or_else(|| {
                StorageError::Corrupt(format!("explicit {} is not an id: {cell}", auto.field))
            })?,
            None => self.next_auto,
        };
        row.set(auto.field, id);
        Ok((row, id))
    }

    fn commit_auto(&mut self, id: u32) {
        if id >= self.next_auto {
            self.next_auto = id + 1;
        }
    }
}

fn project(row: &Row, fields: &[&'static str]) -> Row {
    if fields.is_empty() {
        row.clone()
    } else {
        row.project(fields)
    }
}

/// Thread-safe in-memory relational backend.
#[derive(Debug, Default)]
pub struct InMemoryConnection {
    tables: RwLock<HashMap<String, Table>>,
}

impl InMemoryConnection {
    /// Create a new empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently stored in `table` (0 when missing).
    #[must_use]
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, |t| t.rows.len())
    }
}

impl Connection for InMemoryConnection {
    fn create_table(&self, schema: TableSchema) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        tables
            .entry(schema.name.clone())
            .or_insert_with(|| Table::new(schema));
        Ok(())
    }

    fn has_table(&self, table: &str) -> bool {
        self.tables.read().contains_key(table)
    }

    fn select(
        &self,
        table: &str,
        conditions: &Conditions,
        options: &SelectOptions,
    ) -> Result<Vec<Row>, StorageError> {
        let tables = self.tables.read();
        let t = tables
            .get(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        t.check_conditions(conditions)?;

        let mut matched: Vec<&Row> = t.rows.values().filter(|r| conditions.matches(r)).collect();

        if let Some(order) = options.order_by {
            let null = Cell::Null;
            matched.sort_by(|a, b| {
                let ka = a.get(order).unwrap_or(&null);
                let kb = b.get(order).unwrap_or(&null);
                if options.descending {
                    kb.cmp(ka)
                } else {
                    ka.cmp(kb)
                }
            });
        }

        let limit = options.limit.unwrap_or(usize::MAX);
        Ok(matched
            .into_iter()
            .take(limit)
            .map(|r| project(r, &options.fields))
            .collect())
    }

    fn count(&self, table: &str, conditions: &Conditions) -> Result<usize, StorageError> {
        let tables = self.tables.read();
        let t = tables
            .get(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        t.check_conditions(conditions)?;
        Ok(t.rows.values().filter(|r| conditions.matches(r)).count())
    }

    fn insert(&self, table: &str, rows: Vec<Row>) -> Result<(), StorageError> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut tables = self.tables.write();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;

        let saved_auto = t.next_auto;
        let mut prepared = Vec::with_capacity(rows.len());
        for row in rows {
            if let Err(e) = t.check_fields(&row) {
                t.next_auto = saved_auto;
                return Err(e);
            }
            if t.schema.auto_increment.is_some() {
                let (row, id) = match t.assign_auto(row) {
                    Ok(assigned) => assigned,
                    Err(e) => {
                        t.next_auto = saved_auto;
                        return Err(e);
                    }
                };
                // Keep ids distinct within the batch.
                t.commit_auto(id);
                prepared.push(row);
            } else {
                prepared.push(row);
            }
        }

        let refs: Vec<&Row> = prepared.iter().collect();
        if let Err(e) = t.check_unique(&refs, &[]) {
            t.next_auto = saved_auto;
            return Err(e);
        }

        for row in prepared {
            t.push(row);
        }
        Ok(())
    }

    fn insert_returning_id(&self, table: &str, row: Row) -> Result<u32, StorageError> {
        let mut tables = self.tables.write();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        t.check_fields(&row)?;
        let (row, id) = t.assign_auto(row)?;
        t.check_unique(&[&row], &[])?;
        t.commit_auto(id);
        t.push(row);
        Ok(id)
    }

    fn update(
        &self,
        table: &str,
        values: &Row,
        conditions: &Conditions,
    ) -> Result<usize, StorageError> {
        let mut tables = self.tables.write();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        t.check_fields(values)?;
        t.check_conditions(conditions)?;

        let targets: Vec<u64> = t
            .rows
            .iter()
            .filter(|(_, r)| conditions.matches(r))
            .map(|(id, _)| *id)
            .collect();
        if targets.is_empty() {
            return Ok(0);
        }

        let mut updated = Vec::with_capacity(targets.len());
        for rowid in &targets {
            let mut row = t.rows[rowid].clone();
            for (field, cell) in values.iter() {
                row.set(field, cell.clone());
            }
            updated.push(row);
        }

        let refs: Vec<&Row> = updated.iter().collect();
        t.check_unique(&refs, &targets)?;

        for (rowid, row) in targets.iter().zip(updated) {
            t.rows.insert(*rowid, row);
        }
        Ok(targets.len())
    }

    fn delete(&self, table: &str, conditions: &Conditions) -> Result<usize, StorageError> {
        let mut tables = self.tables.write();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        t.check_conditions(conditions)?;

        let before = t.rows.len();
        t.rows.retain(|_, r| !conditions.matches(r));
        Ok(before - t.rows.len())
    }

    fn insert_or_get_id(
        &self,
        table: &str,
        row: Row,
        key: &Conditions,
        id_field: &'static str,
    ) -> Result<InsertOutcome, StorageError> {
        let mut tables = self.tables.write();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        t.check_fields(&row)?;
        t.check_conditions(key)?;

        if let Some(existing) = t.rows.values().find(|r| key.matches(r)) {
            let id = existing.id(id_field)?.ok_or_else(|| {
                StorageError::Corrupt(format!("row in '{table}' has no {id_field}"))
            })?;
            return Ok(InsertOutcome::Existing(id.get()));
        }

        let (row, id) = t.assign_auto(row)?;
        t.check_unique(&[&row], &[])?;
        t.commit_auto(id);
        t.push(row);
        Ok(InsertOutcome::Inserted(id))
    }
}
