//! Abstract storage traits for semstore.
//!
//! The store talks to its relational backend exclusively through the
//! [`Connection`] trait. Rows are ordered maps from static field names to
//! typed [`Cell`]s; filters are conjunctions of simple [`Condition`]s.
//! By using a trait, we enable:
//! - An in-memory backend for tests and embedded use
//! - SQL backends supplied by the host application

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use thiserror::Error;

use crate::entity::EntityId;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A unique constraint rejected the write.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// The table was never created.
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// The row or condition names a field the table does not have.
    #[error("Unknown field '{field}' in table '{table}'")]
    UnknownField {
        table: String,
        field: String,
    },

    /// The backend cannot perform the requested operation.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Stored data could not be decoded.
    #[error("Corrupt data: {0}")]
    Corrupt(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Connection failed.
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

/// A single typed column value.
///
/// Floats compare by total order so that rows can live in ordered sets.
#[derive(Debug, Clone, Default)]
pub enum Cell {
    #[default]
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl Cell {
    const fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) => 2,
            Self::Float(_) => 3,
            Self::Text(_) => 4,
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            #[allow(clippy::cast_precision_loss)]
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Interprets the cell as a surrogate ID.
    #[must_use]
    pub fn as_id(&self) -> Option<EntityId> {
        self.as_int()
            .and_then(|v| u32::try_from(v).ok())
            .map(EntityId::new)
    }

    fn write_canonical(&self, hasher: &mut blake3::Hasher) {
        hasher.update(&[self.rank()]);
        match self {
            Self::Null => {}
            Self::Int(v) => {
                hasher.update(&v.to_le_bytes());
            }
            Self::Float(v) => {
                hasher.update(&v.to_bits().to_le_bytes());
            }
            Self::Text(v) => {
                hasher.update(&(v.len() as u64).to_le_bytes());
                hasher.update(v.as_bytes());
            }
            Self::Bool(v) => {
                hasher.update(&[u8::from(*v)]);
            }
        }
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Cell {}

impl PartialOrd for Cell {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cell {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Cell {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Self::Null => {}
            Self::Int(v) => v.hash(state),
            Self::Float(v) => v.to_bits().hash(state),
            Self::Text(v) => v.hash(state),
            Self::Bool(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "'{v}'"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Cell {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for Cell {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Cell {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for Cell {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<EntityId> for Cell {
    fn from(id: EntityId) -> Self {
        Self::Int(i64::from(id.get()))
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// One table row: field name to value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Row(BTreeMap<&'static str, Cell>);

impl Row {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    #[must_use]
    pub fn with(mut self, field: &'static str, value: impl Into<Cell>) -> Self {
        self.0.insert(field, value.into());
        self
    }

    pub fn set(&mut self, field: &'static str, value: impl Into<Cell>) {
        self.0.insert(field, value.into());
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Cell> {
        self.0.get(field)
    }

    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<Cell> {
        self.0.remove(field)
    }

    /// Reads an ID column; a missing or NULL column is `None`.
    ///
    /// # Errors
    /// Returns [`StorageError::Corrupt`] when the column holds a non-ID value.
    pub fn id(&self, field: &str) -> Result<Option<EntityId>, StorageError> {
        match self.0.get(field) {
            None | Some(Cell::Null) => Ok(None),
            Some(cell) => cell.as_id().map(Some).ok_or_else(|| {
                StorageError::Corrupt(format!("field '{field}' holds {cell}, expected an id"))
            }),
        }
    }

    #[must_use]
    pub fn text(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Cell::as_text)
    }

    #[must_use]
    pub fn int(&self, field: &str) -> Option<i64> {
        self.0.get(field).and_then(Cell::as_int)
    }

    pub fn fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Cell)> {
        self.0.iter().map(|(k, v)| (*k, v))
    }

    /// Keeps only the listed fields.
    #[must_use]
    pub fn project(&self, fields: &[&'static str]) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(k, _)| fields.contains(k))
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
        )
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Feeds the row into a hasher in field order.
    pub fn write_canonical(&self, hasher: &mut blake3::Hasher) {
        for (field, cell) in &self.0 {
            hasher.update(field.as_bytes());
            hasher.update(b"=");
            cell.write_canonical(hasher);
        }
        hasher.update(b";");
    }
}

impl FromIterator<(&'static str, Cell)> for Row {
    fn from_iter<I: IntoIterator<Item = (&'static str, Cell)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A single filter predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(&'static str, Cell),
    Ne(&'static str, Cell),
    In(&'static str, Vec<Cell>),
    NotIn(&'static str, Vec<Cell>),
    Gt(&'static str, Cell),
    Lt(&'static str, Cell),
    IsNull(&'static str),
    NotNull(&'static str),
}

impl Condition {
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::Eq(f, _)
            | Self::Ne(f, _)
            | Self::In(f, _)
            | Self::NotIn(f, _)
            | Self::Gt(f, _)
            | Self::Lt(f, _)
            | Self::IsNull(f)
            | Self::NotNull(f) => f,
        }
    }

    /// Evaluates the predicate; a missing column reads as NULL.
    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        let null = Cell::Null;
        let value = row.get(self.field()).unwrap_or(&null);
        match self {
            Self::Eq(_, v) => value == v,
            Self::Ne(_, v) => value != v,
            Self::In(_, vs) => vs.contains(value),
            Self::NotIn(_, vs) => !vs.contains(value),
            Self::Gt(_, v) => !value.is_null() && value > v,
            Self::Lt(_, v) => !value.is_null() && value < v,
            Self::IsNull(_) => value.is_null(),
            Self::NotNull(_) => !value.is_null(),
        }
    }
}

/// Conjunction of conditions. An empty set matches every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conditions(Vec<Condition>);

impl Conditions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Matches exactly the given row (every field equal).
    #[must_use]
    pub fn matching(row: &Row) -> Self {
        Self(
            row.iter()
                .map(|(field, cell)| Condition::Eq(field, cell.clone()))
                .collect(),
        )
    }

    #[must_use]
    pub fn eq(mut self, field: &'static str, value: impl Into<Cell>) -> Self {
        self.0.push(Condition::Eq(field, value.into()));
        self
    }

    #[must_use]
    pub fn ne(mut self, field: &'static str, value: impl Into<Cell>) -> Self {
        self.0.push(Condition::Ne(field, value.into()));
        self
    }

    #[must_use]
    pub fn any_of<I, V>(mut self, field: &'static str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Cell>,
    {
        self.0
            .push(Condition::In(field, values.into_iter().map(Into::into).collect()));
        self
    }

    #[must_use]
    pub fn none_of<I, V>(mut self, field: &'static str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Cell>,
    {
        self.0
            .push(Condition::NotIn(field, values.into_iter().map(Into::into).collect()));
        self
    }

    #[must_use]
    pub fn gt(mut self, field: &'static str, value: impl Into<Cell>) -> Self {
        self.0.push(Condition::Gt(field, value.into()));
        self
    }

    #[must_use]
    pub fn lt(mut self, field: &'static str, value: impl Into<Cell>) -> Self {
        self.0.push(Condition::Lt(field, value.into()));
        self
    }

    #[must_use]
    pub fn is_null(mut self, field: &'static str) -> Self {
        self.0.push(Condition::IsNull(field));
        self
    }

    #[must_use]
    pub fn not_null(mut self, field: &'static str) -> Self {
        self.0.push(Condition::NotNull(field));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.iter()
    }

    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        self.0.iter().all(|c| c.matches(row))
    }
}

/// Projection, ordering and limit of a select.
#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    /// Fields to return; empty means every field.
    pub fields: Vec<&'static str>,
    pub order_by: Option<&'static str>,
    pub descending: bool,
    pub limit: Option<usize>,
}

impl SelectOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn fields(mut self, fields: &[&'static str]) -> Self {
        self.fields = fields.to_vec();
        self
    }

    #[must_use]
    pub fn order_by(mut self, field: &'static str) -> Self {
        self.order_by = Some(field);
        self.descending = false;
        self
    }

    #[must_use]
    pub fn order_by_desc(mut self, field: &'static str) -> Self {
        self.order_by = Some(field);
        self.descending = true;
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Auto-increment column of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoIncrement {
    pub field: &'static str,
    /// First value handed out.
    pub start: u32,
}

/// Physical description of a table as created in the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub fields: Vec<&'static str>,
    /// Unique constraints; rows with a NULL in a constrained column are exempt.
    pub unique: Vec<Vec<&'static str>>,
    pub auto_increment: Option<AutoIncrement>,
}

impl TableSchema {
    #[must_use]
    pub fn new(name: impl Into<String>, fields: &[&'static str]) -> Self {
        Self {
            name: name.into(),
            fields: fields.to_vec(),
            unique: Vec::new(),
            auto_increment: None,
        }
    }

    #[must_use]
    pub fn unique(mut self, fields: &[&'static str]) -> Self {
        self.unique.push(fields.to_vec());
        self
    }

    #[must_use]
    pub fn auto_increment(mut self, field: &'static str, start: u32) -> Self {
        self.auto_increment = Some(AutoIncrement { field, start });
        self
    }
}

/// Result of [`Connection::insert_or_get_id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new row was written with this ID.
    Inserted(u32),
    /// A row with the same key already existed.
    Existing(u32),
}

impl InsertOutcome {
    #[must_use]
    pub const fn id(self) -> u32 {
        match self {
            Self::Inserted(id) | Self::Existing(id) => id,
        }
    }

    #[must_use]
    pub const fn was_inserted(self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// Storage trait for the relational backend.
///
/// # Safety Considerations
/// - `insert` is all-or-nothing per call
/// - Implementations must be safe to share across threads
pub trait Connection: Send + Sync {
    /// Creates a table; creating an existing table is a no-op.
    fn create_table(&self, schema: TableSchema) -> Result<(), StorageError>;

    /// Returns true if the table exists.
    fn has_table(&self, table: &str) -> bool;

    /// Selects all rows matching `conditions`.
    fn select(
        &self,
        table: &str,
        conditions: &Conditions,
        options: &SelectOptions,
    ) -> Result<Vec<Row>, StorageError>;

    /// Selects the first matching row.
    fn select_row(
        &self,
        table: &str,
        conditions: &Conditions,
        fields: &[&'static str],
    ) -> Result<Option<Row>, StorageError> {
        let options = SelectOptions::new().fields(fields).limit(1);
        Ok(self.select(table, conditions, &options)?.into_iter().next())
    }

    /// Counts matching rows.
    fn count(&self, table: &str, conditions: &Conditions) -> Result<usize, StorageError>;

    /// Inserts rows. Fails with [`StorageError::DuplicateKey`] on a unique
    /// constraint violation, in which case nothing is written.
    fn insert(&self, table: &str, rows: Vec<Row>) -> Result<(), StorageError>;

    /// Inserts one row into a table with an auto-increment column and returns
    /// its ID. A row that already carries a value for that column keeps it.
    fn insert_returning_id(&self, table: &str, row: Row) -> Result<u32, StorageError>;

    /// Updates matching rows with `values`; returns the number of rows changed.
    fn update(&self, table: &str, values: &Row, conditions: &Conditions)
        -> Result<usize, StorageError>;

    /// Deletes matching rows; returns the number of rows removed.
    fn delete(&self, table: &str, conditions: &Conditions) -> Result<usize, StorageError>;

    /// Atomically inserts `row` unless a row matching `key` exists, returning
    /// the ID held in `id_field` either way.
    ///
    /// The default implementation is the fallback for backends without an
    /// upsert: attempt the insert and, on a duplicate-key conflict, re-select
    /// the row once.
    fn insert_or_get_id(
        &self,
        table: &str,
        row: Row,
        key: &Conditions,
        id_field: &'static str,
    ) -> Result<InsertOutcome, StorageError> {
        match self.insert_returning_id(table, row) {
            Ok(id) => Ok(InsertOutcome::Inserted(id)),
            Err(StorageError::DuplicateKey(detail)) => {
                tracing::warn!(
                    target: "semstore::storage",
                    table,
                    detail = %detail,
                    "insert raced with a concurrent writer, re-selecting"
                );
                let existing = self.select_row(table, key, &[id_field])?;
                existing
                    .as_ref()
                    .and_then(|r| r.get(id_field))
                    .and_then(Cell::as_id)
                    .map(|id| InsertOutcome::Existing(id.get()))
                    .ok_or_else(|| StorageError::DuplicateKey(detail))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure the trait is object-safe
    fn _assert_connection_object_safe(_: &dyn Connection) {}

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::TableNotFound("smw_di_blob".to_string());
        assert!(err.to_string().contains("smw_di_blob"));

        let err = StorageError::BackendError("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_cell_total_order() {
        assert_eq!(Cell::Float(f64::NAN), Cell::Float(f64::NAN));
        assert!(Cell::Null < Cell::Int(0));
        assert!(Cell::Int(1) < Cell::Int(2));
        assert_ne!(Cell::Int(1), Cell::Float(1.0));
    }

    #[test]
    fn test_row_id_decoding() {
        let row = Row::new().with("s_id", EntityId::new(7)).with("o_blob", "x");
        assert_eq!(row.id("s_id").unwrap(), Some(EntityId::new(7)));
        assert_eq!(row.id("p_id").unwrap(), None);
        assert!(row.id("o_blob").is_err());
    }

    #[test]
    fn test_conditions_matching() {
        let row = Row::new().with("s_id", 5u32).with("p_id", 9u32);
        assert!(Conditions::matching(&row).matches(&row));
        assert!(Conditions::new().eq("s_id", 5u32).matches(&row));
        assert!(!Conditions::new().eq("s_id", 6u32).matches(&row));
        assert!(Conditions::new().any_of("p_id", [8u32, 9u32]).matches(&row));
        assert!(Conditions::new().none_of("p_id", [1u32]).matches(&row));
        assert!(Conditions::new().gt("s_id", 4u32).lt("s_id", 6u32).matches(&row));
        assert!(Conditions::new().is_null("o_id").matches(&row));
        assert!(!Conditions::new().not_null("o_id").matches(&row));
    }

    #[test]
    fn test_row_projection() {
        let row = Row::new().with("a", 1i64).with("b", 2i64).with("c", 3i64);
        let projected = row.project(&["a", "c"]);
        assert_eq!(projected.len(), 2);
        assert!(!projected.contains("b"));
    }
}
