//! Storage seam for semstore.
//!
//! The [`Connection`] trait is the only way the store reaches its relational
//! backend. [`InMemoryConnection`] is the bundled reference backend and
//! [`TransactionContext`] is the unit of work shared by all writers.

mod memory;
mod traits;
mod transaction;

pub use memory::InMemoryConnection;
pub use traits::{
    AutoIncrement, Cell, Condition, Conditions, Connection, InsertOutcome, Row, SelectOptions,
    StorageError, TableSchema,
};
pub use transaction::{Deferral, TransactionContext};
