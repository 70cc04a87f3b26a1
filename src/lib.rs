//! # semstore - Entity IDs and Differential Property Tables
//!
//! semstore keeps the relational storage of a semantic wiki in sync with the
//! annotations of its pages. Every page, subobject and property gets a stable
//! integer ID; annotations live in per-type property tables; each save
//! rewrites only the rows that actually changed.
//!
//! ## Core Concepts
//!
//! - **EntityKey / EntityId**: the identity of a page or subobject and its
//!   stable integer handle
//! - **SemanticData**: the annotations of one subject, as produced by a parser
//! - **ChangeOp**: the row-level difference between stored and new data
//! - **Outdated entities**: IDs retired by deletes and moves, disposed once
//!   nothing references them
//! - **Concepts**: stored queries with a cached member list
//!
//! ## Usage
//!
//! ```rust
//! use semstore::{namespace, EntityKey, Property, SemanticData, SemanticStore, StoreConfig};
//!
//! let store = SemanticStore::in_memory(StoreConfig::default())?;
//!
//! let data = SemanticData::new(EntityKey::new("Berlin", namespace::MAIN))
//!     .with_value(Property::new("Population")?, 3.6);
//! let report = store.update_data(&data)?;
//! assert_eq!(report.subject_id.get(), 500);
//!
//! // Saving the same data again writes nothing.
//! let again = store.update_data(&data)?;
//! assert_eq!(again.summaries[0].inserted + again.summaries[0].deleted, 0);
//! # Ok::<(), semstore::StoreError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod config;
pub mod entity;
pub mod error;
pub mod property;
pub mod semantic_data;
pub mod value;

// Storage and schema
pub mod cache;
pub mod schema;
pub mod storage;

// ID management and the update pipeline
pub mod concept;
pub mod ids;
pub mod jobs;
pub mod store;
pub mod tables;

// Re-export primary types at crate root for convenience
pub use config::{FixedPropertyConfig, StoreConfig};
pub use entity::{interwiki, namespace, EntityId, EntityKey, Namespace};
pub use error::{ConceptError, SchemaError, StoreError, StoreResult, ValidationError};
pub use property::{PredefinedProperty, Property};
pub use schema::DataItemKind;
pub use semantic_data::SemanticData;
pub use value::DataItem;

pub use ids::{EntityIdManager, IdRecord, TableHashes};
pub use jobs::{ChannelJobQueue, Dispatch, Job, JobKind, JobQueue};
pub use storage::{Connection, InMemoryConnection, StorageError};
pub use store::{DeleteReport, MoveReport, SemanticStore, StoreBuilder, UpdateReport};
pub use tables::{ChangeOp, DiffMode, DisposalOutcome, PropertyChangeListener, UpdateSummary};
