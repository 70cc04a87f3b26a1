//! Surrogate ID management.
//!
//! - [`EntityIdManager`]: allocation and lookup façade
//! - [`EntityIdFinder`] / [`IdEntityFinder`]: key to ID and back
//! - [`RedirectStore`]: the cached redirect relation
//! - [`AuxiliaryFields`]: sequence and count maps per entity
//! - [`ResultIterator`]: restartable sweeps over the ID table

mod duplicates;
mod finder;
mod manager;
mod record;
mod redirect;
mod result_iterator;
mod sequence_map;

pub use duplicates::{DuplicateEntity, DuplicateFinder, DuplicateId, DuplicateReport, DuplicateRow};
pub use finder::{EntityIdFinder, IdEntityFinder};
pub use manager::EntityIdManager;
pub use record::{key_conditions, key_from_row, IdRecord, TableHashes, RECORD_FIELDS};
pub use redirect::RedirectStore;
pub use result_iterator::ResultIterator;
pub use sequence_map::{AuxiliaryFields, CountMap, FieldMaps, SequenceMap};
