//! Property-table update pipeline.
//!
//! [`RowMapper`] turns semantic data into rows, [`RowDiffer`] compares them
//! with storage into a [`ChangeOp`], and [`PropertyTableUpdater`] applies
//! it. [`IdReferenceFinder`] and [`IdReferenceDisposer`] collect IDs nothing
//! refers to any more.

mod change_op;
mod listener;
mod query_links;
mod reference_disposer;
mod reference_finder;
mod row_differ;
mod row_mapper;
mod statistics;
mod text_index;
mod updater;

pub use change_op::{table_hash, ChangeOp, FixedPropertyRecord, TextItem};
pub use listener::{CallbackListener, PropertyChangeEvent, PropertyChangeListener, RecordingListener};
pub use query_links::QueryLinksStore;
pub use reference_disposer::{DisposalOutcome, IdReferenceDisposer};
pub use reference_finder::{IdReferenceFinder, Reference};
pub use row_differ::{DiffMode, RowDiffer};
pub use row_mapper::{MappedRows, RowMapper};
pub use statistics::{PropertyStatisticsTable, StatisticsStore};
pub use text_index::FulltextIndex;
pub use updater::{PropertyTableUpdater, UpdateSummary, UPDATE_SECTION};
