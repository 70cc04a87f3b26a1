//! Table layouts.
//!
//! Property tables are described by [`PropertyTableDefinition`]s collected in
//! a [`TableRegistry`]; the auxiliary tables (ID table, statistics, redirect,
//! query links, fulltext, concept cache) have fixed layouts defined here.
//! [`install`] creates all of them on a fresh backend.

mod kind;
mod registry;
mod table;

pub use kind::DataItemKind;
pub use registry::{fixed_table_name, TableRegistry};
pub use table::PropertyTableDefinition;

use crate::storage::{Connection, StorageError, TableSchema};

/// Entity ID table.
pub const ID_TABLE: &str = "smw_object_ids";
/// Per-entity auxiliary maps (sequence and count maps).
pub const AUX_TABLE: &str = "smw_object_aux";
/// Property usage statistics.
pub const STATS_TABLE: &str = "smw_prop_stats";
/// Query dependency links.
pub const QUERY_LINKS_TABLE: &str = "smw_query_links";
/// Fulltext search rows.
pub const FT_SEARCH_TABLE: &str = "smw_ft_search";
/// Materialized concept members.
pub const CONCEPT_CACHE_TABLE: &str = "smw_concept_cache";

/// Column names.
pub mod field {
    pub const SMW_ID: &str = "smw_id";
    pub const SMW_TITLE: &str = "smw_title";
    pub const SMW_NAMESPACE: &str = "smw_namespace";
    pub const SMW_IW: &str = "smw_iw";
    pub const SMW_SUBOBJECT: &str = "smw_subobject";
    pub const SMW_SORTKEY: &str = "smw_sortkey";
    pub const SMW_SORT: &str = "smw_sort";
    pub const SMW_HASH: &str = "smw_hash";
    pub const SMW_PROPTABLE_HASH: &str = "smw_proptable_hash";
    pub const SMW_REV: &str = "smw_rev";
    pub const SMW_TOUCHED: &str = "smw_touched";

    pub const SMW_SEQMAP: &str = "smw_seqmap";
    pub const SMW_COUNTMAP: &str = "smw_countmap";

    pub const S_ID: &str = "s_id";
    pub const P_ID: &str = "p_id";
    pub const O_ID: &str = "o_id";
    pub const S_TITLE: &str = "s_title";
    pub const S_NAMESPACE: &str = "s_namespace";

    pub const O_SERIALIZED: &str = "o_serialized";
    pub const O_SORTKEY: &str = "o_sortkey";
    pub const O_BLOB: &str = "o_blob";
    pub const O_HASH: &str = "o_hash";
    pub const O_VALUE: &str = "o_value";
    pub const O_LAT: &str = "o_lat";
    pub const O_LON: &str = "o_lon";
    pub const O_TEXT: &str = "o_text";
    pub const O_SORT: &str = "o_sort";

    pub const CONCEPT_TXT: &str = "concept_txt";
    pub const CONCEPT_DOCU: &str = "concept_docu";
    pub const CONCEPT_FEATURES: &str = "concept_features";
    pub const CONCEPT_SIZE: &str = "concept_size";
    pub const CONCEPT_DEPTH: &str = "concept_depth";
    pub const CACHE_DATE: &str = "cache_date";
    pub const CACHE_COUNT: &str = "cache_count";

    pub const USAGE_COUNT: &str = "usage_count";
    pub const NULL_COUNT: &str = "null_count";
}

/// Layout of the ID table.
///
/// With `unique_keys` the composite key is protected by a unique constraint,
/// which is what makes the insert-or-get allocation race-free.
#[must_use]
pub fn id_table_schema(unique_keys: bool, first_id: u32) -> TableSchema {
    let schema = TableSchema::new(
        ID_TABLE,
        &[
            field::SMW_ID,
            field::SMW_TITLE,
            field::SMW_NAMESPACE,
            field::SMW_IW,
            field::SMW_SUBOBJECT,
            field::SMW_SORTKEY,
            field::SMW_SORT,
            field::SMW_HASH,
            field::SMW_PROPTABLE_HASH,
            field::SMW_REV,
            field::SMW_TOUCHED,
        ],
    )
    .unique(&[field::SMW_ID])
    .auto_increment(field::SMW_ID, first_id);

    if unique_keys {
        schema.unique(&[
            field::SMW_TITLE,
            field::SMW_NAMESPACE,
            field::SMW_IW,
            field::SMW_SUBOBJECT,
        ])
    } else {
        schema
    }
}

fn auxiliary_schemas() -> Vec<TableSchema> {
    vec![
        TableSchema::new(AUX_TABLE, &[field::SMW_ID, field::SMW_SEQMAP, field::SMW_COUNTMAP])
            .unique(&[field::SMW_ID]),
        TableSchema::new(STATS_TABLE, &[field::P_ID, field::USAGE_COUNT, field::NULL_COUNT])
            .unique(&[field::P_ID]),
        TableSchema::new(QUERY_LINKS_TABLE, &[field::S_ID, field::O_ID])
            .unique(&[field::S_ID, field::O_ID]),
        TableSchema::new(
            FT_SEARCH_TABLE,
            &[field::S_ID, field::P_ID, field::O_TEXT, field::O_SORT],
        ),
        TableSchema::new(CONCEPT_CACHE_TABLE, &[field::S_ID, field::O_ID])
            .unique(&[field::S_ID, field::O_ID]),
    ]
}

/// Creates every table on `conn`. Existing tables are left untouched.
///
/// # Errors
/// Propagates backend failures.
pub fn install(
    conn: &dyn Connection,
    registry: &TableRegistry,
    unique_keys: bool,
    first_id: u32,
) -> Result<(), StorageError> {
    conn.create_table(id_table_schema(unique_keys, first_id))?;
    for schema in auxiliary_schemas() {
        conn.create_table(schema)?;
    }
    for def in registry.tables() {
        conn.create_table(def.schema())?;
    }
    tracing::info!(
        target: "semstore::schema",
        property_tables = registry.len(),
        "schema installed"
    );
    Ok(())
}
