//! Minimal row delta between stored and freshly mapped rows.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::entity::EntityId;
use crate::error::{SchemaError, StoreResult};
use crate::ids::EntityIdManager;
use crate::schema::{field, PropertyTableDefinition, TableRegistry};
use crate::semantic_data::SemanticData;
use crate::storage::{Conditions, Connection, Row, SelectOptions};

use super::change_op::{table_hash, ChangeOp, FixedPropertyRecord};
use super::row_mapper::{MappedRows, RowMapper};

/// How much to trust the stored table hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffMode {
    /// Skip tables whose stored hash equals the new one.
    HashShortcut,
    /// Compare rows of every relevant table.
    Full,
}

/// Computes [`ChangeOp`]s.
pub struct RowDiffer {
    conn: Arc<dyn Connection>,
    registry: Arc<TableRegistry>,
    ids: Arc<EntityIdManager>,
    mapper: RowMapper,
    config: Arc<StoreConfig>,
}

impl RowDiffer {
    pub fn new(
        conn: Arc<dyn Connection>,
        registry: Arc<TableRegistry>,
        ids: Arc<EntityIdManager>,
        config: Arc<StoreConfig>,
    ) -> Self {
        Self {
            mapper: RowMapper::new(Arc::clone(&ids), Arc::clone(&registry)),
            conn,
            registry,
            ids,
            config,
        }
    }

    #[must_use]
    pub const fn mapper(&self) -> &RowMapper {
        &self.mapper
    }

    /// Diffs `data` against the stored rows of `subject_id`.
    ///
    /// Tables whose new row hash equals the stored one are skipped. When
    /// `check_remnant_entities` is set and the subject never recorded any
    /// hashes, every relevant table is reconciled row by row instead.
    ///
    /// # Errors
    /// Returns [`SchemaError::TableMissingIdField`] when a mapped row lacks an
    /// ID column, and propagates storage failures.
    pub fn compute_row_diff(&self, subject_id: EntityId, data: &SemanticData) -> StoreResult<ChangeOp> {
        self.diff(subject_id, data, DiffMode::HashShortcut)
    }

    /// Like [`RowDiffer::compute_row_diff`] but never trusts stored hashes.
    /// Used when a subject is deleted.
    ///
    /// # Errors
    /// See [`RowDiffer::compute_row_diff`].
    pub fn compute_full_diff(&self, subject_id: EntityId, data: &SemanticData) -> StoreResult<ChangeOp> {
        self.diff(subject_id, data, DiffMode::Full)
    }

    /// Diffs with an explicit mode.
    ///
    /// # Errors
    /// See [`RowDiffer::compute_row_diff`].
    pub fn diff(&self, subject_id: EntityId, data: &SemanticData, mode: DiffMode) -> StoreResult<ChangeOp> {
        let mapped = self.mapper.map_to_rows(subject_id, data)?;
        let stored = self.ids.get_table_hashes(subject_id)?;

        let ghost = self.config.check_remnant_entities && stored.is_none();
        if ghost {
            tracing::warn!(
                target: "semstore::tables",
                %subject_id,
                "no table hashes recorded, reconciling every table"
            );
        }
        let full = ghost || mode == DiffMode::Full;
        let stored = stored.unwrap_or_default();

        let mut op = ChangeOp::new(subject_id);
        let MappedRows {
            rows: mut new_rows,
            text_items,
            fixed_properties,
            ..
        } = mapped;
        for record in fixed_properties {
            op.add_fixed_property_record(record);
        }
        op.set_text_items(text_items);

        let namespace = data.subject().namespace;
        for def in self.registry.tables().filter(|d| d.is_relevant_for(namespace)) {
            let rows = new_rows.remove(def.name()).unwrap_or_default();
            Self::check_id_fields(def, &rows)?;

            let new_hash = (!rows.is_empty()).then(|| table_hash(&rows));
            let old_hash = stored.get(def.name());
            if let Some(hash) = &new_hash {
                op.set_new_hash(def.name(), hash.clone());
            }

            if !full && new_hash.as_ref() == old_hash {
                if new_hash.is_some() {
                    tracing::debug!(target: "semstore::tables", table = def.name(), "hash unchanged, table skipped");
                }
                continue;
            }

            let old_rows = self.fetch_rows(def, subject_id)?;
            let old: BTreeSet<&Row> = old_rows.iter().collect();
            let new: BTreeSet<&Row> = rows.iter().collect();
            op.add_insert_rows(def.name(), new.difference(&old).map(|r| (*r).clone()).collect());
            op.add_delete_rows(def.name(), old.difference(&new).map(|r| (*r).clone()).collect());
        }

        for table in stored.keys().filter(|t| self.registry.get(t).is_err()) {
            tracing::warn!(
                target: "semstore::tables",
                %subject_id,
                table = %table,
                "hash recorded for unregistered table, dropped"
            );
            op.add_fixed_property_record(FixedPropertyRecord {
                table: table.clone(),
                property_key: String::new(),
                property_id: EntityId::NONE,
            });
        }

        tracing::debug!(
            target: "semstore::tables",
            %subject_id,
            inserts = op.insert_count(),
            deletes = op.delete_count(),
            "row diff computed"
        );
        Ok(op)
    }

    fn check_id_fields(def: &PropertyTableDefinition, rows: &[Row]) -> Result<(), SchemaError> {
        let id_fields = def.id_fields();
        for row in rows {
            if let Some(missing) = id_fields
                .iter()
                .find(|f| row.get(f).map_or(true, crate::storage::Cell::is_null))
            {
                return Err(SchemaError::TableMissingIdField {
                    table: def.name().to_string(),
                    field: *missing,
                });
            }
        }
        Ok(())
    }

    fn fetch_rows(&self, def: &PropertyTableDefinition, subject_id: EntityId) -> StoreResult<Vec<Row>> {
        let fields = def.fields();
        Ok(self.conn.select(
            def.name(),
            &Conditions::new().eq(field::S_ID, subject_id),
            &SelectOptions::new().fields(&fields),
        )?)
    }
}
