//! Duplicate detection for maintenance.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::entity::{EntityId, EntityKey};
use crate::error::StoreResult;
use crate::schema::{field, DataItemKind, TableRegistry, ID_TABLE};
use crate::storage::{Conditions, Connection, Row, SelectOptions};

use super::record::key_from_row;

/// One ID sharing a duplicated composite key, with the references that help
/// decide which copy to keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateId {
    pub id: EntityId,
    /// Redirect entries pointing at this ID.
    pub redirect_references: usize,
    /// Rows of the shared wikipage table using this ID as subject or object.
    pub wikipage_references: usize,
}

/// A composite key held by more than one ID-table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateEntity {
    pub key: EntityKey,
    pub count: usize,
    pub ids: Vec<DuplicateId>,
}

/// A row stored more than once in a property table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateRow {
    pub row: Row,
    pub count: usize,
}

/// Result of [`DuplicateFinder::find_duplicates`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateReport {
    Entities(Vec<DuplicateEntity>),
    Rows(Vec<DuplicateRow>),
}

impl DuplicateReport {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Entities(v) => v.len(),
            Self::Rows(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Groups rows that should be unique.
pub struct DuplicateFinder {
    conn: Arc<dyn Connection>,
    registry: Arc<TableRegistry>,
}

impl DuplicateFinder {
    pub fn new(conn: Arc<dyn Connection>, registry: Arc<TableRegistry>) -> Self {
        Self { conn, registry }
    }

    /// Scans `table` for duplicates. On the ID table rows are grouped by
    /// composite key and every duplicate ID is cross-referenced against the
    /// redirect and wikipage tables; on a property table identical rows are
    /// grouped.
    ///
    /// # Errors
    /// Returns a schema error for unknown tables and propagates storage
    /// failures.
    pub fn find_duplicates(&self, table: &str) -> StoreResult<DuplicateReport> {
        let report = if table == ID_TABLE {
            DuplicateReport::Entities(self.entity_duplicates()?)
        } else {
            let def = self.registry.get(table)?;
            let fields = def.fields();
            let rows = self
                .conn
                .select(def.name(), &Conditions::new(), &SelectOptions::new().fields(&fields))?;
            let mut groups: BTreeMap<Row, usize> = BTreeMap::new();
            for row in rows {
                *groups.entry(row).or_default() += 1;
            }
            DuplicateReport::Rows(
                groups
                    .into_iter()
                    .filter(|(_, count)| *count > 1)
                    .map(|(row, count)| DuplicateRow { row, count })
                    .collect(),
            )
        };

        if !report.is_empty() {
            tracing::warn!(target: "semstore::ids", table, groups = report.len(), "duplicates found");
        }
        Ok(report)
    }

    fn entity_duplicates(&self) -> StoreResult<Vec<DuplicateEntity>> {
        let rows = self.conn.select(
            ID_TABLE,
            &Conditions::new(),
            &SelectOptions::new()
                .fields(&[
                    field::SMW_ID,
                    field::SMW_TITLE,
                    field::SMW_NAMESPACE,
                    field::SMW_IW,
                    field::SMW_SUBOBJECT,
                ])
                .order_by(field::SMW_ID),
        )?;

        let mut groups: BTreeMap<EntityKey, Vec<EntityId>> = BTreeMap::new();
        for row in rows {
            let key = key_from_row(&row)?;
            if let Some(id) = row.id(field::SMW_ID)? {
                groups.entry(key).or_default().push(id);
            }
        }

        let redirect_table = self.registry.redirect_table()?.name().to_string();
        let wikipage_table = DataItemKind::WikiPage.generic_table_name();

        let mut duplicates = Vec::new();
        for (key, ids) in groups.into_iter().filter(|(_, ids)| ids.len() > 1) {
            let mut annotated = Vec::with_capacity(ids.len());
            for id in &ids {
                let redirect_references = self
                    .conn
                    .count(&redirect_table, &Conditions::new().eq(field::O_ID, *id))?;
                let wikipage_references = match wikipage_table {
                    Some(name) => {
                        self.conn.count(name, &Conditions::new().eq(field::S_ID, *id))?
                            + self.conn.count(name, &Conditions::new().eq(field::O_ID, *id))?
                    }
                    None => 0,
                };
                annotated.push(DuplicateId {
                    id: *id,
                    redirect_references,
                    wikipage_references,
                });
            }
            duplicates.push(DuplicateEntity {
                key,
                count: ids.len(),
                ids: annotated,
            });
        }
        Ok(duplicates)
    }
}
