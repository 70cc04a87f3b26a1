//! The per-update diff artifact.

use std::collections::{BTreeMap, BTreeSet};

use crate::entity::EntityId;
use crate::ids::TableHashes;
use crate::schema::field;
use crate::storage::Row;

/// Canonical hash of a table's rows for one subject. Row order is
/// irrelevant; the hash of an empty set is never stored.
#[must_use]
pub fn table_hash<'a>(rows: impl IntoIterator<Item = &'a Row>) -> String {
    let sorted: BTreeSet<&Row> = rows.into_iter().collect();
    let mut hasher = blake3::Hasher::new();
    for row in sorted {
        row.write_canonical(&mut hasher);
    }
    hasher.finalize().to_hex().to_string()
}

/// Resolution of a fixed table's property during one update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedPropertyRecord {
    pub table: String,
    pub property_key: String,
    /// [`EntityId::NONE`] when the property is unknown; its rows were dropped.
    pub property_id: EntityId,
}

impl FixedPropertyRecord {
    #[must_use]
    pub const fn is_known(&self) -> bool {
        !self.property_id.is_none()
    }
}

/// Text of one value, queued for the fulltext index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TextItem {
    pub property_id: EntityId,
    pub text: String,
}

/// Row inserts, row deletes and new table hashes for one subject.
///
/// Created fresh per update, consumed once by the updater.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeOp {
    subject_id: EntityId,
    insert_rows: BTreeMap<String, Vec<Row>>,
    delete_rows: BTreeMap<String, Vec<Row>>,
    new_hashes: TableHashes,
    fixed_property_records: BTreeMap<String, FixedPropertyRecord>,
    text_items: Vec<TextItem>,
}

impl ChangeOp {
    #[must_use]
    pub fn new(subject_id: EntityId) -> Self {
        Self {
            subject_id,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn subject_id(&self) -> EntityId {
        self.subject_id
    }

    pub fn add_insert_rows(&mut self, table: &str, rows: Vec<Row>) {
        if !rows.is_empty() {
            self.insert_rows.entry(table.to_string()).or_default().extend(rows);
        }
    }

    pub fn add_delete_rows(&mut self, table: &str, rows: Vec<Row>) {
        if !rows.is_empty() {
            self.delete_rows.entry(table.to_string()).or_default().extend(rows);
        }
    }

    pub fn set_new_hash(&mut self, table: &str, hash: String) {
        self.new_hashes.insert(table.to_string(), hash);
    }

    pub fn add_fixed_property_record(&mut self, record: FixedPropertyRecord) {
        self.fixed_property_records.insert(record.table.clone(), record);
    }

    pub fn set_text_items(&mut self, items: Vec<TextItem>) {
        self.text_items = items;
    }

    #[must_use]
    pub const fn insert_rows(&self) -> &BTreeMap<String, Vec<Row>> {
        &self.insert_rows
    }

    #[must_use]
    pub const fn delete_rows(&self) -> &BTreeMap<String, Vec<Row>> {
        &self.delete_rows
    }

    #[must_use]
    pub const fn new_hashes(&self) -> &TableHashes {
        &self.new_hashes
    }

    #[must_use]
    pub const fn fixed_property_records(&self) -> &BTreeMap<String, FixedPropertyRecord> {
        &self.fixed_property_records
    }

    #[must_use]
    pub fn text_items(&self) -> &[TextItem] {
        &self.text_items
    }

    /// Tables with at least one insert or delete, in name order.
    #[must_use]
    pub fn changed_tables(&self) -> BTreeSet<&str> {
        self.insert_rows
            .keys()
            .chain(self.delete_rows.keys())
            .map(String::as_str)
            .collect()
    }

    /// True when no row is inserted or deleted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.insert_rows.is_empty() && self.delete_rows.is_empty()
    }

    #[must_use]
    pub fn insert_count(&self) -> usize {
        self.insert_rows.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn delete_count(&self) -> usize {
        self.delete_rows.values().map(Vec::len).sum()
    }

    /// Every ID that participates in the change: the subject, all IDs held
    /// by inserted or deleted rows, and the properties of changed fixed
    /// tables. Sorted and free of duplicates.
    #[must_use]
    pub fn changed_entity_id_summary_list(&self) -> Vec<EntityId> {
        let mut ids = BTreeSet::new();
        if !self.is_empty() {
            ids.insert(self.subject_id);
        }
        for (table, rows) in self.insert_rows.iter().chain(&self.delete_rows) {
            if let Some(record) = self.fixed_property_records.get(table) {
                if record.is_known() {
                    ids.insert(record.property_id);
                }
            }
            for row in rows {
                for column in [field::S_ID, field::P_ID, field::O_ID] {
                    if let Some(id) = row.get(column).and_then(crate::storage::Cell::as_id) {
                        ids.insert(id);
                    }
                }
            }
        }
        ids.remove(&EntityId::NONE);
        ids.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(s: u32, p: u32, o: u32) -> Row {
        Row::new().with(field::S_ID, s).with(field::P_ID, p).with(field::O_ID, o)
    }

    #[test]
    fn test_table_hash_ignores_order() {
        let a = row(1, 2, 3);
        let b = row(1, 2, 4);
        assert_eq!(table_hash([&a, &b]), table_hash([&b, &a]));
        assert_ne!(table_hash([&a]), table_hash([&a, &b]));
    }

    #[test]
    fn test_empty_rows_are_not_recorded() {
        let mut op = ChangeOp::new(EntityId::new(1));
        op.add_insert_rows("smw_di_wikipage", Vec::new());
        assert!(op.is_empty());
        assert!(op.insert_rows().is_empty());
    }

    #[test]
    fn test_summary_list() {
        let mut op = ChangeOp::new(EntityId::new(1001));
        op.add_insert_rows("smw_di_wikipage", vec![row(1001, 600, 700)]);
        op.add_delete_rows("smw_di_wikipage", vec![row(1001, 600, 701)]);
        op.add_insert_rows("smw_fpt_inst", vec![Row::new().with(field::S_ID, 1001u32).with(field::O_ID, 800u32)]);
        op.add_fixed_property_record(FixedPropertyRecord {
            table: "smw_fpt_inst".into(),
            property_key: "_INST".into(),
            property_id: EntityId::new(4),
        });

        let ids: Vec<u32> = op.changed_entity_id_summary_list().iter().map(|id| id.get()).collect();
        assert_eq!(ids, vec![4, 600, 700, 701, 800, 1001]);
        assert_eq!(op.changed_tables().len(), 2);
        assert_eq!(op.insert_count(), 2);
        assert_eq!(op.delete_count(), 1);
    }

    #[test]
    fn test_unchanged_op_has_empty_summary() {
        let op = ChangeOp::new(EntityId::new(1001));
        assert!(op.changed_entity_id_summary_list().is_empty());
    }
}
