//! Application of a [`ChangeOp`] to the property tables.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::entity::EntityId;
use crate::error::{SchemaError, StoreResult};
use crate::ids::EntityIdManager;
use crate::property::Property;
use crate::schema::{field, PropertyTableDefinition, TableRegistry};
use crate::storage::{Conditions, Connection, Deferral, Row, TransactionContext};

use super::change_op::ChangeOp;
use super::listener::{PropertyChangeEvent, PropertyChangeListener};
use super::statistics::StatisticsStore;

/// Section name wrapping every table update.
pub const UPDATE_SECTION: &str = "semstore.update";

/// What [`PropertyTableUpdater::apply`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSummary {
    pub subject_id: EntityId,
    pub inserted: usize,
    pub deleted: usize,
    pub tables: Vec<String>,
    /// Net row change per property ID.
    pub usage_deltas: BTreeMap<EntityId, i64>,
    /// Properties whose rows changed, sorted.
    pub changed_properties: Vec<EntityId>,
    /// Sorted IDs whose `touched` timestamp was refreshed.
    pub touched: Vec<EntityId>,
    /// Whether the statistics update ran or waits for the section to end.
    pub statistics: Deferral,
}

/// Writes row deltas, table hashes, timestamps and usage counts.
pub struct PropertyTableUpdater {
    conn: Arc<dyn Connection>,
    registry: Arc<TableRegistry>,
    ids: Arc<EntityIdManager>,
    statistics: Arc<dyn StatisticsStore>,
    tx: Arc<TransactionContext>,
    listeners: RwLock<Vec<Arc<dyn PropertyChangeListener>>>,
}

impl PropertyTableUpdater {
    pub fn new(
        conn: Arc<dyn Connection>,
        registry: Arc<TableRegistry>,
        ids: Arc<EntityIdManager>,
        statistics: Arc<dyn StatisticsStore>,
        tx: Arc<TransactionContext>,
    ) -> Self {
        Self {
            conn,
            registry,
            ids,
            statistics,
            tx,
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Registers a listener notified after every successful update that
    /// changed rows.
    pub fn add_listener(&self, listener: Arc<dyn PropertyChangeListener>) {
        self.listeners.write().push(listener);
    }

    /// Applies `op` inside the [`UPDATE_SECTION`] section.
    ///
    /// Per table the delete set is removed before the insert set is written.
    /// Afterwards the new table hashes are persisted, every participating ID
    /// is touched in one batch and the usage deltas go to the statistics
    /// store, which runs them once the section closes.
    ///
    /// # Errors
    /// Returns [`SchemaError::TableMissingIdField`] when an insert row lacks
    /// `s_id`, and propagates storage failures. On error the section is
    /// rolled back and its deferred work is discarded.
    pub fn apply(&self, op: &ChangeOp) -> StoreResult<UpdateSummary> {
        self.tx.begin_section(UPDATE_SECTION);
        let summary = match self.apply_in_section(op) {
            Ok(summary) => summary,
            Err(e) => {
                self.tx.rollback_section(UPDATE_SECTION);
                tracing::warn!(target: "semstore::tables", subject_id = %op.subject_id(), error = %e, "update failed");
                return Err(e);
            }
        };
        self.tx.end_section(UPDATE_SECTION)?;

        if !summary.changed_properties.is_empty() {
            let event = PropertyChangeEvent {
                subject_id: summary.subject_id,
                property_ids: summary.changed_properties.clone(),
            };
            for listener in self.listeners.read().iter() {
                listener.on_change(&event);
            }
        }
        Ok(summary)
    }

    fn apply_in_section(&self, op: &ChangeOp) -> StoreResult<UpdateSummary> {
        let mut usage_deltas: BTreeMap<EntityId, i64> = BTreeMap::new();
        let mut changed_properties = BTreeSet::new();

        for table in op.changed_tables() {
            let def = self.registry.get(table)?;
            let deletes = op.delete_rows().get(table).map_or(&[][..], Vec::as_slice);
            let inserts = op.insert_rows().get(table).map_or(&[][..], Vec::as_slice);
            if def.uses_id_subject() {
                if inserts.iter().any(|row| row.get(field::S_ID).map_or(true, |c| c.is_null())) {
                    return Err(SchemaError::TableMissingIdField {
                        table: table.to_string(),
                        field: field::S_ID,
                    }
                    .into());
                }
            }

            for row in deletes {
                self.conn.delete(table, &Conditions::matching(row))?;
            }
            if !inserts.is_empty() {
                self.conn.insert(table, inserts.to_vec())?;
            }

            for (rows, sign) in [(deletes, -1i64), (inserts, 1i64)] {
                for row in rows {
                    if let Some(property_id) = self.row_property(op, def, row)? {
                        *usage_deltas.entry(property_id).or_default() += sign;
                        changed_properties.insert(property_id);
                    }
                }
            }
            tracing::debug!(
                target: "semstore::tables",
                table,
                deleted = deletes.len(),
                inserted = inserts.len(),
                "table updated"
            );
        }

        self.ids.set_table_hashes(op.subject_id(), op.new_hashes())?;

        let touched = op.changed_entity_id_summary_list();
        self.ids.touch(&touched)?;

        usage_deltas.retain(|_, delta| *delta != 0);
        let statistics = self.statistics.add_to_usage_counts(&usage_deltas)?;

        Ok(UpdateSummary {
            subject_id: op.subject_id(),
            inserted: op.insert_count(),
            deleted: op.delete_count(),
            tables: op.changed_tables().into_iter().map(str::to_string).collect(),
            usage_deltas,
            changed_properties: changed_properties.into_iter().collect(),
            touched,
            statistics,
        })
    }

    /// Property a row counts toward: its `p_id`, or the property of a fixed
    /// table.
    fn row_property(&self, op: &ChangeOp, def: &PropertyTableDefinition, row: &Row) -> StoreResult<Option<EntityId>> {
        if !def.is_fixed() {
            return Ok(row.id(field::P_ID)?);
        }
        if let Some(record) = op.fixed_property_records().get(def.name()).filter(|r| r.is_known()) {
            return Ok(Some(record.property_id));
        }
        let Some(key) = def.fixed_property() else {
            return Ok(None);
        };
        let id = self.ids.get_property_id(&Property::new(key)?)?;
        Ok((!id.is_none()).then_some(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::IdCacheManager;
    use crate::config::StoreConfig;
    use crate::schema::install;
    use crate::storage::InMemoryConnection;
    use crate::tables::listener::RecordingListener;
    use crate::tables::statistics::PropertyStatisticsTable;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingStatistics {
        calls: Mutex<Vec<BTreeMap<EntityId, i64>>>,
    }

    impl StatisticsStore for RecordingStatistics {
        fn add_to_usage_counts(&self, deltas: &BTreeMap<EntityId, i64>) -> StoreResult<Deferral> {
            self.calls.lock().push(deltas.clone());
            Ok(Deferral::RanNow)
        }
        fn set_usage_count(&self, _: EntityId, _: i64, _: i64) -> StoreResult<()> {
            Ok(())
        }
        fn get_usage_count(&self, _: EntityId) -> StoreResult<Option<u64>> {
            Ok(None)
        }
        fn get_usage_counts(&self, _: &[EntityId]) -> StoreResult<BTreeMap<EntityId, u64>> {
            Ok(BTreeMap::new())
        }
        fn delete_by_id(&self, _: EntityId) -> StoreResult<usize> {
            Ok(0)
        }
        fn reset(&self) -> StoreResult<()> {
            Ok(())
        }
    }

    struct Fixture {
        conn: Arc<dyn Connection>,
        tx: Arc<TransactionContext>,
        ids: Arc<EntityIdManager>,
        registry: Arc<TableRegistry>,
    }

    fn fixture() -> Fixture {
        let config = Arc::new(StoreConfig::default());
        let conn: Arc<dyn Connection> = Arc::new(InMemoryConnection::new());
        let registry = Arc::new(TableRegistry::new(&[]).unwrap());
        install(conn.as_ref(), &registry, true, 500).unwrap();
        let cache = Arc::new(IdCacheManager::new(&config));
        let ids = Arc::new(
            EntityIdManager::new(Arc::clone(&conn), Arc::clone(&registry), config, cache, None).unwrap(),
        );
        Fixture {
            conn,
            tx: Arc::new(TransactionContext::new()),
            ids,
            registry,
        }
    }

    fn updater(f: &Fixture, statistics: Arc<dyn StatisticsStore>) -> PropertyTableUpdater {
        PropertyTableUpdater::new(
            Arc::clone(&f.conn),
            Arc::clone(&f.registry),
            Arc::clone(&f.ids),
            statistics,
            Arc::clone(&f.tx),
        )
    }

    fn wikipage_row(s: u32, p: u32) -> Row {
        Row::new().with(field::S_ID, s).with(field::P_ID, p)
    }

    #[test]
    fn test_usage_deltas_reach_statistics() {
        let f = fixture();
        let stats = Arc::new(RecordingStatistics::default());
        let updater = updater(&f, stats.clone());
        let mut op = ChangeOp::new(EntityId::new(1001));
        op.add_insert_rows("smw_di_wikipage", vec![wikipage_row(1001, 99999)]);
        op.add_delete_rows("smw_di_wikipage", vec![wikipage_row(1001, 99998)]);

        let summary = updater.apply(&op).unwrap();
        let expected: BTreeMap<EntityId, i64> =
            [(EntityId::new(99998), -1), (EntityId::new(99999), 1)].into_iter().collect();
        assert_eq!(stats.calls.lock().as_slice(), &[expected.clone()]);
        assert_eq!(summary.usage_deltas, expected);
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.deleted, 1);
    }

    #[test]
    fn test_delete_before_insert_on_unique_tables() {
        let f = fixture();
        let updater = updater(&f, Arc::new(RecordingStatistics::default()));
        let redirect = Row::new()
            .with(field::S_TITLE, "Foo")
            .with(field::S_NAMESPACE, 0)
            .with(field::O_ID, 700u32);
        f.conn.insert("smw_fpt_redi", vec![redirect.clone()]).unwrap();

        let mut op = ChangeOp::new(EntityId::new(1001));
        op.add_delete_rows("smw_fpt_redi", vec![redirect.clone()]);
        op.add_insert_rows("smw_fpt_redi", vec![redirect.with(field::O_ID, 701u32)]);
        updater.apply(&op).unwrap();

        let rows = f
            .conn
            .select("smw_fpt_redi", &Conditions::new(), &crate::storage::SelectOptions::new())
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id(field::O_ID).unwrap(), Some(EntityId::new(701)));
    }

    #[test]
    fn test_missing_subject_id_is_fatal_and_rolls_back() {
        let f = fixture();
        let updater = updater(&f, Arc::new(RecordingStatistics::default()));
        let mut op = ChangeOp::new(EntityId::new(1001));
        op.add_insert_rows("smw_di_wikipage", vec![Row::new().with(field::P_ID, 600u32)]);

        let err = updater.apply(&op).unwrap_err();
        assert!(err.is_schema());
        assert!(f.tx.is_idle());
    }

    #[test]
    fn test_hashes_statistics_and_listeners() {
        let f = fixture();
        let stats = Arc::new(PropertyStatisticsTable::new(Arc::clone(&f.conn), Arc::clone(&f.tx)));
        let updater = updater(&f, stats.clone());
        let listener = Arc::new(RecordingListener::new());
        updater.add_listener(listener.clone());

        let subject = f.ids.make_id(&crate::entity::EntityKey::new("Berlin", 0), None, true, false).unwrap().id;
        let mut op = ChangeOp::new(subject);
        op.add_insert_rows("smw_fpt_inst", vec![Row::new().with(field::S_ID, subject).with(field::O_ID, 800u32)]);
        op.set_new_hash("smw_fpt_inst", "h1".into());

        let summary = updater.apply(&op).unwrap();
        assert_eq!(summary.statistics, Deferral::Deferred);
        let inst = crate::property::PredefinedProperty::Instance.reserved_id();
        assert_eq!(stats.get_usage_count(inst).unwrap(), Some(1));
        assert_eq!(f.ids.get_table_hashes(subject).unwrap().unwrap()["smw_fpt_inst"], "h1");
        assert_eq!(listener.events()[0].property_ids, vec![inst]);
        assert!(summary.touched.contains(&subject));
    }

    #[test]
    fn test_empty_op_still_persists_hashes() {
        let f = fixture();
        let updater = updater(&f, Arc::new(RecordingStatistics::default()));
        let listener = Arc::new(RecordingListener::new());
        updater.add_listener(listener.clone());
        let subject = f.ids.make_id(&crate::entity::EntityKey::new("Berlin", 0), None, true, false).unwrap().id;

        let summary = updater.apply(&ChangeOp::new(subject)).unwrap();
        assert!(summary.touched.is_empty());
        assert!(listener.is_empty());
        assert_eq!(f.ids.get_table_hashes(subject).unwrap(), Some(BTreeMap::new()));
    }
}
