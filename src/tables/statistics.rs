//! Property usage statistics.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::entity::EntityId;
use crate::error::{StoreResult, ValidationError};
use crate::schema::{field, STATS_TABLE};
use crate::storage::{Conditions, Connection, Deferral, Row, SelectOptions, TransactionContext};

/// Usage counter store for properties.
///
/// Counter updates are hot; implementations defer them until no unit of work
/// is open.
pub trait StatisticsStore: Send + Sync {
    /// Adds `deltas` (property ID to signed change) to the usage counters.
    ///
    /// # Errors
    /// Returns [`ValidationError::PropertyStatisticsInvalidArgument`] for
    /// invalid property IDs and propagates storage failures when the update
    /// runs immediately.
    fn add_to_usage_counts(&self, deltas: &BTreeMap<EntityId, i64>) -> StoreResult<Deferral>;

    /// Overwrites the counters of one property.
    ///
    /// # Errors
    /// Rejects invalid IDs and negative counts.
    fn set_usage_count(&self, property_id: EntityId, usage_count: i64, null_count: i64) -> StoreResult<()>;

    /// Current usage count of a property, `None` when never counted.
    ///
    /// # Errors
    /// Propagates storage failures.
    fn get_usage_count(&self, property_id: EntityId) -> StoreResult<Option<u64>>;

    /// Usage counts of several properties; uncounted properties are omitted.
    ///
    /// # Errors
    /// Propagates storage failures.
    fn get_usage_counts(&self, property_ids: &[EntityId]) -> StoreResult<BTreeMap<EntityId, u64>>;

    /// Removes the counters of a property.
    ///
    /// # Errors
    /// Propagates storage failures.
    fn delete_by_id(&self, property_id: EntityId) -> StoreResult<usize>;

    /// Removes every counter.
    ///
    /// # Errors
    /// Propagates storage failures.
    fn reset(&self) -> StoreResult<()>;
}

fn invalid(reason: impl Into<String>) -> ValidationError {
    ValidationError::PropertyStatisticsInvalidArgument { reason: reason.into() }
}

fn check_property_id(id: EntityId) -> Result<(), ValidationError> {
    if id.is_none() {
        return Err(invalid("property id must be a positive integer"));
    }
    Ok(())
}

/// [`StatisticsStore`] over the `smw_prop_stats` table.
#[derive(Clone)]
pub struct PropertyStatisticsTable {
    conn: Arc<dyn Connection>,
    tx: Arc<TransactionContext>,
}

impl PropertyStatisticsTable {
    pub fn new(conn: Arc<dyn Connection>, tx: Arc<TransactionContext>) -> Self {
        Self { conn, tx }
    }

    fn apply_deltas(conn: &dyn Connection, deltas: &BTreeMap<EntityId, i64>) -> StoreResult<()> {
        for (&property_id, &delta) in deltas {
            let key = Conditions::new().eq(field::P_ID, property_id);
            let current = conn.select_row(STATS_TABLE, &key, &[field::USAGE_COUNT])?;
            match current {
                Some(row) => {
                    let count = row.int(field::USAGE_COUNT).unwrap_or(0);
                    let updated = (count + delta).max(0);
                    conn.update(STATS_TABLE, &Row::new().with(field::USAGE_COUNT, updated), &key)?;
                }
                None => {
                    conn.insert(
                        STATS_TABLE,
                        vec![Row::new()
                            .with(field::P_ID, property_id)
                            .with(field::USAGE_COUNT, delta.max(0))
                            .with(field::NULL_COUNT, 0i64)],
                    )?;
                }
            }
        }
        tracing::debug!(target: "semstore::tables", properties = deltas.len(), "usage counts updated");
        Ok(())
    }
}

impl StatisticsStore for PropertyStatisticsTable {
    fn add_to_usage_counts(&self, deltas: &BTreeMap<EntityId, i64>) -> StoreResult<Deferral> {
        for &id in deltas.keys() {
            check_property_id(id)?;
        }
        let deltas: BTreeMap<EntityId, i64> = deltas.iter().filter(|(_, d)| **d != 0).map(|(k, v)| (*k, *v)).collect();
        if deltas.is_empty() {
            return Ok(Deferral::RanNow);
        }
        let conn = Arc::clone(&self.conn);
        self.tx.on_idle_or_rollback("property-statistics", move || {
            Self::apply_deltas(conn.as_ref(), &deltas)
        })
    }

    fn set_usage_count(&self, property_id: EntityId, usage_count: i64, null_count: i64) -> StoreResult<()> {
        check_property_id(property_id)?;
        if usage_count < 0 || null_count < 0 {
            return Err(invalid(format!(
                "counts must not be negative (usage {usage_count}, null {null_count})"
            ))
            .into());
        }
        let key = Conditions::new().eq(field::P_ID, property_id);
        let values = Row::new()
            .with(field::USAGE_COUNT, usage_count)
            .with(field::NULL_COUNT, null_count);
        if self.conn.update(STATS_TABLE, &values, &key)? == 0 {
            self.conn
                .insert(STATS_TABLE, vec![values.with(field::P_ID, property_id)])?;
        }
        Ok(())
    }

    fn get_usage_count(&self, property_id: EntityId) -> StoreResult<Option<u64>> {
        let row = self.conn.select_row(
            STATS_TABLE,
            &Conditions::new().eq(field::P_ID, property_id),
            &[field::USAGE_COUNT],
        )?;
        Ok(row
            .and_then(|r| r.int(field::USAGE_COUNT))
            .map(|c| u64::try_from(c).unwrap_or(0)))
    }

    fn get_usage_counts(&self, property_ids: &[EntityId]) -> StoreResult<BTreeMap<EntityId, u64>> {
        if property_ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let rows = self.conn.select(
            STATS_TABLE,
            &Conditions::new().any_of(field::P_ID, property_ids.iter().copied()),
            &SelectOptions::new().fields(&[field::P_ID, field::USAGE_COUNT]),
        )?;
        let mut counts = BTreeMap::new();
        for row in rows {
            if let (Some(id), Some(count)) = (row.id(field::P_ID)?, row.int(field::USAGE_COUNT)) {
                counts.insert(id, u64::try_from(count).unwrap_or(0));
            }
        }
        Ok(counts)
    }

    fn delete_by_id(&self, property_id: EntityId) -> StoreResult<usize> {
        Ok(self
            .conn
            .delete(STATS_TABLE, &Conditions::new().eq(field::P_ID, property_id))?)
    }

    fn reset(&self) -> StoreResult<()> {
        self.conn.delete(STATS_TABLE, &Conditions::new())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{install, TableRegistry};
    use crate::storage::InMemoryConnection;

    fn stats() -> (Arc<TransactionContext>, PropertyStatisticsTable) {
        let conn: Arc<dyn Connection> = Arc::new(InMemoryConnection::new());
        install(conn.as_ref(), &TableRegistry::new(&[]).unwrap(), true, 500).unwrap();
        let tx = Arc::new(TransactionContext::new());
        (Arc::clone(&tx), PropertyStatisticsTable::new(conn, tx))
    }

    fn deltas(pairs: &[(u32, i64)]) -> BTreeMap<EntityId, i64> {
        pairs.iter().map(|(id, d)| (EntityId::new(*id), *d)).collect()
    }

    #[test]
    fn test_counts_accumulate_and_floor_at_zero() {
        let (_, stats) = stats();
        assert_eq!(stats.add_to_usage_counts(&deltas(&[(600, 3)])).unwrap(), Deferral::RanNow);
        stats.add_to_usage_counts(&deltas(&[(600, -1), (601, 2)])).unwrap();
        assert_eq!(stats.get_usage_count(EntityId::new(600)).unwrap(), Some(2));
        assert_eq!(stats.get_usage_count(EntityId::new(601)).unwrap(), Some(2));

        stats.add_to_usage_counts(&deltas(&[(600, -5)])).unwrap();
        assert_eq!(stats.get_usage_count(EntityId::new(600)).unwrap(), Some(0));
        assert_eq!(stats.get_usage_count(EntityId::new(602)).unwrap(), None);
    }

    #[test]
    fn test_update_waits_for_idle() {
        let (tx, stats) = stats();
        tx.begin_section("semstore.update");
        assert_eq!(stats.add_to_usage_counts(&deltas(&[(600, 1)])).unwrap(), Deferral::Deferred);
        assert_eq!(stats.get_usage_count(EntityId::new(600)).unwrap(), None);
        tx.end_section("semstore.update").unwrap();
        assert_eq!(stats.get_usage_count(EntityId::new(600)).unwrap(), Some(1));
    }

    #[test]
    fn test_deferred_deltas_survive_rollback() {
        let (tx, stats) = stats();
        tx.begin_section("semstore.store");
        stats.add_to_usage_counts(&deltas(&[(600, 2)])).unwrap();
        tx.rollback_section("semstore.store");
        assert_eq!(stats.get_usage_count(EntityId::new(600)).unwrap(), Some(2));
        assert_eq!(tx.pending(), 0);
    }

    #[test]
    fn test_invalid_arguments() {
        let (_, stats) = stats();
        let err = stats.add_to_usage_counts(&deltas(&[(0, 1)])).unwrap_err();
        assert!(err.is_validation());
        assert!(stats.set_usage_count(EntityId::new(600), -1, 0).unwrap_err().is_validation());
    }

    #[test]
    fn test_set_and_batch_get() {
        let (_, stats) = stats();
        stats.set_usage_count(EntityId::new(600), 10, 1).unwrap();
        stats.set_usage_count(EntityId::new(600), 12, 1).unwrap();
        stats.set_usage_count(EntityId::new(601), 4, 0).unwrap();
        let counts = stats.get_usage_counts(&[EntityId::new(600), EntityId::new(601), EntityId::new(602)]).unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[&EntityId::new(600)], 12);

        assert_eq!(stats.delete_by_id(EntityId::new(600)).unwrap(), 1);
        stats.reset().unwrap();
        assert!(stats.get_usage_counts(&[EntityId::new(601)]).unwrap().is_empty());
    }
}
