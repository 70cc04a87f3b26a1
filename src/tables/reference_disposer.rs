//! Garbage collection of unreachable surrogate IDs.
//!
//! Cleanup order is fixed: property-table rows and auxiliary indexes go
//! first, the ID-table row last. A crash in between leaves an orphaned but
//! valid ID, never a row pointing at a missing ID. The ID row itself is only
//! deleted while its `smw_id`, `smw_hash` and `smw_iw` still match what was
//! read before the reachability check, so an ID that was re-used in the
//! meantime survives.

use std::sync::Arc;

use crate::config::StoreConfig;
use crate::entity::{interwiki, EntityId, Namespace};
use crate::error::StoreResult;
use crate::ids::{EntityIdManager, ResultIterator};
use crate::schema::{field, TableRegistry, CONCEPT_CACHE_TABLE, ID_TABLE};
use crate::storage::{Conditions, Connection, Deferral, TransactionContext};

use super::query_links::QueryLinksStore;
use super::reference_finder::IdReferenceFinder;
use super::statistics::StatisticsStore;
use super::text_index::FulltextIndex;

/// Result of a disposal attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposalOutcome {
    /// All rows and the ID-table row were removed.
    Disposed,
    /// Rows were removed; the ID row stays as a redirect stub.
    KeptRedirectStub,
    /// Something still references the ID; nothing was touched.
    StillReferenced,
    /// The ID row changed since it was read; it was left in place.
    GuardMismatch,
    /// No ID row exists.
    Missing,
}

/// Identity of an ID row as read before disposal.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RowGuard {
    hash: String,
    interwiki: String,
}

/// Removes every trace of an ID.
#[derive(Clone)]
pub struct IdReferenceDisposer {
    conn: Arc<dyn Connection>,
    registry: Arc<TableRegistry>,
    ids: Arc<EntityIdManager>,
    finder: Arc<IdReferenceFinder>,
    statistics: Arc<dyn StatisticsStore>,
    links: Arc<QueryLinksStore>,
    text: Arc<FulltextIndex>,
    tx: Arc<TransactionContext>,
    config: Arc<StoreConfig>,
}

impl IdReferenceDisposer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conn: Arc<dyn Connection>,
        registry: Arc<TableRegistry>,
        ids: Arc<EntityIdManager>,
        statistics: Arc<dyn StatisticsStore>,
        links: Arc<QueryLinksStore>,
        text: Arc<FulltextIndex>,
        tx: Arc<TransactionContext>,
        config: Arc<StoreConfig>,
    ) -> Self {
        let finder = Arc::new(IdReferenceFinder::new(
            Arc::clone(&conn),
            Arc::clone(&registry),
            Arc::clone(&config),
        ));
        Self {
            conn,
            registry,
            ids,
            finder,
            statistics,
            links,
            text,
            tx,
            config,
        }
    }

    #[must_use]
    pub fn finder(&self) -> &IdReferenceFinder {
        &self.finder
    }

    fn read_guard(&self, id: EntityId) -> StoreResult<Option<RowGuard>> {
        let row = self.conn.select_row(
            ID_TABLE,
            &Conditions::new().eq(field::SMW_ID, id),
            &[field::SMW_HASH, field::SMW_IW],
        )?;
        Ok(row.map(|row| RowGuard {
            hash: row.text(field::SMW_HASH).unwrap_or_default().to_string(),
            interwiki: row.text(field::SMW_IW).unwrap_or_default().to_string(),
        }))
    }

    /// Deletes all rows of `id` without checking reachability. Redirect
    /// stubs keep their ID row.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn cleanup_table_entries_by_id(&self, id: EntityId) -> StoreResult<DisposalOutcome> {
        let guard = self.read_guard(id)?;
        self.cleanup(id, guard.as_ref())
    }

    /// Disposes `id` when nothing references it any more; otherwise a no-op.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn remove_outdated_entity_references_by_id(&self, id: EntityId) -> StoreResult<DisposalOutcome> {
        let Some(guard) = self.read_guard(id)? else {
            return Ok(DisposalOutcome::Missing);
        };
        if self.finder.has_residual_reference_for_id(id)? {
            tracing::debug!(target: "semstore::dispose", %id, "still referenced, disposal skipped");
            return Ok(DisposalOutcome::StillReferenced);
        }
        self.cleanup(id, Some(&guard))
    }

    /// Runs [`IdReferenceDisposer::remove_outdated_entity_references_by_id`]
    /// once no unit of work is open.
    ///
    /// # Errors
    /// Propagates the disposal error when it runs immediately.
    pub fn dispose_when_idle(&self, id: EntityId) -> StoreResult<Deferral> {
        let disposer = self.clone();
        self.tx.on_idle("dispose-entity", move || {
            disposer.remove_outdated_entity_references_by_id(id).map(|_| ())
        })
    }

    /// Lazy sweep over IDs marked outdated.
    #[must_use]
    pub fn outdated_entities(&self) -> ResultIterator {
        ResultIterator::new(
            Arc::clone(&self.conn),
            ID_TABLE,
            field::SMW_ID,
            Conditions::new().eq(field::SMW_IW, interwiki::OUTDATED),
            self.config.iterator_batch_size,
        )
    }

    /// Lazy sweep over IDs living outside `valid` namespaces.
    #[must_use]
    pub fn namespace_invalid_entities(&self, valid: &[Namespace]) -> ResultIterator {
        ResultIterator::new(
            Arc::clone(&self.conn),
            ID_TABLE,
            field::SMW_ID,
            Conditions::new()
                .none_of(field::SMW_NAMESPACE, valid.iter().copied())
                .gt(field::SMW_ID, self.config.fixed_property_id_upper_bound.saturating_sub(1)),
            self.config.iterator_batch_size,
        )
    }

    fn cleanup(&self, id: EntityId, guard: Option<&RowGuard>) -> StoreResult<DisposalOutcome> {
        let mut removed = 0;
        for def in self.registry.tables().filter(|d| d.uses_id_subject()) {
            removed += self.conn.delete(def.name(), &Conditions::new().eq(field::S_ID, id))?;
        }

        removed += self.statistics.delete_by_id(id)?;
        removed += self.links.delete_for(id)?;
        removed += self.text.delete(id)?;
        removed += self.ids.aux().delete(id)?;
        removed += self
            .conn
            .delete(CONCEPT_CACHE_TABLE, &Conditions::new().eq(field::S_ID, id))?;
        removed += self
            .conn
            .delete(CONCEPT_CACHE_TABLE, &Conditions::new().eq(field::O_ID, id))?;

        let Some(guard) = guard else {
            tracing::debug!(target: "semstore::dispose", %id, rows = removed, "no id row, rows cleaned");
            return Ok(DisposalOutcome::Missing);
        };
        if guard.interwiki == interwiki::REDIRECT {
            self.ids.reset_table_hashes(id)?;
            tracing::info!(target: "semstore::dispose", %id, rows = removed, "redirect stub kept");
            return Ok(DisposalOutcome::KeptRedirectStub);
        }

        self.ids.forget_cached(id)?;
        let deleted = self.conn.delete(
            ID_TABLE,
            &Conditions::new()
                .eq(field::SMW_ID, id)
                .eq(field::SMW_HASH, guard.hash.as_str())
                .eq(field::SMW_IW, guard.interwiki.as_str()),
        )?;
        if deleted == 0 {
            tracing::warn!(target: "semstore::dispose", %id, "id row changed since it was read, kept");
            return Ok(DisposalOutcome::GuardMismatch);
        }
        tracing::info!(target: "semstore::dispose", %id, rows = removed, "entity disposed");
        Ok(DisposalOutcome::Disposed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::IdCacheManager;
    use crate::entity::{namespace, EntityKey};
    use crate::schema::{install, QUERY_LINKS_TABLE};
    use crate::storage::{InMemoryConnection, Row};
    use crate::tables::statistics::PropertyStatisticsTable;

    struct Fixture {
        conn: Arc<dyn Connection>,
        ids: Arc<EntityIdManager>,
        tx: Arc<TransactionContext>,
        disposer: IdReferenceDisposer,
    }

    fn fixture() -> Fixture {
        let config = Arc::new(StoreConfig::default());
        let conn: Arc<dyn Connection> = Arc::new(InMemoryConnection::new());
        let registry = Arc::new(TableRegistry::new(&[]).unwrap());
        install(conn.as_ref(), &registry, true, 500).unwrap();
        let cache = Arc::new(IdCacheManager::new(&config));
        let ids = Arc::new(
            EntityIdManager::new(
                Arc::clone(&conn),
                Arc::clone(&registry),
                Arc::clone(&config),
                cache,
                None,
            )
            .unwrap(),
        );
        let tx = Arc::new(TransactionContext::new());
        let disposer = IdReferenceDisposer::new(
            Arc::clone(&conn),
            registry,
            Arc::clone(&ids),
            Arc::new(PropertyStatisticsTable::new(Arc::clone(&conn), Arc::clone(&tx))),
            Arc::new(QueryLinksStore::new(Arc::clone(&conn))),
            Arc::new(FulltextIndex::new(Arc::clone(&conn))),
            Arc::clone(&tx),
            config,
        );
        Fixture { conn, ids, tx, disposer }
    }

    fn page(f: &Fixture, title: &str) -> EntityId {
        f.ids
            .make_id(&EntityKey::new(title, namespace::MAIN), None, true, false)
            .unwrap()
            .id
    }

    fn link(f: &Fixture, s: EntityId, o: EntityId) {
        f.conn
            .insert(
                "smw_di_wikipage",
                vec![Row::new().with(field::S_ID, s).with(field::P_ID, 600u32).with(field::O_ID, o)],
            )
            .unwrap();
    }

    #[test]
    fn test_cleanup_removes_rows_then_id_row() {
        let f = fixture();
        let foo = page(&f, "Foo");
        let bar = page(&f, "Bar");
        link(&f, foo, bar);
        f.conn
            .insert(QUERY_LINKS_TABLE, vec![Row::new().with(field::S_ID, foo).with(field::O_ID, bar)])
            .unwrap();

        assert_eq!(f.disposer.cleanup_table_entries_by_id(foo).unwrap(), DisposalOutcome::Disposed);
        assert!(!f.disposer.finder().has_residual_reference_for_id(foo).unwrap());
        assert_eq!(f.conn.count(QUERY_LINKS_TABLE, &Conditions::new()).unwrap(), 0);
        assert!(f.ids.get_id(&EntityKey::new("Foo", 0)).unwrap().is_none());
    }

    #[test]
    fn test_referenced_entity_is_kept() {
        let f = fixture();
        let foo = page(&f, "Foo");
        let bar = page(&f, "Bar");
        link(&f, foo, bar);

        assert_eq!(
            f.disposer.remove_outdated_entity_references_by_id(bar).unwrap(),
            DisposalOutcome::StillReferenced
        );
        assert_eq!(f.ids.get_id(&EntityKey::new("Bar", 0)).unwrap(), bar);
        assert_eq!(
            f.disposer.remove_outdated_entity_references_by_id(EntityId::new(4)).unwrap(),
            DisposalOutcome::StillReferenced
        );
    }

    #[test]
    fn test_redirect_stub_survives() {
        let f = fixture();
        let stub = f
            .ids
            .make_id(&EntityKey::new("Old", 0).with_interwiki(interwiki::REDIRECT), None, false, false)
            .unwrap()
            .id;
        assert_eq!(
            f.disposer.remove_outdated_entity_references_by_id(stub).unwrap(),
            DisposalOutcome::KeptRedirectStub
        );
        assert_eq!(f.conn.count(ID_TABLE, &Conditions::new().eq(field::SMW_ID, stub)).unwrap(), 1);
    }

    #[test]
    fn test_guard_mismatch_keeps_row() {
        let f = fixture();
        let foo = page(&f, "Foo");
        let guard = f.disposer.read_guard(foo).unwrap().unwrap();
        f.ids
            .update_interwiki_field(foo, &EntityKey::new("Foo", 0).with_interwiki(interwiki::OUTDATED), "changed")
            .unwrap();

        assert_eq!(f.disposer.cleanup(foo, Some(&guard)).unwrap(), DisposalOutcome::GuardMismatch);
        assert_eq!(f.conn.count(ID_TABLE, &Conditions::new().eq(field::SMW_ID, foo)).unwrap(), 1);
    }

    #[test]
    fn test_disposal_waits_for_idle() {
        let f = fixture();
        let foo = page(&f, "Foo");
        f.tx.begin_section("semstore.update");
        assert_eq!(f.disposer.dispose_when_idle(foo).unwrap(), Deferral::Deferred);
        assert_eq!(f.conn.count(ID_TABLE, &Conditions::new().eq(field::SMW_ID, foo)).unwrap(), 1);
        f.tx.end_section("semstore.update").unwrap();
        assert_eq!(f.conn.count(ID_TABLE, &Conditions::new().eq(field::SMW_ID, foo)).unwrap(), 0);
    }

    #[test]
    fn test_sweeps() {
        let f = fixture();
        let foo = page(&f, "Foo");
        page(&f, "Bar");
        f.ids
            .update_interwiki_field(foo, &EntityKey::new("Foo", 0).with_interwiki(interwiki::OUTDATED), "h")
            .unwrap();
        let outdated: Vec<_> = f
            .disposer
            .outdated_entities()
            .map(|r| r.unwrap().id(field::SMW_ID).unwrap().unwrap())
            .collect();
        assert_eq!(outdated, vec![foo]);

        let invalid = f.disposer.namespace_invalid_entities(&[namespace::PROPERTY]).count();
        assert_eq!(invalid, 2);
    }
}
