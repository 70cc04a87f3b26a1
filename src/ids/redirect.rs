//! Redirect relation: source title to target ID.
//!
//! Redirect lookups sit on the link-resolution hot path, so they get their
//! own cache instead of sharing the ID caches. Negative answers are cached
//! too; every write goes through this store and refreshes the entry.

use std::sync::Arc;

use crate::cache::IdCache;
use crate::config::StoreConfig;
use crate::entity::{EntityId, Namespace};
use crate::error::StoreResult;
use crate::jobs::{try_enqueue, Dispatch, JobKind, JobQueue};
use crate::schema::{field, DataItemKind, TableRegistry};
use crate::storage::{Conditions, Connection, Row};

/// Cache-in-front-of-storage CRUD for the redirect table.
pub struct RedirectStore {
    conn: Arc<dyn Connection>,
    registry: Arc<TableRegistry>,
    config: Arc<StoreConfig>,
    table: String,
    cache: IdCache<(String, Namespace), EntityId>,
    jobs: Option<Arc<dyn JobQueue>>,
}

impl RedirectStore {
    /// # Errors
    /// Fails when the registry has no redirect table.
    pub fn new(
        conn: Arc<dyn Connection>,
        registry: Arc<TableRegistry>,
        config: Arc<StoreConfig>,
        jobs: Option<Arc<dyn JobQueue>>,
    ) -> StoreResult<Self> {
        let table = registry.redirect_table()?.name().to_string();
        let cache = IdCache::new("redirect", config.redirect_cache_size);
        Ok(Self {
            conn,
            registry,
            config,
            table,
            cache,
            jobs,
        })
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    fn source_conditions(title: &str, namespace: Namespace) -> Conditions {
        Conditions::new()
            .eq(field::S_TITLE, title)
            .eq(field::S_NAMESPACE, namespace)
    }

    /// The redirect target of a title, or [`EntityId::NONE`].
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn find_redirect(&self, title: &str, namespace: Namespace) -> StoreResult<EntityId> {
        let cache_key = (title.to_string(), namespace);
        if let Some(target) = self.cache.get(&cache_key) {
            return Ok(target);
        }
        let row = self.conn.select_row(
            &self.table,
            &Self::source_conditions(title, namespace),
            &[field::O_ID],
        )?;
        let target = match row {
            Some(row) => row.id(field::O_ID)?.unwrap_or(EntityId::NONE),
            None => EntityId::NONE,
        };
        self.cache.put(cache_key, target);
        Ok(target)
    }

    /// Records `title` as a redirect to `target`, replacing an existing one.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn add_redirect(&self, target: EntityId, title: &str, namespace: Namespace) -> StoreResult<()> {
        let conditions = Self::source_conditions(title, namespace);
        let values = Row::new().with(field::O_ID, target);
        if self.conn.update(&self.table, &values, &conditions)? == 0 {
            self.conn.insert(
                &self.table,
                vec![values
                    .with(field::S_TITLE, title)
                    .with(field::S_NAMESPACE, namespace)],
            )?;
        }
        self.cache.put((title.to_string(), namespace), target);
        tracing::debug!(target: "semstore::redirect", title, namespace, %target, "redirect stored");
        Ok(())
    }

    /// Removes the redirect entry of a title; a missing entry is a no-op.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn delete_redirect(&self, title: &str, namespace: Namespace) -> StoreResult<()> {
        let removed = self
            .conn
            .delete(&self.table, &Self::source_conditions(title, namespace))?;
        self.cache.put((title.to_string(), namespace), EntityId::NONE);
        if removed > 0 {
            tracing::debug!(target: "semstore::redirect", title, namespace, "redirect removed");
        }
        Ok(())
    }

    /// # Errors
    /// Propagates storage failures.
    pub fn is_redirect(&self, title: &str, namespace: Namespace) -> StoreResult<bool> {
        Ok(!self.find_redirect(title, namespace)?.is_none())
    }

    /// Re-points references from `source_id` to `target_id`: in a job when
    /// update jobs are enabled outside command-line mode, inline otherwise.
    ///
    /// # Errors
    /// Propagates storage failures of the inline path.
    pub fn update_redirect(&self, source_id: EntityId, target_id: EntityId) -> StoreResult<Dispatch> {
        self.cache.clear();
        if source_id.is_none() || target_id.is_none() || source_id == target_id {
            return Ok(Dispatch::Inline);
        }

        if self.config.defers_to_jobs() {
            if let Some(queue) = &self.jobs {
                if let Ok(job) = try_enqueue(queue.as_ref(), JobKind::UpdateRedirect { source_id, target_id }) {
                    return Ok(Dispatch::Queued(job));
                }
            }
        }
        self.reconcile_references(source_id, target_id)?;
        Ok(Dispatch::Inline)
    }

    /// Rewrites every wikipage object reference from `source_id` to
    /// `target_id`, including redirects that pointed at the source. Returns
    /// the number of rows changed.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn reconcile_references(&self, source_id: EntityId, target_id: EntityId) -> StoreResult<usize> {
        let mut changed = 0;
        for def in self.registry.tables_of_kind(DataItemKind::WikiPage) {
            for &column in DataItemKind::WikiPage.id_value_fields() {
                changed += self.conn.update(
                    def.name(),
                    &Row::new().with(column, target_id),
                    &Conditions::new().eq(column, source_id),
                )?;
            }
        }
        self.cache.clear();
        tracing::info!(
            target: "semstore::redirect",
            source = %source_id,
            target = %target_id,
            rows = changed,
            "redirect references reconciled"
        );
        Ok(changed)
    }

    pub fn clear(&self) {
        self.cache.clear();
    }
}
