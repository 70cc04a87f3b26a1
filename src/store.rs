//! The update pipeline.
//!
//! [`SemanticStore`] wires the ID manager, the row differ, the table updater,
//! the disposer and the concept cache over one connection and exposes the
//! operations a page-save pipeline needs: write a subject's data, delete a
//! subject, move a title, and the maintenance sweeps.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::cache::{CacheStats, IdCacheManager};
use crate::concept::ConceptCache;
use crate::config::StoreConfig;
use crate::entity::{interwiki, namespace, EntityId, EntityKey};
use crate::error::{ConceptError, StoreError, StoreResult, ValidationError};
use crate::ids::EntityIdManager;
use crate::jobs::{try_enqueue, ChannelJobQueue, Dispatch, Job, JobKind, JobQueue};
use crate::property::{PredefinedProperty, Property};
use crate::schema::{field, install, TableRegistry};
use crate::semantic_data::SemanticData;
use crate::storage::{Conditions, Connection, InMemoryConnection, SelectOptions, TransactionContext};
use crate::tables::{
    ChangeOp, DiffMode, DisposalOutcome, FulltextIndex, IdReferenceDisposer, PropertyChangeListener,
    PropertyStatisticsTable, PropertyTableUpdater, QueryLinksStore, RowDiffer, StatisticsStore, UpdateSummary,
};
use crate::value::DataItem;

/// Section wrapping every store-level operation.
pub const STORE_SECTION: &str = "semstore.store";

/// Redirect written by [`SemanticStore::update_data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedirectChange {
    /// ID of the redirect target, allocated if it was new.
    pub target_id: EntityId,
    /// How references to the old ID were re-pointed.
    pub reconciliation: Dispatch,
}

/// Outcome of [`SemanticStore::update_data`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    /// ID of the subject; for a redirect, the ID of its stub.
    pub subject_id: EntityId,
    /// One summary per written entity, the page first.
    pub summaries: Vec<UpdateSummary>,
    /// Sorted IDs of every entity whose rows or references changed.
    pub changed_entities: Vec<EntityId>,
    pub redirect: Option<RedirectChange>,
    /// Subobjects that disappeared and were marked outdated.
    pub outdated: Vec<EntityId>,
}

/// Outcome of [`SemanticStore::delete_subject`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    /// IDs whose rows were removed.
    pub cleared: Vec<EntityId>,
    /// IDs marked outdated and scheduled for disposal.
    pub outdated: Vec<EntityId>,
    /// IDs still referenced elsewhere; they stay as empty entities.
    pub kept: Vec<EntityId>,
}

/// Outcome of [`SemanticStore::change_title`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveReport {
    /// The moved ID, or NONE when the old title had none.
    pub id: EntityId,
    /// IDs retired because they occupied the new title.
    pub retired: Vec<EntityId>,
    pub redirect_stub: Option<EntityId>,
}

/// Outcome of [`SemanticStore::dispose_outdated_entities`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisposalSweep {
    /// IDs whose rows and ID row were removed.
    pub disposed: Vec<EntityId>,
    /// IDs left in place and the reason.
    pub kept: Vec<(EntityId, DisposalOutcome)>,
}

/// Outcome of [`SemanticStore::run_jobs`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobRun {
    /// Jobs that completed without error.
    pub executed: usize,
    pub failed: usize,
}

/// Builder for [`SemanticStore`].
#[derive(Default)]
pub struct StoreBuilder {
    config: StoreConfig,
    connection: Option<Arc<dyn Connection>>,
    jobs: Option<Arc<dyn JobQueue>>,
    listeners: Vec<Arc<dyn PropertyChangeListener>>,
}

impl StoreBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Storage backend; defaults to a fresh [`InMemoryConnection`].
    #[must_use]
    pub fn connection(mut self, connection: Arc<dyn Connection>) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Job queue; defaults to a [`ChannelJobQueue`] of the configured
    /// capacity.
    #[must_use]
    pub fn job_queue(mut self, jobs: Arc<dyn JobQueue>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    #[must_use]
    pub fn listener(mut self, listener: Arc<dyn PropertyChangeListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Validates the configuration, installs the schema and the predefined
    /// properties, and wires every component.
    ///
    /// # Errors
    /// Returns [`ValidationError::InvalidConfig`] for a bad configuration and
    /// propagates storage failures from the installation.
    pub fn build(self) -> StoreResult<SemanticStore> {
        self.config.validate()?;
        let config = Arc::new(self.config);
        let registry = Arc::new(TableRegistry::new(&config.fixed_properties)?);
        let conn = self
            .connection
            .unwrap_or_else(|| Arc::new(InMemoryConnection::new()));
        install(
            conn.as_ref(),
            &registry,
            config.unique_entity_keys,
            config.fixed_property_id_upper_bound,
        )?;

        let jobs = self
            .jobs
            .unwrap_or_else(|| Arc::new(ChannelJobQueue::new(config.job_queue_capacity)));
        let tx = Arc::new(TransactionContext::new());
        let ids = Arc::new(EntityIdManager::new(
            Arc::clone(&conn),
            Arc::clone(&registry),
            Arc::clone(&config),
            Arc::new(IdCacheManager::new(&config)),
            Some(Arc::clone(&jobs)),
        )?);
        ids.install_predefined_properties()?;

        let statistics: Arc<dyn StatisticsStore> =
            Arc::new(PropertyStatisticsTable::new(Arc::clone(&conn), Arc::clone(&tx)));
        let links = Arc::new(QueryLinksStore::new(Arc::clone(&conn)));
        let text = Arc::new(FulltextIndex::new(Arc::clone(&conn)));

        let updater = PropertyTableUpdater::new(
            Arc::clone(&conn),
            Arc::clone(&registry),
            Arc::clone(&ids),
            Arc::clone(&statistics),
            Arc::clone(&tx),
        );
        for listener in self.listeners {
            updater.add_listener(listener);
        }

        let store = SemanticStore {
            differ: RowDiffer::new(
                Arc::clone(&conn),
                Arc::clone(&registry),
                Arc::clone(&ids),
                Arc::clone(&config),
            ),
            disposer: IdReferenceDisposer::new(
                Arc::clone(&conn),
                Arc::clone(&registry),
                Arc::clone(&ids),
                Arc::clone(&statistics),
                Arc::clone(&links),
                Arc::clone(&text),
                Arc::clone(&tx),
                Arc::clone(&config),
            ),
            concepts: ConceptCache::new(
                Arc::clone(&conn),
                Arc::clone(&registry),
                Arc::clone(&ids),
                Arc::clone(&config),
                Arc::clone(&tx),
            ),
            updater,
            statistics,
            links,
            text,
            ids,
            jobs,
            tx,
            registry,
            conn,
            config,
        };
        tracing::info!(
            target: "semstore::store",
            tables = store.registry.len(),
            jobs = store.config.defers_to_jobs(),
            "semantic store ready"
        );
        Ok(store)
    }
}

/// Entity store with differential property-table synchronization.
pub struct SemanticStore {
    config: Arc<StoreConfig>,
    conn: Arc<dyn Connection>,
    registry: Arc<TableRegistry>,
    tx: Arc<TransactionContext>,
    jobs: Arc<dyn JobQueue>,
    ids: Arc<EntityIdManager>,
    differ: RowDiffer,
    updater: PropertyTableUpdater,
    statistics: Arc<dyn StatisticsStore>,
    disposer: IdReferenceDisposer,
    links: Arc<QueryLinksStore>,
    text: Arc<FulltextIndex>,
    concepts: ConceptCache,
}

impl SemanticStore {
    #[must_use]
    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    /// A store over a fresh in-memory backend.
    ///
    /// # Errors
    /// See [`StoreBuilder::build`].
    pub fn in_memory(config: StoreConfig) -> StoreResult<Self> {
        StoreBuilder::new().config(config).build()
    }

    /// Writes the data of a page and its subobjects.
    ///
    /// A declared redirect turns the page into a redirect stub instead: its
    /// rows are cleared and references to it move to the target. A page that
    /// stops redirecting gets its old ID back.
    ///
    /// # Errors
    /// Returns a validation error when the subject is a subobject or carries
    /// a reserved interwiki, and propagates pipeline failures. Nothing
    /// deferred runs after a failure.
    pub fn update_data(&self, data: &SemanticData) -> StoreResult<UpdateReport> {
        self.in_section(|| self.update_in_section(data))
    }

    /// Removes all data of a page and its subobjects and marks their IDs
    /// outdated unless something still references them.
    ///
    /// # Errors
    /// Returns a validation error for subobject keys and propagates storage
    /// failures.
    pub fn delete_subject(&self, key: &EntityKey) -> StoreResult<DeleteReport> {
        self.in_section(|| self.delete_in_section(key))
    }

    /// Moves the ID of `old` (and its subobjects) to `new`. Whatever lived at
    /// `new` is retired first. With `keep_redirect`, `old` becomes a redirect
    /// to the moved ID.
    ///
    /// # Errors
    /// Returns a validation error for subobject keys and an internal error
    /// when the entity at `new` cannot be retired.
    pub fn change_title(&self, old: &EntityKey, new: &EntityKey, keep_redirect: bool) -> StoreResult<MoveReport> {
        self.in_section(|| self.move_in_section(old, new, keep_redirect))
    }

    /// Replaces the pages an embedded query of `subject` depends on.
    ///
    /// # Errors
    /// Propagates key validation and storage failures.
    pub fn set_query_dependencies(&self, subject: &EntityKey, dependencies: &[EntityKey]) -> StoreResult<usize> {
        let subject_id = self.ids.make_id(subject, None, true, false)?.id;
        let mut ids = Vec::with_capacity(dependencies.len());
        for dependency in dependencies {
            ids.push(self.ids.make_id(dependency, None, true, false)?.id);
        }
        self.links.set_dependencies(subject_id, &ids)
    }

    /// Subjects whose queries depend on `key`.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn query_dependents(&self, key: &EntityKey) -> StoreResult<Vec<EntityId>> {
        let id = self.ids.get_id(key)?;
        if id.is_none() {
            return Ok(Vec::new());
        }
        self.links.dependents(id)
    }

    /// Usage count of `property`, `None` when never counted.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn usage_count(&self, property: &Property) -> StoreResult<Option<u64>> {
        let id = self.ids.get_property_id(property)?;
        if id.is_none() {
            return Ok(None);
        }
        self.statistics.get_usage_count(id)
    }

    /// Recounts every property's usage from the property tables and
    /// overwrites the statistics table.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn rebuild_property_statistics(&self) -> StoreResult<BTreeMap<EntityId, u64>> {
        let mut counts: BTreeMap<EntityId, u64> = BTreeMap::new();
        for def in self.registry.tables().filter(|d| d.uses_id_subject()) {
            if let Some(key) = def.fixed_property() {
                let property_id = self.ids.get_property_id(&Property::new(key)?)?;
                if property_id.is_none() {
                    continue;
                }
                let rows = self.conn.count(def.name(), &Conditions::new())?;
                *counts.entry(property_id).or_default() += u64::try_from(rows).unwrap_or(u64::MAX);
                continue;
            }
            let rows = self.conn.select(
                def.name(),
                &Conditions::new(),
                &SelectOptions::new().fields(&[field::P_ID]),
            )?;
            for row in rows {
                if let Some(property_id) = row.id(field::P_ID)? {
                    *counts.entry(property_id).or_default() += 1;
                }
            }
        }
        counts.retain(|_, count| *count > 0);

        self.statistics.reset()?;
        for (property_id, count) in &counts {
            self.statistics
                .set_usage_count(*property_id, i64::try_from(*count).unwrap_or(i64::MAX), 0)?;
        }
        tracing::info!(target: "semstore::store", properties = counts.len(), "property statistics rebuilt");
        Ok(counts)
    }

    /// Disposes every ID marked outdated that nothing references any more.
    ///
    /// # Errors
    /// Propagates storage failures; IDs disposed before the failure stay
    /// disposed.
    pub fn dispose_outdated_entities(&self) -> StoreResult<DisposalSweep> {
        let mut sweep = DisposalSweep::default();
        for row in self.disposer.outdated_entities() {
            let Some(id) = row?.id(field::SMW_ID)? else {
                continue;
            };
            match self.disposer.remove_outdated_entity_references_by_id(id)? {
                DisposalOutcome::Disposed => sweep.disposed.push(id),
                outcome => sweep.kept.push((id, outcome)),
            }
        }
        tracing::info!(
            target: "semstore::store",
            disposed = sweep.disposed.len(),
            kept = sweep.kept.len(),
            "outdated entities swept"
        );
        Ok(sweep)
    }

    /// IDs living outside the configured valid namespaces. Empty when every
    /// namespace is valid.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn find_invalid_namespace_entities(&self) -> StoreResult<Vec<EntityId>> {
        if self.config.valid_namespaces.is_empty() {
            return Ok(Vec::new());
        }
        let mut found = Vec::new();
        for row in self.disposer.namespace_invalid_entities(&self.config.valid_namespaces) {
            if let Some(id) = row?.id(field::SMW_ID)? {
                found.push(id);
            }
        }
        Ok(found)
    }

    /// Runs up to `limit` queued jobs. Failed jobs are logged and dropped.
    #[must_use]
    pub fn run_jobs(&self, limit: usize) -> JobRun {
        let mut run = JobRun::default();
        while run.executed + run.failed < limit {
            let Some(job) = self.jobs.pop() else {
                break;
            };
            match self.execute_job(&job) {
                Ok(()) => {
                    run.executed += 1;
                    tracing::debug!(target: "semstore::jobs", job = %job, "job done");
                }
                Err(e) => {
                    run.failed += 1;
                    tracing::error!(target: "semstore::jobs", job = %job, error = %e, "job failed");
                }
            }
        }
        run
    }

    /// Number of queued jobs.
    #[must_use]
    pub fn pending_jobs(&self) -> usize {
        self.jobs.len()
    }

    pub fn add_listener(&self, listener: Arc<dyn PropertyChangeListener>) {
        self.updater.add_listener(listener);
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    #[must_use]
    pub fn ids(&self) -> &EntityIdManager {
        &self.ids
    }

    #[must_use]
    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    #[must_use]
    pub fn connection(&self) -> &dyn Connection {
        self.conn.as_ref()
    }

    #[must_use]
    pub fn transaction(&self) -> &TransactionContext {
        &self.tx
    }

    #[must_use]
    pub const fn differ(&self) -> &RowDiffer {
        &self.differ
    }

    #[must_use]
    pub const fn updater(&self) -> &PropertyTableUpdater {
        &self.updater
    }

    #[must_use]
    pub fn statistics(&self) -> &dyn StatisticsStore {
        self.statistics.as_ref()
    }

    #[must_use]
    pub const fn disposer(&self) -> &IdReferenceDisposer {
        &self.disposer
    }

    #[must_use]
    pub const fn concepts(&self) -> &ConceptCache {
        &self.concepts
    }

    #[must_use]
    pub fn fulltext(&self) -> &FulltextIndex {
        &self.text
    }

    #[must_use]
    pub fn query_links(&self) -> &QueryLinksStore {
        &self.links
    }

    #[must_use]
    pub fn cache_stats(&self) -> Vec<CacheStats> {
        self.ids.cache_stats()
    }

    fn in_section<T>(&self, f: impl FnOnce() -> StoreResult<T>) -> StoreResult<T> {
        self.tx.begin_section(STORE_SECTION);
        match f() {
            Ok(value) => {
                self.tx.end_section(STORE_SECTION)?;
                Ok(value)
            }
            Err(e) => {
                self.tx.rollback_section(STORE_SECTION);
                Err(e)
            }
        }
    }

    fn check_page_key(key: &EntityKey) -> StoreResult<()> {
        key.validate()?;
        if key.is_subobject() || key.has_reserved_interwiki() {
            return Err(ValidationError::MalformedEntityKey {
                key: key.to_string(),
                reason: "expected a page key".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn update_in_section(&self, data: &SemanticData) -> StoreResult<UpdateReport> {
        let subject = data.subject();
        Self::check_page_key(subject)?;

        if let Some(target) = data.redirect_target() {
            if target.page() == *subject {
                tracing::warn!(target: "semstore::store", subject = %subject, "self-redirect ignored");
            } else {
                return self.apply_redirect(subject, target);
            }
        }
        self.revive_redirect_stub(subject)?;

        let subject_id = self.ids.make_id(subject, Some(data.sortkey().as_str()), false, false)?.id;

        let subobject_property = Property::predefined(PredefinedProperty::Subobject);
        let mut page = data.clone();
        let mut subobjects = Vec::new();
        let mut live = BTreeSet::new();
        for sub in data.subobjects() {
            let sub_id = self.ids.make_id(sub.subject(), Some(sub.sortkey().as_str()), false, false)?.id;
            page.add_value(subobject_property.clone(), DataItem::WikiPage(sub.subject().clone()));
            live.insert(sub_id);
            subobjects.push((sub_id, sub));
        }

        // Every entity is mapped and diffed before the first row is written.
        let mut ops = Vec::with_capacity(subobjects.len() + 1);
        ops.push((self.differ.compute_row_diff(subject_id, &page)?, &page));
        for (sub_id, sub) in subobjects {
            ops.push((self.differ.compute_row_diff(sub_id, sub)?, sub));
        }

        let mut changed = BTreeSet::new();
        let mut summaries = Vec::with_capacity(ops.len());
        for (op, entity) in &ops {
            summaries.push(self.write(op, entity, &mut changed)?);
        }
        let outdated = self.retire_vanished_subobjects(subject, &live)?;

        if subject.namespace == namespace::CONCEPT && self.concept_definition_changed(&summaries[0]) {
            self.invalidate_concept(subject)?;
        }

        tracing::debug!(
            target: "semstore::store",
            subject = %subject,
            %subject_id,
            subobjects = summaries.len() - 1,
            changed = changed.len(),
            "subject updated"
        );
        Ok(UpdateReport {
            subject_id,
            summaries,
            changed_entities: changed.into_iter().collect(),
            redirect: None,
            outdated,
        })
    }

    /// Applies a prepared diff of one entity.
    fn write(
        &self,
        op: &ChangeOp,
        data: &SemanticData,
        changed: &mut BTreeSet<EntityId>,
    ) -> StoreResult<UpdateSummary> {
        let id = op.subject_id();
        let summary = self.updater.apply(op)?;
        self.text.update(id, op.text_items())?;
        self.ids.update_field_maps(id, data)?;
        changed.extend(summary.touched.iter().copied());
        Ok(summary)
    }

    /// Removes every row of one entity.
    fn clear(&self, id: EntityId, key: &EntityKey, changed: &mut BTreeSet<EntityId>) -> StoreResult<UpdateSummary> {
        let empty = SemanticData::new(key.clone());
        let op = self.differ.diff(id, &empty, DiffMode::Full)?;
        let summary = self.updater.apply(&op)?;
        self.text.delete(id)?;
        self.ids.aux().delete(id)?;
        changed.extend(summary.touched.iter().copied());
        Ok(summary)
    }

    fn apply_redirect(&self, subject: &EntityKey, target: &EntityKey) -> StoreResult<UpdateReport> {
        let target_id = self.ids.make_id(target, None, true, false)?.id;
        let current = self.ids.get_id(subject)?;
        let stub_key = subject.with_interwiki(interwiki::REDIRECT);

        let mut changed = BTreeSet::from([target_id]);
        let mut summaries = Vec::new();
        let mut outdated = Vec::new();
        let subject_id = if current.is_none() {
            self.ids.make_id(&stub_key, None, false, false)?.id
        } else {
            summaries.push(self.clear(current, subject, &mut changed)?);
            outdated = self.retire_vanished_subobjects(subject, &BTreeSet::new())?;
            self.ids.update_interwiki_field(current, &stub_key, &stub_key.hash())?;
            current
        };

        self.ids.add_redirect(target_id, &subject.title, subject.namespace)?;
        let reconciliation = if current.is_none() {
            Dispatch::Inline
        } else {
            self.ids.update_redirect(current, target_id)?
        };

        tracing::info!(
            target: "semstore::store",
            subject = %subject,
            target = %target_id,
            ?reconciliation,
            "subject redirected"
        );
        Ok(UpdateReport {
            subject_id,
            summaries,
            changed_entities: changed.into_iter().collect(),
            redirect: Some(RedirectChange {
                target_id,
                reconciliation,
            }),
            outdated,
        })
    }

    /// Drops the redirect entry of a page that stopped redirecting and hands
    /// the stub's ID back to the page.
    fn revive_redirect_stub(&self, subject: &EntityKey) -> StoreResult<()> {
        if self.ids.find_redirect(&subject.title, subject.namespace)?.is_none() {
            return Ok(());
        }
        self.ids.delete_redirect(&subject.title, subject.namespace)?;

        let stub_key = subject.with_interwiki(interwiki::REDIRECT);
        let stub = self.ids.get_id(&stub_key)?;
        if stub.is_none() {
            return Ok(());
        }
        if self.ids.get_id(subject)?.is_none() {
            self.ids.update_interwiki_field(stub, subject, &subject.hash())?;
            tracing::debug!(target: "semstore::store", subject = %subject, id = %stub, "redirect stub revived");
        } else {
            self.retire(stub, &stub_key)?;
        }
        Ok(())
    }

    fn retire_vanished_subobjects(&self, page: &EntityKey, live: &BTreeSet<EntityId>) -> StoreResult<Vec<EntityId>> {
        let mut outdated = Vec::new();
        let mut changed = BTreeSet::new();
        for (key, id) in self.ids.find_ids_by_title(&page.title, page.namespace)? {
            if !key.is_subobject() || !key.interwiki.is_empty() || live.contains(&id) {
                continue;
            }
            self.clear(id, &key, &mut changed)?;
            if self.retire(id, &key)? {
                outdated.push(id);
            }
        }
        Ok(outdated)
    }

    /// Marks `id` outdated and schedules its disposal. Returns false when
    /// the ID is still referenced and stays as it is.
    fn retire(&self, id: EntityId, key: &EntityKey) -> StoreResult<bool> {
        if self.disposer.finder().has_residual_reference_for_id(id)? {
            tracing::debug!(target: "semstore::store", %id, "still referenced, kept");
            return Ok(false);
        }

        let outdated_key = key.with_interwiki(interwiki::OUTDATED);
        let previous = self.ids.get_id(&outdated_key)?;
        if !previous.is_none() && previous != id {
            // An earlier incarnation of the same key still awaits disposal.
            let outcome = self.disposer.remove_outdated_entity_references_by_id(previous)?;
            if !matches!(outcome, DisposalOutcome::Disposed | DisposalOutcome::Missing) {
                tracing::warn!(target: "semstore::store", %id, %previous, ?outcome, "outdated key occupied, kept");
                return Ok(false);
            }
        }

        self.ids.update_interwiki_field(id, &outdated_key, &outdated_key.hash())?;
        let dispatch = self.schedule_disposal(id)?;
        tracing::debug!(target: "semstore::store", %id, ?dispatch, "entity marked outdated");
        Ok(true)
    }

    fn schedule_disposal(&self, id: EntityId) -> StoreResult<Dispatch> {
        if self.config.defers_to_jobs() {
            if let Ok(job) = try_enqueue(self.jobs.as_ref(), JobKind::DisposeEntity { id }) {
                return Ok(Dispatch::Queued(job));
            }
        }
        self.disposer.dispose_when_idle(id)?;
        Ok(Dispatch::Inline)
    }

    fn concept_definition_changed(&self, summary: &UpdateSummary) -> bool {
        self.registry
            .fixed_table_for(PredefinedProperty::Concept.key())
            .is_some_and(|def| summary.tables.iter().any(|t| t == def.name()))
    }

    /// Drops the cached members of a redefined concept and recomputes them,
    /// as a job when jobs are enabled.
    fn invalidate_concept(&self, key: &EntityKey) -> StoreResult<Dispatch> {
        self.concepts.delete_concept_cache(key)?;
        if self.config.defers_to_jobs() {
            if let Ok(job) = try_enqueue(self.jobs.as_ref(), JobKind::RefreshConcept { concept: key.clone() }) {
                return Ok(Dispatch::Queued(job));
            }
        }
        match self.concepts.refresh_concept_cache(key) {
            Ok(_) | Err(StoreError::Concept(ConceptError::MissingDefinition { .. })) => Ok(Dispatch::Inline),
            Err(e) => Err(e),
        }
    }

    fn delete_in_section(&self, key: &EntityKey) -> StoreResult<DeleteReport> {
        Self::check_page_key(key)?;

        if key.namespace == namespace::CONCEPT {
            match self.concepts.delete_concept_cache(key) {
                Ok(_) | Err(StoreError::Concept(ConceptError::NotFound { .. })) => {}
                Err(e) => return Err(e),
            }
        }
        self.ids.delete_redirect(&key.title, key.namespace)?;

        let mut entries: Vec<(EntityKey, EntityId)> = self
            .ids
            .find_ids_by_title(&key.title, key.namespace)?
            .into_iter()
            .filter(|(k, _)| k.interwiki.is_empty() || k.interwiki == interwiki::REDIRECT)
            .collect();
        // The page goes first so its links to the subobjects are gone before
        // their references are checked.
        entries.sort_by_key(|(k, id)| (k.is_subobject(), *id));

        let mut report = DeleteReport::default();
        let mut changed = BTreeSet::new();
        for (entry_key, id) in &entries {
            self.clear(*id, entry_key, &mut changed)?;
            report.cleared.push(*id);
        }
        for (entry_key, id) in &entries {
            if self.retire(*id, entry_key)? {
                report.outdated.push(*id);
            } else {
                report.kept.push(*id);
            }
        }
        tracing::info!(
            target: "semstore::store",
            subject = %key,
            cleared = report.cleared.len(),
            outdated = report.outdated.len(),
            "subject deleted"
        );
        Ok(report)
    }

    fn move_in_section(&self, old: &EntityKey, new: &EntityKey, keep_redirect: bool) -> StoreResult<MoveReport> {
        Self::check_page_key(old)?;
        Self::check_page_key(new)?;
        let id = self.ids.get_id(old)?;
        if old == new {
            return Ok(MoveReport {
                id,
                retired: Vec::new(),
                redirect_stub: None,
            });
        }

        let mut retired = Vec::new();
        let occupied = !self.ids.get_id(new)?.is_none()
            || !self.ids.find_redirect(&new.title, new.namespace)?.is_none();
        if occupied {
            retired = self.delete_in_section(new)?.cleared;
            let survivor = self.ids.get_id(new)?;
            if !survivor.is_none() {
                if !id.is_none() {
                    self.ids.redirects().reconcile_references(survivor, id)?;
                }
                if !self.retire(survivor, new)? {
                    return Err(StoreError::internal(format!("{new} is still referenced and cannot be replaced")));
                }
            }
        }

        if id.is_none() {
            return Ok(MoveReport {
                id,
                retired,
                redirect_stub: None,
            });
        }

        let sortkey = match self.ids.get_id_and_sort(old, false, false)? {
            Some(record) if record.sortkey != old.default_sortkey() => record.sortkey,
            _ => new.default_sortkey(),
        };
        self.ids.move_entity(id, new, &sortkey)?;
        for (key, sub_id) in self.ids.find_ids_by_title(&old.title, old.namespace)? {
            if key.is_subobject() && key.interwiki.is_empty() {
                let moved = new.with_subobject(key.subobject.clone());
                self.ids.move_entity(sub_id, &moved, &moved.default_sortkey())?;
            }
        }

        let redirect_stub = if keep_redirect {
            let stub = self
                .ids
                .make_id(&old.with_interwiki(interwiki::REDIRECT), None, false, false)?
                .id;
            self.ids.add_redirect(id, &old.title, old.namespace)?;
            Some(stub)
        } else {
            None
        };
        self.ids.touch(&[id])?;

        tracing::info!(target: "semstore::store", from = %old, to = %new, %id, "title changed");
        Ok(MoveReport {
            id,
            retired,
            redirect_stub,
        })
    }

    fn execute_job(&self, job: &Job) -> StoreResult<()> {
        match &job.kind {
            JobKind::UpdateRedirect { source_id, target_id } => {
                self.ids.redirects().reconcile_references(*source_id, *target_id)?;
            }
            JobKind::DisposeEntity { id } => {
                self.disposer.remove_outdated_entity_references_by_id(*id)?;
            }
            JobKind::RefreshConcept { concept } => {
                self.concepts.refresh_concept_cache(concept)?;
            }
        }
        Ok(())
    }
}
