//! Materialized concept member lists.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::config::StoreConfig;
use crate::entity::{EntityId, EntityKey};
use crate::error::{ConceptError, StoreError, StoreResult};
use crate::ids::EntityIdManager;
use crate::property::PredefinedProperty;
use crate::schema::{field, PropertyTableDefinition, TableRegistry, CONCEPT_CACHE_TABLE};
use crate::storage::{Cell, Conditions, Connection, Row, SelectOptions, TransactionContext};

use super::description::{ConceptDefinition, ConceptDescription};
use super::segment::QuerySegmentBuilder;

const CACHE_SECTION: &str = "semstore.concept";

/// Stored metadata of one concept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptStatus {
    /// ID of the concept page.
    pub concept_id: EntityId,
    /// The definition in ask syntax.
    pub query: String,
    pub documentation: String,
    /// Query feature bitmask.
    pub features: u32,
    /// Query size and depth, as measured when the definition was stored.
    pub size: u32,
    pub depth: u32,
    /// When the member list was last computed; `None` if never.
    pub cache_date: Option<DateTime<Utc>>,
    /// Member count at `cache_date`.
    pub cache_count: Option<u64>,
}

impl ConceptStatus {
    #[must_use]
    pub const fn is_cached(&self) -> bool {
        self.cache_date.is_some()
    }

    /// Whether the cache is missing or older than `lifetime_secs` at `now`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, lifetime_secs: u64) -> bool {
        self.cache_date.map_or(true, |date| {
            let age = now.signed_duration_since(date).num_seconds();
            u64::try_from(age).map_or(false, |age| age > lifetime_secs)
        })
    }
}

/// Maintains `smw_concept_cache`: one row per member (`s_id`) and concept
/// (`o_id`), plus `cache_date` and `cache_count` on the concept's row.
pub struct ConceptCache {
    conn: Arc<dyn Connection>,
    registry: Arc<TableRegistry>,
    ids: Arc<EntityIdManager>,
    config: Arc<StoreConfig>,
    tx: Arc<TransactionContext>,
    segments: QuerySegmentBuilder,
}

impl ConceptCache {
    pub fn new(
        conn: Arc<dyn Connection>,
        registry: Arc<TableRegistry>,
        ids: Arc<EntityIdManager>,
        config: Arc<StoreConfig>,
        tx: Arc<TransactionContext>,
    ) -> Self {
        let segments = QuerySegmentBuilder::new(
            Arc::clone(&conn),
            Arc::clone(&registry),
            Arc::clone(&ids),
            Arc::clone(&config),
        );
        Self {
            conn,
            registry,
            ids,
            config,
            tx,
            segments,
        }
    }

    /// The evaluator used to compute member lists.
    #[must_use]
    pub const fn segments(&self) -> &QuerySegmentBuilder {
        &self.segments
    }

    /// Recomputes the members of the concept page `key` and replaces its
    /// cache rows. Returns the number of members.
    ///
    /// # Errors
    /// [`ConceptError::NotFound`] when the page has no ID,
    /// [`ConceptError::MissingDefinition`] or
    /// [`ConceptError::InvalidDefinition`] for a bad stored definition.
    pub fn refresh_concept_cache(&self, key: &EntityKey) -> StoreResult<usize> {
        let id = self.concept_id(key)?;
        self.refresh_by_id(id)
    }

    /// Same as [`ConceptCache::refresh_concept_cache`] for a known ID.
    ///
    /// # Errors
    /// See [`ConceptCache::refresh_concept_cache`].
    pub fn refresh_by_id(&self, concept_id: EntityId) -> StoreResult<usize> {
        let definition = self.definition(concept_id)?;
        let candidates: Vec<EntityId> = self.segments.evaluate(&definition.description)?.into_iter().collect();

        // Redirect stubs and outdated rows carry a reserved interwiki.
        let members: Vec<EntityId> = self
            .ids
            .get_keys(&candidates)?
            .into_iter()
            .filter(|(_, key)| key.interwiki.is_empty())
            .map(|(id, _)| id)
            .collect();

        let now = Utc::now();
        self.tx.begin_section(CACHE_SECTION);
        if let Err(e) = self.replace_members(concept_id, &members, Some(now)) {
            self.tx.rollback_section(CACHE_SECTION);
            return Err(e);
        }
        self.tx.end_section(CACHE_SECTION)?;

        tracing::info!(
            target: "semstore::concept",
            concept = %concept_id,
            members = members.len(),
            "concept cache refreshed"
        );
        Ok(members.len())
    }

    /// Drops the cached members of `key` and clears its cache status.
    ///
    /// # Errors
    /// [`ConceptError::NotFound`] when the page has no ID.
    pub fn delete_concept_cache(&self, key: &EntityKey) -> StoreResult<usize> {
        let id = self.concept_id(key)?;
        let removed = self
            .conn
            .delete(CONCEPT_CACHE_TABLE, &Conditions::new().eq(field::O_ID, id))?;
        let reset = Row::new()
            .with(field::CACHE_DATE, Cell::Null)
            .with(field::CACHE_COUNT, Cell::Null);
        self.conn
            .update(self.concept_table()?.name(), &reset, &Conditions::new().eq(field::S_ID, id))?;
        tracing::debug!(target: "semstore::concept", concept = %id, removed, "concept cache deleted");
        Ok(removed)
    }

    /// Definition metrics and cache state of `key`.
    ///
    /// # Errors
    /// [`ConceptError::NotFound`] or [`ConceptError::MissingDefinition`].
    pub fn get_status(&self, key: &EntityKey) -> StoreResult<ConceptStatus> {
        let id = self.concept_id(key)?;
        let row = self.concept_row(id)?;
        let int = |column: &str| row.int(column).and_then(|v| u32::try_from(v).ok()).unwrap_or(0);
        Ok(ConceptStatus {
            concept_id: id,
            query: self.parse(id, &row)?.description.to_string(),
            documentation: row.text(field::CONCEPT_DOCU).unwrap_or_default().to_string(),
            features: int(field::CONCEPT_FEATURES),
            size: int(field::CONCEPT_SIZE),
            depth: int(field::CONCEPT_DEPTH),
            cache_date: row
                .int(field::CACHE_DATE)
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
            cache_count: row.int(field::CACHE_COUNT).and_then(|v| u64::try_from(v).ok()),
        })
    }

    /// Cached members of `key`, sorted by ID.
    ///
    /// # Errors
    /// [`ConceptError::NotFound`] when the page has no ID.
    pub fn members(&self, key: &EntityKey) -> StoreResult<Vec<EntityId>> {
        let id = self.concept_id(key)?;
        let rows = self.conn.select(
            CONCEPT_CACHE_TABLE,
            &Conditions::new().eq(field::O_ID, id),
            &SelectOptions::new().fields(&[field::S_ID]).order_by(field::S_ID),
        )?;
        let mut members = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(member) = row.id(field::S_ID)? {
                members.push(member);
            }
        }
        Ok(members)
    }

    /// Refreshes every concept whose cache is missing or older than the
    /// configured lifetime. Concepts with an unreadable definition are logged
    /// and skipped.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn refresh_stale(&self, now: DateTime<Utc>) -> StoreResult<Vec<EntityId>> {
        let lifetime = i64::try_from(self.config.concept_cache_lifetime_secs).unwrap_or(i64::MAX);
        let rows = self.conn.select(
            self.concept_table()?.name(),
            &Conditions::new(),
            &SelectOptions::new()
                .fields(&[field::S_ID, field::CACHE_DATE])
                .order_by(field::S_ID),
        )?;

        let mut refreshed = Vec::new();
        for row in rows {
            let Some(id) = row.id(field::S_ID)? else {
                continue;
            };
            let fresh = row
                .int(field::CACHE_DATE)
                .is_some_and(|date| now.timestamp().saturating_sub(date) <= lifetime);
            if fresh {
                continue;
            }
            match self.refresh_by_id(id) {
                Ok(_) => refreshed.push(id),
                Err(StoreError::Concept(e)) => {
                    tracing::warn!(target: "semstore::concept", concept = %id, error = %e, "skipping concept");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(refreshed)
    }

    fn concept_id(&self, key: &EntityKey) -> StoreResult<EntityId> {
        let id = self.ids.get_id(key)?;
        if id.is_none() {
            return Err(ConceptError::NotFound { key: key.to_string() }.into());
        }
        Ok(id)
    }

    fn concept_table(&self) -> StoreResult<&PropertyTableDefinition> {
        self.registry
            .fixed_table_for(PredefinedProperty::Concept.key())
            .ok_or_else(|| StoreError::internal("concept table is not registered"))
    }

    fn concept_row(&self, id: EntityId) -> StoreResult<Row> {
        self.conn
            .select_row(self.concept_table()?.name(), &Conditions::new().eq(field::S_ID, id), &[])?
            .ok_or_else(|| ConceptError::MissingDefinition { id }.into())
    }

    fn parse(&self, id: EntityId, row: &Row) -> StoreResult<ConceptDefinition> {
        let text = row
            .text(field::CONCEPT_TXT)
            .ok_or(ConceptError::MissingDefinition { id })?;
        let description: ConceptDescription =
            serde_json::from_str(text).map_err(|e| ConceptError::InvalidDefinition {
                id,
                message: e.to_string(),
            })?;
        let documentation = row.text(field::CONCEPT_DOCU).unwrap_or_default();
        Ok(ConceptDefinition::new(description).with_documentation(documentation))
    }

    fn definition(&self, id: EntityId) -> StoreResult<ConceptDefinition> {
        let row = self.concept_row(id)?;
        self.parse(id, &row)
    }

    fn replace_members(&self, concept_id: EntityId, members: &[EntityId], date: Option<DateTime<Utc>>) -> StoreResult<()> {
        self.conn
            .delete(CONCEPT_CACHE_TABLE, &Conditions::new().eq(field::O_ID, concept_id))?;
        if !members.is_empty() {
            let rows = members
                .iter()
                .map(|member| Row::new().with(field::S_ID, *member).with(field::O_ID, concept_id))
                .collect();
            self.conn.insert(CONCEPT_CACHE_TABLE, rows)?;
        }
        let status = Row::new()
            .with(field::CACHE_DATE, date.map(|d| d.timestamp()))
            .with(field::CACHE_COUNT, i64::try_from(members.len()).unwrap_or(i64::MAX));
        self.conn.update(
            self.concept_table()?.name(),
            &status,
            &Conditions::new().eq(field::S_ID, concept_id),
        )?;
        Ok(())
    }
}
