//! Entity, observation, and relation storage
//!
//! In-process tables behind one `RwLock`, so each write operation is a
//! transaction: either the whole mutation lands or none of it does.
//! Entity writes run in two phases: the merge outcome and its embedding
//! text are staged under a read lock, the embedding provider is called
//! with no lock held, and only then does the batch commit under the
//! write lock. A provider failure therefore leaves the tables untouched.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::actor::ActorContext;
use crate::embedding::EmbeddingProvider;
use crate::error::{MemoryError, Result};
use crate::hierarchy::{AccessSource, ScopeFilter};
use crate::model::{
    searchable_text, DeleteOutcome, EntityDraft, EntityRecord, EntityView, GraphView, Metadata,
    ObservationAdd, ObservationDraft, ObservationOutcome, ObservationRecord, ObservationView,
    RelationDraft, RelationKey, RelationRecord, RelationView,
};

/// Verdict of the pluggable observation schema check.
#[derive(Debug, Clone)]
pub struct ObservationCheck {
    pub valid: bool,
    pub note: Option<String>,
}

impl ObservationCheck {
    pub fn accept() -> Self {
        Self {
            valid: true,
            note: None,
        }
    }

    pub fn reject(note: impl Into<String>) -> Self {
        Self {
            valid: false,
            note: Some(note.into()),
        }
    }
}

/// Schema validation hook for incoming observations.
///
/// Rejected observations are stored anyway with `schema_valid = false`;
/// capture wins over enforcement.
pub trait ObservationValidator: Send + Sync {
    fn check(&self, draft: &ObservationDraft) -> ObservationCheck;
}

/// Accepts every observation.
pub struct AcceptAll;

impl ObservationValidator for AcceptAll {
    fn check(&self, _draft: &ObservationDraft) -> ObservationCheck {
        ObservationCheck::accept()
    }
}

#[derive(Default)]
struct Tables {
    entities: HashMap<Uuid, EntityRecord>,
    observations: HashMap<Uuid, Vec<ObservationRecord>>,
    relations: HashMap<Uuid, RelationRecord>,
    /// Live (context, name) -> entity id index.
    names: HashMap<ActorContext, HashMap<String, Uuid>>,
}

impl Tables {
    fn live_entity_id(&self, context: &ActorContext, name: &str) -> Option<Uuid> {
        self.names.get(context).and_then(|m| m.get(name)).copied()
    }

    fn observations_of(&self, entity_id: Uuid) -> &[ObservationRecord] {
        self.observations
            .get(&entity_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn view(&self, entity_id: Uuid) -> Option<EntityView> {
        let record = self.entities.get(&entity_id)?;
        Some(EntityView {
            id: record.id,
            entity_name: record.name.clone(),
            entity_type: record.entity_type.clone(),
            observations: self
                .observations_of(entity_id)
                .iter()
                .map(ObservationView::from)
                .collect(),
            metadata: record.metadata.clone(),
            alias_of: record.alias_of.clone(),
            identity_confidence: record.identity_confidence,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    fn relation_view(&self, relation: &RelationRecord) -> RelationView {
        RelationView {
            id: relation.id,
            from_entity_name: relation.from_entity_name.clone(),
            from_entity_type: self
                .entities
                .get(&relation.from_entity_id)
                .map(|e| e.entity_type.clone()),
            to_entity_name: relation.to_entity_name.clone(),
            to_entity_type: self
                .entities
                .get(&relation.to_entity_id)
                .map(|e| e.entity_type.clone()),
            relation_type: relation.relation_type.clone(),
            metadata: relation.metadata.clone(),
            created_at: relation.created_at,
        }
    }
}

/// Shallow metadata merge: incoming keys overwrite, others survive.
fn merge_metadata(existing: &mut Metadata, incoming: &Metadata) {
    for (key, value) in incoming {
        existing.insert(key.clone(), value.clone());
    }
}

/// One entity's staged write: the merge outcome as it will commit, built
/// under a read lock before the embedding call.
struct StagedEntity {
    id: Uuid,
    existing: bool,
    name: String,
    entity_type: String,
    /// Full metadata for new entities.
    metadata: Metadata,
    /// Shallow-merge patch for existing entities (upsert only).
    metadata_patch: Option<Metadata>,
    alias_of: Option<String>,
    identity_confidence: Option<f32>,
    /// The prospective full observation set; `[new_from..]` are new.
    observations: Vec<ObservationRecord>,
    new_from: usize,
}

impl StagedEntity {
    fn embedding_text(&self) -> String {
        searchable_text(&self.name, &self.entity_type, &self.observations)
    }
}

/// The memory store: entities, observations, relations, one context each.
pub struct MemoryStore<E: EmbeddingProvider> {
    tables: RwLock<Tables>,
    embedder: Arc<E>,
    validator: Arc<dyn ObservationValidator>,
}

impl<E: EmbeddingProvider> MemoryStore<E> {
    pub fn new(embedder: Arc<E>) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            embedder,
            validator: Arc::new(AcceptAll),
        }
    }

    /// Replace the observation schema validator.
    pub fn with_validator(mut self, validator: Arc<dyn ObservationValidator>) -> Self {
        self.validator = validator;
        self
    }

    fn observation_record(&self, entity_id: Uuid, draft: &ObservationDraft) -> ObservationRecord {
        let check = self.validator.check(draft);
        if !check.valid {
            tracing::warn!(
                observation_type = %draft.observation_type,
                note = check.note.as_deref(),
                "observation failed schema validation, storing flagged"
            );
        }
        ObservationRecord {
            id: Uuid::new_v4(),
            entity_id,
            observation_type: draft.observation_type.clone(),
            value: draft.value.clone(),
            source: draft.source_or_default().to_string(),
            schema_valid: check.valid,
            validation_note: check.note,
            created_at: Utc::now(),
        }
    }

    /// Create entities, merging into any live entity with the same name.
    ///
    /// Merge appends only observations whose (type, value) is new, updates
    /// alias fields when provided, and leaves the entity type and metadata
    /// alone. New entities take everything from the draft.
    pub async fn create_entities(
        &self,
        context: &ActorContext,
        drafts: Vec<EntityDraft>,
    ) -> Result<Vec<EntityView>> {
        self.write_entities(context, drafts, false).await
    }

    /// Create-or-update: like [`create_entities`](Self::create_entities),
    /// but a merge also refreshes the entity type and shallow-merges
    /// metadata.
    pub async fn upsert_entities(
        &self,
        context: &ActorContext,
        drafts: Vec<EntityDraft>,
    ) -> Result<Vec<EntityView>> {
        self.write_entities(context, drafts, true).await
    }

    async fn write_entities(
        &self,
        context: &ActorContext,
        drafts: Vec<EntityDraft>,
        upsert: bool,
    ) -> Result<Vec<EntityView>> {
        // Stage: resolve each draft to its target entity and build the
        // post-merge state. Repeated names in one batch share a target.
        let mut staged: Vec<StagedEntity> = Vec::new();
        let mut index_of: HashMap<String, usize> = HashMap::new();
        let mut order: Vec<usize> = Vec::with_capacity(drafts.len());
        {
            let tables = self.tables.read();
            for draft in &drafts {
                let idx = match index_of.get(&draft.name) {
                    Some(&idx) => idx,
                    None => {
                        staged.push(self.stage_target(&tables, context, draft));
                        index_of.insert(draft.name.clone(), staged.len() - 1);
                        staged.len() - 1
                    }
                };
                let entry = &mut staged[idx];
                for obs_draft in &draft.observations {
                    let duplicate = entry
                        .observations
                        .iter()
                        .any(|o| o.same_fact(&obs_draft.observation_type, &obs_draft.value));
                    if !duplicate {
                        entry.observations.push(self.observation_record(entry.id, obs_draft));
                    }
                }
                if draft.alias_of.is_some() {
                    entry.alias_of = draft.alias_of.clone();
                }
                if draft.identity_confidence.is_some() {
                    entry.identity_confidence = draft.identity_confidence;
                }
                if upsert {
                    entry.entity_type = draft.entity_type.clone();
                    if let Some(metadata) = &draft.metadata {
                        if entry.existing {
                            merge_metadata(
                                entry.metadata_patch.get_or_insert_with(Metadata::new),
                                metadata,
                            );
                        } else {
                            merge_metadata(&mut entry.metadata, metadata);
                        }
                    }
                }
                order.push(idx);
            }
        }

        // Embed with no lock held. A failure here aborts the whole batch
        // before anything is written.
        let texts: Vec<String> = staged.iter().map(StagedEntity::embedding_text).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;

        // Commit under the write lock.
        let ids: Vec<Uuid> = staged.iter().map(|e| e.id).collect();
        let now = Utc::now();
        {
            let mut guard = self.tables.write();
            let tables = &mut *guard;
            for (mut entry, vector) in staged.into_iter().zip(vectors) {
                if entry.existing {
                    let live = match tables.entities.get_mut(&entry.id) {
                        Some(record) if record.is_live() => {
                            if entry.alias_of.is_some() {
                                record.alias_of = entry.alias_of.clone();
                            }
                            if entry.identity_confidence.is_some() {
                                record.identity_confidence = entry.identity_confidence;
                            }
                            if upsert {
                                record.entity_type = entry.entity_type.clone();
                                if let Some(patch) = &entry.metadata_patch {
                                    merge_metadata(&mut record.metadata, patch);
                                }
                            }
                            record.embedding = vector;
                            record.updated_at = now;
                            true
                        }
                        // Deleted between stage and commit
                        _ => false,
                    };
                    if live {
                        let all = tables.observations.entry(entry.id).or_default();
                        for new_obs in entry.observations.drain(entry.new_from..) {
                            let duplicate = all
                                .iter()
                                .any(|o| o.same_fact(&new_obs.observation_type, &new_obs.value));
                            if !duplicate {
                                all.push(new_obs);
                            }
                        }
                    }
                } else if tables.live_entity_id(context, &entry.name).is_none() {
                    tables
                        .names
                        .entry(context.clone())
                        .or_default()
                        .insert(entry.name.clone(), entry.id);
                    tables.observations.insert(entry.id, entry.observations);
                    tables.entities.insert(
                        entry.id,
                        EntityRecord {
                            id: entry.id,
                            context: context.clone(),
                            name: entry.name,
                            entity_type: entry.entity_type,
                            embedding: vector,
                            metadata: entry.metadata,
                            alias_of: entry.alias_of,
                            identity_confidence: entry.identity_confidence,
                            created_at: now,
                            updated_at: now,
                            deleted_at: None,
                        },
                    );
                }
            }
        }

        let tables = self.tables.read();
        Ok(order
            .iter()
            .filter_map(|&idx| tables.view(ids[idx]))
            .collect())
    }

    fn stage_target(
        &self,
        tables: &Tables,
        context: &ActorContext,
        draft: &EntityDraft,
    ) -> StagedEntity {
        match tables.live_entity_id(context, &draft.name) {
            Some(id) => {
                let observations = tables.observations_of(id).to_vec();
                let entity_type = tables
                    .entities
                    .get(&id)
                    .map(|r| r.entity_type.clone())
                    .unwrap_or_else(|| draft.entity_type.clone());
                StagedEntity {
                    id,
                    existing: true,
                    name: draft.name.clone(),
                    entity_type,
                    metadata: Metadata::new(),
                    metadata_patch: None,
                    alias_of: None,
                    identity_confidence: None,
                    new_from: observations.len(),
                    observations,
                }
            }
            None => StagedEntity {
                id: Uuid::new_v4(),
                existing: false,
                name: draft.name.clone(),
                entity_type: draft.entity_type.clone(),
                metadata: draft.metadata.clone().unwrap_or_default(),
                metadata_patch: None,
                alias_of: None,
                identity_confidence: None,
                observations: Vec::new(),
                new_from: 0,
            },
        }
    }

    /// Append observations to existing entities.
    ///
    /// All-or-nothing per batch: every named entity must exist live in the
    /// context and the embedding call must succeed before anything is
    /// written, otherwise the call fails with the tables untouched.
    /// Duplicates (against stored facts and within the batch) are skipped,
    /// and the outcome reports added and total counts per entity.
    pub async fn add_observations(
        &self,
        context: &ActorContext,
        additions: Vec<ObservationAdd>,
    ) -> Result<Vec<ObservationOutcome>> {
        // Stage: resolve every target and build the post-append state.
        let mut staged: Vec<StagedEntity> = Vec::new();
        let mut index_of: HashMap<Uuid, usize> = HashMap::new();
        let mut outcomes = Vec::with_capacity(additions.len());
        {
            let tables = self.tables.read();
            for addition in &additions {
                let entity_id = tables
                    .live_entity_id(context, &addition.entity_name)
                    .ok_or_else(|| {
                        MemoryError::not_found(format!(
                            "entity '{}' not found in context {context}",
                            addition.entity_name
                        ))
                    })?;
                let idx = match index_of.get(&entity_id) {
                    Some(&idx) => idx,
                    None => {
                        let observations = tables.observations_of(entity_id).to_vec();
                        let entity_type = tables
                            .entities
                            .get(&entity_id)
                            .map(|r| r.entity_type.clone())
                            .unwrap_or_default();
                        staged.push(StagedEntity {
                            id: entity_id,
                            existing: true,
                            name: addition.entity_name.clone(),
                            entity_type,
                            metadata: Metadata::new(),
                            metadata_patch: None,
                            alias_of: None,
                            identity_confidence: None,
                            new_from: observations.len(),
                            observations,
                        });
                        index_of.insert(entity_id, staged.len() - 1);
                        staged.len() - 1
                    }
                };

                let entry = &mut staged[idx];
                let mut added = 0usize;
                for draft in &addition.contents {
                    let duplicate = entry
                        .observations
                        .iter()
                        .any(|o| o.same_fact(&draft.observation_type, &draft.value));
                    if !duplicate {
                        entry.observations.push(self.observation_record(entity_id, draft));
                        added += 1;
                    }
                }
                outcomes.push(ObservationOutcome {
                    entity_name: addition.entity_name.clone(),
                    added,
                    total: entry.observations.len(),
                });
            }
        }

        // Embed before committing; failure aborts the whole batch.
        let texts: Vec<String> = staged.iter().map(StagedEntity::embedding_text).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;

        let now = Utc::now();
        {
            let mut guard = self.tables.write();
            let tables = &mut *guard;
            for (mut entry, vector) in staged.into_iter().zip(vectors) {
                let live = match tables.entities.get_mut(&entry.id) {
                    Some(record) if record.is_live() => {
                        record.embedding = vector;
                        record.updated_at = now;
                        true
                    }
                    _ => false,
                };
                if live {
                    let all = tables.observations.entry(entry.id).or_default();
                    for new_obs in entry.observations.drain(entry.new_from..) {
                        let duplicate = all
                            .iter()
                            .any(|o| o.same_fact(&new_obs.observation_type, &new_obs.value));
                        if !duplicate {
                            all.push(new_obs);
                        }
                    }
                }
            }
        }

        Ok(outcomes)
    }

    /// Create relations between named entities in one context.
    ///
    /// A draft whose endpoint is missing (or soft-deleted) is skipped, not
    /// an error. A live duplicate (from, to, type) merges metadata instead
    /// of creating a second edge.
    pub fn create_relations(
        &self,
        context: &ActorContext,
        drafts: Vec<RelationDraft>,
    ) -> Result<Vec<RelationView>> {
        let mut tables = self.tables.write();
        let mut views = Vec::new();

        for draft in &drafts {
            let from_id = tables.live_entity_id(context, &draft.from_entity_name);
            let to_id = tables.live_entity_id(context, &draft.to_entity_name);
            let (from_id, to_id) = match (from_id, to_id) {
                (Some(f), Some(t)) => (f, t),
                _ => {
                    tracing::debug!(
                        from = %draft.from_entity_name,
                        to = %draft.to_entity_name,
                        relation_type = %draft.relation_type,
                        "skipping relation with missing endpoint"
                    );
                    continue;
                }
            };

            let existing_id = tables
                .relations
                .values()
                .find(|r| {
                    r.is_live()
                        && r.context == *context
                        && r.from_entity_id == from_id
                        && r.to_entity_id == to_id
                        && r.relation_type == draft.relation_type
                })
                .map(|r| r.id);

            let relation_id = match existing_id {
                Some(id) => {
                    let record = tables
                        .relations
                        .get_mut(&id)
                        .ok_or_else(|| MemoryError::storage("relation index out of sync"))?;
                    if let Some(metadata) = &draft.metadata {
                        merge_metadata(&mut record.metadata, metadata);
                    }
                    record.updated_at = Utc::now();
                    id
                }
                None => {
                    let now = Utc::now();
                    let id = Uuid::new_v4();
                    tables.relations.insert(
                        id,
                        RelationRecord {
                            id,
                            context: context.clone(),
                            from_entity_id: from_id,
                            to_entity_id: to_id,
                            from_entity_name: draft.from_entity_name.clone(),
                            to_entity_name: draft.to_entity_name.clone(),
                            relation_type: draft.relation_type.clone(),
                            metadata: draft.metadata.clone().unwrap_or_default(),
                            created_at: now,
                            updated_at: now,
                            deleted_at: None,
                        },
                    );
                    id
                }
            };

            if let Some(record) = tables.relations.get(&relation_id).cloned() {
                views.push(tables.relation_view(&record));
            }
        }

        Ok(views)
    }

    /// Soft-delete named entities and cascade to every relation touching
    /// them. Names without a live entity are skipped.
    pub fn delete_entities(
        &self,
        context: &ActorContext,
        names: &[String],
    ) -> Result<DeleteOutcome> {
        let mut tables = self.tables.write();
        let now = Utc::now();

        let mut deleted_ids = HashSet::new();
        for name in names {
            if let Some(id) = tables.live_entity_id(context, name) {
                if let Some(record) = tables.entities.get_mut(&id) {
                    record.deleted_at = Some(now);
                    record.updated_at = now;
                }
                if let Some(index) = tables.names.get_mut(context) {
                    index.remove(name);
                }
                deleted_ids.insert(id);
            }
        }

        let mut deleted_relations = 0;
        for relation in tables.relations.values_mut() {
            if relation.is_live()
                && relation.context == *context
                && deleted_ids.iter().any(|id| relation.touches(*id))
            {
                relation.deleted_at = Some(now);
                deleted_relations += 1;
            }
        }

        Ok(DeleteOutcome {
            deleted_entities: deleted_ids.len(),
            deleted_relations,
        })
    }

    /// Soft-delete relations matched by (from, to, type). Keys with no
    /// live match are skipped; returns the number deleted.
    pub fn delete_relations(&self, context: &ActorContext, keys: &[RelationKey]) -> Result<usize> {
        let mut tables = self.tables.write();
        let now = Utc::now();
        let mut deleted = 0;

        for key in keys {
            for relation in tables.relations.values_mut() {
                if relation.is_live()
                    && relation.context == *context
                    && relation.from_entity_name == key.from_entity_name
                    && relation.to_entity_name == key.to_entity_name
                    && relation.relation_type == key.relation_type
                {
                    relation.deleted_at = Some(now);
                    deleted += 1;
                }
            }
        }

        Ok(deleted)
    }

    /// Fetch named live entities from one context, in request order; names
    /// without a live entity are omitted.
    pub fn entities_by_name(&self, context: &ActorContext, names: &[String]) -> Vec<EntityView> {
        let tables = self.tables.read();
        names
            .iter()
            .filter_map(|name| tables.live_entity_id(context, name))
            .filter_map(|id| tables.view(id))
            .collect()
    }

    /// Everything a context owns, live records only.
    pub fn read_graph(&self, context: &ActorContext) -> GraphView {
        let tables = self.tables.read();

        let mut entities: Vec<EntityView> = tables
            .entities
            .values()
            .filter(|e| e.is_live() && e.context == *context)
            .filter_map(|e| tables.view(e.id))
            .collect();
        entities.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.entity_name.cmp(&b.entity_name))
        });

        let mut relations: Vec<RelationView> = tables
            .relations
            .values()
            .filter(|r| r.is_live() && r.context == *context)
            .map(|r| tables.relation_view(r))
            .collect();
        relations.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        GraphView {
            total_entities: entities.len(),
            total_relations: relations.len(),
            entities,
            relations,
        }
    }

    /// Live entities visible under a scope filter, each with its embedding
    /// and the access source it matched on.
    pub fn entities_in_scope(
        &self,
        scope: &ScopeFilter,
    ) -> Vec<(EntityView, Vec<f32>, AccessSource)> {
        let tables = self.tables.read();
        tables
            .entities
            .values()
            .filter_map(|record| {
                let source = scope.matches(record)?;
                let view = tables.view(record.id)?;
                Some((view, record.embedding.clone(), source))
            })
            .collect()
    }

    /// Live relations owned by one context, as raw records for traversal.
    pub fn live_relations(&self, context: &ActorContext) -> Vec<RelationRecord> {
        let tables = self.tables.read();
        tables
            .relations
            .values()
            .filter(|r| r.is_live() && r.context == *context)
            .cloned()
            .collect()
    }

    /// Whether a named live entity exists in the context.
    pub fn entity_exists(&self, context: &ActorContext, name: &str) -> bool {
        self.tables.read().live_entity_id(context, name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorType;
    use crate::embedding::HashingEmbedder;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store() -> MemoryStore<HashingEmbedder> {
        MemoryStore::new(Arc::new(HashingEmbedder::new(64)))
    }

    fn ctx(actor_type: ActorType, id: &str) -> ActorContext {
        ActorContext::new(actor_type, id)
    }

    fn draft(name: &str, observations: &[(&str, &str)]) -> EntityDraft {
        let mut d = EntityDraft::new(name, "person");
        for (t, v) in observations {
            d = d.observation(ObservationDraft::new(*t, json!(v)));
        }
        d
    }

    /// Succeeds for the first `allow` embed calls, then fails.
    struct FlakyEmbedder {
        inner: HashingEmbedder,
        allow: usize,
        calls: AtomicUsize,
    }

    impl FlakyEmbedder {
        fn new(allow: usize) -> Self {
            Self {
                inner: HashingEmbedder::new(32),
                allow,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyEmbedder {
        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        async fn embed(&self, text: &str) -> crate::error::Result<Vec<f32>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.allow {
                return Err(MemoryError::embedding("provider offline"));
            }
            self.inner.embed(text).await
        }
    }

    #[tokio::test]
    async fn test_create_then_merge_is_idempotent() {
        let store = store();
        let c = ctx(ActorType::Synth, "s1");

        let first = store
            .create_entities(&c, vec![draft("Alice", &[("skill", "seo")])])
            .await
            .unwrap();
        let second = store
            .create_entities(&c, vec![draft("Alice", &[("skill", "seo")])])
            .await
            .unwrap();

        assert_eq!(first[0].id, second[0].id);
        assert_eq!(second[0].observations.len(), 1);
    }

    #[tokio::test]
    async fn test_merge_appends_only_new_facts() {
        let store = store();
        let c = ctx(ActorType::Synth, "s1");

        store
            .create_entities(&c, vec![draft("Alice", &[("skill", "seo")])])
            .await
            .unwrap();
        let merged = store
            .create_entities(
                &c,
                vec![draft("Alice", &[("skill", "seo"), ("skill", "rust")])],
            )
            .await
            .unwrap();

        assert_eq!(merged[0].observations.len(), 2);
    }

    #[tokio::test]
    async fn test_repeated_name_in_one_batch_shares_the_entity() {
        let store = store();
        let c = ctx(ActorType::Synth, "s1");

        let views = store
            .create_entities(
                &c,
                vec![
                    draft("Alice", &[("skill", "seo")]),
                    draft("Alice", &[("skill", "rust")]),
                ],
            )
            .await
            .unwrap();

        assert_eq!(views.len(), 2);
        assert_eq!(views[0].id, views[1].id);
        assert_eq!(store.read_graph(&c).total_entities, 1);
        assert_eq!(views[1].observations.len(), 2);
    }

    #[tokio::test]
    async fn test_same_name_in_different_contexts_is_two_entities() {
        let store = store();
        let a = ctx(ActorType::Synth, "s1");
        let b = ctx(ActorType::Synth, "s2");

        let first = store
            .create_entities(&a, vec![draft("Alice", &[])])
            .await
            .unwrap();
        let second = store
            .create_entities(&b, vec![draft("Alice", &[])])
            .await
            .unwrap();

        assert_ne!(first[0].id, second[0].id);
        assert_eq!(store.read_graph(&a).total_entities, 1);
        assert_eq!(store.read_graph(&b).total_entities, 1);
    }

    #[tokio::test]
    async fn test_create_does_not_overwrite_type_but_upsert_does() {
        let store = store();
        let c = ctx(ActorType::Human, "h1");

        store
            .create_entities(&c, vec![EntityDraft::new("Widget", "tool")])
            .await
            .unwrap();
        let created = store
            .create_entities(&c, vec![EntityDraft::new("Widget", "product")])
            .await
            .unwrap();
        assert_eq!(created[0].entity_type, "tool");

        let upserted = store
            .upsert_entities(&c, vec![EntityDraft::new("Widget", "product")])
            .await
            .unwrap();
        assert_eq!(upserted[0].entity_type, "product");
    }

    #[tokio::test]
    async fn test_upsert_merges_metadata_shallowly() {
        let store = store();
        let c = ctx(ActorType::Human, "h1");

        let mut meta1 = Metadata::new();
        meta1.insert("a".into(), json!(1));
        meta1.insert("b".into(), json!(2));
        store
            .upsert_entities(&c, vec![EntityDraft::new("W", "tool").metadata(meta1)])
            .await
            .unwrap();

        let mut meta2 = Metadata::new();
        meta2.insert("b".into(), json!(9));
        let views = store
            .upsert_entities(&c, vec![EntityDraft::new("W", "tool").metadata(meta2)])
            .await
            .unwrap();

        assert_eq!(views[0].metadata["a"], json!(1));
        assert_eq!(views[0].metadata["b"], json!(9));
    }

    #[tokio::test]
    async fn test_embedding_regenerated_on_write() {
        let store = store();
        let c = ctx(ActorType::Synth, "s1");

        store
            .create_entities(&c, vec![draft("Doc", &[("topic", "blog")])])
            .await
            .unwrap();
        let before = store.entities_in_scope(&ScopeFilter::own(c.clone()));

        store
            .add_observations(
                &c,
                vec![ObservationAdd {
                    entity_name: "Doc".into(),
                    contents: vec![ObservationDraft::new("topic", json!("seo"))],
                }],
            )
            .await
            .unwrap();
        let after = store.entities_in_scope(&ScopeFilter::own(c));

        assert_ne!(before[0].1, after[0].1);
    }

    #[tokio::test]
    async fn test_embedding_failure_leaves_create_unwritten() {
        let store = MemoryStore::new(Arc::new(FlakyEmbedder::new(0)));
        let c = ctx(ActorType::Synth, "s1");

        let err = store
            .create_entities(&c, vec![draft("Alice", &[("skill", "seo")])])
            .await
            .unwrap_err();

        assert!(matches!(err, MemoryError::Embedding(_)));
        assert_eq!(store.read_graph(&c).total_entities, 0);
        assert!(!store.entity_exists(&c, "Alice"));
    }

    #[tokio::test]
    async fn test_embedding_failure_leaves_observations_unwritten() {
        // First embed call (the create) succeeds, the append's fails.
        let store = MemoryStore::new(Arc::new(FlakyEmbedder::new(1)));
        let c = ctx(ActorType::Synth, "s1");

        store
            .create_entities(&c, vec![draft("Alice", &[("skill", "seo")])])
            .await
            .unwrap();

        let err = store
            .add_observations(
                &c,
                vec![ObservationAdd {
                    entity_name: "Alice".into(),
                    contents: vec![ObservationDraft::new("skill", json!("rust"))],
                }],
            )
            .await
            .unwrap_err();

        assert!(matches!(err, MemoryError::Embedding(_)));
        let views = store.entities_by_name(&c, &["Alice".to_string()]);
        assert_eq!(views[0].observations.len(), 1);
    }

    #[tokio::test]
    async fn test_add_observations_reports_added_and_total() {
        let store = store();
        let c = ctx(ActorType::Synth, "s1");
        store
            .create_entities(&c, vec![draft("Alice", &[("skill", "seo")])])
            .await
            .unwrap();

        let outcomes = store
            .add_observations(
                &c,
                vec![ObservationAdd {
                    entity_name: "Alice".into(),
                    contents: vec![
                        ObservationDraft::new("skill", json!("seo")),
                        ObservationDraft::new("skill", json!("rust")),
                        ObservationDraft::new("skill", json!("rust")),
                    ],
                }],
            )
            .await
            .unwrap();

        assert_eq!(outcomes[0].entity_name, "Alice");
        assert_eq!(outcomes[0].added, 1);
        assert_eq!(outcomes[0].total, 2);
    }

    #[tokio::test]
    async fn test_add_observations_to_missing_entity_fails_whole_batch() {
        let store = store();
        let c = ctx(ActorType::Synth, "s1");
        store
            .create_entities(&c, vec![draft("Alice", &[])])
            .await
            .unwrap();

        let err = store
            .add_observations(
                &c,
                vec![
                    ObservationAdd {
                        entity_name: "Alice".into(),
                        contents: vec![ObservationDraft::new("fact", json!("x"))],
                    },
                    ObservationAdd {
                        entity_name: "Ghost".into(),
                        contents: vec![ObservationDraft::new("fact", json!("y"))],
                    },
                ],
            )
            .await
            .unwrap_err();

        assert!(matches!(err, MemoryError::NotFound(_)));
        // The valid half of the batch did not land either
        let views = store.entities_by_name(&c, &["Alice".to_string()]);
        assert!(views[0].observations.is_empty());
    }

    #[tokio::test]
    async fn test_relations_skip_missing_endpoints() {
        let store = store();
        let c = ctx(ActorType::Human, "h1");
        store
            .create_entities(&c, vec![draft("Alice", &[]), draft("Bob", &[])])
            .await
            .unwrap();

        let views = store
            .create_relations(
                &c,
                vec![
                    RelationDraft::new("Alice", "Bob", "manages"),
                    RelationDraft::new("Alice", "Ghost", "manages"),
                ],
            )
            .unwrap();

        assert_eq!(views.len(), 1);
        assert_eq!(views[0].to_entity_name, "Bob");
    }

    #[tokio::test]
    async fn test_duplicate_relation_merges_metadata() {
        let store = store();
        let c = ctx(ActorType::Human, "h1");
        store
            .create_entities(&c, vec![draft("Alice", &[]), draft("Bob", &[])])
            .await
            .unwrap();

        store
            .create_relations(&c, vec![RelationDraft::new("Alice", "Bob", "manages")])
            .unwrap();
        let mut meta = Metadata::new();
        meta.insert("since".into(), json!("2024"));
        let mut second = RelationDraft::new("Alice", "Bob", "manages");
        second.metadata = Some(meta);
        store.create_relations(&c, vec![second]).unwrap();

        let relations = store.live_relations(&c);
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].metadata["since"], json!("2024"));
    }

    #[tokio::test]
    async fn test_delete_cascades_to_relations() {
        let store = store();
        let c = ctx(ActorType::Human, "h1");
        store
            .create_entities(
                &c,
                vec![draft("Alice", &[]), draft("Bob", &[]), draft("Carol", &[])],
            )
            .await
            .unwrap();
        store
            .create_relations(
                &c,
                vec![
                    RelationDraft::new("Alice", "Bob", "manages"),
                    RelationDraft::new("Bob", "Carol", "mentors"),
                ],
            )
            .unwrap();

        let outcome = store.delete_entities(&c, &["Bob".to_string()]).unwrap();

        assert_eq!(outcome.deleted_entities, 1);
        assert_eq!(outcome.deleted_relations, 2);
        assert!(store.live_relations(&c).is_empty());
        assert_eq!(store.read_graph(&c).total_entities, 2);
    }

    #[tokio::test]
    async fn test_deleted_name_can_be_recreated() {
        let store = store();
        let c = ctx(ActorType::Synth, "s1");

        let first = store
            .create_entities(&c, vec![draft("Alice", &[])])
            .await
            .unwrap();
        store.delete_entities(&c, &["Alice".to_string()]).unwrap();
        let second = store
            .create_entities(&c, vec![draft("Alice", &[])])
            .await
            .unwrap();

        assert_ne!(first[0].id, second[0].id);
        assert_eq!(second[0].observations.len(), 0);
    }

    #[tokio::test]
    async fn test_delete_relations_by_key() {
        let store = store();
        let c = ctx(ActorType::Human, "h1");
        store
            .create_entities(&c, vec![draft("Alice", &[]), draft("Bob", &[])])
            .await
            .unwrap();
        store
            .create_relations(
                &c,
                vec![
                    RelationDraft::new("Alice", "Bob", "manages"),
                    RelationDraft::new("Alice", "Bob", "mentors"),
                ],
            )
            .unwrap();

        let deleted = store
            .delete_relations(
                &c,
                &[RelationKey {
                    from_entity_name: "Alice".into(),
                    to_entity_name: "Bob".into(),
                    relation_type: "manages".into(),
                }],
            )
            .unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(store.live_relations(&c).len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_observation_is_stored_flagged() {
        struct RejectSkills;
        impl ObservationValidator for RejectSkills {
            fn check(&self, draft: &ObservationDraft) -> ObservationCheck {
                if draft.observation_type == "skill" {
                    ObservationCheck::reject("skills not allowed")
                } else {
                    ObservationCheck::accept()
                }
            }
        }

        let store = MemoryStore::new(Arc::new(HashingEmbedder::new(32)))
            .with_validator(Arc::new(RejectSkills));
        let c = ctx(ActorType::Synth, "s1");

        let views = store
            .create_entities(&c, vec![draft("Alice", &[("skill", "seo"), ("fact", "x")])])
            .await
            .unwrap();

        let observations = &views[0].observations;
        assert_eq!(observations.len(), 2);
        let skill = observations
            .iter()
            .find(|o| o.observation_type == "skill")
            .unwrap();
        assert!(!skill.schema_valid);
    }
}
