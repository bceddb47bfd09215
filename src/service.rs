//! The memory service facade
//!
//! Wires the actor validator, hierarchy resolver, store, search ranking,
//! and traversal behind one typed surface. Every operation takes the
//! calling actor first; writes validate the caller before touching the
//! store, reads build their scope through the resolver.

use std::sync::Arc;

use serde::Serialize;

use crate::actor::{ActorContext, ActorType};
use crate::cache::CacheStats;
use crate::config::MemoryConfig;
use crate::connections::{self, ConnectionResult};
use crate::directory::ActorDirectory;
use crate::embedding::EmbeddingProvider;
use crate::error::{CrossContextDenied, MemoryError, Result};
use crate::hierarchy::{HierarchyResolver, ScopeFlags};
use crate::model::{
    DeleteOutcome, EntityDraft, EntityView, GraphView, ObservationAdd, ObservationOutcome,
    RelationDraft, RelationKey, RelationView,
};
use crate::search::{self, SearchHit, SearchOptions};
use crate::store::{MemoryStore, ObservationValidator};
use crate::validator::{ActorValidator, NullMetrics, ValidationMetrics};

/// Cache activity across the service's caches.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceCacheStats {
    pub validation: CacheStats,
    pub hierarchy: CacheStats,
}

/// Multi-tenant knowledge-graph memory service.
pub struct MemoryService<D: ActorDirectory, E: EmbeddingProvider> {
    directory: Arc<D>,
    validator: ActorValidator<D>,
    resolver: HierarchyResolver<D>,
    store: MemoryStore<E>,
    embedder: Arc<E>,
    config: MemoryConfig,
}

impl<D: ActorDirectory, E: EmbeddingProvider> MemoryService<D, E> {
    pub fn new(directory: Arc<D>, embedder: Arc<E>, config: MemoryConfig) -> Self {
        Self::with_metrics(directory, embedder, config, Arc::new(NullMetrics))
    }

    pub fn with_metrics(
        directory: Arc<D>,
        embedder: Arc<E>,
        config: MemoryConfig,
        metrics: Arc<dyn ValidationMetrics>,
    ) -> Self {
        let ttl = config.cache_ttl();
        if embedder.dimension() != config.embedding_dimension {
            tracing::warn!(
                provider = embedder.dimension(),
                configured = config.embedding_dimension,
                "embedding provider dimension differs from configuration"
            );
        }
        Self {
            validator: ActorValidator::new(directory.clone(), ttl, metrics),
            resolver: HierarchyResolver::new(directory.clone(), ttl),
            store: MemoryStore::new(embedder.clone()),
            directory,
            embedder,
            config,
        }
    }

    /// Replace the observation schema validator. Call before serving
    /// traffic.
    pub fn with_observation_validator(mut self, validator: Arc<dyn ObservationValidator>) -> Self {
        self.store = self.store.with_validator(validator);
        self
    }

    /// Validate the caller and produce its context, or fail with
    /// `InvalidActor`.
    async fn require_actor(&self, actor_type: ActorType, actor_id: &str) -> Result<ActorContext> {
        if self.validator.validate(actor_type, actor_id).await? {
            Ok(ActorContext::new(actor_type, actor_id))
        } else {
            tracing::warn!(%actor_type, actor_id, "rejected unknown actor");
            Err(MemoryError::invalid_actor(actor_type, actor_id))
        }
    }

    /// The context a write should land in: the caller's own, or a skill
    /// module's when the caller is a synth with an active subscription.
    async fn resolve_write_context(
        &self,
        caller: &ActorContext,
        skill_module_id: Option<&str>,
    ) -> Result<ActorContext> {
        let module_id = match skill_module_id {
            None => return Ok(caller.clone()),
            Some(id) => id,
        };

        if caller.actor_type != ActorType::Synth {
            tracing::warn!(caller = %caller, module_id, "cross-context write denied: not a synth");
            return Err(CrossContextDenied::NotASynth.into());
        }
        if !self
            .directory
            .actor_exists(ActorType::SkillModule, module_id)
            .await?
        {
            tracing::warn!(caller = %caller, module_id, "cross-context write denied: unknown module");
            return Err(CrossContextDenied::UnknownModule(module_id.to_string()).into());
        }
        let subscriptions = self.resolver.resolve_skill_modules(caller).await?;
        if !subscriptions.iter().any(|m| m == module_id) {
            tracing::warn!(caller = %caller, module_id, "cross-context write denied: not subscribed");
            return Err(CrossContextDenied::NotSubscribed {
                synth_id: caller.actor_id.clone(),
                module_id: module_id.to_string(),
            }
            .into());
        }
        Ok(ActorContext::new(ActorType::SkillModule, module_id))
    }

    /// Create entities in the caller's context, merging by name.
    pub async fn create_entities(
        &self,
        actor_type: ActorType,
        actor_id: &str,
        drafts: Vec<EntityDraft>,
    ) -> Result<Vec<EntityView>> {
        let context = self.require_actor(actor_type, actor_id).await?;
        tracing::info!(%context, count = drafts.len(), "create entities");
        self.store.create_entities(&context, drafts).await
    }

    /// Create-or-update entities. A synth may target one of its subscribed
    /// skill modules' contexts via `skill_module_id`; everyone else writes
    /// to their own context only.
    pub async fn upsert_entities(
        &self,
        actor_type: ActorType,
        actor_id: &str,
        drafts: Vec<EntityDraft>,
        skill_module_id: Option<&str>,
    ) -> Result<Vec<EntityView>> {
        let caller = self.require_actor(actor_type, actor_id).await?;
        let context = self.resolve_write_context(&caller, skill_module_id).await?;
        tracing::info!(%caller, target = %context, count = drafts.len(), "upsert entities");
        self.store.upsert_entities(&context, drafts).await
    }

    /// Append observations to existing entities in the caller's context.
    pub async fn add_observations(
        &self,
        actor_type: ActorType,
        actor_id: &str,
        additions: Vec<ObservationAdd>,
    ) -> Result<Vec<ObservationOutcome>> {
        let context = self.require_actor(actor_type, actor_id).await?;
        tracing::info!(%context, count = additions.len(), "add observations");
        self.store.add_observations(&context, additions).await
    }

    /// Create relations in the caller's context; drafts with missing
    /// endpoints are skipped.
    pub async fn create_relations(
        &self,
        actor_type: ActorType,
        actor_id: &str,
        drafts: Vec<RelationDraft>,
    ) -> Result<Vec<RelationView>> {
        let context = self.require_actor(actor_type, actor_id).await?;
        tracing::info!(%context, count = drafts.len(), "create relations");
        self.store.create_relations(&context, drafts)
    }

    /// Soft-delete named entities and cascade their relations.
    pub async fn delete_entities(
        &self,
        actor_type: ActorType,
        actor_id: &str,
        names: Vec<String>,
    ) -> Result<DeleteOutcome> {
        let context = self.require_actor(actor_type, actor_id).await?;
        tracing::info!(%context, count = names.len(), "delete entities");
        self.store.delete_entities(&context, &names)
    }

    /// Soft-delete relations by (from, to, type); returns the count.
    pub async fn delete_relations(
        &self,
        actor_type: ActorType,
        actor_id: &str,
        keys: Vec<RelationKey>,
    ) -> Result<usize> {
        let context = self.require_actor(actor_type, actor_id).await?;
        tracing::info!(%context, count = keys.len(), "delete relations");
        self.store.delete_relations(&context, &keys)
    }

    /// Fetch named entities from the caller's own context.
    pub async fn get_entities(
        &self,
        actor_type: ActorType,
        actor_id: &str,
        names: &[String],
    ) -> Result<Vec<EntityView>> {
        let context = self.require_actor(actor_type, actor_id).await?;
        tracing::debug!(%context, count = names.len(), "get entities");
        Ok(self.store.entities_by_name(&context, names))
    }

    /// Everything the caller's context owns.
    pub async fn read_graph(&self, actor_type: ActorType, actor_id: &str) -> Result<GraphView> {
        let context = self.require_actor(actor_type, actor_id).await?;
        tracing::debug!(%context, "read graph");
        Ok(self.store.read_graph(&context))
    }

    /// Semantic search. `include_hierarchy` widens a synth's scope to its
    /// class and skill modules; organizational scope stays out either way.
    pub async fn search(
        &self,
        actor_type: ActorType,
        actor_id: &str,
        query: &str,
        options: SearchOptions,
        include_hierarchy: bool,
    ) -> Result<Vec<SearchHit>> {
        let flags = if include_hierarchy {
            ScopeFlags::hierarchical()
        } else {
            ScopeFlags::exact()
        };
        self.search_hierarchical(actor_type, actor_id, query, options, flags)
            .await
    }

    /// Semantic search with explicit scope flags, for callers that need
    /// organizational scope or a narrower expansion.
    pub async fn search_hierarchical(
        &self,
        actor_type: ActorType,
        actor_id: &str,
        query: &str,
        mut options: SearchOptions,
        flags: ScopeFlags,
    ) -> Result<Vec<SearchHit>> {
        if options.limit == 0 {
            options.limit = self.config.default_search_limit;
        }
        let context = self.require_actor(actor_type, actor_id).await?;
        let scope = self.resolver.build_scope(&context, flags).await?;
        tracing::debug!(%context, query, contexts = scope.entries().len(), "search");

        let candidates = self.store.entities_in_scope(&scope);
        let query_vector = self.embedder.embed(query).await?;
        Ok(search::rank(&query_vector, candidates, &options))
    }

    /// Find connections in the caller's own context. With `to`, collects
    /// simple paths between the endpoints; without it, lists every entity
    /// reachable from `from`. Hop counts are clamped to the configured
    /// ceiling.
    pub async fn find_connections(
        &self,
        actor_type: ActorType,
        actor_id: &str,
        from: &str,
        to: Option<&str>,
        max_hops: usize,
        relation_types: &[String],
    ) -> Result<ConnectionResult> {
        let context = self.require_actor(actor_type, actor_id).await?;
        tracing::debug!(%context, from, to = to.unwrap_or("*"), max_hops, "find connections");

        if !self.store.entity_exists(&context, from) {
            return Err(MemoryError::not_found(from));
        }
        if let Some(to) = to {
            if !self.store.entity_exists(&context, to) {
                return Err(MemoryError::not_found(to));
            }
        }

        let relations = self.store.live_relations(&context);
        let limits = self.config.traversal_limits();
        Ok(match to {
            Some(to) => connections::find_paths_between(
                &relations,
                from,
                to,
                max_hops,
                relation_types,
                &limits,
            ),
            None => connections::find_reachable(&relations, from, max_hops, relation_types, &limits),
        })
    }

    /// Drop cached validation and hierarchy results for one actor, e.g.
    /// after a subscription change.
    pub fn invalidate_actor(&self, actor_type: ActorType, actor_id: &str) {
        self.validator.invalidate(actor_type, actor_id);
        self.resolver.invalidate(actor_type, actor_id);
    }

    /// Drop every cached validation and hierarchy result.
    pub fn invalidate_caches(&self) {
        self.validator.invalidate_all();
        self.resolver.invalidate_all();
    }

    pub fn cache_stats(&self) -> ServiceCacheStats {
        ServiceCacheStats {
            validation: self.validator.cache_stats(),
            hierarchy: self.resolver.cache_stats(),
        }
    }
}
