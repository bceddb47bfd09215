//! Hierarchy resolution and scope filters
//!
//! A synth inherits read access from its synth class and its subscribed
//! skill modules, and optionally from its owning client. This module
//! resolves that hierarchy (TTL-cached) and composes the disjunctive
//! scope filter every read operation runs against. Expansion is read-only
//! and opt-in per flag: writes must never silently leak into a shared
//! template or organizational scope.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::actor::{ActorContext, ActorType};
use crate::cache::{CacheStats, TtlCache};
use crate::directory::ActorDirectory;
use crate::error::Result;
use crate::model::EntityRecord;

/// Which context in the expanded scope a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessSource {
    /// The caller's own exact context
    Own,
    /// The synth's class template
    InheritedTemplate,
    /// A subscribed skill module
    SkillModule,
    /// The owning client organization
    Organizational,
}

/// Opt-in expansion switches for one read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeFlags {
    pub include_synth_class: bool,
    pub include_skill_module: bool,
    pub include_client: bool,
}

impl ScopeFlags {
    /// The caller's exact context only.
    pub fn exact() -> Self {
        Self {
            include_synth_class: false,
            include_skill_module: false,
            include_client: false,
        }
    }

    /// Default hierarchical expansion: class and modules in, client out.
    /// Organizational data is the most sensitive to leak, so client scope
    /// always requires an explicit opt-in.
    pub fn hierarchical() -> Self {
        Self {
            include_synth_class: true,
            include_skill_module: true,
            include_client: false,
        }
    }
}

/// One included context and the access-source label its hits carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeEntry {
    pub context: ActorContext,
    pub source: AccessSource,
}

/// Disjunction of per-context filters; each per-context predicate is
/// (actor type AND actor id AND not-deleted).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeFilter {
    entries: Vec<ScopeEntry>,
}

impl ScopeFilter {
    /// Build a filter from explicit entries. [`HierarchyResolver::build_scope`]
    /// is the usual constructor; this one serves callers that already know
    /// their contexts.
    pub fn new(entries: Vec<ScopeEntry>) -> Self {
        Self { entries }
    }

    /// A filter covering only the given context.
    pub fn own(context: ActorContext) -> Self {
        Self {
            entries: vec![ScopeEntry {
                context,
                source: AccessSource::Own,
            }],
        }
    }

    pub fn entries(&self) -> &[ScopeEntry] {
        &self.entries
    }

    /// The access source for a record, or None when it is out of scope.
    /// The caller's own context is listed first and wins on overlap.
    pub fn matches(&self, entity: &EntityRecord) -> Option<AccessSource> {
        if !entity.is_live() {
            return None;
        }
        self.entries
            .iter()
            .find(|e| e.context == entity.context)
            .map(|e| e.source)
    }

    /// Whether a context is readable under this scope.
    pub fn contains(&self, context: &ActorContext) -> bool {
        self.entries.iter().any(|e| &e.context == context)
    }
}

/// Resolves synth hierarchy through the actor directory, with caching.
pub struct HierarchyResolver<D: ActorDirectory> {
    directory: Arc<D>,
    classes: TtlCache<Option<String>>,
    modules: TtlCache<Vec<String>>,
    clients: TtlCache<Option<String>>,
}

impl<D: ActorDirectory> HierarchyResolver<D> {
    pub fn new(directory: Arc<D>, ttl: Duration) -> Self {
        Self {
            directory,
            classes: TtlCache::new(ttl),
            modules: TtlCache::new(ttl),
            clients: TtlCache::new(ttl),
        }
    }

    /// The synth-class id for a synth actor; None for every other type.
    /// One directory query per cache miss.
    pub async fn resolve_class(&self, actor: &ActorContext) -> Result<Option<String>> {
        if actor.actor_type != ActorType::Synth {
            return Ok(None);
        }
        if let Some(cached) = self.classes.get(&actor.actor_id) {
            return Ok(cached);
        }
        let class = self.directory.synth_class_of(&actor.actor_id).await?;
        self.classes.set(actor.actor_id.clone(), class.clone());
        Ok(class)
    }

    /// Active skill-module subscriptions for a synth actor; empty for
    /// every other type.
    pub async fn resolve_skill_modules(&self, actor: &ActorContext) -> Result<Vec<String>> {
        if actor.actor_type != ActorType::Synth {
            return Ok(Vec::new());
        }
        if let Some(cached) = self.modules.get(&actor.actor_id) {
            return Ok(cached);
        }
        let modules = self.directory.skill_subscriptions(&actor.actor_id).await?;
        self.modules.set(actor.actor_id.clone(), modules.clone());
        Ok(modules)
    }

    /// The effective client id for any actor: a client actor is its own
    /// client; other actors resolve their owner through the directory.
    /// Cached per (type, id) since ownership depends on both.
    pub async fn resolve_client(&self, actor: &ActorContext) -> Result<Option<String>> {
        if let Some(own) = actor.effective_client_id() {
            return Ok(Some(own.to_string()));
        }
        let key = Self::client_key(actor.actor_type, &actor.actor_id);
        if let Some(cached) = self.clients.get(&key) {
            return Ok(cached);
        }
        let client = self
            .directory
            .owning_client_of(actor.actor_type, &actor.actor_id)
            .await?;
        self.clients.set(key, client.clone());
        Ok(client)
    }

    fn client_key(actor_type: ActorType, actor_id: &str) -> String {
        format!("{actor_type}:{actor_id}")
    }

    /// Compose the scope for one read.
    ///
    /// Always includes the caller's own exact context. Subscription
    /// changes are not observed automatically; callers that mutate them
    /// must call [`invalidate`](Self::invalidate) afterward.
    pub async fn build_scope(&self, actor: &ActorContext, flags: ScopeFlags) -> Result<ScopeFilter> {
        let mut entries = vec![ScopeEntry {
            context: actor.clone(),
            source: AccessSource::Own,
        }];

        if actor.actor_type == ActorType::Synth && flags.include_synth_class {
            if let Some(class_id) = self.resolve_class(actor).await? {
                entries.push(ScopeEntry {
                    context: ActorContext::new(ActorType::SynthClass, class_id),
                    source: AccessSource::InheritedTemplate,
                });
            }
        }

        if actor.actor_type == ActorType::Synth && flags.include_skill_module {
            for module_id in self.resolve_skill_modules(actor).await? {
                entries.push(ScopeEntry {
                    context: ActorContext::new(ActorType::SkillModule, module_id),
                    source: AccessSource::SkillModule,
                });
            }
        }

        if flags.include_client {
            if let Some(client_id) = self.resolve_client(actor).await? {
                let context = ActorContext::new(ActorType::Client, client_id);
                // A client actor's own context already covers it.
                if !entries.iter().any(|e| e.context == context) {
                    entries.push(ScopeEntry {
                        context,
                        source: AccessSource::Organizational,
                    });
                }
            }
        }

        Ok(ScopeFilter { entries })
    }

    /// Clear the class, module, and client cache entries for one actor.
    pub fn invalidate(&self, actor_type: ActorType, actor_id: &str) {
        self.classes.invalidate(actor_id);
        self.modules.invalidate(actor_id);
        self.clients
            .invalidate(&Self::client_key(actor_type, actor_id));
    }

    /// Clear every hierarchy cache entry.
    pub fn invalidate_all(&self) {
        self.classes.clear();
        self.modules.clear();
        self.clients.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        let c = self.classes.stats();
        let m = self.modules.stats();
        let cl = self.clients.stats();
        CacheStats {
            entries: c.entries + m.entries + cl.entries,
            hits: c.hits + m.hits + cl.hits,
            misses: c.misses + m.misses + cl.misses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticDirectory;
    use chrono::Utc;
    use uuid::Uuid;

    fn entity_in(context: ActorContext) -> EntityRecord {
        EntityRecord {
            id: Uuid::new_v4(),
            context,
            name: "E".into(),
            entity_type: "thing".into(),
            embedding: vec![],
            metadata: Default::default(),
            alias_of: None,
            identity_confidence: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    fn resolver(dir: Arc<StaticDirectory>) -> HierarchyResolver<StaticDirectory> {
        HierarchyResolver::new(dir, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_non_synth_has_no_hierarchy() {
        let dir = Arc::new(StaticDirectory::new());
        let r = resolver(dir);
        let human = ActorContext::new(ActorType::Human, "h1");

        assert_eq!(r.resolve_class(&human).await.unwrap(), None);
        assert!(r.resolve_skill_modules(&human).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scope_always_includes_own_context() {
        let dir = Arc::new(StaticDirectory::new());
        let r = resolver(dir);
        let synth = ActorContext::new(ActorType::Synth, "s1");

        let scope = r.build_scope(&synth, ScopeFlags::exact()).await.unwrap();
        assert_eq!(scope.entries().len(), 1);
        assert_eq!(scope.entries()[0].source, AccessSource::Own);
        assert_eq!(scope.entries()[0].context, synth);
    }

    #[tokio::test]
    async fn test_hierarchical_scope_for_synth() {
        let dir = Arc::new(StaticDirectory::new());
        dir.set_synth_class("s1", "24");
        dir.subscribe("s1", "m1");
        dir.subscribe("s1", "m2");
        let r = resolver(dir);
        let synth = ActorContext::new(ActorType::Synth, "s1");

        let scope = r
            .build_scope(&synth, ScopeFlags::hierarchical())
            .await
            .unwrap();

        assert_eq!(scope.entries().len(), 4);
        assert!(scope.contains(&ActorContext::new(ActorType::SynthClass, "24")));
        assert!(scope.contains(&ActorContext::new(ActorType::SkillModule, "m1")));
        assert!(scope.contains(&ActorContext::new(ActorType::SkillModule, "m2")));
        // Client scope stays out without an explicit opt-in
        assert!(!scope
            .entries()
            .iter()
            .any(|e| e.source == AccessSource::Organizational));
    }

    #[tokio::test]
    async fn test_client_inclusion_is_explicit() {
        let dir = Arc::new(StaticDirectory::new());
        dir.set_owning_client(ActorType::Synth, "s1", "c1");
        let r = resolver(dir);
        let synth = ActorContext::new(ActorType::Synth, "s1");

        let mut flags = ScopeFlags::exact();
        flags.include_client = true;
        let scope = r.build_scope(&synth, flags).await.unwrap();

        assert!(scope.contains(&ActorContext::new(ActorType::Client, "c1")));
    }

    #[tokio::test]
    async fn test_client_actor_does_not_duplicate_own_context() {
        let dir = Arc::new(StaticDirectory::new());
        let r = resolver(dir);
        let client = ActorContext::new(ActorType::Client, "c1");

        let mut flags = ScopeFlags::exact();
        flags.include_client = true;
        let scope = r.build_scope(&client, flags).await.unwrap();

        assert_eq!(scope.entries().len(), 1);
        assert_eq!(scope.entries()[0].source, AccessSource::Own);
    }

    #[tokio::test]
    async fn test_scope_matches_labels_access_source() {
        let dir = Arc::new(StaticDirectory::new());
        dir.set_synth_class("s1", "24");
        let r = resolver(dir);
        let synth = ActorContext::new(ActorType::Synth, "s1");
        let scope = r
            .build_scope(&synth, ScopeFlags::hierarchical())
            .await
            .unwrap();

        let own = entity_in(synth.clone());
        let inherited = entity_in(ActorContext::new(ActorType::SynthClass, "24"));
        let foreign = entity_in(ActorContext::new(ActorType::Synth, "s2"));
        let mut deleted = entity_in(synth);
        deleted.deleted_at = Some(Utc::now());

        assert_eq!(scope.matches(&own), Some(AccessSource::Own));
        assert_eq!(scope.matches(&inherited), Some(AccessSource::InheritedTemplate));
        assert_eq!(scope.matches(&foreign), None);
        assert_eq!(scope.matches(&deleted), None);
    }

    #[tokio::test]
    async fn test_invalidate_forces_requery() {
        let dir = Arc::new(StaticDirectory::new());
        dir.subscribe("s1", "m1");
        let r = resolver(dir.clone());
        let synth = ActorContext::new(ActorType::Synth, "s1");

        assert_eq!(r.resolve_skill_modules(&synth).await.unwrap(), vec!["m1"]);

        // Subscription change is invisible until invalidated
        dir.subscribe("s1", "m2");
        assert_eq!(r.resolve_skill_modules(&synth).await.unwrap(), vec!["m1"]);

        r.invalidate(ActorType::Synth, "s1");
        assert_eq!(
            r.resolve_skill_modules(&synth).await.unwrap(),
            vec!["m1", "m2"]
        );
    }

    #[tokio::test]
    async fn test_client_cache_keys_actor_type_and_id() {
        let dir = Arc::new(StaticDirectory::new());
        dir.set_owning_client(ActorType::Synth, "42", "c-synth");
        dir.set_owning_client(ActorType::Human, "42", "c-human");
        let r = resolver(dir.clone());
        let synth = ActorContext::new(ActorType::Synth, "42");
        let human = ActorContext::new(ActorType::Human, "42");

        // Prime the synth's entry, then resolve the human sharing the id
        assert_eq!(
            r.resolve_client(&synth).await.unwrap(),
            Some("c-synth".to_string())
        );
        assert_eq!(
            r.resolve_client(&human).await.unwrap(),
            Some("c-human".to_string())
        );

        // Invalidating one type leaves the other's cached entry intact
        dir.set_owning_client(ActorType::Synth, "42", "c-moved");
        dir.set_owning_client(ActorType::Human, "42", "c-h-moved");
        r.invalidate(ActorType::Synth, "42");
        assert_eq!(
            r.resolve_client(&synth).await.unwrap(),
            Some("c-moved".to_string())
        );
        assert_eq!(
            r.resolve_client(&human).await.unwrap(),
            Some("c-human".to_string())
        );
    }

    #[test]
    fn test_access_source_wire_names() {
        assert_eq!(
            serde_json::to_string(&AccessSource::InheritedTemplate).unwrap(),
            "\"inherited_template\""
        );
        assert_eq!(
            serde_json::to_string(&AccessSource::Organizational).unwrap(),
            "\"organizational\""
        );
    }
}
