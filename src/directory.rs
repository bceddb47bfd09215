//! Actor directory port
//!
//! The actor reference tables (one per actor type) and the synth
//! hierarchy (class membership, skill-module subscriptions) live in an
//! external directory. This module defines the read-only port the
//! validator and resolver consume, plus a map-backed implementation for
//! tests and embedded deployments.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::collections::HashSet;

use crate::actor::ActorType;
use crate::error::Result;

/// Read-only access to the external actor directory.
///
/// Implementations issue one indexed lookup per call; the memory core
/// never creates or destroys actor records.
#[async_trait]
pub trait ActorDirectory: Send + Sync {
    /// Whether the actor id exists in the reference table for its type.
    async fn actor_exists(&self, actor_type: ActorType, actor_id: &str) -> Result<bool>;

    /// Which of the given ids exist, in one query for the whole set.
    async fn actors_existing(
        &self,
        actor_type: ActorType,
        actor_ids: &[String],
    ) -> Result<HashSet<String>>;

    /// The synth-class id a synth belongs to, if any.
    async fn synth_class_of(&self, synth_id: &str) -> Result<Option<String>>;

    /// Skill modules the synth holds an active subscription to.
    async fn skill_subscriptions(&self, synth_id: &str) -> Result<Vec<String>>;

    /// The client organization owning this actor, if known.
    async fn owning_client_of(
        &self,
        actor_type: ActorType,
        actor_id: &str,
    ) -> Result<Option<String>>;
}

/// In-process directory backed by concurrent maps.
///
/// The test suite seeds it directly; embedded deployments can treat it as
/// a snapshot of the external tables.
#[derive(Default)]
pub struct StaticDirectory {
    actors: DashSet<(ActorType, String)>,
    classes: DashMap<String, String>,
    subscriptions: DashMap<String, Vec<String>>,
    clients: DashMap<(ActorType, String), String>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an actor id as existing.
    pub fn add_actor(&self, actor_type: ActorType, actor_id: impl Into<String>) {
        self.actors.insert((actor_type, actor_id.into()));
    }

    /// Remove an actor id.
    pub fn remove_actor(&self, actor_type: ActorType, actor_id: &str) {
        self.actors.remove(&(actor_type, actor_id.to_string()));
    }

    /// Assign a synth to a synth class.
    pub fn set_synth_class(&self, synth_id: impl Into<String>, class_id: impl Into<String>) {
        self.classes.insert(synth_id.into(), class_id.into());
    }

    /// Add an active skill-module subscription for a synth.
    pub fn subscribe(&self, synth_id: impl Into<String>, module_id: impl Into<String>) {
        self.subscriptions
            .entry(synth_id.into())
            .or_default()
            .push(module_id.into());
    }

    /// Drop a subscription (deactivation).
    pub fn unsubscribe(&self, synth_id: &str, module_id: &str) {
        if let Some(mut subs) = self.subscriptions.get_mut(synth_id) {
            subs.retain(|m| m != module_id);
        }
    }

    /// Record which client owns an actor.
    pub fn set_owning_client(
        &self,
        actor_type: ActorType,
        actor_id: impl Into<String>,
        client_id: impl Into<String>,
    ) {
        self.clients
            .insert((actor_type, actor_id.into()), client_id.into());
    }
}

#[async_trait]
impl ActorDirectory for StaticDirectory {
    async fn actor_exists(&self, actor_type: ActorType, actor_id: &str) -> Result<bool> {
        Ok(self.actors.contains(&(actor_type, actor_id.to_string())))
    }

    async fn actors_existing(
        &self,
        actor_type: ActorType,
        actor_ids: &[String],
    ) -> Result<HashSet<String>> {
        Ok(actor_ids
            .iter()
            .filter(|id| self.actors.contains(&(actor_type, (*id).clone())))
            .cloned()
            .collect())
    }

    async fn synth_class_of(&self, synth_id: &str) -> Result<Option<String>> {
        Ok(self.classes.get(synth_id).map(|c| c.clone()))
    }

    async fn skill_subscriptions(&self, synth_id: &str) -> Result<Vec<String>> {
        Ok(self
            .subscriptions
            .get(synth_id)
            .map(|s| s.clone())
            .unwrap_or_default())
    }

    async fn owning_client_of(
        &self,
        actor_type: ActorType,
        actor_id: &str,
    ) -> Result<Option<String>> {
        if actor_type == ActorType::Client {
            return Ok(Some(actor_id.to_string()));
        }
        Ok(self
            .clients
            .get(&(actor_type, actor_id.to_string()))
            .map(|c| c.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_actor_exists() {
        let dir = StaticDirectory::new();
        dir.add_actor(ActorType::Synth, "s1");

        assert!(dir.actor_exists(ActorType::Synth, "s1").await.unwrap());
        assert!(!dir.actor_exists(ActorType::Synth, "s2").await.unwrap());
        assert!(!dir.actor_exists(ActorType::Human, "s1").await.unwrap());
    }

    #[tokio::test]
    async fn test_batch_existence() {
        let dir = StaticDirectory::new();
        dir.add_actor(ActorType::Client, "c1");
        dir.add_actor(ActorType::Client, "c2");

        let ids = vec!["c1".to_string(), "c2".to_string(), "c3".to_string()];
        let existing = dir.actors_existing(ActorType::Client, &ids).await.unwrap();
        assert_eq!(existing.len(), 2);
        assert!(existing.contains("c1"));
        assert!(!existing.contains("c3"));
    }

    #[tokio::test]
    async fn test_subscriptions_and_class() {
        let dir = StaticDirectory::new();
        dir.set_synth_class("s1", "24");
        dir.subscribe("s1", "m1");
        dir.subscribe("s1", "m2");
        dir.unsubscribe("s1", "m1");

        assert_eq!(
            dir.synth_class_of("s1").await.unwrap(),
            Some("24".to_string())
        );
        assert_eq!(
            dir.skill_subscriptions("s1").await.unwrap(),
            vec!["m2".to_string()]
        );
        assert_eq!(dir.synth_class_of("s2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_owning_client_of_client_is_itself() {
        let dir = StaticDirectory::new();
        assert_eq!(
            dir.owning_client_of(ActorType::Client, "c9").await.unwrap(),
            Some("c9".to_string())
        );
    }
}
