//! Actor existence validation
//!
//! Confirms an actor id is a live row in the reference table for its
//! actor type. Results are TTL-cached; every call, hit or miss, emits an
//! audit record to a metrics sink, and a sink failure never fails the
//! validation itself.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::actor::ActorType;
use crate::cache::{CacheStats, TtlCache};
use crate::directory::ActorDirectory;
use crate::error::Result;

/// One validation event, cache hit or miss.
#[derive(Debug, Clone)]
pub struct ValidationAudit {
    pub actor_type: ActorType,
    pub actor_id: String,
    pub result: bool,
    pub latency: Duration,
    pub cache_hit: bool,
    pub error: Option<String>,
}

/// Sink for validation audit records.
#[async_trait]
pub trait ValidationMetrics: Send + Sync {
    async fn record(&self, audit: &ValidationAudit) -> Result<()>;
}

/// Discards every audit record.
pub struct NullMetrics;

#[async_trait]
impl ValidationMetrics for NullMetrics {
    async fn record(&self, _audit: &ValidationAudit) -> Result<()> {
        Ok(())
    }
}

/// Emits audit records as structured tracing events.
pub struct LogMetrics;

#[async_trait]
impl ValidationMetrics for LogMetrics {
    async fn record(&self, audit: &ValidationAudit) -> Result<()> {
        tracing::debug!(
            actor_type = %audit.actor_type,
            actor_id = %audit.actor_id,
            result = audit.result,
            latency_ms = audit.latency.as_millis() as u64,
            cache_hit = audit.cache_hit,
            error = audit.error.as_deref(),
            "actor validation"
        );
        Ok(())
    }
}

/// Validates actor ids against their reference tables, with caching.
pub struct ActorValidator<D: ActorDirectory> {
    directory: Arc<D>,
    cache: TtlCache<bool>,
    metrics: Arc<dyn ValidationMetrics>,
}

impl<D: ActorDirectory> ActorValidator<D> {
    pub fn new(directory: Arc<D>, ttl: Duration, metrics: Arc<dyn ValidationMetrics>) -> Self {
        Self {
            directory,
            cache: TtlCache::new(ttl),
            metrics,
        }
    }

    fn cache_key(actor_type: ActorType, actor_id: &str) -> String {
        format!("{actor_type}:{actor_id}")
    }

    async fn emit(&self, audit: ValidationAudit) {
        if let Err(e) = self.metrics.record(&audit).await {
            // Metrics must never fail the validation itself.
            tracing::warn!(error = %e, "failed to record validation metric");
        }
    }

    /// Whether the actor id exists for its type.
    ///
    /// Unknown actor types never reach this method: `ActorType` parsing
    /// fails closed at the boundary. Directory failures propagate after
    /// being audited.
    pub async fn validate(&self, actor_type: ActorType, actor_id: &str) -> Result<bool> {
        let start = Instant::now();
        let key = Self::cache_key(actor_type, actor_id);

        if let Some(cached) = self.cache.get(&key) {
            self.emit(ValidationAudit {
                actor_type,
                actor_id: actor_id.to_string(),
                result: cached,
                latency: start.elapsed(),
                cache_hit: true,
                error: None,
            })
            .await;
            return Ok(cached);
        }

        match self.directory.actor_exists(actor_type, actor_id).await {
            Ok(exists) => {
                self.cache.set(key, exists);
                self.emit(ValidationAudit {
                    actor_type,
                    actor_id: actor_id.to_string(),
                    result: exists,
                    latency: start.elapsed(),
                    cache_hit: false,
                    error: None,
                })
                .await;
                Ok(exists)
            }
            Err(e) => {
                self.emit(ValidationAudit {
                    actor_type,
                    actor_id: actor_id.to_string(),
                    result: false,
                    latency: start.elapsed(),
                    cache_hit: false,
                    error: Some(e.to_string()),
                })
                .await;
                Err(e)
            }
        }
    }

    /// Validate a set of actors, grouping uncached lookups into one
    /// directory query per type. The cache is updated for every result.
    pub async fn validate_batch(
        &self,
        actors: &[(ActorType, String)],
    ) -> Result<HashMap<(ActorType, String), bool>> {
        let mut results = HashMap::new();
        let mut uncached: HashMap<ActorType, Vec<String>> = HashMap::new();

        for (actor_type, actor_id) in actors {
            let key = Self::cache_key(*actor_type, actor_id);
            if let Some(cached) = self.cache.get(&key) {
                results.insert((*actor_type, actor_id.clone()), cached);
            } else {
                uncached.entry(*actor_type).or_default().push(actor_id.clone());
            }
        }

        for (actor_type, ids) in uncached {
            let existing = self.directory.actors_existing(actor_type, &ids).await?;
            for id in ids {
                let exists = existing.contains(&id);
                self.cache.set(Self::cache_key(actor_type, &id), exists);
                results.insert((actor_type, id), exists);
            }
        }

        Ok(results)
    }

    /// Drop the cached result for one actor.
    pub fn invalidate(&self, actor_type: ActorType, actor_id: &str) {
        self.cache.invalidate(&Self::cache_key(actor_type, actor_id));
    }

    /// Drop cached results for one actor type.
    pub fn invalidate_type(&self, actor_type: ActorType) {
        self.cache.invalidate_prefix(&format!("{actor_type}:"));
    }

    /// Drop every cached result.
    pub fn invalidate_all(&self) {
        self.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticDirectory;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingMetrics {
        records: AtomicUsize,
        hits: AtomicUsize,
    }

    #[async_trait]
    impl ValidationMetrics for CountingMetrics {
        async fn record(&self, audit: &ValidationAudit) -> Result<()> {
            self.records.fetch_add(1, Ordering::SeqCst);
            if audit.cache_hit {
                self.hits.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    struct FailingMetrics;

    #[async_trait]
    impl ValidationMetrics for FailingMetrics {
        async fn record(&self, _audit: &ValidationAudit) -> Result<()> {
            Err(crate::error::MemoryError::storage("metrics table down"))
        }
    }

    fn validator_with(
        dir: Arc<StaticDirectory>,
        metrics: Arc<dyn ValidationMetrics>,
    ) -> ActorValidator<StaticDirectory> {
        ActorValidator::new(dir, Duration::from_secs(3600), metrics)
    }

    #[tokio::test]
    async fn test_validate_known_and_unknown_ids() {
        let dir = Arc::new(StaticDirectory::new());
        dir.add_actor(ActorType::Synth, "s1");
        let validator = validator_with(dir, Arc::new(NullMetrics));

        assert!(validator.validate(ActorType::Synth, "s1").await.unwrap());
        assert!(!validator.validate(ActorType::Synth, "s2").await.unwrap());
    }

    #[tokio::test]
    async fn test_every_call_is_audited_including_cache_hits() {
        let dir = Arc::new(StaticDirectory::new());
        dir.add_actor(ActorType::Human, "h1");
        let metrics = Arc::new(CountingMetrics {
            records: AtomicUsize::new(0),
            hits: AtomicUsize::new(0),
        });
        let validator = validator_with(dir, metrics.clone());

        validator.validate(ActorType::Human, "h1").await.unwrap();
        validator.validate(ActorType::Human, "h1").await.unwrap();

        assert_eq!(metrics.records.load(Ordering::SeqCst), 2);
        assert_eq!(metrics.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_metrics_failure_does_not_fail_validation() {
        let dir = Arc::new(StaticDirectory::new());
        dir.add_actor(ActorType::Client, "c1");
        let validator = validator_with(dir, Arc::new(FailingMetrics));

        assert!(validator.validate(ActorType::Client, "c1").await.unwrap());
    }

    #[tokio::test]
    async fn test_cached_result_survives_directory_change_until_invalidated() {
        let dir = Arc::new(StaticDirectory::new());
        dir.add_actor(ActorType::Synth, "s1");
        let validator = validator_with(dir.clone(), Arc::new(NullMetrics));

        assert!(validator.validate(ActorType::Synth, "s1").await.unwrap());
        dir.remove_actor(ActorType::Synth, "s1");
        // Stale but cached
        assert!(validator.validate(ActorType::Synth, "s1").await.unwrap());

        validator.invalidate_type(ActorType::Synth);
        assert!(!validator.validate(ActorType::Synth, "s1").await.unwrap());
    }

    #[tokio::test]
    async fn test_batch_groups_and_caches() {
        let dir = Arc::new(StaticDirectory::new());
        dir.add_actor(ActorType::Synth, "s1");
        dir.add_actor(ActorType::Client, "c1");
        let validator = validator_with(dir, Arc::new(NullMetrics));

        let actors = vec![
            (ActorType::Synth, "s1".to_string()),
            (ActorType::Synth, "s2".to_string()),
            (ActorType::Client, "c1".to_string()),
        ];
        let results = validator.validate_batch(&actors).await.unwrap();

        assert_eq!(results[&(ActorType::Synth, "s1".to_string())], true);
        assert_eq!(results[&(ActorType::Synth, "s2".to_string())], false);
        assert_eq!(results[&(ActorType::Client, "c1".to_string())], true);

        // Batch results land in the cache
        let stats = validator.cache_stats();
        assert_eq!(stats.entries, 3);
    }
}
