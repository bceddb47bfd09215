//! Service configuration
//!
//! Deserializable so deployments can load it from a JSON config file;
//! `Default` matches production settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::connections::TraversalLimits;

/// Tuning knobs for a [`MemoryService`](crate::service::MemoryService).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Vector length the embedding provider must produce.
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
    /// Lifetime of validation and hierarchy cache entries, in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Ceiling applied to requested traversal hop counts.
    #[serde(default = "default_max_hops_ceiling")]
    pub max_hops_ceiling: usize,
    /// Explored-node cap per traversal.
    #[serde(default = "default_max_explored_nodes")]
    pub max_explored_nodes: usize,
    /// Paths collected per targeted connection search.
    #[serde(default = "default_max_connection_paths")]
    pub max_connection_paths: usize,
    /// Hits returned by search when the caller does not say.
    #[serde(default = "default_search_limit")]
    pub default_search_limit: usize,
}

fn default_embedding_dimension() -> usize {
    768
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_max_hops_ceiling() -> usize {
    5
}

fn default_max_explored_nodes() -> usize {
    10_000
}

fn default_max_connection_paths() -> usize {
    10
}

fn default_search_limit() -> usize {
    10
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            embedding_dimension: default_embedding_dimension(),
            cache_ttl_secs: default_cache_ttl_secs(),
            max_hops_ceiling: default_max_hops_ceiling(),
            max_explored_nodes: default_max_explored_nodes(),
            max_connection_paths: default_max_connection_paths(),
            default_search_limit: default_search_limit(),
        }
    }
}

impl MemoryConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn traversal_limits(&self) -> TraversalLimits {
        TraversalLimits {
            max_hops_ceiling: self.max_hops_ceiling,
            max_explored_nodes: self.max_explored_nodes,
            max_paths: self.max_connection_paths,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MemoryConfig::default();
        assert_eq!(config.embedding_dimension, 768);
        assert_eq!(config.cache_ttl(), Duration::from_secs(3600));
        assert_eq!(config.max_hops_ceiling, 5);
        assert_eq!(config.max_explored_nodes, 10_000);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: MemoryConfig = serde_json::from_str(r#"{"cache_ttl_secs": 60}"#).unwrap();
        assert_eq!(config.cache_ttl_secs, 60);
        assert_eq!(config.default_search_limit, 10);
    }
}
