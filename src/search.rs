//! Semantic search over entity embeddings
//!
//! Ranking is pure: the store supplies scoped candidates with their
//! embeddings, the embedding provider supplies the query vector, and this
//! module scores and orders the hits. Every hit carries the access source
//! of the context it was found in.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::embedding::cosine_similarity;
use crate::hierarchy::AccessSource;
use crate::model::EntityView;

/// Knobs for one search call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Restrict hits to these entity types; empty means all types.
    #[serde(default)]
    pub entity_types: Vec<String>,
    /// Maximum hits returned; zero falls back to the service default.
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Hits scoring below this are dropped.
    #[serde(default)]
    pub min_score: f32,
}

fn default_limit() -> usize {
    10
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            entity_types: Vec::new(),
            limit: default_limit(),
            min_score: 0.0,
        }
    }
}

/// One ranked search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub entity: EntityView,
    pub similarity: f32,
    /// Which scope the entity was visible through.
    #[serde(rename = "accessSource")]
    pub access_source: AccessSource,
}

/// Score, filter, and order candidates against a query vector.
///
/// Order is similarity descending; equal scores break toward the more
/// recently updated entity so fresh knowledge surfaces first.
pub fn rank(
    query: &[f32],
    candidates: Vec<(EntityView, Vec<f32>, AccessSource)>,
    options: &SearchOptions,
) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = candidates
        .into_iter()
        .filter(|(entity, _, _)| {
            options.entity_types.is_empty() || options.entity_types.contains(&entity.entity_type)
        })
        .map(|(entity, embedding, access_source)| SearchHit {
            similarity: cosine_similarity(query, &embedding),
            entity,
            access_source,
        })
        .filter(|hit| hit.similarity >= options.min_score)
        .collect();

    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.entity.updated_at.cmp(&a.entity.updated_at))
    });
    hits.truncate(options.limit);
    hits
}
