//! Bounded graph traversal between entities
//!
//! Breadth-first search over one context's live relations. Edges are
//! traversable in both directions; walking an edge backwards reports the
//! synthetic type `reverse_<type>` so callers can tell direction. Only
//! simple paths are produced, and every search is bounded by a hop
//! ceiling and an explored-node cap.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use crate::model::{Metadata, RelationRecord};

/// One directed step taken during traversal, with the relation's
/// metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversedEdge {
    pub from: String,
    pub to: String,
    /// The relation type, prefixed with `reverse_` when walked backwards.
    pub relation_type: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// One path between two entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionPath {
    /// Entity names from start to destination, inclusive.
    pub path: Vec<String>,
    /// Edges walked, one per hop, carrying relation metadata.
    pub relationships: Vec<TraversedEdge>,
    pub length: usize,
}

/// An entity reachable from the start, with every simple path to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReachableEntity {
    pub entity_name: String,
    /// Length of the shortest path.
    pub distance: usize,
    pub paths: Vec<ConnectionPath>,
}

/// Result of a connection search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ConnectionResult {
    /// Targeted search between two named entities.
    Between {
        from_entity: String,
        to_entity: String,
        /// At most `max_paths` paths, shortest first.
        paths: Vec<ConnectionPath>,
        shortest_path_length: Option<usize>,
        /// All simple paths found within the bounds, including those
        /// beyond the returned cap.
        total_paths_found: usize,
    },
    /// Neighborhood search from one entity.
    Reachable {
        from_entity: String,
        connections: Vec<ReachableEntity>,
        total_connected_entities: usize,
    },
}

/// Hard bounds every traversal honors.
#[derive(Debug, Clone, Copy)]
pub struct TraversalLimits {
    /// Requested hop counts are clamped to this ceiling.
    pub max_hops_ceiling: usize,
    /// Search aborts after this many queue pops.
    pub max_explored_nodes: usize,
    /// Targeted search returns at most this many paths.
    pub max_paths: usize,
}

impl Default for TraversalLimits {
    fn default() -> Self {
        Self {
            max_hops_ceiling: 5,
            max_explored_nodes: 10_000,
            max_paths: 10,
        }
    }
}

/// Bidirectional adjacency over live relations, with an optional type
/// filter applied to the underlying relation type.
fn adjacency(
    relations: &[RelationRecord],
    relation_types: &[String],
) -> HashMap<String, Vec<TraversedEdge>> {
    let mut adj: HashMap<String, Vec<TraversedEdge>> = HashMap::new();
    for relation in relations {
        if !relation_types.is_empty() && !relation_types.contains(&relation.relation_type) {
            continue;
        }
        adj.entry(relation.from_entity_name.clone())
            .or_default()
            .push(TraversedEdge {
                from: relation.from_entity_name.clone(),
                to: relation.to_entity_name.clone(),
                relation_type: relation.relation_type.clone(),
                metadata: relation.metadata.clone(),
            });
        adj.entry(relation.to_entity_name.clone())
            .or_default()
            .push(TraversedEdge {
                from: relation.to_entity_name.clone(),
                to: relation.from_entity_name.clone(),
                relation_type: format!("reverse_{}", relation.relation_type),
                metadata: relation.metadata.clone(),
            });
    }
    adj
}

/// Enumerate simple paths from `from` breadth-first, invoking `record`
/// for each path of length >= 1. Returns early at the explored-node cap.
fn walk_simple_paths<F>(
    adj: &HashMap<String, Vec<TraversedEdge>>,
    from: &str,
    max_hops: usize,
    max_explored: usize,
    mut record: F,
) where
    F: FnMut(&[String], &[TraversedEdge]),
{
    let mut explored = 0usize;
    let mut queue: VecDeque<(Vec<String>, Vec<TraversedEdge>)> = VecDeque::new();
    queue.push_back((vec![from.to_string()], Vec::new()));

    while let Some((path, edges)) = queue.pop_front() {
        explored += 1;
        if explored > max_explored {
            tracing::warn!(from, "traversal aborted at explored-node cap");
            break;
        }

        if path.len() > 1 {
            record(&path, &edges);
        }
        if path.len() - 1 >= max_hops {
            continue;
        }

        let current = match path.last() {
            Some(name) => name,
            None => continue,
        };
        if let Some(next_edges) = adj.get(current) {
            for edge in next_edges {
                // Simple paths only
                if path.contains(&edge.to) {
                    continue;
                }
                let mut next_path = path.clone();
                next_path.push(edge.to.clone());
                let mut next_edges = edges.clone();
                next_edges.push(edge.clone());
                queue.push_back((next_path, next_edges));
            }
        }
    }
}

/// All simple paths from `from` to `to` within the hop bound.
///
/// Paths come out shortest-first. The returned list is capped at
/// `max_paths`, but `total_paths_found` keeps counting past the cap;
/// only the explored-node cap bounds the count itself.
pub fn find_paths_between(
    relations: &[RelationRecord],
    from: &str,
    to: &str,
    max_hops: usize,
    relation_types: &[String],
    limits: &TraversalLimits,
) -> ConnectionResult {
    let max_hops = max_hops.min(limits.max_hops_ceiling);
    let adj = adjacency(relations, relation_types);

    let mut paths: Vec<ConnectionPath> = Vec::new();
    let mut total = 0usize;
    walk_simple_paths(
        &adj,
        from,
        max_hops,
        limits.max_explored_nodes,
        |path, edges| {
            if path.last().map(String::as_str) == Some(to) {
                total += 1;
                if paths.len() < limits.max_paths {
                    paths.push(ConnectionPath {
                        length: path.len() - 1,
                        path: path.to_vec(),
                        relationships: edges.to_vec(),
                    });
                }
            }
        },
    );

    ConnectionResult::Between {
        from_entity: from.to_string(),
        to_entity: to.to_string(),
        shortest_path_length: paths.iter().map(|p| p.length).min(),
        total_paths_found: total,
        paths,
    }
}

/// Every entity reachable from `from` within the hop bound, each with
/// all of its simple paths, shortest first.
pub fn find_reachable(
    relations: &[RelationRecord],
    from: &str,
    max_hops: usize,
    relation_types: &[String],
    limits: &TraversalLimits,
) -> ConnectionResult {
    let max_hops = max_hops.min(limits.max_hops_ceiling);
    let adj = adjacency(relations, relation_types);

    let mut by_entity: HashMap<String, Vec<ConnectionPath>> = HashMap::new();
    walk_simple_paths(
        &adj,
        from,
        max_hops,
        limits.max_explored_nodes,
        |path, edges| {
            let destination = match path.last() {
                Some(name) => name.clone(),
                None => return,
            };
            by_entity.entry(destination).or_default().push(ConnectionPath {
                length: path.len() - 1,
                path: path.to_vec(),
                relationships: edges.to_vec(),
            });
        },
    );

    let mut found: Vec<ReachableEntity> = by_entity
        .into_iter()
        .map(|(entity_name, mut paths)| {
            paths.sort_by_key(|p| p.length);
            ReachableEntity {
                distance: paths.first().map(|p| p.length).unwrap_or(0),
                entity_name,
                paths,
            }
        })
        .collect();
    found.sort_by(|a, b| {
        a.distance
            .cmp(&b.distance)
            .then_with(|| a.entity_name.cmp(&b.entity_name))
    });

    ConnectionResult::Reachable {
        from_entity: from.to_string(),
        total_connected_entities: found.len(),
        connections: found,
    }
}
