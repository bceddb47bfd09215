//! Lattice Memory
//!
//! Multi-tenant knowledge-graph memory store. Callers record typed
//! entities, append-only observations, and typed relations, each owned by
//! exactly one actor context, and query them back through a hierarchical
//! access engine that can transparently widen a synth's read scope to its
//! class template, its subscribed skill modules, and (on explicit opt-in)
//! its owning client organization.
//!
//! ## Features
//!
//! - **Strict write isolation** - every write lands in exactly one actor
//!   context; hierarchy expansion applies to reads only
//! - **Hierarchical retrieval** - scope filters composed from the actor's
//!   class and active skill-module subscriptions, each hit tagged with the
//!   context it came from
//! - **Semantic search** - cosine-ranked retrieval over entity embeddings
//!   regenerated from the full observation set on every write
//! - **Bounded graph traversal** - breadth-first connection finding with a
//!   hop ceiling and explored-node cap
//!
//! ## Example
//!
//! ```ignore
//! use lattice_memory::{ActorType, MemoryService, StaticDirectory, HashingEmbedder};
//!
//! let service = MemoryService::new(directory, embedder, Default::default());
//!
//! service
//!     .create_entities(ActorType::Synth, "synth-1", vec![entity_draft])
//!     .await?;
//!
//! let hits = service
//!     .search(ActorType::Synth, "synth-1", "blog procedures", Default::default(), true)
//!     .await?;
//! ```

pub mod actor;
pub mod cache;
pub mod config;
pub mod connections;
pub mod directory;
pub mod embedding;
pub mod error;
pub mod hierarchy;
pub mod model;
pub mod search;
pub mod service;
pub mod store;
pub mod validator;

// Re-exports for convenience
pub use actor::{ActorContext, ActorType};
pub use cache::{CacheStats, TtlCache};
pub use config::MemoryConfig;
pub use connections::{
    ConnectionPath, ConnectionResult, ReachableEntity, TraversalLimits, TraversedEdge,
};
pub use directory::{ActorDirectory, StaticDirectory};
pub use embedding::{cosine_similarity, EmbeddingProvider, HashingEmbedder};
pub use error::{CrossContextDenied, MemoryError, Result};
pub use hierarchy::{AccessSource, HierarchyResolver, ScopeEntry, ScopeFilter, ScopeFlags};
pub use model::{
    DeleteOutcome, EntityDraft, EntityView, GraphView, ObservationAdd, ObservationDraft,
    ObservationOutcome, ObservationView, RelationDraft, RelationKey, RelationView,
};
pub use search::{SearchHit, SearchOptions};
pub use service::{MemoryService, ServiceCacheStats};
pub use store::{AcceptAll, MemoryStore, ObservationCheck, ObservationValidator};
pub use validator::{
    ActorValidator, LogMetrics, NullMetrics, ValidationAudit, ValidationMetrics,
};
