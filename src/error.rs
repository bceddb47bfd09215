//! Error types for lattice-memory

use thiserror::Error;

use crate::actor::ActorType;

/// Reason codes for a rejected cross-context write.
///
/// A synth may write into a skill module's context only when it is itself
/// valid, the module exists, and an active subscription links the two.
/// Each missing condition has its own code so callers can correct it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CrossContextDenied {
    /// Only synth actors may target a skill-module context
    #[error("actor is not a synth")]
    NotASynth,
    /// The target skill module does not exist
    #[error("unknown skill module: {0}")]
    UnknownModule(String),
    /// No active subscription links the synth to the module
    #[error("synth {synth_id} is not subscribed to skill module {module_id}")]
    NotSubscribed { synth_id: String, module_id: String },
}

/// Errors that can occur in the memory system
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Named entity absent in the target scope
    #[error("Entity not found: {0}")]
    NotFound(String),

    /// Actor type string outside the known set; fails closed
    #[error("Invalid actor_type '{0}'. Valid types are: human, synth, synth_class, client, skill_module")]
    InvalidActorType(String),

    /// Actor id missing from its reference table
    #[error("Invalid actor: {actor_type} '{actor_id}' does not exist")]
    InvalidActor {
        actor_type: ActorType,
        actor_id: String,
    },

    /// Skill-module-context write attempted without authorization
    #[error("Cross-context write denied: {0}")]
    CrossContext(#[from] CrossContextDenied),

    /// Embedding provider failure
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Backing store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl MemoryError {
    /// Create a not found error
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound(name.into())
    }

    /// Create an invalid actor-type error
    pub fn invalid_actor_type(s: impl Into<String>) -> Self {
        Self::InvalidActorType(s.into())
    }

    /// Create an invalid actor error
    pub fn invalid_actor(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self::InvalidActor {
            actor_type,
            actor_id: actor_id.into(),
        }
    }

    /// Create an embedding error
    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::Embedding(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// Result type for memory operations
pub type Result<T> = std::result::Result<T, MemoryError>;
