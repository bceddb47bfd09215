//! Actor types and contexts
//!
//! Every entity, observation, and relation is owned by exactly one actor
//! context: the (actor type, actor id) pair. Actor records themselves live
//! in external reference tables and are only ever validated here, never
//! created.

use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

/// The kinds of actors that can own memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    /// A human user
    Human,
    /// An AI persona
    Synth,
    /// A synth template; synths inherit its knowledge read-only
    SynthClass,
    /// An organization
    Client,
    /// A pluggable capability module synths can subscribe to
    SkillModule,
}

impl ActorType {
    /// All valid actor types, in declaration order.
    pub const ALL: [ActorType; 5] = [
        ActorType::Human,
        ActorType::Synth,
        ActorType::SynthClass,
        ActorType::Client,
        ActorType::SkillModule,
    ];

    /// Name of the external reference table holding this actor type.
    pub fn reference_table(&self) -> &'static str {
        match self {
            ActorType::Human => "client_users",
            ActorType::Synth => "synths",
            ActorType::SynthClass => "synth_classes",
            ActorType::Client => "clients",
            ActorType::SkillModule => "skill_modules",
        }
    }

    /// Wire name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::Human => "human",
            ActorType::Synth => "synth",
            ActorType::SynthClass => "synth_class",
            ActorType::Client => "client",
            ActorType::SkillModule => "skill_module",
        }
    }
}

impl std::fmt::Display for ActorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActorType {
    type Err = MemoryError;

    /// Fails closed: an unknown actor type is an error, never a default.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "human" => Ok(ActorType::Human),
            "synth" => Ok(ActorType::Synth),
            "synth_class" => Ok(ActorType::SynthClass),
            "client" => Ok(ActorType::Client),
            "skill_module" => Ok(ActorType::SkillModule),
            other => Err(MemoryError::invalid_actor_type(other)),
        }
    }
}

/// The owning scope of a set of memory records.
///
/// Actor ids are opaque strings: synth ids are UUIDs, synth-class ids are
/// small integers, and the store treats both uniformly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorContext {
    pub actor_type: ActorType,
    pub actor_id: String,
}

impl ActorContext {
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
        }
    }

    /// The client id this context trivially maps to, if any.
    ///
    /// When the actor type is `client` the actor id IS the client id; a
    /// separately stored client-id field was removed from earlier schema
    /// iterations as redundant. Non-client actors resolve their owning
    /// client through the actor directory instead.
    pub fn effective_client_id(&self) -> Option<&str> {
        match self.actor_type {
            ActorType::Client => Some(&self.actor_id),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.actor_type, self.actor_id)
    }
}
