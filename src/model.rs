//! Memory records, write drafts, and read views
//!
//! Records are what the store keeps; drafts are what write operations
//! accept; views are what read operations return (entity views carry the
//! full observation list the way callers expect it).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::actor::ActorContext;

/// Free-form metadata map attached to entities and relations.
pub type Metadata = serde_json::Map<String, Value>;

/// A named, typed knowledge node owned by one actor context.
///
/// Invariant: (context, name) is unique among non-deleted entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: Uuid,
    pub context: ActorContext,
    pub name: String,
    pub entity_type: String,
    /// Similarity-search vector, regenerated from the full observation set
    /// on every write that touches the entity.
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
    /// Identity-resolution merge target, when this entity is an alias.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias_of: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_confidence: Option<f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl EntityRecord {
    /// Whether this entity is visible to reads.
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// An immutable fact attached to exactly one entity.
///
/// Observations are append-only: never mutated, never hard-deleted. Only
/// the parent entity's soft delete hides them from reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub observation_type: String,
    pub value: Value,
    pub source: String,
    /// False when the pluggable schema validator rejected this item; the
    /// observation is stored anyway, flagged, prioritizing capture over
    /// enforcement.
    #[serde(default = "default_true")]
    pub schema_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_note: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl ObservationRecord {
    /// Duplicate rule: two observations are the same fact when their type
    /// and value both match exactly.
    pub fn same_fact(&self, observation_type: &str, value: &Value) -> bool {
        self.observation_type == observation_type && &self.value == value
    }
}

/// A typed, directed edge between two entities in the same context.
///
/// Invariant: both endpoints exist non-deleted in the owning context at
/// creation time; duplicate (from, to, type) triples merge metadata rather
/// than duplicating the edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationRecord {
    pub id: Uuid,
    pub context: ActorContext,
    pub from_entity_id: Uuid,
    pub to_entity_id: Uuid,
    pub from_entity_name: String,
    pub to_entity_name: String,
    pub relation_type: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl RelationRecord {
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Whether the given entity id is either endpoint.
    pub fn touches(&self, entity_id: Uuid) -> bool {
        self.from_entity_id == entity_id || self.to_entity_id == entity_id
    }
}

// ==========================================
// Write drafts
// ==========================================

/// One observation to record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationDraft {
    #[serde(rename = "type")]
    pub observation_type: String,
    pub value: Value,
    /// Defaults to "api" when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl ObservationDraft {
    pub fn new(observation_type: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            observation_type: observation_type.into(),
            value: value.into(),
            source: None,
            metadata: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn source_or_default(&self) -> &str {
        self.source.as_deref().unwrap_or("api")
    }
}

/// An entity to create or merge into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDraft {
    pub name: String,
    #[serde(rename = "entityType")]
    pub entity_type: String,
    #[serde(default)]
    pub observations: Vec<ObservationDraft>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(rename = "aliasOf", skip_serializing_if = "Option::is_none")]
    pub alias_of: Option<String>,
    #[serde(rename = "identityConfidence", skip_serializing_if = "Option::is_none")]
    pub identity_confidence: Option<f32>,
}

impl EntityDraft {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            observations: Vec::new(),
            metadata: None,
            alias_of: None,
            identity_confidence: None,
        }
    }

    pub fn observation(mut self, draft: ObservationDraft) -> Self {
        self.observations.push(draft);
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Observations to append to one named, existing entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationAdd {
    #[serde(rename = "entityName")]
    pub entity_name: String,
    pub contents: Vec<ObservationDraft>,
}

/// A relation to create between two named entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationDraft {
    pub from_entity_name: String,
    pub to_entity_name: String,
    #[serde(rename = "relationType")]
    pub relation_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl RelationDraft {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        relation_type: impl Into<String>,
    ) -> Self {
        Self {
            from_entity_name: from.into(),
            to_entity_name: to.into(),
            relation_type: relation_type.into(),
            metadata: None,
        }
    }
}

/// Identifies one relation for deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationKey {
    pub from_entity_name: String,
    pub to_entity_name: String,
    pub relation_type: String,
}

// ==========================================
// Read views and outcomes
// ==========================================

/// Entity as returned to callers, observations inlined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityView {
    pub id: Uuid,
    pub entity_name: String,
    pub entity_type: String,
    pub observations: Vec<ObservationView>,
    pub metadata: Metadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias_of: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_confidence: Option<f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Observation as returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationView {
    #[serde(rename = "type")]
    pub observation_type: String,
    pub value: Value,
    pub source: String,
    #[serde(default = "default_true")]
    pub schema_valid: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&ObservationRecord> for ObservationView {
    fn from(rec: &ObservationRecord) -> Self {
        Self {
            observation_type: rec.observation_type.clone(),
            value: rec.value.clone(),
            source: rec.source.clone(),
            schema_valid: rec.schema_valid,
            created_at: rec.created_at,
        }
    }
}

/// Relation as returned to callers, endpoint names and types resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationView {
    pub id: Uuid,
    pub from_entity_name: String,
    pub from_entity_type: Option<String>,
    pub to_entity_name: String,
    pub to_entity_type: Option<String>,
    pub relation_type: String,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

/// Everything an actor context owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphView {
    pub entities: Vec<EntityView>,
    pub relations: Vec<RelationView>,
    pub total_entities: usize,
    pub total_relations: usize,
}

/// Result of appending observations to one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationOutcome {
    #[serde(rename = "entityName")]
    pub entity_name: String,
    #[serde(rename = "addedObservations")]
    pub added: usize,
    #[serde(rename = "totalObservations")]
    pub total: usize,
}

/// Result of a soft delete with relation cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub deleted_entities: usize,
    pub deleted_relations: usize,
}

/// Assemble the text an entity's embedding is generated from.
///
/// Concatenates name, type, and the full observation set; the resulting
/// string is what the embedding provider vectorizes.
pub fn searchable_text(name: &str, entity_type: &str, observations: &[ObservationRecord]) -> String {
    let mut parts = vec![format!("Entity: {name}"), format!("Type: {entity_type}")];

    for obs in observations {
        let value = match &obs.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        parts.push(format!("{}: {}", obs.observation_type, value));
        if obs.source != "api" {
            parts.push(format!("Source: {}", obs.source));
        }
    }

    parts.join(" | ")
}
