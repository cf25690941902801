//! Provenance data types

use crate::graph::{NetworkId, NodeKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a provenance record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvenanceId(String);

impl ProvenanceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ProvenanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProvenanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What an import did to an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityAction {
    Created,
    Modified,
    /// Existing shared entity used without change
    Referenced,
}

impl EntityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Referenced => "referenced",
        }
    }
}

impl std::str::FromStr for EntityAction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "modified" => Ok(Self::Modified),
            "referenced" => Ok(Self::Referenced),
            _ => Err(format!("unknown entity action: {}", s)),
        }
    }
}

/// An entity touched by an import
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AffectedEntity {
    pub kind: NodeKind,
    pub id: String,
    pub action: EntityAction,
}

impl AffectedEntity {
    pub fn new(kind: NodeKind, id: impl Into<String>, action: EntityAction) -> Self {
        Self {
            kind,
            id: id.into(),
            action,
        }
    }
}

/// Immutable record of how a network entered the catalogue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub id: ProvenanceId,
    pub network_id: NetworkId,
    pub source_path: String,
    /// SHA-256 of the source bytes, hex encoded
    pub source_checksum: String,
    pub parameters: serde_json::Value,
    /// SHA-256 of the canonical parameter JSON
    pub parameters_hash: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<AffectedEntity>,
}

impl ProvenanceRecord {
    /// Entities with the given action
    pub fn entities_with(&self, action: EntityAction) -> impl Iterator<Item = &AffectedEntity> {
        self.entities.iter().filter(move |e| e.action == action)
    }
}
