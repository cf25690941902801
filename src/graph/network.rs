//! Networks: one per successful import

use crate::provenance::ProvenanceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a network
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkId(String);

impl NetworkId {
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

impl Default for NetworkId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NetworkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NetworkId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A stored network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub id: NetworkId,
    pub name: String,
    /// Starts at 1; (name, version) is unique
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub source_path: String,
    pub provenance_id: ProvenanceId,
}

impl NetworkInfo {
    /// `name@version`, the label used in derived views
    pub fn label(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

/// Summary row for listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSummary {
    pub info: NetworkInfo,
    pub associations: usize,
    pub taxa: usize,
    pub samples: usize,
}
