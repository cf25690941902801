//! Node representation: taxa, samples and the kinds of node the catalogue stores

use super::taxonomy::Rank;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Unique identifier for a node
///
/// Serializes as a plain string. Taxa and samples get deterministic ids
/// derived from their identity key, every other node gets a random one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a new random NodeId
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Deterministic id for the taxon identified by `(name, rank)`
    pub fn for_taxon(name: &str, rank: Rank) -> Self {
        let key = format!("mako:taxon:{}:{}", rank.as_str(), name);
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string())
    }

    /// Deterministic id for the sample identified by `identifier`
    pub fn for_sample(identifier: &str) -> Self {
        let key = format!("mako:sample:{}", identifier);
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string())
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The node types of the catalogue ontology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Taxon,
    Sample,
    Network,
    Association,
    Provenance,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Taxon => "taxon",
            NodeKind::Sample => "sample",
            NodeKind::Network => "network",
            NodeKind::Association => "association",
            NodeKind::Provenance => "provenance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "taxon" => Some(NodeKind::Taxon),
            "sample" => Some(NodeKind::Sample),
            "network" => Some(NodeKind::Network),
            "association" => Some(NodeKind::Association),
            "provenance" => Some(NodeKind::Provenance),
            _ => None,
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A taxon, shared by every network that references it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Taxon {
    pub id: NodeId,
    pub name: String,
    pub rank: Rank,
    /// Identifier in an external taxonomy (e.g. an NCBI taxid)
    pub external_ref: Option<String>,
}

impl Taxon {
    pub fn new(name: impl Into<String>, rank: Rank) -> Self {
        let name = name.into();
        Self {
            id: NodeId::for_taxon(&name, rank),
            name,
            rank,
            external_ref: None,
        }
    }

    pub fn with_external_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.external_ref = Some(external_ref.into());
        self
    }
}

/// A sample (or experiment) that abundances were measured in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub id: NodeId,
    pub identifier: String,
    pub metadata: BTreeMap<String, String>,
}

impl Sample {
    pub fn new(identifier: impl Into<String>) -> Self {
        let identifier = identifier.into();
        Self {
            id: NodeId::for_sample(&identifier),
            identifier,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxon_ids_are_deterministic() {
        let a = Taxon::new("Bacteroides", Rank::Genus);
        let b = Taxon::new("Bacteroides", Rank::Genus);
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn taxon_id_depends_on_rank() {
        let genus = NodeId::for_taxon("Bacteroides", Rank::Genus);
        let otu = NodeId::for_taxon("Bacteroides", Rank::Otu);
        assert_ne!(genus, otu);
    }

    #[test]
    fn sample_and_taxon_namespaces_differ() {
        assert_ne!(NodeId::for_sample("S1"), NodeId::for_taxon("S1", Rank::Otu));
    }

    #[test]
    fn random_ids_are_unique() {
        assert_ne!(NodeId::new(), NodeId::new());
    }

    #[test]
    fn node_kind_round_trips_through_str() {
        for kind in [
            NodeKind::Taxon,
            NodeKind::Sample,
            NodeKind::Network,
            NodeKind::Association,
            NodeKind::Provenance,
        ] {
            assert_eq!(NodeKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(NodeKind::parse("specimen"), None);
    }
}
