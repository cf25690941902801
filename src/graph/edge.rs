//! Relationships, associations and observations

use super::network::NetworkId;
use super::node::{NodeId, NodeKind};
use serde::{Deserialize, Serialize};

/// Relationship types of the catalogue ontology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Relationship {
    /// Taxon → Association
    ParticipatesIn,
    /// Association → Network
    BelongsTo,
    /// Network → ProvenanceRecord
    DerivedFrom,
    /// Sample → Network
    MeasuredIn,
    /// Taxon → ancestor Taxon
    PartOf,
    /// Taxon → Sample, carries an abundance
    FoundIn,
}

impl Relationship {
    pub const ALL: [Relationship; 6] = [
        Relationship::ParticipatesIn,
        Relationship::BelongsTo,
        Relationship::DerivedFrom,
        Relationship::MeasuredIn,
        Relationship::PartOf,
        Relationship::FoundIn,
    ];

    /// The legal (from, to) node kinds of this relationship
    pub fn endpoints(&self) -> (NodeKind, NodeKind) {
        match self {
            Relationship::ParticipatesIn => (NodeKind::Taxon, NodeKind::Association),
            Relationship::BelongsTo => (NodeKind::Association, NodeKind::Network),
            Relationship::DerivedFrom => (NodeKind::Network, NodeKind::Provenance),
            Relationship::MeasuredIn => (NodeKind::Sample, NodeKind::Network),
            Relationship::PartOf => (NodeKind::Taxon, NodeKind::Taxon),
            Relationship::FoundIn => (NodeKind::Taxon, NodeKind::Sample),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Relationship::ParticipatesIn => "PARTICIPATES_IN",
            Relationship::BelongsTo => "BELONGS_TO",
            Relationship::DerivedFrom => "DERIVED_FROM",
            Relationship::MeasuredIn => "MEASURED_IN",
            Relationship::PartOf => "PART_OF",
            Relationship::FoundIn => "FOUND_IN",
        }
    }
}

impl std::fmt::Display for Relationship {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of an association
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sign {
    Negative,
    Positive,
}

impl Sign {
    /// Sign of a weight; zero and NaN have none
    pub fn of(weight: f64) -> Option<Self> {
        if weight > 0.0 {
            Some(Sign::Positive)
        } else if weight < 0.0 {
            Some(Sign::Negative)
        } else {
            None
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            Sign::Negative => -1,
            Sign::Positive => 1,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(Sign::Positive),
            -1 => Some(Sign::Negative),
            _ => None,
        }
    }
}

impl std::str::FromStr for Sign {
    type Err = String;

    /// Accepts `+`/`-`, `1`/`-1`/`+1` and the words positive/negative
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "+" | "1" | "+1" | "positive" | "pos" => Ok(Sign::Positive),
            "-" | "-1" | "negative" | "neg" => Ok(Sign::Negative),
            other => Err(format!("unknown sign '{}'", other)),
        }
    }
}

/// Unordered pair of taxa, stored in canonical (sorted) order
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaxonPair {
    pub a: NodeId,
    pub b: NodeId,
}

impl TaxonPair {
    pub fn new(x: NodeId, y: NodeId) -> Self {
        if x <= y {
            Self { a: x, b: y }
        } else {
            Self { a: y, b: x }
        }
    }

    pub fn is_self_loop(&self) -> bool {
        self.a == self.b
    }
}

/// An undirected association between two taxa, scoped to one network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Association {
    pub id: NodeId,
    pub network_id: NetworkId,
    pub pair: TaxonPair,
    pub weight: Option<f64>,
    pub sign: Option<Sign>,
    /// Supporting statistic, e.g. a p-value
    pub statistic: Option<f64>,
}

impl Association {
    pub fn new(network_id: NetworkId, x: NodeId, y: NodeId) -> Self {
        Self {
            id: NodeId::new(),
            network_id,
            pair: TaxonPair::new(x, y),
            weight: None,
            sign: None,
            statistic: None,
        }
    }

    /// Set the weight; the sign follows it unless set explicitly later
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self.sign = Sign::of(weight);
        self
    }

    pub fn with_sign(mut self, sign: Sign) -> Self {
        self.sign = Some(sign);
        self
    }

    pub fn with_statistic(mut self, statistic: f64) -> Self {
        self.statistic = Some(statistic);
        self
    }
}

/// Abundance of a taxon in a sample, measured within one network's import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub network_id: NetworkId,
    pub sample_id: NodeId,
    pub taxon_id: NodeId,
    pub abundance: f64,
}
