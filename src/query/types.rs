//! Query types and result structures
//!
//! Every query result is a derived, read-only view. Nothing here writes to
//! the store.

use crate::graph::{Association, NetworkId, NetworkInfo, NodeId, Rank, Sign, Taxon, TaxonPair};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

/// Display data for a taxon in a derived view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonLabel {
    pub name: String,
    pub rank: Rank,
}

impl From<&Taxon> for TaxonLabel {
    fn from(taxon: &Taxon) -> Self {
        Self {
            name: taxon.name.clone(),
            rank: taxon.rank,
        }
    }
}

/// A network that contributed to a derived view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRef {
    pub id: NetworkId,
    pub name: String,
    pub version: u32,
}

impl NetworkRef {
    pub fn label(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

impl From<&NetworkInfo> for NetworkRef {
    fn from(info: &NetworkInfo) -> Self {
        Self {
            id: info.id.clone(),
            name: info.name.clone(),
            version: info.version,
        }
    }
}

/// One network's weight for an edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcedWeight {
    pub network: NetworkId,
    pub weight: Option<f64>,
    pub sign: Option<Sign>,
}

/// Identity of an edge within a derived view
///
/// `sign` is only set by sign-aware operations, where a positive and a
/// negative association between the same taxa are different edges.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    pub pair: TaxonPair,
    pub sign: Option<Sign>,
}

impl EdgeKey {
    pub fn unsigned(pair: TaxonPair) -> Self {
        Self { pair, sign: None }
    }
}

/// An edge of a derived view, carrying every contributing network's weight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedEdge {
    pub pair: TaxonPair,
    pub sign: Option<Sign>,
    /// In contribution order
    pub weights: Vec<SourcedWeight>,
    /// Single value when a merge mode was requested
    pub merged: Option<f64>,
}

impl DerivedEdge {
    pub fn new(pair: TaxonPair, sign: Option<Sign>) -> Self {
        Self {
            pair,
            sign,
            weights: Vec::new(),
            merged: None,
        }
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            pair: self.pair.clone(),
            sign: self.sign,
        }
    }

    /// Add a contribution unless that network already contributed
    pub fn add_weight(&mut self, weight: SourcedWeight) {
        if !self.weights.iter().any(|w| w.network == weight.network) {
            self.weights.push(weight);
        }
    }

    /// Contributing networks in contribution order
    pub fn networks(&self) -> Vec<&NetworkId> {
        self.weights.iter().map(|w| &w.network).collect()
    }

    /// The numeric weights that are present
    pub fn weight_values(&self) -> Vec<f64> {
        self.weights.iter().filter_map(|w| w.weight).collect()
    }

    /// The sign every contribution agrees on, if any
    pub fn consensus_sign(&self) -> Option<Sign> {
        if self.sign.is_some() {
            return self.sign;
        }
        let mut signs = self.weights.iter().map(|w| w.sign);
        let first = signs.next()??;
        signs.all(|s| s == Some(first)).then_some(first)
    }

    /// A single weight: the merged value, or the only contribution
    pub fn weight(&self) -> Option<f64> {
        if self.merged.is_some() {
            return self.merged;
        }
        match self.weight_values().as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }
}

/// A set of edges derived from one or more networks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSet {
    pub name: String,
    pub networks: Vec<NetworkRef>,
    pub taxa: BTreeMap<NodeId, TaxonLabel>,
    pub edges: BTreeMap<EdgeKey, DerivedEdge>,
}

impl EdgeSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            networks: Vec::new(),
            taxa: BTreeMap::new(),
            edges: BTreeMap::new(),
        }
    }

    /// The edge set of a single stored network
    pub fn from_network(info: &NetworkInfo, taxa: &[Taxon], associations: &[Association]) -> Self {
        let mut set = Self::new(info.label());
        set.networks.push(NetworkRef::from(info));
        set.taxa = taxa.iter().map(|t| (t.id.clone(), TaxonLabel::from(t))).collect();

        for assoc in associations {
            let mut edge = DerivedEdge::new(assoc.pair.clone(), None);
            edge.add_weight(SourcedWeight {
                network: assoc.network_id.clone(),
                weight: assoc.weight,
                sign: assoc.sign,
            });
            set.edges.insert(edge.key(), edge);
        }
        set
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn pairs(&self) -> BTreeSet<&TaxonPair> {
        self.edges.keys().map(|k| &k.pair).collect()
    }

    pub fn contains_pair(&self, pair: &TaxonPair) -> bool {
        self.edges.keys().any(|k| &k.pair == pair)
    }

    /// First edge between the two taxa, in key order
    pub fn edge(&self, x: &NodeId, y: &NodeId) -> Option<&DerivedEdge> {
        let pair = TaxonPair::new(x.clone(), y.clone());
        self.edges.values().find(|e| e.pair == pair)
    }

    /// Label of a taxon, falling back to its id
    pub fn label(&self, id: &NodeId) -> String {
        self.taxa
            .get(id)
            .map(|t| t.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    pub(crate) fn absorb_context(&mut self, other: &EdgeSet) {
        for network in &other.networks {
            if !self.networks.iter().any(|n| n.id == network.id) {
                self.networks.push(network.clone());
            }
        }
        for (id, label) in &other.taxa {
            self.taxa.entry(id.clone()).or_insert_with(|| label.clone());
        }
    }

    /// Drop taxa that no edge references
    pub(crate) fn retain_edge_taxa(&mut self) {
        let used: BTreeSet<NodeId> = self
            .edges
            .keys()
            .flat_map(|k| [k.pair.a.clone(), k.pair.b.clone()])
            .collect();
        self.taxa.retain(|id, _| used.contains(id));
    }
}

/// How intersecting networks' weights collapse into one value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightMerge {
    /// Keep every weight as a list
    #[default]
    KeepAll,
    Mean,
    Sum,
    Max,
    Min,
}

impl WeightMerge {
    pub fn apply(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        match self {
            WeightMerge::KeepAll => None,
            WeightMerge::Mean => Some(values.iter().sum::<f64>() / values.len() as f64),
            WeightMerge::Sum => Some(values.iter().sum()),
            WeightMerge::Max => values.iter().copied().reduce(f64::max),
            WeightMerge::Min => values.iter().copied().reduce(f64::min),
        }
    }
}

impl FromStr for WeightMerge {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep" | "keepall" | "keep_all" | "list" => Ok(Self::KeepAll),
            "mean" => Ok(Self::Mean),
            "sum" => Ok(Self::Sum),
            "max" => Ok(Self::Max),
            "min" => Ok(Self::Min),
            other => Err(format!("unknown weight merge mode: {}", other)),
        }
    }
}

/// Options for intersections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntersectionOptions {
    /// Fraction of the networks an edge must appear in, in (0, 1]
    pub min_fraction: f64,
    /// Only match edges whose association signs agree
    pub match_sign: bool,
    pub merge: WeightMerge,
}

impl Default for IntersectionOptions {
    fn default() -> Self {
        Self {
            min_fraction: 1.0,
            match_sign: false,
            merge: WeightMerge::KeepAll,
        }
    }
}

impl IntersectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_fraction(mut self, min_fraction: f64) -> Self {
        self.min_fraction = min_fraction;
        self
    }

    pub fn with_match_sign(mut self, match_sign: bool) -> Self {
        self.match_sign = match_sign;
        self
    }

    pub fn with_merge(mut self, merge: WeightMerge) -> Self {
        self.merge = merge;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.min_fraction > 0.0 && self.min_fraction <= 1.0) {
            return Err(format!("min_fraction must be in (0, 1], got {}", self.min_fraction));
        }
        Ok(())
    }

    /// Networks out of `n` an edge must appear in
    pub fn required(&self, n: usize) -> usize {
        let needed = (self.min_fraction.clamp(0.0, 1.0) * n as f64).ceil() as usize;
        needed.clamp(1, n.max(1))
    }
}
