//! Taxonomic aggregation
//!
//! Collapses a network's taxa onto their ancestor at a chosen rank and sums
//! association weights between the resulting groups. Every taxon lands in
//! exactly one group; taxa without an ancestor at the rank share the
//! unresolved group.

use super::types::{EdgeSet, NetworkRef, TaxonLabel};
use crate::graph::{NodeId, Rank, Sign};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Id of the group holding taxa with no ancestor at the target rank
pub const UNRESOLVED: &str = "unresolved";

/// Options for aggregation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateOptions {
    /// Keep positive and negative weight sums apart
    pub split_by_sign: bool,
}

impl AggregateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_split_by_sign(mut self, split: bool) -> Self {
        self.split_by_sign = split;
        self
    }
}

/// Taxa collapsed onto one ancestor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonGroup {
    /// Ancestor taxon id, or [`UNRESOLVED`]
    pub id: String,
    pub label: String,
    pub rank: Option<Rank>,
    pub members: Vec<NodeId>,
    /// Summed weight of associations inside the group
    pub internal_weight: f64,
    pub internal_associations: usize,
}

impl TaxonGroup {
    pub fn is_unresolved(&self) -> bool {
        self.id == UNRESOLVED
    }
}

/// Summed associations between two groups
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedEdge {
    pub source: String,
    pub target: String,
    pub sign: Option<Sign>,
    pub weight: f64,
    pub associations: usize,
}

/// Result of an aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryTable {
    pub network: NetworkRef,
    pub rank: Rank,
    pub groups: Vec<TaxonGroup>,
    pub edges: Vec<AggregatedEdge>,
}

impl SummaryTable {
    pub fn group(&self, id: &str) -> Option<&TaxonGroup> {
        self.groups.iter().find(|g| g.id == id)
    }

    /// The group a taxon was assigned to
    pub fn group_of(&self, taxon: &NodeId) -> Option<&TaxonGroup> {
        self.groups.iter().find(|g| g.members.contains(taxon))
    }

    pub fn edge(&self, x: &str, y: &str) -> Option<&AggregatedEdge> {
        self.edges
            .iter()
            .find(|e| (e.source == x && e.target == y) || (e.source == y && e.target == x))
    }
}

/// Aggregate an edge set given each taxon's ancestor at `rank`
///
/// `ancestors` maps taxon ids to their group taxon. Taxa missing from it, or
/// mapped to `None`, go to the unresolved group.
pub fn aggregate(
    set: &EdgeSet,
    network: NetworkRef,
    rank: Rank,
    ancestors: &BTreeMap<NodeId, Option<(NodeId, TaxonLabel)>>,
    options: AggregateOptions,
) -> SummaryTable {
    let mut groups: BTreeMap<String, TaxonGroup> = BTreeMap::new();
    let mut assignment: BTreeMap<&NodeId, String> = BTreeMap::new();

    for taxon in set.taxa.keys() {
        let group = match ancestors.get(taxon) {
            Some(Some((ancestor, label))) => groups
                .entry(ancestor.to_string())
                .or_insert_with(|| TaxonGroup {
                    id: ancestor.to_string(),
                    label: label.name.clone(),
                    rank: Some(label.rank),
                    members: Vec::new(),
                    internal_weight: 0.0,
                    internal_associations: 0,
                }),
            _ => groups.entry(UNRESOLVED.to_string()).or_insert_with(|| TaxonGroup {
                id: UNRESOLVED.to_string(),
                label: "Unresolved".to_string(),
                rank: None,
                members: Vec::new(),
                internal_weight: 0.0,
                internal_associations: 0,
            }),
        };
        group.members.push(taxon.clone());
        assignment.insert(taxon, group.id.clone());
    }

    let mut between: BTreeMap<(String, String, Option<Sign>), (f64, usize)> = BTreeMap::new();
    for edge in set.edges.values() {
        let (Some(ga), Some(gb)) = (assignment.get(&edge.pair.a), assignment.get(&edge.pair.b)) else {
            tracing::warn!(a = %edge.pair.a, b = %edge.pair.b, "edge endpoint missing from taxa");
            continue;
        };
        let weight: f64 = edge.weight_values().iter().sum();

        if ga == gb {
            if let Some(group) = groups.get_mut(ga) {
                group.internal_weight += weight;
                group.internal_associations += 1;
            }
            continue;
        }

        let sign = if options.split_by_sign {
            edge.consensus_sign().or_else(|| Sign::of(weight))
        } else {
            None
        };
        let (source, target) = if ga < gb { (ga, gb) } else { (gb, ga) };
        let entry = between
            .entry((source.clone(), target.clone(), sign))
            .or_insert((0.0, 0));
        entry.0 += weight;
        entry.1 += 1;
    }

    SummaryTable {
        network,
        rank,
        groups: groups.into_values().collect(),
        edges: between
            .into_iter()
            .map(|((source, target, sign), (weight, associations))| AggregatedEdge {
                source,
                target,
                sign,
                weight,
                associations,
            })
            .collect(),
    }
}
