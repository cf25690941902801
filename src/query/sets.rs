//! Set algebra over network edge sets
//!
//! Edges are matched by their canonical taxon pair, so `A-B` in one network
//! and `B-A` in another are the same edge. These are pure functions: the
//! engine loads the inputs from a snapshot and nothing is written back.

use super::types::{DerivedEdge, EdgeKey, EdgeSet, IntersectionOptions, WeightMerge};
use crate::graph::TaxonPair;
use std::collections::{BTreeMap, BTreeSet};

fn joined_names(sets: &[EdgeSet]) -> String {
    sets.iter().map(|s| s.name.as_str()).collect::<Vec<_>>().join(", ")
}

/// Every edge present in any input
///
/// Weights are collected per contributing network. Union with itself is the
/// identity.
pub fn union(sets: &[EdgeSet]) -> EdgeSet {
    let mut out = EdgeSet::new(format!("union({})", joined_names(sets)));

    for set in sets {
        out.absorb_context(set);
        for edge in set.edges.values() {
            let entry = out
                .edges
                .entry(EdgeKey::unsigned(edge.pair.clone()))
                .or_insert_with(|| DerivedEdge::new(edge.pair.clone(), None));
            for weight in &edge.weights {
                entry.add_weight(weight.clone());
            }
        }
    }
    out
}

/// Edges present in at least `options.required(n)` of the `n` inputs
///
/// With `match_sign`, an edge only matches edges of the same sign, and a
/// pair with mixed signs across networks yields one edge per sign.
pub fn intersection(sets: &[EdgeSet], options: &IntersectionOptions) -> EdgeSet {
    let required = options.required(sets.len());
    let mut out = EdgeSet::new(if required == sets.len() {
        format!("intersection({})", joined_names(sets))
    } else {
        format!("intersection[{}/{}]({})", required, sets.len(), joined_names(sets))
    });

    let mut found: BTreeMap<EdgeKey, (usize, DerivedEdge)> = BTreeMap::new();
    for set in sets {
        out.absorb_context(set);
        let mut counted: BTreeSet<EdgeKey> = BTreeSet::new();
        for edge in set.edges.values() {
            let sign = if options.match_sign {
                edge.consensus_sign()
            } else {
                None
            };
            let key = EdgeKey {
                pair: edge.pair.clone(),
                sign,
            };
            let (count, derived) = found
                .entry(key.clone())
                .or_insert_with(|| (0, DerivedEdge::new(edge.pair.clone(), sign)));
            if counted.insert(key) {
                *count += 1;
            }
            for weight in &edge.weights {
                derived.add_weight(weight.clone());
            }
        }
    }

    for (key, (count, mut edge)) in found {
        if count < required {
            continue;
        }
        if options.merge != WeightMerge::KeepAll {
            edge.merged = options.merge.apply(&edge.weight_values());
        }
        out.edges.insert(key, edge);
    }
    out.retain_edge_taxa();
    out
}

/// Edges of `a` whose taxon pair does not occur in `b`
pub fn difference(a: &EdgeSet, b: &EdgeSet) -> EdgeSet {
    let mut out = EdgeSet::new(format!("difference({}, {})", a.name, b.name));
    out.absorb_context(a);
    out.absorb_context(b);

    let excluded = b.pairs();
    for (key, edge) in &a.edges {
        if !excluded.contains(&key.pair) {
            out.edges.insert(key.clone(), edge.clone());
        }
    }
    out.retain_edge_taxa();
    out
}

/// Edges whose taxon pair occurs in exactly one input
pub fn unique(sets: &[EdgeSet]) -> EdgeSet {
    let mut out = EdgeSet::new(format!("unique({})", joined_names(sets)));

    let mut occurrences: BTreeMap<&TaxonPair, usize> = BTreeMap::new();
    for set in sets {
        for pair in set.pairs() {
            *occurrences.entry(pair).or_default() += 1;
        }
    }

    for set in sets {
        out.absorb_context(set);
        for (key, edge) in &set.edges {
            if occurrences.get(&key.pair) == Some(&1) {
                out.edges.insert(key.clone(), edge.clone());
            }
        }
    }
    out.retain_edge_taxa();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NetworkId, NodeId, Rank, Sign};
    use crate::query::types::{NetworkRef, SourcedWeight, TaxonLabel};

    fn set(name: &str, edges: &[(&str, &str, f64)]) -> EdgeSet {
        let network = NetworkId::from(name);
        let mut out = EdgeSet::new(format!("{}@1", name));
        out.networks.push(NetworkRef {
            id: network.clone(),
            name: name.to_string(),
            version: 1,
        });
        for (a, b, w) in edges {
            for taxon in [a, b] {
                out.taxa.insert(
                    NodeId::from(*taxon),
                    TaxonLabel {
                        name: taxon.to_string(),
                        rank: Rank::Otu,
                    },
                );
            }
            let mut edge = DerivedEdge::new(TaxonPair::new((*a).into(), (*b).into()), None);
            edge.add_weight(SourcedWeight {
                network: network.clone(),
                weight: Some(*w),
                sign: Sign::of(*w),
            });
            out.edges.insert(edge.key(), edge);
        }
        out
    }

    fn pair(a: &str, b: &str) -> TaxonPair {
        TaxonPair::new(a.into(), b.into())
    }

    #[test]
    fn intersection_keeps_weights_from_every_network() {
        let n1 = set("net1", &[("A", "B", 0.8), ("B", "C", -0.3)]);
        let n2 = set("net2", &[("B", "A", 0.5)]);

        let result = intersection(&[n1, n2], &IntersectionOptions::new());
        assert_eq!(result.len(), 1);
        let edge = result.edge(&"A".into(), &"B".into()).unwrap();
        assert_eq!(edge.weight_values(), vec![0.8, 0.5]);
        assert_eq!(result.taxa.len(), 2);
        assert_eq!(result.networks.len(), 2);
    }

    #[test]
    fn intersection_merges_weights_on_request() {
        let n1 = set("net1", &[("A", "B", 0.8)]);
        let n2 = set("net2", &[("A", "B", 0.4)]);

        let options = IntersectionOptions::new().with_merge(WeightMerge::Max);
        let result = intersection(&[n1, n2], &options);
        assert_eq!(result.edge(&"A".into(), &"B".into()).unwrap().weight(), Some(0.8));
    }

    #[test]
    fn partial_intersection_counts_networks() {
        let n1 = set("n1", &[("A", "B", 0.1), ("C", "D", 0.1)]);
        let n2 = set("n2", &[("A", "B", 0.2)]);
        let n3 = set("n3", &[("E", "F", 0.3)]);

        let options = IntersectionOptions::new().with_min_fraction(0.5);
        let result = intersection(&[n1, n2, n3], &options);
        assert_eq!(result.pairs().into_iter().cloned().collect::<Vec<_>>(), vec![pair("A", "B")]);
        assert!(result.name.starts_with("intersection[2/3]"));
    }

    #[test]
    fn sign_aware_intersection_splits_mixed_signs() {
        let n1 = set("n1", &[("A", "B", 0.8), ("C", "D", 0.2)]);
        let n2 = set("n2", &[("A", "B", -0.5), ("C", "D", 0.6)]);

        let signed = IntersectionOptions::new().with_match_sign(true);
        let result = intersection(&[n1.clone(), n2.clone()], &signed);
        assert_eq!(result.len(), 1);
        assert!(result.contains_pair(&pair("C", "D")));

        let unsigned = intersection(&[n1, n2], &IntersectionOptions::new());
        assert_eq!(unsigned.len(), 2);
    }

    #[test]
    fn union_is_idempotent() {
        let a = set("a", &[("A", "B", 0.8), ("B", "C", 0.1)]);
        let result = union(&[a.clone(), a.clone()]);
        assert_eq!(result.pairs(), a.pairs());
        for edge in result.edges.values() {
            assert_eq!(edge.weights.len(), 1);
        }
    }

    #[test]
    fn union_collects_all_pairs() {
        let a = set("a", &[("A", "B", 0.8)]);
        let b = set("b", &[("B", "C", 0.1), ("A", "B", 0.2)]);
        let result = union(&[a, b]);
        assert_eq!(result.len(), 2);
        assert_eq!(result.edge(&"A".into(), &"B".into()).unwrap().weights.len(), 2);
    }

    #[test]
    fn difference_ignores_orientation() {
        let a = set("a", &[("A", "B", 0.8), ("B", "C", 0.1)]);
        let b = set("b", &[("B", "A", 0.3)]);
        let result = difference(&a, &b);
        assert_eq!(result.len(), 1);
        assert!(result.contains_pair(&pair("B", "C")));
        assert!(!result.taxa.contains_key(&NodeId::from("A")));
    }

    #[test]
    fn difference_of_difference_is_intersection() {
        let a = set("a", &[("A", "B", 0.8), ("B", "C", 0.1), ("C", "D", 0.4)]);
        let b = set("b", &[("A", "B", 0.3), ("D", "C", 0.2), ("E", "F", 0.9)]);

        let twice = difference(&a, &difference(&a, &b));
        let both = intersection(&[a, b], &IntersectionOptions::new());
        assert_eq!(twice.pairs(), both.pairs());
    }

    #[test]
    fn unique_keeps_edges_seen_once() {
        let a = set("a", &[("A", "B", 0.8), ("B", "C", 0.1)]);
        let b = set("b", &[("A", "B", 0.3), ("C", "D", 0.2)]);
        let result = unique(&[a, b]);
        let pairs: Vec<_> = result.pairs().into_iter().cloned().collect();
        assert_eq!(pairs, vec![pair("B", "C"), pair("C", "D")]);
    }
}
