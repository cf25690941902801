//! Set algebra, aggregation and export over stored networks

mod common;

use common::*;
use mako::export::{self, to_graphml, write_document, ExportFormat};
use mako::graph::{AssociationRecord, ParsedInput, Rank, TaxonRecord};
use mako::import::{InputFormat, SourceMeta};
use mako::query::{self as q, UNRESOLVED};
use mako::{AggregateOptions, Catalogue, IntersectionOptions, MakoError, QueryError, WeightMerge};
use serde_json::json;
use std::collections::BTreeSet;
use tempfile::TempDir;

fn three_networks() -> Catalogue {
    let catalogue = create_test_catalogue();
    import_edges(
        &catalogue,
        "a",
        &[("T1", "T2", 0.8), ("T2", "T3", -0.4), ("T3", "T4", 0.1)],
    );
    import_edges(&catalogue, "b", &[("T2", "T1", 0.5), ("T4", "T3", 0.3), ("T5", "T6", 0.2)]);
    import_edges(&catalogue, "c", &[("T1", "T2", -0.2), ("T6", "T5", 0.7)]);
    catalogue
}

fn pairs(set: &mako::EdgeSet) -> BTreeSet<(String, String)> {
    set.edges
        .values()
        .map(|e| {
            let (a, b) = (set.label(&e.pair.a), set.label(&e.pair.b));
            if a <= b {
                (a, b)
            } else {
                (b, a)
            }
        })
        .collect()
}

fn labelled(list: &[(&str, &str)]) -> BTreeSet<(String, String)> {
    list.iter().map(|(a, b)| (a.to_string(), b.to_string())).collect()
}

#[test]
fn union_and_intersection_laws() {
    let catalogue = three_networks();
    let a = catalogue.network_edges("a").unwrap();
    let b = catalogue.network_edges("b").unwrap();

    let union = catalogue.union(&["a", "b"]).unwrap();
    let expected: BTreeSet<_> = pairs(&a).union(&pairs(&b)).cloned().collect();
    assert_eq!(pairs(&union), expected);

    let both = catalogue.intersection(&["a", "b"], &IntersectionOptions::new()).unwrap();
    assert_eq!(pairs(&both), labelled(&[("T1", "T2"), ("T3", "T4")]));
    assert!(pairs(&both).is_subset(&pairs(&a)));
    assert!(pairs(&both).is_subset(&pairs(&b)));

    let idempotent = catalogue.union(&["a", "a"]).unwrap();
    assert_eq!(pairs(&idempotent), pairs(&a));
}

#[test]
fn difference_composes_into_intersection() {
    let catalogue = three_networks();
    let a = catalogue.network_edges("a").unwrap();
    let b = catalogue.network_edges("b").unwrap();

    let a_minus_b = catalogue.difference("a", "b").unwrap();
    assert_eq!(pairs(&a_minus_b), labelled(&[("T2", "T3")]));

    let recovered = q::difference(&a, &q::difference(&a, &b));
    let both = q::intersection(&[a, b], &IntersectionOptions::new());
    assert_eq!(pairs(&recovered), pairs(&both));
}

#[test]
fn partial_and_sign_aware_intersections() {
    let catalogue = three_networks();

    let majority = catalogue
        .intersection(&["a", "b", "c"], &IntersectionOptions::new().with_min_fraction(0.6))
        .unwrap();
    assert_eq!(
        pairs(&majority),
        labelled(&[("T1", "T2"), ("T3", "T4"), ("T5", "T6")])
    );

    let all_three = catalogue
        .intersection(&["a", "b", "c"], &IntersectionOptions::new())
        .unwrap();
    assert_eq!(pairs(&all_three), labelled(&[("T1", "T2")]));

    let same_sign = catalogue
        .intersection(&["a", "b", "c"], &IntersectionOptions::new().with_match_sign(true))
        .unwrap();
    assert!(same_sign.is_empty());
}

#[test]
fn merged_intersection_weights() {
    let catalogue = three_networks();
    let mean = catalogue
        .intersection(
            &["a", "b"],
            &IntersectionOptions::new().with_merge(WeightMerge::Mean),
        )
        .unwrap();
    let t1_t2 = mean
        .edges
        .values()
        .find(|e| mean.label(&e.pair.a) == "T1" || mean.label(&e.pair.b) == "T1")
        .unwrap();
    assert!((t1_t2.weight().unwrap() - 0.65).abs() < 1e-9);
}

#[test]
fn unique_edges() {
    let catalogue = three_networks();
    let unique = catalogue.unique(&["a", "b", "c"]).unwrap();
    assert_eq!(pairs(&unique), labelled(&[("T2", "T3")]));
}

#[test]
fn unknown_network_gives_no_partial_result() {
    let catalogue = three_networks();
    let err = catalogue.union(&["a", "nope"]).unwrap_err();
    assert!(matches!(err, MakoError::Query(QueryError::UnknownNetwork(name)) if name == "nope"));
}

#[test]
fn aggregation_never_drops_a_taxon() {
    let catalogue = create_test_catalogue();
    let mut input = ParsedInput::new();
    input.taxa.push(
        TaxonRecord::new("OTU_1").with_lineage(mako::graph::parse_lineage("k__Bacteria;f__Lachnospiraceae")),
    );
    input.taxa.push(
        TaxonRecord::new("OTU_2").with_lineage(mako::graph::parse_lineage("k__Bacteria;f__Lachnospiraceae")),
    );
    input.taxa.push(TaxonRecord::new("OTU_3").with_lineage(mako::graph::parse_lineage("k__Bacteria")));
    input.taxa.push(TaxonRecord::new("OTU_4"));
    input.associations.push(AssociationRecord::new("OTU_1", "OTU_2").with_weight(0.6));
    input.associations.push(AssociationRecord::new("OTU_1", "OTU_3").with_weight(0.3));
    input.associations.push(AssociationRecord::new("OTU_3", "OTU_4").with_weight(-0.2));
    let source = SourceMeta::from_bytes("families.tsv", b"families", InputFormat::EdgeList);
    catalogue
        .import(&input, &source, &catalogue.import_options("families"))
        .unwrap();

    let table = catalogue
        .aggregate("families", Rank::Family, AggregateOptions::new())
        .unwrap();

    let total: usize = table.groups.iter().map(|g| g.members.len()).sum();
    assert_eq!(total, 4);

    let unresolved = table.group(UNRESOLVED).unwrap();
    assert_eq!(unresolved.members.len(), 2);
    assert_eq!(unresolved.internal_associations, 1);

    let family = table.groups.iter().find(|g| g.label == "Lachnospiraceae").unwrap();
    assert_eq!(family.members.len(), 2);
    assert_eq!(family.rank, Some(Rank::Family));
    assert_eq!(table.edges.len(), 1);
    assert!((table.edges[0].weight - 0.3).abs() < 1e-9);
}

#[test]
fn exported_intersection_has_stable_fields() {
    let dir = TempDir::new().unwrap();
    let catalogue = create_test_catalogue();
    import_net1_net2(&catalogue, dir.path());

    let shared = catalogue
        .intersection(&["net1", "net2"], &IntersectionOptions::new())
        .unwrap();
    let doc = catalogue.export(&shared);
    let value = serde_json::to_value(&doc).unwrap();

    let nodes = value["elements"]["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 2);
    let labels: BTreeSet<_> = nodes
        .iter()
        .map(|n| n["data"]["label"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(labels, labelled_names(&["TaxonA", "TaxonB"]));

    let edges = value["elements"]["edges"].as_array().unwrap();
    assert_eq!(edges.len(), 1);
    let edge = &edges[0]["data"];
    for field in ["id", "source", "target", "weight", "all_weights", "networks"] {
        assert!(edge.get(field).is_some(), "missing {field}");
    }
    assert_eq!(edge["all_weights"], json!([0.8, 0.5]));
    assert_eq!(edge["networks"], json!(["net1@1", "net2@1"]));
}

fn labelled_names(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}

#[test]
fn exports_aggregation_to_files() {
    let dir = TempDir::new().unwrap();
    let table_path = write_file(dir.path(), "gut.biom", BIOM_TABLE);
    let network_path = write_file(dir.path(), "gut_network.tsv", BIOM_NETWORK);
    let catalogue = create_test_catalogue();
    catalogue
        .import_files(&[table_path, network_path], Some("gut"))
        .unwrap();

    let table = catalogue
        .aggregate("gut", Rank::Phylum, AggregateOptions::new().with_split_by_sign(true))
        .unwrap();
    let doc = export::export(&table);

    let graphml = dir.path().join("gut.graphml");
    assert_eq!(write_document(&doc, &graphml).unwrap(), ExportFormat::GraphMl);
    let xml = std::fs::read_to_string(&graphml).unwrap();
    assert_eq!(xml, to_graphml(&doc));
    assert!(xml.contains("Proteobacteria"));

    let json_path = dir.path().join("gut.json");
    write_document(&doc, &json_path).unwrap();
    let parsed: mako::ExchangeDocument =
        serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(parsed.elements.nodes.len(), table.groups.len());
}
