//! End-to-end import behaviour: files in, shared entities and provenance out

mod common;

use common::*;
use mako::graph::Rank;
use mako::storage::StoreReader;
use mako::{
    AggregateOptions, CancellationToken, DuplicatePolicy, ImportError, ImportOutcome, IntersectionOptions, MakoError,
    QueryError,
};
use tempfile::TempDir;

#[test]
fn two_networks_share_taxa_and_keep_both_weights() {
    let dir = TempDir::new().unwrap();
    let catalogue = create_test_catalogue();
    let (net1, net2) = import_net1_net2(&catalogue, dir.path());

    assert_eq!(net1.outcome, ImportOutcome::Created);
    assert_eq!(net1.stats.taxa_created, 3);
    assert_eq!(net2.stats.taxa_created, 0);
    assert_eq!(net2.stats.taxa_referenced, 2);

    let snapshot = catalogue.store().snapshot().unwrap();
    assert_eq!(snapshot.count_taxa().unwrap(), 3);
    assert_eq!(snapshot.list_networks().unwrap().len(), 2);
    drop(snapshot);

    let shared = catalogue
        .intersection(&["net1", "net2"], &IntersectionOptions::new())
        .unwrap();
    assert_eq!(shared.len(), 1);
    let edge = shared.edges.values().next().unwrap();
    assert_eq!(edge.weight_values(), vec![0.8, 0.5]);
    assert_eq!(shared.label(&edge.pair.a), "TaxonA");
    assert_eq!(shared.label(&edge.pair.b), "TaxonB");
}

#[test]
fn each_import_has_exactly_one_provenance_record() {
    let dir = TempDir::new().unwrap();
    let catalogue = create_test_catalogue();
    let (net1, net2) = import_net1_net2(&catalogue, dir.path());

    let p1 = catalogue.provenance("net1").unwrap();
    let p2 = catalogue.provenance("net2").unwrap();
    assert_eq!(p1.id, net1.provenance_id);
    assert_eq!(p2.id, net2.provenance_id);
    assert_ne!(p1.source_checksum, p2.source_checksum);
    assert!(p1.source_path.ends_with("net1.tsv"));
    assert_eq!(p1.parameters["network"], "net1");
}

#[test]
fn self_association_fails_and_creates_no_nodes() {
    let catalogue = create_test_catalogue();
    let list = [("TaxonA", "TaxonA", 0.5)];
    let err = catalogue
        .import(&edges(&list), &source_for("selfloop", &list), &catalogue.import_options("selfloop"))
        .unwrap_err();

    match err {
        MakoError::Import(ImportError::SchemaViolation(violations)) => {
            assert_eq!(violations.len(), 1);
            assert_eq!(violations[0].index, 0);
            assert_eq!(violations[0].field, "taxon_b");
        }
        other => panic!("expected a schema violation, got {other:?}"),
    }

    let snapshot = catalogue.store().snapshot().unwrap();
    assert_eq!(snapshot.count_taxa().unwrap(), 0);
    assert!(snapshot.list_networks().unwrap().is_empty());
}

#[test]
fn one_bad_record_rejects_the_whole_file() {
    let dir = TempDir::new().unwrap();
    let path = write_file(dir.path(), "mixed.tsv", "TaxonA\tTaxonB\t0.8\nTaxonC\tTaxonC\t0.1\n");
    let catalogue = create_test_catalogue();

    assert!(matches!(
        catalogue.import_file(&path, None),
        Err(MakoError::Import(ImportError::SchemaViolation(_)))
    ));
    assert_eq!(catalogue.store().snapshot().unwrap().count_taxa().unwrap(), 0);
}

#[test]
fn reimporting_the_same_file_is_skipped() {
    let dir = TempDir::new().unwrap();
    let path = write_file(dir.path(), "net1.tsv", NET1);
    let catalogue = create_test_catalogue();

    let first = catalogue.import_file(&path, None).unwrap();
    let second = catalogue.import_file(&path, None).unwrap();

    assert_eq!(second.outcome, ImportOutcome::Skipped);
    assert_eq!(second.network_id, first.network_id);
    assert_eq!(second.provenance_id, first.provenance_id);
    assert_eq!(catalogue.list_networks().unwrap().len(), 1);
}

#[test]
fn duplicate_policies() {
    let dir = TempDir::new().unwrap();
    let path = write_file(dir.path(), "net1.tsv", NET1);
    let catalogue = create_test_catalogue();
    catalogue.import_file(&path, None).unwrap();

    let (input, source) = mako::import::read_file(&path).unwrap();

    let strict = catalogue.import_options("net1").with_on_duplicate(DuplicatePolicy::Error);
    assert!(matches!(
        catalogue.import(&input, &source, &strict),
        Err(MakoError::Import(ImportError::DuplicateImportConflict { .. }))
    ));

    let versioned = catalogue.import_options("net1").with_on_duplicate(DuplicatePolicy::Version);
    let result = catalogue.import(&input, &source, &versioned).unwrap();
    assert_eq!(result.outcome, ImportOutcome::Versioned);
    assert_eq!(result.version, 2);

    assert_eq!(catalogue.network("net1").unwrap().info.version, 2);
    assert_eq!(catalogue.network("net1@1").unwrap().info.version, 1);
}

#[test]
fn biom_table_and_network_import_together() {
    let dir = TempDir::new().unwrap();
    let table = write_file(dir.path(), "gut.biom", BIOM_TABLE);
    let network = write_file(dir.path(), "gut_network.tsv", BIOM_NETWORK);
    let catalogue = create_test_catalogue();

    let result = catalogue.import_files(&[table, network], Some("gut")).unwrap();
    assert_eq!(result.stats.observations, BIOM_NONZERO);
    assert_eq!(result.stats.associations, 4);
    assert_eq!(result.stats.samples_created, 6);

    let summary = catalogue.network("gut").unwrap();
    assert_eq!(summary.taxa, 5);
    assert_eq!(summary.samples, 6);

    let snapshot = catalogue.store().snapshot().unwrap();
    let sample = snapshot.find_sample("Sample4").unwrap().unwrap();
    assert_eq!(sample.metadata.get("BODY_SITE").map(String::as_str), Some("skin"));

    let otu = snapshot.find_taxon("GG_OTU_1", Rank::Otu).unwrap().unwrap();
    let lineage = snapshot.lineage(&otu.id).unwrap();
    let genus = lineage.iter().find(|(rank, _)| *rank == Rank::Genus).unwrap();
    assert_eq!(genus.1.name, "Escherichia");
}

#[test]
fn biom_network_aggregates_by_genus() {
    let dir = TempDir::new().unwrap();
    let table = write_file(dir.path(), "gut.biom", BIOM_TABLE);
    let network = write_file(dir.path(), "gut_network.tsv", BIOM_NETWORK);
    let catalogue = create_test_catalogue();
    catalogue.import_files(&[table, network], Some("gut")).unwrap();

    let table = catalogue
        .aggregate("gut", Rank::Genus, AggregateOptions::new())
        .unwrap();

    let total: usize = table.groups.iter().map(|g| g.members.len()).sum();
    assert_eq!(total, 5);
    assert_eq!(table.groups.len(), 4);

    let escherichia = table.groups.iter().find(|g| g.label == "Escherichia").unwrap();
    assert_eq!(escherichia.members.len(), 2);
    assert_eq!(escherichia.internal_associations, 1);
    assert!((escherichia.internal_weight - 0.9).abs() < 1e-9);
    assert_eq!(table.edges.len(), 3);
}

#[test]
fn cancelled_import_leaves_no_trace() {
    let catalogue = create_test_catalogue();
    let list = [("TaxonA", "TaxonB", 0.8)];
    let token = CancellationToken::new();
    token.cancel();

    let err = catalogue
        .import_cancellable(
            &edges(&list),
            &source_for("cancelled", &list),
            &catalogue.import_options("cancelled"),
            token,
        )
        .unwrap_err();
    assert!(matches!(err, MakoError::Import(ImportError::Cancelled)));

    let snapshot = catalogue.store().snapshot().unwrap();
    assert_eq!(snapshot.count_taxa().unwrap(), 0);
    assert!(snapshot.list_networks().unwrap().is_empty());
}

#[test]
fn deleting_a_network_keeps_shared_taxa() {
    let dir = TempDir::new().unwrap();
    let catalogue = create_test_catalogue();
    import_net1_net2(&catalogue, dir.path());

    catalogue.delete_network("net1").unwrap();

    assert!(matches!(
        catalogue.provenance("net1"),
        Err(MakoError::Query(QueryError::UnknownNetwork(_)))
    ));
    let snapshot = catalogue.store().snapshot().unwrap();
    assert_eq!(snapshot.count_taxa().unwrap(), 3);
    drop(snapshot);

    let remaining = catalogue.union(&["net2"]).unwrap();
    assert_eq!(remaining.len(), 1);
    assert!(catalogue.check_schema().unwrap().is_empty());
}

#[test]
fn catalogue_persists_across_reopen() {
    let (dir, catalogue) = create_file_catalogue();
    import_edges(&catalogue, "persisted", &[("TaxonA", "TaxonB", 0.8)]);
    let config = catalogue.config().clone();
    drop(catalogue);

    let reopened = mako::Catalogue::open(config).unwrap();
    let networks = reopened.list_networks().unwrap();
    assert_eq!(networks.len(), 1);
    assert_eq!(networks[0].name, "persisted");
    drop(dir);
}
