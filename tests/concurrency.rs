//! Concurrent imports against one database file
//!
//! Writers serialize on the store; entity identity holds no matter how the
//! imports interleave.

mod common;

use common::*;
use mako::graph::Rank;
use mako::storage::StoreReader;
use mako::{Catalogue, ImportOutcome, IntersectionOptions};
use std::thread;

const WRITERS: usize = 6;

#[test]
fn concurrent_imports_resolve_shared_taxon_once() {
    let (_dir, catalogue) = create_file_catalogue();

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..WRITERS)
            .map(|i| {
                let catalogue = &catalogue;
                scope.spawn(move || {
                    let own = format!("Private{}", i);
                    let list = [("Shared", own.as_str(), 0.1 * (i as f64 + 1.0))];
                    catalogue.import(
                        &edges(&list),
                        &source_for(&format!("net{}", i), &list),
                        &catalogue.import_options(format!("net{}", i)),
                    )
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for result in &results {
        let result = result.as_ref().unwrap();
        assert_eq!(result.outcome, ImportOutcome::Created);
    }

    let snapshot = catalogue.store().snapshot().unwrap();
    assert!(snapshot.find_taxon("Shared", Rank::Otu).unwrap().is_some());
    assert_eq!(snapshot.count_taxa().unwrap(), WRITERS + 1);
    assert_eq!(snapshot.list_networks().unwrap().len(), WRITERS);

    let created: usize = results
        .iter()
        .map(|r| r.as_ref().unwrap().stats.taxa_created)
        .sum();
    assert_eq!(created, WRITERS + 1);
}

#[test]
fn concurrent_duplicate_imports_create_one_network() {
    let (_dir, catalogue) = create_file_catalogue();
    let list = [("TaxonA", "TaxonB", 0.8)];

    let outcomes: Vec<ImportOutcome> = thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let catalogue = &catalogue;
                let list = &list;
                scope.spawn(move || {
                    catalogue
                        .import(&edges(list), &source_for("same", list), &catalogue.import_options("same"))
                        .unwrap()
                        .outcome
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let created = outcomes.iter().filter(|o| **o == ImportOutcome::Created).count();
    let skipped = outcomes.iter().filter(|o| **o == ImportOutcome::Skipped).count();
    assert_eq!(created, 1);
    assert_eq!(skipped, 3);
    assert_eq!(catalogue.list_networks().unwrap().len(), 1);
}

#[test]
fn two_catalogues_on_one_file_see_each_other() {
    let (dir, first) = create_file_catalogue();
    let second = Catalogue::open(first.config().clone()).unwrap();

    import_edges(&first, "left", &[("TaxonA", "TaxonB", 0.8)]);
    import_edges(&second, "right", &[("TaxonB", "TaxonA", 0.4)]);

    for catalogue in [&first, &second] {
        let shared = catalogue
            .intersection(&["left", "right"], &IntersectionOptions::new())
            .unwrap();
        assert_eq!(shared.len(), 1);
    }
    assert_eq!(first.store().snapshot().unwrap().count_taxa().unwrap(), 2);
    drop(dir);
}

#[test]
fn concurrent_imports_into_throwaway_catalogue() {
    const THREADS: usize = 16;
    const EDGES: usize = 40;
    let catalogue = create_test_catalogue();

    thread::scope(|scope| {
        for t in 0..THREADS {
            let catalogue = &catalogue;
            scope.spawn(move || {
                let names: Vec<(String, String)> = (0..EDGES)
                    .map(|e| (format!("Hub{}", e % 5), format!("T{}_{}", t, e)))
                    .collect();
                let list: Vec<(&str, &str, f64)> = names
                    .iter()
                    .map(|(a, b)| (a.as_str(), b.as_str(), 0.5))
                    .collect();
                let result = import_edges(catalogue, &format!("net{}", t), &list);
                assert_eq!(result.outcome, ImportOutcome::Created);
                // Readers run while other threads hold the writer
                assert!(!catalogue.list_networks().unwrap().is_empty());
            });
        }
    });

    assert_eq!(catalogue.list_networks().unwrap().len(), THREADS);
    let snapshot = catalogue.store().snapshot().unwrap();
    assert_eq!(snapshot.count_taxa().unwrap(), 5 + THREADS * EDGES);
}

#[test]
fn union_reads_while_import_transaction_is_open() {
    let catalogue = create_test_catalogue();
    import_edges(&catalogue, "net1", &[("TaxonA", "TaxonB", 0.8)]);

    let held = catalogue.store().begin().unwrap();
    let union = catalogue.union(&["net1"]).unwrap();
    assert_eq!(union.len(), 1);
    drop(held);
}
