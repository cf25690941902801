//! Shared fixtures for catalogue integration tests
//!
//! Stores are in-memory unless a test needs a file (concurrency,
//! persistence); those live in a `TempDir` that is dropped with the test.

#![allow(dead_code)]

use mako::graph::{AssociationRecord, ParsedInput};
use mako::import::{InputFormat, SourceMeta};
use mako::{Catalogue, ImportResult, MakoConfig};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// The two-network scenario: net1 has A-B and B-C, net2 has A-B
pub const NET1: &str = "TaxonA\tTaxonB\t0.8\nTaxonB\tTaxonC\t-0.3\n";
pub const NET2: &str = "TaxonA\tTaxonB\t0.5\n";

/// A sparse BIOM table: five OTUs with Greengenes lineages over six samples
pub const BIOM_TABLE: &str = r#"{
    "id": "test",
    "format": "Biological Observation Matrix 1.0.0-dev",
    "type": "OTU table",
    "rows": [
        {"id": "GG_OTU_1", "metadata": {"taxonomy": ["k__Bacteria", "p__Proteobacteria", "c__Gammaproteobacteria", "o__Enterobacteriales", "f__Enterobacteriaceae", "g__Escherichia", "s__"]}},
        {"id": "GG_OTU_2", "metadata": {"taxonomy": ["k__Bacteria", "p__Cyanobacteria", "c__Nostocophycideae", "o__Nostocales", "f__Nostocaceae", "g__Dolichospermum", "s__"]}},
        {"id": "GG_OTU_3", "metadata": {"taxonomy": ["k__Archaea", "p__Euryarchaeota", "c__Methanomicrobia", "o__Methanosarcinales", "f__Methanosarcinaceae", "g__Methanosarcina", "s__"]}},
        {"id": "GG_OTU_4", "metadata": {"taxonomy": ["k__Bacteria", "p__Firmicutes", "c__Clostridia", "o__Halanaerobiales", "f__Halanaerobiaceae", "g__Halanaerobium", "s__Halanaerobiumsaccharolyticum"]}},
        {"id": "GG_OTU_5", "metadata": {"taxonomy": ["k__Bacteria", "p__Proteobacteria", "c__Gammaproteobacteria", "o__Enterobacteriales", "f__Enterobacteriaceae", "g__Escherichia", "s__"]}}
    ],
    "columns": [
        {"id": "Sample1", "metadata": {"BODY_SITE": "gut", "Description": "human gut"}},
        {"id": "Sample2", "metadata": {"BODY_SITE": "gut", "Description": "human gut"}},
        {"id": "Sample3", "metadata": {"BODY_SITE": "gut", "Description": "human gut"}},
        {"id": "Sample4", "metadata": {"BODY_SITE": "skin", "Description": "human skin"}},
        {"id": "Sample5", "metadata": {"BODY_SITE": "skin", "Description": "human skin"}},
        {"id": "Sample6", "metadata": {"BODY_SITE": "skin", "Description": "human skin"}}
    ],
    "matrix_type": "sparse",
    "matrix_element_type": "int",
    "shape": [5, 6],
    "data": [[0,2,1],[1,0,5],[1,1,1],[1,3,2],[1,4,3],[1,5,1],[2,2,1],[2,3,4],[2,5,2],[3,0,2],[3,1,1],[3,2,1],[3,5,1],[4,1,1],[4,2,1]]
}"#;

/// Number of nonzero cells in [`BIOM_TABLE`]
pub const BIOM_NONZERO: usize = 15;

/// Associations between the BIOM table's OTUs
pub const BIOM_NETWORK: &str = "source\ttarget\tweight\n\
GG_OTU_1\tGG_OTU_5\t0.9\n\
GG_OTU_1\tGG_OTU_2\t0.4\n\
GG_OTU_2\tGG_OTU_3\t-0.6\n\
GG_OTU_4\tGG_OTU_3\t0.2\n";

pub fn create_test_catalogue() -> Catalogue {
    Catalogue::in_memory(MakoConfig::default()).expect("in-memory catalogue")
}

/// A catalogue backed by a database file inside a fresh temp dir
pub fn create_file_catalogue() -> (TempDir, Catalogue) {
    let dir = TempDir::new().expect("temp dir");
    let mut config = MakoConfig::default();
    config.store.path = Some(dir.path().join("mako.db"));
    let catalogue = Catalogue::open(config).expect("file catalogue");
    (dir, catalogue)
}

pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("write fixture");
    path
}

/// Parsed input for weighted edges given as (a, b, weight)
pub fn edges(list: &[(&str, &str, f64)]) -> ParsedInput {
    let mut input = ParsedInput::new();
    for (a, b, w) in list {
        input
            .associations
            .push(AssociationRecord::new(*a, *b).with_weight(*w));
    }
    input
}

/// Source metadata whose checksum is unique to `name` and `list`
pub fn source_for(name: &str, list: &[(&str, &str, f64)]) -> SourceMeta {
    SourceMeta::from_bytes(
        format!("{}.tsv", name),
        format!("{}:{:?}", name, list).as_bytes(),
        InputFormat::EdgeList,
    )
}

/// Import weighted edges as a network named `name`
pub fn import_edges(catalogue: &Catalogue, name: &str, list: &[(&str, &str, f64)]) -> ImportResult {
    catalogue
        .import(&edges(list), &source_for(name, list), &catalogue.import_options(name))
        .expect("import")
}

/// Import the two-network scenario from files
pub fn import_net1_net2(catalogue: &Catalogue, dir: &Path) -> (ImportResult, ImportResult) {
    let net1 = write_file(dir, "net1.tsv", NET1);
    let net2 = write_file(dir, "net2.tsv", NET2);
    (
        catalogue.import_file(&net1, None).expect("import net1"),
        catalogue.import_file(&net2, None).expect("import net2"),
    )
}
