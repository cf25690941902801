//! Mako: a catalogue of microbial association networks
//!
//! Imports co-occurrence networks and abundance tables into a shared
//! SQLite-backed graph where taxa and samples are resolved once and reused
//! across networks, then compares networks with set algebra, taxonomic
//! aggregation and tests of their taxa against sample metadata.
//!
//! # Core Concepts
//!
//! - **Taxa and samples**: entities keyed by identity, shared by every network
//! - **Networks**: one import each, owning its associations and observations
//! - **Provenance**: one record per import, naming the source checksum,
//!   parameters and every entity touched
//! - **Views**: read-only query results, exportable as JSON or GraphML
//!
//! # Example
//!
//! ```
//! use mako::{Catalogue, MakoConfig, IntersectionOptions};
//! use mako::graph::{AssociationRecord, ParsedInput};
//! use mako::import::{InputFormat, SourceMeta};
//!
//! let catalogue = Catalogue::in_memory(MakoConfig::default()).unwrap();
//! let mut input = ParsedInput::new();
//! input.associations.push(AssociationRecord::new("TaxonA", "TaxonB").with_weight(0.8));
//! let source = SourceMeta::from_bytes("net1.tsv", b"TaxonA\tTaxonB\t0.8", InputFormat::EdgeList);
//! catalogue.import(&input, &source, &catalogue.import_options("net1")).unwrap();
//!
//! let shared = catalogue.intersection(&["net1"], &IntersectionOptions::new()).unwrap();
//! assert_eq!(shared.len(), 1);
//! ```

mod catalogue;
pub mod config;
pub mod export;
pub mod graph;
pub mod import;
pub mod provenance;
pub mod query;
pub mod storage;

pub use catalogue::{Catalogue, MakoError, MakoResult, SchemaIssue};
pub use config::{ConfigError, MakoConfig};
pub use export::{ExchangeDocument, ExportError, ExportFormat, ExportView};
pub use graph::{Association, NetworkId, NetworkInfo, NetworkSummary, NodeId, Rank, SchemaViolation, Sign, Taxon};
pub use import::{
    AttachReport, CancellationToken, DuplicatePolicy, ImportError, ImportOptions, ImportOutcome, ImportPipeline,
    ImportProgress, ImportResult, ImportStage, RetryPolicy, TabTablePaths,
};
pub use provenance::{ProvenanceId, ProvenanceRecord};
pub use query::{
    AggregateOptions, AssociationOptions, AssociationTable, EdgeSet, IntersectionOptions, QueryEngine, QueryError,
    SummaryTable, WeightMerge,
};
pub use storage::{GraphStore, OpenStore, SqliteStore, StorageError, StorageResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
