//! Core data model: the node and relationship vocabulary of the catalogue

mod edge;
mod network;
mod node;
pub mod schema;
pub mod taxonomy;

pub use edge::{Association, Observation, Relationship, Sign, TaxonPair};
pub use network::{NetworkId, NetworkInfo, NetworkSummary};
pub use node::{NodeId, NodeKind, Sample, Taxon};
pub use schema::{
    validate, validate_input, AbundanceRecord, AssociationRecord, ParsedInput, Record, RecordKind,
    SampleRecord, SchemaViolation, TaxonRecord, ValidRecord,
};
pub use taxonomy::{parse_lineage, parse_lineage_parts, parse_ranked, LineageEntry, Rank};
