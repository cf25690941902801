//! Provenance tracking: one immutable record per import

mod logger;
mod types;

pub use logger::{parameters_digest, sha256_hex, BatchMetadata, ProvenanceLogger};
pub use types::{AffectedEntity, EntityAction, ProvenanceId, ProvenanceRecord};
