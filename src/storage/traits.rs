//! Storage trait definitions
//!
//! The catalogue only talks to the store through transactions. A write
//! transaction is serialized against every other writer and becomes
//! visible all at once on [`StoreTransaction::commit`]; dropping it
//! uncommitted rolls everything back. A snapshot is a read-only view that
//! stays consistent for its whole lifetime.

use crate::graph::{Association, NetworkId, NetworkInfo, NodeId, NodeKind, Observation, Rank, Sample, Taxon};
use std::collections::BTreeMap;
use crate::provenance::{ProvenanceId, ProvenanceRecord};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParse(String),

    #[error("Invalid stored value in {table}.{column}: {value}")]
    InvalidValue {
        table: &'static str,
        column: &'static str,
        value: String,
    },

    #[error("Store lock poisoned")]
    Poisoned,
}

impl StorageError {
    /// Busy, locked and timed-out stores may succeed on a later attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Read operations, available inside snapshots and write transactions
pub trait StoreReader {
    // === Taxon Operations ===

    /// Look a taxon up by its identity key
    fn find_taxon(&self, name: &str, rank: Rank) -> StorageResult<Option<Taxon>>;

    fn get_taxon(&self, id: &NodeId) -> StorageResult<Option<Taxon>>;

    /// Ancestors of a taxon keyed by rank
    fn lineage(&self, id: &NodeId) -> StorageResult<Vec<(Rank, Taxon)>>;

    fn count_taxa(&self) -> StorageResult<usize>;

    /// Every PART_OF link as (taxon, rank, ancestor)
    fn lineage_links(&self) -> StorageResult<Vec<(NodeId, Rank, NodeId)>>;

    /// Properties attached to a taxon, e.g. a 16S sequence
    fn taxon_properties(&self, id: &NodeId) -> StorageResult<BTreeMap<String, String>>;

    // === Sample Operations ===

    fn find_sample(&self, identifier: &str) -> StorageResult<Option<Sample>>;

    fn count_samples(&self) -> StorageResult<usize>;

    // === Network Operations ===

    fn get_network(&self, id: &NetworkId) -> StorageResult<Option<NetworkInfo>>;

    /// The network with the given name and version, or its latest version
    fn find_network(&self, name: &str, version: Option<u32>) -> StorageResult<Option<NetworkInfo>>;

    /// All networks ordered by name then version
    fn list_networks(&self) -> StorageResult<Vec<NetworkInfo>>;

    fn latest_version(&self, name: &str) -> StorageResult<Option<u32>>;

    fn associations(&self, network_id: &NetworkId) -> StorageResult<Vec<Association>>;

    fn observations(&self, network_id: &NetworkId) -> StorageResult<Vec<Observation>>;

    /// Taxa referenced by a network's associations or observations
    fn network_taxa(&self, network_id: &NetworkId) -> StorageResult<Vec<Taxon>>;

    /// Samples linked to a network via MEASURED_IN
    fn network_samples(&self, network_id: &NetworkId) -> StorageResult<Vec<Sample>>;

    // === Provenance Operations ===

    fn get_provenance(&self, id: &ProvenanceId) -> StorageResult<Option<ProvenanceRecord>>;

    /// The provenance of an earlier import of the same source with the same parameters
    fn find_provenance(
        &self,
        source_checksum: &str,
        parameters_hash: &str,
    ) -> StorageResult<Option<ProvenanceRecord>>;

    // === Identity ===

    /// The kind of node stored under `id`, if any
    fn node_kind(&self, id: &str) -> StorageResult<Option<NodeKind>>;
}

/// A read-only, consistent view of the store
pub trait StoreSnapshot: StoreReader {}

/// A serialized write transaction
pub trait StoreTransaction: StoreReader {
    /// Insert a taxon unless one with the same (name, rank) exists.
    /// Returns true if this call created it.
    fn insert_taxon_if_absent(&self, taxon: &Taxon) -> StorageResult<bool>;

    fn set_taxon_external_ref(&self, id: &NodeId, external_ref: &str) -> StorageResult<()>;

    /// Set one property of a taxon. Returns true if the stored value changed.
    fn set_taxon_property(&self, id: &NodeId, key: &str, value: &str) -> StorageResult<bool>;

    /// Record `ancestor` as the lineage entry of `taxon` at `rank`; existing entries are kept
    fn link_lineage(&self, taxon: &NodeId, rank: Rank, ancestor: &NodeId) -> StorageResult<()>;

    /// Insert a sample unless one with the same identifier exists.
    /// Returns true if this call created it.
    fn insert_sample_if_absent(&self, sample: &Sample) -> StorageResult<bool>;

    fn insert_network(&self, network: &NetworkInfo) -> StorageResult<()>;

    fn insert_associations(&self, associations: &[Association]) -> StorageResult<()>;

    fn insert_observations(&self, observations: &[Observation]) -> StorageResult<()>;

    fn link_sample(&self, sample: &NodeId, network_id: &NetworkId) -> StorageResult<()>;

    fn insert_provenance(&self, record: &ProvenanceRecord) -> StorageResult<()>;

    /// Delete a network with its associations, observations, sample links and
    /// provenance. Shared taxa and samples stay.
    fn delete_network(&self, id: &NetworkId) -> StorageResult<bool>;

    fn commit(self: Box<Self>) -> StorageResult<()>;
}

/// Trait for graph storage backends
///
/// Implementations must be thread-safe (Send + Sync) to support
/// concurrent callers.
pub trait GraphStore: Send + Sync {
    /// Begin a write transaction
    fn begin(&self) -> StorageResult<Box<dyn StoreTransaction + '_>>;

    /// Open a read-only snapshot
    fn snapshot(&self) -> StorageResult<Box<dyn StoreSnapshot + '_>>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: GraphStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create a throwaway store that is removed when dropped (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
