//! Provenance logging
//!
//! A provenance record is written through the same transaction as the
//! import it documents, so a network is never visible without it.

use super::types::{AffectedEntity, ProvenanceId, ProvenanceRecord};
use crate::graph::NetworkId;
use crate::storage::{StorageResult, StoreTransaction};
use chrono::Utc;
use sha2::{Digest, Sha256};

/// Identity of one import batch
#[derive(Debug, Clone)]
pub struct BatchMetadata<'a> {
    pub provenance_id: ProvenanceId,
    pub network_id: NetworkId,
    pub source_path: &'a str,
    pub source_checksum: &'a str,
    pub parameters: &'a serde_json::Value,
}

/// Appends provenance records inside an open transaction
#[derive(Debug, Clone, Copy, Default)]
pub struct ProvenanceLogger;

impl ProvenanceLogger {
    pub fn new() -> Self {
        Self
    }

    /// Write the provenance record for `batch` listing every affected entity
    pub fn record(
        &self,
        tx: &dyn StoreTransaction,
        batch: BatchMetadata<'_>,
        affected: Vec<AffectedEntity>,
    ) -> StorageResult<ProvenanceRecord> {
        let record = ProvenanceRecord {
            id: batch.provenance_id,
            network_id: batch.network_id,
            source_path: batch.source_path.to_string(),
            source_checksum: batch.source_checksum.to_string(),
            parameters: batch.parameters.clone(),
            parameters_hash: parameters_digest(batch.parameters),
            created_at: Utc::now(),
            entities: affected,
        };
        tx.insert_provenance(&record)?;

        tracing::debug!(
            provenance = %record.id,
            network = %record.network_id,
            entities = record.entities.len(),
            "recorded provenance"
        );
        Ok(record)
    }
}

/// Hex-encoded SHA-256 of `bytes`
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Digest of import parameters
///
/// `serde_json` maps keep their keys sorted, so equal parameter sets
/// serialize identically regardless of insertion order.
pub fn parameters_digest(parameters: &serde_json::Value) -> String {
    sha256_hex(parameters.to_string().as_bytes())
}
