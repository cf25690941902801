//! Import pipeline: parsed input to one committed network
//!
//! An import is all-or-nothing. Every record is validated before the store
//! is touched; the network, its associations, observations, sample links
//! and provenance record are then written through a single write
//! transaction, flushed in bounded batches. Busy or locked stores are
//! retried by replaying the whole transaction.

use super::cancel::CancellationToken;
use super::reader::SourceMeta;
use super::resolver::{EntityKey, EntityResolver, ResolveError};
use crate::graph::{
    validate_input, Association, NetworkId, NetworkInfo, NodeId, NodeKind, Observation,
    ParsedInput, Rank, SchemaViolation,
};
use crate::provenance::{
    parameters_digest, AffectedEntity, BatchMetadata, EntityAction, ProvenanceId, ProvenanceLogger,
};
use crate::storage::{GraphStore, StorageError, StoreTransaction};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// What to do when the same source is imported again with the same parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Return the earlier import unchanged
    #[default]
    Skip,
    /// Import again as a new version of the network
    Version,
    /// Fail with `DuplicateImportConflict`
    Error,
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "version" => Ok(Self::Version),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown duplicate policy: {}", other)),
        }
    }
}

/// Errors that abort an import. The store is left unchanged by all of them.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error(
        "{} schema violation(s); first: {}",
        .0.len(),
        .0.first().map(|v| v.to_string()).unwrap_or_default()
    )]
    SchemaViolation(Vec<SchemaViolation>),

    #[error("Source {source_checksum} was already imported as network {network_id}")]
    DuplicateImportConflict {
        network_id: NetworkId,
        provenance_id: ProvenanceId,
        source_checksum: String,
    },

    #[error("Store transaction failed after {attempts} attempt(s): {source}")]
    StoreTransaction {
        attempts: u32,
        #[source]
        source: StorageError,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Entity resolution race for {key}: {detail}")]
    EntityResolutionRace { key: String, detail: String },

    #[error("Import cancelled")]
    Cancelled,
}

impl From<ResolveError> for ImportError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::Storage(e) => ImportError::Storage(e),
            ResolveError::Race { key, detail } => ImportError::EntityResolutionRace {
                key: key.to_string(),
                detail,
            },
        }
    }
}

/// Per-import settings
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub network_name: String,
    pub on_duplicate: DuplicatePolicy,
    /// Rows written per flush
    pub batch_size: usize,
    /// Rank for taxa whose input does not state one
    pub default_rank: Rank,
    /// Caller parameters recorded in provenance and part of the duplicate key
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl ImportOptions {
    pub fn new(network_name: impl Into<String>) -> Self {
        Self {
            network_name: network_name.into(),
            on_duplicate: DuplicatePolicy::default(),
            batch_size: 1000,
            default_rank: Rank::Otu,
            parameters: serde_json::Map::new(),
        }
    }

    pub fn with_on_duplicate(mut self, policy: DuplicatePolicy) -> Self {
        self.on_duplicate = policy;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_default_rank(mut self, rank: Rank) -> Self {
        self.default_rank = rank;
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Parameters as recorded in provenance
    ///
    /// Batch size and duplicate policy change how an import runs, not what
    /// it produces, so they are left out.
    pub fn provenance_parameters(&self) -> serde_json::Value {
        let mut params = self.parameters.clone();
        params.insert("network".into(), self.network_name.trim().into());
        params.insert("rank_default".into(), self.default_rank.as_str().into());
        serde_json::Value::Object(params)
    }
}

/// Bounded exponential backoff for transient store failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(50),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// No retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.saturating_sub(1) as i32);
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        Duration::from_millis(millis as u64).min(self.max_backoff)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportOutcome {
    /// A new network (or a new version under an existing name)
    Created,
    /// A duplicate source imported again as a new version
    Versioned,
    /// A duplicate source; nothing was written
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportStats {
    pub taxa_created: usize,
    pub taxa_referenced: usize,
    pub samples_created: usize,
    pub samples_referenced: usize,
    pub associations: usize,
    pub observations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportResult {
    pub network_id: NetworkId,
    pub provenance_id: ProvenanceId,
    pub version: u32,
    pub outcome: ImportOutcome,
    pub stats: ImportStats,
}

/// Stage of a running import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStage {
    Taxa,
    Samples,
    Associations,
    Observations,
}

/// Reported after every flushed batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportProgress {
    pub stage: ImportStage,
    /// Records of this stage written so far
    pub done: usize,
    pub total: usize,
}

/// Writes parsed inputs into a store
pub struct ImportPipeline<'a> {
    store: &'a dyn GraphStore,
    retry: RetryPolicy,
    cancel: CancellationToken,
    logger: ProvenanceLogger,
    progress: Option<&'a (dyn Fn(&ImportProgress) + Sync)>,
}

impl<'a> ImportPipeline<'a> {
    pub fn new(store: &'a dyn GraphStore) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
            logger: ProvenanceLogger::new(),
            progress: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Call `progress` after each batch; a replayed attempt reports again from zero
    pub fn with_progress(mut self, progress: &'a (dyn Fn(&ImportProgress) + Sync)) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Import `input` as one network
    pub fn import(
        &self,
        input: &ParsedInput,
        source: &SourceMeta,
        options: &ImportOptions,
    ) -> Result<ImportResult, ImportError> {
        validate_input(&options.network_name, input).map_err(ImportError::SchemaViolation)?;

        let parameters = options.provenance_parameters();
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.try_import(input, source, options, &parameters) {
                Err(ImportError::Storage(e)) if e.is_retryable() => {
                    if attempt >= max_attempts {
                        tracing::warn!(attempts = attempt, error = %e, "import gave up on busy store");
                        return Err(ImportError::StoreTransaction {
                            attempts: attempt,
                            source: e,
                        });
                    }
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(attempt, ?delay, error = %e, "store busy, retrying import");
                    std::thread::sleep(delay);
                }
                other => return other,
            }
        }
    }

    fn checkpoint(&self) -> Result<(), ImportError> {
        if self.cancel.is_cancelled() {
            tracing::info!("import cancelled, rolling back");
            return Err(ImportError::Cancelled);
        }
        Ok(())
    }

    /// Report a flushed batch, then honour cancellation
    fn batch_done(&self, stage: ImportStage, done: usize, total: usize) -> Result<(), ImportError> {
        if let Some(progress) = self.progress {
            progress(&ImportProgress { stage, done, total });
        }
        tracing::trace!(?stage, done, total, "batch written");
        self.checkpoint()
    }

    fn try_import(
        &self,
        input: &ParsedInput,
        source: &SourceMeta,
        options: &ImportOptions,
        parameters: &serde_json::Value,
    ) -> Result<ImportResult, ImportError> {
        self.checkpoint()?;
        let name = options.network_name.trim();
        let batch_size = options.batch_size.max(1);

        let txn = self.store.begin()?;
        let tx: &dyn StoreTransaction = txn.as_ref();
        let parameters_hash = parameters_digest(parameters);

        let mut outcome = ImportOutcome::Created;
        if let Some(existing) = tx.find_provenance(&source.checksum, &parameters_hash)? {
            match options.on_duplicate {
                DuplicatePolicy::Skip => {
                    let version = tx.get_network(&existing.network_id)?.map_or(1, |n| n.version);
                    tracing::info!(network = %existing.network_id, "source already imported, skipping");
                    return Ok(ImportResult {
                        network_id: existing.network_id,
                        provenance_id: existing.id,
                        version,
                        outcome: ImportOutcome::Skipped,
                        stats: ImportStats::default(),
                    });
                }
                DuplicatePolicy::Error => {
                    return Err(ImportError::DuplicateImportConflict {
                        network_id: existing.network_id,
                        provenance_id: existing.id,
                        source_checksum: existing.source_checksum,
                    });
                }
                DuplicatePolicy::Version => outcome = ImportOutcome::Versioned,
            }
        }

        let network = NetworkInfo {
            id: NetworkId::new(),
            name: name.to_string(),
            version: tx.latest_version(name)?.map_or(1, |v| v + 1),
            created_at: Utc::now(),
            source_path: source.path.clone(),
            provenance_id: ProvenanceId::new(),
        };
        tx.insert_network(&network)?;

        let mut resolver = EntityResolver::new();
        let mut taxa: HashMap<String, NodeId> = HashMap::new();
        let mut samples: HashMap<String, NodeId> = HashMap::new();
        let mut created: Vec<AffectedEntity> =
            vec![AffectedEntity::new(NodeKind::Network, network.id.as_str(), EntityAction::Created)];
        let mut stats = ImportStats::default();

        // === Shared entities ===

        let mut done = 0;
        for chunk in input.taxa.chunks(batch_size) {
            for record in chunk {
                let id = resolver.resolve_taxon(tx, record, options.default_rank)?;
                taxa.entry(record.name.trim().to_string()).or_insert(id);
            }
            done += chunk.len();
            self.batch_done(ImportStage::Taxa, done, input.taxa.len())?;
        }

        let mut done = 0;
        for chunk in input.samples.chunks(batch_size) {
            for record in chunk {
                let id = resolver.resolve_sample(tx, record)?;
                samples.entry(record.identifier.trim().to_string()).or_insert(id);
            }
            done += chunk.len();
            self.batch_done(ImportStage::Samples, done, input.samples.len())?;
        }

        // === Associations ===

        for chunk in input.associations.chunks(batch_size) {
            let mut rows = Vec::with_capacity(chunk.len());
            for record in chunk {
                let a = taxon_id(&mut resolver, tx, &mut taxa, &record.taxon_a, options.default_rank)?;
                let b = taxon_id(&mut resolver, tx, &mut taxa, &record.taxon_b, options.default_rank)?;
                let mut assoc = Association::new(network.id.clone(), a, b);
                assoc.weight = record.weight;
                assoc.sign = record.effective_sign();
                assoc.statistic = record.statistic;
                rows.push(assoc);
            }
            tx.insert_associations(&rows)?;
            stats.associations += rows.len();
            created.extend(
                rows.iter()
                    .map(|a| AffectedEntity::new(NodeKind::Association, a.id.as_str(), EntityAction::Created)),
            );
            self.batch_done(ImportStage::Associations, stats.associations, input.associations.len())?;
        }

        // === Observations ===

        for chunk in input.abundances.chunks(batch_size) {
            let mut rows = Vec::with_capacity(chunk.len());
            for record in chunk {
                let sample_id = match samples.get(record.sample.trim()) {
                    Some(id) => id.clone(),
                    None => {
                        let handle = resolver.resolve(tx, &EntityKey::sample(record.sample.trim()))?;
                        samples.insert(record.sample.trim().to_string(), handle.id.clone());
                        handle.id
                    }
                };
                let taxon_id = taxon_id(&mut resolver, tx, &mut taxa, &record.taxon, options.default_rank)?;
                rows.push(Observation {
                    network_id: network.id.clone(),
                    sample_id,
                    taxon_id,
                    abundance: record.abundance,
                });
            }
            tx.insert_observations(&rows)?;
            stats.observations += rows.len();
            self.batch_done(ImportStage::Observations, stats.observations, input.abundances.len())?;
        }

        for sample_id in samples.values() {
            tx.link_sample(sample_id, &network.id)?;
        }

        // === Provenance ===

        let mut affected = created;
        for entity in resolver.into_affected() {
            match (entity.kind, entity.action) {
                (NodeKind::Taxon, EntityAction::Created) => stats.taxa_created += 1,
                (NodeKind::Taxon, _) => stats.taxa_referenced += 1,
                (NodeKind::Sample, EntityAction::Created) => stats.samples_created += 1,
                (NodeKind::Sample, _) => stats.samples_referenced += 1,
                _ => {}
            }
            affected.push(entity);
        }

        let record = self.logger.record(
            tx,
            BatchMetadata {
                provenance_id: network.provenance_id.clone(),
                network_id: network.id.clone(),
                source_path: &source.path,
                source_checksum: &source.checksum,
                parameters,
            },
            affected,
        )?;

        self.checkpoint()?;
        txn.commit()?;

        tracing::info!(
            network = %network.label(),
            id = %network.id,
            associations = stats.associations,
            observations = stats.observations,
            taxa_created = stats.taxa_created,
            "imported network"
        );

        Ok(ImportResult {
            network_id: network.id,
            provenance_id: record.id,
            version: network.version,
            outcome,
            stats,
        })
    }
}

/// Resolve a taxon referenced by name only
fn taxon_id(
    resolver: &mut EntityResolver,
    tx: &dyn StoreTransaction,
    taxa: &mut HashMap<String, NodeId>,
    name: &str,
    default_rank: Rank,
) -> Result<NodeId, ImportError> {
    let name = name.trim();
    if let Some(id) = taxa.get(name) {
        return Ok(id.clone());
    }
    let handle = resolver.resolve(tx, &EntityKey::taxon(name, default_rank))?;
    taxa.insert(name.to_string(), handle.id.clone());
    Ok(handle.id)
}
