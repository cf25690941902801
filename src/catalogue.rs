//! The catalogue facade
//!
//! `Catalogue` ties a store to its configuration and exposes every
//! operation the command line offers: imports, listings, deletes, queries,
//! export and the schema audit.

use crate::config::{ConfigError, MakoConfig};
use crate::export::{self, ExchangeDocument, ExportError, ExportView};
use crate::graph::{NetworkInfo, NetworkSummary, NodeId, NodeKind, ParsedInput, Rank, Relationship};
use crate::import::{
    attach_properties, read_file, read_files, read_property_table, read_sequences, read_tab_tables, AttachReport,
    CancellationToken, ImportError, ImportOptions, ImportPipeline, ImportResult, ReadError, SourceMeta,
    TabTablePaths, TaxonProperties,
};
use crate::provenance::ProvenanceRecord;
use crate::query::{
    resolve_network, AggregateOptions, AssociationOptions, AssociationTable, EdgeSet, IntersectionOptions,
    QueryEngine, QueryError, SummaryTable,
};
use crate::storage::{GraphStore, SqliteStore, StorageError, StoreReader, StoreTransaction};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors from catalogue operations
#[derive(Debug, Error)]
pub enum MakoError {
    #[error(transparent)]
    Import(#[from] ImportError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("No provenance recorded for network {0}")]
    MissingProvenance(String),

    #[error("No input files given")]
    NoInput,

    #[error("Unknown taxon: {name} at rank {rank}")]
    UnknownTaxon { name: String, rank: Rank },
}

pub type MakoResult<T> = Result<T, MakoError>;

/// A consistency problem found by [`Catalogue::check_schema`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaIssue {
    SelfLoop { network: String, association: NodeId },
    /// A stored relationship joins a node of the wrong kind, or a missing one
    BadEndpoint {
        network: Option<String>,
        relationship: Relationship,
        node: NodeId,
        expected: NodeKind,
        found: Option<NodeKind>,
    },
    /// An abundance recorded for a sample the network does not measure
    UnlinkedObservation { network: String, sample: NodeId },
    MissingProvenance { network: String },
}

impl fmt::Display for SchemaIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaIssue::SelfLoop { network, association } => {
                write!(f, "{}: association {} links a taxon to itself", network, association)
            }
            SchemaIssue::BadEndpoint {
                network,
                relationship,
                node,
                expected,
                found,
            } => {
                if let Some(network) = network {
                    write!(f, "{}: ", network)?;
                }
                let found = found.map_or("nothing", |k| k.as_str());
                write!(f, "{} expects {} {} but found {}", relationship, expected, node, found)
            }
            SchemaIssue::UnlinkedObservation { network, sample } => {
                write!(f, "{}: abundance recorded in {} which is not MEASURED_IN it", network, sample)
            }
            SchemaIssue::MissingProvenance { network } => write!(f, "{}: no provenance record", network),
        }
    }
}

/// Check that `node` has the kind `relationship` declares for one of its ends
fn audit_endpoint<R: StoreReader + ?Sized>(
    reader: &R,
    issues: &mut Vec<SchemaIssue>,
    network: Option<&str>,
    relationship: Relationship,
    node: &NodeId,
    expected: NodeKind,
) -> MakoResult<()> {
    let found = reader.node_kind(node.as_str())?;
    if found != Some(expected) {
        issues.push(SchemaIssue::BadEndpoint {
            network: network.map(str::to_string),
            relationship,
            node: node.clone(),
            expected,
            found,
        });
    }
    Ok(())
}

/// A network catalogue over a graph store
pub struct Catalogue {
    store: Arc<dyn GraphStore>,
    config: MakoConfig,
}

impl Catalogue {
    /// Open the store file named by the configuration
    pub fn open(config: MakoConfig) -> MakoResult<Self> {
        let path = config.db_path();
        let store = SqliteStore::open_with(&path, config.store_options())?;
        tracing::debug!(path = %path.display(), "opened catalogue");
        Ok(Self::with_store(Arc::new(store), config))
    }

    pub fn in_memory(config: MakoConfig) -> MakoResult<Self> {
        let store = SqliteStore::open_in_memory_with(config.store_options())?;
        Ok(Self::with_store(Arc::new(store), config))
    }

    pub fn open_default() -> MakoResult<Self> {
        Self::open(MakoConfig::load()?)
    }

    pub fn with_store(store: Arc<dyn GraphStore>, config: MakoConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &dyn GraphStore {
        self.store.as_ref()
    }

    pub fn config(&self) -> &MakoConfig {
        &self.config
    }

    /// Import options for a network, seeded from configuration
    pub fn import_options(&self, network_name: impl Into<String>) -> ImportOptions {
        self.config.import_options(network_name)
    }

    // === Import Operations ===

    pub fn import(
        &self,
        input: &ParsedInput,
        source: &SourceMeta,
        options: &ImportOptions,
    ) -> MakoResult<ImportResult> {
        self.import_cancellable(input, source, options, CancellationToken::new())
    }

    /// Import, giving up at the next checkpoint once `cancel` fires
    pub fn import_cancellable(
        &self,
        input: &ParsedInput,
        source: &SourceMeta,
        options: &ImportOptions,
        cancel: CancellationToken,
    ) -> MakoResult<ImportResult> {
        let result = ImportPipeline::new(self.store.as_ref())
            .with_retry(self.config.retry_policy())
            .with_cancellation(cancel)
            .import(input, source, options)?;
        Ok(result)
    }

    /// Read and import one file; the network name defaults to the file stem
    pub fn import_file(&self, path: &Path, network_name: Option<&str>) -> MakoResult<ImportResult> {
        let (input, source) = read_file(path)?;
        let options = self.import_options(network_name.map(str::to_string).unwrap_or_else(|| file_stem(path)));
        self.import(&input, &source, &options)
    }

    /// Read several files (e.g. a network and its abundance table) as one import
    pub fn import_files(&self, paths: &[PathBuf], network_name: Option<&str>) -> MakoResult<ImportResult> {
        let first = paths.first().ok_or(MakoError::NoInput)?;
        let (input, source) = read_files(paths)?;
        let options = self.import_options(network_name.map(str::to_string).unwrap_or_else(|| file_stem(first)));
        self.import(&input, &source, &options)
    }

    /// Import a tab-delimited count table with its sidecar tables
    ///
    /// The network name defaults to the count table's file stem.
    pub fn import_tables(&self, paths: &TabTablePaths<'_>, network_name: Option<&str>) -> MakoResult<ImportResult> {
        let (input, source) = read_tab_tables(paths)?;
        let options =
            self.import_options(network_name.map(str::to_string).unwrap_or_else(|| file_stem(paths.counts)));
        self.import(&input, &source, &options)
    }

    // === Taxon Properties ===

    pub fn attach_properties(&self, rank: Rank, properties: &TaxonProperties) -> MakoResult<AttachReport> {
        Ok(attach_properties(self.store.as_ref(), rank, properties)?)
    }

    /// Attach sequences from a FASTA file or a directory of them
    pub fn attach_sequences(&self, path: &Path, rank: Rank) -> MakoResult<AttachReport> {
        let properties = read_sequences(path)?;
        self.attach_properties(rank, &properties)
    }

    /// Attach every column of a tab-delimited table keyed by taxon name
    pub fn attach_property_table(&self, path: &Path, rank: Rank) -> MakoResult<AttachReport> {
        let text = std::fs::read_to_string(path).map_err(|source| ReadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let properties = read_property_table(&text)?;
        self.attach_properties(rank, &properties)
    }

    pub fn taxon_properties(&self, name: &str, rank: Rank) -> MakoResult<BTreeMap<String, String>> {
        let snapshot = self.store.snapshot()?;
        let taxon = snapshot
            .find_taxon(name, rank)?
            .ok_or_else(|| MakoError::UnknownTaxon {
                name: name.to_string(),
                rank,
            })?;
        Ok(snapshot.taxon_properties(&taxon.id)?)
    }

    // === Network Operations ===

    /// All networks ordered by name then version
    pub fn list_networks(&self) -> MakoResult<Vec<NetworkInfo>> {
        let snapshot = self.store.snapshot()?;
        Ok(snapshot.list_networks()?)
    }

    /// Listing with per-network counts, read from one snapshot
    pub fn network_summaries(&self) -> MakoResult<Vec<NetworkSummary>> {
        let snapshot = self.store.snapshot()?;
        let reader = snapshot.as_ref();
        reader
            .list_networks()?
            .into_iter()
            .map(|info| summarize(reader, info))
            .collect()
    }

    pub fn network(&self, selector: &str) -> MakoResult<NetworkSummary> {
        let snapshot = self.store.snapshot()?;
        let reader = snapshot.as_ref();
        let info = resolve_network(reader, selector)?;
        summarize(reader, info)
    }

    /// Delete a network with its associations, observations and provenance
    ///
    /// Taxa and samples stay; other networks may reference them.
    pub fn delete_network(&self, selector: &str) -> MakoResult<NetworkInfo> {
        let txn = self.store.begin()?;
        let tx: &dyn StoreTransaction = txn.as_ref();
        let info = resolve_network(tx, selector)?;
        tx.delete_network(&info.id)?;
        txn.commit()?;
        tracing::info!(network = %info.label(), id = %info.id, "deleted network");
        Ok(info)
    }

    pub fn provenance(&self, selector: &str) -> MakoResult<ProvenanceRecord> {
        let snapshot = self.store.snapshot()?;
        let reader = snapshot.as_ref();
        let info = resolve_network(reader, selector)?;
        reader
            .get_provenance(&info.provenance_id)?
            .ok_or_else(|| MakoError::MissingProvenance(info.label()))
    }

    // === Query Operations ===

    pub fn network_edges(&self, selector: &str) -> MakoResult<EdgeSet> {
        Ok(QueryEngine::new(self.store.as_ref()).network(selector)?)
    }

    pub fn union<S: AsRef<str>>(&self, selectors: &[S]) -> MakoResult<EdgeSet> {
        Ok(QueryEngine::new(self.store.as_ref()).union(selectors)?)
    }

    pub fn intersection<S: AsRef<str>>(
        &self,
        selectors: &[S],
        options: &IntersectionOptions,
    ) -> MakoResult<EdgeSet> {
        Ok(QueryEngine::new(self.store.as_ref()).intersection(selectors, options)?)
    }

    pub fn difference(&self, a: &str, b: &str) -> MakoResult<EdgeSet> {
        Ok(QueryEngine::new(self.store.as_ref()).difference(a, b)?)
    }

    pub fn unique<S: AsRef<str>>(&self, selectors: &[S]) -> MakoResult<EdgeSet> {
        Ok(QueryEngine::new(self.store.as_ref()).unique(selectors)?)
    }

    pub fn aggregate(&self, selector: &str, rank: Rank, options: AggregateOptions) -> MakoResult<SummaryTable> {
        Ok(QueryEngine::new(self.store.as_ref()).aggregate(selector, rank, options)?)
    }

    /// Test a network's taxa against a sample metadata property
    pub fn associate(&self, selector: &str, options: &AssociationOptions) -> MakoResult<AssociationTable> {
        Ok(QueryEngine::new(self.store.as_ref()).associate(selector, options)?)
    }

    pub fn export(&self, view: &dyn ExportView) -> ExchangeDocument {
        export::export(view)
    }

    // === Maintenance Operations ===

    /// Audit the stored graph for consistency problems
    ///
    /// Every stored relationship is checked against the node kinds it
    /// declares in [`Relationship::endpoints`].
    pub fn check_schema(&self) -> MakoResult<Vec<SchemaIssue>> {
        let snapshot = self.store.snapshot()?;
        let reader = snapshot.as_ref();
        let mut issues = Vec::new();

        for info in reader.list_networks()? {
            let network = info.label();
            let scope = Some(network.as_str());

            let (member, _) = Relationship::ParticipatesIn.endpoints();
            for assoc in reader.associations(&info.id)? {
                if assoc.pair.is_self_loop() {
                    issues.push(SchemaIssue::SelfLoop {
                        network: network.clone(),
                        association: assoc.id.clone(),
                    });
                }
                for taxon in [&assoc.pair.a, &assoc.pair.b] {
                    audit_endpoint(reader, &mut issues, scope, Relationship::ParticipatesIn, taxon, member)?;
                }
            }

            let (sample_kind, _) = Relationship::MeasuredIn.endpoints();
            let samples: Vec<NodeId> = reader.network_samples(&info.id)?.into_iter().map(|s| s.id).collect();
            for sample in &samples {
                audit_endpoint(reader, &mut issues, scope, Relationship::MeasuredIn, sample, sample_kind)?;
            }

            let (found_in, found_at) = Relationship::FoundIn.endpoints();
            for obs in reader.observations(&info.id)? {
                audit_endpoint(reader, &mut issues, scope, Relationship::FoundIn, &obs.taxon_id, found_in)?;
                audit_endpoint(reader, &mut issues, scope, Relationship::FoundIn, &obs.sample_id, found_at)?;
                if !samples.contains(&obs.sample_id) {
                    issues.push(SchemaIssue::UnlinkedObservation {
                        network: network.clone(),
                        sample: obs.sample_id,
                    });
                }
            }

            let (_, source) = Relationship::DerivedFrom.endpoints();
            let provenance_node = NodeId::from_string(info.provenance_id.as_str());
            match reader.node_kind(provenance_node.as_str())? {
                None => issues.push(SchemaIssue::MissingProvenance { network }),
                Some(kind) if kind != source => {
                    audit_endpoint(reader, &mut issues, scope, Relationship::DerivedFrom, &provenance_node, source)?
                }
                Some(_) => {
                    let provenance = reader.get_provenance(&info.provenance_id)?;
                    if provenance.map_or(true, |p| p.network_id != info.id) {
                        issues.push(SchemaIssue::MissingProvenance { network });
                    }
                }
            }
        }

        let (child, parent) = Relationship::PartOf.endpoints();
        for (taxon, _, ancestor) in reader.lineage_links()? {
            audit_endpoint(reader, &mut issues, None, Relationship::PartOf, &taxon, child)?;
            audit_endpoint(reader, &mut issues, None, Relationship::PartOf, &ancestor, parent)?;
        }

        if issues.is_empty() {
            tracing::debug!("schema check passed");
        } else {
            tracing::warn!(issues = issues.len(), "schema check found issues");
        }
        Ok(issues)
    }
}

fn summarize<R: StoreReader + ?Sized>(reader: &R, info: NetworkInfo) -> MakoResult<NetworkSummary> {
    let associations = reader.associations(&info.id)?.len();
    let taxa = reader.network_taxa(&info.id)?.len();
    let samples = reader.network_samples(&info.id)?.len();
    Ok(NetworkSummary {
        info,
        associations,
        taxa,
        samples,
    })
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("network")
        .to_string()
}
