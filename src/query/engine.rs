//! Query engine over a graph store
//!
//! Each query resolves its networks and loads their edges from one
//! snapshot, so a concurrent import never shows up half-way through a
//! query. Unknown networks fail the whole query before any computation.

use super::aggregate::{aggregate, AggregateOptions, SummaryTable};
use super::associate::{associate, AssociationOptions, AssociationTable};
use super::sets;
use super::types::{EdgeSet, IntersectionOptions, NetworkRef, TaxonLabel};
use crate::graph::{NetworkId, NetworkInfo, NodeId, Rank};
use crate::storage::{GraphStore, StorageError, StoreReader};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors from queries
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Unknown network: {0}")]
    UnknownNetwork(String),

    #[error("No networks given")]
    NoNetworks,

    #[error("Invalid query options: {0}")]
    InvalidOptions(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type QueryResult<T> = Result<T, QueryError>;

/// Resolve a network selector
///
/// A selector is a network id, `name@version`, or a bare name meaning the
/// latest version of that name.
pub fn resolve_network<R: StoreReader + ?Sized>(reader: &R, selector: &str) -> QueryResult<NetworkInfo> {
    let selector = selector.trim();
    if let Some(info) = reader.get_network(&NetworkId::from_string(selector))? {
        return Ok(info);
    }

    let found = match selector.rsplit_once('@') {
        Some((name, version)) if !name.is_empty() => match version.parse::<u32>() {
            Ok(version) => reader.find_network(name, Some(version))?,
            Err(_) => reader.find_network(selector, None)?,
        },
        _ => reader.find_network(selector, None)?,
    };
    found.ok_or_else(|| QueryError::UnknownNetwork(selector.to_string()))
}

/// Load a stored network as an edge set
pub fn load_edge_set<R: StoreReader + ?Sized>(reader: &R, info: &NetworkInfo) -> QueryResult<EdgeSet> {
    let taxa = reader.network_taxa(&info.id)?;
    let associations = reader.associations(&info.id)?;
    Ok(EdgeSet::from_network(info, &taxa, &associations))
}

/// Read-only queries over the catalogue
pub struct QueryEngine<'a> {
    store: &'a dyn GraphStore,
}

impl<'a> QueryEngine<'a> {
    pub fn new(store: &'a dyn GraphStore) -> Self {
        Self { store }
    }

    /// The edge set of one network
    pub fn network(&self, selector: &str) -> QueryResult<EdgeSet> {
        let snapshot = self.store.snapshot()?;
        let reader = snapshot.as_ref();
        let info = resolve_network(reader, selector)?;
        load_edge_set(reader, &info)
    }

    pub fn union<S: AsRef<str>>(&self, selectors: &[S]) -> QueryResult<EdgeSet> {
        let inputs = self.load_all(selectors)?;
        let result = sets::union(&inputs);
        tracing::debug!(name = %result.name, edges = result.len(), "union");
        Ok(result)
    }

    pub fn intersection<S: AsRef<str>>(
        &self,
        selectors: &[S],
        options: &IntersectionOptions,
    ) -> QueryResult<EdgeSet> {
        options.validate().map_err(QueryError::InvalidOptions)?;
        let inputs = self.load_all(selectors)?;
        let result = sets::intersection(&inputs, options);
        tracing::debug!(name = %result.name, edges = result.len(), "intersection");
        Ok(result)
    }

    pub fn difference(&self, a: &str, b: &str) -> QueryResult<EdgeSet> {
        let inputs = self.load_all(&[a, b])?;
        let result = sets::difference(&inputs[0], &inputs[1]);
        tracing::debug!(name = %result.name, edges = result.len(), "difference");
        Ok(result)
    }

    pub fn unique<S: AsRef<str>>(&self, selectors: &[S]) -> QueryResult<EdgeSet> {
        let inputs = self.load_all(selectors)?;
        let result = sets::unique(&inputs);
        tracing::debug!(name = %result.name, edges = result.len(), "unique");
        Ok(result)
    }

    /// Collapse a network's taxa onto their ancestors at `rank`
    pub fn aggregate(
        &self,
        selector: &str,
        rank: Rank,
        options: AggregateOptions,
    ) -> QueryResult<SummaryTable> {
        let snapshot = self.store.snapshot()?;
        let reader = snapshot.as_ref();
        let info = resolve_network(reader, selector)?;
        let set = load_edge_set(reader, &info)?;

        let mut ancestors: BTreeMap<NodeId, Option<(NodeId, TaxonLabel)>> = BTreeMap::new();
        for (id, label) in &set.taxa {
            let group = if label.rank == rank {
                Some((id.clone(), label.clone()))
            } else {
                reader
                    .lineage(id)?
                    .into_iter()
                    .find(|(at, _)| *at == rank)
                    .map(|(_, ancestor)| (ancestor.id.clone(), TaxonLabel::from(&ancestor)))
            };
            ancestors.insert(id.clone(), group);
        }

        let table = aggregate(&set, NetworkRef::from(&info), rank, &ancestors, options);
        tracing::debug!(
            network = %info.label(),
            rank = rank.as_str(),
            groups = table.groups.len(),
            "aggregate"
        );
        Ok(table)
    }

    /// Test every taxon of a network, associated or only observed, against a sample property
    pub fn associate(&self, selector: &str, options: &AssociationOptions) -> QueryResult<AssociationTable> {
        options.validate().map_err(QueryError::InvalidOptions)?;
        let snapshot = self.store.snapshot()?;
        let reader = snapshot.as_ref();
        let info = resolve_network(reader, selector)?;

        let taxa = reader.network_taxa(&info.id)?;
        let samples = reader.network_samples(&info.id)?;
        let observations = reader.observations(&info.id)?;

        let table = associate(NetworkRef::from(&info), &taxa, &samples, &observations, options);
        tracing::debug!(
            network = %info.label(),
            property = %options.property,
            tested = table.samples_tested,
            found = table.associations.len(),
            "associate"
        );
        Ok(table)
    }

    fn load_all<S: AsRef<str>>(&self, selectors: &[S]) -> QueryResult<Vec<EdgeSet>> {
        if selectors.is_empty() {
            return Err(QueryError::NoNetworks);
        }
        let snapshot = self.store.snapshot()?;
        let reader = snapshot.as_ref();

        let infos = selectors
            .iter()
            .map(|s| resolve_network(reader, s.as_ref()))
            .collect::<QueryResult<Vec<_>>>()?;
        infos.iter().map(|info| load_edge_set(reader, info)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{parse_lineage, AbundanceRecord, AssociationRecord, ParsedInput, SampleRecord, TaxonRecord};
    use crate::import::{ImportOptions, ImportPipeline, InputFormat, SourceMeta};
    use crate::storage::{OpenStore, SqliteStore};

    fn create_test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn import(store: &SqliteStore, name: &str, edges: &[(&str, &str, f64)]) -> NetworkId {
        let mut input = ParsedInput::default();
        for (a, b, w) in edges {
            input.associations.push(AssociationRecord::new(*a, *b).with_weight(*w));
        }
        let source = SourceMeta::from_bytes(
            format!("{}.tsv", name),
            format!("{:?}", edges).as_bytes(),
            InputFormat::EdgeList,
        );
        ImportPipeline::new(store)
            .import(&input, &source, &ImportOptions::new(name))
            .unwrap()
            .network_id
    }

    #[test]
    fn resolves_selectors() {
        let store = create_test_store();
        let id = import(&store, "net1", &[("A", "B", 0.8)]);
        let snapshot = store.snapshot().unwrap();
        let reader = snapshot.as_ref();

        assert_eq!(resolve_network(reader, "net1").unwrap().id, id);
        assert_eq!(resolve_network(reader, "net1@1").unwrap().id, id);
        assert_eq!(resolve_network(reader, id.as_str()).unwrap().id, id);
        assert!(matches!(
            resolve_network(reader, "net1@2"),
            Err(QueryError::UnknownNetwork(_))
        ));
    }

    #[test]
    fn unknown_network_fails_whole_query() {
        let store = create_test_store();
        import(&store, "net1", &[("A", "B", 0.8)]);
        let engine = QueryEngine::new(&store);
        assert!(matches!(
            engine.union(&["net1", "missing"]),
            Err(QueryError::UnknownNetwork(name)) if name == "missing"
        ));
        assert!(matches!(engine.union::<&str>(&[]), Err(QueryError::NoNetworks)));
    }

    #[test]
    fn intersection_over_stored_networks() {
        let store = create_test_store();
        import(&store, "net1", &[("A", "B", 0.8), ("B", "C", 0.2)]);
        import(&store, "net2", &[("B", "A", 0.5)]);

        let engine = QueryEngine::new(&store);
        let result = engine
            .intersection(&["net1", "net2"], &IntersectionOptions::new())
            .unwrap();
        assert_eq!(result.len(), 1);
        let edge = result.edges.values().next().unwrap();
        assert_eq!(edge.weight_values(), vec![0.8, 0.5]);

        assert!(matches!(
            engine.intersection(&["net1"], &IntersectionOptions::new().with_min_fraction(2.0)),
            Err(QueryError::InvalidOptions(_))
        ));
    }

    #[test]
    fn aggregate_uses_lineage() {
        let store = create_test_store();
        let mut input = ParsedInput::default();
        input.taxa.push(TaxonRecord::new("s1").with_lineage(parse_lineage("k__Bacteria;g__Alpha;s__s1")));
        input.taxa.push(TaxonRecord::new("s2").with_lineage(parse_lineage("k__Bacteria;g__Alpha;s__s2")));
        input.taxa.push(TaxonRecord::new("s3"));
        input.associations.push(AssociationRecord::new("s1", "s2").with_weight(0.4));
        input.associations.push(AssociationRecord::new("s1", "s3").with_weight(0.6));
        let source = SourceMeta::from_bytes("lineage.tsv", b"lineage", InputFormat::EdgeList);
        ImportPipeline::new(&store)
            .import(&input, &source, &ImportOptions::new("lineage"))
            .unwrap();

        let engine = QueryEngine::new(&store);
        let table = engine
            .aggregate("lineage", Rank::Genus, AggregateOptions::new())
            .unwrap();
        assert_eq!(table.groups.len(), 2);
        let alpha = table.groups.iter().find(|g| g.label == "Alpha").unwrap();
        assert_eq!(alpha.members.len(), 2);
        assert_eq!(alpha.internal_associations, 1);
        assert!(table.group(crate::query::UNRESOLVED).is_some());
        assert_eq!(table.edges.len(), 1);
    }

    #[test]
    fn associate_tests_network_taxa_against_sample_metadata() {
        let store = create_test_store();
        let mut input = ParsedInput::default();
        input.associations.push(AssociationRecord::new("Rising", "Flat").with_weight(0.3));
        for i in 0..8 {
            let sample = format!("S{}", i);
            input.samples.push(SampleRecord::new(&sample).with_metadata("temperature", format!("{}", 10 + i)));
            input.abundances.push(AbundanceRecord::new(&sample, "Rising", (i * 3 + 1) as f64));
            input.abundances.push(AbundanceRecord::new(&sample, "Flat", 5.0));
        }
        input.abundances.push(AbundanceRecord::new("S0", "Outsider", 9.0));
        let source = SourceMeta::from_bytes("temps.tsv", b"temps", InputFormat::EdgeList);
        ImportPipeline::new(&store)
            .import(&input, &source, &ImportOptions::new("temps"))
            .unwrap();

        let engine = QueryEngine::new(&store);
        let table = engine
            .associate("temps", &AssociationOptions::new("temperature"))
            .unwrap();
        assert!(table.numeric);
        assert_eq!(table.samples_tested, 8);
        assert_eq!(table.associations.len(), 1);
        assert_eq!(table.associations[0].taxon_name, "Rising");
        assert!((table.associations[0].statistic - 1.0).abs() < 1e-12);

        assert!(matches!(
            engine.associate("temps", &AssociationOptions::new("temperature").with_alpha(1.5)),
            Err(QueryError::InvalidOptions(_))
        ));
        assert!(matches!(
            engine.associate("absent", &AssociationOptions::new("temperature")),
            Err(QueryError::UnknownNetwork(_))
        ));
    }
}
