//! Read-only queries over stored networks
//!
//! Set algebra across networks (union, intersection, difference, unique),
//! taxonomic aggregation of a single network and tests of its taxa against
//! sample properties. Results are derived views and never written back to
//! the store.

mod aggregate;
mod associate;
mod engine;
mod sets;
mod types;

pub use aggregate::{aggregate, AggregateOptions, AggregatedEdge, SummaryTable, TaxonGroup, UNRESOLVED};
pub use associate::{associate, AssociationOptions, AssociationTable, PropertyAssociation, PropertyTest};
pub use engine::{load_edge_set, resolve_network, QueryEngine, QueryError, QueryResult};
pub use sets::{difference, intersection, union, unique};
pub use types::{
    DerivedEdge, EdgeKey, EdgeSet, IntersectionOptions, NetworkRef, SourcedWeight, TaxonLabel, WeightMerge,
};
