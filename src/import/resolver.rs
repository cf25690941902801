//! Entity resolution: incoming taxon and sample keys to stored nodes
//!
//! Resolution runs inside the import's write transaction. A missing entity
//! is created with an insert that yields to the store's unique constraint,
//! then read back, so two imports introducing the same taxon converge on a
//! single node. The cache lives only as long as one import attempt.

use crate::graph::{NodeId, NodeKind, Rank, Sample, SampleRecord, Taxon, TaxonRecord};
use crate::provenance::{AffectedEntity, EntityAction};
use crate::storage::{StorageError, StoreTransaction};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Identity key of a shared entity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
    Taxon { name: String, rank: Rank },
    Sample { identifier: String },
}

impl EntityKey {
    pub fn taxon(name: impl Into<String>, rank: Rank) -> Self {
        EntityKey::Taxon {
            name: name.into(),
            rank,
        }
    }

    pub fn sample(identifier: impl Into<String>) -> Self {
        EntityKey::Sample {
            identifier: identifier.into(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            EntityKey::Taxon { .. } => NodeKind::Taxon,
            EntityKey::Sample { .. } => NodeKind::Sample,
        }
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKey::Taxon { name, rank } => write!(f, "{} ({})", name, rank),
            EntityKey::Sample { identifier } => f.write_str(identifier),
        }
    }
}

/// A resolved entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityHandle {
    pub id: NodeId,
    pub kind: NodeKind,
    /// True if this resolution created the node
    pub created: bool,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The store disagrees with the identity it just confirmed
    #[error("Entity resolution race for {key}: {detail}")]
    Race { key: EntityKey, detail: String },
}

/// Resolves entity keys within one import attempt
#[derive(Debug, Default)]
pub struct EntityResolver {
    cache: HashMap<EntityKey, NodeId>,
    linked: HashSet<(NodeId, Rank)>,
    affected: Vec<AffectedEntity>,
    affected_index: HashMap<(NodeKind, NodeId), usize>,
}

impl EntityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys resolved so far
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Resolve a key to its node, creating the node if it does not exist yet
    pub fn resolve(
        &mut self,
        tx: &dyn StoreTransaction,
        key: &EntityKey,
    ) -> Result<EntityHandle, ResolveError> {
        match key {
            EntityKey::Taxon { name, rank } => self.resolve_taxon_node(tx, Taxon::new(name.as_str(), *rank)),
            EntityKey::Sample { identifier } => self.resolve_sample_node(tx, Sample::new(identifier.as_str())),
        }
    }

    /// Resolve a taxon record with its lineage and external reference
    pub fn resolve_taxon(
        &mut self,
        tx: &dyn StoreTransaction,
        record: &TaxonRecord,
        default_rank: Rank,
    ) -> Result<NodeId, ResolveError> {
        let rank = record.rank.unwrap_or(default_rank);
        let handle = self.resolve_taxon_node(tx, Taxon::new(record.name.trim(), rank))?;

        if let Some(external_ref) = &record.external_ref {
            let current = tx.get_taxon(&handle.id)?.and_then(|t| t.external_ref);
            if current.is_none() {
                tx.set_taxon_external_ref(&handle.id, external_ref)?;
                if !handle.created {
                    self.mark(NodeKind::Taxon, &handle.id, EntityAction::Modified);
                }
            }
        }

        for (key, value) in &record.properties {
            if tx.set_taxon_property(&handle.id, key.trim(), value)? && !handle.created {
                self.mark(NodeKind::Taxon, &handle.id, EntityAction::Modified);
            }
        }

        // Ancestors, most general first; each is linked to everything above it
        let mut above: Vec<(Rank, NodeId)> = Vec::new();
        for entry in record.lineage.iter().filter(|e| e.rank.is_above(rank)) {
            let ancestor = self.resolve_taxon_node(tx, Taxon::new(entry.name.trim(), entry.rank))?;
            for (higher_rank, higher) in &above {
                self.link(tx, &ancestor.id, *higher_rank, higher)?;
            }
            self.link(tx, &handle.id, entry.rank, &ancestor.id)?;
            above.push((entry.rank, ancestor.id));
        }

        Ok(handle.id)
    }

    /// Resolve a sample record; metadata only applies when the sample is new
    pub fn resolve_sample(
        &mut self,
        tx: &dyn StoreTransaction,
        record: &SampleRecord,
    ) -> Result<NodeId, ResolveError> {
        let mut sample = Sample::new(record.identifier.trim());
        sample.metadata = record.metadata.clone();
        Ok(self.resolve_sample_node(tx, sample)?.id)
    }

    /// Every entity touched so far, in first-touch order
    pub fn into_affected(self) -> Vec<AffectedEntity> {
        self.affected
    }

    fn resolve_taxon_node(
        &mut self,
        tx: &dyn StoreTransaction,
        candidate: Taxon,
    ) -> Result<EntityHandle, ResolveError> {
        let key = EntityKey::taxon(candidate.name.clone(), candidate.rank);
        if let Some(id) = self.cache.get(&key) {
            return Ok(EntityHandle {
                id: id.clone(),
                kind: NodeKind::Taxon,
                created: false,
            });
        }

        let created = tx.insert_taxon_if_absent(&candidate)?;
        let stored = tx
            .find_taxon(&candidate.name, candidate.rank)?
            .ok_or_else(|| ResolveError::Race {
                key: key.clone(),
                detail: "no row after insert".to_string(),
            })?;
        self.confirm(key, candidate.id, stored.id, created)
    }

    fn resolve_sample_node(
        &mut self,
        tx: &dyn StoreTransaction,
        candidate: Sample,
    ) -> Result<EntityHandle, ResolveError> {
        let key = EntityKey::sample(candidate.identifier.clone());
        if let Some(id) = self.cache.get(&key) {
            return Ok(EntityHandle {
                id: id.clone(),
                kind: NodeKind::Sample,
                created: false,
            });
        }

        let created = tx.insert_sample_if_absent(&candidate)?;
        let stored = tx
            .find_sample(&candidate.identifier)?
            .ok_or_else(|| ResolveError::Race {
                key: key.clone(),
                detail: "no row after insert".to_string(),
            })?;
        self.confirm(key, candidate.id, stored.id, created)
    }

    fn confirm(
        &mut self,
        key: EntityKey,
        expected: NodeId,
        stored: NodeId,
        created: bool,
    ) -> Result<EntityHandle, ResolveError> {
        if stored != expected {
            return Err(ResolveError::Race {
                detail: format!("stored id {} differs from expected {}", stored, expected),
                key,
            });
        }

        let kind = key.kind();
        let action = if created {
            EntityAction::Created
        } else {
            EntityAction::Referenced
        };
        self.mark(kind, &stored, action);
        self.cache.insert(key, stored.clone());

        Ok(EntityHandle {
            id: stored,
            kind,
            created,
        })
    }

    fn link(
        &mut self,
        tx: &dyn StoreTransaction,
        taxon: &NodeId,
        rank: Rank,
        ancestor: &NodeId,
    ) -> Result<(), ResolveError> {
        if self.linked.insert((taxon.clone(), rank)) {
            tx.link_lineage(taxon, rank, ancestor)?;
        }
        Ok(())
    }

    /// Record an action; created beats modified beats referenced
    fn mark(&mut self, kind: NodeKind, id: &NodeId, action: EntityAction) {
        let strength = |a: EntityAction| match a {
            EntityAction::Created => 2,
            EntityAction::Modified => 1,
            EntityAction::Referenced => 0,
        };
        match self.affected_index.get(&(kind, id.clone())) {
            Some(&i) => {
                if strength(action) > strength(self.affected[i].action) {
                    self.affected[i].action = action;
                }
            }
            None => {
                self.affected_index.insert((kind, id.clone()), self.affected.len());
                self.affected.push(AffectedEntity::new(kind, id.as_str(), action));
            }
        }
    }
}
