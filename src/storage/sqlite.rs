//! SQLite storage backend
//!
//! Entity identity lives in the schema: taxa are unique on (name, rank),
//! samples on identifier, networks on (name, version), associations on
//! (network, taxon pair). Everything a network owns cascades on delete.

use super::traits::{
    GraphStore, OpenStore, StorageError, StorageResult, StoreReader, StoreSnapshot,
    StoreTransaction,
};
use crate::graph::{
    Association, NetworkId, NetworkInfo, NodeId, NodeKind, Observation, Rank, Sample, Sign, Taxon,
    TaxonPair,
};
use crate::provenance::{AffectedEntity, ProvenanceId, ProvenanceRecord};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

/// Connection settings for [`SqliteStore`]
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// How long a connection waits on a locked database before failing
    pub busy_timeout: Duration,
    /// Idle connections kept for reuse
    pub max_idle: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(5_000),
            max_idle: 4,
        }
    }
}

/// SQLite-backed catalogue store
///
/// Holds a small pool of connections. The pool lock is only held while a
/// connection is checked out or returned, never across a query.
pub struct SqliteStore {
    path: PathBuf,
    options: StoreOptions,
    pool: Mutex<Vec<Connection>>,
    /// Directory of a throwaway store, removed on drop
    scratch: Option<TempDir>,
}

impl SqliteStore {
    /// Open or create a store at `path` with explicit options
    pub fn open_with(path: impl AsRef<Path>, options: StoreOptions) -> StorageResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::create(path.as_ref().to_path_buf(), options, None)
    }

    /// Create a throwaway store with explicit options
    ///
    /// The database is a WAL file in a private temporary directory, so
    /// readers keep snapshot isolation while a writer is open exactly as
    /// they do on a named store. Durability is switched off.
    pub fn open_in_memory_with(options: StoreOptions) -> StorageResult<Self> {
        let scratch = tempfile::Builder::new().prefix("mako-").tempdir()?;
        let path = scratch.path().join("mako.db");
        Self::create(path, options, Some(scratch))
    }

    fn create(path: PathBuf, options: StoreOptions, scratch: Option<TempDir>) -> StorageResult<Self> {
        let store = Self {
            path,
            options,
            pool: Mutex::new(Vec::new()),
            scratch,
        };
        let conn = store.connect()?;
        Self::init_schema(&conn)?;
        store.release(conn);
        Ok(store)
    }

    /// Path of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True for stores created by [`SqliteStore::open_in_memory_with`]
    pub fn is_ephemeral(&self) -> bool {
        self.scratch.is_some()
    }

    /// Initialize the database schema
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS taxa (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                rank TEXT NOT NULL,
                external_ref TEXT,
                UNIQUE (name, rank)
            );

            -- PART_OF: one ancestor per rank
            CREATE TABLE IF NOT EXISTS lineage (
                taxon_id TEXT NOT NULL REFERENCES taxa(id),
                rank TEXT NOT NULL,
                ancestor_id TEXT NOT NULL REFERENCES taxa(id),
                PRIMARY KEY (taxon_id, rank)
            );

            -- Free-form taxon attributes, e.g. a 16S sequence
            CREATE TABLE IF NOT EXISTS taxon_properties (
                taxon_id TEXT NOT NULL REFERENCES taxa(id),
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (taxon_id, key)
            );

            CREATE TABLE IF NOT EXISTS samples (
                id TEXT PRIMARY KEY,
                identifier TEXT NOT NULL UNIQUE,
                metadata_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS networks (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                version INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                source_path TEXT NOT NULL,
                provenance_id TEXT NOT NULL,
                UNIQUE (name, version)
            );

            -- Undirected: the pair is stored sorted
            CREATE TABLE IF NOT EXISTS associations (
                id TEXT PRIMARY KEY,
                network_id TEXT NOT NULL REFERENCES networks(id) ON DELETE CASCADE,
                taxon_a TEXT NOT NULL REFERENCES taxa(id),
                taxon_b TEXT NOT NULL REFERENCES taxa(id),
                weight REAL,
                sign INTEGER,
                statistic REAL,
                UNIQUE (network_id, taxon_a, taxon_b),
                CHECK (taxon_a < taxon_b)
            );

            CREATE INDEX IF NOT EXISTS idx_associations_pair
                ON associations(taxon_a, taxon_b);

            -- FOUND_IN, scoped to the importing network
            CREATE TABLE IF NOT EXISTS observations (
                network_id TEXT NOT NULL REFERENCES networks(id) ON DELETE CASCADE,
                sample_id TEXT NOT NULL REFERENCES samples(id),
                taxon_id TEXT NOT NULL REFERENCES taxa(id),
                abundance REAL NOT NULL,
                PRIMARY KEY (network_id, sample_id, taxon_id)
            );

            CREATE TABLE IF NOT EXISTS measured_in (
                sample_id TEXT NOT NULL REFERENCES samples(id),
                network_id TEXT NOT NULL REFERENCES networks(id) ON DELETE CASCADE,
                PRIMARY KEY (sample_id, network_id)
            );

            CREATE TABLE IF NOT EXISTS provenance (
                id TEXT PRIMARY KEY,
                network_id TEXT NOT NULL UNIQUE REFERENCES networks(id) ON DELETE CASCADE,
                source_path TEXT NOT NULL,
                source_checksum TEXT NOT NULL,
                parameters_json TEXT NOT NULL,
                parameters_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_provenance_source
                ON provenance(source_checksum, parameters_hash);

            CREATE TABLE IF NOT EXISTS provenance_entities (
                provenance_id TEXT NOT NULL REFERENCES provenance(id) ON DELETE CASCADE,
                kind TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                action TEXT NOT NULL,
                PRIMARY KEY (provenance_id, kind, entity_id)
            );

            -- Concurrent reads during writes
            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    /// Open and configure a fresh connection
    fn connect(&self) -> StorageResult<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.options.busy_timeout)?;
        // Per-connection settings
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        if self.is_ephemeral() {
            conn.execute_batch("PRAGMA synchronous = OFF;")?;
        }
        Ok(conn)
    }

    fn checkout(&self) -> StorageResult<PooledConnection<'_>> {
        let idle = self.pool.lock().map_err(|_| StorageError::Poisoned)?.pop();
        let conn = match idle {
            Some(conn) => conn,
            None => self.connect()?,
        };
        Ok(PooledConnection {
            store: self,
            conn: Some(conn),
        })
    }

    fn release(&self, conn: Connection) {
        if let Ok(mut pool) = self.pool.lock() {
            if pool.len() < self.options.max_idle {
                pool.push(conn);
            }
        }
    }
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        Self::open_with(path, StoreOptions::default())
    }

    fn open_in_memory() -> StorageResult<Self> {
        Self::open_in_memory_with(StoreOptions::default())
    }
}

impl GraphStore for SqliteStore {
    fn begin(&self) -> StorageResult<Box<dyn StoreTransaction + '_>> {
        let conn = self.checkout()?;
        // Take the write lock up front so writers serialize here, not mid-import
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteTransaction { conn, finished: false }))
    }

    fn snapshot(&self) -> StorageResult<Box<dyn StoreSnapshot + '_>> {
        let conn = self.checkout()?;
        conn.execute_batch("BEGIN DEFERRED")?;
        // The first read pins the snapshot
        if let Err(e) = conn.query_row("SELECT COUNT(*) FROM networks", [], |row| row.get::<_, i64>(0)) {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(e.into());
        }
        Ok(Box::new(SqliteSnapshot { conn }))
    }
}

/// A connection borrowed from the pool, returned on drop
struct PooledConnection<'a> {
    store: &'a SqliteStore,
    conn: Option<Connection>,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only taken in drop
        self.conn.as_ref().unwrap_or_else(|| unreachable!("pooled connection used after release"))
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.store.release(conn);
        }
    }
}

/// Gives the shared read implementation access to a connection
pub trait ConnectionHolder {
    fn conn(&self) -> &Connection;
}

struct SqliteTransaction<'a> {
    conn: PooledConnection<'a>,
    finished: bool,
}

impl ConnectionHolder for SqliteTransaction<'_> {
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

struct SqliteSnapshot<'a> {
    conn: PooledConnection<'a>,
}

impl ConnectionHolder for SqliteSnapshot<'_> {
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for SqliteSnapshot<'_> {
    fn drop(&mut self) {
        let _ = self.conn.execute_batch("ROLLBACK");
    }
}

impl StoreSnapshot for SqliteSnapshot<'_> {}

// === Row conversion ===

fn parse_rank(value: String) -> StorageResult<Rank> {
    value.parse().map_err(|_| StorageError::InvalidValue {
        table: "taxa",
        column: "rank",
        value,
    })
}

fn parse_time(value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::DateParse(e.to_string()))
}

fn row_to_taxon(id: String, name: String, rank: String, external_ref: Option<String>) -> StorageResult<Taxon> {
    Ok(Taxon {
        id: NodeId::from_string(id),
        name,
        rank: parse_rank(rank)?,
        external_ref,
    })
}

fn row_to_sample(id: String, identifier: String, metadata_json: String) -> StorageResult<Sample> {
    Ok(Sample {
        id: NodeId::from_string(id),
        identifier,
        metadata: serde_json::from_str(&metadata_json)?,
    })
}

type NetworkRow = (String, String, i64, String, String, String);

fn network_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NetworkRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn row_to_network(row: NetworkRow) -> StorageResult<NetworkInfo> {
    let (id, name, version, created_at, source_path, provenance_id) = row;
    Ok(NetworkInfo {
        id: NetworkId::from_string(id),
        name,
        version: u32::try_from(version).map_err(|_| StorageError::InvalidValue {
            table: "networks",
            column: "version",
            value: version.to_string(),
        })?,
        created_at: parse_time(&created_at)?,
        source_path,
        provenance_id: ProvenanceId::from_string(provenance_id),
    })
}

const NETWORK_COLUMNS: &str = "id, name, version, created_at, source_path, provenance_id";
const PROVENANCE_COLUMNS: &str =
    "id, network_id, source_path, source_checksum, parameters_json, parameters_hash, created_at";

type ProvenanceRow = (String, String, String, String, String, String, String);

fn provenance_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProvenanceRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn load_provenance(conn: &Connection, row: ProvenanceRow) -> StorageResult<ProvenanceRecord> {
    let (id, network_id, source_path, source_checksum, parameters_json, parameters_hash, created_at) = row;

    let mut stmt = conn.prepare_cached(
        "SELECT kind, entity_id, action FROM provenance_entities WHERE provenance_id = ?1 ORDER BY rowid",
    )?;
    let rows = stmt.query_map(params![id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut entities = Vec::new();
    for row in rows {
        let (kind, entity_id, action) = row?;
        let kind = NodeKind::parse(&kind).ok_or_else(|| StorageError::InvalidValue {
            table: "provenance_entities",
            column: "kind",
            value: kind.clone(),
        })?;
        let action = action.parse().map_err(|_| StorageError::InvalidValue {
            table: "provenance_entities",
            column: "action",
            value: action.clone(),
        })?;
        entities.push(AffectedEntity::new(kind, entity_id, action));
    }

    Ok(ProvenanceRecord {
        id: ProvenanceId::from_string(id),
        network_id: NetworkId::from_string(network_id),
        source_path,
        source_checksum,
        parameters: serde_json::from_str(&parameters_json)?,
        parameters_hash,
        created_at: parse_time(&created_at)?,
        entities,
    })
}

impl<T: ConnectionHolder> StoreReader for T {
    // === Taxon Operations ===

    fn find_taxon(&self, name: &str, rank: Rank) -> StorageResult<Option<Taxon>> {
        let row = self
            .conn()
            .query_row(
                "SELECT id, name, rank, external_ref FROM taxa WHERE name = ?1 AND rank = ?2",
                params![name, rank.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;
        row.map(|(id, name, rank, ext)| row_to_taxon(id, name, rank, ext))
            .transpose()
    }

    fn get_taxon(&self, id: &NodeId) -> StorageResult<Option<Taxon>> {
        let row = self
            .conn()
            .query_row(
                "SELECT id, name, rank, external_ref FROM taxa WHERE id = ?1",
                params![id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;
        row.map(|(id, name, rank, ext)| row_to_taxon(id, name, rank, ext))
            .transpose()
    }

    fn lineage(&self, id: &NodeId) -> StorageResult<Vec<(Rank, Taxon)>> {
        let mut stmt = self.conn().prepare_cached(
            r#"
            SELECT l.rank, t.id, t.name, t.rank, t.external_ref
            FROM lineage l JOIN taxa t ON t.id = l.ancestor_id
            WHERE l.taxon_id = ?1
            "#,
        )?;
        let rows = stmt.query_map(params![id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut lineage = Vec::new();
        for row in rows {
            let (at, id, name, rank, ext) = row?;
            lineage.push((parse_rank(at)?, row_to_taxon(id, name, rank, ext)?));
        }
        lineage.sort_by_key(|(rank, _)| *rank);
        Ok(lineage)
    }

    fn count_taxa(&self) -> StorageResult<usize> {
        let n: i64 = self.conn().query_row("SELECT COUNT(*) FROM taxa", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn lineage_links(&self) -> StorageResult<Vec<(NodeId, Rank, NodeId)>> {
        let mut stmt = self
            .conn()
            .prepare_cached("SELECT taxon_id, rank, ancestor_id FROM lineage ORDER BY taxon_id, rank")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut links = Vec::new();
        for row in rows {
            let (taxon, rank, ancestor) = row?;
            links.push((NodeId::from_string(taxon), parse_rank(rank)?, NodeId::from_string(ancestor)));
        }
        Ok(links)
    }

    fn taxon_properties(&self, id: &NodeId) -> StorageResult<BTreeMap<String, String>> {
        let mut stmt = self
            .conn()
            .prepare_cached("SELECT key, value FROM taxon_properties WHERE taxon_id = ?1")?;
        let rows = stmt.query_map(params![id.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        Ok(rows.collect::<Result<BTreeMap<_, _>, _>>()?)
    }

    // === Sample Operations ===

    fn find_sample(&self, identifier: &str) -> StorageResult<Option<Sample>> {
        let row = self
            .conn()
            .query_row(
                "SELECT id, identifier, metadata_json FROM samples WHERE identifier = ?1",
                params![identifier],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        row.map(|(id, identifier, metadata)| row_to_sample(id, identifier, metadata))
            .transpose()
    }

    fn count_samples(&self) -> StorageResult<usize> {
        let n: i64 = self.conn().query_row("SELECT COUNT(*) FROM samples", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    // === Network Operations ===

    fn get_network(&self, id: &NetworkId) -> StorageResult<Option<NetworkInfo>> {
        let row = self
            .conn()
            .query_row(
                &format!("SELECT {} FROM networks WHERE id = ?1", NETWORK_COLUMNS),
                params![id.as_str()],
                network_from_row,
            )
            .optional()?;
        row.map(row_to_network).transpose()
    }

    fn find_network(&self, name: &str, version: Option<u32>) -> StorageResult<Option<NetworkInfo>> {
        let row = match version {
            Some(version) => self
                .conn()
                .query_row(
                    &format!("SELECT {} FROM networks WHERE name = ?1 AND version = ?2", NETWORK_COLUMNS),
                    params![name, version],
                    network_from_row,
                )
                .optional()?,
            None => self
                .conn()
                .query_row(
                    &format!(
                        "SELECT {} FROM networks WHERE name = ?1 ORDER BY version DESC LIMIT 1",
                        NETWORK_COLUMNS
                    ),
                    params![name],
                    network_from_row,
                )
                .optional()?,
        };
        row.map(row_to_network).transpose()
    }

    fn list_networks(&self) -> StorageResult<Vec<NetworkInfo>> {
        let mut stmt = self.conn().prepare_cached(&format!(
            "SELECT {} FROM networks ORDER BY name, version",
            NETWORK_COLUMNS
        ))?;
        let rows = stmt.query_map([], network_from_row)?;

        let mut networks = Vec::new();
        for row in rows {
            networks.push(row_to_network(row?)?);
        }
        Ok(networks)
    }

    fn latest_version(&self, name: &str) -> StorageResult<Option<u32>> {
        let version: Option<i64> = self.conn().query_row(
            "SELECT MAX(version) FROM networks WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(version.map(|v| v as u32))
    }

    fn associations(&self, network_id: &NetworkId) -> StorageResult<Vec<Association>> {
        let mut stmt = self.conn().prepare_cached(
            r#"
            SELECT id, taxon_a, taxon_b, weight, sign, statistic
            FROM associations WHERE network_id = ?1
            ORDER BY taxon_a, taxon_b
            "#,
        )?;
        let rows = stmt.query_map(params![network_id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<f64>>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, Option<f64>>(5)?,
            ))
        })?;

        let mut associations = Vec::new();
        for row in rows {
            let (id, a, b, weight, sign, statistic) = row?;
            associations.push(Association {
                id: NodeId::from_string(id),
                network_id: network_id.clone(),
                pair: TaxonPair::new(NodeId::from_string(a), NodeId::from_string(b)),
                weight,
                sign: sign.and_then(Sign::from_i64),
                statistic,
            });
        }
        Ok(associations)
    }

    fn observations(&self, network_id: &NetworkId) -> StorageResult<Vec<Observation>> {
        let mut stmt = self.conn().prepare_cached(
            "SELECT sample_id, taxon_id, abundance FROM observations WHERE network_id = ?1 ORDER BY sample_id, taxon_id",
        )?;
        let rows = stmt.query_map(params![network_id.as_str()], |row| {
            Ok(Observation {
                network_id: network_id.clone(),
                sample_id: NodeId::from_string(row.get::<_, String>(0)?),
                taxon_id: NodeId::from_string(row.get::<_, String>(1)?),
                abundance: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn network_taxa(&self, network_id: &NetworkId) -> StorageResult<Vec<Taxon>> {
        let mut stmt = self.conn().prepare_cached(
            r#"
            SELECT id, name, rank, external_ref FROM taxa WHERE id IN (
                SELECT taxon_a FROM associations WHERE network_id = ?1
                UNION SELECT taxon_b FROM associations WHERE network_id = ?1
                UNION SELECT taxon_id FROM observations WHERE network_id = ?1
            )
            ORDER BY name, rank
            "#,
        )?;
        let rows = stmt.query_map(params![network_id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut taxa = Vec::new();
        for row in rows {
            let (id, name, rank, ext) = row?;
            taxa.push(row_to_taxon(id, name, rank, ext)?);
        }
        Ok(taxa)
    }

    fn network_samples(&self, network_id: &NetworkId) -> StorageResult<Vec<Sample>> {
        let mut stmt = self.conn().prepare_cached(
            r#"
            SELECT s.id, s.identifier, s.metadata_json
            FROM measured_in m JOIN samples s ON s.id = m.sample_id
            WHERE m.network_id = ?1
            ORDER BY s.identifier
            "#,
        )?;
        let rows = stmt.query_map(params![network_id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut samples = Vec::new();
        for row in rows {
            let (id, identifier, metadata) = row?;
            samples.push(row_to_sample(id, identifier, metadata)?);
        }
        Ok(samples)
    }

    // === Provenance Operations ===

    fn get_provenance(&self, id: &ProvenanceId) -> StorageResult<Option<ProvenanceRecord>> {
        let row = self
            .conn()
            .query_row(
                &format!("SELECT {} FROM provenance WHERE id = ?1", PROVENANCE_COLUMNS),
                params![id.as_str()],
                provenance_from_row,
            )
            .optional()?;
        row.map(|row| load_provenance(self.conn(), row)).transpose()
    }

    fn find_provenance(
        &self,
        source_checksum: &str,
        parameters_hash: &str,
    ) -> StorageResult<Option<ProvenanceRecord>> {
        let row = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {} FROM provenance WHERE source_checksum = ?1 AND parameters_hash = ?2 \
                     ORDER BY created_at, rowid LIMIT 1",
                    PROVENANCE_COLUMNS
                ),
                params![source_checksum, parameters_hash],
                provenance_from_row,
            )
            .optional()?;
        row.map(|row| load_provenance(self.conn(), row)).transpose()
    }

    fn node_kind(&self, id: &str) -> StorageResult<Option<NodeKind>> {
        let kind: Option<String> = self
            .conn()
            .query_row(
                r#"
                SELECT 'taxon' FROM taxa WHERE id = ?1
                UNION ALL SELECT 'sample' FROM samples WHERE id = ?1
                UNION ALL SELECT 'network' FROM networks WHERE id = ?1
                UNION ALL SELECT 'association' FROM associations WHERE id = ?1
                UNION ALL SELECT 'provenance' FROM provenance WHERE id = ?1
                LIMIT 1
                "#,
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(kind.as_deref().and_then(NodeKind::parse))
    }
}

impl StoreTransaction for SqliteTransaction<'_> {
    fn insert_taxon_if_absent(&self, taxon: &Taxon) -> StorageResult<bool> {
        let inserted = self.conn.execute(
            r#"
            INSERT INTO taxa (id, name, rank, external_ref)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT DO NOTHING
            "#,
            params![taxon.id.as_str(), taxon.name, taxon.rank.as_str(), taxon.external_ref],
        )?;
        Ok(inserted == 1)
    }

    fn set_taxon_external_ref(&self, id: &NodeId, external_ref: &str) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE taxa SET external_ref = ?2 WHERE id = ?1",
            params![id.as_str(), external_ref],
        )?;
        Ok(())
    }

    fn set_taxon_property(&self, id: &NodeId, key: &str, value: &str) -> StorageResult<bool> {
        let changed = self.conn.execute(
            r#"
            INSERT INTO taxon_properties (taxon_id, key, value)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(taxon_id, key) DO UPDATE SET value = excluded.value
            WHERE value != excluded.value
            "#,
            params![id.as_str(), key, value],
        )?;
        Ok(changed == 1)
    }

    fn link_lineage(&self, taxon: &NodeId, rank: Rank, ancestor: &NodeId) -> StorageResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO lineage (taxon_id, rank, ancestor_id)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(taxon_id, rank) DO NOTHING
            "#,
            params![taxon.as_str(), rank.as_str(), ancestor.as_str()],
        )?;
        Ok(())
    }

    fn insert_sample_if_absent(&self, sample: &Sample) -> StorageResult<bool> {
        let metadata_json = serde_json::to_string(&sample.metadata)?;
        let inserted = self.conn.execute(
            r#"
            INSERT INTO samples (id, identifier, metadata_json)
            VALUES (?1, ?2, ?3)
            ON CONFLICT DO NOTHING
            "#,
            params![sample.id.as_str(), sample.identifier, metadata_json],
        )?;
        Ok(inserted == 1)
    }

    fn insert_network(&self, network: &NetworkInfo) -> StorageResult<()> {
        self.conn.execute(
            &format!("INSERT INTO networks ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)", NETWORK_COLUMNS),
            params![
                network.id.as_str(),
                network.name,
                network.version,
                network.created_at.to_rfc3339(),
                network.source_path,
                network.provenance_id.as_str(),
            ],
        )?;
        Ok(())
    }

    fn insert_associations(&self, associations: &[Association]) -> StorageResult<()> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            INSERT INTO associations (id, network_id, taxon_a, taxon_b, weight, sign, statistic)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )?;
        for assoc in associations {
            stmt.execute(params![
                assoc.id.as_str(),
                assoc.network_id.as_str(),
                assoc.pair.a.as_str(),
                assoc.pair.b.as_str(),
                assoc.weight,
                assoc.sign.map(|s| s.as_i64()),
                assoc.statistic,
            ])?;
        }
        Ok(())
    }

    fn insert_observations(&self, observations: &[Observation]) -> StorageResult<()> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            INSERT INTO observations (network_id, sample_id, taxon_id, abundance)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )?;
        for obs in observations {
            stmt.execute(params![
                obs.network_id.as_str(),
                obs.sample_id.as_str(),
                obs.taxon_id.as_str(),
                obs.abundance,
            ])?;
        }
        Ok(())
    }

    fn link_sample(&self, sample: &NodeId, network_id: &NetworkId) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO measured_in (sample_id, network_id) VALUES (?1, ?2) ON CONFLICT DO NOTHING",
            params![sample.as_str(), network_id.as_str()],
        )?;
        Ok(())
    }

    fn insert_provenance(&self, record: &ProvenanceRecord) -> StorageResult<()> {
        self.conn.execute(
            &format!("INSERT INTO provenance ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)", PROVENANCE_COLUMNS),
            params![
                record.id.as_str(),
                record.network_id.as_str(),
                record.source_path,
                record.source_checksum,
                serde_json::to_string(&record.parameters)?,
                record.parameters_hash,
                record.created_at.to_rfc3339(),
            ],
        )?;

        let mut stmt = self.conn.prepare_cached(
            r#"
            INSERT INTO provenance_entities (provenance_id, kind, entity_id, action)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT DO NOTHING
            "#,
        )?;
        for entity in &record.entities {
            stmt.execute(params![
                record.id.as_str(),
                entity.kind.as_str(),
                entity.id,
                entity.action.as_str(),
            ])?;
        }
        Ok(())
    }

    fn delete_network(&self, id: &NetworkId) -> StorageResult<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM networks WHERE id = ?1", params![id.as_str()])?;
        Ok(deleted > 0)
    }

    fn commit(mut self: Box<Self>) -> StorageResult<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::EntityAction;

    fn create_test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn create_test_network(name: &str, version: u32) -> NetworkInfo {
        NetworkInfo {
            id: NetworkId::new(),
            name: name.to_string(),
            version,
            created_at: Utc::now(),
            source_path: format!("{}.tsv", name),
            provenance_id: ProvenanceId::new(),
        }
    }

    fn create_test_provenance(network: &NetworkInfo, checksum: &str) -> ProvenanceRecord {
        ProvenanceRecord {
            id: network.provenance_id.clone(),
            network_id: network.id.clone(),
            source_path: network.source_path.clone(),
            source_checksum: checksum.to_string(),
            parameters: serde_json::json!({"network": network.name}),
            parameters_hash: "params".to_string(),
            created_at: Utc::now(),
            entities: vec![AffectedEntity::new(
                NodeKind::Network,
                network.id.as_str(),
                EntityAction::Created,
            )],
        }
    }

    /// Write a network with one association between two fresh taxa
    fn seed_network(store: &SqliteStore, name: &str) -> (NetworkInfo, Taxon, Taxon) {
        let a = Taxon::new("TaxonA", Rank::Otu);
        let b = Taxon::new("TaxonB", Rank::Otu);
        let network = create_test_network(name, 1);

        let tx = store.begin().unwrap();
        tx.insert_taxon_if_absent(&a).unwrap();
        tx.insert_taxon_if_absent(&b).unwrap();
        tx.insert_network(&network).unwrap();
        tx.insert_associations(&[Association::new(network.id.clone(), a.id.clone(), b.id.clone())
            .with_weight(0.8)])
            .unwrap();
        tx.insert_provenance(&create_test_provenance(&network, "abc")).unwrap();
        tx.commit().unwrap();

        (network, a, b)
    }

    #[test]
    fn test_taxon_insert_is_idempotent() {
        let store = create_test_store();
        let taxon = Taxon::new("Bacteroides", Rank::Genus);

        let tx = store.begin().unwrap();
        assert!(tx.insert_taxon_if_absent(&taxon).unwrap());
        assert!(!tx.insert_taxon_if_absent(&taxon).unwrap());
        tx.commit().unwrap();

        let snap = store.snapshot().unwrap();
        assert_eq!(snap.count_taxa().unwrap(), 1);
        let found = snap.find_taxon("Bacteroides", Rank::Genus).unwrap().unwrap();
        assert_eq!(found.id, taxon.id);
        assert!(snap.find_taxon("Bacteroides", Rank::Otu).unwrap().is_none());
    }

    #[test]
    fn test_uncommitted_transaction_rolls_back() {
        let store = create_test_store();
        {
            let tx = store.begin().unwrap();
            tx.insert_taxon_if_absent(&Taxon::new("Ghost", Rank::Otu)).unwrap();
        }
        assert_eq!(store.snapshot().unwrap().count_taxa().unwrap(), 0);
    }

    #[test]
    fn test_network_round_trip_and_lookup() {
        let store = create_test_store();
        let (network, a, b) = seed_network(&store, "net1");

        let snap = store.snapshot().unwrap();
        let loaded = snap.get_network(&network.id).unwrap().unwrap();
        assert_eq!(loaded.name, "net1");
        assert_eq!(loaded.version, 1);
        assert_eq!(snap.find_network("net1", None).unwrap().unwrap().id, network.id);
        assert!(snap.find_network("net1", Some(2)).unwrap().is_none());
        assert_eq!(snap.latest_version("net1").unwrap(), Some(1));
        assert_eq!(snap.latest_version("other").unwrap(), None);

        let assocs = snap.associations(&network.id).unwrap();
        assert_eq!(assocs.len(), 1);
        assert_eq!(assocs[0].pair, TaxonPair::new(a.id, b.id));
        assert_eq!(assocs[0].weight, Some(0.8));
        assert_eq!(assocs[0].sign, Some(Sign::Positive));
    }

    #[test]
    fn test_association_pair_must_be_distinct() {
        let store = create_test_store();
        let a = Taxon::new("TaxonA", Rank::Otu);
        let network = create_test_network("loops", 1);

        let tx = store.begin().unwrap();
        tx.insert_taxon_if_absent(&a).unwrap();
        tx.insert_network(&network).unwrap();
        let looped = Association::new(network.id.clone(), a.id.clone(), a.id.clone());
        assert!(tx.insert_associations(&[looped]).is_err());
    }

    #[test]
    fn test_provenance_round_trip() {
        let store = create_test_store();
        let (network, _, _) = seed_network(&store, "net1");

        let snap = store.snapshot().unwrap();
        let record = snap.get_provenance(&network.provenance_id).unwrap().unwrap();
        assert_eq!(record.network_id, network.id);
        assert_eq!(record.entities.len(), 1);
        assert_eq!(record.parameters["network"], "net1");

        let found = snap.find_provenance("abc", "params").unwrap().unwrap();
        assert_eq!(found.id, record.id);
        assert!(snap.find_provenance("abc", "other").unwrap().is_none());
    }

    #[test]
    fn test_delete_network_cascades_but_keeps_taxa() {
        let store = create_test_store();
        let (network, a, _) = seed_network(&store, "net1");

        let tx = store.begin().unwrap();
        assert!(tx.delete_network(&network.id).unwrap());
        assert!(!tx.delete_network(&network.id).unwrap());
        tx.commit().unwrap();

        let snap = store.snapshot().unwrap();
        assert!(snap.get_network(&network.id).unwrap().is_none());
        assert!(snap.associations(&network.id).unwrap().is_empty());
        assert!(snap.get_provenance(&network.provenance_id).unwrap().is_none());
        assert!(snap.get_taxon(&a.id).unwrap().is_some());
        assert_eq!(snap.count_taxa().unwrap(), 2);
    }

    #[test]
    fn test_lineage_and_samples() {
        let store = create_test_store();
        let otu = Taxon::new("OTU_1", Rank::Otu);
        let genus = Taxon::new("Escherichia", Rank::Genus);
        let sample = Sample::new("Sample1").with_metadata("BODY_SITE", "gut");
        let network = create_test_network("abundance", 1);

        let tx = store.begin().unwrap();
        tx.insert_taxon_if_absent(&otu).unwrap();
        tx.insert_taxon_if_absent(&genus).unwrap();
        tx.link_lineage(&otu.id, Rank::Genus, &genus.id).unwrap();
        assert!(tx.insert_sample_if_absent(&sample).unwrap());
        assert!(!tx.insert_sample_if_absent(&sample).unwrap());
        tx.insert_network(&network).unwrap();
        tx.link_sample(&sample.id, &network.id).unwrap();
        tx.insert_observations(&[Observation {
            network_id: network.id.clone(),
            sample_id: sample.id.clone(),
            taxon_id: otu.id.clone(),
            abundance: 12.0,
        }])
        .unwrap();
        tx.commit().unwrap();

        let snap = store.snapshot().unwrap();
        let lineage = snap.lineage(&otu.id).unwrap();
        assert_eq!(lineage.len(), 1);
        assert_eq!(lineage[0].0, Rank::Genus);
        assert_eq!(lineage[0].1.name, "Escherichia");

        let samples = snap.network_samples(&network.id).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].metadata.get("BODY_SITE").map(String::as_str), Some("gut"));
        assert_eq!(snap.observations(&network.id).unwrap()[0].abundance, 12.0);
        assert_eq!(snap.find_sample("Sample1").unwrap().unwrap().id, sample.id);
    }

    #[test]
    fn test_wal_mode_enabled_for_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("wal.db")).unwrap();

        let conn = store.checkout().unwrap();
        let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0)).unwrap();
        assert_eq!(journal_mode, "wal");
    }

    #[test]
    fn test_snapshot_reads_during_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("concurrent.db")).unwrap();
        seed_network(&store, "net1");

        let tx = store.begin().unwrap();
        tx.insert_taxon_if_absent(&Taxon::new("Pending", Rank::Otu)).unwrap();

        // Readers see the last committed state while the writer is open
        let snap = store.snapshot().unwrap();
        assert_eq!(snap.count_taxa().unwrap(), 2);
        drop(snap);

        tx.commit().unwrap();
        assert_eq!(store.snapshot().unwrap().count_taxa().unwrap(), 3);
    }

    #[test]
    fn test_throwaway_store_reads_during_write() {
        let store = create_test_store();
        assert!(store.is_ephemeral());
        seed_network(&store, "net1");

        let tx = store.begin().unwrap();
        tx.insert_taxon_if_absent(&Taxon::new("Pending", Rank::Otu)).unwrap();

        // Same thread, second connection: must not hit a table lock
        let snap = store.snapshot().unwrap();
        assert_eq!(snap.count_taxa().unwrap(), 2);
        assert_eq!(snap.list_networks().unwrap().len(), 1);
        drop(snap);

        tx.commit().unwrap();
        assert_eq!(store.snapshot().unwrap().count_taxa().unwrap(), 3);
    }

    #[test]
    fn test_throwaway_store_removes_its_file() {
        let store = create_test_store();
        let path = store.path().to_path_buf();
        assert!(path.exists());
        drop(store);
        assert!(!path.exists());
    }

    #[test]
    fn test_taxon_properties_upsert() {
        let store = create_test_store();
        let taxon = Taxon::new("OTU_1", Rank::Otu);

        let tx = store.begin().unwrap();
        tx.insert_taxon_if_absent(&taxon).unwrap();
        assert!(tx.set_taxon_property(&taxon.id, "16S", "ACGT").unwrap());
        assert!(!tx.set_taxon_property(&taxon.id, "16S", "ACGT").unwrap());
        assert!(tx.set_taxon_property(&taxon.id, "16S", "ACGTT").unwrap());
        assert!(tx.set_taxon_property(&taxon.id, "habitat", "soil").unwrap());
        tx.commit().unwrap();

        let props = store.snapshot().unwrap().taxon_properties(&taxon.id).unwrap();
        assert_eq!(props.len(), 2);
        assert_eq!(props["16S"], "ACGTT");
        assert_eq!(props["habitat"], "soil");
    }

    #[test]
    fn test_property_requires_existing_taxon() {
        let store = create_test_store();
        let tx = store.begin().unwrap();
        assert!(tx.set_taxon_property(&NodeId::new(), "16S", "ACGT").is_err());
    }

    #[test]
    fn test_node_kind_and_lineage_links() {
        let store = create_test_store();
        let (network, a, _) = seed_network(&store, "net1");
        let genus = Taxon::new("Escherichia", Rank::Genus);

        let tx = store.begin().unwrap();
        tx.insert_taxon_if_absent(&genus).unwrap();
        tx.link_lineage(&a.id, Rank::Genus, &genus.id).unwrap();
        tx.commit().unwrap();

        let snap = store.snapshot().unwrap();
        assert_eq!(snap.node_kind(a.id.as_str()).unwrap(), Some(NodeKind::Taxon));
        assert_eq!(snap.node_kind(network.id.as_str()).unwrap(), Some(NodeKind::Network));
        assert_eq!(
            snap.node_kind(network.provenance_id.as_str()).unwrap(),
            Some(NodeKind::Provenance)
        );
        let assoc = &snap.associations(&network.id).unwrap()[0];
        assert_eq!(snap.node_kind(assoc.id.as_str()).unwrap(), Some(NodeKind::Association));
        assert_eq!(snap.node_kind("nothing").unwrap(), None);

        assert_eq!(snap.lineage_links().unwrap(), vec![(a.id.clone(), Rank::Genus, genus.id.clone())]);
    }

    #[test]
    fn test_two_stores_share_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let store_a = SqliteStore::open(&path).unwrap();
        let store_b = SqliteStore::open(&path).unwrap();

        seed_network(&store_a, "net1");
        let networks = store_b.snapshot().unwrap().list_networks().unwrap();
        assert_eq!(networks.len(), 1);
    }

    #[test]
    fn test_busy_writer_is_retryable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("busy.db");
        let options = StoreOptions {
            busy_timeout: Duration::from_millis(10),
            ..StoreOptions::default()
        };
        let store_a = SqliteStore::open_with(&path, options.clone()).unwrap();
        let store_b = SqliteStore::open_with(&path, options).unwrap();

        let _held = store_a.begin().unwrap();
        let err = store_b.begin().err().unwrap();
        assert!(err.is_retryable(), "expected busy error, got {err}");
    }
}
