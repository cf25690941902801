//! Free-form taxon properties from sequence files and property tables
//!
//! Properties attach to taxa already in the catalogue; names that match no
//! stored taxon are reported, never created.

use super::reader::ReadError;
use super::table::{read_text, MetadataTable};
use crate::graph::Rank;
use crate::storage::{GraphStore, StorageError, StoreReader, StoreTransaction};
use std::collections::BTreeMap;
use std::path::Path;

/// Property key for sequences read by [`read_sequences`]
pub const SEQUENCE_PROPERTY: &str = "16S";

const FASTA_EXTENSIONS: [&str; 5] = ["fa", "fasta", "fna", "ffn", "fas"];

/// Taxon name to (key, value) properties
pub type TaxonProperties = BTreeMap<String, BTreeMap<String, String>>;

/// Outcome of [`attach_properties`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachReport {
    /// Taxa that received at least one property
    pub attached: usize,
    /// Property values written or changed
    pub updated: usize,
    /// Names with no stored taxon at the requested rank
    pub missing: Vec<String>,
}

/// Parse FASTA text into one property per record
///
/// The record name is the first word of its header. Sequence lines are
/// joined without whitespace; `;` lines are comments.
pub fn read_fasta(text: &str, key: &str) -> Result<TaxonProperties, ReadError> {
    let mut properties = TaxonProperties::new();
    let mut current: Option<(usize, String, String)> = None;

    fn finish(properties: &mut TaxonProperties, record: (usize, String, String), key: &str) -> Result<(), ReadError> {
        let (line, name, sequence) = record;
        if sequence.is_empty() {
            return Err(ReadError::Parse {
                line,
                message: format!("record '{}' has no sequence", name),
            });
        }
        properties.entry(name).or_default().insert(key.to_string(), sequence);
        Ok(())
    }

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }
        if let Some(header) = line.strip_prefix('>') {
            if let Some(record) = current.take() {
                finish(&mut properties, record, key)?;
            }
            let name = header.split_whitespace().next().ok_or_else(|| ReadError::Parse {
                line: line_no,
                message: "empty FASTA header".to_string(),
            })?;
            current = Some((line_no, name.to_string(), String::new()));
        } else {
            match current.as_mut() {
                Some((_, _, sequence)) => sequence.extend(line.split_whitespace()),
                None => {
                    return Err(ReadError::Parse {
                        line: line_no,
                        message: "sequence before the first header".to_string(),
                    })
                }
            }
        }
    }
    if let Some(record) = current.take() {
        finish(&mut properties, record, key)?;
    }
    Ok(properties)
}

/// Read sequences from a FASTA file, or every FASTA file in a directory
pub fn read_sequences(path: &Path) -> Result<TaxonProperties, ReadError> {
    let files = if path.is_dir() {
        let entries = std::fs::read_dir(path).map_err(|source| ReadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ReadError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let file = entry.path();
            let is_fasta = file
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| FASTA_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_fasta && file.is_file() {
                files.push(file);
            }
        }
        files.sort();
        files
    } else {
        vec![path.to_path_buf()]
    };

    let mut properties = TaxonProperties::new();
    for file in &files {
        let (text, _) = read_text(file)?;
        for (name, values) in read_fasta(&text, SEQUENCE_PROPERTY)? {
            properties.entry(name).or_default().extend(values);
        }
    }
    tracing::debug!(path = %path.display(), files = files.len(), taxa = properties.len(), "read sequences");
    Ok(properties)
}

/// Parse a property table: taxon names in the first column, one property per other column
pub fn read_property_table(text: &str) -> Result<TaxonProperties, ReadError> {
    let table = MetadataTable::parse(text)?;
    let mut properties = TaxonProperties::new();
    for (name, key, value) in table.cells() {
        properties
            .entry(name.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }
    Ok(properties)
}

/// Write properties onto stored taxa of `rank` in one transaction
pub fn attach_properties(
    store: &dyn GraphStore,
    rank: Rank,
    properties: &TaxonProperties,
) -> Result<AttachReport, StorageError> {
    let tx = store.begin()?;
    let mut report = AttachReport::default();
    for (name, values) in properties {
        let Some(taxon) = tx.find_taxon(name.trim(), rank)? else {
            report.missing.push(name.clone());
            continue;
        };
        for (key, value) in values {
            if tx.set_taxon_property(&taxon.id, key, value)? {
                report.updated += 1;
            }
        }
        report.attached += 1;
    }
    tx.commit()?;

    tracing::info!(
        rank = rank.as_str(),
        attached = report.attached,
        updated = report.updated,
        missing = report.missing.len(),
        "attached taxon properties"
    );
    Ok(report)
}
