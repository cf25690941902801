//! Tab-delimited count tables and their sidecar tables
//!
//! The count table has one row per taxon and one column per sample, as
//! written by `biom convert --to-tsv`:
//!
//! ```text
//! # Constructed from biom file
//! #OTU ID	Sample1	Sample2	taxonomy
//! GG_OTU_1	0	5	k__Bacteria; p__Proteobacteria
//! ```
//!
//! A trailing `taxonomy` column is optional. Separate tables may add a
//! taxonomy per taxon, metadata per sample and free-form properties per
//! taxon; all three key their rows by the identifier in the first column.

use super::reader::{InputFormat, InputReader, ReadError, SourceMeta};
use crate::graph::{
    parse_lineage, parse_lineage_parts, parse_ranked, AbundanceRecord, LineageEntry, ParsedInput,
    Rank, SampleRecord, TaxonRecord,
};
use std::collections::HashMap;
use std::path::Path;

const TAXONOMY_COLUMNS: [&str; 3] = ["taxonomy", "consensus lineage", "consensuslineage"];

/// One data row of a [`MetadataTable`]
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    /// Line in the source text, 1-based
    pub line: usize,
    pub key: String,
    /// One value per header column, empty when missing
    pub values: Vec<String>,
}

/// A tab-separated table keyed by its first column
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataTable {
    /// Header names after the key column
    pub columns: Vec<String>,
    pub rows: Vec<TableRow>,
}

impl MetadataTable {
    /// Parse a table whose header may be a `#`-prefixed line
    ///
    /// `#` lines without a tab are comments. Short rows are padded with
    /// empty values; long rows are an error.
    pub fn parse(text: &str) -> Result<Self, ReadError> {
        let mut columns: Option<Vec<String>> = None;
        let mut rows = Vec::new();

        for (i, line) in text.lines().enumerate() {
            let line_no = i + 1;
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let is_comment = line.starts_with('#');
            if columns.is_none() {
                if is_comment && !line.contains('\t') {
                    continue;
                }
                columns = Some(line.split('\t').skip(1).map(|f| f.trim().to_string()).collect());
                continue;
            }
            if is_comment {
                continue;
            }

            let width = columns.as_ref().map_or(0, Vec::len);
            let mut values: Vec<String> = line.split('\t').map(|f| f.trim().to_string()).collect();
            let key = values.remove(0);
            if key.is_empty() {
                return Err(ReadError::Parse {
                    line: line_no,
                    message: "row has an empty identifier".to_string(),
                });
            }
            if values.len() > width {
                return Err(ReadError::Parse {
                    line: line_no,
                    message: format!("expected {} columns, found {}", width + 1, values.len() + 1),
                });
            }
            values.resize(width, String::new());
            rows.push(TableRow {
                line: line_no,
                key,
                values,
            });
        }

        let columns = columns.ok_or_else(|| ReadError::Parse {
            line: 0,
            message: "table has no header".to_string(),
        })?;
        Ok(Self { columns, rows })
    }

    /// Rows as (key, column, value), skipping empty values
    pub fn cells(&self) -> impl Iterator<Item = (&str, &str, &str)> + '_ {
        self.rows.iter().flat_map(move |row| {
            self.columns
                .iter()
                .zip(&row.values)
                .filter(|(_, v)| !v.is_empty())
                .map(move |(c, v)| (row.key.as_str(), c.as_str(), v.as_str()))
        })
    }
}

/// Reader for a tab-delimited count table, plus optional sidecar tables
#[derive(Debug, Clone, Default)]
pub struct TabTableReader {
    taxonomy: Option<String>,
    sample_metadata: Option<String>,
    taxon_metadata: Option<String>,
}

impl TabTableReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Taxonomy table: taxon id, then one column per rank
    ///
    /// Columns named after ranks (`Kingdom`, `Genus`, ...) are read by name;
    /// otherwise the values are read in order, kingdom first.
    pub fn with_taxonomy(mut self, text: impl Into<String>) -> Self {
        self.taxonomy = Some(text.into());
        self
    }

    /// Sample metadata table: sample id, then one column per variable
    pub fn with_sample_metadata(mut self, text: impl Into<String>) -> Self {
        self.sample_metadata = Some(text.into());
        self
    }

    /// Taxon metadata table: taxon id, then one column per property
    pub fn with_taxon_metadata(mut self, text: impl Into<String>) -> Self {
        self.taxon_metadata = Some(text.into());
        self
    }
}

impl InputReader for TabTableReader {
    fn format(&self) -> InputFormat {
        InputFormat::TabTable
    }

    fn read(&self, bytes: &[u8]) -> Result<ParsedInput, ReadError> {
        let text = std::str::from_utf8(bytes).map_err(|e| ReadError::Parse {
            line: 0,
            message: format!("count table is not UTF-8: {}", e),
        })?;
        let counts = MetadataTable::parse(text)?;

        let taxonomy_column = counts
            .columns
            .last()
            .filter(|c| TAXONOMY_COLUMNS.contains(&c.to_ascii_lowercase().as_str()))
            .map(|_| counts.columns.len() - 1);
        let sample_count = taxonomy_column.unwrap_or(counts.columns.len());

        let mut parsed = ParsedInput::new();
        for identifier in &counts.columns[..sample_count] {
            parsed.samples.push(SampleRecord::new(identifier.clone()));
        }

        for row in &counts.rows {
            let (taxon, values) = (&row.key, &row.values);
            let mut record = TaxonRecord::new(taxon.clone());
            if let Some(lineage) = taxonomy_column.and_then(|c| values.get(c)) {
                record.lineage = parse_lineage(lineage);
            }
            parsed.taxa.push(record);

            for (sample, value) in counts.columns.iter().zip(values).take(sample_count) {
                if value.is_empty() {
                    continue;
                }
                let abundance: f64 = value.parse().map_err(|_| ReadError::Parse {
                    line: row.line,
                    message: format!("count '{}' for {} in {} is not a number", value, taxon, sample),
                })?;
                if abundance != 0.0 {
                    parsed
                        .abundances
                        .push(AbundanceRecord::new(sample.clone(), taxon.clone(), abundance));
                }
            }
        }

        let mut taxa: HashMap<String, usize> = HashMap::new();
        for (i, taxon) in parsed.taxa.iter().enumerate() {
            taxa.entry(taxon.name.clone()).or_insert(i);
        }

        if let Some(text) = &self.taxonomy {
            let table = MetadataTable::parse(text)?;
            let ranks: Option<Vec<Rank>> = table
                .columns
                .iter()
                .map(|c| c.parse::<Rank>().ok().filter(|r| Rank::LINEAGE.contains(r)))
                .collect();
            for row in &table.rows {
                let Some(&i) = taxa.get(&row.key) else { continue };
                parsed.taxa[i].lineage = match &ranks {
                    Some(ranks) => ranked_lineage(ranks, &row.values),
                    None => parse_lineage_parts(row.values.as_slice()),
                };
            }
        }

        if let Some(text) = &self.sample_metadata {
            let table = MetadataTable::parse(text)?;
            let samples: HashMap<&str, usize> = parsed
                .samples
                .iter()
                .enumerate()
                .map(|(i, s)| (s.identifier.as_str(), i))
                .collect();
            let mut updates = Vec::new();
            for (sample, column, value) in table.cells() {
                if let Some(&i) = samples.get(sample) {
                    updates.push((i, column.to_string(), value.to_string()));
                }
            }
            for (i, column, value) in updates {
                parsed.samples[i].metadata.insert(column, value);
            }
        }

        if let Some(text) = &self.taxon_metadata {
            let table = MetadataTable::parse(text)?;
            for (taxon, column, value) in table.cells() {
                if let Some(&i) = taxa.get(taxon) {
                    parsed.taxa[i].properties.insert(column.to_string(), value.to_string());
                }
            }
        }

        Ok(parsed)
    }
}

fn ranked_lineage(ranks: &[Rank], values: &[String]) -> Vec<LineageEntry> {
    let mut entries: Vec<LineageEntry> = ranks
        .iter()
        .zip(values)
        .filter_map(|(rank, value)| parse_ranked(*rank, value))
        .collect();
    entries.sort_by_key(|e| e.rank);
    entries
}

/// Paths of a tab-delimited import
#[derive(Debug, Clone)]
pub struct TabTablePaths<'a> {
    pub counts: &'a Path,
    pub taxonomy: Option<&'a Path>,
    pub sample_metadata: Option<&'a Path>,
    pub taxon_metadata: Option<&'a Path>,
}

impl<'a> TabTablePaths<'a> {
    pub fn new(counts: &'a Path) -> Self {
        Self {
            counts,
            taxonomy: None,
            sample_metadata: None,
            taxon_metadata: None,
        }
    }
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, ReadError> {
    std::fs::read(path).map_err(|source| ReadError::Io {
        path: path.display().to_string(),
        source,
    })
}

pub(super) fn read_text(path: &Path) -> Result<(String, SourceMeta), ReadError> {
    let bytes = read_bytes(path)?;
    let source = SourceMeta::from_bytes(path.display().to_string(), &bytes, InputFormat::TabTable);
    let text = String::from_utf8(bytes).map_err(|e| ReadError::Parse {
        line: 0,
        message: format!("{} is not UTF-8: {}", path.display(), e),
    })?;
    Ok((text, source))
}

/// Read a count table and its sidecar tables as one input
///
/// The source checksum covers every file given, so adding a taxonomy to an
/// earlier import is a different source.
pub fn read_tab_tables(paths: &TabTablePaths<'_>) -> Result<(ParsedInput, SourceMeta), ReadError> {
    let counts = read_bytes(paths.counts)?;
    let mut sources = vec![SourceMeta::from_bytes(
        paths.counts.display().to_string(),
        &counts,
        InputFormat::TabTable,
    )];

    let mut reader = TabTableReader::new();
    if let Some(path) = paths.taxonomy {
        let (text, source) = read_text(path)?;
        reader = reader.with_taxonomy(text);
        sources.push(source);
    }
    if let Some(path) = paths.sample_metadata {
        let (text, source) = read_text(path)?;
        reader = reader.with_sample_metadata(text);
        sources.push(source);
    }
    if let Some(path) = paths.taxon_metadata {
        let (text, source) = read_text(path)?;
        reader = reader.with_taxon_metadata(text);
        sources.push(source);
    }

    let parsed = reader.read(&counts)?;
    tracing::debug!(
        path = %paths.counts.display(),
        taxa = parsed.taxa.len(),
        samples = parsed.samples.len(),
        abundances = parsed.abundances.len(),
        "parsed count table"
    );
    let source = SourceMeta::combine(sources)
        .ok_or_else(|| ReadError::UnsupportedFormat("no input files".to_string()))?;
    Ok((parsed, source))
}
