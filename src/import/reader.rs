//! Input readers: one implementation per input format
//!
//! Readers only parse. They never touch the store, and they never decide
//! whether records are valid; that is the schema's job.

use crate::graph::{
    parse_lineage, parse_lineage_parts, AbundanceRecord, AssociationRecord, ParsedInput,
    SampleRecord, TaxonRecord,
};
use crate::provenance::sha256_hex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while reading an input file
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported input format: {0}")]
    UnsupportedFormat(String),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Invalid BIOM table: {0}")]
    Biom(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Supported input formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// Weighted edge list: `taxon_a taxon_b [weight [sign [statistic]]]`
    EdgeList,
    /// BIOM 1.0 (JSON) abundance table
    Biom,
    /// Tab-delimited count table with optional taxonomy and metadata tables
    TabTable,
}

impl InputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputFormat::EdgeList => "edgelist",
            InputFormat::Biom => "biom",
            InputFormat::TabTable => "tabtable",
        }
    }
}

impl std::fmt::Display for InputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an input came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMeta {
    pub path: String,
    /// SHA-256 of the source bytes
    pub checksum: String,
    pub formats: Vec<InputFormat>,
}

impl SourceMeta {
    pub fn from_bytes(path: impl Into<String>, bytes: &[u8], format: InputFormat) -> Self {
        Self {
            path: path.into(),
            checksum: sha256_hex(bytes),
            formats: vec![format],
        }
    }

    /// Combine the sources of a multi-file import
    pub fn combine(sources: Vec<SourceMeta>) -> Option<Self> {
        if sources.len() <= 1 {
            return sources.into_iter().next();
        }
        let path = sources.iter().map(|s| s.path.as_str()).collect::<Vec<_>>().join(";");
        let checksums = sources.iter().map(|s| s.checksum.as_str()).collect::<Vec<_>>().join("\n");
        Some(Self {
            path,
            checksum: sha256_hex(checksums.as_bytes()),
            formats: sources.into_iter().flat_map(|s| s.formats).collect(),
        })
    }
}

/// Turns the bytes of one input format into canonical records
pub trait InputReader {
    fn format(&self) -> InputFormat;

    fn read(&self, bytes: &[u8]) -> Result<ParsedInput, ReadError>;
}

/// Pick a reader from the file extension
pub fn reader_for_path(path: &Path) -> Result<Box<dyn InputReader>, ReadError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "txt" | "tsv" | "tab" | "edges" => Ok(Box::new(EdgeListReader::new())),
        "csv" => Ok(Box::new(EdgeListReader::with_delimiter(','))),
        "biom" | "json" => Ok(Box::new(BiomReader)),
        other => Err(ReadError::UnsupportedFormat(if other.is_empty() {
            path.display().to_string()
        } else {
            other.to_string()
        })),
    }
}

/// Read and parse one file
pub fn read_file(path: &Path) -> Result<(ParsedInput, SourceMeta), ReadError> {
    let reader = reader_for_path(path)?;
    let bytes = std::fs::read(path).map_err(|source| ReadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let parsed = reader.read(&bytes)?;
    tracing::debug!(
        path = %path.display(),
        format = %reader.format(),
        associations = parsed.associations.len(),
        abundances = parsed.abundances.len(),
        "parsed input"
    );
    Ok((
        parsed,
        SourceMeta::from_bytes(path.display().to_string(), &bytes, reader.format()),
    ))
}

/// Read several files into one input, e.g. a network and its abundance table
pub fn read_files(paths: &[PathBuf]) -> Result<(ParsedInput, SourceMeta), ReadError> {
    let mut parsed = ParsedInput::new();
    let mut sources = Vec::with_capacity(paths.len());
    for path in paths {
        let (input, source) = read_file(path)?;
        parsed.merge(input);
        sources.push(source);
    }
    let source = SourceMeta::combine(sources)
        .ok_or_else(|| ReadError::UnsupportedFormat("no input files".to_string()))?;
    Ok((parsed, source))
}

// === Edge lists ===

/// Reader for weighted edge lists
///
/// One association per line. Blank lines and `#` comments are skipped.
/// The first row is a header only if it names its columns (`source`,
/// `weight`, `pvalue`, ...); header columns are then matched by name and
/// unknown ones ignored. Without a header the columns are
/// `taxon_a taxon_b [weight [sign [statistic]]]`. An empty field is a
/// missing value.
#[derive(Debug, Clone, Default)]
pub struct EdgeListReader {
    /// `None` splits on any whitespace
    delimiter: Option<char>,
}

impl EdgeListReader {
    pub fn new() -> Self {
        Self { delimiter: None }
    }

    pub fn with_delimiter(delimiter: char) -> Self {
        Self {
            delimiter: Some(delimiter),
        }
    }

    fn split<'a>(&self, line: &'a str) -> Vec<&'a str> {
        match self.delimiter {
            Some(d) => line.split(d).map(str::trim).collect(),
            None if line.contains('\t') => line.split('\t').map(str::trim).collect(),
            None => line.split_whitespace().collect(),
        }
    }
}

const SOURCE_NAMES: [&str; 5] = ["source", "from", "node1", "taxon_a", "taxon1"];

/// Value columns after the taxon pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeColumn {
    Weight,
    Sign,
    Statistic,
}

impl EdgeColumn {
    const POSITIONAL: [EdgeColumn; 3] = [EdgeColumn::Weight, EdgeColumn::Sign, EdgeColumn::Statistic];

    fn name(&self) -> &'static str {
        match self {
            EdgeColumn::Weight => "weight",
            EdgeColumn::Sign => "sign",
            EdgeColumn::Statistic => "statistic",
        }
    }
}

fn column_for(name: &str) -> Option<EdgeColumn> {
    match name.to_ascii_lowercase().as_str() {
        "weight" | "correlation" | "score" | "value" | "edge_weight" => Some(EdgeColumn::Weight),
        "sign" | "direction" | "interaction" => Some(EdgeColumn::Sign),
        "statistic" | "pvalue" | "p_value" | "p-value" | "p" | "qvalue" | "q_value" | "q-value" => {
            Some(EdgeColumn::Statistic)
        }
        _ => None,
    }
}

fn is_header(fields: &[&str]) -> bool {
    SOURCE_NAMES.contains(&fields[0].to_ascii_lowercase().as_str())
        || fields.iter().skip(2).any(|f| column_for(f).is_some())
}

/// Column roles from a header row; the first column of each role wins
fn header_layout(fields: &[&str]) -> Vec<Option<EdgeColumn>> {
    let mut layout: Vec<Option<EdgeColumn>> = Vec::new();
    for field in fields.iter().skip(2) {
        let column = column_for(field).filter(|c| !layout.contains(&Some(*c)));
        layout.push(column);
    }
    layout
}

impl InputReader for EdgeListReader {
    fn format(&self) -> InputFormat {
        InputFormat::EdgeList
    }

    fn read(&self, bytes: &[u8]) -> Result<ParsedInput, ReadError> {
        let text = std::str::from_utf8(bytes).map_err(|e| ReadError::Parse {
            line: 0,
            message: format!("input is not UTF-8: {}", e),
        })?;

        let mut parsed = ParsedInput::new();
        let mut seen_taxa = HashSet::new();
        let mut layout: Option<Vec<Option<EdgeColumn>>> = None;

        for (i, line) in text.lines().enumerate() {
            let line_no = i + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let fields = self.split(trimmed);
            if fields.len() < 2 {
                return Err(ReadError::Parse {
                    line: line_no,
                    message: "expected at least two columns".to_string(),
                });
            }

            if layout.is_none() && is_header(&fields) {
                layout = Some(header_layout(&fields));
                continue;
            }
            let columns =
                layout.get_or_insert_with(|| EdgeColumn::POSITIONAL.iter().copied().map(Some).collect());

            let mut record = AssociationRecord::new(fields[0], fields[1]);
            for (field, column) in fields.iter().skip(2).zip(columns.iter()) {
                let Some(column) = column else { continue };
                if field.is_empty() {
                    continue;
                }
                match column {
                    EdgeColumn::Weight => record.weight = Some(parse_number(field, line_no, column.name())?),
                    EdgeColumn::Statistic => {
                        record.statistic = Some(parse_number(field, line_no, column.name())?)
                    }
                    EdgeColumn::Sign => {
                        record.sign = Some(field.parse().map_err(|message| ReadError::Parse {
                            line: line_no,
                            message,
                        })?)
                    }
                }
            }

            for name in [fields[0], fields[1]] {
                if seen_taxa.insert(name.to_string()) {
                    parsed.taxa.push(TaxonRecord::new(name));
                }
            }
            parsed.associations.push(record);
        }

        Ok(parsed)
    }
}

fn parse_number(field: &str, line: usize, column: &str) -> Result<f64, ReadError> {
    field.parse::<f64>().map_err(|_| ReadError::Parse {
        line,
        message: format!("{} '{}' is not a number", column, field),
    })
}

// === BIOM ===

/// Reader for BIOM 1.0 JSON tables
///
/// Rows are taxa (with optional `taxonomy` metadata), columns are samples,
/// and every nonzero cell becomes an abundance.
#[derive(Debug, Clone, Copy, Default)]
pub struct BiomReader;

#[derive(Debug, Deserialize)]
struct BiomTable {
    rows: Vec<BiomAxis>,
    columns: Vec<BiomAxis>,
    #[serde(default = "default_matrix_type")]
    matrix_type: String,
    #[serde(default)]
    shape: Option<(usize, usize)>,
    data: Vec<Vec<f64>>,
}

#[derive(Debug, Deserialize)]
struct BiomAxis {
    id: String,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

fn default_matrix_type() -> String {
    "sparse".to_string()
}

impl InputReader for BiomReader {
    fn format(&self) -> InputFormat {
        InputFormat::Biom
    }

    fn read(&self, bytes: &[u8]) -> Result<ParsedInput, ReadError> {
        let table: BiomTable = serde_json::from_slice(bytes)?;
        let (n_rows, n_cols) = (table.rows.len(), table.columns.len());
        if let Some(shape) = table.shape {
            if shape != (n_rows, n_cols) {
                return Err(ReadError::Biom(format!(
                    "shape {:?} does not match {} rows and {} columns",
                    shape, n_rows, n_cols
                )));
            }
        }

        let mut parsed = ParsedInput::new();
        for row in &table.rows {
            let mut taxon = TaxonRecord::new(row.id.clone());
            if let Some(taxonomy) = row.metadata.as_ref().and_then(|m| m.get("taxonomy")) {
                taxon.lineage = match taxonomy {
                    serde_json::Value::String(s) => parse_lineage(s),
                    serde_json::Value::Array(parts) => {
                        let parts: Vec<String> = parts.iter().map(value_to_string).collect();
                        parse_lineage_parts(&parts)
                    }
                    _ => Vec::new(),
                };
            }
            taxon.properties = row_properties(row.metadata.as_ref());
            parsed.taxa.push(taxon);
        }

        for column in &table.columns {
            parsed.samples.push(SampleRecord {
                identifier: column.id.clone(),
                metadata: flatten_metadata(column.metadata.as_ref()),
            });
        }

        let mut push = |r: usize, c: usize, value: f64| -> Result<(), ReadError> {
            let (Some(row), Some(column)) = (table.rows.get(r), table.columns.get(c)) else {
                return Err(ReadError::Biom(format!("cell ({}, {}) is outside the table", r, c)));
            };
            if value != 0.0 {
                parsed
                    .abundances
                    .push(AbundanceRecord::new(column.id.clone(), row.id.clone(), value));
            }
            Ok(())
        };

        match table.matrix_type.as_str() {
            "sparse" => {
                for entry in &table.data {
                    let [r, c, value] = entry.as_slice() else {
                        return Err(ReadError::Biom(format!(
                            "sparse entry must have three values, found {}",
                            entry.len()
                        )));
                    };
                    push(index(*r)?, index(*c)?, *value)?;
                }
            }
            "dense" => {
                for (r, values) in table.data.iter().enumerate() {
                    for (c, value) in values.iter().enumerate() {
                        push(r, c, *value)?;
                    }
                }
            }
            other => return Err(ReadError::Biom(format!("unknown matrix_type '{}'", other))),
        }

        Ok(parsed)
    }
}

fn index(value: f64) -> Result<usize, ReadError> {
    if value >= 0.0 && value.fract() == 0.0 {
        Ok(value as usize)
    } else {
        Err(ReadError::Biom(format!("invalid matrix index {}", value)))
    }
}

fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn flatten_metadata(metadata: Option<&serde_json::Value>) -> BTreeMap<String, String> {
    metadata
        .and_then(|m| m.as_object())
        .map(|object| {
            object
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), value_to_string(v)))
                .collect()
        })
        .unwrap_or_default()
}

/// Scalar row metadata other than the taxonomy
fn row_properties(metadata: Option<&serde_json::Value>) -> BTreeMap<String, String> {
    metadata
        .and_then(|m| m.as_object())
        .map(|object| {
            object
                .iter()
                .filter(|(k, v)| k.as_str() != "taxonomy" && !v.is_null() && !v.is_array() && !v.is_object())
                .map(|(k, v)| (k.clone(), value_to_string(v)))
                .collect()
        })
        .unwrap_or_default()
}
