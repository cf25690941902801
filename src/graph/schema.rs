//! Canonical input records and the rules they must satisfy
//!
//! Readers turn every input format into a [`ParsedInput`]. Nothing reaches
//! the store until every record in it has passed [`validate`].

use super::edge::Sign;
use super::taxonomy::{LineageEntry, Rank};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// A taxon as described by an input file
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaxonRecord {
    pub name: String,
    /// Rank of the taxon itself; the import default applies when absent
    pub rank: Option<Rank>,
    /// Ancestors, most general first
    pub lineage: Vec<LineageEntry>,
    pub external_ref: Option<String>,
    /// Free-form attributes, e.g. a 16S sequence or a trait from a lookup table
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl TaxonRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_rank(mut self, rank: Rank) -> Self {
        self.rank = Some(rank);
        self
    }

    pub fn with_lineage(mut self, lineage: Vec<LineageEntry>) -> Self {
        self.lineage = lineage;
        self
    }

    pub fn with_external_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.external_ref = Some(external_ref.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SampleRecord {
    pub identifier: String,
    pub metadata: BTreeMap<String, String>,
}

impl SampleRecord {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// An association between two taxa, referenced by name
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AssociationRecord {
    pub taxon_a: String,
    pub taxon_b: String,
    pub weight: Option<f64>,
    pub sign: Option<Sign>,
    pub statistic: Option<f64>,
}

impl AssociationRecord {
    pub fn new(taxon_a: impl Into<String>, taxon_b: impl Into<String>) -> Self {
        Self {
            taxon_a: taxon_a.into(),
            taxon_b: taxon_b.into(),
            ..Default::default()
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_sign(mut self, sign: Sign) -> Self {
        self.sign = Some(sign);
        self
    }

    pub fn with_statistic(mut self, statistic: f64) -> Self {
        self.statistic = Some(statistic);
        self
    }

    /// Explicit sign, else the sign of the weight
    pub fn effective_sign(&self) -> Option<Sign> {
        self.sign.or_else(|| self.weight.and_then(Sign::of))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbundanceRecord {
    pub sample: String,
    pub taxon: String,
    pub abundance: f64,
}

impl AbundanceRecord {
    pub fn new(sample: impl Into<String>, taxon: impl Into<String>, abundance: f64) -> Self {
        Self {
            sample: sample.into(),
            taxon: taxon.into(),
            abundance,
        }
    }
}

/// Everything a reader extracted from one input
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParsedInput {
    pub taxa: Vec<TaxonRecord>,
    pub samples: Vec<SampleRecord>,
    pub associations: Vec<AssociationRecord>,
    pub abundances: Vec<AbundanceRecord>,
}

impl ParsedInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append another input's records, e.g. a network file and its abundance table
    pub fn merge(&mut self, other: ParsedInput) {
        self.taxa.extend(other.taxa);
        self.samples.extend(other.samples);
        self.associations.extend(other.associations);
        self.abundances.extend(other.abundances);
    }

    pub fn is_empty(&self) -> bool {
        self.taxa.is_empty()
            && self.samples.is_empty()
            && self.associations.is_empty()
            && self.abundances.is_empty()
    }
}

/// Kind of record a violation refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Network,
    Taxon,
    Sample,
    Association,
    Abundance,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecordKind::Network => "network",
            RecordKind::Taxon => "taxon",
            RecordKind::Sample => "sample",
            RecordKind::Association => "association",
            RecordKind::Abundance => "abundance",
        };
        f.write_str(s)
    }
}

/// A record that broke a schema rule
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{kind} record {index}: field '{field}': {reason}")]
pub struct SchemaViolation {
    pub kind: RecordKind,
    /// Position of the record within its kind
    pub index: usize,
    pub field: String,
    pub reason: String,
}

impl SchemaViolation {
    fn new(kind: RecordKind, index: usize, field: &str, reason: impl Into<String>) -> Self {
        Self {
            kind,
            index,
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// A borrowed view of any input record
#[derive(Debug, Clone, Copy)]
pub enum Record<'a> {
    Network { name: &'a str },
    Taxon(&'a TaxonRecord),
    Sample(&'a SampleRecord),
    Association(&'a AssociationRecord),
    Abundance(&'a AbundanceRecord),
}

impl Record<'_> {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Network { .. } => RecordKind::Network,
            Record::Taxon(_) => RecordKind::Taxon,
            Record::Sample(_) => RecordKind::Sample,
            Record::Association(_) => RecordKind::Association,
            Record::Abundance(_) => RecordKind::Abundance,
        }
    }
}

/// A record that passed validation
#[derive(Debug, Clone, Copy)]
pub struct ValidRecord<'a>(Record<'a>);

impl<'a> ValidRecord<'a> {
    pub fn record(&self) -> Record<'a> {
        self.0
    }
}

/// Validate a single record at position `index`
pub fn validate(index: usize, record: Record<'_>) -> Result<ValidRecord<'_>, SchemaViolation> {
    let kind = record.kind();
    let fail = |field: &str, reason: &str| Err(SchemaViolation::new(kind, index, field, reason));

    match record {
        Record::Network { name } => {
            if is_blank(name) {
                return fail("name", "network name is empty");
            }
            // '@' separates name and version in selectors
            if name.contains('@') {
                return fail("name", "network name must not contain '@'");
            }
        }
        Record::Taxon(taxon) => {
            if is_blank(&taxon.name) {
                return fail("name", "taxon name is empty");
            }
            if taxon.lineage.iter().any(|e| is_blank(&e.name)) {
                return fail("lineage", "lineage entry has an empty name");
            }
            if taxon.properties.keys().any(|k| is_blank(k)) {
                return fail("properties", "property name is empty");
            }
        }
        Record::Sample(sample) => {
            if is_blank(&sample.identifier) {
                return fail("identifier", "sample identifier is empty");
            }
        }
        Record::Association(assoc) => {
            if is_blank(&assoc.taxon_a) {
                return fail("taxon_a", "taxon name is empty");
            }
            if is_blank(&assoc.taxon_b) {
                return fail("taxon_b", "taxon name is empty");
            }
            if assoc.taxon_a.trim() == assoc.taxon_b.trim() {
                return fail("taxon_b", "association references the same taxon twice");
            }
            if assoc.weight.is_some_and(|w| !w.is_finite()) {
                return fail("weight", "weight is not a finite number");
            }
            if assoc.statistic.is_some_and(|s| !s.is_finite()) {
                return fail("statistic", "statistic is not a finite number");
            }
            if let (Some(sign), Some(weight)) = (assoc.sign, assoc.weight) {
                if Sign::of(weight).is_some_and(|s| s != sign) {
                    return fail("sign", "sign disagrees with the sign of the weight");
                }
            }
        }
        Record::Abundance(abundance) => {
            if is_blank(&abundance.sample) {
                return fail("sample", "sample identifier is empty");
            }
            if is_blank(&abundance.taxon) {
                return fail("taxon", "taxon name is empty");
            }
            if !abundance.abundance.is_finite() || abundance.abundance < 0.0 {
                return fail("abundance", "abundance must be a finite, non-negative number");
            }
        }
    }

    Ok(ValidRecord(record))
}

/// Validate a whole input, collecting every violation
///
/// Besides the per-record rules, a taxon pair may only be associated once
/// per input, in either orientation.
pub fn validate_input(network_name: &str, input: &ParsedInput) -> Result<(), Vec<SchemaViolation>> {
    let mut violations = Vec::new();

    let mut check = |index: usize, record: Record<'_>| {
        if let Err(v) = validate(index, record) {
            violations.push(v);
        }
    };

    check(0, Record::Network { name: network_name });
    for (i, taxon) in input.taxa.iter().enumerate() {
        check(i, Record::Taxon(taxon));
    }
    for (i, sample) in input.samples.iter().enumerate() {
        check(i, Record::Sample(sample));
    }
    for (i, assoc) in input.associations.iter().enumerate() {
        check(i, Record::Association(assoc));
    }
    for (i, abundance) in input.abundances.iter().enumerate() {
        check(i, Record::Abundance(abundance));
    }

    let mut seen: HashMap<(&str, &str), usize> = HashMap::new();
    for (i, assoc) in input.associations.iter().enumerate() {
        let (a, b) = (assoc.taxon_a.trim(), assoc.taxon_b.trim());
        if a == b {
            continue;
        }
        let key = if a <= b { (a, b) } else { (b, a) };
        if let Some(first) = seen.get(&key) {
            violations.push(SchemaViolation::new(
                RecordKind::Association,
                i,
                "taxon_b",
                format!("duplicate association of '{}' and '{}' (first at record {})", a, b, first),
            ));
        } else {
            seen.insert(key, i);
        }
    }

    let mut measured: HashMap<(&str, &str), usize> = HashMap::new();
    for (i, abundance) in input.abundances.iter().enumerate() {
        let key = (abundance.sample.trim(), abundance.taxon.trim());
        if let Some(first) = measured.get(&key) {
            violations.push(SchemaViolation::new(
                RecordKind::Abundance,
                i,
                "taxon",
                format!(
                    "duplicate abundance of '{}' in sample '{}' (first at record {})",
                    key.1, key.0, first
                ),
            ));
        } else {
            measured.insert(key, i);
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}
