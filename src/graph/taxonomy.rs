//! Taxonomic ranks and lineage parsing
//!
//! Lineages arrive either as a list of entries or as a single
//! `;`-separated string. Entries may carry the Greengenes-style rank prefix
//! (`k__Bacteria`, `p__Firmicutes`); unprefixed entries take their rank from
//! their position, kingdom first. Placeholders such as `s__`, `NA` or names
//! with fewer than two letters are unknown and dropped.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Taxonomic rank, ordered from the most general to the most specific
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rank {
    Kingdom,
    Phylum,
    Class,
    Order,
    Family,
    Genus,
    Species,
    /// Feature level below species (OTU / ASV)
    Otu,
}

impl Rank {
    /// Ranks that can appear in a lineage, in positional order
    pub const LINEAGE: [Rank; 7] = [
        Rank::Kingdom,
        Rank::Phylum,
        Rank::Class,
        Rank::Order,
        Rank::Family,
        Rank::Genus,
        Rank::Species,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Rank::Kingdom => "kingdom",
            Rank::Phylum => "phylum",
            Rank::Class => "class",
            Rank::Order => "order",
            Rank::Family => "family",
            Rank::Genus => "genus",
            Rank::Species => "species",
            Rank::Otu => "otu",
        }
    }

    fn from_prefix(prefix: char) -> Option<Self> {
        match prefix.to_ascii_lowercase() {
            'k' | 'd' => Some(Rank::Kingdom),
            'p' => Some(Rank::Phylum),
            'c' => Some(Rank::Class),
            'o' => Some(Rank::Order),
            'f' => Some(Rank::Family),
            'g' => Some(Rank::Genus),
            's' => Some(Rank::Species),
            _ => None,
        }
    }

    /// True if `self` is a strictly more general rank than `other`
    pub fn is_above(&self, other: Rank) -> bool {
        *self < other
    }
}

impl std::fmt::Display for Rank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rank {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kingdom" | "domain" => Ok(Rank::Kingdom),
            "phylum" => Ok(Rank::Phylum),
            "class" => Ok(Rank::Class),
            "order" => Ok(Rank::Order),
            "family" => Ok(Rank::Family),
            "genus" => Ok(Rank::Genus),
            "species" => Ok(Rank::Species),
            "otu" | "asv" | "feature" => Ok(Rank::Otu),
            other => Err(format!("unknown taxonomic rank '{}'", other)),
        }
    }
}

/// One resolved lineage entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageEntry {
    pub rank: Rank,
    pub name: String,
}

/// Parse a `;`-separated lineage string
pub fn parse_lineage(lineage: &str) -> Vec<LineageEntry> {
    let parts: Vec<&str> = lineage.split(';').collect();
    parse_lineage_parts(&parts)
}

/// Parse a lineage given as separate entries
pub fn parse_lineage_parts<S: AsRef<str>>(parts: &[S]) -> Vec<LineageEntry> {
    let mut entries: Vec<LineageEntry> = Vec::new();

    for (position, raw) in parts.iter().enumerate() {
        let raw = raw.as_ref().trim().trim_matches('"');
        let (rank, name) = match split_prefix(raw) {
            Some((rank, name)) => (Some(rank), name),
            None => (Rank::LINEAGE.get(position).copied(), raw),
        };
        let Some(rank) = rank else { continue };
        if !is_known_name(name) {
            continue;
        }
        // Later entries win if a lineage repeats a rank
        entries.retain(|e| e.rank != rank);
        entries.push(LineageEntry {
            rank,
            name: name.to_string(),
        });
    }

    entries.sort_by_key(|e| e.rank);
    entries
}

/// Parse one entry whose rank is already known, e.g. from a column name
///
/// A rank prefix on the value is stripped but must agree with `rank`.
pub fn parse_ranked(rank: Rank, raw: &str) -> Option<LineageEntry> {
    let raw = raw.trim().trim_matches('"');
    let name = match split_prefix(raw) {
        Some((prefixed, name)) if prefixed == rank => name,
        Some(_) => return None,
        None => raw,
    };
    is_known_name(name).then(|| LineageEntry {
        rank,
        name: name.to_string(),
    })
}

fn split_prefix(raw: &str) -> Option<(Rank, &str)> {
    let mut chars = raw.chars();
    let prefix = chars.next()?;
    let rest = chars.as_str();
    let name = rest.strip_prefix("__")?;
    Rank::from_prefix(prefix).map(|rank| (rank, name.trim()))
}

fn is_known_name(name: &str) -> bool {
    if name.eq_ignore_ascii_case("na") || name.eq_ignore_ascii_case("unknown") {
        return false;
    }
    name.chars().filter(|c| c.is_alphabetic()).count() > 1
}
