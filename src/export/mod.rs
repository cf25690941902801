//! Export of derived views
//!
//! Views render into an [`ExchangeDocument`], which serializes to JSON in
//! the Cytoscape.js elements layout or to GraphML.

mod document;
mod graphml;

pub use document::{
    export, DocumentData, EdgeData, EdgeElement, Elements, ExchangeDocument, ExportView, NodeData, NodeElement,
};
pub use graphml::to_graphml;

use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors writing exported documents
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),
}

/// Output format for exported documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Json,
    GraphMl,
}

impl ExportFormat {
    /// Pick a format from a file extension
    pub fn from_path(path: &Path) -> Result<Self, ExportError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        ext.parse()
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" | "cyjs" => Ok(ExportFormat::Json),
            "graphml" | "xml" => Ok(ExportFormat::GraphMl),
            other => Err(ExportError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Pretty-printed JSON
pub fn to_json(doc: &ExchangeDocument) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(doc)?)
}

pub fn render(doc: &ExchangeDocument, format: ExportFormat) -> Result<String, ExportError> {
    match format {
        ExportFormat::Json => to_json(doc),
        ExportFormat::GraphMl => Ok(to_graphml(doc)),
    }
}

/// Write a document to `path`, choosing the format from its extension
pub fn write_document(doc: &ExchangeDocument, path: &Path) -> Result<ExportFormat, ExportError> {
    let format = ExportFormat::from_path(path)?;
    std::fs::write(path, render(doc, format)?)?;
    tracing::info!(path = %path.display(), name = %doc.data.name, "exported document");
    Ok(format)
}
