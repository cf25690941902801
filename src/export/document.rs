//! The exchange document and the views that render into it
//!
//! The layout follows Cytoscape.js `elements`: every node and edge wraps
//! its fields in a `data` object, with free-form attributes flattened in
//! next to the fixed ones.

use crate::graph::Sign;
use crate::query::{EdgeSet, SummaryTable};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Serializable graph document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeDocument {
    pub data: DocumentData,
    pub elements: Elements,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentData {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Elements {
    pub nodes: Vec<NodeElement>,
    pub edges: Vec<EdgeElement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeElement {
    pub data: NodeData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    pub id: String,
    pub label: String,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
}

impl NodeData {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeElement {
    pub data: EdgeData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeData {
    pub id: String,
    pub source: String,
    pub target: String,
    pub weight: Option<f64>,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
}

impl EdgeData {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            weight: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_weight(mut self, weight: Option<f64>) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

impl ExchangeDocument {
    pub fn node(&self, id: &str) -> Option<&NodeData> {
        self.elements.nodes.iter().map(|n| &n.data).find(|n| n.id == id)
    }

    pub fn edge(&self, id: &str) -> Option<&EdgeData> {
        self.elements.edges.iter().map(|e| &e.data).find(|e| e.id == id)
    }
}

/// A derived view that can be exported
pub trait ExportView {
    fn name(&self) -> String;

    fn nodes(&self) -> Vec<NodeData>;

    fn edges(&self) -> Vec<EdgeData>;
}

/// Render a view into an exchange document
pub fn export(view: &dyn ExportView) -> ExchangeDocument {
    ExchangeDocument {
        data: DocumentData { name: view.name() },
        elements: Elements {
            nodes: view.nodes().into_iter().map(|data| NodeElement { data }).collect(),
            edges: view.edges().into_iter().map(|data| EdgeElement { data }).collect(),
        },
    }
}

fn sign_name(sign: Sign) -> &'static str {
    match sign {
        Sign::Positive => "positive",
        Sign::Negative => "negative",
    }
}

fn sign_value(sign: Option<Sign>) -> Value {
    sign.map(|s| json!(sign_name(s))).unwrap_or(Value::Null)
}

/// Edge id; sign-split edges between the same endpoints get a suffix
fn edge_id(source: &str, target: &str, sign: Option<Sign>) -> String {
    match sign {
        Some(sign) => format!("{}-{}:{}", source, target, sign_name(sign)),
        None => format!("{}-{}", source, target),
    }
}

impl ExportView for EdgeSet {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn nodes(&self) -> Vec<NodeData> {
        self.taxa
            .iter()
            .map(|(id, taxon)| NodeData::new(id.as_str(), &taxon.name).with_attribute("rank", taxon.rank.as_str()))
            .collect()
    }

    fn edges(&self) -> Vec<EdgeData> {
        let labels: BTreeMap<_, _> = self.networks.iter().map(|n| (&n.id, n.label())).collect();

        self.edges
            .iter()
            .map(|(key, edge)| {
                let id = edge_id(key.pair.a.as_str(), key.pair.b.as_str(), key.sign);
                let networks: Vec<Value> = edge
                    .weights
                    .iter()
                    .map(|w| {
                        labels
                            .get(&w.network)
                            .map(|l| json!(l))
                            .unwrap_or_else(|| json!(w.network.as_str()))
                    })
                    .collect();
                let weights: Vec<Value> = edge
                    .weights
                    .iter()
                    .map(|w| w.weight.map(Value::from).unwrap_or(Value::Null))
                    .collect();

                EdgeData::new(id, key.pair.a.as_str(), key.pair.b.as_str())
                    .with_weight(edge.weight())
                    .with_attribute("all_weights", weights)
                    .with_attribute("networks", networks)
                    .with_attribute("sign", sign_value(edge.consensus_sign()))
            })
            .collect()
    }
}

impl ExportView for SummaryTable {
    fn name(&self) -> String {
        format!("{} by {}", self.network.label(), self.rank.as_str())
    }

    fn nodes(&self) -> Vec<NodeData> {
        self.groups
            .iter()
            .map(|group| {
                NodeData::new(&group.id, &group.label)
                    .with_attribute("rank", group.rank.map(|r| json!(r.as_str())).unwrap_or(Value::Null))
                    .with_attribute("members", group.members.len())
                    .with_attribute("internal_weight", group.internal_weight)
                    .with_attribute("internal_associations", group.internal_associations)
            })
            .collect()
    }

    fn edges(&self) -> Vec<EdgeData> {
        self.edges
            .iter()
            .map(|edge| {
                EdgeData::new(edge_id(&edge.source, &edge.target, edge.sign), &edge.source, &edge.target)
                    .with_weight(Some(edge.weight))
                    .with_attribute("associations", edge.associations)
                    .with_attribute("sign", sign_value(edge.sign))
            })
            .collect()
    }
}
