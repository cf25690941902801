//! GraphML rendering of an exchange document
//!
//! Attribute keys are declared from whatever attributes the document's nodes
//! and edges carry. Arrays and objects are written as their JSON text.

use super::document::ExchangeDocument;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write;

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn attr_type(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "long",
        Value::Number(_) => "double",
        _ => "string",
    }
}

fn attr_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Collect key declarations; a key seen with mixed types falls back to string
fn declare<'a>(
    keys: &mut BTreeMap<String, &'static str>,
    attributes: impl Iterator<Item = (&'a String, &'a Value)>,
) {
    for (name, value) in attributes {
        if value.is_null() {
            continue;
        }
        let ty = attr_type(value);
        keys.entry(name.clone())
            .and_modify(|existing| {
                if *existing != ty {
                    *existing = "string";
                }
            })
            .or_insert(ty);
    }
}

fn write_data(out: &mut String, prefix: &str, key: &str, value: &Value) {
    if let Some(text) = attr_text(value) {
        let _ = writeln!(
            out,
            "      <data key=\"{}_{}\">{}</data>",
            prefix,
            escape(key),
            escape(&text)
        );
    }
}

/// Render a document as a GraphML string
pub fn to_graphml(doc: &ExchangeDocument) -> String {
    let mut node_keys: BTreeMap<String, &'static str> = BTreeMap::new();
    node_keys.insert("label".to_string(), "string");
    declare(&mut node_keys, doc.elements.nodes.iter().flat_map(|n| n.data.attributes.iter()));

    let mut edge_keys: BTreeMap<String, &'static str> = BTreeMap::new();
    edge_keys.insert("weight".to_string(), "double");
    declare(&mut edge_keys, doc.elements.edges.iter().flat_map(|e| e.data.attributes.iter()));

    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<graphml xmlns=\"http://graphml.graphdrawing.org/xmlns\">\n");
    for (name, ty) in &node_keys {
        let _ = writeln!(
            out,
            "  <key id=\"n_{0}\" for=\"node\" attr.name=\"{0}\" attr.type=\"{1}\"/>",
            escape(name),
            ty
        );
    }
    for (name, ty) in &edge_keys {
        let _ = writeln!(
            out,
            "  <key id=\"e_{0}\" for=\"edge\" attr.name=\"{0}\" attr.type=\"{1}\"/>",
            escape(name),
            ty
        );
    }

    let _ = writeln!(
        out,
        "  <graph id=\"{}\" edgedefault=\"undirected\">",
        escape(&doc.data.name)
    );
    for node in &doc.elements.nodes {
        let data = &node.data;
        let _ = writeln!(out, "    <node id=\"{}\">", escape(&data.id));
        write_data(&mut out, "n", "label", &Value::String(data.label.clone()));
        for (key, value) in &data.attributes {
            write_data(&mut out, "n", key, value);
        }
        out.push_str("    </node>\n");
    }
    for edge in &doc.elements.edges {
        let data = &edge.data;
        let _ = writeln!(
            out,
            "    <edge id=\"{}\" source=\"{}\" target=\"{}\">",
            escape(&data.id),
            escape(&data.source),
            escape(&data.target)
        );
        if let Some(weight) = data.weight {
            write_data(&mut out, "e", "weight", &Value::from(weight));
        }
        for (key, value) in &data.attributes {
            write_data(&mut out, "e", key, value);
        }
        out.push_str("    </edge>\n");
    }
    out.push_str("  </graph>\n</graphml>\n");
    out
}
