//! Cypher export of the knowledge graph (`import_kg.cypher`).
//!
//! Every node becomes `CREATE (:Entity {...});` and every edge a
//! `MATCH ... CREATE (a)-[:REL]->(b);` statement, one per line.

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use clearsure_shared::{ClearSureError, Result};

use crate::model::{KgNode, KnowledgeGraph};

static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

/// `covered by` → `COVERED_BY`.
pub fn clean_relation(relation: &str) -> String {
    relation.to_uppercase().replace([' ', '-'], "_")
}

/// Escape double quotes for use inside a Cypher string literal.
pub fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Backtick-quote `name` unless it is a plain identifier.
fn identifier(name: &str) -> String {
    if IDENT_RE.is_match(name) {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', "``"))
    }
}

/// Render a JSON value as a Cypher literal. Objects and lists of objects
/// are not valid property values, so they are stored as JSON strings.
fn literal(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Array(items) if items.iter().all(|v| !v.is_object() && !v.is_array()) => {
            Some(value.to_string())
        }
        Value::Array(_) | Value::Object(_) => Some(Value::String(value.to_string()).to_string()),
        other => Some(other.to_string()),
    }
}

fn properties<'a>(pairs: impl Iterator<Item = (&'a String, &'a Value)>) -> Vec<String> {
    pairs
        .filter_map(|(key, value)| Some(format!("{}: {}", identifier(key), literal(value)?)))
        .collect()
}

fn node_statement(node: &KgNode) -> String {
    let mut props: Map<String, Value> = Map::new();
    if let Some(kind) = &node.kind {
        props.insert("type".into(), Value::String(kind.clone()));
    }
    for (k, v) in node.attributes.iter().chain(node.extra.iter()) {
        if k != "id" && k != "label" {
            props.insert(k.clone(), v.clone());
        }
    }

    let rendered = properties(props.iter());
    let extra = if rendered.is_empty() {
        String::new()
    } else {
        format!(", {}", rendered.join(", "))
    };
    format!(
        "CREATE (:Entity {{id: \"{}\", label: \"{}\"{extra}}});",
        escape(&node.id),
        escape(&node.label)
    )
}

/// Cypher statements recreating `kg`: nodes first, then edges.
pub fn kg_to_statements(kg: &KnowledgeGraph) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut statements: Vec<String> = kg
        .nodes
        .iter()
        .filter(|n| seen.insert(n.id.as_str()))
        .map(node_statement)
        .collect();

    for edge in &kg.edges {
        let rendered = properties(edge.attributes.iter());
        let attrs = if rendered.is_empty() {
            String::new()
        } else {
            format!(" {{ {} }}", rendered.join(", "))
        };
        statements.push(format!(
            "MATCH (a {{id: \"{}\"}}), (b {{id: \"{}\"}}) CREATE (a)-[:{}{attrs}]->(b);",
            escape(&edge.source),
            escape(&edge.target),
            identifier(&clean_relation(&edge.relation)),
        ));
    }

    statements
}

/// Write the Cypher script for `kg` to `path`, one statement per line.
pub fn write_cypher(kg: &KnowledgeGraph, path: &Path) -> Result<usize> {
    let statements = kg_to_statements(kg);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ClearSureError::io(parent, e))?;
    }
    std::fs::write(path, statements.join("\n")).map_err(|e| ClearSureError::io(path, e))?;
    info!(path = %path.display(), statements = statements.len(), "Wrote Cypher export");
    Ok(statements.len())
}

/// A topic node recovered from a Cypher export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CypherTopic {
    pub id: String,
    pub label: String,
}

/// Topic nodes (`type: "Topic"`) in a Cypher script.
pub fn extract_topics_from_cypher(text: &str) -> Vec<CypherTopic> {
    static TOPIC_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r#"CREATE\s+\(:Entity\s+\{id: "(?P<id>(?:[^"\\]|\\.)+)",\s+label: "(?P<label>(?:[^"\\]|\\.)+)".*?\btype: "Topic""#,
        )
        .expect("valid regex")
    });

    text.lines()
        .filter_map(|line| TOPIC_RE.captures(line))
        .map(|caps| CypherTopic {
            id: unescape(&caps["id"]),
            label: unescape(&caps["label"]),
        })
        .collect()
}

fn unescape(text: &str) -> String {
    text.replace("\\\"", "\"").replace("\\\\", "\\")
}
