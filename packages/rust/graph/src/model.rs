//! The on-disk knowledge graph (`final_kg.json`).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use clearsure_shared::{ClearSureError, Result};

use crate::ids::{EdgeCounter, IdPrefix};

pub type Attributes = Map<String, Value>;

/// A node of the graph. Unknown fields produced by the model are kept in
/// `extra` and written back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KgNode {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Attributes,
    #[serde(flatten)]
    pub extra: Attributes,
}

impl KgNode {
    pub fn new(id: impl Into<String>, label: impl Into<String>, kind: &str) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind: Some(kind.to_string()),
            attributes: Map::new(),
            extra: Map::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind.as_deref() == Some(kind)
    }

    /// Integer attribute, if present.
    pub fn attr_u64(&self, key: &str) -> Option<u64> {
        self.attributes.get(key).and_then(Value::as_u64)
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KgEdge {
    pub source: String,
    pub relation: String,
    pub target: String,
    #[serde(rename = "edgeId", default, skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Attributes,
    #[serde(flatten)]
    pub extra: Attributes,
}

impl KgEdge {
    pub fn new(source: impl Into<String>, relation: &str, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            relation: relation.to_string(),
            target: target.into(),
            edge_id: None,
            attributes: Map::new(),
            extra: Map::new(),
        }
    }

    /// `(source, relation, target)`, the identity used for deduplication.
    pub fn triple(&self) -> (String, String, String) {
        (
            self.source.clone(),
            self.relation.clone(),
            self.target.clone(),
        )
    }
}

/// Nodes and edges, serialized as `{"nodes": [...], "edges": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    #[serde(default)]
    pub nodes: Vec<KgNode>,
    #[serde(default)]
    pub edges: Vec<KgEdge>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ClearSureError::io(path, e))?;
        serde_json::from_str(&content).map_err(|e| {
            ClearSureError::parse(format!("invalid knowledge graph {}: {e}", path.display()))
        })
    }

    /// Write the graph as JSON with two-space indentation.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ClearSureError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ClearSureError::parse(format!("failed to serialize graph: {e}")))?;
        std::fs::write(path, json).map_err(|e| ClearSureError::io(path, e))?;
        debug!(
            path = %path.display(),
            nodes = self.nodes.len(),
            edges = self.edges.len(),
            "Saved knowledge graph"
        );
        Ok(())
    }

    /// Create an empty graph file at `path` unless one exists.
    pub fn ensure_exists(path: &Path) -> Result<()> {
        if !path.exists() {
            Self::new().save(path)?;
            info!(path = %path.display(), "Created empty knowledge graph");
        }
        Ok(())
    }

    /// Replace the file at `path` with an empty graph. With `backup`, the old
    /// content is first copied to `<name>.bak`; the backup path is returned.
    pub fn reset(path: &Path, backup: bool) -> Result<Option<PathBuf>> {
        let mut backup_path = None;
        if backup && path.exists() {
            let mut name = path.file_name().unwrap_or_default().to_os_string();
            name.push(".bak");
            let target = path.with_file_name(name);
            std::fs::copy(path, &target).map_err(|e| ClearSureError::io(&target, e))?;
            info!(backup = %target.display(), "Backed up knowledge graph");
            backup_path = Some(target);
        }
        Self::new().save(path)?;
        Ok(backup_path)
    }

    pub fn node(&self, id: &str) -> Option<&KgNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    pub fn node_ids(&self) -> HashSet<String> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    pub fn edge_triples(&self) -> HashSet<(String, String, String)> {
        self.edges.iter().map(KgEdge::triple).collect()
    }

    pub fn nodes_of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a KgNode> + 'a {
        self.nodes.iter().filter(move |n| n.is_kind(kind))
    }

    /// Next free id for `prefix`, e.g. `n4` when `n3` is the highest.
    pub fn next_id(&self, prefix: IdPrefix) -> String {
        prefix.format(prefix.max_index(&self.nodes) + 1)
    }

    /// Append `edge` with a fresh `edgeId` unless its triple already exists.
    /// Returns whether the edge was added.
    pub fn push_edge(&mut self, mut edge: KgEdge) -> bool {
        if self
            .edges
            .iter()
            .any(|e| e.source == edge.source && e.relation == edge.relation && e.target == edge.target)
        {
            return false;
        }
        let mut counter = EdgeCounter::from_edges(&self.edges);
        edge.edge_id = Some(counter.next_id());
        self.edges.push(edge);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("clearsure-graph-{}", uuid::Uuid::now_v7()))
            .join(name)
    }

    #[test]
    fn keeps_unknown_fields() {
        let json = r#"{"nodes":[{"id":"n1","label":"Insurer","type":"Organisation","confidence":0.9}],
                       "edges":[{"source":"n1","relation":"COVERS","target":"w1","edgeId":"e1"}]}"#;
        let kg: KnowledgeGraph = serde_json::from_str(json).unwrap();
        assert_eq!(kg.nodes[0].kind.as_deref(), Some("Organisation"));
        assert_eq!(kg.nodes[0].extra["confidence"], 0.9);
        assert_eq!(kg.edges[0].edge_id.as_deref(), Some("e1"));

        let back = serde_json::to_value(&kg).unwrap();
        assert_eq!(back["nodes"][0]["confidence"], 0.9);
        assert_eq!(back["edges"][0]["edgeId"], "e1");
        assert!(back["nodes"][0].get("attributes").is_none());
    }

    #[test]
    fn missing_label_defaults_to_empty() {
        let node: KgNode = serde_json::from_str(r#"{"id":"w1"}"#).unwrap();
        assert_eq!(node.label, "");
        assert!(node.kind.is_none());
    }

    #[test]
    fn ensure_and_reset_with_backup() {
        let path = temp_path("final_kg.json");
        KnowledgeGraph::ensure_exists(&path).unwrap();
        assert_eq!(KnowledgeGraph::load(&path).unwrap(), KnowledgeGraph::new());

        let mut kg = KnowledgeGraph::new();
        kg.nodes.push(KgNode::new("n1", "Insurer", "Entity"));
        kg.save(&path).unwrap();

        KnowledgeGraph::ensure_exists(&path).unwrap();
        assert_eq!(KnowledgeGraph::load(&path).unwrap().nodes.len(), 1);

        let backup = KnowledgeGraph::reset(&path, true).unwrap().unwrap();
        assert!(backup.ends_with("final_kg.json.bak"));
        assert_eq!(KnowledgeGraph::load(&backup).unwrap().nodes.len(), 1);
        assert!(KnowledgeGraph::load(&path).unwrap().nodes.is_empty());

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn push_edge_assigns_ids_and_dedupes() {
        let mut kg = KnowledgeGraph::new();
        assert!(kg.push_edge(KgEdge::new("n1", "COVERS", "n2")));
        assert!(kg.push_edge(KgEdge::new("n2", "EXCLUDES", "n3")));
        assert!(!kg.push_edge(KgEdge::new("n1", "COVERS", "n2")));
        let ids: Vec<_> = kg.edges.iter().map(|e| e.edge_id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["e1", "e2"]);
    }
}
