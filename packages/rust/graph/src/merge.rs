//! Merging model-produced patches into the graph.
//!
//! A patch arrives either as parsed JSON or as the model's raw answer, which
//! may be a file path, fenced JSON, or JSON surrounded by chatter.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use clearsure_llm::{extract_json_block, strip_fence};
use clearsure_shared::{ClearSureError, Result};

use crate::ids::{EdgeCounter, IdMap, IdPrefix, NodeCounters};
use crate::model::{KgEdge, KgNode, KnowledgeGraph};

/// Parse a patch given as a path to an existing file or as raw model text.
pub fn load_patch(input: &str) -> Result<Value> {
    let path = Path::new(input.trim());
    if !input.contains('\n') && path.is_file() {
        let raw = std::fs::read_to_string(path).map_err(|e| ClearSureError::io(path, e))?;
        return parse_patch(&raw);
    }
    parse_patch(input)
}

/// Parse model text holding a JSON object, possibly fenced or surrounded by
/// chatter.
pub fn parse_patch(raw: &str) -> Result<Value> {
    let stripped = strip_fence(raw);
    match serde_json::from_str(&stripped) {
        Ok(value) => Ok(value),
        Err(_) => {
            let block = extract_json_block(&stripped)?;
            serde_json::from_str(&block)
                .map_err(|e| ClearSureError::parse(format!("invalid patch JSON: {e}")))
        }
    }
}

/// The array stored under `key`, parsed into `T`. A missing key is empty.
pub fn load_patch_list<T: DeserializeOwned>(patch: &Value, key: &str) -> Result<Vec<T>> {
    match patch.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(list) => serde_json::from_value(list.clone())
            .map_err(|e| ClearSureError::parse(format!("invalid '{key}' in patch: {e}"))),
    }
}

/// Merge a `{nodes, edges}` patch into `kg`.
///
/// Renumberable node ids are reassigned after the highest id of the same
/// prefix already in the graph; edges are rewritten through the resulting
/// map and receive fresh `edgeId`s. Nodes whose id already exists and edges
/// whose triple already exists are skipped.
pub fn update_kg(kg: &mut KnowledgeGraph, patch: &Value) -> Result<IdMap> {
    let mut nodes: Vec<KgNode> = load_patch_list(patch, "nodes")?;
    let mut edges: Vec<KgEdge> = load_patch_list(patch, "edges")?;

    let mut counters = NodeCounters::from_nodes(&kg.nodes);
    let mut edge_counter = EdgeCounter::from_edges(&kg.edges);

    let mut id_map = IdMap::new();
    for node in &mut nodes {
        let new_id = match IdPrefix::parse(&node.id) {
            Some((prefix, _)) => counters.next_id(prefix),
            None => node.id.clone(),
        };
        id_map.insert(node.id.clone(), new_id.clone());
        node.id = new_id;
    }

    for edge in &mut edges {
        if let Some(mapped) = id_map.get(&edge.source) {
            edge.source = mapped.clone();
        }
        if let Some(mapped) = id_map.get(&edge.target) {
            edge.target = mapped.clone();
        }
        edge.edge_id = Some(edge_counter.next_id());
    }

    let mut seen_nodes = kg.node_ids();
    let mut added_nodes = 0;
    for node in nodes {
        if seen_nodes.insert(node.id.clone()) {
            kg.nodes.push(node);
            added_nodes += 1;
        }
    }

    let mut seen_edges = kg.edge_triples();
    let mut added_edges = 0;
    for edge in edges {
        if seen_edges.insert(edge.triple()) {
            kg.edges.push(edge);
            added_edges += 1;
        }
    }

    debug!(added_nodes, added_edges, "Merged patch into graph");
    Ok(id_map)
}

/// How [`clean_kg`] treats incoming `edges_patch` entries.
#[derive(Debug, Clone, Default)]
pub struct CleanOptions {
    /// Translate endpoints from patch ids to graph ids.
    pub id_map: Option<IdMap>,
    /// Give every accepted edge a fresh `edgeId`.
    pub reassign_edge_ids: bool,
    /// Drop edges whose endpoints are not nodes of the graph.
    pub drop_missing: bool,
}

/// Counts reported by [`clean_kg`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanStats {
    pub added: usize,
    pub dropped: usize,
    pub duplicates: usize,
}

/// Merge the corrected edges under `edges_patch` into `kg`.
pub fn clean_kg(kg: &mut KnowledgeGraph, patch: &Value, opts: &CleanOptions) -> Result<CleanStats> {
    let edges: Vec<KgEdge> = load_patch_list(patch, "edges_patch")?;
    let node_ids = kg.node_ids();
    let mut seen = kg.edge_triples();
    let mut counter = EdgeCounter::from_edges(&kg.edges);
    let mut stats = CleanStats::default();

    for mut edge in edges {
        if let Some(map) = &opts.id_map {
            if let Some(mapped) = map.get(&edge.source) {
                edge.source = mapped.clone();
            }
            if let Some(mapped) = map.get(&edge.target) {
                edge.target = mapped.clone();
            }
        }

        if opts.drop_missing
            && (!node_ids.contains(&edge.source) || !node_ids.contains(&edge.target))
        {
            stats.dropped += 1;
            continue;
        }

        if !seen.insert(edge.triple()) {
            stats.duplicates += 1;
            continue;
        }

        if opts.reassign_edge_ids {
            edge.edge_id = Some(counter.next_id());
        }
        kg.edges.push(edge);
        stats.added += 1;
    }

    debug!(
        added = stats.added,
        dropped = stats.dropped,
        duplicates = stats.duplicates,
        "Cleaned graph edges"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded() -> KnowledgeGraph {
        let mut kg = KnowledgeGraph::new();
        kg.nodes.push(KgNode::new("n1", "Insurer", "Organisation"));
        kg.nodes.push(KgNode::new("w1", "200 Euros", "Value"));
        let mut edge = KgEdge::new("n1", "HAS_DEDUCTIBLE", "w1");
        edge.edge_id = Some("e1".into());
        kg.edges.push(edge);
        kg
    }

    #[test]
    fn loads_patch_from_fenced_and_chatty_text() {
        let fenced = "```json\n{\"nodes\": [], \"edges\": []}\n```";
        assert!(load_patch(fenced).unwrap().get("nodes").is_some());

        let chatty = "Here you go:\n{\"edges_patch\": [{\"source\": \"n1\", \"relation\": \"R\", \"target\": \"n2\"}]}\nCheers";
        let value = load_patch(chatty).unwrap();
        let edges: Vec<KgEdge> = load_patch_list(&value, "edges_patch").unwrap();
        assert_eq!(edges.len(), 1);

        assert!(load_patch("no json at all").unwrap_err().is_parse());
    }

    #[test]
    fn loads_patch_from_file() {
        let dir = std::env::temp_dir().join(format!("clearsure-patch-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("patch.json");
        std::fs::write(&path, r#"{"nodes": [{"id": "n1", "label": "A"}]}"#).unwrap();

        let value = load_patch(path.to_str().unwrap()).unwrap();
        let nodes: Vec<KgNode> = load_patch_list(&value, "nodes").unwrap();
        assert_eq!(nodes[0].label, "A");
        assert!(load_patch_list::<KgEdge>(&value, "edges").unwrap().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn update_renumbers_nodes_and_edges() {
        let mut kg = seeded();
        let patch = json!({
            "nodes": [
                {"id": "n1", "label": "Vehicle", "type": "Asset"},
                {"id": "w1", "label": "Full repair cost", "type": "Value"},
                {"id": "Germany", "label": "Germany"}
            ],
            "edges": [
                {"source": "n1", "relation": "HAS_COVER", "target": "w1"},
                {"source": "n1", "relation": "LOCATED_IN", "target": "Germany"}
            ]
        });

        let id_map = update_kg(&mut kg, &patch).unwrap();
        assert_eq!(id_map["n1"], "n2");
        assert_eq!(id_map["w1"], "w2");
        assert_eq!(id_map["Germany"], "Germany");

        assert_eq!(kg.nodes.len(), 5);
        let new_edge = kg.edges.iter().find(|e| e.relation == "HAS_COVER").unwrap();
        assert_eq!((new_edge.source.as_str(), new_edge.target.as_str()), ("n2", "w2"));
        assert_eq!(new_edge.edge_id.as_deref(), Some("e2"));
        let located = kg.edges.iter().find(|e| e.relation == "LOCATED_IN").unwrap();
        assert_eq!(located.edge_id.as_deref(), Some("e3"));
    }

    #[test]
    fn update_skips_existing_external_ids_and_triples() {
        let mut kg = seeded();
        kg.nodes.push(KgNode::new("Germany", "Germany", "Country"));
        let patch = json!({
            "nodes": [{"id": "Germany", "label": "Deutschland"}],
            "edges": []
        });
        update_kg(&mut kg, &patch).unwrap();
        assert_eq!(kg.nodes.iter().filter(|n| n.id == "Germany").count(), 1);
        assert_eq!(kg.node("Germany").unwrap().label, "Germany");
    }

    #[test]
    fn malformed_patch_is_parse_error() {
        let mut kg = seeded();
        let err = update_kg(&mut kg, &json!({"nodes": [{"label": "no id"}]})).unwrap_err();
        assert!(err.is_parse());
    }

    #[test]
    fn clean_translates_drops_and_reassigns() {
        let mut kg = seeded();
        kg.nodes.push(KgNode::new("n2", "Vehicle", "Asset"));
        let mut id_map = IdMap::new();
        id_map.insert("n1".into(), "n2".into());
        id_map.insert("n9".into(), "n9".into());

        let patch = json!({
            "edges_patch": [
                {"source": "n1", "relation": "INSURED_BY", "target": "x", "edgeId": "e77"},
                {"source": "n1", "relation": "HAS_DEDUCTIBLE", "target": "w1"},
                {"source": "n9", "relation": "GONE", "target": "w1"},
                {"source": "n1", "relation": "HAS_DEDUCTIBLE", "target": "w1"}
            ]
        });
        let opts = CleanOptions {
            id_map: Some(id_map),
            reassign_edge_ids: true,
            drop_missing: true,
        };
        let stats = clean_kg(&mut kg, &patch, &opts).unwrap();

        assert_eq!(stats, CleanStats { added: 1, dropped: 2, duplicates: 1 });
        let added = kg.edges.last().unwrap();
        assert_eq!((added.source.as_str(), added.target.as_str()), ("n2", "w1"));
        assert_eq!(added.edge_id.as_deref(), Some("e2"));
    }

    #[test]
    fn clean_without_options_keeps_patch_edges() {
        let mut kg = seeded();
        let patch = json!({"edges_patch": [{"source": "a", "relation": "R", "target": "b"}]});
        let stats = clean_kg(&mut kg, &patch, &CleanOptions::default()).unwrap();
        assert_eq!(stats.added, 1);
        assert!(kg.edges.last().unwrap().edge_id.is_none());
    }
}
