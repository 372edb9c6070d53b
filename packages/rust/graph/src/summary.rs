//! Summary trees and their graph form.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use clearsure_shared::{ClearSureError, Result};

use crate::merge::update_kg;
use crate::model::{KgEdge, KgNode, KnowledgeGraph};
use crate::topics::HAS_CHILD;

pub const SUMMARY: &str = "Summary";

/// One node of a recursive summary tree. `start..=end` are character
/// offsets into the text the root was built from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryNode {
    pub summary: Option<String>,
    #[serde(default)]
    pub start: usize,
    #[serde(default)]
    pub end: usize,
    #[serde(default)]
    pub children: Vec<SummaryNode>,
}

/// Number the tree depth-first as `s1, s2, …` and link parents to children.
pub fn summary_tree_to_kg(tree: &SummaryNode) -> KnowledgeGraph {
    let mut kg = KnowledgeGraph::new();
    let mut counter = 0;
    walk(tree, None, &mut counter, &mut kg);
    kg
}

fn walk(node: &SummaryNode, parent: Option<&str>, counter: &mut u64, kg: &mut KnowledgeGraph) {
    *counter += 1;
    let id = format!("s{counter}");
    kg.nodes.push(
        KgNode::new(id.clone(), node.summary.clone().unwrap_or_default(), SUMMARY)
            .with_attribute("start", node.start as u64)
            .with_attribute("end", node.end as u64),
    );
    if let Some(parent) = parent {
        kg.edges.push(KgEdge::new(parent, HAS_CHILD, id.clone()));
    }
    for child in &node.children {
        walk(child, Some(id.as_str()), counter, kg);
    }
}

/// Merge the summary tree stored at `summary_path` into the graph at
/// `kg_path`. The merged graph is written back to `kg_path` and, when given,
/// also to `out`.
pub fn merge_summary_into_kg(
    summary_path: &Path,
    kg_path: &Path,
    out: Option<&Path>,
) -> Result<KnowledgeGraph> {
    let content =
        std::fs::read_to_string(summary_path).map_err(|e| ClearSureError::io(summary_path, e))?;
    let tree: SummaryNode = serde_json::from_str(&content).map_err(|e| {
        ClearSureError::parse(format!("invalid summary tree {}: {e}", summary_path.display()))
    })?;

    let patch = serde_json::to_value(summary_tree_to_kg(&tree))
        .map_err(|e| ClearSureError::parse(format!("failed to encode summary graph: {e}")))?;

    let mut kg = KnowledgeGraph::load(kg_path)?;
    let id_map = update_kg(&mut kg, &patch)?;
    kg.save(kg_path)?;
    if let Some(out) = out {
        kg.save(out)?;
    }

    info!(summaries = id_map.len(), kg = %kg_path.display(), "Merged summary tree");
    Ok(kg)
}
