//! Topic layer: `t#` nodes arranged with `HAS_CHILD`, and `BELONGS_TO_TOPIC`
//! edges from statements to the deepest topic covering them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ids::{IdPrefix, NodeCounters};
use crate::model::{KgEdge, KgNode, KnowledgeGraph};
use crate::statements::{DOCUMENT, STATEMENT};

pub const TOPIC: &str = "Topic";
pub const HAS_CHILD: &str = "HAS_CHILD";
pub const BELONGS_TO_TOPIC: &str = "BELONGS_TO_TOPIC";

/// A labelled span of the document. `char_end` is inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicNode {
    pub id: String,
    pub name: String,
    pub char_start: usize,
    pub char_end: usize,
    #[serde(default)]
    pub children: Vec<TopicNode>,
}

impl TopicNode {
    pub fn new(id: impl Into<String>, name: impl Into<String>, char_start: usize, char_end: usize) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            char_start,
            char_end,
            children: Vec::new(),
        }
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(TopicNode::node_count).sum::<usize>()
    }
}

/// Topic nodes and `HAS_CHILD` edges for the tree rooted at `root`, parents
/// before children.
pub fn flatten_topics(root: &TopicNode) -> (Vec<KgNode>, Vec<KgEdge>) {
    let mut nodes = Vec::new();
    let mut edges = Vec::new();
    walk(root, &mut nodes, &mut edges);
    (nodes, edges)
}

fn walk(node: &TopicNode, nodes: &mut Vec<KgNode>, edges: &mut Vec<KgEdge>) {
    nodes.push(
        KgNode::new(node.id.clone(), node.name.clone(), TOPIC)
            .with_attribute("char_start", node.char_start as u64)
            .with_attribute("char_end", node.char_end as u64),
    );
    for child in &node.children {
        edges.push(KgEdge::new(node.id.clone(), HAS_CHILD, child.id.clone()));
        walk(child, nodes, edges);
    }
}

/// Give every topic of the tree a fresh `t#` id continuing after the topics
/// already in `kg`, parents before children.
pub fn renumber_topics(kg: &KnowledgeGraph, root: &mut TopicNode) {
    fn walk(node: &mut TopicNode, counters: &mut NodeCounters) {
        node.id = counters.next_id(IdPrefix::Topic);
        for child in &mut node.children {
            walk(child, counters);
        }
    }
    walk(root, &mut NodeCounters::from_nodes(&kg.nodes));
}

/// Add the topic tree of `document_id` to `kg`. Topics whose id already
/// exists are kept as they are. Returns the number of topic nodes added.
pub fn add_topic_tree(kg: &mut KnowledgeGraph, root: &TopicNode, document_id: &str) -> usize {
    let (nodes, edges) = flatten_topics(root);
    let mut added = 0;
    for node in nodes {
        if !kg.contains_node(&node.id) {
            kg.nodes.push(node.with_attribute(DOCUMENT, document_id));
            added += 1;
        }
    }
    for edge in edges {
        kg.push_edge(edge);
    }
    added
}

/// Link every statement to the deepest topic of the same document whose
/// span contains the statement's start offset. Returns the number of new
/// edges.
pub fn assign_statements_to_topics(kg: &mut KnowledgeGraph) -> usize {
    let parents: HashMap<&str, &str> = kg
        .edges
        .iter()
        .filter(|e| e.relation == HAS_CHILD)
        .map(|e| (e.target.as_str(), e.source.as_str()))
        .collect();

    let topics: Vec<(String, Option<&str>, u64, u64, usize)> = kg
        .nodes_of_kind(TOPIC)
        .filter_map(|t| {
            let start = t.attr_u64("char_start")?;
            let end = t.attr_u64("char_end")?;
            Some((t.id.clone(), t.attr_str(DOCUMENT), start, end, depth(&t.id, &parents)))
        })
        .collect();

    let links: Vec<(String, String)> = kg
        .nodes_of_kind(STATEMENT)
        .filter_map(|st| {
            let start = st.attr_u64("char_start")?;
            let document = st.attr_str(DOCUMENT);
            topics
                .iter()
                .filter(|(_, doc, s, e, _)| *doc == document && *s <= start && start <= *e)
                .max_by(|a, b| a.4.cmp(&b.4).then(b.3.saturating_sub(b.2).cmp(&a.3.saturating_sub(a.2))))
                .map(|(topic_id, ..)| (st.id.clone(), topic_id.clone()))
        })
        .collect();

    let added = links
        .into_iter()
        .filter(|(statement, topic)| {
            kg.push_edge(KgEdge::new(statement.clone(), BELONGS_TO_TOPIC, topic.clone()))
        })
        .count();

    debug!(added, "Assigned statements to topics");
    added
}

fn depth(id: &str, parents: &HashMap<&str, &str>) -> usize {
    let mut depth = 0;
    let mut current = id;
    while let Some(&parent) = parents.get(current) {
        depth += 1;
        if depth > parents.len() {
            break;
        }
        current = parent;
    }
    depth
}
