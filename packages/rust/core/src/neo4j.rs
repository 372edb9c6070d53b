//! Neo4j delivery of the knowledge graph and topic trees.

use std::io::Write;
use std::path::Path;

use neo4rs::{Graph, Query, query};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use clearsure_graph::{KnowledgeGraph, TopicNode, kg_to_statements};
use clearsure_shared::{ClearSureError, Neo4jSettings, Result};

/// Statements sent between progress log lines.
const PROGRESS_EVERY: usize = 1000;

fn graph_err(e: impl std::fmt::Display) -> ClearSureError {
    ClearSureError::Graph(e.to_string())
}

/// Topic writes for `root` in parent-first order: one `MERGE` per topic, and
/// one `HAS_CHILD` `MERGE` per parent/child pair.
pub fn topic_tree_queries(root: &TopicNode) -> Vec<Query> {
    let mut queries = Vec::with_capacity(root.node_count() * 2);
    collect_topic_queries(root, None, &mut queries);
    queries
}

fn collect_topic_queries(node: &TopicNode, parent: Option<&str>, out: &mut Vec<Query>) {
    out.push(
        query("MERGE (n:Topic {id: $id}) SET n.name = $name, n.char_start = $cs, n.char_end = $ce")
            .param("id", node.id.as_str())
            .param("name", node.name.as_str())
            .param("cs", node.char_start as i64)
            .param("ce", node.char_end as i64),
    );
    if let Some(parent) = parent {
        out.push(
            query("MATCH (p:Topic {id: $pid}), (c:Topic {id: $cid}) MERGE (p)-[:HAS_CHILD]->(c)")
                .param("pid", parent)
                .param("cid", node.id.as_str()),
        );
    }
    for child in &node.children {
        collect_topic_queries(child, Some(&node.id), out);
    }
}

/// Replace every topic id in the tree with a `t-<uuid>` id so trees pushed
/// separately never `MERGE` into each other.
pub fn assign_topic_uuids(root: &mut TopicNode) {
    root.id = format!("t-{}", Uuid::now_v7());
    for child in &mut root.children {
        assign_topic_uuids(child);
    }
}

/// Backtick-quote a schema object name for `DROP` statements.
fn quote_name(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// A connection to the configured Neo4j instance.
pub struct Neo4jSink {
    graph: Graph,
}

impl Neo4jSink {
    #[instrument(skip_all, fields(uri = %settings.uri))]
    pub async fn connect(settings: &Neo4jSettings) -> Result<Self> {
        let graph = Graph::new(&settings.uri, &settings.user, &settings.password)
            .await
            .map_err(graph_err)?;
        info!("Connected to Neo4j");
        Ok(Self { graph })
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Delete every node. With `drop_meta`, also drop all constraints and
    /// indexes.
    pub async fn clear_database(&self, drop_meta: bool) -> Result<()> {
        self.graph
            .run(query("MATCH (n) DETACH DELETE n"))
            .await
            .map_err(graph_err)?;

        if drop_meta {
            for name in self.names("SHOW CONSTRAINTS YIELD name RETURN name").await? {
                self.graph
                    .run(query(&format!("DROP CONSTRAINT {} IF EXISTS", quote_name(&name))))
                    .await
                    .map_err(graph_err)?;
            }
            for name in self.names("SHOW INDEXES YIELD name RETURN name").await? {
                self.graph
                    .run(query(&format!("DROP INDEX {} IF EXISTS", quote_name(&name))))
                    .await
                    .map_err(graph_err)?;
            }
        }
        info!(drop_meta, "Cleared Neo4j database");
        Ok(())
    }

    async fn names(&self, cypher: &str) -> Result<Vec<String>> {
        let mut rows = self.graph.execute(query(cypher)).await.map_err(graph_err)?;
        let mut names = Vec::new();
        while let Some(row) = rows.next().await.map_err(graph_err)? {
            names.push(row.get::<String>("name").map_err(graph_err)?);
        }
        Ok(names)
    }

    /// Send the Cypher export of `kg` in a single transaction. With
    /// `save_to`, every statement is also written to that file.
    #[instrument(skip_all)]
    pub async fn load_and_push(&self, kg: &KnowledgeGraph, save_to: Option<&Path>) -> Result<usize> {
        let statements = kg_to_statements(kg);

        let mut writer = match save_to {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|e| ClearSureError::io(parent, e))?;
                }
                let file = std::fs::File::create(path).map_err(|e| ClearSureError::io(path, e))?;
                Some((path, std::io::BufWriter::new(file)))
            }
            None => None,
        };

        let mut txn = self.graph.start_txn().await.map_err(graph_err)?;
        for (i, statement) in statements.iter().enumerate() {
            if let Some((path, w)) = writer.as_mut() {
                writeln!(w, "{statement}").map_err(|e| ClearSureError::io(*path, e))?;
            }
            txn.run(query(statement)).await.map_err(graph_err)?;
            if (i + 1) % PROGRESS_EVERY == 0 {
                info!(sent = i + 1, "Statements sent");
            }
        }
        txn.commit().await.map_err(graph_err)?;

        if let Some((path, mut w)) = writer {
            w.flush().map_err(|e| ClearSureError::io(path, e))?;
        }
        info!(statements = statements.len(), "Pushed graph to Neo4j");
        Ok(statements.len())
    }

    /// Write a topic tree as `Topic` nodes linked by `HAS_CHILD`.
    pub async fn push_topic_tree(&self, root: &TopicNode) -> Result<()> {
        for q in topic_tree_queries(root) {
            self.graph.run(q).await.map_err(graph_err)?;
        }
        debug!(topics = root.node_count(), "Pushed topic tree");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_queries_cover_nodes_and_links() {
        let mut root = TopicNode::new("t1", "Vehicle Insurance", 0, 99);
        let mut child = TopicNode::new("t2", "Collision", 0, 49);
        child.children.push(TopicNode::new("t3", "Repairs", 10, 49));
        root.children.push(child);
        root.children.push(TopicNode::new("t4", "Floods", 50, 99));

        // 4 topic merges + 3 parent links
        assert_eq!(topic_tree_queries(&root).len(), 7);
    }

    #[test]
    fn separately_built_trees_get_disjoint_topic_ids() {
        fn ids(node: &TopicNode, out: &mut Vec<String>) {
            out.push(node.id.clone());
            for child in &node.children {
                ids(child, out);
            }
        }
        let tree = || {
            let mut root = TopicNode::new("t1", "Policy", 0, 99);
            root.children.push(TopicNode::new("t2", "Cover", 0, 49));
            root.children.push(TopicNode::new("t3", "Claims", 50, 99));
            root
        };
        let (mut first, mut second) = (tree(), tree());
        assign_topic_uuids(&mut first);
        assign_topic_uuids(&mut second);

        let mut all = Vec::new();
        ids(&first, &mut all);
        ids(&second, &mut all);
        assert!(all.iter().all(|id| id.starts_with("t-")));
        let unique: std::collections::HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), 6);
        assert_eq!(topic_tree_queries(&first).len() + topic_tree_queries(&second).len(), 10);
    }

    #[test]
    fn quotes_schema_names() {
        assert_eq!(quote_name("topic-embeddings"), "`topic-embeddings`");
        assert_eq!(quote_name("odd`name"), "`odd``name`");
    }
}
