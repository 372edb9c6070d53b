//! Vector similarity between the topics of an exported graph.

use std::fmt::Write as _;
use std::path::Path;

use neo4rs::{Query, query};
use serde::Serialize;
use tracing::{info, instrument, warn};

use clearsure_graph::{CypherTopic, extract_topics_from_cypher};
use clearsure_llm::OllamaClient;
use clearsure_shared::{ClearSureError, Result};

use crate::neo4j::Neo4jSink;

fn graph_err(e: impl std::fmt::Display) -> ClearSureError {
    ClearSureError::Graph(e.to_string())
}

/// A neighbour returned by the vector index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarTopic {
    pub id: String,
    pub label: String,
    pub score: f64,
}

/// A topic of the export and its nearest neighbours.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicMatches {
    pub topic: CypherTopic,
    pub similar: Vec<SimilarTopic>,
}

/// Topics listed in a Cypher export file.
pub fn load_topics(cypher_path: &Path) -> Result<Vec<CypherTopic>> {
    let text = std::fs::read_to_string(cypher_path).map_err(|e| ClearSureError::io(cypher_path, e))?;
    Ok(extract_topics_from_cypher(&text))
}

fn create_index_query(index: &str, dimensions: usize) -> Query {
    query("CALL db.index.vector.createNodeIndex($name, 'Topic', 'embedding', $dim, 'cosine')")
        .param("name", index)
        .param("dim", dimensions as i64)
}

fn set_embedding_query(topic: &CypherTopic, embedding: &[f32]) -> Query {
    query("MERGE (t:Topic {id: $id}) SET t.label = $label, t.embedding = $embedding")
        .param("id", topic.id.as_str())
        .param("label", topic.label.as_str())
        .param("embedding", to_f64(embedding))
}

fn neighbours_query(index: &str, top_k: u32, embedding: &[f32]) -> Query {
    query(
        "CALL db.index.vector.queryNodes($index, $k, $embedding) \
         YIELD node, score RETURN node.id AS id, node.label AS label, score",
    )
    .param("index", index)
    .param("k", i64::from(top_k))
    .param("embedding", to_f64(embedding))
}

fn to_f64(embedding: &[f32]) -> Vec<f64> {
    embedding.iter().map(|v| f64::from(*v)).collect()
}

impl Neo4jSink {
    /// Create the cosine vector index over `Topic.embedding` unless an index
    /// named `index` already exists. Returns whether it was created.
    pub async fn ensure_vector_index(&self, index: &str, dimensions: usize) -> Result<bool> {
        let mut rows = self
            .graph()
            .execute(query("SHOW INDEXES YIELD name WHERE name = $name RETURN name").param("name", index))
            .await
            .map_err(graph_err)?;
        if rows.next().await.map_err(graph_err)?.is_some() {
            return Ok(false);
        }

        self.graph()
            .run(create_index_query(index, dimensions))
            .await
            .map_err(graph_err)?;
        info!(index, dimensions, "Created vector index");
        Ok(true)
    }

    /// Store `embedding` on the topic node, creating it if needed.
    pub async fn set_topic_embedding(&self, topic: &CypherTopic, embedding: &[f32]) -> Result<()> {
        self.graph()
            .run(set_embedding_query(topic, embedding))
            .await
            .map_err(graph_err)
    }

    /// The `top_k` nearest topics to `embedding` in `index`.
    pub async fn query_similar(&self, index: &str, top_k: u32, embedding: &[f32]) -> Result<Vec<SimilarTopic>> {
        let mut rows = self
            .graph()
            .execute(neighbours_query(index, top_k, embedding))
            .await
            .map_err(graph_err)?;

        let mut similar = Vec::new();
        while let Some(row) = rows.next().await.map_err(graph_err)? {
            similar.push(SimilarTopic {
                id: row.get::<String>("id").map_err(graph_err)?,
                label: row.get::<String>("label").unwrap_or_default(),
                score: row.get::<f64>("score").map_err(graph_err)?,
            });
        }
        Ok(similar)
    }
}

/// Embed every topic label, store the vectors in Neo4j, and look up each
/// topic's neighbours.
#[instrument(skip_all, fields(topics = topics.len(), index))]
pub async fn find_similar_topics(
    sink: &Neo4jSink,
    embedder: &OllamaClient,
    topics: &[CypherTopic],
    index: &str,
    top_k: u32,
) -> Result<Vec<TopicMatches>> {
    if topics.is_empty() {
        warn!("No topics to compare");
        return Ok(Vec::new());
    }

    let labels: Vec<String> = topics.iter().map(|t| t.label.clone()).collect();
    let embeddings = embedder.embed(&labels).await?;
    let dimensions = embeddings.first().map(Vec::len).unwrap_or_default();
    if dimensions == 0 {
        return Err(ClearSureError::Llm("embedding model returned empty vectors".into()));
    }

    sink.ensure_vector_index(index, dimensions).await?;
    for (topic, embedding) in topics.iter().zip(&embeddings) {
        sink.set_topic_embedding(topic, embedding).await?;
    }

    let mut matches = Vec::with_capacity(topics.len());
    for (topic, embedding) in topics.iter().zip(&embeddings) {
        let similar = sink.query_similar(index, top_k, embedding).await?;
        matches.push(TopicMatches {
            topic: topic.clone(),
            similar,
        });
    }
    Ok(matches)
}

/// Human-readable report of similarity results.
pub fn format_results(matches: &[TopicMatches]) -> String {
    let mut out = String::new();
    for entry in matches {
        let _ = writeln!(out, "Topic from KG: {} – {}", entry.topic.id, entry.topic.label);
        if entry.similar.is_empty() {
            out.push_str("  no similar topics found\n");
        }
        for similar in &entry.similar {
            let _ = writeln!(
                out,
                "  similar: {} – {} (score={:.4})",
                similar.id, similar.label, similar.score
            );
        }
    }
    out
}
