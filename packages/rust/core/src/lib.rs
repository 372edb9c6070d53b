//! Pipeline orchestration for ClearSure.
//!
//! This crate ties ingestion, the language model, graph building and storage
//! together into the end-to-end workflows the CLI exposes
//! ([`process_document`], [`build_topic_tree`], [`build_summary_tree`]) and
//! delivers results to Neo4j.

pub mod cache;
pub mod neo4j;
pub mod pipeline;
pub mod similarity;
pub mod summary;
pub mod topics;

pub use cache::{CachedModel, prompt_hash};
pub use neo4j::{Neo4jSink, assign_topic_uuids, topic_tree_queries};
pub use pipeline::{
    ProcessConfig, ProcessResult, ProgressReporter, SentenceKg, SentenceOutcome, SilentProgress,
    process_document, process_sentence, sentence_kgs,
};
pub use similarity::{SimilarTopic, TopicMatches, find_similar_topics, format_results, load_topics};
pub use summary::{SummaryOptions, build_summary_tree};
pub use topics::{build_topic_tree, ensure_length, get_context_window};

use std::path::Path;

use serde::Serialize;

use clearsure_shared::{ClearSureError, Result};

/// Write `value` as pretty JSON, creating parent directories.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ClearSureError::io(parent, e))?;
    }
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| ClearSureError::Storage(format!("failed to serialise {}: {e}", path.display())))?;
    std::fs::write(path, json).map_err(|e| ClearSureError::io(path, e))
}
