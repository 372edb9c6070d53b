//! Sentence-level extraction pipeline: input text → statements → entity view →
//! rules (→ topics) → `final_kg.json` + `import_kg.cypher`.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use clearsure_graph::{
    CleanOptions, CleanStats, IdMap, KnowledgeGraph, add_rules, add_statement, add_topic_tree,
    assign_statements_to_topics, clean_kg, detect_rules, link_mentions, parse_patch,
    renumber_topics, statements, update_kg, write_cypher,
};
use clearsure_ingestion::{extract_text, split_into_sentences};
use clearsure_llm::LanguageModel;
use clearsure_llm::prompts::{
    clean_up_first_phase, create_knowledge_ontology, reiterate_over_sentences, simplify_text,
};
use clearsure_llm::text::remove_think_block;
use clearsure_shared::{
    AppConfig, ClearSureError, DocumentId, DocumentMeta, Result, StatementRecord, content_hash,
};
use clearsure_storage::Storage;

use crate::topics::build_topic_tree;

/// Progress callback for long-running pipeline stages.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Item-level progress within the current phase.
    fn task_progress(&self, current: usize, total: usize, detail: &str);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn task_progress(&self, _current: usize, _total: usize, _detail: &str) {}
}

/// What happened to one sentence.
#[derive(Debug, Clone)]
pub enum SentenceOutcome {
    /// The ontology patch was merged. `id_map` maps patch ids to graph ids.
    Merged { id_map: IdMap, cleanup: CleanStats },
    /// The model's ontology output was unusable; nothing was merged.
    Skipped { reason: String },
}

/// Extract one sentence into `kg`.
///
/// The sentence is simplified, turned into a `{nodes, edges}` patch and
/// merged with renumbered ids. The model then reviews the patch edges and the
/// corrected `edges_patch` is merged with endpoints translated through the id
/// map; edges pointing at unknown nodes are dropped. An unusable review leaves
/// the merged edges as they are.
///
/// With `stage2` the simplified lines get a second rewrite pass first.
pub async fn process_sentence(
    sentence: &str,
    model: &dyn LanguageModel,
    kg: &mut KnowledgeGraph,
    stage2: bool,
) -> Result<SentenceOutcome> {
    let mut simplified = remove_think_block(&simplify_text(sentence, model).await?);
    if stage2 {
        let lines = simplified
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        simplified = reiterate_over_sentences(lines, model).await?.join("\n");
    }
    let ontology = remove_think_block(&create_knowledge_ontology(simplified.trim(), model).await?);

    let patch = match parse_patch(&ontology) {
        Ok(patch) => patch,
        Err(e) if e.is_parse() => return Ok(skipped(sentence, e)),
        Err(e) => return Err(e),
    };
    let id_map = match update_kg(kg, &patch) {
        Ok(map) => map,
        Err(e) if e.is_parse() => return Ok(skipped(sentence, e)),
        Err(e) => return Err(e),
    };

    let review = remove_think_block(&clean_up_first_phase(&patch, model).await?);
    let opts = CleanOptions {
        id_map: Some(id_map.clone()),
        reassign_edge_ids: true,
        drop_missing: true,
    };
    let cleanup = match parse_patch(&review).and_then(|edges_patch| clean_kg(kg, &edges_patch, &opts)) {
        Ok(stats) => stats,
        Err(e) if e.is_parse() => {
            warn!(error = %e, "edge review output unusable, keeping unreviewed edges");
            CleanStats::default()
        }
        Err(e) => return Err(e),
    };

    Ok(SentenceOutcome::Merged { id_map, cleanup })
}

fn skipped(sentence: &str, error: ClearSureError) -> SentenceOutcome {
    warn!(sentence, error = %error, "skipping sentence");
    SentenceOutcome::Skipped {
        reason: error.to_string(),
    }
}

/// Inputs and outputs of [`process_document`].
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Plain-text input, usually `structured/input.txt`.
    pub input: PathBuf,
    pub kg_path: PathBuf,
    pub cypher_path: PathBuf,
    /// Start from an empty graph instead of extending the existing one.
    pub reset: bool,
    /// Keep a `.bak` copy of the graph when resetting.
    pub backup: bool,
    /// Build the topic layer after all sentences are processed.
    pub topics: bool,
    /// Run the stage-2 rewrite on simplified sentences.
    pub stage2: bool,
}

impl ProcessConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            input: config.paths.input_file(),
            kg_path: config.paths.final_kg(),
            cypher_path: config.paths.cypher(),
            reset: true,
            backup: false,
            topics: false,
            stage2: false,
        }
    }
}

/// Summary of a [`process_document`] run, also stored as the run's stats.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessResult {
    pub document_id: String,
    pub run_id: String,
    pub sentences: usize,
    pub merged: usize,
    pub failed: usize,
    pub mentions: usize,
    pub rules: usize,
    pub topics: usize,
    pub nodes: usize,
    pub edges: usize,
    pub kg_path: PathBuf,
    pub cypher_path: PathBuf,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Run the full extraction over one input document.
///
/// Every sentence is recorded as a statement (database and graph) before it
/// is processed, and the graph is saved after each sentence so an interrupted
/// run keeps its progress.
#[instrument(skip_all, fields(input = %config.input.display()))]
pub async fn process_document(
    config: &ProcessConfig,
    model: &dyn LanguageModel,
    storage: &Storage,
    progress: &dyn ProgressReporter,
) -> Result<ProcessResult> {
    let start = Instant::now();

    progress.phase("Preparing knowledge graph");
    if config.reset {
        if let Some(backup) = KnowledgeGraph::reset(&config.kg_path, config.backup)? {
            info!(backup = %backup.display(), "Backed up previous graph");
        }
    } else {
        KnowledgeGraph::ensure_exists(&config.kg_path)?;
    }
    let mut kg = KnowledgeGraph::load(&config.kg_path)?;

    progress.phase("Reading input");
    let text = extract_text(&config.input)?;
    let sentences = split_into_sentences(&text);
    if sentences.is_empty() {
        return Err(ClearSureError::validation(format!(
            "no sentences found in {}",
            config.input.display()
        )));
    }

    let document_id = storage
        .upsert_document(&DocumentMeta {
            id: DocumentId::new().to_string(),
            path: config.input.display().to_string(),
            content_hash: content_hash(&text),
            element_count: sentences.len(),
            ingested_at: Utc::now(),
        })
        .await?;
    let run_id = storage.insert_run(Some(&document_id)).await?;
    info!(%document_id, %run_id, sentences = sentences.len(), "starting extraction");

    progress.phase("Extracting sentences");
    let total = sentences.len();
    let (mut merged, mut failed, mut mentions) = (0, 0, 0);

    for (idx, span) in sentences.iter().enumerate() {
        progress.task_progress(idx + 1, total, &span.text);

        storage
            .insert_statement(&StatementRecord {
                id: Uuid::now_v7().to_string(),
                document_id: document_id.clone(),
                idx,
                text: span.text.clone(),
                char_start: span.char_start,
                char_end: span.char_end,
                created_at: Utc::now(),
            })
            .await?;
        let statement_id = add_statement(
            &mut kg,
            &document_id,
            &span.text,
            idx,
            (span.char_start, span.char_end),
        );

        match process_sentence(&span.text, model, &mut kg, config.stage2).await? {
            SentenceOutcome::Merged { id_map, .. } => {
                merged += 1;
                mentions += link_mentions(&mut kg, &statement_id, id_map.values());
            }
            SentenceOutcome::Skipped { .. } => failed += 1,
        }
        kg.save(&config.kg_path)?;
    }

    progress.phase("Detecting rules");
    let detected = detect_rules(&statements(&kg, &document_id));
    let rules = add_rules(&mut kg, &detected).len();

    let mut topics = 0;
    if config.topics {
        progress.phase("Building topic tree");
        let mut tree = build_topic_tree(&text, model).await?;
        renumber_topics(&kg, &mut tree);
        topics = add_topic_tree(&mut kg, &tree, &document_id);
        assign_statements_to_topics(&mut kg);
    }

    progress.phase("Writing outputs");
    kg.save(&config.kg_path)?;
    write_cypher(&kg, &config.cypher_path)?;

    let result = ProcessResult {
        document_id,
        run_id,
        sentences: total,
        merged,
        failed,
        mentions,
        rules,
        topics,
        nodes: kg.nodes.len(),
        edges: kg.edges.len(),
        kg_path: config.kg_path.clone(),
        cypher_path: config.cypher_path.clone(),
        elapsed: start.elapsed(),
    };
    let stats = serde_json::to_value(&result)
        .map_err(|e| ClearSureError::parse(format!("failed to encode run stats: {e}")))?;
    storage.finish_run(&result.run_id, &stats).await?;

    info!(
        merged,
        failed,
        rules,
        nodes = result.nodes,
        edges = result.edges,
        elapsed_ms = result.elapsed.as_millis() as u64,
        "extraction complete"
    );
    Ok(result)
}

/// A sentence with the ontology patch the model produced for it.
#[derive(Debug, Clone, Serialize)]
pub struct SentenceKg {
    pub sentence: String,
    pub kg: Value,
}

/// Per-sentence ontology patches for `text`, without merging them.
/// Sentences whose output cannot be parsed are left out.
pub async fn sentence_kgs(text: &str, model: &dyn LanguageModel) -> Result<Vec<SentenceKg>> {
    let mut results = Vec::new();
    for span in split_into_sentences(text) {
        let simplified = remove_think_block(&simplify_text(&span.text, model).await?);
        let ontology =
            remove_think_block(&create_knowledge_ontology(simplified.trim(), model).await?);
        match parse_patch(&ontology) {
            Ok(kg) => results.push(SentenceKg {
                sentence: span.text,
                kg,
            }),
            Err(e) if e.is_parse() => {
                warn!(sentence = %span.text, error = %e, "no ontology for sentence");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(results)
}
