//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use tracing::info;

use clearsure_core::{
    CachedModel, Neo4jSink, ProcessConfig, ProgressReporter, SummaryOptions, assign_topic_uuids,
    build_summary_tree, build_topic_tree, find_similar_topics, format_results, load_topics,
    process_document, sentence_kgs, write_json,
};
use clearsure_graph::{
    KnowledgeGraph, TripleStore, merge_summary_into_kg, parse_rebel_output, parse_triples,
    write_cypher,
};
use clearsure_ingestion::{
    extract_text, ingest_directory, maybe_chunk, partition_document, preview, write_elements,
};
use clearsure_llm::{LanguageModel, OllamaClient, build_model};
use clearsure_shared::{
    AppConfig, LlmSettings, Neo4jSettings, init_config, load_config, load_config_from,
    validate_api_key,
};
use clearsure_storage::Storage;

use crate::progress::CliProgress;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// ClearSure: turn policy documents into a layered knowledge graph.
#[derive(Parser)]
#[command(
    name = "clearsure",
    version,
    about = "Extract statements, entities, rules and topics from documents into a knowledge graph.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.clearsure/clearsure.toml.
    #[arg(long, global = true, env = "CLEARSURE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Triple input layout for `triples`.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum TripleFormat {
    /// Double-space separated `subject  object  predicate` groups.
    Rebel,
    /// One `(subject, predicate, object)` per line.
    Tuple,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Ingest the input directory, extract the graph and optionally push it.
    Run {
        /// Directory of source documents (defaults to `[paths] input_dir`).
        #[arg(long)]
        input_dir: Option<PathBuf>,

        /// Push the finished graph to Neo4j.
        #[arg(long)]
        push: bool,

        /// Wipe the Neo4j database, indexes and constraints included, before pushing.
        #[arg(long, requires = "push")]
        reset_db: bool,

        /// Also build the topic layer.
        #[arg(long)]
        topics: bool,

        /// Run the second rewrite pass on simplified sentences.
        #[arg(long)]
        stage2: bool,
    },

    /// Partition one document into elements.
    Ingest {
        /// PDF, text or markdown file.
        input: PathBuf,

        /// Write elements as JSON here instead of printing a preview.
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Merge consecutive elements into chunks.
        #[arg(long)]
        chunk: bool,

        /// Maximum characters per chunk.
        #[arg(long)]
        max_chars: Option<usize>,
    },

    /// Extract the knowledge graph from the combined input text.
    Process {
        /// Input text (defaults to `<structured_dir>/input.txt`).
        #[arg(long)]
        input: Option<PathBuf>,

        /// Keep a `.bak` copy of the previous graph.
        #[arg(long)]
        backup: bool,

        /// Extend the existing graph instead of starting fresh.
        #[arg(long)]
        keep: bool,

        /// Also build the topic layer.
        #[arg(long)]
        topics: bool,

        /// Run the second rewrite pass on simplified sentences.
        #[arg(long)]
        stage2: bool,
    },

    /// Build one small graph per sentence without merging.
    Sentences {
        path: PathBuf,

        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Build a topic tree for a document.
    Topics {
        input: PathBuf,

        #[arg(short, long, default_value = "topic_tree.json")]
        out: PathBuf,

        /// Push the tree to Neo4j.
        #[arg(long)]
        push: bool,

        /// Wipe the Neo4j database, indexes and constraints included, before pushing.
        #[arg(long, requires = "push")]
        reset_db: bool,
    },

    /// Build a recursive summary tree for a document.
    Summarize {
        path: PathBuf,

        #[arg(long)]
        max_depth: Option<usize>,

        #[arg(long)]
        min_chars: Option<usize>,

        #[arg(long)]
        max_children: Option<usize>,

        /// Ask for a one-sentence summary of every node.
        #[arg(long)]
        summaries: bool,
    },

    /// Merge a summary tree into a knowledge graph file.
    MergeSummary {
        summary: PathBuf,
        kg: PathBuf,

        /// Also write the merged graph here.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Export a graph as Cypher statements.
    Export {
        #[arg(long)]
        kg: Option<PathBuf>,

        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Push a graph to Neo4j.
    Push {
        #[arg(long)]
        kg: Option<PathBuf>,

        /// Delete all nodes first.
        #[arg(long)]
        clear: bool,

        /// With --clear, also drop constraints and indexes.
        #[arg(long, requires = "clear")]
        drop_meta: bool,

        /// Mirror the pushed statements to this file.
        #[arg(long)]
        save_to: Option<PathBuf>,
    },

    /// Find similar topics through the Neo4j vector index.
    SimilarTopics {
        #[arg(long)]
        cypher: Option<PathBuf>,

        #[arg(long)]
        top_k: Option<u32>,
    },

    /// Load extracted triples into the Turtle store.
    Triples {
        file: PathBuf,

        #[arg(long, value_enum, default_value = "rebel")]
        format: TripleFormat,

        #[arg(long, default_value = "clearsure_graph.ttl")]
        ttl: PathBuf,
    },

    /// Query recorded statements.
    Statements {
        #[command(subcommand)]
        action: StatementsAction,
    },

    /// List recent pipeline runs.
    Runs {
        #[arg(long, default_value = "10")]
        limit: u32,
    },

    /// Manage the model response cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum StatementsAction {
    /// Full-text search over statement text.
    Search {
        query: String,

        #[arg(long, default_value = "20")]
        limit: u32,
    },
}

#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// Delete cached responses, optionally only for one task.
    Clear {
        #[arg(long)]
        task: Option<String>,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

const LOG_TARGETS: &[&str] = &[
    "clearsure",
    "clearsure_core",
    "clearsure_graph",
    "clearsure_ingestion",
    "clearsure_llm",
    "clearsure_storage",
];

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let directives = LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",");

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    if let Command::Config { action } = &cli.command {
        return match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(cli.config.as_deref()),
        };
    }

    let config = match cli.config.as_deref() {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    match cli.command {
        Command::Run {
            input_dir,
            push,
            reset_db,
            topics,
            stage2,
        } => cmd_run(&config, input_dir, push, reset_db, topics, stage2).await,
        Command::Ingest {
            input,
            out,
            chunk,
            max_chars,
        } => cmd_ingest(&config, &input, out.as_deref(), chunk, max_chars),
        Command::Process {
            input,
            backup,
            keep,
            topics,
            stage2,
        } => {
            let mut process = ProcessConfig::from_app(&config);
            if let Some(input) = input {
                process.input = input;
            }
            process.backup = backup;
            process.reset = !keep;
            process.topics = topics;
            process.stage2 = stage2;
            cmd_process(&config, &process).await
        }
        Command::Sentences { path, out } => cmd_sentences(&config, &path, out).await,
        Command::Topics {
            input,
            out,
            push,
            reset_db,
        } => cmd_topics(&config, &input, &out, push, reset_db).await,
        Command::Summarize {
            path,
            max_depth,
            min_chars,
            max_children,
            summaries,
        } => {
            let mut opts = SummaryOptions::from(&config.summary);
            opts.max_depth = max_depth.unwrap_or(opts.max_depth);
            opts.min_chars = min_chars.unwrap_or(opts.min_chars);
            opts.max_children = max_children.unwrap_or(opts.max_children);
            opts.summarize = summaries;
            cmd_summarize(&config, &path, &opts).await
        }
        Command::MergeSummary { summary, kg, out } => {
            let merged = merge_summary_into_kg(&summary, &kg, out.as_deref())?;
            println!(
                "Merged summary tree: {} nodes, {} edges in {}",
                merged.nodes.len(),
                merged.edges.len(),
                kg.display()
            );
            Ok(())
        }
        Command::Export { kg, out } => {
            let kg_path = kg.unwrap_or_else(|| config.paths.final_kg());
            let out = out.unwrap_or_else(|| config.paths.cypher());
            let graph = KnowledgeGraph::load(&kg_path)?;
            let count = write_cypher(&graph, &out)?;
            println!("Wrote {count} Cypher statements to {}", out.display());
            Ok(())
        }
        Command::Push {
            kg,
            clear,
            drop_meta,
            save_to,
        } => {
            let kg_path = kg.unwrap_or_else(|| config.paths.final_kg());
            cmd_push(&config, &kg_path, clear.then_some(drop_meta), save_to.as_deref()).await
        }
        Command::SimilarTopics { cypher, top_k } => {
            let cypher = cypher.unwrap_or_else(|| config.paths.cypher());
            let top_k = top_k.unwrap_or(config.topics.top_k);
            cmd_similar_topics(&config, &cypher, top_k).await
        }
        Command::Triples { file, format, ttl } => cmd_triples(&file, &format, &ttl),
        Command::Statements { action } => match action {
            StatementsAction::Search { query, limit } => {
                cmd_statements_search(&config, &query, limit).await
            }
        },
        Command::Runs { limit } => cmd_runs(&config, limit).await,
        Command::Cache { action } => match action {
            CacheAction::Clear { task } => {
                let storage = Storage::open(&config.paths.database()).await?;
                let removed = storage.invalidate_llm_cache(task.as_deref()).await?;
                println!("Removed {removed} cached responses");
                Ok(())
            }
        },
        Command::Config { .. } => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn model_for(config: &AppConfig) -> Result<Box<dyn LanguageModel>> {
    validate_api_key(config)?;
    Ok(build_model(&LlmSettings::from(config))?)
}

async fn connect_neo4j(config: &AppConfig) -> Result<Neo4jSink> {
    Ok(Neo4jSink::connect(&Neo4jSettings::from(config)).await?)
}

async fn cmd_run(
    config: &AppConfig,
    input_dir: Option<PathBuf>,
    push: bool,
    reset_db: bool,
    topics: bool,
    stage2: bool,
) -> Result<()> {
    let input_dir = input_dir.unwrap_or_else(|| PathBuf::from(&config.paths.input_dir));
    if !input_dir.is_dir() {
        return Err(eyre!("input directory '{}' does not exist", input_dir.display()));
    }

    let report = ingest_directory(&input_dir, &config.paths.input_file())?;
    info!(
        documents = report.documents.len(),
        chars = report.total_chars,
        "Ingested input directory"
    );
    if report.documents.is_empty() {
        return Err(eyre!("no supported documents in '{}'", input_dir.display()));
    }

    let mut process = ProcessConfig::from_app(config);
    process.topics = topics;
    process.stage2 = stage2;
    cmd_process(config, &process).await?;

    if push {
        let kg = KnowledgeGraph::load(&process.kg_path)?;
        let sink = connect_neo4j(config).await?;
        if reset_db {
            sink.clear_database(true).await?;
        }
        let sent = sink.load_and_push(&kg, None).await?;
        println!("  Pushed:    {sent} statements to Neo4j");
    }
    Ok(())
}

fn cmd_ingest(
    config: &AppConfig,
    input: &Path,
    out: Option<&Path>,
    chunk: bool,
    max_chars: Option<usize>,
) -> Result<()> {
    let elements = partition_document(input)?;
    let elements = maybe_chunk(
        elements,
        chunk || config.ingestion.chunk,
        max_chars.unwrap_or(config.ingestion.max_chars),
    )?;

    match out {
        Some(out) => {
            write_elements(&elements, out)?;
            println!("Wrote {} elements to {}", elements.len(), out.display());
        }
        None => println!("{}", preview(&elements)),
    }
    Ok(())
}

async fn cmd_process(config: &AppConfig, process: &ProcessConfig) -> Result<()> {
    let model = model_for(config)?;
    let storage = Storage::open(&config.paths.database()).await?;
    let cached = CachedModel::new(model.as_ref(), &storage);

    info!(input = %process.input.display(), model = cached.model_id(), "Processing document");

    let reporter = CliProgress::new();
    let result = process_document(process, &cached, &storage, &reporter).await;
    reporter.finish();
    let result = result?;
    let (hits, misses) = cached.stats();

    println!();
    println!("  Knowledge graph built!");
    println!("  Sentences: {} ({} merged, {} skipped)", result.sentences, result.merged, result.failed);
    println!("  Mentions:  {}", result.mentions);
    println!("  Rules:     {}", result.rules);
    if process.topics {
        println!("  Topics:    {}", result.topics);
    }
    println!("  Graph:     {} nodes, {} edges", result.nodes, result.edges);
    println!("  Cache:     {hits} hits, {misses} misses");
    println!("  KG:        {}", result.kg_path.display());
    println!("  Cypher:    {}", result.cypher_path.display());
    println!("  Time:      {:.1}s", result.elapsed.as_secs_f64());
    println!();
    Ok(())
}

async fn cmd_sentences(config: &AppConfig, path: &Path, out: Option<PathBuf>) -> Result<()> {
    let model = model_for(config)?;
    let storage = Storage::open(&config.paths.database()).await?;
    let cached = CachedModel::new(model.as_ref(), &storage);

    let text = extract_text(path)?;
    let reporter = CliProgress::new();
    reporter.phase("Extracting sentence graphs");
    let kgs = sentence_kgs(&text, &cached).await;
    reporter.finish();
    let kgs = kgs?;

    let out = out.unwrap_or_else(|| Path::new(&config.paths.structured_dir).join("sentence_kgs.json"));
    write_json(&out, &kgs)?;
    println!("Wrote {} sentence graphs to {}", kgs.len(), out.display());
    Ok(())
}

async fn cmd_topics(config: &AppConfig, input: &Path, out: &Path, push: bool, reset_db: bool) -> Result<()> {
    let model = model_for(config)?;
    let storage = Storage::open(&config.paths.database()).await?;
    let cached = CachedModel::new(model.as_ref(), &storage);

    let text = extract_text(input)?;
    let reporter = CliProgress::new();
    reporter.phase("Building topic tree");
    let tree = build_topic_tree(&text, &cached).await;
    reporter.finish();
    let mut tree = tree?;
    if push {
        assign_topic_uuids(&mut tree);
    }

    write_json(out, &tree)?;
    println!("Topic tree with {} topics written to {}", tree.node_count(), out.display());

    if push {
        let sink = connect_neo4j(config).await?;
        if reset_db {
            sink.clear_database(true).await?;
        }
        sink.push_topic_tree(&tree).await?;
        println!("Pushed topic tree to Neo4j");
    }
    Ok(())
}

async fn cmd_summarize(config: &AppConfig, path: &Path, opts: &SummaryOptions) -> Result<()> {
    let model = model_for(config)?;
    let storage = Storage::open(&config.paths.database()).await?;
    let cached = CachedModel::new(model.as_ref(), &storage);

    let text = extract_text(path)?;
    let reporter = CliProgress::new();
    reporter.phase("Building summary tree");
    let tree = build_summary_tree(&text, &cached, opts).await;
    reporter.finish();
    let tree = tree?;

    println!("{}", serde_json::to_string_pretty(&tree)?);
    let out = Path::new(&config.paths.structured_dir).join("output.json");
    write_json(&out, &tree)?;
    info!(out = %out.display(), "Summary tree written");
    Ok(())
}

async fn cmd_push(
    config: &AppConfig,
    kg_path: &Path,
    clear: Option<bool>,
    save_to: Option<&Path>,
) -> Result<()> {
    let kg = KnowledgeGraph::load(kg_path)?;
    let sink = connect_neo4j(config).await?;
    if let Some(drop_meta) = clear {
        sink.clear_database(drop_meta).await?;
    }
    let sent = sink.load_and_push(&kg, save_to).await?;
    println!("Pushed {sent} statements from {} to Neo4j", kg_path.display());
    Ok(())
}

async fn cmd_similar_topics(config: &AppConfig, cypher: &Path, top_k: u32) -> Result<()> {
    let topics = load_topics(cypher)?;
    if topics.is_empty() {
        println!("No topics found in {}", cypher.display());
        return Ok(());
    }

    let embedder = OllamaClient::new(&LlmSettings::from(config))?;
    let sink = connect_neo4j(config).await?;
    let matches = find_similar_topics(&sink, &embedder, &topics, &config.topics.vector_index, top_k).await?;
    print!("{}", format_results(&matches));
    Ok(())
}

fn cmd_triples(file: &Path, format: &TripleFormat, ttl: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(file).map_err(|e| eyre!("cannot read '{}': {e}", file.display()))?;
    let triples = match format {
        TripleFormat::Rebel => parse_rebel_output(&raw),
        TripleFormat::Tuple => parse_triples(&raw),
    };

    let store = TripleStore::new()?;
    store.load(ttl)?;
    let mut added = 0;
    for (subject, predicate, object) in &triples {
        if store.add_triple(subject, predicate, object)? {
            added += 1;
        }
    }
    store.save(ttl)?;
    println!(
        "Parsed {} triples, {added} new; {} in {}",
        triples.len(),
        store.len()?,
        ttl.display()
    );
    Ok(())
}

async fn cmd_statements_search(config: &AppConfig, query: &str, limit: u32) -> Result<()> {
    let storage = Storage::open_readonly(&config.paths.database()).await?;
    let hits = storage.search_statements(query, limit).await?;
    if hits.is_empty() {
        println!("No statements match '{query}'");
    }
    for hit in hits {
        println!("[{}#{}] {}", hit.document_id, hit.idx, hit.text);
    }
    Ok(())
}

async fn cmd_runs(config: &AppConfig, limit: u32) -> Result<()> {
    let storage = Storage::open_readonly(&config.paths.database()).await?;
    for run in storage.list_runs(limit).await? {
        let status = match run.finished_at {
            Some(finished) => format!("finished {}", finished.format("%Y-%m-%d %H:%M:%S")),
            None => "unfinished".to_string(),
        };
        println!(
            "{}  started {}  {status}",
            run.id,
            run.started_at.format("%Y-%m-%d %H:%M:%S")
        );
        if let Some(stats) = run.stats {
            println!("  {stats}");
        }
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config: AppConfig = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
