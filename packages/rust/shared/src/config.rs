//! Application configuration for ClearSure.
//!
//! User config lives at `~/.clearsure/clearsure.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ClearSureError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "clearsure.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".clearsure";

// ---------------------------------------------------------------------------
// Config structs (matching clearsure.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Language model settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Embedding model used for topic similarity.
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,

    /// Neo4j connection.
    #[serde(default)]
    pub neo4j: Neo4jConfig,

    /// Input and working directories.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Document partitioning.
    #[serde(default)]
    pub ingestion: IngestionConfig,

    /// Topic similarity search.
    #[serde(default)]
    pub topics: TopicsConfig,

    /// Recursive summary tree limits.
    #[serde(default)]
    pub summary: SummaryConfig,
}

/// Which backend serves completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Ollama,
    OpenAi,
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ollama => f.write_str("ollama"),
            Self::OpenAi => f.write_str("openai"),
        }
    }
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Backend: `ollama` or `openai`.
    #[serde(default = "default_provider")]
    pub provider: LlmProvider,

    /// Model name passed to the backend.
    #[serde(default = "default_model")]
    pub model: String,

    /// Env var holding the Ollama base URL.
    #[serde(default = "default_host_env")]
    pub host_env: String,

    /// Secondary env var consulted when `host_env` is unset.
    #[serde(default = "default_fallback_host_env")]
    pub fallback_host_env: String,

    /// Host used when neither env var is set.
    #[serde(default = "default_host")]
    pub default_host: String,

    /// Context window requested from Ollama.
    #[serde(default = "default_num_ctx")]
    pub num_ctx: u32,

    /// Sampling temperature.
    #[serde(default)]
    pub temperature: f32,

    /// Name of the env var holding the OpenAI API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL for OpenAI-compatible chat completions.
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            host_env: default_host_env(),
            fallback_host_env: default_fallback_host_env(),
            default_host: default_host(),
            num_ctx: default_num_ctx(),
            temperature: 0.0,
            api_key_env: default_api_key_env(),
            openai_base_url: default_openai_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> LlmProvider {
    LlmProvider::Ollama
}
fn default_model() -> String {
    "deepseek-r1:14b".into()
}
fn default_host_env() -> String {
    "OLLAMA_HOST".into()
}
fn default_fallback_host_env() -> String {
    "OLLAMA_HOST_PC".into()
}
fn default_host() -> String {
    "http://localhost:11434".into()
}
fn default_num_ctx() -> u32 {
    8192
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_timeout_secs() -> u64 {
    300
}

/// `[embeddings]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    /// Ollama embedding model.
    #[serde(default = "default_embedding_model")]
    pub model: String,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
        }
    }
}

fn default_embedding_model() -> String {
    "all-minilm".into()
}

/// `[neo4j]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neo4jConfig {
    /// Bolt URI.
    #[serde(default = "default_neo4j_uri")]
    pub uri: String,

    /// Username.
    #[serde(default = "default_neo4j_user")]
    pub user: String,

    /// Env var holding the password.
    #[serde(default = "default_neo4j_password_env")]
    pub password_env: String,

    /// Password used when the env var is unset (local development only).
    #[serde(default = "default_neo4j_password")]
    pub default_password: String,
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            uri: default_neo4j_uri(),
            user: default_neo4j_user(),
            password_env: default_neo4j_password_env(),
            default_password: default_neo4j_password(),
        }
    }
}

fn default_neo4j_uri() -> String {
    "bolt://localhost:7687".into()
}
fn default_neo4j_user() -> String {
    "neo4j".into()
}
fn default_neo4j_password_env() -> String {
    "NEO4J_PASSWORD".into()
}
fn default_neo4j_password() -> String {
    "neo4j".into()
}

/// `[paths]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Working directory for intermediate and final outputs.
    #[serde(default = "default_structured_dir")]
    pub structured_dir: String,

    /// Directory scanned by `run`.
    #[serde(default = "default_input_dir")]
    pub input_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            structured_dir: default_structured_dir(),
            input_dir: default_input_dir(),
        }
    }
}

fn default_structured_dir() -> String {
    "structured".into()
}
fn default_input_dir() -> String {
    "input".into()
}

impl PathsConfig {
    /// `<structured_dir>/input.txt`
    pub fn input_file(&self) -> PathBuf {
        Path::new(&self.structured_dir).join("input.txt")
    }

    /// `<structured_dir>/final_kg.json`
    pub fn final_kg(&self) -> PathBuf {
        Path::new(&self.structured_dir).join("final_kg.json")
    }

    /// `<structured_dir>/import_kg.cypher`
    pub fn cypher(&self) -> PathBuf {
        Path::new(&self.structured_dir).join("import_kg.cypher")
    }

    /// `<structured_dir>/clearsure.db`
    pub fn database(&self) -> PathBuf {
        Path::new(&self.structured_dir).join("clearsure.db")
    }
}

/// `[ingestion]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Merge consecutive elements into chunks.
    #[serde(default)]
    pub chunk: bool,

    /// Maximum characters per chunk.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            chunk: false,
            max_chars: default_max_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    800
}

/// `[topics]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicsConfig {
    /// Neo4j vector index name.
    #[serde(default = "default_vector_index")]
    pub vector_index: String,

    /// Neighbours returned per topic.
    #[serde(default = "default_top_k")]
    pub top_k: u32,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            vector_index: default_vector_index(),
            top_k: default_top_k(),
        }
    }
}

fn default_vector_index() -> String {
    "topic-embeddings".into()
}
fn default_top_k() -> u32 {
    5
}

/// `[summary]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    #[serde(default = "default_max_children")]
    pub max_children: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            min_chars: default_min_chars(),
            max_children: default_max_children(),
        }
    }
}

fn default_max_depth() -> usize {
    6
}
fn default_min_chars() -> usize {
    400
}
fn default_max_children() -> usize {
    10
}

// ---------------------------------------------------------------------------
// Runtime settings (merged from config + environment)
// ---------------------------------------------------------------------------

/// Runtime LLM settings with the host and key already resolved.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    pub model: String,
    pub host: String,
    pub num_ctx: u32,
    pub temperature: f32,
    pub api_key: Option<String>,
    pub openai_base_url: String,
    pub timeout_secs: u64,
    pub embedding_model: String,
}

impl From<&AppConfig> for LlmSettings {
    fn from(config: &AppConfig) -> Self {
        let api_key = std::env::var(&config.llm.api_key_env)
            .ok()
            .filter(|v| !v.is_empty());
        Self {
            provider: config.llm.provider,
            model: config.llm.model.clone(),
            host: resolve_llm_host(&config.llm),
            num_ctx: config.llm.num_ctx,
            temperature: config.llm.temperature,
            api_key,
            openai_base_url: config.llm.openai_base_url.clone(),
            timeout_secs: config.llm.timeout_secs,
            embedding_model: config.embeddings.model.clone(),
        }
    }
}

/// Runtime Neo4j settings with the password resolved.
#[derive(Debug, Clone)]
pub struct Neo4jSettings {
    pub uri: String,
    pub user: String,
    pub password: String,
}

impl From<&AppConfig> for Neo4jSettings {
    fn from(config: &AppConfig) -> Self {
        let password = std::env::var(&config.neo4j.password_env)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| config.neo4j.default_password.clone());
        Self {
            uri: config.neo4j.uri.clone(),
            user: config.neo4j.user.clone(),
            password,
        }
    }
}

/// Resolve the Ollama host: primary env var, then fallback env var, then default.
pub fn resolve_llm_host(llm: &LlmConfig) -> String {
    [&llm.host_env, &llm.fallback_host_env]
        .into_iter()
        .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| llm.default_host.clone())
        .trim_end_matches('/')
        .to_string()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.clearsure/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| ClearSureError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.clearsure/clearsure.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ClearSureError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| ClearSureError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ClearSureError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ClearSureError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ClearSureError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that an API key is available when the OpenAI provider is selected.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    if config.llm.provider != LlmProvider::OpenAi {
        return Ok(());
    }
    let var_name = &config.llm.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(ClearSureError::config(format!(
            "OpenAI API key not found. Set the {var_name} environment variable."
        ))),
    }
}
