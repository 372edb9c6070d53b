//! Shared types, error model, and configuration for ClearSure.
//!
//! This crate is the foundation depended on by all other ClearSure crates.
//! It provides:
//! - [`ClearSureError`], the unified error type
//! - Domain types ([`DocumentId`], [`DocumentMeta`], [`StatementRecord`])
//! - Configuration ([`AppConfig`], [`LlmSettings`], [`Neo4jSettings`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, EmbeddingsConfig, IngestionConfig, LlmConfig, LlmProvider, LlmSettings,
    Neo4jConfig, Neo4jSettings, PathsConfig, SummaryConfig, TopicsConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from, resolve_llm_host,
    validate_api_key,
};
pub use error::{ClearSureError, Result};
pub use types::{DocumentId, DocumentMeta, StatementRecord, content_hash};
