//! Error types for ClearSure.
//!
//! Library crates use [`ClearSureError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all ClearSure operations.
#[derive(Debug, thiserror::Error)]
pub enum ClearSureError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Document parsing or text extraction error.
    #[error("ingestion error: {0}")]
    Ingestion(String),

    /// Malformed model output, patch, or file content.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// LLM transport or response error.
    #[error("llm error: {0}")]
    Llm(String),

    /// Neo4j / Cypher error.
    #[error("graph database error: {0}")]
    Graph(String),

    /// RDF store or serialization error.
    #[error("rdf error: {0}")]
    Rdf(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad arguments, empty input, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ClearSureError>;

impl ClearSureError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True when the error is a parse failure of model output or patch text.
    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Parse { .. })
    }
}
