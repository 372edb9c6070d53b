//! Core domain types shared between ingestion, storage, and the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// DocumentId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for ingested document identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub Uuid);

impl DocumentId {
    /// Generate a new time-sortable document identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DocumentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// DocumentMeta
// ---------------------------------------------------------------------------

/// Metadata for an ingested document, stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub id: String,
    /// Source path as given on the command line.
    pub path: String,
    /// SHA-256 of the extracted text.
    pub content_hash: String,
    /// Number of partitioned elements.
    pub element_count: usize,
    pub ingested_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// StatementRecord
// ---------------------------------------------------------------------------

/// One sentence of a processed document. Statements are never updated once
/// written; they are the audit trail behind every extracted fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementRecord {
    pub id: String,
    pub document_id: String,
    /// Position of the sentence within the document.
    pub idx: usize,
    pub text: String,
    /// Byte offset of the first character.
    pub char_start: usize,
    /// Byte offset one past the last character.
    pub char_end: usize,
    pub created_at: DateTime<Utc>,
}

/// Hex SHA-256 of `content`.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_id_roundtrip() {
        let id = DocumentId::new();
        let s = id.to_string();
        let parsed: DocumentId = s.parse().expect("parse DocumentId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn statement_serialization() {
        let record = StatementRecord {
            id: "st1".into(),
            document_id: DocumentId::new().to_string(),
            idx: 0,
            text: "The insurer covers floods.".into(),
            char_start: 0,
            char_end: 26,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&record).expect("serialize");
        let parsed: StatementRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.text, record.text);
        assert_eq!(parsed.char_end, 26);
    }

    #[test]
    fn content_hash_is_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("").len(), 64);
    }
}
