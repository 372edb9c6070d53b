//! libSQL storage for ClearSure (`structured/clearsure.db`).
//!
//! [`Storage`] keeps the document registry, the insert-only statement audit
//! trail with full-text search, the LLM response cache, and pipeline run
//! history. The CLI opens it read-write; inspection commands use
//! [`Storage::open_readonly`], which rejects every write.

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use clearsure_shared::{ClearSureError, DocumentMeta, Result, StatementRecord};
use libsql::{Connection, Database, params};
use serde::Serialize;
use uuid::Uuid;

fn storage_err(e: impl std::fmt::Display) -> ClearSureError {
    ClearSureError::Storage(e.to_string())
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ClearSureError::Storage(format!("invalid timestamp {value:?}: {e}")))
}

pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create the database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ClearSureError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database without write access.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ClearSureError::Storage(format!(
                "database not found: {}",
                path.display()
            )));
        }
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    async fn run_migrations(&self) -> Result<()> {
        let current = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version <= current {
                continue;
            }
            tracing::info!(
                version = migration.version,
                description = migration.description,
                "Applying migration"
            );
            self.conn
                .execute_batch(migration.sql)
                .await
                .map_err(|e| {
                    ClearSureError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
        }
        Ok(())
    }

    /// Highest applied migration, 0 on a fresh database.
    async fn schema_version(&self) -> u32 {
        let Ok(mut rows) = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await
        else {
            return 0;
        };
        match rows.next().await {
            Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
            _ => 0,
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(ClearSureError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Documents
    // -----------------------------------------------------------------------

    /// Register a document and return its id.
    ///
    /// Re-registering a path with the same content hash keeps the stored id
    /// and refreshes the counts. When the content changed, the old row and
    /// its statements are removed and `doc` is stored under its own id, so
    /// the statement trail always describes the current content.
    pub async fn upsert_document(&self, doc: &DocumentMeta) -> Result<String> {
        self.check_writable()?;

        if let Some(existing) = self.get_document_by_path(&doc.path).await? {
            if existing.content_hash == doc.content_hash {
                self.conn
                    .execute(
                        "UPDATE documents SET element_count = ?1, ingested_at = ?2 WHERE id = ?3",
                        params![
                            doc.element_count as i64,
                            doc.ingested_at.to_rfc3339(),
                            existing.id.as_str()
                        ],
                    )
                    .await
                    .map_err(storage_err)?;
                return Ok(existing.id);
            }

            let removed = self.delete_document(&existing.id).await?;
            tracing::info!(
                path = %doc.path,
                old_id = %existing.id,
                statements = removed,
                "Document content changed, replacing"
            );
        }

        self.conn
            .execute(
                "INSERT INTO documents (id, path, content_hash, element_count, ingested_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    doc.id.as_str(),
                    doc.path.as_str(),
                    doc.content_hash.as_str(),
                    doc.element_count as i64,
                    doc.ingested_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(doc.id.clone())
    }

    /// Delete a document and its statements. Runs keep their history with
    /// the document reference cleared. Returns the number of statements
    /// removed.
    pub async fn delete_document(&self, document_id: &str) -> Result<u64> {
        self.check_writable()?;
        let removed = self
            .conn
            .execute(
                "DELETE FROM statements WHERE document_id = ?1",
                params![document_id],
            )
            .await
            .map_err(storage_err)?;
        self.conn
            .execute(
                "UPDATE pipeline_runs SET document_id = NULL WHERE document_id = ?1",
                params![document_id],
            )
            .await
            .map_err(storage_err)?;
        self.conn
            .execute("DELETE FROM documents WHERE id = ?1", params![document_id])
            .await
            .map_err(storage_err)?;
        Ok(removed)
    }

    pub async fn get_document_by_path(&self, path: &str) -> Result<Option<DocumentMeta>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, path, content_hash, element_count, ingested_at
                 FROM documents WHERE path = ?1",
                params![path],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(DocumentMeta {
                id: row.get::<String>(0).map_err(storage_err)?,
                path: row.get::<String>(1).map_err(storage_err)?,
                content_hash: row.get::<String>(2).map_err(storage_err)?,
                element_count: row.get::<i64>(3).map_err(storage_err)? as usize,
                ingested_at: parse_time(&row.get::<String>(4).map_err(storage_err)?)?,
            })),
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    /// Append a statement. A statement already recorded for the same
    /// `(document_id, idx)` is left untouched and `false` is returned.
    pub async fn insert_statement(&self, statement: &StatementRecord) -> Result<bool> {
        self.check_writable()?;
        let inserted = self
            .conn
            .execute(
                "INSERT INTO statements (id, document_id, idx, text, char_start, char_end, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(document_id, idx) DO NOTHING",
                params![
                    statement.id.as_str(),
                    statement.document_id.as_str(),
                    statement.idx as i64,
                    statement.text.as_str(),
                    statement.char_start as i64,
                    statement.char_end as i64,
                    statement.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(inserted > 0)
    }

    /// Statements of a document in sentence order.
    pub async fn list_statements(&self, document_id: &str) -> Result<Vec<StatementRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, document_id, idx, text, char_start, char_end, created_at
                 FROM statements WHERE document_id = ?1 ORDER BY idx",
                params![document_id],
            )
            .await
            .map_err(storage_err)?;

        let mut statements = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            statements.push(StatementRecord {
                id: row.get::<String>(0).map_err(storage_err)?,
                document_id: row.get::<String>(1).map_err(storage_err)?,
                idx: row.get::<i64>(2).map_err(storage_err)? as usize,
                text: row.get::<String>(3).map_err(storage_err)?,
                char_start: row.get::<i64>(4).map_err(storage_err)? as usize,
                char_end: row.get::<i64>(5).map_err(storage_err)? as usize,
                created_at: parse_time(&row.get::<String>(6).map_err(storage_err)?)?,
            });
        }
        Ok(statements)
    }

    /// Full-text search over statement text, best matches first.
    pub async fn search_statements(&self, query: &str, limit: u32) -> Result<Vec<StatementHit>> {
        let mut rows = self
            .conn
            .query(
                "SELECT s.document_id, s.idx, s.text, rank
                 FROM statements_fts fts
                 JOIN statements s ON s.rowid = fts.rowid
                 WHERE statements_fts MATCH ?1
                 ORDER BY rank
                 LIMIT ?2",
                params![query, limit],
            )
            .await
            .map_err(storage_err)?;

        let mut hits = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            hits.push(StatementHit {
                document_id: row.get::<String>(0).map_err(storage_err)?,
                idx: row.get::<i64>(1).map_err(storage_err)? as usize,
                text: row.get::<String>(2).map_err(storage_err)?,
                score: row.get::<f64>(3).unwrap_or(0.0),
            });
        }
        Ok(hits)
    }

    // -----------------------------------------------------------------------
    // LLM response cache
    // -----------------------------------------------------------------------

    pub async fn get_llm_cache(
        &self,
        task: &str,
        prompt_hash: &str,
        model_id: &str,
    ) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT response FROM llm_cache
                 WHERE task = ?1 AND prompt_hash = ?2 AND model_id = ?3",
                params![task, prompt_hash, model_id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row.get::<String>(0).map_err(storage_err)?)),
            None => Ok(None),
        }
    }

    /// Store a response, replacing any earlier one for the same key.
    pub async fn set_llm_cache(
        &self,
        task: &str,
        prompt_hash: &str,
        model_id: &str,
        response: &str,
    ) -> Result<()> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO llm_cache (id, task, prompt_hash, model_id, response, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(task, prompt_hash, model_id) DO UPDATE SET
                   response = excluded.response,
                   created_at = excluded.created_at",
                params![id.as_str(), task, prompt_hash, model_id, response, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Drop cached responses for `task`, or all of them. Returns the number
    /// of entries removed.
    pub async fn invalidate_llm_cache(&self, task: Option<&str>) -> Result<u64> {
        self.check_writable()?;
        let removed = match task {
            Some(task) => self
                .conn
                .execute("DELETE FROM llm_cache WHERE task = ?1", params![task])
                .await,
            None => self.conn.execute("DELETE FROM llm_cache", params![]).await,
        }
        .map_err(storage_err)?;
        tracing::debug!(removed, task = task.unwrap_or("*"), "Invalidated LLM cache");
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Pipeline runs
    // -----------------------------------------------------------------------

    /// Record the start of a pipeline run. Returns the run id.
    pub async fn insert_run(&self, document_id: Option<&str>) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO pipeline_runs (id, document_id, started_at) VALUES (?1, ?2, ?3)",
                params![id.as_str(), document_id, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(id)
    }

    pub async fn finish_run(&self, run_id: &str, stats: &serde_json::Value) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE pipeline_runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats.to_string(), run_id],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Finished runs, newest first.
    pub async fn list_runs(&self, limit: u32) -> Result<Vec<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, document_id, started_at, finished_at, stats_json
                 FROM pipeline_runs ORDER BY started_at DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(storage_err)?;

        let mut runs = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let finished_at = match row.get::<String>(3).ok() {
                Some(s) => Some(parse_time(&s)?),
                None => None,
            };
            runs.push(RunRecord {
                id: row.get::<String>(0).map_err(storage_err)?,
                document_id: row.get::<String>(1).ok(),
                started_at: parse_time(&row.get::<String>(2).map_err(storage_err)?)?,
                finished_at,
                stats: row
                    .get::<String>(4)
                    .ok()
                    .and_then(|s| serde_json::from_str(&s).ok()),
            });
        }
        Ok(runs)
    }
}

/// A statement matched by [`Storage::search_statements`].
#[derive(Debug, Clone, Serialize)]
pub struct StatementHit {
    pub document_id: String,
    pub idx: usize,
    pub text: String,
    /// FTS5 rank (lower is better).
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub id: String,
    pub document_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stats: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clearsure_shared::{DocumentId, content_hash};

    fn temp_db() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("clearsure_test_{}.db", Uuid::now_v7()))
    }

    async fn test_storage() -> Storage {
        Storage::open(&temp_db()).await.expect("open test db")
    }

    fn document(path: &str, text: &str) -> DocumentMeta {
        DocumentMeta {
            id: DocumentId::new().to_string(),
            path: path.into(),
            content_hash: content_hash(text),
            element_count: 3,
            ingested_at: Utc::now(),
        }
    }

    fn statement(document_id: &str, idx: usize, text: &str) -> StatementRecord {
        StatementRecord {
            id: Uuid::now_v7().to_string(),
            document_id: document_id.into(),
            idx,
            text: text.into(),
            char_start: idx * 100,
            char_end: idx * 100 + text.len(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let path = temp_db();
        let first = Storage::open(&path).await.expect("first open");
        assert_eq!(first.schema_version().await, 1);
        drop(first);
        let second = Storage::open(&path).await.expect("second open");
        assert_eq!(second.schema_version().await, 1);
    }

    #[tokio::test]
    async fn document_upsert_keeps_id_for_same_content() {
        let storage = test_storage().await;
        let original = document("data/policy.pdf", "v1");
        let id = storage.upsert_document(&original).await.unwrap();
        assert_eq!(id, original.id);

        let again = DocumentMeta {
            id: DocumentId::new().to_string(),
            element_count: 5,
            ..original.clone()
        };
        assert_eq!(storage.upsert_document(&again).await.unwrap(), original.id);

        let found = storage
            .get_document_by_path("data/policy.pdf")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.element_count, 5);
        assert!(storage.get_document_by_path("other.pdf").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn changed_content_replaces_document_and_statements() {
        let storage = test_storage().await;
        let original = document("structured/input.txt", "v1");
        let old_id = storage.upsert_document(&original).await.unwrap();
        storage.insert_statement(&statement(&old_id, 0, "Old sentence one.")).await.unwrap();
        let run = storage.insert_run(Some(&old_id)).await.unwrap();

        let changed = document("structured/input.txt", "v2");
        let new_id = storage.upsert_document(&changed).await.unwrap();
        assert_eq!(new_id, changed.id);
        assert_ne!(new_id, old_id);

        assert!(storage.list_statements(&old_id).await.unwrap().is_empty());
        assert!(storage.search_statements("old", 10).await.unwrap().is_empty());
        assert!(storage.insert_statement(&statement(&new_id, 0, "Brand new text here.")).await.unwrap());
        let found = storage
            .get_document_by_path("structured/input.txt")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.content_hash, content_hash("v2"));

        let runs = storage.list_runs(5).await.unwrap();
        assert_eq!(runs[0].id, run);
        assert!(runs[0].document_id.is_none());
    }

    #[tokio::test]
    async fn statements_are_insert_only() {
        let storage = test_storage().await;
        let doc_id = storage.upsert_document(&document("a.txt", "x")).await.unwrap();

        assert!(storage.insert_statement(&statement(&doc_id, 1, "Floods are covered.")).await.unwrap());
        assert!(storage.insert_statement(&statement(&doc_id, 0, "The insurer pays.")).await.unwrap());
        assert!(!storage.insert_statement(&statement(&doc_id, 0, "Rewritten.")).await.unwrap());

        let listed = storage.list_statements(&doc_id).await.unwrap();
        let texts: Vec<_> = listed.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["The insurer pays.", "Floods are covered."]);
    }

    #[tokio::test]
    async fn full_text_search_over_statements() {
        let storage = test_storage().await;
        let doc_id = storage.upsert_document(&document("a.txt", "x")).await.unwrap();
        for (idx, text) in [
            "The insurer pays for collision damage.",
            "Floods are covered up to 200 Euros.",
            "The policy ends after one year.",
        ]
        .into_iter()
        .enumerate()
        {
            storage.insert_statement(&statement(&doc_id, idx, text)).await.unwrap();
        }

        let hits = storage.search_statements("floods", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].idx, 1);
        assert!(storage.search_statements("earthquake", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn llm_cache_roundtrip_and_invalidate() {
        let storage = test_storage().await;
        assert!(storage.get_llm_cache("label_text", "h1", "llama3").await.unwrap().is_none());

        storage.set_llm_cache("label_text", "h1", "llama3", "Flood Cover").await.unwrap();
        storage.set_llm_cache("label_text", "h1", "llama3", "Flood Damage").await.unwrap();
        storage.set_llm_cache("simplify_text", "h2", "llama3", "Short.").await.unwrap();
        assert_eq!(
            storage.get_llm_cache("label_text", "h1", "llama3").await.unwrap().as_deref(),
            Some("Flood Damage")
        );
        assert!(storage.get_llm_cache("label_text", "h1", "gpt-4o").await.unwrap().is_none());

        assert_eq!(storage.invalidate_llm_cache(Some("label_text")).await.unwrap(), 1);
        assert!(storage.get_llm_cache("label_text", "h1", "llama3").await.unwrap().is_none());
        assert_eq!(storage.invalidate_llm_cache(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn run_lifecycle() {
        let storage = test_storage().await;
        let doc_id = storage.upsert_document(&document("a.txt", "x")).await.unwrap();
        let run_id = storage.insert_run(Some(&doc_id)).await.unwrap();
        storage
            .finish_run(&run_id, &serde_json::json!({"sentences": 4, "failed": 1}))
            .await
            .unwrap();

        let runs = storage.list_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].finished_at.is_some());
        assert_eq!(runs[0].stats.as_ref().unwrap()["sentences"], 4);
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let path = temp_db();
        let rw = Storage::open(&path).await.unwrap();
        rw.set_llm_cache("t", "h", "m", "r").await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&path).await.unwrap();
        assert_eq!(ro.get_llm_cache("t", "h", "m").await.unwrap().as_deref(), Some("r"));
        let err = ro.set_llm_cache("t", "h2", "m", "r").await.unwrap_err();
        assert!(err.to_string().contains("read-only"));
        assert!(ro.insert_run(None).await.is_err());
    }

    #[tokio::test]
    async fn readonly_requires_existing_database() {
        assert!(Storage::open_readonly(&temp_db()).await.is_err());
    }
}
