//! Document ingestion: text extraction, partitioning and sentence splitting.
//!
//! PDFs are read with `pdf-extract`, plain text and Markdown files as UTF-8.
//! Extracted text is cleaned, partitioned into [`Element`]s and optionally
//! chunked. [`ingest_directory`] concatenates a whole input folder into the
//! single text file the processing pipeline reads.

mod cleanup;
mod partition;
mod sentences;

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use clearsure_shared::{ClearSureError, Result, content_hash};

pub use cleanup::clean_extracted_text;
pub use partition::{
    Element, ElementKind, ElementMetadata, chunk_elements, maybe_chunk, partition_text, preview,
};
pub use sentences::{SentenceSpan, split_into_sentences};

// ---------------------------------------------------------------------------
// Formats
// ---------------------------------------------------------------------------

/// Input formats that can be extracted without external binaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Pdf,
    Text,
}

impl SourceFormat {
    /// Detect the format from the file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Ok(Self::Pdf),
            "txt" | "md" | "text" => Ok(Self::Text),
            _ => Err(ClearSureError::Ingestion(format!(
                "unsupported format: {}",
                path.display()
            ))),
        }
    }
}

/// Read a document and return its raw text.
pub fn extract_text(path: &Path) -> Result<String> {
    let format = SourceFormat::from_path(path)?;
    let bytes = std::fs::read(path).map_err(|e| ClearSureError::io(path, e))?;

    match format {
        SourceFormat::Pdf => pdf_extract::extract_text_from_mem(&bytes).map_err(|e| {
            ClearSureError::Ingestion(format!("PDF extraction failed for {}: {e}", path.display()))
        }),
        SourceFormat::Text => String::from_utf8(bytes).map_err(|e| {
            ClearSureError::Ingestion(format!("{} is not valid UTF-8: {e}", path.display()))
        }),
    }
}

/// Extract and partition a single document.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn partition_document(path: &Path) -> Result<Vec<Element>> {
    let started = Instant::now();
    let text = extract_text(path)?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let elements = partition_text(&text, &filename);

    info!(
        elements = elements.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Partitioned document"
    );
    Ok(elements)
}

/// Write elements as pretty-printed JSON, creating parent directories.
pub fn write_elements(elements: &[Element], out: &Path) -> Result<()> {
    ensure_parent(out)?;
    let json = serde_json::to_string_pretty(elements)
        .map_err(|e| ClearSureError::parse(format!("failed to serialize elements: {e}")))?;
    std::fs::write(out, json).map_err(|e| ClearSureError::io(out, e))?;
    debug!(count = elements.len(), path = %out.display(), "Wrote elements");
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ClearSureError::io(parent, e))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Directory ingestion
// ---------------------------------------------------------------------------

/// One document folded into the combined input file.
#[derive(Debug, Clone, Serialize)]
pub struct IngestedDocument {
    pub path: PathBuf,
    pub element_count: usize,
    pub content_hash: String,
}

/// Outcome of [`ingest_directory`].
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub documents: Vec<IngestedDocument>,
    pub out_file: PathBuf,
    pub total_chars: usize,
}

/// Partition every supported file in `input_dir` and write the combined text
/// to `out_file`.
#[instrument(skip_all, fields(input_dir = %input_dir.display()))]
pub fn ingest_directory(input_dir: &Path, out_file: &Path) -> Result<IngestReport> {
    let entries = std::fs::read_dir(input_dir).map_err(|e| ClearSureError::io(input_dir, e))?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    files.sort_by_key(|p| p.file_name().map(|n| n.to_os_string()));

    let mut documents = Vec::new();
    let mut texts = Vec::new();

    for path in files {
        if SourceFormat::from_path(&path).is_err() {
            warn!(path = %path.display(), "Skipping unsupported file");
            continue;
        }
        let elements = partition_document(&path)?;
        let text = elements
            .iter()
            .map(|el| el.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        documents.push(IngestedDocument {
            content_hash: content_hash(&text),
            element_count: elements.len(),
            path,
        });
        texts.push(text);
    }

    if documents.is_empty() {
        return Err(ClearSureError::validation(format!(
            "no supported documents found in {}",
            input_dir.display()
        )));
    }

    let combined = texts.join("\n\n");
    ensure_parent(out_file)?;
    std::fs::write(out_file, &combined).map_err(|e| ClearSureError::io(out_file, e))?;

    info!(
        documents = documents.len(),
        chars = combined.chars().count(),
        out = %out_file.display(),
        "Ingestion complete"
    );

    Ok(IngestReport {
        documents,
        out_file: out_file.to_path_buf(),
        total_chars: combined.chars().count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("clearsure-ingest-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn detects_formats() {
        assert_eq!(
            SourceFormat::from_path(Path::new("a/Policy.PDF")).unwrap(),
            SourceFormat::Pdf
        );
        assert_eq!(
            SourceFormat::from_path(Path::new("notes.md")).unwrap(),
            SourceFormat::Text
        );
        let err = SourceFormat::from_path(Path::new("deck.pptx")).unwrap_err();
        assert!(err.to_string().contains("unsupported format"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = extract_text(Path::new("/definitely/not/here.txt")).unwrap_err();
        match err {
            ClearSureError::Io { source, .. } => {
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound)
            }
            other => panic!("expected io error, got {other:?}"),
        }
    }

    #[test]
    fn ingests_directory_in_name_order() {
        let dir = temp_dir();
        std::fs::write(dir.join("b.txt"), "Second document text.").unwrap();
        std::fs::write(dir.join("a.md"), "Terms\n\nFirst document text.").unwrap();
        std::fs::write(dir.join("image.png"), [0u8, 1, 2]).unwrap();
        let out = dir.join("structured").join("input.txt");

        let report = ingest_directory(&dir, &out).unwrap();
        assert_eq!(report.documents.len(), 2);
        assert_eq!(report.documents[0].element_count, 2);

        let combined = std::fs::read_to_string(&out).unwrap();
        assert_eq!(combined, "Terms\n\nFirst document text.\n\nSecond document text.");
        assert_eq!(report.total_chars, combined.chars().count());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn empty_directory_is_rejected() {
        let dir = temp_dir();
        let err = ingest_directory(&dir, &dir.join("out.txt")).unwrap_err();
        assert!(matches!(err, ClearSureError::Validation { .. }));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn writes_elements_json() {
        let dir = temp_dir();
        let out = dir.join("nested").join("elements.json");
        let elements = partition_text("Heading\n\nBody text here.", "x.txt");
        write_elements(&elements, &out).unwrap();

        let parsed: Vec<Element> =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(parsed, elements);
        std::fs::remove_dir_all(&dir).ok();
    }
}
