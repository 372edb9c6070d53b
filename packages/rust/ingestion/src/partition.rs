//! Element partitioning and chunking.
//!
//! A document is split into paragraph blocks and each block is classified as a
//! title, a list item, or narrative text. Consecutive elements can then be
//! merged into chunks bounded by a character budget.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use clearsure_shared::{ClearSureError, Result};

use crate::cleanup::clean_extracted_text;

/// Blocks with at most this many words may be titles.
const MAX_TITLE_WORDS: usize = 12;

/// Separator placed between elements merged into one chunk.
const CHUNK_SEPARATOR: &str = "\n\n";

/// Number of elements shown by [`preview`].
const PREVIEW_ELEMENTS: usize = 8;

/// Structural category of a partitioned block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementKind {
    Title,
    NarrativeText,
    ListItem,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Title => "Title",
            Self::NarrativeText => "NarrativeText",
            Self::ListItem => "ListItem",
        }
    }
}

/// Where an element came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementMetadata {
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
}

/// One structural block of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    #[serde(rename = "element_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ElementKind,
    pub text: String,
    pub metadata: ElementMetadata,
}

impl Element {
    fn new(kind: ElementKind, text: String, metadata: ElementMetadata, index: usize) -> Self {
        let id = element_id(&metadata.filename, index, &text);
        Self {
            id,
            kind,
            text,
            metadata,
        }
    }
}

fn element_id(filename: &str, index: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(filename.as_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

// ---------------------------------------------------------------------------
// Partitioning
// ---------------------------------------------------------------------------

/// Split extracted text into classified elements.
///
/// Form feeds (`\x0c`) are treated as page separators; when present every
/// element records its 1-based page number.
pub fn partition_text(text: &str, filename: &str) -> Vec<Element> {
    let pages: Vec<&str> = text.split('\x0c').collect();
    let paged = pages.len() > 1;
    let mut elements = Vec::new();

    for (page_idx, page) in pages.iter().enumerate() {
        let cleaned = clean_extracted_text(page);
        for block in cleaned.split(CHUNK_SEPARATOR) {
            let block = block.trim();
            if block.is_empty() {
                continue;
            }
            let (kind, body) = classify_block(block);
            let metadata = ElementMetadata {
                filename: filename.to_string(),
                page_number: paged.then(|| page_idx as u32 + 1),
            };
            let index = elements.len();
            elements.push(Element::new(kind, body, metadata, index));
        }
    }

    elements
}

/// Decide the kind of a paragraph block and return its normalized text.
fn classify_block(block: &str) -> (ElementKind, String) {
    static BULLET_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^(?:[-*•·]|\d+[.)])\s+").expect("valid regex")
    });

    let joined = block.lines().map(str::trim).collect::<Vec<_>>().join(" ");

    if BULLET_RE.is_match(block) {
        let body = BULLET_RE.replace(&joined, "").to_string();
        return (ElementKind::ListItem, body);
    }

    let single_line = !block.contains('\n');
    let word_count = block.split_whitespace().count();
    let terminal = block.ends_with(['.', '!', '?', ':', ';']);

    if single_line && word_count <= MAX_TITLE_WORDS && !terminal {
        return (ElementKind::Title, joined);
    }

    (ElementKind::NarrativeText, joined)
}

// ---------------------------------------------------------------------------
// Chunking
// ---------------------------------------------------------------------------

/// Return `elements` unchanged unless `chunk` is set.
pub fn maybe_chunk(elements: Vec<Element>, chunk: bool, max_chars: usize) -> Result<Vec<Element>> {
    if !chunk {
        return Ok(elements);
    }
    chunk_elements(&elements, max_chars)
}

/// Pieces waiting to be merged into the next chunk.
struct PendingChunk {
    pieces: Vec<String>,
    kind: ElementKind,
    split: bool,
    metadata: Option<ElementMetadata>,
}

impl PendingChunk {
    fn new() -> Self {
        Self {
            pieces: Vec::new(),
            kind: ElementKind::NarrativeText,
            split: false,
            metadata: None,
        }
    }

    fn char_len(&self) -> usize {
        let text: usize = self.pieces.iter().map(|p| p.chars().count()).sum();
        text + CHUNK_SEPARATOR.len() * self.pieces.len().saturating_sub(1)
    }

    fn flush(&mut self, out: &mut Vec<Element>) {
        let Some(metadata) = self.metadata.take() else {
            return;
        };
        let kind = if self.pieces.len() == 1 && !self.split {
            self.kind
        } else {
            ElementKind::NarrativeText
        };
        let text = std::mem::take(&mut self.pieces).join(CHUNK_SEPARATOR);
        let index = out.len();
        out.push(Element::new(kind, text, metadata, index));
        self.split = false;
    }
}

/// Merge consecutive elements into chunks of at most `max_chars` characters.
///
/// A title always opens a new chunk. Elements longer than the budget are
/// split at the last whitespace before the limit.
pub fn chunk_elements(elements: &[Element], max_chars: usize) -> Result<Vec<Element>> {
    if max_chars == 0 {
        return Err(ClearSureError::validation("max_chars must be greater than zero"));
    }

    let mut out = Vec::new();
    let mut pending = PendingChunk::new();

    for element in elements {
        let pieces = split_oversized(&element.text, max_chars);
        let was_split = pieces.len() > 1;

        for piece in pieces {
            let piece_len = piece.chars().count();
            let opens_section = element.kind == ElementKind::Title;
            let fits = pending.pieces.is_empty()
                || pending.char_len() + CHUNK_SEPARATOR.len() + piece_len <= max_chars;

            if !pending.pieces.is_empty() && (opens_section || !fits) {
                pending.flush(&mut out);
            }

            if pending.metadata.is_none() {
                pending.metadata = Some(element.metadata.clone());
                pending.kind = element.kind;
            }
            pending.split |= was_split;
            pending.pieces.push(piece);
        }
    }
    pending.flush(&mut out);

    Ok(out)
}

/// Split `text` into pieces of at most `max_chars` characters, preferring
/// whitespace boundaries.
fn split_oversized(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut rest = text.trim();

    while rest.chars().count() > max_chars {
        let limit = rest
            .char_indices()
            .nth(max_chars)
            .map(|(idx, _)| idx)
            .unwrap_or(rest.len());
        let cut = match rest[..limit].rfind(char::is_whitespace) {
            Some(pos) if pos > 0 => pos,
            _ => limit,
        };
        pieces.push(rest[..cut].trim_end().to_string());
        rest = rest[cut..].trim_start();
    }
    if !rest.is_empty() {
        pieces.push(rest.to_string());
    }

    pieces
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Console preview: the first few elements and the total count.
pub fn preview(elements: &[Element]) -> String {
    let mut lines: Vec<String> = elements
        .iter()
        .take(PREVIEW_ELEMENTS)
        .map(|el| {
            let snippet: String = el.text.replace('\n', " ").chars().take(80).collect();
            format!("{:<15} | {snippet:?}", el.kind.as_str())
        })
        .collect();
    lines.push(format!("... total: {} elements", elements.len()));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = "General Terms of Vehicle Insurance\n\n\
        If the insured Vehicle is involved in a collision with another road-legal Vehicle,\n\
        the insurance covers the full cost of repairs.\n\n\
        - minus the deductible of 200 Euros\n\n\
        2. Natural disasters such as floods are covered.";

    #[test]
    fn classifies_blocks() {
        let elements = partition_text(POLICY, "policy.txt");
        let kinds: Vec<ElementKind> = elements.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ElementKind::Title,
                ElementKind::NarrativeText,
                ElementKind::ListItem,
                ElementKind::ListItem,
            ]
        );
        assert_eq!(elements[2].text, "minus the deductible of 200 Euros");
        assert!(elements[1].text.contains("Vehicle, the insurance"));
        assert_eq!(elements[0].metadata.page_number, None);
    }

    #[test]
    fn element_ids_are_stable_and_distinct() {
        let a = partition_text(POLICY, "policy.txt");
        let b = partition_text(POLICY, "policy.txt");
        assert_eq!(a[0].id, b[0].id);
        assert_ne!(a[0].id, a[1].id);
        assert_eq!(a[0].id.len(), 16);
    }

    #[test]
    fn form_feeds_set_page_numbers() {
        let elements = partition_text("Cover page\x0cSecond page body text here.", "doc.pdf");
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].metadata.page_number, Some(1));
        assert_eq!(elements[1].metadata.page_number, Some(2));
    }

    #[test]
    fn element_serializes_with_type_tag() {
        let elements = partition_text("Overview", "a.txt");
        let json = serde_json::to_value(&elements[0]).unwrap();
        assert_eq!(json["type"], "Title");
        assert_eq!(json["metadata"]["filename"], "a.txt");
        assert!(json["metadata"].get("page_number").is_none());
    }

    #[test]
    fn chunking_merges_until_budget() {
        let text = "Alpha sentence one.\n\nBeta sentence two.\n\nGamma sentence three.";
        let elements = partition_text(text, "a.txt");
        let chunks = chunk_elements(&elements, 45).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "Alpha sentence one.\n\nBeta sentence two.");
        assert_eq!(chunks[1].text, "Gamma sentence three.");
        assert_eq!(chunks[1].kind, ElementKind::NarrativeText);
    }

    #[test]
    fn titles_open_new_chunks() {
        let text = "Intro paragraph text.\n\nCoverage Details\n\nRepairs are covered.";
        let elements = partition_text(text, "a.txt");
        let chunks = chunk_elements(&elements, 800).unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].text.starts_with("Coverage Details"));
    }

    #[test]
    fn oversized_elements_are_split_on_whitespace() {
        let long = "word ".repeat(50);
        let elements = partition_text(&format!("{}.", long.trim()), "a.txt");
        let chunks = chunk_elements(&elements, 20).unwrap();
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 20));
        assert!(chunks.iter().all(|c| !c.text.starts_with(' ')));
    }

    #[test]
    fn zero_budget_is_rejected() {
        let elements = partition_text("Text.", "a.txt");
        assert!(chunk_elements(&elements, 0).is_err());
        assert_eq!(maybe_chunk(elements.clone(), false, 0).unwrap(), elements);
    }

    #[test]
    fn preview_lists_first_elements() {
        let elements = partition_text(POLICY, "policy.txt");
        let out = preview(&elements);
        assert!(out.starts_with("Title           | \"General Terms"));
        assert!(out.ends_with("... total: 4 elements"));
    }
}
