//! Sentence segmentation with source offsets.

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

/// A sentence and its range in the source text, both as byte offsets
/// (`start..end`) and as character offsets (`char_start..char_end`). Ends are
/// exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentenceSpan {
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub char_start: usize,
    pub char_end: usize,
}

/// Split `text` on Unicode sentence boundaries.
///
/// Surrounding whitespace is trimmed from each sentence and the offsets point
/// at the trimmed text, so `&text[span.start..span.end] == span.text`.
pub fn split_into_sentences(text: &str) -> Vec<SentenceSpan> {
    let mut chars_before = 0;
    text.split_sentence_bound_indices()
        .filter_map(|(offset, raw)| {
            let segment_chars = chars_before;
            chars_before += raw.chars().count();

            let trimmed_start = raw.trim_start();
            let trimmed = trimmed_start.trim_end();
            if trimmed.is_empty() {
                return None;
            }
            let leading = raw.len() - trimmed_start.len();
            let leading_chars = raw[..leading].chars().count();
            let start = offset + leading;
            let char_start = segment_chars + leading_chars;
            Some(SentenceSpan {
                text: trimmed.to_string(),
                start,
                end: start + trimmed.len(),
                char_start,
                char_end: char_start + trimmed.chars().count(),
            })
        })
        .collect()
}
