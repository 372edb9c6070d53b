//! Normalization passes for extracted document text.
//!
//! Each pass is a function `&str -> String` applied in sequence, so the
//! partitioner only has to reason about `\n` line breaks and `\n\n` paragraphs.

use std::sync::LazyLock;

use regex::Regex;

/// Run the full cleanup pipeline on one page of extracted text.
pub fn clean_extracted_text(text: &str) -> String {
    let mut result = normalize_line_endings(text);

    result = collapse_inline_whitespace(&result);
    result = clean_blank_lines(&result);
    result = rejoin_hyphenated_words(&result);

    result.trim().to_string()
}

// ---------------------------------------------------------------------------
// Pass 1: Line endings
// ---------------------------------------------------------------------------

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

// ---------------------------------------------------------------------------
// Pass 2: Inline whitespace
// ---------------------------------------------------------------------------

/// Collapse runs of spaces/tabs/NBSP inside a line and trim each line.
fn collapse_inline_whitespace(text: &str) -> String {
    static SPACE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[ \t\u{00A0}\u{2000}-\u{200B}]+").expect("valid regex"));

    text.lines()
        .map(|line| SPACE_RE.replace_all(line, " ").trim().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 3: Blank lines
// ---------------------------------------------------------------------------

/// Collapse runs of 2+ blank lines into a single paragraph break.
fn clean_blank_lines(text: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(text, "\n\n").to_string()
}

// ---------------------------------------------------------------------------
// Pass 4: Hyphenation across line breaks
// ---------------------------------------------------------------------------

/// `cover-\nage` → `coverage`. Only joins lowercase continuations so list
/// items starting with a dash are left alone.
fn rejoin_hyphenated_words(text: &str) -> String {
    static HYPHEN_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(\p{Ll})-\n(\p{Ll})").expect("valid regex"));

    HYPHEN_RE.replace_all(text, "$1$2").to_string()
}
