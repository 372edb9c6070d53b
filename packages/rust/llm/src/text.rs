//! Post-processing of raw model output.
//!
//! Reasoning models wrap their chain of thought in `<think>` tags and chat
//! models like to fence JSON in Markdown. Everything here turns that into
//! something the graph code can parse.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use clearsure_shared::{ClearSureError, Result};

/// Drop every `<think>…</think>` block and the whitespace after it.
pub fn remove_think_block(text: &str) -> String {
    static THINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>\s*").expect("valid regex"));

    THINK_RE.replace_all(text, "").to_string()
}

/// Remove a leading ```` ```json ```` fence and a trailing ```` ``` ````.
pub fn strip_fence(text: &str) -> String {
    static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)^\s*```(?:json)?\s*|\s*```\s*$").expect("valid regex")
    });

    FENCE_RE.replace_all(text, "").trim().to_string()
}

/// Return the first balanced `{…}` block of `text`, after fence stripping.
pub fn extract_json_block(text: &str) -> Result<String> {
    let text = strip_fence(text);
    let start = text
        .find('{')
        .ok_or_else(|| ClearSureError::parse("No opening '{' found in patch string."))?;

    let mut depth = 0usize;
    for (offset, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(text[start..=start + offset].to_string());
                }
            }
            _ => {}
        }
    }

    Err(ClearSureError::parse("Unbalanced braces in patch string."))
}

/// Reduce a model-proposed title to the bare label.
pub fn clean_label(raw: &str) -> String {
    static PREFIX_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)^(?:title|topic|label)\s*:\s*").expect("valid regex"));

    let text = remove_think_block(raw);
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default();

    let line = line.trim_matches(|c: char| matches!(c, '*' | '#' | '"' | '\'' | '`') || c.is_whitespace());
    let line = PREFIX_RE.replace(line, "");
    line.trim_matches(|c: char| matches!(c, '*' | '"' | '\'' | '`') || c.is_whitespace())
        .trim_end_matches(['.', ',', ';', ':', '!'])
        .trim()
        .to_string()
}

/// Interpret a yes/no answer. Anything that does not start with an
/// affirmative word counts as "no".
pub fn parse_yes_no(raw: &str) -> bool {
    let text = remove_think_block(raw);
    let first = text
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    matches!(first.as_str(), "yes" | "true" | "same")
}

/// A proposed child segment: inclusive character offsets into the parent text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SplitSpan {
    pub start: usize,
    pub end: usize,
}

/// Parse a JSON array of `{start, end}` spans.
///
/// Spans are clamped to `text_len` characters; empty, inverted or
/// out-of-range spans are dropped and the rest sorted by start.
pub fn parse_split_spans(raw: &str, text_len: usize) -> Result<Vec<SplitSpan>> {
    let cleaned = strip_fence(&remove_think_block(raw));
    let spans: Vec<SplitSpan> = match serde_json::from_str(&cleaned) {
        Ok(spans) => spans,
        Err(_) => {
            let array = extract_json_array(&cleaned)?;
            serde_json::from_str(array)
                .map_err(|e| ClearSureError::parse(format!("invalid split spans: {e}")))?
        }
    };

    if text_len == 0 {
        return Ok(Vec::new());
    }

    let mut spans: Vec<SplitSpan> = spans
        .into_iter()
        .filter(|s| s.start < text_len && s.start <= s.end)
        .map(|s| SplitSpan {
            start: s.start,
            end: s.end.min(text_len - 1),
        })
        .collect();
    spans.sort_by_key(|s| s.start);
    Ok(spans)
}

fn extract_json_array(text: &str) -> Result<&str> {
    let start = text
        .find('[')
        .ok_or_else(|| ClearSureError::parse("No JSON array found in model output."))?;
    let end = text
        .rfind(']')
        .filter(|end| *end > start)
        .ok_or_else(|| ClearSureError::parse("Unterminated JSON array in model output."))?;
    Ok(&text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_think_blocks_non_greedy() {
        let raw = "<think>step 1\nstep 2</think>\n\nAnswer one<think>x</think> tail";
        assert_eq!(remove_think_block(raw), "Answer onetail");
    }

    #[test]
    fn strips_json_fences() {
        assert_eq!(strip_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_fence("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    #[test]
    fn extracts_first_balanced_block() {
        let raw = "Sure! Here is the graph:\n{\"nodes\": [{\"id\": \"n1\"}]} and more {}";
        assert_eq!(
            extract_json_block(raw).unwrap(),
            "{\"nodes\": [{\"id\": \"n1\"}]}"
        );
    }

    #[test]
    fn extract_reports_missing_and_unbalanced() {
        let err = extract_json_block("no json here").unwrap_err();
        assert!(err.to_string().contains("No opening '{'"));
        let err = extract_json_block("{\"a\": {").unwrap_err();
        assert!(err.to_string().contains("Unbalanced braces"));
    }

    #[test]
    fn cleans_labels() {
        assert_eq!(clean_label("<think>hmm</think>**Title: Vehicle Coverage.**"), "Vehicle Coverage");
        assert_eq!(clean_label("\n\"Flood Damage\"\nExplanation follows"), "Flood Damage");
        assert_eq!(clean_label("## Deductibles"), "Deductibles");
    }

    #[test]
    fn parses_yes_no() {
        assert!(parse_yes_no("Yes, same topic."));
        assert!(parse_yes_no("<think>compare</think> yes"));
        assert!(!parse_yes_no("No."));
        assert!(!parse_yes_no(""));
    }

    #[test]
    fn parses_and_sanitizes_spans() {
        let raw = "```json\n[{\"start\": 50, \"end\": 99}, {\"start\": 0, \"end\": 49}, {\"start\": 10, \"end\": 5}, {\"start\": 120, \"end\": 130}]\n```";
        let spans = parse_split_spans(raw, 80).unwrap();
        assert_eq!(
            spans,
            vec![SplitSpan { start: 0, end: 49 }, SplitSpan { start: 50, end: 79 }]
        );
    }

    #[test]
    fn spans_tolerate_chatter() {
        let raw = "Here are the spans: [{\"start\": 0, \"end\": 9}] hope that helps";
        assert_eq!(parse_split_spans(raw, 20).unwrap().len(), 1);
        assert!(parse_split_spans("I would not split this.", 20).is_err());
    }
}
